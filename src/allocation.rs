use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{DailyAssignment, Gender, Participant, ViewerAssignment};

/// Inputs for one day's allocation, all resolved by the caller. Providers are
/// the participants who submitted approved content on the provider day;
/// viewers are the whole active roster.
pub struct AllocationInput<'a> {
    pub cohort: &'a str,
    pub date: NaiveDate,
    pub viewers: &'a [Participant],
    pub provider_ids: &'a HashSet<Uuid>,
    pub submission_counts: &'a HashMap<Uuid, usize>,
    pub recent: &'a HashMap<Uuid, HashSet<Uuid>>,
}

/// Profile books a viewer unlocks per day: 2 × (approved submission days + 2).
pub fn target_size(submission_count: usize) -> usize {
    2 * (submission_count + 2)
}

/// Computes the full daily assignment for a cohort. Randomness comes from the
/// injected `rng`; identical inputs and seed produce identical output. The
/// returned batch has already passed validation — callers commit it as a
/// whole or not at all.
pub fn allocate<R: Rng>(
    input: &AllocationInput<'_>,
    rng: &mut R,
) -> Result<DailyAssignment, EngineError> {
    let mut viewers: Vec<&Participant> = input.viewers.iter().collect();
    viewers.sort_by_key(|v| v.id);

    let mut assignments = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut pool_sizes = HashMap::new();

    for viewer in &viewers {
        let count = input
            .submission_counts
            .get(&viewer.id)
            .copied()
            .unwrap_or(0);
        let target = target_size(count);
        let excluded = input.recent.get(&viewer.id);

        let viewer_id = viewer.id;
        let eligible = |p: &Participant| {
            p.id != viewer_id && !excluded.map(|set| set.contains(&p.id)).unwrap_or(false)
        };

        let mut pool: Vec<&Participant> = viewers
            .iter()
            .filter(|p| input.provider_ids.contains(&p.id) && eligible(p))
            .copied()
            .collect();

        // Provider pool too thin: fall back to the whole viewer roster under
        // the same exclusions. Providers are a subset of viewers, so the
        // filtered roster is already the deduplicated union.
        if pool.len() < target {
            pool = viewers.iter().filter(|p| eligible(p)).copied().collect();
        }

        let pool_size = pool.len();
        let assigned = select_with_gender_balance(&pool, target, rng);

        if assigned.len() < target {
            warnings.push(format!(
                "viewer {}: pool supplied {} of {} requested",
                viewer.id,
                assigned.len(),
                target
            ));
        }

        pool_sizes.insert(viewer.id, pool_size);
        assignments.insert(
            viewer.id,
            ViewerAssignment {
                shortfall: assigned.len() < target,
                assigned,
                target,
            },
        );
    }

    let batch = DailyAssignment {
        cohort: input.cohort.to_string(),
        date: input.date,
        assignments,
        warnings,
    };

    validate(&batch, &pool_sizes)?;
    Ok(batch)
}

/// Gender-balanced sampling: floor(target/2) from each of the shuffled male
/// and female partitions, remainder from the re-shuffled leftover pool,
/// truncated to min(target, pool).
fn select_with_gender_balance<R: Rng>(
    pool: &[&Participant],
    target: usize,
    rng: &mut R,
) -> Vec<Uuid> {
    if pool.is_empty() || target == 0 {
        return Vec::new();
    }

    let mut male: Vec<Uuid> = Vec::new();
    let mut female: Vec<Uuid> = Vec::new();
    let mut other: Vec<Uuid> = Vec::new();
    for p in pool {
        match p.gender {
            Gender::Male => male.push(p.id),
            Gender::Female => female.push(p.id),
            Gender::Other => other.push(p.id),
        }
    }

    male.shuffle(rng);
    female.shuffle(rng);
    other.shuffle(rng);

    let per_gender = target / 2;
    let take_male = per_gender.min(male.len());
    let take_female = per_gender.min(female.len());

    let mut selected: Vec<Uuid> = Vec::new();
    selected.extend(&male[..take_male]);
    selected.extend(&female[..take_female]);

    if selected.len() < target {
        let mut leftover: Vec<Uuid> = Vec::new();
        leftover.extend(&male[take_male..]);
        leftover.extend(&female[take_female..]);
        leftover.extend(&other);
        leftover.shuffle(rng);
        let missing = target - selected.len();
        selected.extend(leftover.into_iter().take(missing));
    }

    selected.truncate(target.min(pool.len()));
    selected
}

/// Pre-commit validation over the whole batch: no self-reference, no
/// duplicates, and size exactly min(target, pool) per viewer. Any violation
/// aborts the batch with per-viewer diagnostics.
pub fn validate(
    batch: &DailyAssignment,
    pool_sizes: &HashMap<Uuid, usize>,
) -> Result<(), EngineError> {
    let mut problems = Vec::new();

    for (viewer, assignment) in &batch.assignments {
        if assignment.assigned.contains(viewer) {
            problems.push(format!("viewer {viewer}: assigned to self"));
        }

        let unique: HashSet<&Uuid> = assignment.assigned.iter().collect();
        if unique.len() != assignment.assigned.len() {
            problems.push(format!("viewer {viewer}: duplicate assignments"));
        }

        if let Some(pool_size) = pool_sizes.get(viewer) {
            let expected = assignment.target.min(*pool_size);
            if assignment.assigned.len() != expected {
                problems.push(format!(
                    "viewer {viewer}: expected {expected} assignments, found {}",
                    assignment.assigned.len()
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn participant(gender: Gender) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            name: "Reader".to_string(),
            gender,
            cohort: "2".to_string(),
            absent: false,
        }
    }

    fn roster(males: usize, females: usize) -> Vec<Participant> {
        let mut viewers = Vec::new();
        for _ in 0..males {
            viewers.push(participant(Gender::Male));
        }
        for _ in 0..females {
            viewers.push(participant(Gender::Female));
        }
        viewers
    }

    fn allocate_with_seed(
        viewers: &[Participant],
        provider_ids: &HashSet<Uuid>,
        counts: &HashMap<Uuid, usize>,
        recent: &HashMap<Uuid, HashSet<Uuid>>,
        seed: u64,
    ) -> DailyAssignment {
        let input = AllocationInput {
            cohort: "2",
            date: NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
            viewers,
            provider_ids,
            submission_counts: counts,
            recent,
        };
        allocate(&input, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn target_size_formula() {
        assert_eq!(target_size(0), 4);
        assert_eq!(target_size(1), 6);
        assert_eq!(target_size(2), 8);
        assert_eq!(target_size(5), 14);
        assert_eq!(target_size(10), 24);
    }

    #[test]
    fn fresh_viewer_gets_two_of_each_gender() {
        // submissionCount 0 → target 4, drawn from 10 male + 10 female
        // providers with no exclusions.
        let mut viewers = roster(10, 10);
        let watcher = participant(Gender::Other);
        let watcher_id = watcher.id;
        viewers.push(watcher);

        let provider_ids: HashSet<Uuid> = viewers
            .iter()
            .filter(|p| p.id != watcher_id)
            .map(|p| p.id)
            .collect();

        let batch = allocate_with_seed(
            &viewers,
            &provider_ids,
            &HashMap::new(),
            &HashMap::new(),
            11,
        );

        let assignment = &batch.assignments[&watcher_id];
        assert_eq!(assignment.assigned.len(), 4);
        assert!(!assignment.assigned.contains(&watcher_id));
        assert!(!assignment.shortfall);

        let by_gender = |wanted: Gender| {
            assignment
                .assigned
                .iter()
                .filter(|id| {
                    viewers
                        .iter()
                        .any(|p| p.id == **id && p.gender == wanted)
                })
                .count()
        };
        assert_eq!(by_gender(Gender::Male), 2);
        assert_eq!(by_gender(Gender::Female), 2);
    }

    #[test]
    fn invariants_hold_across_seeds() {
        let viewers = roster(8, 9);
        let provider_ids: HashSet<Uuid> = viewers.iter().take(12).map(|p| p.id).collect();
        let mut counts = HashMap::new();
        for (i, p) in viewers.iter().enumerate() {
            counts.insert(p.id, i % 3);
        }

        for seed in [1u64, 17, 99, 4242] {
            let batch = allocate_with_seed(&viewers, &provider_ids, &counts, &HashMap::new(), seed);
            for (viewer, assignment) in &batch.assignments {
                assert!(!assignment.assigned.contains(viewer));
                let unique: HashSet<&Uuid> = assignment.assigned.iter().collect();
                assert_eq!(unique.len(), assignment.assigned.len());
                assert!(assignment.assigned.len() <= assignment.target);
            }
        }
    }

    #[test]
    fn falls_back_to_viewer_pool_when_providers_run_short() {
        let viewers = roster(6, 6);
        // Only one provider; every target is at least 4, so the pool expands.
        let provider_ids: HashSet<Uuid> = viewers.iter().take(1).map(|p| p.id).collect();

        let batch =
            allocate_with_seed(&viewers, &provider_ids, &HashMap::new(), &HashMap::new(), 5);

        for assignment in batch.assignments.values() {
            assert_eq!(assignment.assigned.len(), 4);
            assert!(!assignment.shortfall);
        }
    }

    #[test]
    fn recency_exclusions_are_never_assigned() {
        let viewers = roster(5, 5);
        let viewer_id = viewers[0].id;
        let blocked: HashSet<Uuid> = viewers[1..4].iter().map(|p| p.id).collect();
        let mut recent = HashMap::new();
        recent.insert(viewer_id, blocked.clone());

        let provider_ids: HashSet<Uuid> = viewers.iter().map(|p| p.id).collect();

        for seed in [3u64, 21, 77] {
            let batch = allocate_with_seed(&viewers, &provider_ids, &HashMap::new(), &recent, seed);
            let assignment = &batch.assignments[&viewer_id];
            for id in &assignment.assigned {
                assert!(!blocked.contains(id));
            }
        }
    }

    #[test]
    fn shortfall_is_flagged_not_fatal() {
        // Three participants: target 4 but each pool holds only 2.
        let viewers = roster(2, 1);
        let provider_ids: HashSet<Uuid> = viewers.iter().map(|p| p.id).collect();

        let batch =
            allocate_with_seed(&viewers, &provider_ids, &HashMap::new(), &HashMap::new(), 9);

        assert_eq!(batch.assignments.len(), 3);
        for assignment in batch.assignments.values() {
            assert_eq!(assignment.assigned.len(), 2);
            assert!(assignment.shortfall);
        }
        assert_eq!(batch.warnings.len(), 3);
    }

    #[test]
    fn validate_rejects_self_reference_and_duplicates() {
        let viewer = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut assignments = BTreeMap::new();
        assignments.insert(
            viewer,
            ViewerAssignment {
                assigned: vec![viewer, other, other],
                target: 4,
                shortfall: false,
            },
        );
        let batch = DailyAssignment {
            cohort: "2".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
            assignments,
            warnings: Vec::new(),
        };
        let mut pool_sizes = HashMap::new();
        pool_sizes.insert(viewer, 10);

        let result = validate(&batch, &pool_sizes);
        match result {
            Err(EngineError::Validation(problems)) => {
                assert_eq!(problems.len(), 3);
            }
            _ => panic!("expected validation failure"),
        }
    }
}
