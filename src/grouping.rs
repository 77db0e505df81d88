use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::affinity::AffinityMatrix;
use crate::models::{ClosingPartyResult, Group, Participant, Tier};

/// Knobs for group formation. Tier thresholds compare against a group's
/// average intra-group affinity and are always injected by the caller.
#[derive(Debug, Clone)]
pub struct GroupFormationConfig {
    pub target_group_size: usize,
    pub tier_high: f64,
    pub tier_low: f64,
}

impl Default for GroupFormationConfig {
    fn default() -> Self {
        Self {
            target_group_size: 6,
            tier_high: 2.0,
            tier_low: 0.5,
        }
    }
}

/// Partitions the active roster into closing-party groups.
///
/// Greedy heuristic, O(cohort_size²) affinity lookups:
/// - seed each group with the pool participant least co-matched with the
///   rest of the pool (tie: lowest id);
/// - grow by repeatedly adding the pool participant with the highest total
///   affinity to the current members (tie: lowest id) up to the target size.
///
/// Remainder policy: a final group smaller than ceil(target/2) is dissolved
/// into the existing groups (highest total affinity first; tie: smaller
/// group, then lower group number), which may push receivers past the target
/// size. Larger remainders stand as their own group.
///
/// Absent members (flagged on the roster or carried from the previous
/// result) never enter the heuristic; they come back as the single Absent
/// group at the end.
pub fn form_groups(
    roster: &[Participant],
    matrix: &AffinityMatrix,
    config: &GroupFormationConfig,
    carried_absent: &[Uuid],
    formed_at: DateTime<Utc>,
) -> ClosingPartyResult {
    let mut absent: Vec<Uuid> = carried_absent.to_vec();
    let mut absent_set: HashSet<Uuid> = absent.iter().copied().collect();
    let mut flagged: Vec<Uuid> = roster
        .iter()
        .filter(|p| p.absent && !absent_set.contains(&p.id))
        .map(|p| p.id)
        .collect();
    flagged.sort();
    absent_set.extend(flagged.iter().copied());
    absent.extend(flagged);

    let mut pool: Vec<Uuid> = roster
        .iter()
        .filter(|p| !absent_set.contains(&p.id))
        .map(|p| p.id)
        .collect();
    pool.sort();

    let total_participants = pool.len() + absent.len();
    let target = config.target_group_size.max(1);

    let mut formed: Vec<Vec<Uuid>> = Vec::new();
    while !pool.is_empty() {
        let seed = pick_seed(&pool, matrix);
        pool.retain(|id| *id != seed);

        let mut members = vec![seed];
        while members.len() < target && !pool.is_empty() {
            let next = pick_closest(&pool, &members, matrix);
            pool.retain(|id| *id != next);
            members.push(next);
        }
        formed.push(members);
    }

    dissolve_small_remainder(&mut formed, matrix, target);

    let mut groups: Vec<Group> = formed
        .into_iter()
        .enumerate()
        .map(|(idx, members)| {
            let average = round2(matrix.average_within(&members));
            Group::Partitioned {
                number: (idx + 1) as u32,
                tier: classify(average, config),
                average_affinity: average,
                members,
            }
        })
        .collect();

    if !absent.is_empty() {
        groups.push(Group::Absent { members: absent });
    }

    ClosingPartyResult {
        cohort: roster
            .first()
            .map(|p| p.cohort.clone())
            .unwrap_or_default(),
        groups,
        formed_at,
        total_participants,
    }
}

/// Pool participant with the smallest total affinity to the rest of the
/// pool; ties go to the lowest id.
fn pick_seed(pool: &[Uuid], matrix: &AffinityMatrix) -> Uuid {
    let mut best = pool[0];
    let mut best_total = u32::MAX;
    for &candidate in pool {
        let total: u32 = pool
            .iter()
            .filter(|other| **other != candidate)
            .map(|other| matrix.lookup(candidate, *other))
            .sum();
        if total < best_total || (total == best_total && candidate < best) {
            best_total = total;
            best = candidate;
        }
    }
    best
}

/// Pool participant with the highest total affinity to the current members;
/// ties go to the lowest id.
fn pick_closest(pool: &[Uuid], members: &[Uuid], matrix: &AffinityMatrix) -> Uuid {
    let mut best = pool[0];
    let mut best_score = 0u32;
    let mut first = true;
    for &candidate in pool {
        let score: u32 = members
            .iter()
            .map(|member| matrix.lookup(candidate, *member))
            .sum();
        if first || score > best_score || (score == best_score && candidate < best) {
            best_score = score;
            best = candidate;
            first = false;
        }
    }
    best
}

fn dissolve_small_remainder(formed: &mut Vec<Vec<Uuid>>, matrix: &AffinityMatrix, target: usize) {
    let min_standalone = target.div_ceil(2);
    if formed.len() < 2 {
        return;
    }
    let last_len = formed.last().map(|g| g.len()).unwrap_or(0);
    if last_len >= min_standalone {
        return;
    }

    let leftover = formed.pop().unwrap_or_default();
    for member in leftover {
        let mut best_idx = 0;
        let mut best_score = 0u32;
        let mut first = true;
        for (idx, group) in formed.iter().enumerate() {
            let score: u32 = group.iter().map(|m| matrix.lookup(member, *m)).sum();
            let better = first
                || score > best_score
                || (score == best_score && group.len() < formed[best_idx].len());
            if better {
                best_idx = idx;
                best_score = score;
                first = false;
            }
        }
        formed[best_idx].push(member);
    }
}

fn classify(average_affinity: f64, config: &GroupFormationConfig) -> Tier {
    if average_affinity >= config.tier_high {
        Tier::Active
    } else if average_affinity >= config.tier_low {
        Tier::Moderate
    } else {
        Tier::Inactive
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
