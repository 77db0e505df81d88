use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::EngineError;

/// Per-viewer entry of a stored matching day. The current shape carries an
/// `assigned` list; the legacy shape carries `similar` + `opposite` lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAssignment {
    #[serde(default)]
    pub assigned: Option<Vec<Uuid>>,
    #[serde(default)]
    pub similar: Option<Vec<Uuid>>,
    #[serde(default)]
    pub opposite: Option<Vec<Uuid>>,
}

impl RawAssignment {
    /// Ids this viewer received, whichever shape the record uses. `None`
    /// means the entry matches no known shape.
    fn assigned_ids(&self) -> Option<Vec<Uuid>> {
        if let Some(list) = &self.assigned {
            return Some(list.clone());
        }
        if self.similar.is_some() || self.opposite.is_some() {
            let mut ids: Vec<Uuid> = Vec::new();
            ids.extend(self.similar.iter().flatten().copied());
            ids.extend(self.opposite.iter().flatten().copied());
            return Some(ids);
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCluster {
    #[serde(rename = "memberIds", alias = "member_ids")]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPayload {
    #[serde(default)]
    pub assignments: BTreeMap<Uuid, RawAssignment>,
    #[serde(default)]
    pub clusters: BTreeMap<String, RawCluster>,
}

/// One stored matching day for a cohort, in whichever legacy shape it was
/// written.
#[derive(Debug, Clone)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub payload: HistoryPayload,
}

/// Normalizes one history record into unordered co-occurrence pairs. Both
/// legacy shapes pass through here; the aggregation loop never branches on
/// shape. Self-pairs are dropped.
pub fn normalize(day: &HistoryDay) -> Result<Vec<(Uuid, Uuid)>, EngineError> {
    if day.payload.assignments.is_empty() && day.payload.clusters.is_empty() {
        return Err(EngineError::CorruptHistory(format!(
            "record for {} carries neither assignments nor clusters",
            day.date
        )));
    }

    let mut pairs = Vec::new();

    for (viewer, entry) in &day.payload.assignments {
        let assigned = entry.assigned_ids().ok_or_else(|| {
            EngineError::CorruptHistory(format!(
                "entry for viewer {viewer} on {} matches no known shape",
                day.date
            ))
        })?;
        for other in assigned {
            if other != *viewer {
                pairs.push((*viewer, other));
            }
        }
    }

    for cluster in day.payload.clusters.values() {
        let members = &cluster.member_ids;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if members[i] != members[j] {
                    pairs.push((members[i], members[j]));
                }
            }
        }
    }

    Ok(pairs)
}

/// Symmetric pairwise co-occurrence counts, stored sparsely under a canonical
/// (min, max) key. Unseen pairs read as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffinityMatrix {
    counts: HashMap<(Uuid, Uuid), u32>,
}

impl AffinityMatrix {
    fn key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn record(&mut self, a: Uuid, b: Uuid) {
        if a == b {
            return;
        }
        *self.counts.entry(Self::key(a, b)).or_insert(0) += 1;
    }

    pub fn lookup(&self, a: Uuid, b: Uuid) -> u32 {
        if a == b {
            return 0;
        }
        self.counts.get(&Self::key(a, b)).copied().unwrap_or(0)
    }

    /// Mean affinity between `participant` and each of `others`; missing
    /// pairs count as 0.
    pub fn average_affinity(&self, participant: Uuid, others: &[Uuid]) -> f64 {
        if others.is_empty() {
            return 0.0;
        }
        let total: u32 = others
            .iter()
            .map(|other| self.lookup(participant, *other))
            .sum();
        total as f64 / others.len() as f64
    }

    /// Mean over all unordered member pairs; 0 for fewer than two members.
    pub fn average_within(&self, members: &[Uuid]) -> f64 {
        if members.len() < 2 {
            return 0.0;
        }
        let mut total = 0u32;
        let mut pairs = 0u32;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                total += self.lookup(members[i], members[j]);
                pairs += 1;
            }
        }
        total as f64 / pairs as f64
    }

    pub fn pair_count(&self) -> usize {
        self.counts.len()
    }
}

/// Builds the matrix from a cohort's full matching history. Pure function of
/// its input: identical history yields an identical matrix. Runs in
/// O(cohort_size × history_length) pair increments.
pub fn build(history: &[HistoryDay]) -> Result<AffinityMatrix, EngineError> {
    let mut matrix = AffinityMatrix::default();
    for day in history {
        for (a, b) in normalize(day)? {
            matrix.record(a, b);
        }
    }
    Ok(matrix)
}

/// Per-viewer set of ids assigned within the given history window, used as
/// the recency exclusion set for allocation. Cluster records carry no
/// per-viewer direction and do not contribute.
pub fn recent_exclusions(
    window: &[HistoryDay],
) -> Result<HashMap<Uuid, HashSet<Uuid>>, EngineError> {
    let mut recent: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for day in window {
        for (viewer, entry) in &day.payload.assignments {
            let assigned = entry.assigned_ids().ok_or_else(|| {
                EngineError::CorruptHistory(format!(
                    "entry for viewer {viewer} on {} matches no known shape",
                    day.date
                ))
            })?;
            recent.entry(*viewer).or_default().extend(assigned);
        }
    }
    Ok(recent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date_day: u32, payload: HistoryPayload) -> HistoryDay {
        HistoryDay {
            date: NaiveDate::from_ymd_opt(2026, 4, date_day).unwrap(),
            payload,
        }
    }

    fn assigned_day(date_day: u32, viewer: Uuid, assigned: Vec<Uuid>) -> HistoryDay {
        let mut assignments = BTreeMap::new();
        assignments.insert(
            viewer,
            RawAssignment {
                assigned: Some(assigned),
                ..Default::default()
            },
        );
        day(
            date_day,
            HistoryPayload {
                assignments,
                clusters: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn matrix_is_symmetric_and_defaults_to_zero() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let matrix = build(&[assigned_day(1, a, vec![b]), assigned_day(2, a, vec![b])]).unwrap();

        assert_eq!(matrix.lookup(a, b), 2);
        assert_eq!(matrix.lookup(b, a), 2);
        assert_eq!(matrix.lookup(a, c), 0);
    }

    #[test]
    fn building_twice_yields_identical_matrices() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let history = vec![
            assigned_day(1, a, vec![b, c]),
            assigned_day(2, b, vec![c]),
        ];

        let first = build(&history).unwrap();
        let second = build(&history).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_similar_opposite_shape_is_normalized() {
        let viewer = Uuid::new_v4();
        let similar = Uuid::new_v4();
        let opposite = Uuid::new_v4();

        let mut assignments = BTreeMap::new();
        assignments.insert(
            viewer,
            RawAssignment {
                assigned: None,
                similar: Some(vec![similar]),
                opposite: Some(vec![opposite]),
            },
        );
        let record = day(
            1,
            HistoryPayload {
                assignments,
                clusters: BTreeMap::new(),
            },
        );

        let matrix = build(&[record]).unwrap();
        assert_eq!(matrix.lookup(viewer, similar), 1);
        assert_eq!(matrix.lookup(viewer, opposite), 1);
    }

    #[test]
    fn cluster_records_count_every_inner_pair() {
        let members = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut clusters = BTreeMap::new();
        clusters.insert(
            "cluster-1".to_string(),
            RawCluster {
                member_ids: members.clone(),
            },
        );
        let record = day(
            1,
            HistoryPayload {
                assignments: BTreeMap::new(),
                clusters,
            },
        );

        let matrix = build(&[record]).unwrap();
        assert_eq!(matrix.lookup(members[0], members[1]), 1);
        assert_eq!(matrix.lookup(members[0], members[2]), 1);
        assert_eq!(matrix.lookup(members[1], members[2]), 1);
        assert_eq!(matrix.pair_count(), 3);
    }

    #[test]
    fn unrecognizable_entry_is_a_hard_error() {
        let mut assignments = BTreeMap::new();
        assignments.insert(Uuid::new_v4(), RawAssignment::default());
        let record = day(
            1,
            HistoryPayload {
                assignments,
                clusters: BTreeMap::new(),
            },
        );

        let result = build(&[record]);
        assert!(matches!(result, Err(EngineError::CorruptHistory(_))));
    }

    #[test]
    fn empty_record_is_a_hard_error() {
        let record = day(1, HistoryPayload::default());
        assert!(matches!(
            build(&[record]),
            Err(EngineError::CorruptHistory(_))
        ));
    }

    #[test]
    fn average_affinity_counts_missing_pairs_as_zero() {
        let p = Uuid::new_v4();
        let close = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let matrix = build(&[
            assigned_day(1, p, vec![close]),
            assigned_day(2, p, vec![close]),
        ])
        .unwrap();

        let average = matrix.average_affinity(p, &[close, stranger]);
        assert!((average - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recent_exclusions_collect_both_shapes() {
        let viewer = Uuid::new_v4();
        let seen_new = Uuid::new_v4();
        let seen_old = Uuid::new_v4();

        let mut assignments = BTreeMap::new();
        assignments.insert(
            viewer,
            RawAssignment {
                assigned: None,
                similar: Some(vec![seen_old]),
                opposite: None,
            },
        );
        let legacy = day(
            1,
            HistoryPayload {
                assignments,
                clusters: BTreeMap::new(),
            },
        );

        let window = vec![legacy, assigned_day(2, viewer, vec![seen_new])];
        let recent = recent_exclusions(&window).unwrap();
        let set = recent.get(&viewer).unwrap();
        assert!(set.contains(&seen_new));
        assert!(set.contains(&seen_old));
        assert_eq!(set.len(), 2);
    }
}
