use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed id of the pseudo-group holding members who skip the closing party.
pub const ABSENT_GROUP_ID: &str = "absent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub gender: Gender,
    pub cohort: String,
    pub absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Approved,
    Pending,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub participant_id: Uuid,
    pub cohort: String,
    pub submitted_on: NaiveDate,
    pub status: SubmissionStatus,
}

/// Distinct approved submission dates per participant. Two approved entries
/// on the same date count once.
pub fn submission_counts(records: &[SubmissionRecord]) -> HashMap<Uuid, usize> {
    let mut dates: HashMap<Uuid, HashSet<NaiveDate>> = HashMap::new();
    for record in records {
        if record.status == SubmissionStatus::Approved {
            dates
                .entry(record.participant_id)
                .or_default()
                .insert(record.submitted_on);
        }
    }
    dates.into_iter().map(|(id, set)| (id, set.len())).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerAssignment {
    pub assigned: Vec<Uuid>,
    pub target: usize,
    pub shortfall: bool,
}

/// One day's profile-book allocation for a cohort, keyed by viewer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAssignment {
    pub cohort: String,
    pub date: NaiveDate,
    pub assignments: BTreeMap<Uuid, ViewerAssignment>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Active,
    Moderate,
    Inactive,
    Mixed,
}

/// A closing-party group. The Absent variant bypasses the affinity heuristic
/// entirely: fixed id, fixed Inactive tier, carried forward across
/// regenerations until members are explicitly moved out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Group {
    Partitioned {
        number: u32,
        members: Vec<Uuid>,
        tier: Tier,
        average_affinity: f64,
    },
    Absent {
        members: Vec<Uuid>,
    },
}

impl Group {
    pub fn id(&self) -> String {
        match self {
            Group::Partitioned { number, .. } => format!("group-{number}"),
            Group::Absent { .. } => ABSENT_GROUP_ID.to_string(),
        }
    }

    pub fn members(&self) -> &[Uuid] {
        match self {
            Group::Partitioned { members, .. } => members,
            Group::Absent { members } => members,
        }
    }

    pub fn members_mut(&mut self) -> &mut Vec<Uuid> {
        match self {
            Group::Partitioned { members, .. } => members,
            Group::Absent { members } => members,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Group::Partitioned { tier, .. } => *tier,
            Group::Absent { .. } => Tier::Inactive,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Group::Absent { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingPartyResult {
    pub cohort: String,
    pub groups: Vec<Group>,
    pub formed_at: DateTime<Utc>,
    pub total_participants: usize,
}

impl ClosingPartyResult {
    pub fn absent_members(&self) -> Vec<Uuid> {
        self.groups
            .iter()
            .filter(|g| g.is_absent())
            .flat_map(|g| g.members().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Uuid, day: u32, status: SubmissionStatus) -> SubmissionRecord {
        SubmissionRecord {
            participant_id: id,
            cohort: "1".to_string(),
            submitted_on: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            status,
        }
    }

    #[test]
    fn submission_counts_use_distinct_approved_dates() {
        let id = Uuid::new_v4();
        let records = vec![
            record(id, 1, SubmissionStatus::Approved),
            record(id, 1, SubmissionStatus::Approved),
            record(id, 2, SubmissionStatus::Approved),
            record(id, 3, SubmissionStatus::Pending),
            record(id, 4, SubmissionStatus::Rejected),
        ];

        let counts = submission_counts(&records);
        assert_eq!(counts.get(&id), Some(&2));
    }

    #[test]
    fn absent_group_has_fixed_id_and_tier() {
        let group = Group::Absent {
            members: vec![Uuid::new_v4()],
        };
        assert_eq!(group.id(), ABSENT_GROUP_ID);
        assert_eq!(group.tier(), Tier::Inactive);
    }

    #[test]
    fn partitioned_group_id_follows_number() {
        let group = Group::Partitioned {
            number: 3,
            members: vec![],
            tier: Tier::Active,
            average_affinity: 1.5,
        };
        assert_eq!(group.id(), "group-3");
    }
}
