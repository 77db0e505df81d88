use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::models::{ClosingPartyResult, Group, Participant, Tier};

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Active => "active",
        Tier::Moderate => "moderate",
        Tier::Inactive => "inactive",
        Tier::Mixed => "mixed",
    }
}

pub fn build_report(result: &ClosingPartyResult, participants: &[Participant]) -> String {
    let names: HashMap<Uuid, &str> = participants
        .iter()
        .map(|p| (p.id, p.name.as_str()))
        .collect();
    let display = |id: &Uuid| names.get(id).copied().unwrap_or("Unknown");

    let mut output = String::new();
    let _ = writeln!(output, "# Closing Party Groups");
    let _ = writeln!(
        output,
        "Cohort {} — {} participants, formed {}",
        result.cohort,
        result.total_participants,
        result.formed_at.format("%Y-%m-%d %H:%M UTC")
    );

    for group in &result.groups {
        let _ = writeln!(output);
        match group {
            Group::Partitioned {
                number,
                members,
                tier,
                average_affinity,
            } => {
                let _ = writeln!(
                    output,
                    "## Group {} — {} (avg affinity {:.2})",
                    number,
                    tier_label(*tier),
                    average_affinity
                );
                for member in members {
                    let _ = writeln!(output, "- {}", display(member));
                }
            }
            Group::Absent { members } => {
                let _ = writeln!(output, "## Absent");
                if members.is_empty() {
                    let _ = writeln!(output, "Nobody has opted out.");
                } else {
                    for member in members {
                        let _ = writeln!(output, "- {}", display(member));
                    }
                }
            }
        }
    }

    output
}
