use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{ClosingPartyResult, Group, Tier, ABSENT_GROUP_ID};

/// Moves one member between groups of a closing-party result.
///
/// All preconditions are checked before anything mutates, so a failed move
/// leaves the result untouched. Both touched groups lose their heuristic
/// label and become Mixed; the Absent pseudo-group keeps its fixed tier and
/// is created on first use as a target. A non-Absent group emptied by the
/// move is pruned.
pub fn move_member(
    result: &mut ClosingPartyResult,
    participant: Uuid,
    from_id: &str,
    to_id: &str,
) -> Result<(), EngineError> {
    let from_idx = result
        .groups
        .iter()
        .position(|g| g.id() == from_id)
        .ok_or_else(|| EngineError::GroupNotFound(from_id.to_string()))?;

    let member_pos = result.groups[from_idx]
        .members()
        .iter()
        .position(|id| *id == participant)
        .ok_or(EngineError::ParticipantNotInGroup {
            participant,
            group: from_id.to_string(),
        })?;

    let to_idx = match result.groups.iter().position(|g| g.id() == to_id) {
        Some(idx) => idx,
        None if to_id == ABSENT_GROUP_ID => {
            result.groups.push(Group::Absent { members: Vec::new() });
            result.groups.len() - 1
        }
        None => return Err(EngineError::GroupNotFound(to_id.to_string())),
    };

    result.groups[from_idx].members_mut().remove(member_pos);
    result.groups[to_idx].members_mut().push(participant);

    for idx in [from_idx, to_idx] {
        if let Group::Partitioned { tier, .. } = &mut result.groups[idx] {
            *tier = Tier::Mixed;
        }
    }

    result
        .groups
        .retain(|g| g.is_absent() || !g.members().is_empty());

    Ok(())
}
