//! Pair topology resolution
//!
//! A deployment lists its pipe groups as rank lists, e.g. `[[0, 1], [2, 3]]`.
//! Each group is one point-to-point pipe. Within a group ranks form a ring:
//! the member at position `i` sends to position `(i + 1) % n` and receives
//! from `(i - 1) % n`. With exactly two members both directions name the
//! same peer.

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTopology {
    pub group: Vec<u32>,
    pub local_rank: u32,
    /// Position of the local rank within `group`
    pub rank_in_group: usize,
    pub send_target: u32,
    pub recv_source: u32,
}

impl PipeTopology {
    /// Locate `local_rank` in `group_ranks` and derive its peer
    pub fn resolve(group_ranks: &[Vec<u32>], local_rank: u32) -> Result<Self, TransportError> {
        let field = Some("group_ranks");
        for (index, group) in group_ranks.iter().enumerate() {
            if group.len() != 2 {
                return Err(TransportError::configuration(
                    format!("group {index} has {} ranks, pipes connect exactly 2", group.len()),
                    field,
                ));
            }
            if group[0] == group[1] {
                return Err(TransportError::configuration(
                    format!("group {index} pairs rank {} with itself", group[0]),
                    field,
                ));
            }
        }

        let mut memberships = group_ranks
            .iter()
            .filter(|group| group.contains(&local_rank));
        let group = memberships.next().ok_or_else(|| {
            TransportError::configuration(
                format!("rank {local_rank} is not a member of any group"),
                field,
            )
        })?;
        if memberships.next().is_some() {
            return Err(TransportError::configuration(
                format!("rank {local_rank} appears in more than one group"),
                field,
            ));
        }

        let n = group.len();
        let rank_in_group = group
            .iter()
            .position(|&r| r == local_rank)
            .ok_or_else(|| TransportError::configuration("rank vanished from its group", field))?;

        Ok(Self {
            group: group.clone(),
            local_rank,
            rank_in_group,
            send_target: group[(rank_in_group + 1) % n],
            recv_source: group[(rank_in_group + n - 1) % n],
        })
    }

    /// The single rank this endpoint talks to
    pub fn peer_rank(&self) -> u32 {
        self.send_target
    }
}
