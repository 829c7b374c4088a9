//! Segment allocator
//!
//! Splits a file's segment range across the eligible holders. Peers are
//! grouped into shape-classes by the `num_segments` they announced; each
//! class covers the stretch between the previous class boundary and its own
//! segment count, divided as evenly as possible among its members.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::Assignment;

use super::registry::EligiblePeer;

/// Compute one contiguous assignment per eligible peer
pub fn allocate(file_name: &str, peers: &[EligiblePeer]) -> SwarmResult<Vec<Assignment>> {
    if peers.is_empty() {
        return Err(SwarmError::not_found_with_resource(
            format!("No eligible peers for {}", file_name),
            file_name.to_string(),
        ));
    }

    let mut sorted: Vec<&EligiblePeer> = peers.iter().collect();
    sorted.sort_by_key(|p| p.current_segments);

    let mut classes: BTreeMap<u32, Vec<&EligiblePeer>> = BTreeMap::new();
    for peer in sorted {
        classes.entry(peer.num_segments).or_default().push(peer);
    }

    let mut assignments = Vec::with_capacity(peers.len());
    let mut boundary = 0u32;

    for (value, members) in classes {
        let k = members.len() as u32;
        let len = value.saturating_sub(boundary);
        if len < k {
            return Err(SwarmError::allocation_error_with_file(
                format!(
                    "Cannot split {} segments [{}, {}) across {} peers",
                    len, boundary, value, k
                ),
                file_name.to_string(),
            ));
        }

        let base = len / k;
        let extra = len % k;
        let mut start = boundary;
        for (i, peer) in members.into_iter().enumerate() {
            let size = base + u32::from((i as u32) < extra);
            let end = start + size;
            assignments.push(Assignment {
                peer_addr: peer.peer_addr.clone(),
                start_segment: start,
                end_segment: end,
                num_segments: peer.num_segments,
                current_segments: peer.current_segments,
                cursor: start,
            });
            start = end;
        }
        boundary = value;
    }

    debug!("Allocated {} ranges of {} across {} peers", assignments.len(), file_name, peers.len());
    Ok(assignments)
}
