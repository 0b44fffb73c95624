use std::collections::{HashSet, VecDeque};

use crate::domain::utils::id::ResourceId;

/// Alternate resources to try, in preference order.
///
/// Built once per attempt cycle and only ever drained. Running dry is the
/// normal "no more alternatives" signal, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFallbackQueue {
    queue: VecDeque<ResourceId>,
}

impl ResourceFallbackQueue {
    /// Drops the currently selected resource and repeated entries from `preferred`.
    pub fn from_preferred(preferred: &[ResourceId], selected: Option<&ResourceId>) -> Self {
        let mut seen: HashSet<&ResourceId> = selected.into_iter().collect();
        let queue = preferred.iter().filter(|id| seen.insert(*id)).cloned().collect();

        ResourceFallbackQueue { queue }
    }

    /// Keeps only resources the page actually offers. An empty candidate list
    /// means the page could not tell, and leaves the queue as it is.
    pub fn retain_offered(&mut self, candidates: &[ResourceId]) {
        if candidates.is_empty() {
            return;
        }
        let offered: HashSet<&ResourceId> = candidates.iter().collect();
        self.queue.retain(|id| {
            let keep = offered.contains(id);
            if !keep {
                log::warn!("Preferred resource {} is not offered by the page, dropping it.", id);
            }
            keep
        });
    }

    pub fn next(&mut self) -> Option<ResourceId> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn remaining(&self) -> Vec<ResourceId> {
        self.queue.iter().cloned().collect()
    }
}
