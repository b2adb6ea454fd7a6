use expander_core::CandidateNode;

/// Ordered multiset of candidates.
///
/// Total order: priority descending, then visibility descending, then FIFO
/// among equals so equal candidates drain in discovery order. Kept as a
/// sorted vec; insertion is O(n), which is fine at the queue sizes discovery
/// produces (hundreds, not millions).
#[derive(Default)]
pub struct CandidateQueue {
    items: Vec<Entry>,
    seq: u64,
}

struct Entry {
    node: CandidateNode,
    seq: u64,
}

/// Sort key, higher drains first.
const fn key(node: &CandidateNode) -> (u8, bool) {
    (node.priority, node.visible)
}

impl CandidateQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert preserving the total order.
    pub fn enqueue(&mut self, node: CandidateNode) {
        let node_key = key(&node);
        // Position after every entry with key >= ours keeps FIFO among ties.
        let idx = self.items.partition_point(|e| key(&e.node) >= node_key);
        self.items.insert(
            idx,
            Entry {
                node,
                seq: self.seq,
            },
        );
        self.seq += 1;
    }

    /// Remove and return up to `size` highest-ordered candidates. Empty
    /// input or queue yields an empty vec.
    pub fn dequeue_batch(&mut self, size: usize) -> Vec<CandidateNode> {
        let take = size.min(self.items.len());
        self.items.drain(..take).map(|e| e.node).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[cfg(test)]
    fn seq_of(&self, idx: usize) -> u64 {
        self.items[idx].seq
    }
}
