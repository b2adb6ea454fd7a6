use crate::{CandidateCategory, CandidateNode, NodeId, Result};
use async_trait::async_trait;

/// Read-side seam to the live tree.
///
/// Implementations own pattern matching, per-variant selector chains, and
/// their own caching; the engine only consumes categorized candidates. The
/// tree mutates concurrently with processing, so `find_candidates` is
/// re-polled between batches to pick up newly appeared content.
#[async_trait]
pub trait TreeAccess: Send + Sync {
    /// Current candidates for one category. Must not re-surface nodes it has
    /// already reported as processed; the engine additionally guards with a
    /// per-run attempted set.
    async fn find_candidates(&self, category: CandidateCategory) -> Result<Vec<CandidateNode>>;

    /// Whether the node is currently on screen.
    async fn is_visible(&self, id: &NodeId) -> bool;

    /// Whether the tree has stabilized around the node after a reveal.
    async fn is_settled(&self, id: &NodeId) -> bool;
}

/// Category-specific reveal operation.
///
/// The handler performs the actual tree mutation. `Ok(true)` means the node
/// expanded, `Ok(false)` means the handler ran but the element refused to
/// expand. Errors follow the [`crate::ExpandError`] taxonomy; intentional
/// interruptions raise `Cancelled`, never `Fatal`.
#[async_trait]
pub trait RevealHandler: Send + Sync {
    async fn reveal(&self, node: &CandidateNode) -> Result<bool>;
}
