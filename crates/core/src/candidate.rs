use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a node in the live tree.
///
/// The engine never interprets the value; it only compares handles for the
/// per-run "already attempted" set and passes them back to the Tree Access
/// Layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kinds of collapsed content the discovery pass can surface.
///
/// The category is the contract boundary with the Tree Access Layer: pattern
/// matching and per-variant selector chains live on the far side, the engine
/// only routes each category to its reveal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateCategory {
    Collapsed,
    MoreReplies,
    MoreComments,
    ContinueThread,
    CrowdControl,
    ContestMode,
    Deleted,
    ViewRest,
}

impl CandidateCategory {
    /// All categories, in descending static priority.
    pub const ALL: [CandidateCategory; 8] = [
        CandidateCategory::Collapsed,
        CandidateCategory::MoreReplies,
        CandidateCategory::MoreComments,
        CandidateCategory::ContinueThread,
        CandidateCategory::ViewRest,
        CandidateCategory::CrowdControl,
        CandidateCategory::ContestMode,
        CandidateCategory::Deleted,
    ];

    /// Static scheduling priority; higher drains first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            CandidateCategory::Collapsed => 10,
            CandidateCategory::MoreReplies => 8,
            CandidateCategory::MoreComments => 7,
            CandidateCategory::ContinueThread => 6,
            CandidateCategory::ViewRest => 5,
            CandidateCategory::CrowdControl | CandidateCategory::ContestMode => 4,
            CandidateCategory::Deleted => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CandidateCategory::Collapsed => "collapsed",
            CandidateCategory::MoreReplies => "more_replies",
            CandidateCategory::MoreComments => "more_comments",
            CandidateCategory::ContinueThread => "continue_thread",
            CandidateCategory::CrowdControl => "crowd_control",
            CandidateCategory::ContestMode => "contest_mode",
            CandidateCategory::Deleted => "deleted",
            CandidateCategory::ViewRest => "view_rest",
        }
    }
}

impl fmt::Display for CandidateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node identified as eligible for one reveal operation.
///
/// Immutable once created; owned by the queue until dequeued, then by the
/// executor for the duration of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNode {
    pub id: NodeId,
    pub category: CandidateCategory,
    pub priority: u8,
    /// Whether the node was on screen at discovery time. Visible nodes are
    /// preferred within equal priority so user-facing gaps close first.
    pub visible: bool,
}

impl CandidateNode {
    pub fn new(id: impl Into<NodeId>, category: CandidateCategory, visible: bool) -> Self {
        Self {
            id: id.into(),
            category,
            priority: category.priority(),
            visible,
        }
    }
}
