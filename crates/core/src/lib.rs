//! # Expander Core
//!
//! Shared data model and contracts for the adaptive expansion engine.
//!
//! ## Pieces
//!
//! ```text
//! Tree Access Layer (external)
//!     │
//!     ├──> CandidateNode (category + priority + visibility)
//!     │
//!     └──> RevealHandler (per category)
//!            └─> Result<bool, ExpandError> ──> Outcome
//! ```
//!
//! The engine crate consumes these types; this crate owns no scheduling
//! logic of its own.

mod candidate;
mod error;
mod options;
mod traits;

pub use candidate::{CandidateCategory, CandidateNode, NodeId};
pub use error::{ExpandError, Outcome, Result};
pub use options::ExpandOptions;
pub use traits::{RevealHandler, TreeAccess};
