//! # dtang-core
//!
//! why: decide what is committed, which membership changes are safe and who won an election
//! relations: gated by dtang-linkeddata capabilities, driven by an external transport/driver loop
//! what: quorum math, per-peer progress, progress tracker, joint-consensus config changes

pub mod confchange;
pub mod error;
pub mod id;
pub mod membership;
pub mod message;
pub mod progress;
pub mod quorum;
pub mod tracker;

pub use confchange::{check_invariants, Changer};
pub use error::{ConfChangeError, MembershipError};
pub use id::NodeId;
pub use membership::{apply_authorized, MembershipPolicy, CONF_CHANGE_ACTION};
pub use message::{ConfChangeSingle, ConfChangeTransition, ConfChangeType, ConfChangeV2, ConfState};
pub use progress::{Inflights, Progress, ProgressState};
pub use quorum::{AckedIndexer, Index, JointConfig, MajorityConfig, VoteResult};
pub use tracker::{Config, ProgressMap, ProgressTracker, TrackerConfig};
