//! # message
//!
//! why: define the configuration-change payloads the driver hands to the tracker
//! relations: consumed by confchange.rs and tracker.rs, serialized for the log and transport
//! what: ConfChangeType, ConfChangeSingle, ConfChangeTransition, ConfChangeV2, ConfState

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// what a single membership change does to one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfChangeType {
    /// make the peer a voter
    AddNode,
    /// drop the peer entirely
    RemoveNode,
    /// no membership effect
    UpdateNode,
    /// make the peer a learner, demoting it if it votes
    AddLearnerNode,
}

/// One membership change for one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChangeSingle {
    pub change_type: ConfChangeType,
    pub node_id: NodeId,
}

impl ConfChangeSingle {
    pub fn new(change_type: ConfChangeType, node_id: impl Into<NodeId>) -> Self {
        Self {
            change_type,
            node_id: node_id.into(),
        }
    }

    pub fn add_node(node_id: impl Into<NodeId>) -> Self {
        Self::new(ConfChangeType::AddNode, node_id)
    }

    pub fn add_learner(node_id: impl Into<NodeId>) -> Self {
        Self::new(ConfChangeType::AddLearnerNode, node_id)
    }

    pub fn remove_node(node_id: impl Into<NodeId>) -> Self {
        Self::new(ConfChangeType::RemoveNode, node_id)
    }
}

/// how a multi-step change leaves the joint configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfChangeTransition {
    /// simple change when possible, otherwise joint with automatic leave
    #[default]
    Auto,
    /// always joint, leave automatically
    Implicit,
    /// always joint, wait for an explicit leave
    Explicit,
}

/// A batch of membership changes applied as one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChangeV2 {
    pub transition: ConfChangeTransition,
    pub changes: Vec<ConfChangeSingle>,
}

impl ConfChangeV2 {
    pub fn new(transition: ConfChangeTransition, changes: Vec<ConfChangeSingle>) -> Self {
        Self { transition, changes }
    }

    /// the empty change, which asks to leave a joint configuration
    pub fn leave() -> Self {
        Self::default()
    }

    /// Whether this change must go through a joint configuration
    ///
    /// Returns the auto-leave flag when it does.
    pub fn enter_joint(&self) -> Option<bool> {
        if self.transition != ConfChangeTransition::Auto || self.changes.len() > 1 {
            let auto_leave = match self.transition {
                ConfChangeTransition::Auto | ConfChangeTransition::Implicit => true,
                ConfChangeTransition::Explicit => false,
            };
            return Some(auto_leave);
        }
        None
    }

    /// true for the empty change that requests leaving the joint configuration
    pub fn leave_joint(&self) -> bool {
        self.transition == ConfChangeTransition::Auto && self.changes.is_empty()
    }
}

/// Snapshot of a tracker's configuration, all lists sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfState {
    pub voters: Vec<NodeId>,
    pub voters_outgoing: Vec<NodeId>,
    pub learners: Vec<NodeId>,
    pub learners_next: Vec<NodeId>,
    pub auto_leave: bool,
}
