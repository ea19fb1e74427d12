//! # quorum
//!
//! why: commit and election decisions reduce to majority arithmetic over peer sets
//! relations: used by tracker.rs for committed index, vote tallies and quorum liveness
//! what: MajorityConfig, JointConfig, VoteResult, AckedIndexer

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// a raft log index
pub type Index = u64;

/// outcome of counting votes against a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteResult {
    /// not decided yet, more votes may still arrive
    Pending,
    /// quorum can no longer be reached
    Lost,
    /// quorum granted
    Won,
}

/// looks up the highest log index a peer has acknowledged
pub trait AckedIndexer {
    fn acked_index(&self, id: &NodeId) -> Option<Index>;
}

impl AckedIndexer for BTreeMap<NodeId, Index> {
    fn acked_index(&self, id: &NodeId) -> Option<Index> {
        self.get(id).copied()
    }
}

impl AckedIndexer for HashMap<NodeId, Index> {
    fn acked_index(&self, id: &NodeId) -> Option<Index> {
        self.get(id).copied()
    }
}

/// A single voting group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MajorityConfig(BTreeSet<NodeId>);

impl MajorityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// members needed for a majority: ⌊n/2⌋ + 1
    pub fn quorum(&self) -> usize {
        self.0.len() / 2 + 1
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.0.contains(id)
    }

    pub fn insert(&mut self, id: NodeId) -> bool {
        self.0.insert(id)
    }

    pub fn remove(&mut self, id: &NodeId) -> bool {
        self.0.remove(id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }

    /// members in ascending order
    pub fn slice(&self) -> Vec<NodeId> {
        self.0.iter().cloned().collect()
    }

    /// Largest index acknowledged by a quorum of members
    ///
    /// Members without an acknowledgement count as index 0. An empty
    /// configuration returns `Index::MAX` so that it never holds back the
    /// other half of a joint configuration.
    pub fn committed_index<A: AckedIndexer + ?Sized>(&self, acked: &A) -> Index {
        let n = self.0.len();
        if n == 0 {
            return Index::MAX;
        }

        // most clusters have at most seven voters; skip the allocation for them
        let mut stack = [0 as Index; 7];
        let mut heap;
        let srt: &mut [Index] = if n <= stack.len() {
            &mut stack[..n]
        } else {
            heap = vec![0 as Index; n];
            heap.as_mut_slice()
        };

        for (slot, id) in srt.iter_mut().zip(&self.0) {
            *slot = acked.acked_index(id).unwrap_or(0);
        }
        srt.sort_unstable();

        srt[n - self.quorum()]
    }

    /// Outcome of `votes` against this group
    ///
    /// An empty group wins: with no voters there is nobody to disagree.
    pub fn vote_result(&self, votes: &BTreeMap<NodeId, bool>) -> VoteResult {
        if self.0.is_empty() {
            return VoteResult::Won;
        }

        let mut granted = 0;
        let mut missing = 0;
        for id in &self.0 {
            match votes.get(id) {
                Some(true) => granted += 1,
                Some(false) => {}
                None => missing += 1,
            }
        }

        let q = self.quorum();
        if granted >= q {
            VoteResult::Won
        } else if granted + missing >= q {
            VoteResult::Pending
        } else {
            VoteResult::Lost
        }
    }
}

impl FromIterator<NodeId> for MajorityConfig {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for MajorityConfig {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(NodeId::from).collect())
    }
}

impl fmt::Display for MajorityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str(")")
    }
}

/// Two voting groups that must both agree during a reconfiguration
///
/// `incoming` is the target membership; `outgoing` is empty unless a joint
/// transition is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointConfig {
    pub incoming: MajorityConfig,
    pub outgoing: MajorityConfig,
}

impl JointConfig {
    pub fn new(incoming: MajorityConfig, outgoing: MajorityConfig) -> Self {
        Self { incoming, outgoing }
    }

    pub fn is_joint(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// union of both halves
    pub fn ids(&self) -> BTreeSet<NodeId> {
        self.incoming.iter().chain(self.outgoing.iter()).cloned().collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.incoming.contains(id) || self.outgoing.contains(id)
    }

    /// the more conservative of the two halves
    pub fn committed_index<A: AckedIndexer + ?Sized>(&self, acked: &A) -> Index {
        let idx0 = self.incoming.committed_index(acked);
        let idx1 = self.outgoing.committed_index(acked);
        idx0.min(idx1)
    }

    /// won only if both halves win, lost if either loses
    pub fn vote_result(&self, votes: &BTreeMap<NodeId, bool>) -> VoteResult {
        let r1 = self.incoming.vote_result(votes);
        let r2 = self.outgoing.vote_result(votes);

        if r1 == r2 {
            return r1;
        }
        if r1 == VoteResult::Lost || r2 == VoteResult::Lost {
            return VoteResult::Lost;
        }
        // one won, the other is pending
        VoteResult::Pending
    }
}

impl fmt::Display for JointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.outgoing.is_empty() {
            write!(f, "{}", self.incoming)
        } else {
            write!(f, "{}&&{}", self.incoming, self.outgoing)
        }
    }
}
