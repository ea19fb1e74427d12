//! # tracker
//!
//! why: one authoritative view of cluster shape and per-peer replication
//! relations: uses quorum.rs for commit/vote math, confchange.rs for membership changes
//! what: TrackerConfig, Config, ProgressTracker
//!
//! The tracker is not thread-safe. It belongs to a single driver loop that
//! serializes every read and mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::confchange::{check_invariants, Changer};
use crate::error::ConfChangeError;
use crate::id::NodeId;
use crate::message::{ConfChangeSingle, ConfChangeV2, ConfState};
use crate::progress::Progress;
use crate::quorum::{AckedIndexer, Index, JointConfig, MajorityConfig, VoteResult};

/// per-peer progress keyed by identity; iteration is in ascending id order
pub type ProgressMap = BTreeMap<NodeId, Progress>;

/// Tunables for a [`ProgressTracker`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// appends a leader may have outstanding per peer
    pub max_inflight: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_inflight: 256 }
    }
}

/// Cluster shape tracked by a [`ProgressTracker`]
///
/// Invariant: `learners` never intersects either half of `voters`. A voter
/// being demoted during a joint transition waits in `learners_next` until the
/// transition completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub voters: JointConfig,
    /// leave the joint configuration automatically once it is safe
    pub auto_leave: bool,
    pub learners: BTreeSet<NodeId>,
    pub learners_next: BTreeSet<NodeId>,
}

impl Config {
    pub fn is_joint(&self) -> bool {
        self.voters.is_joint()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voters={}", self.voters)?;
        if !self.learners.is_empty() {
            write!(f, " learners={}", self.learners.iter().cloned().collect::<MajorityConfig>())?;
        }
        if !self.learners_next.is_empty() {
            write!(f, " learners_next={}", self.learners_next.iter().cloned().collect::<MajorityConfig>())?;
        }
        if self.auto_leave {
            f.write_str(" autoleave")?;
        }
        Ok(())
    }
}

// match indexes of voting peers; learners never count toward commit
struct MatchAckIndexer<'a>(&'a ProgressMap);

impl AckedIndexer for MatchAckIndexer<'_> {
    fn acked_index(&self, id: &NodeId) -> Option<Index> {
        self.0
            .get(id)
            .filter(|pr| !pr.is_learner)
            .map(|pr| pr.match_index)
    }
}

/// Tracks the active configuration and what is known about each peer in it
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    config: Config,
    progress: ProgressMap,
    votes: BTreeMap<NodeId, bool>,
    max_inflight: usize,
}

impl ProgressTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config: Config::default(),
            progress: ProgressMap::new(),
            votes: BTreeMap::new(),
            max_inflight: config.max_inflight,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn progress_map(&self) -> &ProgressMap {
        &self.progress
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    pub fn progress(&self, id: &NodeId) -> Option<&Progress> {
        self.progress.get(id)
    }

    /// replication state may be updated freely; membership may not
    pub fn progress_mut(&mut self, id: &NodeId) -> Option<&mut Progress> {
        self.progress.get_mut(id)
    }

    /// the active configuration, lists sorted
    pub fn conf_state(&self) -> ConfState {
        ConfState {
            voters: self.config.voters.incoming.slice(),
            voters_outgoing: self.config.voters.outgoing.slice(),
            learners: self.config.learners.iter().cloned().collect(),
            learners_next: self.config.learners_next.iter().cloned().collect(),
            auto_leave: self.config.auto_leave,
        }
    }

    /// true if the only voter is (necessarily) the leader
    pub fn is_singleton(&self) -> bool {
        self.config.voters.incoming.len() == 1 && self.config.voters.outgoing.is_empty()
    }

    /// largest index acknowledged by a quorum of both voter halves
    pub fn committed(&self) -> Index {
        self.config.voters.committed_index(&MatchAckIndexer(&self.progress))
    }

    /// call `f` for every tracked peer in ascending id order
    pub fn visit<F>(&mut self, mut f: F)
    where
        F: FnMut(&NodeId, &mut Progress),
    {
        for (id, pr) in self.progress.iter_mut() {
            f(id, pr);
        }
    }

    /// tracked peers in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Progress)> {
        self.progress.iter()
    }

    /// true if the recently active voters form a quorum
    pub fn quorum_active(&self) -> bool {
        let votes: BTreeMap<NodeId, bool> = self
            .progress
            .iter()
            .filter(|(_, pr)| !pr.is_learner)
            .map(|(id, pr)| (id.clone(), pr.recent_active))
            .collect();

        self.config.voters.vote_result(&votes) == VoteResult::Won
    }

    /// sorted voters across both halves
    pub fn voter_nodes(&self) -> Vec<NodeId> {
        self.config.voters.ids().into_iter().collect()
    }

    pub fn learner_nodes(&self) -> Vec<NodeId> {
        self.config.learners.iter().cloned().collect()
    }

    /// start a fresh round of vote counting
    pub fn reset_votes(&mut self) {
        self.votes.clear();
    }

    /// record `id`'s vote; only the first vote per identity counts
    pub fn record_vote(&mut self, id: NodeId, granted: bool) {
        if self.votes.contains_key(&id) {
            debug!(%id, granted, "ignoring repeated vote");
            return;
        }
        debug!(%id, granted, "recorded vote");
        self.votes.insert(id, granted);
    }

    /// Granted and rejected counts plus the election outcome
    ///
    /// The counts cover tracked voters only. The outcome is computed over every
    /// recorded vote, since a departed voter can still matter mid-transition.
    pub fn tally_votes(&self) -> (usize, usize, VoteResult) {
        let mut granted = 0;
        let mut rejected = 0;
        for (id, pr) in &self.progress {
            if pr.is_learner {
                continue;
            }
            match self.votes.get(id) {
                Some(true) => granted += 1,
                Some(false) => rejected += 1,
                None => {}
            }
        }
        (granted, rejected, self.config.voters.vote_result(&self.votes))
    }

    /// Install a configuration produced by a [`Changer`]
    ///
    /// Refuses anything that breaks the tracker invariants, leaving the current
    /// state untouched.
    pub fn apply_conf(&mut self, config: Config, progress: ProgressMap) -> Result<(), ConfChangeError> {
        check_invariants(&config, &progress)?;
        info!(config = %config, joint = config.is_joint(), "applied configuration");
        self.config = config;
        self.progress = progress;
        Ok(())
    }

    /// enter a joint configuration applying `changes` to the incoming half
    pub fn enter_joint(
        &mut self,
        auto_leave: bool,
        changes: &[ConfChangeSingle],
        last_index: Index,
    ) -> Result<(), ConfChangeError> {
        let (config, progress) = Changer::new(self, last_index).enter_joint(auto_leave, changes)?;
        self.apply_conf(config, progress)
    }

    /// collapse the joint configuration onto its incoming half
    pub fn leave_joint(&mut self, last_index: Index) -> Result<(), ConfChangeError> {
        let (config, progress) = Changer::new(self, last_index).leave_joint()?;
        self.apply_conf(config, progress)
    }

    /// apply changes that alter at most one voter, without a joint step
    pub fn apply_simple(&mut self, changes: &[ConfChangeSingle], last_index: Index) -> Result<(), ConfChangeError> {
        let (config, progress) = Changer::new(self, last_index).simple(changes)?;
        self.apply_conf(config, progress)
    }

    /// Apply a committed [`ConfChangeV2`] and return the resulting state
    pub fn apply_conf_change(&mut self, cc: &ConfChangeV2, last_index: Index) -> Result<ConfState, ConfChangeError> {
        if cc.leave_joint() {
            self.leave_joint(last_index)?;
        } else if let Some(auto_leave) = cc.enter_joint() {
            self.enter_joint(auto_leave, &cc.changes, last_index)?;
        } else {
            self.apply_simple(&cc.changes, last_index)?;
        }
        Ok(self.conf_state())
    }

    /// Rebuild configuration and progress from a persisted [`ConfState`]
    ///
    /// Replays the state as a series of changes on a scratch tracker, so a
    /// failure leaves this tracker untouched. Recorded votes are cleared.
    pub fn restore(&mut self, cs: &ConfState, last_index: Index) -> Result<(), ConfChangeError> {
        let mut scratch = Self::new(TrackerConfig {
            max_inflight: self.max_inflight,
        });

        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        for id in &cs.voters_outgoing {
            outgoing.push(ConfChangeSingle::add_node(id.clone()));
            incoming.push(ConfChangeSingle::remove_node(id.clone()));
        }
        incoming.extend(cs.voters.iter().cloned().map(ConfChangeSingle::add_node));
        incoming.extend(cs.learners.iter().cloned().map(ConfChangeSingle::add_learner));
        incoming.extend(cs.learners_next.iter().cloned().map(ConfChangeSingle::add_learner));

        if outgoing.is_empty() {
            for cc in &incoming {
                scratch.apply_simple(std::slice::from_ref(cc), last_index)?;
            }
        } else {
            for cc in &outgoing {
                scratch.apply_simple(std::slice::from_ref(cc), last_index)?;
            }
            scratch.enter_joint(cs.auto_leave, &incoming, last_index)?;
        }

        self.config = scratch.config;
        self.progress = scratch.progress;
        self.votes.clear();
        Ok(())
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
