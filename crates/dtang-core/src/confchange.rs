//! # confchange
//!
//! why: membership may only move through safe steps (simple or joint consensus)
//! relations: reads the current state from tracker.rs, installed via ProgressTracker::apply_conf
//! what: Changer (enter_joint, leave_joint, simple), check_invariants

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::ConfChangeError;
use crate::id::NodeId;
use crate::message::{ConfChangeSingle, ConfChangeType};
use crate::progress::Progress;
use crate::quorum::Index;
use crate::tracker::{Config, ProgressMap, ProgressTracker};

/// Computes the result of membership changes against a tracker
///
/// Every operation works on copies and returns a new `(Config, ProgressMap)`
/// pair; nothing is applied until the caller installs it.
pub struct Changer<'a> {
    tracker: &'a ProgressTracker,
    last_index: Index,
}

impl<'a> Changer<'a> {
    /// `last_index` seeds `next_index` for peers added by the change
    pub fn new(tracker: &'a ProgressTracker, last_index: Index) -> Self {
        Self { tracker, last_index }
    }

    /// Enter a joint configuration
    ///
    /// The current voters become the outgoing half and `changes` are applied to
    /// the incoming half. Demoted voters wait in `learners_next`.
    pub fn enter_joint(
        &self,
        auto_leave: bool,
        changes: &[ConfChangeSingle],
    ) -> Result<(Config, ProgressMap), ConfChangeError> {
        let (mut cfg, mut prs) = self.check_and_copy()?;
        if cfg.is_joint() {
            return Err(ConfChangeError::AlreadyJoint);
        }
        if cfg.voters.incoming.is_empty() {
            // a joint config with an empty outgoing half is indistinguishable
            // from a simple one
            return Err(ConfChangeError::ZeroVoterJoint);
        }

        cfg.voters.outgoing = cfg.voters.incoming.clone();
        self.apply(&mut cfg, &mut prs, changes)?;
        cfg.auto_leave = auto_leave;
        check_invariants(&cfg, &prs)?;
        Ok((cfg, prs))
    }

    /// Leave the joint configuration
    ///
    /// Pending demotions become learners and voters only present in the
    /// outgoing half are dropped.
    pub fn leave_joint(&self) -> Result<(Config, ProgressMap), ConfChangeError> {
        let (mut cfg, mut prs) = self.check_and_copy()?;
        if !cfg.is_joint() {
            return Err(ConfChangeError::NotJoint);
        }

        for id in std::mem::take(&mut cfg.learners_next) {
            if let Some(pr) = prs.get_mut(&id) {
                pr.is_learner = true;
            }
            cfg.learners.insert(id);
        }

        for id in cfg.voters.outgoing.iter() {
            if !cfg.voters.incoming.contains(id) && !cfg.learners.contains(id) {
                prs.remove(id);
            }
        }
        cfg.voters.outgoing.clear();
        cfg.auto_leave = false;

        check_invariants(&cfg, &prs)?;
        Ok((cfg, prs))
    }

    /// Apply changes that alter at most one voter
    ///
    /// Learners may be added or removed freely.
    pub fn simple(&self, changes: &[ConfChangeSingle]) -> Result<(Config, ProgressMap), ConfChangeError> {
        let (mut cfg, mut prs) = self.check_and_copy()?;
        if cfg.is_joint() {
            return Err(ConfChangeError::SimpleChangeInJoint);
        }
        self.apply(&mut cfg, &mut prs, changes)?;

        let before: BTreeSet<&NodeId> = self.tracker.config().voters.incoming.iter().collect();
        let after: BTreeSet<&NodeId> = cfg.voters.incoming.iter().collect();
        if before.symmetric_difference(&after).count() > 1 {
            return Err(ConfChangeError::TooManyVoterChanges);
        }

        check_invariants(&cfg, &prs)?;
        Ok((cfg, prs))
    }

    fn check_and_copy(&self) -> Result<(Config, ProgressMap), ConfChangeError> {
        let cfg = self.tracker.config().clone();
        let prs = self.tracker.progress_map().clone();
        check_invariants(&cfg, &prs)?;
        Ok((cfg, prs))
    }

    fn apply(&self, cfg: &mut Config, prs: &mut ProgressMap, changes: &[ConfChangeSingle]) -> Result<(), ConfChangeError> {
        for cc in changes {
            if cc.node_id.is_empty() {
                // etcd-style no-op entries carry an empty id
                continue;
            }
            match cc.change_type {
                ConfChangeType::AddNode => self.make_voter(cfg, prs, &cc.node_id),
                ConfChangeType::AddLearnerNode => self.make_learner(cfg, prs, &cc.node_id),
                ConfChangeType::RemoveNode => remove(cfg, prs, &cc.node_id),
                ConfChangeType::UpdateNode => {}
            }
            debug!(change = ?cc.change_type, id = %cc.node_id, "staged membership change");
        }
        if cfg.voters.incoming.is_empty() {
            return Err(ConfChangeError::RemovedAllVoters);
        }
        Ok(())
    }

    fn make_voter(&self, cfg: &mut Config, prs: &mut ProgressMap, id: &NodeId) {
        if !prs.contains_key(id) {
            self.init_progress(cfg, prs, id, false);
            return;
        }
        if let Some(pr) = prs.get_mut(id) {
            pr.is_learner = false;
        }
        cfg.learners.remove(id);
        cfg.learners_next.remove(id);
        cfg.voters.incoming.insert(id.clone());
    }

    // A voter still present in the outgoing half can't become a learner until
    // the joint config is left, so it is parked in learners_next.
    fn make_learner(&self, cfg: &mut Config, prs: &mut ProgressMap, id: &NodeId) {
        let pr = match prs.get(id) {
            None => {
                self.init_progress(cfg, prs, id, true);
                return;
            }
            Some(pr) if pr.is_learner => return,
            // keep the progress across the removal below
            Some(pr) => pr.clone(),
        };
        remove(cfg, prs, id);
        prs.insert(id.clone(), pr);

        if cfg.voters.outgoing.contains(id) {
            cfg.learners_next.insert(id.clone());
        } else if let Some(pr) = prs.get_mut(id) {
            pr.is_learner = true;
            cfg.learners.insert(id.clone());
        }
    }

    fn init_progress(&self, cfg: &mut Config, prs: &mut ProgressMap, id: &NodeId, is_learner: bool) {
        if is_learner {
            cfg.learners.insert(id.clone());
        } else {
            cfg.voters.incoming.insert(id.clone());
        }
        prs.insert(
            id.clone(),
            Progress::new(self.last_index, self.tracker.max_inflight(), is_learner),
        );
    }
}

// drop `id` from the incoming half and learner sets; its progress survives
// while the outgoing half still needs it
fn remove(cfg: &mut Config, prs: &mut ProgressMap, id: &NodeId) {
    if !prs.contains_key(id) {
        return;
    }
    cfg.voters.incoming.remove(id);
    cfg.learners.remove(id);
    cfg.learners_next.remove(id);

    if !cfg.voters.outgoing.contains(id) {
        prs.remove(id);
    }
}

/// Check the structural invariants tying a config to its progress map
///
/// Every member has progress, learners never vote in either half, pending
/// learners are outgoing voters, and a non-joint config carries no joint state.
pub fn check_invariants(cfg: &Config, prs: &ProgressMap) -> Result<(), ConfChangeError> {
    let members = cfg
        .voters
        .ids()
        .into_iter()
        .chain(cfg.learners.iter().cloned())
        .chain(cfg.learners_next.iter().cloned());
    for id in members {
        if !prs.contains_key(&id) {
            return Err(ConfChangeError::Invariant(format!("no progress for {id}")));
        }
    }

    for id in &cfg.learners_next {
        if !cfg.voters.outgoing.contains(id) {
            return Err(ConfChangeError::Invariant(format!("{id} is in learners_next, but not outgoing")));
        }
        if prs.get(id).is_some_and(|pr| pr.is_learner) {
            return Err(ConfChangeError::Invariant(format!(
                "{id} is in learners_next, but is already marked as learner"
            )));
        }
    }

    for id in &cfg.learners {
        if cfg.voters.contains(id) {
            return Err(ConfChangeError::Invariant(format!("{id} is both learner and voter")));
        }
        if prs.get(id).is_some_and(|pr| !pr.is_learner) {
            return Err(ConfChangeError::Invariant(format!("{id} is a learner, but its progress is not")));
        }
    }

    if !cfg.is_joint() {
        if !cfg.learners_next.is_empty() {
            return Err(ConfChangeError::Invariant("learners_next must be empty when not joint".into()));
        }
        if cfg.auto_leave {
            return Err(ConfChangeError::Invariant("auto_leave must be false when not joint".into()));
        }
    }

    Ok(())
}
