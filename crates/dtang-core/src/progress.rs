//! # progress
//!
//! why: the leader needs to know how far each peer has replicated and how to talk to it
//! relations: owned per peer by tracker.rs; match indexes feed quorum.rs
//! what: ProgressState, Progress, Inflights

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quorum::Index;

/// how the leader is currently replicating to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProgressState {
    /// one append at a time until the peer's log position is found
    #[default]
    Probe,
    /// streaming appends, bounded by the inflight window
    Replicate,
    /// waiting for a snapshot to be applied
    Snapshot,
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Probe => "StateProbe",
            Self::Replicate => "StateReplicate",
            Self::Snapshot => "StateSnapshot",
        };
        f.write_str(s)
    }
}

/// Sliding window of append indexes sent but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inflights {
    buffer: VecDeque<Index>,
    capacity: usize,
}

impl Inflights {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity,
        }
    }

    /// record an append ending at `index`; false if the window is full
    ///
    /// indexes must be added in increasing order.
    pub fn add(&mut self, index: Index) -> bool {
        if self.full() {
            return false;
        }
        self.buffer.push_back(index);
        true
    }

    /// release every entry up to and including `to`
    pub fn free_le(&mut self, to: Index) {
        while self.buffer.front().is_some_and(|&idx| idx <= to) {
            self.buffer.pop_front();
        }
    }

    pub fn free_first_one(&mut self) {
        self.buffer.pop_front();
    }

    pub fn full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn count(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Replication progress of a single peer, as seen by the leader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// highest index known to be replicated on the peer
    pub match_index: Index,
    /// next index to send
    pub next_index: Index,
    pub state: ProgressState,
    /// snapshot index in flight while in `Snapshot`
    pub pending_snapshot: Index,
    /// set when the peer was heard from during the last election timeout
    pub recent_active: bool,
    /// in `Probe`, a probe is outstanding and further appends pause
    pub probe_sent: bool,
    pub inflights: Inflights,
    // only membership changes may flip this
    pub(crate) is_learner: bool,
}

impl Progress {
    /// fresh progress for a peer joining at `next_index`
    pub fn new(next_index: Index, max_inflight: usize, is_learner: bool) -> Self {
        Self {
            match_index: 0,
            next_index,
            state: ProgressState::Probe,
            pending_snapshot: 0,
            recent_active: true,
            probe_sent: false,
            inflights: Inflights::new(max_inflight),
            is_learner,
        }
    }

    /// learners replicate but never count toward quorum
    pub fn is_learner(&self) -> bool {
        self.is_learner
    }

    fn reset_state(&mut self, state: ProgressState) {
        self.probe_sent = false;
        self.pending_snapshot = 0;
        self.state = state;
        self.inflights.reset();
    }

    /// back to probing; after a snapshot, resume past the snapshot index
    pub fn become_probe(&mut self) {
        if self.state == ProgressState::Snapshot {
            let pending = self.pending_snapshot;
            self.reset_state(ProgressState::Probe);
            self.next_index = self.match_index.max(pending).saturating_add(1);
        } else {
            self.reset_state(ProgressState::Probe);
            self.next_index = self.match_index.saturating_add(1);
        }
    }

    pub fn become_replicate(&mut self) {
        self.reset_state(ProgressState::Replicate);
        self.next_index = self.match_index.saturating_add(1);
    }

    pub fn become_snapshot(&mut self, snapshot_index: Index) {
        self.reset_state(ProgressState::Snapshot);
        self.pending_snapshot = snapshot_index;
    }

    /// Handle an acknowledgement of `n`
    ///
    /// Returns false if the acknowledgement was stale.
    pub fn maybe_update(&mut self, n: Index) -> bool {
        let mut updated = false;
        if self.match_index < n {
            self.match_index = n;
            updated = true;
            self.probe_sent = false;
        }
        self.next_index = self.next_index.max(n.saturating_add(1));
        updated
    }

    /// assume an append up to `n` will succeed
    pub fn optimistic_update(&mut self, n: Index) {
        self.next_index = n.saturating_add(1);
    }

    /// Handle a rejected append at `rejected`
    ///
    /// `match_hint` is the peer's guess at its last index. Returns false if the
    /// rejection is stale and should be ignored.
    pub fn maybe_decr_to(&mut self, rejected: Index, match_hint: Index) -> bool {
        if self.state == ProgressState::Replicate {
            if rejected <= self.match_index {
                return false;
            }
            self.next_index = self.match_index.saturating_add(1);
            return true;
        }

        if self.next_index.saturating_sub(1) != rejected {
            return false;
        }

        self.next_index = rejected.min(match_hint.saturating_add(1)).max(1);
        self.probe_sent = false;
        true
    }

    /// true if no appends should be sent right now
    pub fn is_paused(&self) -> bool {
        match self.state {
            ProgressState::Probe => self.probe_sent,
            ProgressState::Replicate => self.inflights.full(),
            ProgressState::Snapshot => true,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} match={} next={}", self.state, self.match_index, self.next_index)?;
        if self.is_learner {
            f.write_str(" learner")?;
        }
        if self.is_paused() {
            f.write_str(" paused")?;
        }
        if self.pending_snapshot > 0 {
            write!(f, " pendingSnap={}", self.pending_snapshot)?;
        }
        if !self.recent_active {
            f.write_str(" inactive")?;
        }
        let n = self.inflights.count();
        if n > 0 {
            write!(f, " inflight={n}")?;
            if self.inflights.full() {
                f.write_str("[full]")?;
            }
        }
        Ok(())
    }
}
