//! # error
//!
//! why: configuration changes and authorization fail in well-defined ways
//! relations: returned by confchange.rs, tracker.rs, membership.rs
//! what: ConfChangeError, MembershipError

use thiserror::Error;

/// a configuration change that was refused before anything was applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfChangeError {
    #[error("config is already joint")]
    AlreadyJoint,

    #[error("can't leave a non-joint config")]
    NotJoint,

    #[error("can't make a zero-voter config joint")]
    ZeroVoterJoint,

    #[error("can't apply simple config change in joint config")]
    SimpleChangeInJoint,

    #[error("removed all voters")]
    RemovedAllVoters,

    #[error("more than one voter changed without entering joint config")]
    TooManyVoterChanges,

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// a membership request the gate refused to forward to the tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("invocation action {found:?} does not authorize {expected:?}")]
    WrongAction { expected: String, found: String },

    #[error("capability is not rooted at the trusted identity {0}")]
    UntrustedRoot(String),

    #[error("capability invocation failed verification")]
    Unauthorized,

    #[error("configuration change refused: {0}")]
    ConfChange(#[from] ConfChangeError),
}
