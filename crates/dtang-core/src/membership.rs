//! # membership
//!
//! why: configuration changes only reach the tracker when backed by a delegated capability
//! relations: verifies via dtang-linkeddata, applies through tracker.rs
//! what: MembershipPolicy, authorize, authorize_delegated, apply_authorized

use dtang_linkeddata::{verify_chain, verify_invocation, KeyResolver, ObjectCapability, ObjectCapabilityInvocation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MembershipError;
use crate::message::{ConfChangeV2, ConfState};
use crate::quorum::Index;
use crate::tracker::ProgressTracker;

/// action label that authorizes configuration changes
pub const CONF_CHANGE_ACTION: &str = "raft/confChange";

/// Who may authorize membership changes
///
/// Built once at startup and handed to the driver; an empty `trusted_root`
/// authorizes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipPolicy {
    /// id of the root identity that delegates membership authority
    pub trusted_root: String,
    pub action: String,
}

impl Default for MembershipPolicy {
    fn default() -> Self {
        Self {
            trusted_root: String::new(),
            action: CONF_CHANGE_ACTION.to_string(),
        }
    }
}

impl MembershipPolicy {
    pub fn new(trusted_root: impl Into<String>) -> Self {
        Self {
            trusted_root: trusted_root.into(),
            ..Self::default()
        }
    }

    /// Check that `invocation` exercises a capability delegated by the trusted
    /// root for this policy's action
    pub fn authorize<R: KeyResolver + ?Sized>(
        &self,
        invocation: &ObjectCapabilityInvocation,
        resolver: &R,
    ) -> Result<(), MembershipError> {
        self.authorize_delegated(invocation, &[], resolver)
    }

    /// Like [`authorize`](Self::authorize), for a capability delegated further
    /// down from the root
    ///
    /// `ancestors` lists the parents of the invoked capability, nearest first,
    /// ending with the one the trusted root issued.
    pub fn authorize_delegated<R: KeyResolver + ?Sized>(
        &self,
        invocation: &ObjectCapabilityInvocation,
        ancestors: &[ObjectCapability],
        resolver: &R,
    ) -> Result<(), MembershipError> {
        if invocation.action != self.action {
            return Err(MembershipError::WrongAction {
                expected: self.action.clone(),
                found: invocation.action.clone(),
            });
        }

        let claimed = ancestors
            .last()
            .or(invocation.capability())
            .map(|cap| cap.parent_capability.as_str());
        if self.trusted_root.is_empty() || claimed != Some(self.trusted_root.as_str()) {
            warn!(invocation = %invocation.id, root = ?claimed, "membership change from untrusted root");
            return Err(MembershipError::UntrustedRoot(self.trusted_root.clone()));
        }

        let root = invocation
            .capability()
            .and_then(|cap| verify_chain(cap, ancestors, resolver));
        if root.is_none() || !verify_invocation(invocation, resolver, ancestors.first()) {
            warn!(invocation = %invocation.id, depth = ancestors.len(), "membership change with invalid invocation");
            return Err(MembershipError::Unauthorized);
        }
        Ok(())
    }
}

/// Authorize `cc` and apply it to `tracker`
///
/// Nothing reaches the tracker unless the invocation verifies.
pub fn apply_authorized<R: KeyResolver + ?Sized>(
    tracker: &mut ProgressTracker,
    policy: &MembershipPolicy,
    invocation: &ObjectCapabilityInvocation,
    resolver: &R,
    cc: &ConfChangeV2,
    last_index: Index,
) -> Result<ConfState, MembershipError> {
    policy.authorize(invocation, resolver)?;
    let cs = tracker.apply_conf_change(cc, last_index)?;
    info!(invocation = %invocation.id, voters = cs.voters.len(), learners = cs.learners.len(), "authorized membership change applied");
    Ok(cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ConfChangeSingle, ConfChangeTransition};
    use dtang_linkeddata::{DidDocument, DocumentRegistry, ObjectCapability, SigningKey};

    struct Cluster {
        registry: DocumentRegistry,
        policy: MembershipPolicy,
        cap: ObjectCapability,
        node_key: SigningKey,
    }

    fn cluster() -> Cluster {
        let (root, root_key) = DidDocument::new_random().unwrap();
        let (node, node_key) = DidDocument::generate("node-a").unwrap();
        let cap = ObjectCapability::delegate(
            root.id.clone(),
            root.primary_key_id().unwrap(),
            node.primary_key_id().unwrap(),
            &root_key,
        )
        .unwrap();
        let mut registry = DocumentRegistry::new();
        registry.insert(root.clone());
        registry.insert(node);
        Cluster {
            registry,
            policy: MembershipPolicy::new(root.id),
            cap,
            node_key,
        }
    }

    fn add(id: &str) -> ConfChangeV2 {
        ConfChangeV2::new(ConfChangeTransition::Auto, vec![ConfChangeSingle::add_node(id)])
    }

    #[test]
    fn authorized_change_is_applied() {
        let c = cluster();
        let inv = c.cap.invoke(CONF_CHANGE_ACTION, &c.node_key).unwrap();
        let mut tracker = ProgressTracker::default();
        let cs = apply_authorized(&mut tracker, &c.policy, &inv, &c.registry, &add("node-a"), 1).unwrap();
        assert_eq!(cs.voters.len(), 1);
    }

    #[test]
    fn wrong_action_is_refused() {
        let c = cluster();
        let inv = c.cap.invoke("kv/put", &c.node_key).unwrap();
        let mut tracker = ProgressTracker::default();
        let err = apply_authorized(&mut tracker, &c.policy, &inv, &c.registry, &add("node-a"), 1).unwrap_err();
        assert!(matches!(err, MembershipError::WrongAction { .. }));
        assert!(tracker.voter_nodes().is_empty());
    }

    #[test]
    fn untrusted_root_is_refused() {
        let c = cluster();
        let inv = c.cap.invoke(CONF_CHANGE_ACTION, &c.node_key).unwrap();
        let policy = MembershipPolicy::new("did:dtang:someone-else");
        assert!(matches!(
            policy.authorize(&inv, &c.registry),
            Err(MembershipError::UntrustedRoot(_))
        ));
        assert!(matches!(
            MembershipPolicy::default().authorize(&inv, &c.registry),
            Err(MembershipError::UntrustedRoot(_))
        ));
    }

    #[test]
    fn forged_invocation_is_refused() {
        let c = cluster();
        let mut inv = c.cap.invoke(CONF_CHANGE_ACTION, &c.node_key).unwrap();
        inv.id = dtang_linkeddata::keys::random_uuid().unwrap();
        let mut tracker = ProgressTracker::default();
        let err = apply_authorized(&mut tracker, &c.policy, &inv, &c.registry, &add("node-a"), 1).unwrap_err();
        assert_eq!(err, MembershipError::Unauthorized);
        assert!(tracker.voter_nodes().is_empty());
    }

    #[test]
    fn delegated_capability_passes_with_its_ancestors() {
        let c = cluster();
        let (peer, peer_key) = DidDocument::generate("node-b").unwrap();
        let child = ObjectCapability::delegate(
            c.cap.id.to_string(),
            "node-a#keys-1",
            peer.primary_key_id().unwrap(),
            &c.node_key,
        )
        .unwrap();
        let mut registry = c.registry.clone();
        assert!(registry.insert(peer));

        let inv = child.invoke(CONF_CHANGE_ACTION, &peer_key).unwrap();
        let ancestors = [c.cap.clone()];
        assert_eq!(c.policy.authorize_delegated(&inv, &ancestors, &registry), Ok(()));
        // without the chain the child does not name the trusted root
        assert!(matches!(
            c.policy.authorize(&inv, &registry),
            Err(MembershipError::UntrustedRoot(_))
        ));
    }

    #[test]
    fn invalid_conf_change_surfaces_as_rejection() {
        let c = cluster();
        let inv = c.cap.invoke(CONF_CHANGE_ACTION, &c.node_key).unwrap();
        let mut tracker = ProgressTracker::default();
        let err = apply_authorized(&mut tracker, &c.policy, &inv, &c.registry, &ConfChangeV2::leave(), 1).unwrap_err();
        assert_eq!(err, MembershipError::ConfChange(crate::error::ConfChangeError::NotJoint));
    }
}
