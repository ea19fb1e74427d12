//! # capability
//!
//! why: membership authority is delegated and exercised as signed capabilities
//! relations: signed via signature.rs, keys looked up through keys.rs, checked by dtang-core's gate
//! what: ObjectCapability, ObjectCapabilityInvocation, single-link verification

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::keys::{controller_of, random_uuid, KeyResolver};
use crate::signature::{sign, verify, Proof, Signable};
use crate::{CAPABILITY_DELEGATION, CAPABILITY_INVOCATION};

/// A delegated grant of authority
///
/// `parent_capability` is either the id of the root identity that issued it
/// or the id of the capability it was delegated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCapability {
    pub id: Uuid,
    pub parent_capability: String,
    /// key id allowed to invoke this capability
    pub invoker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl ObjectCapability {
    /// mint a capability for `invoker`, signed by the parent's key
    pub fn delegate(
        parent_capability: impl Into<String>,
        parent_key_id: impl Into<String>,
        invoker: impl Into<String>,
        parent_key: &SigningKey,
    ) -> Result<Self> {
        let mut cap = Self {
            id: random_uuid()?,
            parent_capability: parent_capability.into(),
            invoker: invoker.into(),
            proof: Some(Proof::new(parent_key_id, CAPABILITY_DELEGATION)),
        };
        sign(&mut cap, parent_key)?;
        debug!(id = %cap.id, parent = %cap.parent_capability, invoker = %cap.invoker, "delegated capability");
        Ok(cap)
    }

    /// exercise this capability for `action`, signed by the invoker's key
    pub fn invoke(&self, action: impl Into<String>, invoker_key: &SigningKey) -> Result<ObjectCapabilityInvocation> {
        let mut invocation = ObjectCapabilityInvocation {
            id: random_uuid()?,
            action: action.into(),
            proof: Some(Proof {
                capability: Some(Box::new(self.clone())),
                ..Proof::new(self.invoker.clone(), CAPABILITY_INVOCATION)
            }),
        };
        sign(&mut invocation, invoker_key)?;
        Ok(invocation)
    }
}

impl Signable for ObjectCapability {
    fn proof(&self) -> Option<&Proof> {
        self.proof.as_ref()
    }

    fn proof_mut(&mut self) -> Option<&mut Proof> {
        self.proof.as_mut()
    }

    fn set_proof(&mut self, proof: Option<Proof>) {
        self.proof = proof;
    }
}

/// A single exercise of a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCapabilityInvocation {
    pub id: Uuid,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl ObjectCapabilityInvocation {
    /// the capability embedded in the proof
    pub fn capability(&self) -> Option<&ObjectCapability> {
        self.proof.as_ref()?.capability.as_deref()
    }
}

impl Signable for ObjectCapabilityInvocation {
    fn proof(&self) -> Option<&Proof> {
        self.proof.as_ref()
    }

    fn proof_mut(&mut self) -> Option<&mut Proof> {
        self.proof.as_mut()
    }

    fn set_proof(&mut self, proof: Option<Proof>) {
        self.proof = proof;
    }
}

/// check one delegation link
///
/// With no `parent`, `cap.parent_capability` names the issuing root identity.
/// Otherwise `parent` must be the capability named there and the issuer is
/// whoever controls `parent.invoker`.
pub fn verify_capability<R: KeyResolver + ?Sized>(
    cap: &ObjectCapability,
    resolver: &R,
    parent: Option<&ObjectCapability>,
) -> bool {
    let Some(proof) = &cap.proof else {
        debug!(id = %cap.id, "capability has no proof");
        return false;
    };
    if proof.proof_purpose != CAPABILITY_DELEGATION {
        debug!(id = %cap.id, purpose = %proof.proof_purpose, "capability proof has wrong purpose");
        return false;
    }

    let issuer = match parent {
        None => cap.parent_capability.as_str(),
        Some(p) if p.id.to_string() == cap.parent_capability => controller_of(&p.invoker),
        Some(p) => {
            debug!(id = %cap.id, parent = %p.id, "capability does not name the given parent");
            return false;
        }
    };

    let Some(resolved) = resolver.resolve_key(&proof.creator) else {
        debug!(id = %cap.id, creator = %proof.creator, "capability creator key unknown");
        return false;
    };
    if resolved.controller != issuer {
        warn!(id = %cap.id, creator = %proof.creator, %issuer, "capability signed by a key the issuer does not control");
        return false;
    }
    verify(cap, &resolved.key)
}

/// Walk a delegation chain up to its root
///
/// `ancestors` lists the parents of `cap`, nearest first; the last one must be
/// issued directly by a root identity. Returns that root's id when every link
/// verifies.
pub fn verify_chain<'a, R: KeyResolver + ?Sized>(
    cap: &'a ObjectCapability,
    ancestors: &'a [ObjectCapability],
    resolver: &R,
) -> Option<&'a str> {
    let mut link = cap;
    for parent in ancestors {
        if !verify_capability(link, resolver, Some(parent)) {
            return None;
        }
        link = parent;
    }
    verify_capability(link, resolver, None).then_some(link.parent_capability.as_str())
}

/// check an invocation and the single link of the capability it embeds
///
/// `parent` is the capability the embedded one was delegated from, or `None`
/// when it was issued directly by a root identity.
pub fn verify_invocation<R: KeyResolver + ?Sized>(
    invocation: &ObjectCapabilityInvocation,
    resolver: &R,
    parent: Option<&ObjectCapability>,
) -> bool {
    let Some(proof) = &invocation.proof else {
        debug!(id = %invocation.id, "invocation has no proof");
        return false;
    };
    if proof.proof_purpose != CAPABILITY_INVOCATION {
        debug!(id = %invocation.id, purpose = %proof.proof_purpose, "invocation proof has wrong purpose");
        return false;
    }
    let Some(cap) = proof.capability.as_deref() else {
        debug!(id = %invocation.id, "invocation embeds no capability");
        return false;
    };
    if proof.creator != cap.invoker {
        warn!(id = %invocation.id, creator = %proof.creator, invoker = %cap.invoker, "invocation not signed by the capability's invoker");
        return false;
    }

    let Some(invoker) = resolver.resolve_key(&proof.creator) else {
        debug!(id = %invocation.id, creator = %proof.creator, "invoker key unknown");
        return false;
    };
    if !verify(invocation, &invoker.key) {
        return false;
    }
    verify_capability(cap, resolver, parent)
}
