//! # signature
//!
//! why: detached ed25519 signatures that commit separately to proof metadata and body
//! relations: uses canonical.rs for hashing; implemented by did_document.rs and capability.rs
//! what: Proof envelope, Signable trait, sign/verify

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical::canonicalize_and_hash;
use crate::capability::ObjectCapability;
use crate::error::{LinkedDataError, Result};
use crate::ED25519_SIGNATURE_2018;

/// format of `created`/`updated` stamps, always rendered in utc
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%Z";

/// current utc time in [`TIMESTAMP_FORMAT`]
pub fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A detached signature envelope
///
/// `signature_value` covers the owning structure with `signature_value` and
/// `proof_type` cleared, so the proof never signs itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// capability being exercised, only present on invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Box<ObjectCapability>>,
    #[serde(default)]
    pub created: String,
    /// key id (`<did>#keys-N`) of the signer
    #[serde(default)]
    pub creator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proof_purpose: String,
    /// base64 ed25519 signature
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature_value: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub proof_type: String,
}

impl Proof {
    /// unsigned ed25519 proof naming `creator` as signer
    pub fn new(creator: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            proof_purpose: purpose.into(),
            proof_type: ED25519_SIGNATURE_2018.to_string(),
            ..Self::default()
        }
    }

    /// true once a signature has been written
    pub fn is_signed(&self) -> bool {
        !self.signature_value.is_empty()
    }
}

/// anything that carries a detachable proof
///
/// `Clone` must produce a deep copy: signing works on a clone so that
/// concurrent signers never race on the same proof fields.
pub trait Signable: Clone + Serialize {
    fn proof(&self) -> Option<&Proof>;

    fn proof_mut(&mut self) -> Option<&mut Proof>;

    fn set_proof(&mut self, proof: Option<Proof>);
}

/// sign `obj` in place with `key`
///
/// stamps `created` if the proof has none; leaves `proof_type` as the caller set it.
pub fn sign<T: Signable>(obj: &mut T, key: &SigningKey) -> Result<()> {
    let (created, payload) = verify_payload(obj)?;
    let signature = key.sign(&payload);

    let proof = obj.proof_mut().ok_or(LinkedDataError::MissingProof)?;
    proof.signature_value = STANDARD.encode(signature.to_bytes());
    proof.created = created;
    Ok(())
}

/// check the stored signature of `obj` against `key`
pub fn verify<T: Signable>(obj: &T, key: &VerifyingKey) -> bool {
    let Some(proof) = obj.proof() else {
        debug!("verify: no proof present");
        return false;
    };

    let signature = match STANDARD
        .decode(&proof.signature_value)
        .map_err(|e| e.to_string())
        .and_then(|bytes| Signature::from_slice(&bytes).map_err(|e| e.to_string()))
    {
        Ok(signature) => signature,
        Err(reason) => {
            debug!(creator = %proof.creator, %reason, "verify: undecodable signature");
            return false;
        }
    };

    let payload = match verify_payload(obj) {
        Ok((_, payload)) => payload,
        Err(e) => {
            debug!(error = %e, "verify: could not rebuild payload");
            return false;
        }
    };

    match key.verify(&payload, &signature) {
        Ok(()) => true,
        Err(_) => {
            debug!(creator = %proof.creator, "verify: signature mismatch");
            false
        }
    }
}

// returns the `created` stamp used and proofHash || bodyHash
fn verify_payload<T: Signable>(obj: &T) -> Result<(String, Vec<u8>)> {
    let mut body = obj.clone();
    let mut proof = body.proof().cloned().ok_or(LinkedDataError::MissingProof)?;
    proof.proof_type.clear();
    proof.signature_value.clear();
    if proof.created.is_empty() {
        proof.created = timestamp();
    }
    body.set_proof(None);

    let mut payload = canonicalize_and_hash(&proof)?;
    payload.extend(canonicalize_and_hash(&body)?);
    Ok((proof.created, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_signing_key;

    #[derive(Clone, Serialize)]
    struct Note {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        proof: Option<Proof>,
    }

    impl Signable for Note {
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

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
            proof: Some(Proof::new("did:dtang:test#keys-1", "")),
        }
    }

    #[test]
    fn sign_then_verify() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        sign(&mut n, &key).unwrap();

        let proof = n.proof.as_ref().unwrap();
        assert!(proof.is_signed());
        assert!(!proof.created.is_empty());
        assert_eq!(proof.proof_type, ED25519_SIGNATURE_2018);
        assert!(verify(&n, &key.verifying_key()));
    }

    #[test]
    fn verify_fails_after_body_mutation() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        sign(&mut n, &key).unwrap();
        n.text = "goodbye".to_string();
        assert!(!verify(&n, &key.verifying_key()));
    }

    #[test]
    fn verify_fails_after_proof_mutation() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        sign(&mut n, &key).unwrap();
        n.proof.as_mut().unwrap().creator = "did:dtang:other#keys-1".to_string();
        assert!(!verify(&n, &key.verifying_key()));
    }

    #[test]
    fn existing_created_is_kept() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        n.proof.as_mut().unwrap().created = "2020-01-01T00:00:00UTC".to_string();
        sign(&mut n, &key).unwrap();
        assert_eq!(n.proof.as_ref().unwrap().created, "2020-01-01T00:00:00UTC");
        assert!(verify(&n, &key.verifying_key()));
    }

    #[test]
    fn malformed_signature_is_a_failed_check() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        n.proof.as_mut().unwrap().signature_value = "not base64!!".to_string();
        assert!(!verify(&n, &key.verifying_key()));
    }

    #[test]
    fn sign_without_proof_errors() {
        let key = generate_signing_key().unwrap();
        let mut n = note("hello");
        n.proof = None;
        assert!(matches!(sign(&mut n, &key), Err(LinkedDataError::MissingProof)));
        assert!(!verify(&n, &key.verifying_key()));
    }

    #[test]
    fn timestamp_has_fixed_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), "2006-01-02T15:04:05UTC".len());
        assert!(ts.ends_with("UTC"));
    }
}
