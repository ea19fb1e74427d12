//! # did_document
//!
//! why: every node and every cluster is named by a self-asserted identity document
//! relations: signed via signature.rs, resolved through keys.rs, persisted by dtang-storage
//! what: DidDocument, PublicKey, Service, generation and self-verification

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::keys::{controller_of, encode_public_key, generate_signing_key, random_uuid, KeyResolver};
use crate::signature::{sign, timestamp, verify, Proof, Signable};
use crate::{DID_CONTEXT, DID_METHOD_PREFIX, ED25519_VERIFICATION_KEY_2018};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    pub public_key_base58: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// A self-asserted identity document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_key: Vec<PublicKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
    #[serde(default)]
    pub created: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// `did:dtang:<base58 uuid>`
pub fn new_did() -> Result<String> {
    let id = random_uuid()?;
    Ok(format!("{DID_METHOD_PREFIX}{}", bs58::encode(id.as_bytes()).into_string()))
}

impl DidDocument {
    /// generate a document under a fresh random did
    pub fn new_random() -> Result<(Self, SigningKey)> {
        Self::generate(new_did()?)
    }

    /// generate a keypair and a document for `id`, self-signed with the new key
    pub fn generate(id: impl Into<String>) -> Result<(Self, SigningKey)> {
        let id = id.into();
        let key = generate_signing_key()?;

        let public_key = PublicKey {
            id: format!("{id}#keys-1"),
            key_type: ED25519_VERIFICATION_KEY_2018.to_string(),
            controller: id.clone(),
            public_key_base58: encode_public_key(&key.verifying_key()),
        };

        let now = timestamp();
        let mut doc = Self {
            context: DID_CONTEXT.to_string(),
            id,
            authentication: vec![public_key.id.clone()],
            proof: Some(Proof {
                created: now.clone(),
                ..Proof::new(public_key.id.clone(), "")
            }),
            public_key: vec![public_key],
            service: Vec::new(),
            created: now,
            updated: String::new(),
        };
        sign(&mut doc, &key)?;

        debug!(id = %doc.id, "generated did document");
        Ok((doc, key))
    }

    /// id of the first key, the one used for self-assertion
    pub fn primary_key_id(&self) -> Option<&str> {
        self.public_key.first().map(|pk| pk.id.as_str())
    }

    /// append a service endpoint and stamp `updated`; the caller re-signs
    pub fn add_service(&mut self, service: Service) {
        self.service.push(service);
        self.updated = timestamp();
    }

    /// true if `key` is listed under this document's did and names it as controller
    pub fn owns_key(&self, key: &PublicKey) -> bool {
        key.controller == self.id && controller_of(&key.id) == self.id
    }

    /// true if every key is the document's own and the proof verifies
    /// against the key it names
    pub fn verify_self(&self) -> bool {
        let Some(proof) = &self.proof else {
            return false;
        };
        if let Some(foreign) = self.public_key.iter().find(|pk| !self.owns_key(pk)) {
            debug!(id = %self.id, key = %foreign.id, controller = %foreign.controller, "document lists a key it does not control");
            return false;
        }
        match self.resolve_key(&proof.creator) {
            Some(resolved) if resolved.controller == self.id => verify(self, &resolved.key),
            _ => {
                debug!(id = %self.id, creator = %proof.creator, "self-assertion names a foreign key");
                false
            }
        }
    }
}

impl Signable for DidDocument {
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
