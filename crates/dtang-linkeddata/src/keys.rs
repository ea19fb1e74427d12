//! # keys
//!
//! why: key material has to be minted, encoded for documents and looked up by id
//! relations: used by did_document.rs for generation, capability.rs for verification
//! what: key generation, base58 codecs, KeyResolver, DocumentRegistry

use std::collections::BTreeMap;

use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::did_document::DidDocument;
use crate::error::{LinkedDataError, Result};

/// fresh ed25519 key from the os rng
///
/// fails instead of falling back when the os rng is unavailable.
pub fn generate_signing_key() -> Result<SigningKey> {
    let mut seed = [0u8; SECRET_KEY_LENGTH];
    OsRng.try_fill_bytes(&mut seed)?;
    Ok(SigningKey::from_bytes(&seed))
}

/// fresh v4 uuid from the os rng
pub fn random_uuid() -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    bs58::encode(key.as_bytes()).into_string()
}

pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| LinkedDataError::InvalidKey(e.to_string()))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| LinkedDataError::InvalidKey(format!("public key is {} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| LinkedDataError::InvalidKey(e.to_string()))
}

/// base58 of the raw 64-byte keypair (seed followed by public key)
pub fn encode_private_key(key: &SigningKey) -> String {
    bs58::encode(key.to_keypair_bytes()).into_string()
}

/// accepts the 64-byte keypair form or a bare 32-byte seed
pub fn decode_private_key(encoded: &str) -> Result<SigningKey> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| LinkedDataError::InvalidKey(e.to_string()))?;
    match bytes.len() {
        64 => {
            let mut keypair = [0u8; 64];
            keypair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&keypair)
                .map_err(|e| LinkedDataError::InvalidKey(e.to_string()))
        }
        SECRET_KEY_LENGTH => {
            let mut seed = [0u8; SECRET_KEY_LENGTH];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        n => Err(LinkedDataError::InvalidKey(format!("private key is {n} bytes"))),
    }
}

/// a public key together with the identity that controls it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub id: String,
    pub controller: String,
    pub key: VerifyingKey,
}

/// maps key ids (`<did>#keys-N`) to verifying keys
pub trait KeyResolver {
    fn resolve_key(&self, key_id: &str) -> Option<ResolvedKey>;
}

impl KeyResolver for DidDocument {
    fn resolve_key(&self, key_id: &str) -> Option<ResolvedKey> {
        let entry = self.public_key.iter().find(|pk| pk.id == key_id)?;
        if !self.owns_key(entry) {
            debug!(key_id, id = %self.id, controller = %entry.controller, "resolve: key claims a foreign controller");
            return None;
        }
        match decode_public_key(&entry.public_key_base58) {
            Ok(key) => Some(ResolvedKey {
                id: entry.id.clone(),
                controller: self.id.clone(),
                key,
            }),
            Err(e) => {
                debug!(key_id, error = %e, "resolve: undecodable public key");
                None
            }
        }
    }
}

/// the did portion of a key id
pub fn controller_of(key_id: &str) -> &str {
    key_id.split_once('#').map_or(key_id, |(did, _)| did)
}

/// In-memory set of self-asserted identity documents
///
/// Only documents whose proof verifies against one of their own keys, and
/// whose keys are all controlled by the document itself, are admitted.
#[derive(Debug, Clone, Default)]
pub struct DocumentRegistry {
    documents: BTreeMap<String, DidDocument>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// admit `doc` if it is validly self-signed; replaces any previous version
    pub fn insert(&mut self, doc: DidDocument) -> bool {
        if !doc.verify_self() {
            warn!(id = %doc.id, "registry: rejected document that is not validly self-asserted");
            return false;
        }
        debug!(id = %doc.id, "registry: admitted document");
        self.documents.insert(doc.id.clone(), doc);
        true
    }

    pub fn get(&self, id: &str) -> Option<&DidDocument> {
        self.documents.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<DidDocument> {
        self.documents.remove(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl KeyResolver for DocumentRegistry {
    fn resolve_key(&self, key_id: &str) -> Option<ResolvedKey> {
        self.documents.get(controller_of(key_id))?.resolve_key(key_id)
    }
}
