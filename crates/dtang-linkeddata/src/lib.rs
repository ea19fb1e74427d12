//! # dtang-linkeddata
//!
//! why: establish trust between cluster identities and authorize membership changes
//! relations: consumed by dtang-core's membership gate, persisted by dtang-storage
//! what: canonical double-hash ed25519 signatures, did documents, object capabilities

pub mod canonical;
pub mod capability;
pub mod did_document;
pub mod error;
pub mod keys;
pub mod signature;

pub use capability::{verify_chain, verify_invocation, ObjectCapability, ObjectCapabilityInvocation};
pub use did_document::{DidDocument, PublicKey, Service};
pub use ed25519_dalek::{SigningKey, VerifyingKey};
pub use error::LinkedDataError;
pub use keys::{DocumentRegistry, KeyResolver};
pub use signature::{sign, verify, Proof, Signable};

/// json-ld context stamped on every did document
pub const DID_CONTEXT: &str = "https://www.w3.org/2019/did/v1";

/// method prefix for self-generated identifiers
pub const DID_METHOD_PREFIX: &str = "did:dtang:";

/// verification key type for ed25519 public keys
pub const ED25519_VERIFICATION_KEY_2018: &str = "Ed25519VerificationKey2018";

/// proof type for ed25519 linked-data signatures
pub const ED25519_SIGNATURE_2018: &str = "Ed25519Signature2018";

/// proof purpose of a capability grant
pub const CAPABILITY_DELEGATION: &str = "capabilityDelegation";

/// proof purpose of a capability exercise
pub const CAPABILITY_INVOCATION: &str = "capabilityInvocation";

/// service type advertising a cluster member's endpoint
pub const CLUSTER_NODE_SERVICE: &str = "DtangClusterNode";
