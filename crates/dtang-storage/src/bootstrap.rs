//! # bootstrap
//!
//! why: a node needs a stable identity, and the first node of a cluster mints its root authority
//! relations: generates dtang-linkeddata structures, persists them through an IdentityStore
//! what: NodeIdentity, ClusterGenesis, bootstrap_cluster

use dtang_linkeddata::{sign, DidDocument, ObjectCapability, Service, SigningKey, CLUSTER_NODE_SERVICE};
use tracing::info;

use crate::error::{Result, StorageError};
use crate::IdentityStore;

/// record name of the cluster's root identity
pub const CLUSTER_RECORD: &str = "cluster";

/// A node's identity document together with its private key
pub struct NodeIdentity {
    pub document: DidDocument,
    pub key: SigningKey,
}

impl NodeIdentity {
    /// Load the identity stored under `id`, or generate and store a new one
    ///
    /// A stored key that does not match the document's own key is reported as
    /// corrupt rather than replaced.
    pub fn load_or_generate<S: IdentityStore + ?Sized>(store: &mut S, id: &str) -> Result<Self> {
        if store.exists(id)? {
            let document = store
                .load_document(id)?
                .ok_or_else(|| StorageError::Corrupt(id.to_string(), "document vanished".into()))?;
            let key = store
                .load_private_key(id)?
                .ok_or_else(|| StorageError::Corrupt(id.to_string(), "key vanished".into()))?;
            let identity = Self { document, key };
            identity.check()?;
            info!(%id, "loaded node identity");
            return Ok(identity);
        }

        let (document, key) = DidDocument::generate(id)?;
        store.save_document(id, &document)?;
        store.save_private_key(id, &key)?;
        info!(%id, "generated node identity");
        Ok(Self { document, key })
    }

    /// key id this node signs with (`<id>#keys-1`)
    pub fn key_id(&self) -> String {
        self.document
            .primary_key_id()
            .map_or_else(|| format!("{}#keys-1", self.document.id), str::to_string)
    }

    fn check(&self) -> Result<()> {
        let corrupt = |reason: &str| StorageError::Corrupt(self.document.id.clone(), reason.to_string());
        if !self.document.verify_self() {
            return Err(corrupt("document is not validly self-signed"));
        }
        let own = self
            .document
            .public_key
            .first()
            .map(|pk| pk.public_key_base58.clone())
            .unwrap_or_default();
        if own != dtang_linkeddata::keys::encode_public_key(&self.key.verifying_key()) {
            return Err(corrupt("private key does not match document"));
        }
        Ok(())
    }
}

/// Root authority minted by the first node of a cluster
pub struct ClusterGenesis {
    /// the cluster's own identity, advertising the genesis node as a service
    pub document: DidDocument,
    pub key: SigningKey,
    /// membership authority delegated from the cluster to the genesis node
    pub capability: ObjectCapability,
}

impl ClusterGenesis {
    /// identity that roots every membership capability
    pub fn root_id(&self) -> &str {
        &self.document.id
    }
}

/// Create the cluster identity and its root membership capability
///
/// The cluster document is stored under [`CLUSTER_RECORD`] and the capability
/// under `node_id`. Fails if a cluster identity already exists.
pub fn bootstrap_cluster<S: IdentityStore + ?Sized>(
    store: &mut S,
    node_id: &str,
    address: &str,
) -> Result<ClusterGenesis> {
    if store.exists(CLUSTER_RECORD)? {
        return Err(StorageError::AlreadyExists(CLUSTER_RECORD.to_string()));
    }

    let (mut document, key) = DidDocument::new_random()?;
    document.add_service(Service {
        id: node_id.to_string(),
        service_type: CLUSTER_NODE_SERVICE.to_string(),
        service_endpoint: address.to_string(),
    });
    sign(&mut document, &key)?;

    let creator = document
        .primary_key_id()
        .ok_or_else(|| StorageError::Corrupt(document.id.clone(), "generated without a key".into()))?
        .to_string();
    let capability = ObjectCapability::delegate(document.id.clone(), creator, format!("{node_id}#keys-1"), &key)?;

    store.save_document(CLUSTER_RECORD, &document)?;
    store.save_private_key(CLUSTER_RECORD, &key)?;
    store.save_capability(node_id, &capability)?;

    info!(cluster = %document.id, %node_id, %address, "bootstrapped cluster");
    Ok(ClusterGenesis {
        document,
        key,
        capability,
    })
}
