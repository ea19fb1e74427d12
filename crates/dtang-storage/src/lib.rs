//! # dtang-storage
//!
//! why: node identities, keys and capabilities must survive restarts
//! relations: stores dtang-linkeddata structures; bootstrap.rs builds on it
//! what: IdentityStore trait, FileStore implementation, InMemoryStore for testing

pub mod bootstrap;
pub mod error;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use dtang_linkeddata::keys::{decode_private_key, encode_private_key};
use dtang_linkeddata::{DidDocument, ObjectCapability, SigningKey};
use tracing::debug;

pub use bootstrap::{bootstrap_cluster, ClusterGenesis, NodeIdentity, CLUSTER_RECORD};
pub use error::{Result, StorageError};

/// trait for durable storage of identity material
///
/// this abstraction allows the same bootstrap code to work with:
/// - real filesystem (native)
/// - in-memory (testing)
pub trait IdentityStore {
    /// persist a did document under `name`
    fn save_document(&mut self, name: &str, doc: &DidDocument) -> Result<()>;

    fn load_document(&self, name: &str) -> Result<Option<DidDocument>>;

    /// persist a private key under `name`, base58 encoded
    fn save_private_key(&mut self, name: &str, key: &SigningKey) -> Result<()>;

    fn load_private_key(&self, name: &str) -> Result<Option<SigningKey>>;

    /// persist a capability under `name`
    fn save_capability(&mut self, name: &str, cap: &ObjectCapability) -> Result<()>;

    fn load_capability(&self, name: &str) -> Result<Option<ObjectCapability>>;

    /// true if both the document and the key for `name` are stored
    fn exists(&self, name: &str) -> Result<bool>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> Result<()>;
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores each record in the directory as:
/// - <name>.json: did document
/// - <name>.key: base58 private key
/// - <name>.ocap: object capability
pub struct FileStore {
    /// directory path for storing record files
    dir: PathBuf,
}

impl FileStore {
    /// create a new filestore at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str, ext: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.dir.join(format!("{name}.{ext}")))
    }

    // atomic write: write to temp file then rename
    fn write_atomic(&self, path: PathBuf, contents: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        debug!(path = %path.display(), "wrote identity record");
        Ok(())
    }

    fn read(&self, path: PathBuf) -> Result<Option<String>> {
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityStore for FileStore {
    fn save_document(&mut self, name: &str, doc: &DidDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        self.write_atomic(self.path(name, "json")?, json.as_bytes())
    }

    fn load_document(&self, name: &str) -> Result<Option<DidDocument>> {
        match self.read(self.path(name, "json")?)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_private_key(&mut self, name: &str, key: &SigningKey) -> Result<()> {
        self.write_atomic(self.path(name, "key")?, encode_private_key(key).as_bytes())
    }

    fn load_private_key(&self, name: &str) -> Result<Option<SigningKey>> {
        match self.read(self.path(name, "key")?)? {
            Some(encoded) => Ok(Some(decode_private_key(&encoded)?)),
            None => Ok(None),
        }
    }

    fn save_capability(&mut self, name: &str, cap: &ObjectCapability) -> Result<()> {
        let json = serde_json::to_string_pretty(cap)?;
        self.write_atomic(self.path(name, "ocap")?, json.as_bytes())
    }

    fn load_capability(&self, name: &str) -> Result<Option<ObjectCapability>> {
        match self.read(self.path(name, "ocap")?)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name, "json")?.exists() && self.path(name, "key")?.exists())
    }

    fn clear(&mut self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ours = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "json" | "key" | "ocap" | "tmp"));
            if ours {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all records in memory, no persistence across restarts
#[derive(Default)]
pub struct InMemoryStore {
    documents: BTreeMap<String, DidDocument>,
    keys: BTreeMap<String, String>,
    capabilities: BTreeMap<String, ObjectCapability>,
}

impl InMemoryStore {
    /// create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for InMemoryStore {
    fn save_document(&mut self, name: &str, doc: &DidDocument) -> Result<()> {
        check_name(name)?;
        self.documents.insert(name.to_string(), doc.clone());
        Ok(())
    }

    fn load_document(&self, name: &str) -> Result<Option<DidDocument>> {
        Ok(self.documents.get(name).cloned())
    }

    fn save_private_key(&mut self, name: &str, key: &SigningKey) -> Result<()> {
        check_name(name)?;
        // kept encoded so loads exercise the same codec as the file store
        self.keys.insert(name.to_string(), encode_private_key(key));
        Ok(())
    }

    fn load_private_key(&self, name: &str) -> Result<Option<SigningKey>> {
        self.keys
            .get(name)
            .map(|encoded| decode_private_key(encoded).map_err(StorageError::from))
            .transpose()
    }

    fn save_capability(&mut self, name: &str, cap: &ObjectCapability) -> Result<()> {
        check_name(name)?;
        self.capabilities.insert(name.to_string(), cap.clone());
        Ok(())
    }

    fn load_capability(&self, name: &str) -> Result<Option<ObjectCapability>> {
        Ok(self.capabilities.get(name).cloned())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.documents.contains_key(name) && self.keys.contains_key(name))
    }

    fn clear(&mut self) -> Result<()> {
        self.documents.clear();
        self.keys.clear();
        self.capabilities.clear();
        Ok(())
    }
}
