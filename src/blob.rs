//! Blob storage for listing images
use crate::error::{Result, TradeError};
use tracing::debug;

pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `path` and returns the URL it can be fetched from.
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
    fn delete(&self, path: &str) -> Result<()>;
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    #[n(0)]
    pub content_type: String,
    #[cbor(n(1), with = "minicbor::bytes")]
    pub bytes: Vec<u8>,
}

const URL_PREFIX: &str = "sled://blobs/";

/// Path component of a URL handed out by [`SledObjectStore::put`].
pub fn path_from_url(url: &str) -> Option<&str> {
    url.strip_prefix(URL_PREFIX)
}

#[derive(Clone)]
pub struct SledObjectStore {
    tree: sled::Tree,
}

impl SledObjectStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree("blobs")?,
        })
    }

    pub fn get(&self, path: &str) -> Result<Blob> {
        let bytes = self
            .tree
            .get(path.as_bytes())?
            .ok_or_else(|| TradeError::not_found("blob", path))?;
        Ok(minicbor::decode(&bytes)?)
    }
}

impl ObjectStore for SledObjectStore {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let blob = Blob {
            content_type: content_type.to_owned(),
            bytes: bytes.to_vec(),
        };
        self.tree.insert(path.as_bytes(), minicbor::to_vec(&blob)?)?;
        debug!(path, size = bytes.len(), "blob stored");
        Ok(format!("{URL_PREFIX}{path}"))
    }

    fn delete(&self, path: &str) -> Result<()> {
        match self.tree.remove(path.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(TradeError::not_found("blob", path)),
        }
    }
}
