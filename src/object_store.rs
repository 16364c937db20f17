//! Object store uploads for CSV snapshots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Upload-only object store.
pub trait ObjectStore {
    fn put_object(&mut self, bucket: &str, key: &str, bytes: &[u8]) -> PipelineResult<()>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &mut T {
    fn put_object(&mut self, bucket: &str, key: &str, bytes: &[u8]) -> PipelineResult<()> {
        (**self).put_object(bucket, key, bytes)
    }
}

/// Objects kept in memory, keyed by `(bucket, key)`.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: BTreeMap<(String, String), Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<&[u8]> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&mut self, bucket: &str, key: &str, bytes: &[u8]) -> PipelineResult<()> {
        self.objects
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }
}

/// Objects written under `root/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path an object is stored at. Keys that escape the bucket are rejected.
    pub fn object_path(&self, bucket: &str, key: &str) -> PipelineResult<PathBuf> {
        let escapes = |s: &str| {
            s.is_empty()
                || Path::new(s)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
        };
        if escapes(bucket) || escapes(key) {
            return Err(PipelineError::ObjectStore(format!("invalid object location {bucket}/{key}")));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_object(&mut self, bucket: &str, key: &str, bytes: &[u8]) -> PipelineResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::ObjectStore(format!("cannot create {}: {e}", parent.display())))?;
        }
        fs::write(&path, bytes)
            .map_err(|e| PipelineError::ObjectStore(format!("cannot write {}: {e}", path.display())))?;
        debug!(bucket, key, bytes = bytes.len(), "uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_writes_under_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalObjectStore::new(dir.path());
        store.put_object("adresults", "acme.csv", b"a,b\n").unwrap();

        let written = std::fs::read(dir.path().join("adresults").join("acme.csv")).unwrap();
        assert_eq!(written, b"a,b\n");
    }

    #[test]
    fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalObjectStore::new(dir.path());
        assert!(store.put_object("adresults", "../x.csv", b"").is_err());
        assert!(store.put_object("", "x.csv", b"").is_err());
    }
}
