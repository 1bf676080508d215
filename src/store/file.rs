// ABOUTME: File store backend: one JSON file per record under the state directory.
// ABOUTME: Writes go to a temp file first and are renamed into place.

use snafu::ResultExt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::IoSnafu;
use super::{Backend, Collection, StoreError};

const EXTENSION: &str = ".json";

/// Layout: `<root>/<collection>/<urlencoded key>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).context(IoSnafu { path: &root })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    fn path(&self, collection: Collection, key: &str) -> PathBuf {
        self.dir(collection)
            .join(format!("{}{EXTENSION}", urlencoding::encode(key)))
    }
}

impl Backend for FileBackend {
    fn read(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(collection, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn write(&self, collection: Collection, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.dir(collection);
        fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;

        let path = self.path(collection, key);
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            urlencoding::encode(key),
            std::process::id()
        ));
        fs::write(&tmp, bytes).context(IoSnafu { path: &tmp })?;
        fs::rename(&tmp, &path).context(IoSnafu { path: &path })?;
        Ok(())
    }

    fn keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        let dir = self.dir(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.context(IoSnafu { path: &dir })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(key) => keys.push(key.into_owned()),
                Err(_) => tracing::warn!("ignoring undecodable record file {}", name),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let path = self.path(collection, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_encoded_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write(Collection::Runs, "a/b c", b"{}").unwrap();
        assert!(dir.path().join("runs").join("a%2Fb%20c.json").exists());
        assert_eq!(backend.keys(Collection::Runs).unwrap(), vec!["a/b c"]);
    }

    #[test]
    fn overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write(Collection::Live, "web", b"1").unwrap();
        backend.write(Collection::Live, "web", b"2").unwrap();
        assert_eq!(
            backend.read(Collection::Live, "web").unwrap(),
            Some(b"2".to_vec())
        );

        assert!(backend.delete(Collection::Live, "web").unwrap());
        assert!(!backend.delete(Collection::Live, "web").unwrap());
        assert_eq!(backend.read(Collection::Live, "web").unwrap(), None);
    }

    #[test]
    fn missing_collection_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.keys(Collection::Inbox).unwrap().is_empty());
    }

    #[test]
    fn temp_files_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("runs")).unwrap();
        fs::write(dir.path().join("runs").join(".run.1.tmp"), b"{}").unwrap();
        assert!(backend.keys(Collection::Runs).unwrap().is_empty());
    }
}
