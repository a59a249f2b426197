//! The filesystem handle an [`crate::context::ExecutionContext`] owns.
//!
//! The concrete meta-filesystem is an external collaborator (spec.md §1
//! "Out of scope"); this module only defines the handle's interface and
//! a minimal in-memory implementation so the context and pipeline are
//! exercisable end to end, grounded in `just-bash::fs`'s
//! `FileSystem`/`InMemoryFs` split.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("ENOENT: no such file or directory, {operation} '{path}'")]
    NotFound { path: String, operation: String },
    #[error("EEXIST: file already exists, {operation} '{path}'")]
    AlreadyExists { path: String, operation: String },
    #[error("EROFS: read-only file system, {operation}")]
    ReadOnly { operation: String },
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, FsError>;
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FsError>;
    async fn exists(&self, path: &str) -> bool;
    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FsError>;

    fn resolve_path(&self, cwd: &str, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if cwd.ends_with('/') {
            format!("{cwd}{path}")
        } else {
            format!("{cwd}/{path}")
        }
    }
}

/// Pure in-memory filesystem, the default handle for a freshly
/// constructed context.
#[derive(Default)]
pub struct InMemoryFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<HashMap<String, ()>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            None => Err(FsError::NotFound { path: path.to_string(), operation: "read".to_string() }),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FsError> {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains_key(path)
    }

    async fn mkdir(&self, path: &str, _recursive: bool) -> Result<(), FsError> {
        self.dirs.lock().unwrap().insert(path.to_string(), ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fs = InMemoryFs::new();
        fs.write_file("/tmp/a.txt", b"hello").await.unwrap();
        assert_eq!(fs.read_file("/tmp/a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let fs = InMemoryFs::new();
        assert!(fs.read_file("/nope").await.is_err());
    }

    #[test]
    fn resolve_path_joins_relative_to_cwd() {
        let fs = InMemoryFs::new();
        assert_eq!(fs.resolve_path("/home/user", "a.txt"), "/home/user/a.txt");
        assert_eq!(fs.resolve_path("/home/user", "/abs.txt"), "/abs.txt");
    }
}
