// Token registry: maps the opaque per-file identifier sent over the wire
// back to the real filesystem path when the editor references it later.
//
// One registry per session, owned by the task that performs protocol I/O.
// Nothing else mutates it, so it needs no synchronization.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct TokenRegistry {
    entries: HashMap<String, PathBuf>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path and return its token: a 32-hex-character digest of
    /// the path bytes. Deterministic, so re-registering the same path
    /// overwrites the entry with an identical mapping.
    pub fn register(&mut self, path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.as_os_str().as_encoded_bytes());
        let token = hex::encode(&hasher.finalize()[..16]);
        self.entries.insert(token.clone(), path.to_path_buf());
        token
    }

    pub fn resolve(&self, token: &str) -> Option<&Path> {
        self.entries.get(token).map(PathBuf::as_path)
    }
}
