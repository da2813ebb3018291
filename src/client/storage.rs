//! Durable client-side token storage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Where the session manager keeps its tokens between calls.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> StoredTokens;
    fn save(&self, tokens: &StoredTokens);
    fn clear(&self);
}

/// In-memory storage; tokens are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tokens: Mutex<StoredTokens>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> StoredTokens {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, tokens: &StoredTokens) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens.clone();
    }

    fn clear(&self) {
        self.save(&StoredTokens::default());
    }
}

/// Tokens persisted as a JSON file. A missing or unreadable file counts
/// as "no tokens".
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> StoredTokens {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoredTokens::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                return StoredTokens::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring corrupt token file");
            StoredTokens::default()
        })
    }

    fn save(&self, tokens: &StoredTokens) {
        let content = match serde_json::to_string(tokens) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Failed to encode tokens");
                return;
            }
        };
        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::write(&tmp, content).and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to write token file");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove token file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> StoredTokens {
        StoredTokens {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
        }
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load(), StoredTokens::default());
        storage.save(&tokens());
        assert_eq!(storage.load(), tokens());
        storage.clear();
        assert_eq!(storage.load(), StoredTokens::default());
    }

    #[test]
    fn test_file_storage() {
        let path = std::env::temp_dir().join(format!("quillpress-tokens-{}.json", uuid::Uuid::new_v4()));
        let storage = FileStorage::new(&path);

        assert_eq!(storage.load(), StoredTokens::default());
        storage.save(&tokens());
        assert_eq!(FileStorage::new(&path).load(), tokens());

        storage.clear();
        assert!(!path.exists());
        assert_eq!(storage.load(), StoredTokens::default());
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let path = std::env::temp_dir().join(format!("quillpress-tokens-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileStorage::new(&path).load(), StoredTokens::default());
        std::fs::remove_file(&path).unwrap();
    }
}
