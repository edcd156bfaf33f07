//! Token persistence behind the [`TokenStorage`] trait.
//!
//! Both credentials are stored as expiring named entries, either in an
//! in-memory map ([`MemoryTokenStorage`], also the test double) or a
//! JSON file next to the process ([`FileTokenStorage`]).
//!
//! Writes are immediately visible to subsequent reads in the same
//! process. There is no transactional guarantee across the
//! access/refresh pair: a torn pair reads back as "no session" and is
//! reconciled by the next bootstrap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default credential lifetime, matching the backend's 30-day cookies.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Which of the two persisted credentials to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Storage key, kept identical to the backend's cookie names.
    pub fn key(self) -> &'static str {
        match self {
            TokenKind::Access => "accessToken",
            TokenKind::Refresh => "refreshToken",
        }
    }
}

/// Expiring string storage for the access and refresh tokens.
pub trait TokenStorage: Send + Sync {
    /// Read a token; expired entries read back as absent.
    fn get(&self, kind: TokenKind) -> Option<String>;

    /// Write a token with the given lifetime in days.
    fn set(&self, kind: TokenKind, value: &str, ttl_days: i64);

    /// Remove a token. Removing an absent token is a no-op.
    fn remove(&self, kind: TokenKind);
}

/// A stored value plus its expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredToken {
    fn new(value: &str, ttl_days: i64) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Utc::now() + Duration::days(ttl_days),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// In-memory [`TokenStorage`]. Honours expiry like the file-backed
/// implementation so tests exercise the same contract.
#[derive(Default)]
pub struct MemoryTokenStorage {
    tokens: Mutex<HashMap<TokenKind, StoredToken>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn get(&self, kind: TokenKind) -> Option<String> {
        let tokens = self.tokens.lock().expect("token storage lock poisoned");
        tokens
            .get(&kind)
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.value.clone())
    }

    fn set(&self, kind: TokenKind, value: &str, ttl_days: i64) {
        let mut tokens = self.tokens.lock().expect("token storage lock poisoned");
        tokens.insert(kind, StoredToken::new(value, ttl_days));
    }

    fn remove(&self, kind: TokenKind) {
        let mut tokens = self.tokens.lock().expect("token storage lock poisoned");
        tokens.remove(&kind);
    }
}

/// File-backed [`TokenStorage`]: a small JSON document keyed by the
/// cookie names, read on every access and rewritten on every change.
///
/// IO failures are logged and swallowed -- losing a persisted token
/// degrades to "no session" at the next bootstrap, which is the same
/// outcome the contract already tolerates for a torn pair.
pub struct FileTokenStorage {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, StoredToken> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                return HashMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Token file is corrupt; treating as empty");
                HashMap::new()
            }
        }
    }

    fn save(&self, tokens: &HashMap<String, StoredToken>) {
        let json = match serde_json::to_vec_pretty(tokens) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise token file");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write token file");
        }
    }
}

impl TokenStorage for FileTokenStorage {
    fn get(&self, kind: TokenKind) -> Option<String> {
        let _guard = self.lock.lock().expect("token file lock poisoned");
        self.load()
            .remove(kind.key())
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.value)
    }

    fn set(&self, kind: TokenKind, value: &str, ttl_days: i64) {
        let _guard = self.lock.lock().expect("token file lock poisoned");
        let mut tokens = self.load();
        tokens.insert(kind.key().to_string(), StoredToken::new(value, ttl_days));
        self.save(&tokens);
    }

    fn remove(&self, kind: TokenKind) {
        let _guard = self.lock.lock().expect("token file lock poisoned");
        let mut tokens = self.load();
        if tokens.remove(kind.key()).is_some() {
            self.save(&tokens);
        }
    }
}
