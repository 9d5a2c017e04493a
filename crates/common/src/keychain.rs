use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::{KeyError, PublicKey, SecretKey};

const KEY_EXTENSION: &str = "pem";

#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("key {0} already exists")]
    Exists(String),
    #[error("no key named {0}")]
    NotFound(String),
    #[error("invalid key name: {0:?}")]
    InvalidName(String),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("keychain i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named signing keys, one identity per name
///
/// With a directory, each key lives in `{dir}/{name}.pem` and the
///  keychain picks up whatever is there when opened.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    dir: Option<PathBuf>,
    keys: Arc<RwLock<BTreeMap<String, SecretKey>>>,
}

impl Keychain {
    /// A keychain that forgets its keys when dropped
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self, KeychainError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut keys = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_name(name).is_err() {
                tracing::warn!("skipping key file with invalid name: {}", path.display());
                continue;
            }
            let pem = std::fs::read_to_string(&path)?;
            keys.insert(name.to_string(), SecretKey::from_pem(&pem)?);
        }
        tracing::debug!("opened keychain at {} with {} keys", dir.display(), keys.len());

        Ok(Self {
            dir: Some(dir),
            keys: Arc::new(RwLock::new(keys)),
        })
    }

    /// Generate a new key under `name`
    pub fn create_key(&self, name: &str) -> Result<PublicKey, KeychainError> {
        self.insert(name, SecretKey::generate())
    }

    /// Import a PEM encoded key under `name`
    pub fn import_pem(&self, name: &str, pem: &str) -> Result<PublicKey, KeychainError> {
        self.insert(name, SecretKey::from_pem(pem)?)
    }

    pub fn export_pem(&self, name: &str) -> Result<String, KeychainError> {
        Ok(self.get(name)?.to_pem())
    }

    pub fn get(&self, name: &str) -> Result<SecretKey, KeychainError> {
        self.keys
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(name.to_string()))
    }

    /// Every key name with its identity, sorted by name
    pub fn list(&self) -> Vec<(String, PublicKey)> {
        self.keys
            .read()
            .iter()
            .map(|(name, key)| (name.clone(), key.public()))
            .collect()
    }

    pub fn remove(&self, name: &str) -> Result<(), KeychainError> {
        let mut keys = self.keys.write();
        if keys.remove(name).is_none() {
            return Err(KeychainError::NotFound(name.to_string()));
        }
        if let Some(dir) = &self.dir {
            match std::fs::remove_file(key_path(dir, name)) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn insert(&self, name: &str, key: SecretKey) -> Result<PublicKey, KeychainError> {
        validate_name(name)?;
        let mut keys = self.keys.write();
        if keys.contains_key(name) {
            return Err(KeychainError::Exists(name.to_string()));
        }
        if let Some(dir) = &self.dir {
            let mut file = tempfile::NamedTempFile::new_in(dir)?;
            file.write_all(key.to_pem().as_bytes())?;
            file.persist(key_path(dir, name)).map_err(|e| e.error)?;
        }
        let public = key.public();
        keys.insert(name.to_string(), key);
        tracing::info!("added key {} ({})", name, public);
        Ok(public)
    }
}

fn key_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, KEY_EXTENSION))
}

fn validate_name(name: &str) -> Result<(), KeychainError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(KeychainError::InvalidName(name.to_string()))
    }
}
