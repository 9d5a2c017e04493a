use std::{fs, path::PathBuf, sync::Arc};

use common::blockstore::FsBlockStore;
use common::keychain::{Keychain, KeychainError};
use common::name::FileSequenceStore;
use common::node::{Node, NodeConfig, NodeError};
use common::prelude::SecretKey;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "cairn";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";
pub const BLOCKS_DIR_NAME: &str = "blocks";
pub const KEYS_DIR_NAME: &str = "keys";
pub const SEQUENCES_FILE_NAME: &str = "sequences.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log level, `RUST_LOG` and `--log-level` take precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub node: NodeConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            node: NodeConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the cairn directory (~/.cairn)
    pub cairn_dir: PathBuf,
    /// Path to the node key PEM file
    pub key_path: PathBuf,
    /// Path to the block store root
    pub blocks_path: PathBuf,
    /// Path to the named keys directory
    pub keys_path: PathBuf,
    /// Path to the published sequence numbers
    pub sequences_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the cairn directory path (custom or default ~/.cairn)
    pub fn cairn_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    fn at(cairn_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            key_path: cairn_dir.join(KEY_FILE_NAME),
            blocks_path: cairn_dir.join(BLOCKS_DIR_NAME),
            keys_path: cairn_dir.join(KEYS_DIR_NAME),
            sequences_path: cairn_dir.join(SEQUENCES_FILE_NAME),
            config_path: cairn_dir.join(CONFIG_FILE_NAME),
            cairn_dir,
            config,
        }
    }

    /// Initialize a new cairn state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let cairn_dir = Self::cairn_dir(custom_path)?;
        if cairn_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        let state = Self::at(cairn_dir, config.unwrap_or_default());
        fs::create_dir_all(&state.cairn_dir)?;
        fs::create_dir_all(&state.blocks_path)?;
        fs::create_dir_all(&state.keys_path)?;

        let key = SecretKey::generate();
        fs::write(&state.key_path, key.to_pem())?;

        let config_toml = toml::to_string_pretty(&state.config)?;
        fs::write(&state.config_path, config_toml)?;

        Ok(state)
    }

    /// Load existing state from the cairn directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let cairn_dir = Self::cairn_dir(custom_path)?;
        if !cairn_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = cairn_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        let state = Self::at(cairn_dir, config);
        if !state.key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !state.blocks_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", BLOCKS_DIR_NAME)));
        }

        Ok(state)
    }

    /// Load the secret key from the key file
    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.key_path)?;
        let key = SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        Ok(key)
    }

    pub fn keychain(&self) -> Result<Keychain, StateError> {
        Ok(Keychain::open(&self.keys_path)?)
    }

    /// Build the node this directory describes
    pub async fn open_node(&self) -> Result<Node, StateError> {
        let store = FsBlockStore::open(&self.blocks_path)
            .await
            .map_err(NodeError::from)?;

        Ok(Node::builder()
            .secret_key(self.load_key()?)
            .store(Arc::new(store))
            .sequences(Arc::new(FileSequenceStore::new(&self.sequences_path)))
            .keychain(self.keychain()?)
            .config(self.config.node.clone())
            .build()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cairn directory not initialized. Run 'cairn init' first")]
    NotInitialized,

    #[error("cairn directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("keychain error: {0}")]
    Keychain(#[from] KeychainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");

        let state = AppState::init(Some(path.clone()), None).unwrap();
        assert!(state.blocks_path.is_dir());
        assert!(state.keys_path.is_dir());
        assert!(matches!(
            AppState::init(Some(path.clone()), None),
            Err(StateError::AlreadyInitialized)
        ));

        let loaded = AppState::load(Some(path)).unwrap();
        assert_eq!(
            loaded.load_key().unwrap().public(),
            state.load_key().unwrap().public()
        );
        assert_eq!(loaded.config.node.chunk_size, state.config.node.chunk_size);
    }

    #[test]
    fn test_load_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }
}
