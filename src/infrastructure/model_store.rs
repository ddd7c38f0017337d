//! Model Store: per-engine parameter snapshots on disk.
//!
//! One flat file per engine inside a stable data directory. Writes go
//! through a temp file followed by a rename; restore is best-effort and a
//! missing or undecodable snapshot leaves the engine not-ready.

use crate::utils::error::{CogniError, CogniResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENERGY_MODEL_FILE: &str = "energy_model.bin";
pub const PINN_MODEL_FILE: &str = "pinn_model.bin";
pub const PINN_SCALER_FILE: &str = "pinn_scaler.bin";
pub const SECURITY_MODEL_FILE: &str = "security_model.bin";
pub const SECURITY_SCALER_FILE: &str = "security_scaler.bin";
pub const SECURITY_VOCAB_FILE: &str = "security_vocab.bin";
pub const SECURITY_CONFIG_FILE: &str = "security_config.json";
pub const GRAPH_BEHAVIOR_FILE: &str = "graph_behavior.bin";
pub const HEALTH_MODEL_FILE: &str = "health_if_model.bin";
pub const TRACKER_STATE_FILE: &str = "tracker_state.bin";

#[derive(Debug, Clone)]
pub struct ModelStore {
    base: PathBuf,
}

impl ModelStore {
    /// Open the store at the resolved data directory, creating it if needed.
    ///
    /// Resolution order: the explicit override, then
    /// `$IOBROKER_DATA/cogni-living`, then a `cogni-data` directory next to
    /// the executable.
    pub fn open(configured: Option<PathBuf>) -> Self {
        let base = configured
            .or_else(iobroker_data_dir)
            .or_else(exe_sibling_dir)
            .unwrap_or_else(|| PathBuf::from("cogni-data"));

        if let Err(e) = fs::create_dir_all(&base) {
            warn!("data directory {:?} not creatable: {e}", base);
        }
        debug!("model store at {:?}", base);
        Self { base }
    }

    /// Open the store rooted at an explicit directory (tests, tooling).
    pub fn at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let _ = fs::create_dir_all(&base);
        Self { base }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    /// Atomically persist a bincode snapshot.
    pub fn save_bin<T: Serialize>(&self, name: &str, value: &T) -> CogniResult<()> {
        let bytes = bincode::serialize(value).map_err(|e| CogniError::Serialization {
            reason: format!("encode {name}: {e}"),
        })?;
        self.write_atomic(name, &bytes)
    }

    /// Best-effort restore of a bincode snapshot. `Ok(None)` when absent.
    pub fn load_bin<T: DeserializeOwned>(&self, name: &str) -> CogniResult<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).map_err(|e| CogniError::persistence(&format!("read {name}"), e))?;
        let value = bincode::deserialize(&bytes).map_err(|e| CogniError::Serialization {
            reason: format!("decode {name}: {e}"),
        })?;
        Ok(Some(value))
    }

    /// Atomically persist a human-readable JSON snapshot.
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> CogniResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| CogniError::Serialization {
            reason: format!("encode {name}: {e}"),
        })?;
        self.write_atomic(name, &bytes)
    }

    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> CogniResult<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).map_err(|e| CogniError::persistence(&format!("read {name}"), e))?;
        let value = serde_json::from_slice(&bytes).map_err(|e| CogniError::Serialization {
            reason: format!("decode {name}: {e}"),
        })?;
        Ok(Some(value))
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> CogniResult<()> {
        let path = self.path(name);
        let tmp = self.path(&format!("{name}.tmp"));
        fs::write(&tmp, bytes)
            .map_err(|e| CogniError::persistence(&format!("write {name}"), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| CogniError::persistence(&format!("rename {name}"), e))?;
        Ok(())
    }
}

fn iobroker_data_dir() -> Option<PathBuf> {
    let root = env::var("IOBROKER_DATA").ok()?;
    if root.is_empty() {
        return None;
    }
    let dir = Path::new(&root).join("cogni-living");
    if fs::create_dir_all(&dir).is_ok() {
        Some(dir)
    } else {
        None
    }
}

fn exe_sibling_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    Some(exe.parent()?.join("cogni-data"))
}
