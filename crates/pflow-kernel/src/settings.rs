//! The secure settings store — "a cousin of the registry" (§4.5): same
//! atomic-write discipline, but the file is forced to owner-read-write
//! permissions and load warns if an existing file is looser.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::fs_atomic;

const SECURE_MODE: u32 = 0o600;

pub struct Settings<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _phantom: PhantomData,
        }
    }

    /// Loads the settings file, defaulting if absent. Warns (does not
    /// error) if the file exists, is non-empty, and has looser-than-0600
    /// permissions.
    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(T::default());
        }

        #[cfg(unix)]
        {
            let mode = fs_atomic::mode_of(&self.path)?;
            if mode & 0o077 != 0 {
                warn!(
                    path = %self.path.display(),
                    mode = format!("{mode:o}"),
                    "settings file permissions are looser than 0600"
                );
            }
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Atomic write, then force 0600 on the resulting file.
    pub fn save(&self, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        fs_atomic::write_atomic(&self.path, &json)?;
        fs_atomic::set_mode(&self.path, SECURE_MODE)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
