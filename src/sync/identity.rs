//! Host identity persisted on the device.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::info;
use uuid::Uuid;

const IDENTITY_FILE: &str = "host-id";

/// Stable per-device host identity, persisted so a reloaded host can resume
/// the sessions it created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    id: String,
    path: PathBuf,
}

impl HostIdentity {
    /// Read the identity stored in `dir`, creating one on first use.
    pub fn load_or_create(dir: impl AsRef<Path>) -> io::Result<Self> {
        let path = dir.as_ref().join(IDENTITY_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => Ok(Self {
                id: contents.trim().to_string(),
                path,
            }),
            Ok(_) => Self::create(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::create(path),
            Err(err) => Err(err),
        }
    }

    fn create(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let id = Uuid::new_v4().to_string();
        fs::write(&path, &id)?;
        info!(path = %path.display(), "generated host identity");
        Ok(Self { id, path })
    }

    /// Identifier sent as `hostId`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File the identity lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
