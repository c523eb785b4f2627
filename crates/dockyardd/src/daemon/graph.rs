//! Storage graph drivers: where container root filesystems live.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use dockyard_config::GraphOption;
use thiserror::Error;
use tracing::info;

use super::DAEMON_TARGET;

/// Name of the plain directory graph driver.
pub const VFS_DRIVER: &str = "vfs";

/// Errors raised by graph drivers.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No graph driver exists under the configured name.
    #[error("unknown graph driver '{name}'")]
    UnknownDriver {
        /// Requested driver name.
        name: String,
    },
    /// The driver does not understand an option.
    #[error("graph driver '{driver}' does not accept option '{key}'")]
    UnsupportedOption {
        /// Driver name.
        driver: String,
        /// Rejected option key.
        key: String,
    },
    /// A layer id is not a single path component.
    #[error("invalid layer id '{id}'")]
    InvalidId {
        /// Rejected id.
        id: String,
    },
    /// The layer already exists.
    #[error("layer '{id}' already exists")]
    Exists {
        /// Layer id.
        id: String,
    },
    /// The layer does not exist.
    #[error("layer '{id}' does not exist")]
    Missing {
        /// Layer id.
        id: String,
    },
    /// Filesystem access failed.
    #[error("graph driver IO failed at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Storage backend that hands out one directory per layer.
#[cfg_attr(test, mockall::automock)]
pub trait GraphDriver: Send + Sync {
    /// Driver name.
    fn name(&self) -> &'static str;

    /// Creates a layer and returns its mount point.
    fn create(&self, id: &str) -> Result<Utf8PathBuf, GraphError>;

    /// Mount point of an existing layer.
    fn get(&self, id: &str) -> Result<Utf8PathBuf, GraphError>;

    /// Removes a layer.
    fn remove(&self, id: &str) -> Result<(), GraphError>;

    /// Releases driver resources on shutdown.
    fn cleanup(&self) -> Result<(), GraphError>;
}

/// Opens the graph driver called `name` under `root`.
///
/// # Errors
///
/// Fails for unknown drivers, rejected options, or when the driver home
/// cannot be created.
pub fn open(
    name: &str,
    root: &Utf8Path,
    options: &[GraphOption],
) -> Result<Box<dyn GraphDriver>, GraphError> {
    match name {
        VFS_DRIVER => Ok(Box::new(VfsDriver::open(root, options)?)),
        other => Err(GraphError::UnknownDriver {
            name: other.to_owned(),
        }),
    }
}

/// Graph driver backed by plain directories under `<root>/vfs/dir`.
#[derive(Debug)]
pub struct VfsDriver {
    home: Utf8PathBuf,
}

impl VfsDriver {
    /// Opens the driver, creating its home directory.
    ///
    /// # Errors
    ///
    /// `vfs` takes no options; any option is rejected.
    pub fn open(root: &Utf8Path, options: &[GraphOption]) -> Result<Self, GraphError> {
        if let Some(option) = options.first() {
            return Err(GraphError::UnsupportedOption {
                driver: VFS_DRIVER.to_owned(),
                key: option.key.clone(),
            });
        }
        let home = root.join(VFS_DRIVER).join("dir");
        fs::create_dir_all(&home).map_err(|source| GraphError::Io {
            path: home.clone(),
            source,
        })?;
        info!(target: DAEMON_TARGET, driver = VFS_DRIVER, home = %home, "graph driver opened");
        Ok(Self { home })
    }

    fn layer_path(&self, id: &str) -> Result<Utf8PathBuf, GraphError> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains('/')
            && !id.contains('\0');
        if !valid {
            return Err(GraphError::InvalidId { id: id.to_owned() });
        }
        Ok(self.home.join(id))
    }
}

impl GraphDriver for VfsDriver {
    fn name(&self) -> &'static str {
        VFS_DRIVER
    }

    fn create(&self, id: &str) -> Result<Utf8PathBuf, GraphError> {
        let path = self.layer_path(id)?;
        match fs::create_dir(&path) {
            Ok(()) => Ok(path),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                Err(GraphError::Exists { id: id.to_owned() })
            }
            Err(source) => Err(GraphError::Io { path, source }),
        }
    }

    fn get(&self, id: &str) -> Result<Utf8PathBuf, GraphError> {
        let path = self.layer_path(id)?;
        if path.is_dir() {
            Ok(path)
        } else {
            Err(GraphError::Missing { id: id.to_owned() })
        }
    }

    fn remove(&self, id: &str) -> Result<(), GraphError> {
        let path = self.get(id)?;
        fs::remove_dir_all(&path).map_err(|source| GraphError::Io { path, source })
    }

    fn cleanup(&self) -> Result<(), GraphError> {
        Ok(())
    }
}
