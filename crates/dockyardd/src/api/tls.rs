//! TLS termination seam.
//!
//! Certificate handling lives outside the daemon: callers that want TLS
//! install a [`TlsAcceptor`] which wraps accepted TCP streams.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use camino::{Utf8Path, Utf8PathBuf};

use super::ApiError;

/// A bidirectional stream produced by a TLS handshake.
pub trait TlsStream: Read + Write + Send {}

impl<T> TlsStream for T where T: Read + Write + Send {}

/// Certificate material named by the `serveapi` job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Whether client certificates must be verified against `ca`.
    pub verify: bool,
    /// Certificate authority bundle.
    pub ca: Utf8PathBuf,
    /// Server certificate.
    pub cert: Utf8PathBuf,
    /// Server private key.
    pub key: Utf8PathBuf,
}

impl TlsMaterial {
    /// Checks that every file the handshake needs exists.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::TlsMaterialMissing`] for the first missing file.
    pub fn ensure_present(&self) -> Result<(), ApiError> {
        require("cert", &self.cert)?;
        require("key", &self.key)?;
        if self.verify {
            require("ca", &self.ca)?;
        }
        Ok(())
    }
}

fn require(role: &'static str, path: &Utf8Path) -> Result<(), ApiError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ApiError::TlsMaterialMissing {
            role,
            path: path.to_path_buf(),
        })
    }
}

/// Performs the server side of a TLS handshake.
pub trait TlsAcceptor: Send + Sync {
    /// Wraps an accepted TCP stream.
    fn accept(&self, stream: TcpStream, material: &TlsMaterial) -> io::Result<Box<dyn TlsStream>>;
}
