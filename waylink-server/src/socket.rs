//! The compositor's listening socket

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

/// An error that can occur while setting up the listening socket.
#[derive(Debug, thiserror::Error)]
pub enum BindSocketError {
    #[error("$XDG_RUNTIME_DIR must be set unless $WAYLAND_DISPLAY is an absolute path")]
    RuntimeDirNotSet,
    #[error("could not write to the runtime directory")]
    PermissionDenied,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A bound and listening Unix socket.
///
/// Any stale socket file left behind by a previous instance is unlinked
/// before binding; the socket file itself is unlinked again on drop.
pub struct ListeningSocket {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ListeningSocket {
    /// Bind `name` inside `$XDG_RUNTIME_DIR`, or at `name` itself if it is
    /// an absolute path. The socket file is only accessible to the owner.
    pub fn bind(name: &OsStr) -> Result<Self, BindSocketError> {
        let name = PathBuf::from(name);
        let socket_path = if name.is_absolute() {
            name
        } else {
            let runtime_dir =
                env::var_os("XDG_RUNTIME_DIR").ok_or(BindSocketError::RuntimeDirNotSet)?;
            PathBuf::from(runtime_dir).join(name)
        };

        // Clean up after a previous instance
        match fs::remove_file(&socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(BindSocketError::PermissionDenied)
            }
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                BindSocketError::PermissionDenied
            } else {
                BindSocketError::Io(e)
            }
        })?;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o700))?;

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Block until the next client connects.
    pub fn accept(&self) -> io::Result<UnixStream> {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

impl AsRawFd for ListeningSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}
