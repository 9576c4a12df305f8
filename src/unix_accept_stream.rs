use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Socket files are created group-accessible only.
const SOCKET_UMASK: libc::mode_t = 0o007;

/// Bind a Unix listener at `path`, replacing a stale socket file.
///
/// Must be called before other threads start creating files: the umask is
/// process-wide while the bind runs.
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    let listen_err = |source: io::Error| Error::Listen {
        path: path.to_path_buf(),
        source,
    };

    match fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(listen_err(e)),
    }

    let old_umask = unsafe { libc::umask(SOCKET_UMASK) };
    let listener = UnixListener::bind(path);
    unsafe { libc::umask(old_umask) };

    listener.map_err(listen_err)
}

pub fn unix_accept_stream(listener: UnixListener) -> impl Stream<Item = UnixStream> {
    stream! {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Accepted local connection");
                    yield stream;
                }
                Err(e) => {
                    error!("Unix socket accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}
