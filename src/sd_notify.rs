//! Service manager readiness notifications (`sd_notify` protocol).

use std::env;
use std::ffi::OsStr;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::Path;

/// Send `state` to `$NOTIFY_SOCKET`. Returns `Ok(false)` when not running
/// under a notify-aware supervisor.
pub fn notify(state: &str) -> io::Result<bool> {
    match env::var_os("NOTIFY_SOCKET") {
        Some(socket) => notify_socket(&socket, state).map(|()| true),
        None => Ok(false),
    }
}

pub fn ready() -> io::Result<bool> {
    notify("READY=1")
}

pub fn stopping() -> io::Result<bool> {
    notify("STOPPING=1")
}

fn notify_socket(socket: &OsStr, state: &str) -> io::Result<()> {
    let datagram = UnixDatagram::unbound()?;
    match socket.as_bytes().strip_prefix(b"@") {
        Some(name) => {
            let addr = SocketAddr::from_abstract_name(name)?;
            datagram.send_to_addr(state.as_bytes(), &addr)?;
        }
        None => {
            datagram.send_to(state.as_bytes(), Path::new(socket))?;
        }
    }
    Ok(())
}
