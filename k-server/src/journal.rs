//! Datagram writer for the native journal protocol.
//!
//! One datagram per record: `FIELD=value\n` pairs, switching to the
//! length-prefixed binary form (`FIELD\n<u64le len><value>\n`) for values
//! that contain newlines. The connection is process-wide and opened lazily;
//! writes are independent datagrams and need no locking.
//!
//! <https://systemd.io/JOURNAL_NATIVE_PROTOCOL/>

use std::collections::BTreeMap;
use std::io;

#[cfg(unix)]
use std::os::unix::net::UnixDatagram;
#[cfg(unix)]
use std::sync::OnceLock;

#[cfg(unix)]
const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

#[cfg(unix)]
static CONNECTION: OnceLock<UnixDatagram> = OnceLock::new();

/// Send one structured record to the journal socket.
#[cfg(unix)]
pub fn log(message: &str, priority: u8, fields: &BTreeMap<String, String>) -> io::Result<()> {
    let socket = connection()?;
    let mut datagram = Vec::with_capacity(64 + message.len());
    push_field(&mut datagram, "MESSAGE", message);
    push_field(&mut datagram, "PRIORITY", &priority.to_string());
    for (k, v) in fields {
        push_field(&mut datagram, k, v);
    }
    socket.send_to(&datagram, JOURNAL_SOCKET).map(|_| ())
}

#[cfg(not(unix))]
pub fn log(_message: &str, _priority: u8, _fields: &BTreeMap<String, String>) -> io::Result<()> {
    Err(io::Error::other("journal socket requires a unix host"))
}

#[cfg(unix)]
fn connection() -> io::Result<&'static UnixDatagram> {
    if let Some(socket) = CONNECTION.get() {
        return Ok(socket);
    }
    let socket = UnixDatagram::unbound()?;
    Ok(CONNECTION.get_or_init(|| socket))
}

fn push_field(out: &mut Vec<u8>, key: &str, value: &str) {
    if value.contains('\n') {
        out.extend_from_slice(key.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&(value.len() as u64).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    } else {
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
