//! Entropy Gathering Daemon client.
//!
//! Implements just the wire protocol a caller needs to pull bytes from a
//! running EGD instance over a Unix domain socket: connect, send `0x01`
//! followed by the requested count, read up to that many bytes back. The
//! daemon itself is out of scope — this module is only ever a client. EGD
//! is a Unix-socket protocol, so on non-Unix targets `collect` always
//! reports the source unavailable; `set_address` still exists everywhere
//! so callers don't need target-specific code.
//!
//! Grounded on `original_source/src/otterylite_entropy.h`'s
//! `ottery_getentropy_egd`, and on the EGD protocol as documented by GnuPG's
//! `rndegd.c`.

use super::{CHUNK, SourceOutcome};
use crate::error::{Error, Result};
use std::sync::{Mutex, OnceLock};

/// EGD's request format allows at most 255 bytes per request; this crate
/// only ever asks for one chunk at a time.
const EGD_QUERY_ENTROPY: u8 = 0x01;

/// Conservative bound on a Unix domain socket path: matches the smallest
/// `sockaddr_un::sun_path` capacity across supported platforms (macOS's
/// 104 bytes; Linux allows a few more). Mirrors spec.md §7's `ConfigError`
/// for an oversized EGD address, standing in for the original `socklen_t`
/// check now that the address is a path rather than a raw `sockaddr`.
const MAX_EGD_PATH_LEN: usize = 104;

fn egd_address() -> &'static Mutex<Option<String>> {
    static ADDR: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    ADDR.get_or_init(|| Mutex::new(None))
}

/// Configures the Unix domain socket path used by the EGD source. Passing
/// `None` disables it, which is also the default before this is ever
/// called. Rejects a path too long for `sockaddr_un` without touching the
/// previously configured address.
pub fn set_address(path: Option<String>) -> Result<()> {
    if let Some(p) = &path {
        if p.len() >= MAX_EGD_PATH_LEN {
            return Err(Error::ConfigError("EGD socket path too long"));
        }
    }
    *egd_address().lock().unwrap() = path;
    Ok(())
}

#[cfg(unix)]
pub fn collect(out: &mut [u8; CHUNK]) -> SourceOutcome {
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::net::UnixStream;

    let path = match egd_address().lock().unwrap().clone() {
        Some(p) => p,
        None => return SourceOutcome::Unavailable,
    };

    let mut stream = match UnixStream::connect(&path) {
        Ok(s) => s,
        Err(_) => return SourceOutcome::Unavailable,
    };

    let request = [EGD_QUERY_ENTROPY, CHUNK as u8];
    if retrying_write_all(&mut stream, &request).is_err() {
        return SourceOutcome::Failed;
    }

    let mut received = 0usize;
    while received < CHUNK {
        match stream.read(&mut out[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => {
                continue;
            }
            Err(_) => return SourceOutcome::Failed,
        }
    }

    if received == CHUNK {
        SourceOutcome::Full(*out)
    } else if received > 0 {
        SourceOutcome::Partial(out[..received].to_vec())
    } else {
        SourceOutcome::Failed
    }
}

#[cfg(unix)]
fn retrying_write_all(
    stream: &mut std::os::unix::net::UnixStream,
    buf: &[u8],
) -> std::io::Result<()> {
    use std::io::{ErrorKind, Write};

    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn collect(_out: &mut [u8; CHUNK]) -> SourceOutcome {
    SourceOutcome::Unavailable
}
