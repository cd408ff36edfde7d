//! TCP socket tuning.
//!
//! compio streams do not expose every socket option, so the raw descriptor is
//! borrowed into a `socket2::Socket` for the duration of the call.

#![allow(unsafe_code)]

use std::io;
use std::mem::ManuallyDrop;

/// Enable or disable TCP_NODELAY on a compio `TcpStream`.
///
/// Request/reply traffic is latency bound, so the broker disables Nagle's
/// algorithm on every accepted and connected stream by default.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
pub fn set_nodelay(stream: &compio::net::TcpStream, enabled: bool) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        // SAFETY: the fd stays owned by `stream`; ManuallyDrop keeps socket2
        // from closing it.
        let sock = ManuallyDrop::new(unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) });
        sock.set_nodelay(enabled)
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        // SAFETY: see the unix branch.
        let sock =
            ManuallyDrop::new(unsafe { socket2::Socket::from_raw_socket(stream.as_raw_socket()) });
        sock.set_nodelay(enabled)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (stream, enabled);
        Ok(())
    }
}
