use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Error;

/// A trait for sending and receiving datagrams.
///
/// Both the server and client use a statically dispatched generic type `T: Transceiver`,
/// which allows any type implementing this trait to stand in for the UDP socket.
/// [`NetSocket`](crate::NetSocket) is the default implementation.
pub trait Transceiver {
    type IntoError: Into<Error>;
    /// Returns the local address the transceiver is bound to.
    fn addr(&self) -> SocketAddr;
    /// Receives a datagram, if one is available.
    ///
    /// Should **NOT** block if no datagram is available.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::IntoError>;
    /// Sends a datagram to the specified address.
    ///
    /// Should **NOT** block if the datagram cannot be sent.
    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::IntoError>;
    /// Blocks until a datagram is readable or `timeout` elapses (`None` waits forever).
    ///
    /// The default implementation just sleeps for the timeout.
    fn wait(&self, timeout: Option<Duration>) -> Result<(), Self::IntoError> {
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        Ok(())
    }
}
