use std::io::{self};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{SOCKET_RECV_BUF_SIZE, SOCKET_SEND_BUF_SIZE};
use crate::transceiver::Transceiver;

#[derive(thiserror::Error, Debug)]
#[error("failed to create and bind udp socket: {0}")]
pub struct Error(#[from] std::io::Error);

pub type Result<T> = std::result::Result<T, Error>;

/// A non-blocking UDP socket.
pub struct NetSocket {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl NetSocket {
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        let socket: UdpSocket = socket.into();
        let addr = socket.local_addr()?;
        Ok(NetSocket { socket, addr })
    }
}

impl Transceiver for NetSocket {
    type IntoError = Error;

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) if len > 0 => Ok(Some((len, addr))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.socket.send_to(buf, addr) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        // a zero read timeout means "forever" to the OS
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(timeout)?;
        let mut peek = [0u8; 1];
        let peeked = self.socket.peek_from(&mut peek);
        self.socket.set_nonblocking(true)?;
        match peeked {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(())
            }
            // the datagram is bigger than the peek buffer, so there is something to read
            Err(e) if is_message_too_long(&e) => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[cfg(windows)]
fn is_message_too_long(e: &io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    e.raw_os_error() == Some(WSAEMSGSIZE)
}

#[cfg(not(windows))]
fn is_message_too_long(_: &io::Error) -> bool {
    false
}
