use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::consts::{DEFAULT_MAX_PACKET, MIN_MAX_PACKET, PORT_ATTEMPTS, SERVER_PORT};
use crate::error::{Error, Result};
use crate::loss::{LossSimulator, NoLoss, WindowDrop};
use crate::message::WireMessage;
use crate::oob::OobCommand;
use crate::socket::NetSocket;
use crate::transceiver::Transceiver;

/// Configuration for a [`Transport`].
///
/// * `max_packet` - The largest datagram the transport will read, and the basis for the
///   fragment size of channels built on it. Never less than 256. Default is 1400.
/// * `drop_packets` - Test knob. `0` disables loss, `N` drops the back half of every
///   window of `N` received datagrams (see [`WindowDrop`]).
/// * `base_port` - Offset added to the well-known server port when scanning for a free port.
/// * `bind_ip` - The local address to bind. Default is the unspecified IPv4 address.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    max_packet: usize,
    drop_packets: u32,
    base_port: u16,
    bind_ip: IpAddr,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_packet: DEFAULT_MAX_PACKET,
            drop_packets: 0,
            base_port: 0,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet.max(MIN_MAX_PACKET);
        self
    }
    pub fn drop_packets(mut self, window: u32) -> Self {
        self.drop_packets = window;
        self
    }
    pub fn base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }
    pub fn bind_ip(mut self, ip: impl Into<IpAddr>) -> Self {
        self.bind_ip = ip.into();
        self
    }
    pub(crate) fn ip(&self) -> IpAddr {
        self.bind_ip
    }
    fn loss_simulator(&self) -> Box<dyn LossSimulator> {
        if self.drop_packets > 0 {
            Box::new(WindowDrop::new(self.drop_packets))
        } else {
            Box::new(NoLoss)
        }
    }
}

/// One bound datagram socket with a reusable receive buffer.
///
/// Socket errors never escape a `Transport`: failed sends and receives are logged and
/// treated as lost datagrams, which the protocol above recovers from by retransmitting.
pub struct Transport<T: Transceiver> {
    transceiver: T,
    buffer: Vec<u8>,
    loss: Box<dyn LossSimulator>,
}

impl Transport<NetSocket> {
    /// Binds to `addr` (use port 0 for an ephemeral port).
    pub fn bind(addr: impl ToSocketAddrs, cfg: TransportConfig) -> Result<Self> {
        let socket = NetSocket::new(addr)?;
        log::info!("transport bound to {}", socket.addr());
        Ok(Self::with_transceiver(socket, cfg))
    }
    /// Binds to the first free port of `27960 + base_port + [0, 10)`.
    pub fn bind_server(cfg: TransportConfig) -> Result<Self> {
        let first = SERVER_PORT.saturating_add(cfg.base_port);
        let last = first.saturating_add(PORT_ATTEMPTS - 1);
        for port in first..=last {
            match NetSocket::new((cfg.bind_ip, port)) {
                Ok(socket) => {
                    log::info!("transport bound to {}", socket.addr());
                    return Ok(Self::with_transceiver(socket, cfg));
                }
                Err(e) => log::debug!("port {port} unavailable: {e}"),
            }
        }
        log::error!("failed to bind any port in {first}-{last}");
        Err(Error::PortsExhausted { first, last })
    }
}

impl<T: Transceiver> Transport<T> {
    pub fn with_transceiver(transceiver: T, cfg: TransportConfig) -> Self {
        Self {
            transceiver,
            buffer: vec![0u8; cfg.max_packet.max(MIN_MAX_PACKET)],
            loss: cfg.loss_simulator(),
        }
    }
    pub fn addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }
    pub fn max_packet(&self) -> usize {
        self.buffer.len()
    }
    /// Replaces the loss simulation applied to received datagrams.
    pub fn set_loss_simulator(&mut self, loss: impl LossSimulator + 'static) {
        self.loss = Box::new(loss);
    }

    /// Reads the next datagram without blocking.
    ///
    /// The returned slice points into the shared receive buffer and is only valid until
    /// the next call.
    pub fn receive(&mut self) -> Option<(&[u8], SocketAddr)> {
        loop {
            let (len, from) = match self.transceiver.recv(&mut self.buffer) {
                Ok(Some(received)) => received,
                Ok(None) => return None,
                Err(e) => {
                    let e: Error = e.into();
                    log::error!("transport failed to receive: {e}");
                    return None;
                }
            };
            if self.loss.should_drop() {
                log::trace!("transport dropped {len} bytes from {from} (simulated loss)");
                continue;
            }
            return Some((&self.buffer[..len], from));
        }
    }
    /// Reads the next datagram into `msg`, ready to be read from the start.
    pub fn receive_into(&mut self, msg: &mut WireMessage) -> Option<SocketAddr> {
        let (data, from) = self.receive()?;
        msg.begin_read(data);
        Some(from)
    }
    /// Fire-and-forget send. Failures are logged.
    pub fn send(&self, data: &[u8], addr: SocketAddr) {
        if let Err(e) = self.transceiver.send(data, addr) {
            let e: Error = e.into();
            log::error!("transport failed to send {} bytes to {addr}: {e}", data.len());
        }
    }
    /// Sends `command` as an out-of-band datagram.
    pub fn send_oob(&self, command: OobCommand, addr: SocketAddr) {
        log::trace!("sending `{command}` to {addr}");
        let mut msg = WireMessage::with_capacity(32);
        msg.oob_print(&command.to_string());
        self.send(msg.as_bytes(), addr);
    }
    /// Blocks until a datagram is readable or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) {
        if let Err(e) = self.transceiver.wait(timeout) {
            let e: Error = e.into();
            log::error!("transport failed to wait: {e}");
        }
    }
}
