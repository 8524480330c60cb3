use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::bytes::Bytes;
use crate::channel::Channel;
use crate::consts::{CONNECTION_TIMEOUT_MS, SERVER_DELTA_SLOTS};
use crate::error::Result;
use crate::message::WireMessage;
use crate::oob::{self, OobCommand};
use crate::packet::{ClientHeader, DeltaHeader, PacketHeader};
use crate::ring::{resend_sequence, SequenceRing};
use crate::socket::NetSocket;
use crate::transceiver::Transceiver;
use crate::transport::{Transport, TransportConfig};

type ConnectCallback<Ctx> = Box<dyn FnMut(u16, SocketAddr, &mut Ctx) + Send + Sync + 'static>;
type DisconnectCallback<Ctx> = Box<dyn FnMut(u16, &mut Ctx) + Send + Sync + 'static>;
type TickCallback<Ctx> = Box<dyn FnMut(u32, bool, &mut Ctx) -> Vec<u8> + Send + Sync + 'static>;
type CommandCallback<Ctx> = Box<dyn FnMut(u16, &[u8], &mut Ctx) + Send + Sync + 'static>;
type OobCallback<Ctx> = Box<dyn FnMut(&str, SocketAddr, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a server.
///
/// * `transport` - Socket settings, see [`TransportConfig`].
/// * `timeout_ms` - Accumulated tick time after which a silent client is dropped. `0` disables.
/// * `on_connect` - Called when a new client is accepted, with its zport and address.
/// * `on_disconnect` - Called after a client was removed.
/// * `on_tick` - Produces the delta snapshot for this tick. Return an empty buffer when nothing changed.
/// * `on_command` - Called for every reliable command, in order, exactly once.
/// * `on_oob_command` - Called for out-of-band text the server does not understand itself.
///
/// # Example
/// ```
/// use znet::ServerConfig;
///
/// let cfg = ServerConfig::with_context(0u32)
///     .on_connect(|zport, addr, _| println!("client {zport} connected from {addr}"))
///     .on_tick(|_dt, _had_commands, frame| {
///         *frame += 1;
///         format!("frame {frame}").into_bytes()
///     });
/// ```
pub struct ServerConfig<Ctx> {
    transport: TransportConfig,
    timeout_ms: u32,
    context: Ctx,
    on_connect: Option<ConnectCallback<Ctx>>,
    on_disconnect: Option<DisconnectCallback<Ctx>>,
    on_tick: Option<TickCallback<Ctx>>,
    on_command: Option<CommandCallback<Ctx>>,
    on_oob_command: Option<OobCallback<Ctx>>,
}

impl Default for ServerConfig<()> {
    fn default() -> Self {
        ServerConfig::with_context(())
    }
}

impl ServerConfig<()> {
    /// Create a new, default server configuration with no context.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Ctx> ServerConfig<Ctx> {
    /// Create a new server configuration with context that will be passed to the callbacks.
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout_ms: CONNECTION_TIMEOUT_MS,
            context: ctx,
            on_connect: None,
            on_disconnect: None,
            on_tick: None,
            on_command: None,
            on_oob_command: None,
        }
    }
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
    pub fn on_connect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(u16, SocketAddr, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(cb));
        self
    }
    pub fn on_disconnect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(u16, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(cb));
        self
    }
    pub fn on_tick<F>(mut self, cb: F) -> Self
    where
        F: FnMut(u32, bool, &mut Ctx) -> Vec<u8> + Send + Sync + 'static,
    {
        self.on_tick = Some(Box::new(cb));
        self
    }
    pub fn on_command<F>(mut self, cb: F) -> Self
    where
        F: FnMut(u16, &[u8], &mut Ctx) + Send + Sync + 'static,
    {
        self.on_command = Some(Box::new(cb));
        self
    }
    pub fn on_oob_command<F>(mut self, cb: F) -> Self
    where
        F: FnMut(&str, SocketAddr, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_oob_command = Some(Box::new(cb));
        self
    }
}

/// Scratch buffers shared by all clients of a server.
#[derive(Default)]
struct Scratch {
    body: WireMessage,
    packet: WireMessage,
}

/// The server's record of one connected client.
#[derive(Debug)]
pub struct SvClient {
    channel: Channel,
    addr: SocketAddr,
    deltas: SequenceRing<Vec<u8>>,
    delta_sequence: u32,
    delta_sequence_ack: u32,
    delta_roll: u32,
    reliable_sequence: u32,
    silence_ms: u32,
}

impl SvClient {
    fn new(zport: u16, addr: SocketAddr, max_packet: usize) -> Self {
        Self {
            channel: Channel::with_zport(zport, max_packet),
            addr,
            deltas: SequenceRing::new(SERVER_DELTA_SLOTS),
            delta_sequence: 0,
            delta_sequence_ack: 0,
            delta_roll: 0,
            reliable_sequence: 0,
            silence_ms: 0,
        }
    }
    pub fn zport(&self) -> u16 {
        self.channel.zport()
    }
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
    /// Sequence of the latest delta produced for this client.
    pub fn delta_sequence(&self) -> u32 {
        self.delta_sequence
    }
    /// Sequence of the latest delta the client acknowledged.
    pub fn delta_sequence_ack(&self) -> u32 {
        self.delta_sequence_ack
    }
    /// Sequence of the latest reliable command accepted from the client.
    pub fn reliable_sequence(&self) -> u32 {
        self.reliable_sequence
    }
    /// Number of produced deltas the client has not acknowledged yet.
    pub fn unacked(&self) -> u32 {
        self.delta_sequence - self.delta_sequence_ack
    }
    fn matches(&self, zport: u16, addr: SocketAddr) -> bool {
        self.channel.zport() == zport && self.addr == addr
    }

    /// Picks the delta to (re)send when the socket is idle.
    ///
    /// With nothing outstanding the latest delta is repeated; otherwise the oldest
    /// unacknowledged delta alternates with the newer ones.
    fn next_resend(&mut self) -> Option<u32> {
        if self.delta_sequence == 0 {
            return None;
        }
        if self.unacked() == 0 {
            return Some(self.delta_sequence);
        }
        let sequence =
            resend_sequence(self.delta_sequence_ack, self.delta_sequence, self.delta_roll);
        self.delta_roll = self.delta_roll.wrapping_add(1);
        Some(sequence)
    }

    fn send_delta<T: Transceiver>(
        &mut self,
        sequence: u32,
        transport: &Transport<T>,
        scratch: &mut Scratch,
    ) {
        scratch.body.begin_write();
        DeltaHeader {
            delta_sequence: sequence,
            reliable_ack: self.reliable_sequence,
        }
        .write_to(&mut scratch.body);
        scratch.body.write_data(&self.deltas[sequence]);
        match self
            .channel
            .transmit(scratch.body.as_bytes(), &mut scratch.packet)
        {
            Ok(()) => {
                log::trace!("server sent delta {sequence} to client {}", self.zport());
                transport.send(scratch.packet.as_bytes(), self.addr);
            }
            Err(e) => log::debug!(
                "server could not send delta {sequence} to client {}: {e}",
                self.zport()
            ),
        }
    }

    fn send_next_fragment<T: Transceiver>(&mut self, transport: &Transport<T>, scratch: &mut Scratch) {
        self.channel.transmit_next_fragment(&mut scratch.packet);
        transport.send(scratch.packet.as_bytes(), self.addr);
    }
}

/// The server side of a session.
///
/// The server is driven entirely by the caller: [`poll`](Server::poll) handles one
/// incoming datagram (or, when the socket is idle, one outgoing retransmission per
/// client), and [`tick`](Server::tick) produces and queues the next delta snapshot.
/// [`update`](Server::update) combines both for a typical frame.
///
/// # Example
/// ```no_run
/// use znet::{Server, ServerConfig};
/// use std::time::Duration;
///
/// let cfg = ServerConfig::new().on_tick(|_dt, _had_commands, _| b"state".to_vec());
/// let mut server = Server::with_config(cfg).unwrap();
/// loop {
///     server.update(16);
///     std::thread::sleep(Duration::from_millis(16));
/// }
/// ```
pub struct Server<T: Transceiver, Ctx = ()> {
    transport: Transport<T>,
    clients: Vec<SvClient>,
    message: WireMessage,
    scratch: Scratch,
    had_client_commands: bool,
    cfg: ServerConfig<Ctx>,
}

impl Server<NetSocket> {
    /// Starts a server with a default configuration on the first free port from 27960.
    pub fn new() -> Result<Self> {
        Server::with_config(ServerConfig::default())
    }
}

impl<Ctx> Server<NetSocket, Ctx> {
    /// Starts a server on the first free port of `27960 + base_port + [0, 10)`.
    pub fn with_config(cfg: ServerConfig<Ctx>) -> Result<Self> {
        let transport = Transport::bind_server(cfg.transport)?;
        Ok(Self::from_transport(transport, cfg))
    }
    /// Starts a server on an explicit address.
    pub fn bind(addr: impl ToSocketAddrs, cfg: ServerConfig<Ctx>) -> Result<Self> {
        let transport = Transport::bind(addr, cfg.transport)?;
        Ok(Self::from_transport(transport, cfg))
    }
}

impl<T: Transceiver, Ctx> Server<T, Ctx> {
    /// Starts a server on any [`Transceiver`].
    pub fn with_transceiver(transceiver: T, cfg: ServerConfig<Ctx>) -> Self {
        let transport = Transport::with_transceiver(transceiver, cfg.transport);
        Self::from_transport(transport, cfg)
    }
    fn from_transport(transport: Transport<T>, cfg: ServerConfig<Ctx>) -> Self {
        log::info!("server started on {}", transport.addr());
        Self {
            transport,
            clients: Vec::new(),
            message: WireMessage::new(),
            scratch: Scratch::default(),
            had_client_commands: false,
            cfg,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.transport.addr()
    }
    pub fn clients(&self) -> &[SvClient] {
        &self.clients
    }
    pub fn context(&self) -> &Ctx {
        &self.cfg.context
    }
    pub fn context_mut(&mut self) -> &mut Ctx {
        &mut self.cfg.context
    }
    pub fn transport_mut(&mut self) -> &mut Transport<T> {
        &mut self.transport
    }
    /// Blocks until a datagram arrives or `timeout` elapses (`None` waits forever).
    pub fn sleep(&self, timeout: Option<Duration>) {
        self.transport.wait(timeout);
    }

    fn find_client(&self, zport: u16, addr: SocketAddr) -> Option<usize> {
        self.clients.iter().position(|c| c.matches(zport, addr))
    }

    /// Accepts a client, or repeats the connect response if it is already connected.
    ///
    /// A client only asks to connect while disconnected, so a request from a known client
    /// that has already sent sequenced packets starts a new session: its record is reset.
    pub fn try_connect_client(&mut self, zport: u16, addr: SocketAddr) {
        if let Some(index) = self.find_client(zport, addr) {
            if self.clients[index].channel.in_sequence() == 0 {
                log::debug!("server resending connect response to client {zport} at {addr}");
            } else {
                log::info!("server restarting session for client {zport} at {addr}");
                self.clients[index] = SvClient::new(zport, addr, self.transport.max_packet());
                if let Some(ref mut cb) = self.cfg.on_disconnect {
                    cb(zport, &mut self.cfg.context);
                }
                if let Some(ref mut cb) = self.cfg.on_connect {
                    cb(zport, addr, &mut self.cfg.context);
                }
            }
        } else {
            self.clients
                .push(SvClient::new(zport, addr, self.transport.max_packet()));
            log::info!("server accepted client {zport} from {addr}");
            if let Some(ref mut cb) = self.cfg.on_connect {
                cb(zport, addr, &mut self.cfg.context);
            }
        }
        self.transport
            .send_oob(OobCommand::ConnectResponse(zport), addr);
    }

    /// Notifies the client at `index` and removes it.
    pub fn disconnect_client(&mut self, index: usize) {
        if index >= self.clients.len() {
            return;
        }
        let client = self.clients.remove(index);
        let zport = client.zport();
        self.transport
            .send_oob(OobCommand::DisconnectResponse(zport), client.addr);
        log::info!("server disconnected client {zport} at {}", client.addr);
        if let Some(ref mut cb) = self.cfg.on_disconnect {
            cb(zport, &mut self.cfg.context);
        }
    }

    /// Disconnects the client matching `zport` and `addr`, if there is one.
    pub fn try_disconnect_client(&mut self, zport: u16, addr: SocketAddr) -> bool {
        match self.find_client(zport, addr) {
            Some(index) => {
                self.disconnect_client(index);
                true
            }
            None => {
                log::debug!("server ignored disconnect for unknown client {zport} at {addr}");
                false
            }
        }
    }

    /// Disconnects every client, e.g. before the process exits.
    pub fn shutdown(&mut self) {
        log::info!("server disconnecting all clients");
        while !self.clients.is_empty() {
            self.disconnect_client(self.clients.len() - 1);
        }
    }

    /// Executes `data` if it is an out-of-band command. Returns false for sequenced packets.
    pub fn try_execute_oob_command(&mut self, data: &[u8], from: SocketAddr) -> bool {
        let text = match oob::decode(data) {
            Ok(Some(text)) => text,
            Ok(None) => return false,
            Err(e) => {
                log::debug!("server ignored out-of-band packet from {from}: {e}");
                return true;
            }
        };
        log::trace!("server received `{text}` from {from}");
        match OobCommand::parse(text) {
            Some(OobCommand::ConnectClient(zport)) => self.try_connect_client(zport, from),
            Some(OobCommand::DisconnectClient(zport)) => {
                self.try_disconnect_client(zport, from);
            }
            Some(command) => log::debug!("server ignored `{command}` from {from}"),
            None => match self.cfg.on_oob_command {
                Some(ref mut cb) => cb(text, from, &mut self.cfg.context),
                None => log::debug!("server ignored unknown command `{text}` from {from}"),
            },
        }
        true
    }

    /// Handles one pending datagram. If none is pending, sends one outstanding fragment
    /// or one delta (re)transmission to every client instead.
    ///
    /// Returns true if a datagram was handled.
    pub fn poll(&mut self) -> bool {
        let mut message = std::mem::take(&mut self.message);
        let received = match self.transport.receive_into(&mut message) {
            Some(from) => {
                self.process_datagram(&mut message, from);
                true
            }
            None => {
                self.send_pending();
                false
            }
        };
        self.message = message;
        received
    }

    fn send_pending(&mut self) {
        for client in &mut self.clients {
            if client.channel.has_pending_fragments() {
                client.send_next_fragment(&self.transport, &mut self.scratch);
            } else if let Some(sequence) = client.next_resend() {
                client.send_delta(sequence, &self.transport, &mut self.scratch);
            }
        }
    }

    fn process_datagram(&mut self, message: &mut WireMessage, from: SocketAddr) {
        if self.try_execute_oob_command(message.as_bytes(), from) {
            return;
        }
        let Some(header) = PacketHeader::peek(message.as_bytes()) else {
            log::debug!("server ignored short packet from {from}");
            return;
        };
        let Some(index) = self.find_client(header.zport, from) else {
            log::trace!(
                "server ignored packet for unknown client {} from {from}",
                header.zport
            );
            return;
        };
        let client = &mut self.clients[index];
        if !client.channel.receive(message) {
            return;
        }
        client.silence_ms = 0;
        let zport = client.zport();
        match ClientHeader::read_from(message) {
            Err(e) => log::debug!("server ignored packet from client {zport}: {e}"),
            Ok(ClientHeader::Command(sequence)) => {
                let expected = client.reliable_sequence.wrapping_add(1);
                if sequence != expected {
                    log::debug!(
                        "server rejected reliable command {sequence} from client {zport}, expected {expected}"
                    );
                    return;
                }
                client.reliable_sequence = sequence;
                self.had_client_commands = true;
                log::trace!("server accepted reliable command {sequence} from client {zport}");
                if let Some(ref mut cb) = self.cfg.on_command {
                    cb(zport, message.read_remaining(), &mut self.cfg.context);
                }
            }
            Ok(ClientHeader::Ack(ack)) => {
                if ack <= client.delta_sequence_ack || ack > client.delta_sequence {
                    log::trace!(
                        "server ignored ack {ack} from client {zport} (acked {}, latest {})",
                        client.delta_sequence_ack,
                        client.delta_sequence
                    );
                    return;
                }
                client.delta_sequence_ack = ack;
            }
        }
    }

    /// Produces this tick's delta and queues it for every client.
    ///
    /// Nothing happens when the delta is empty and there were no client commands. A new
    /// delta is sent right away only if the client has nothing outstanding; otherwise it
    /// goes out through the retransmission cycle in [`poll`](Server::poll). A client whose
    /// unacknowledged deltas would overflow the ring is disconnected.
    pub fn tick(&mut self, delta_time_ms: u32, had_client_commands: bool) {
        self.expire_clients(delta_time_ms);
        let delta = match self.cfg.on_tick {
            Some(ref mut cb) => cb(delta_time_ms, had_client_commands, &mut self.cfg.context),
            None => Vec::new(),
        };
        if delta.is_empty() && !had_client_commands {
            return;
        }
        let mut overflowed = Vec::new();
        for (index, client) in self.clients.iter_mut().enumerate() {
            if client.unacked() as usize >= client.deltas.capacity() {
                overflowed.push(index);
                continue;
            }
            let send_now = client.unacked() == 0 && !client.channel.has_pending_fragments();
            client.delta_sequence += 1;
            client.deltas.store(client.delta_sequence, &delta);
            if send_now {
                client.send_delta(client.delta_sequence, &self.transport, &mut self.scratch);
            }
        }
        for index in overflowed.into_iter().rev() {
            log::warn!(
                "server dropping client {}: too many unacknowledged deltas",
                self.clients[index].zport()
            );
            self.disconnect_client(index);
        }
    }

    fn expire_clients(&mut self, delta_time_ms: u32) {
        if self.cfg.timeout_ms == 0 {
            return;
        }
        let mut index = self.clients.len();
        while index > 0 {
            index -= 1;
            let client = &mut self.clients[index];
            client.silence_ms = client.silence_ms.saturating_add(delta_time_ms);
            if client.silence_ms >= self.cfg.timeout_ms {
                log::warn!("server timed out client {}", client.zport());
                self.disconnect_client(index);
            }
        }
    }

    /// Handles every pending datagram, then ticks with whether any reliable command arrived.
    pub fn update(&mut self, delta_time_ms: u32) {
        while self.poll() {}
        let had_client_commands = std::mem::take(&mut self.had_client_commands);
        self.tick(delta_time_ms, had_client_commands);
    }
}
