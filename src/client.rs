use std::{
    io,
    net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs},
    time::Duration,
};

use crate::{
    bytes::Bytes,
    channel::Channel,
    consts::{CLIENT_RELIABLE_SLOTS, CONNECTION_TIMEOUT_MS, CONNECT_RETRY_MS},
    error::{Error, Result},
    message::WireMessage,
    oob::{self, OobCommand},
    packet::{ClientHeader, DeltaHeader},
    ring::{resend_sequence, SequenceRing},
    socket::NetSocket,
    transceiver::Transceiver,
    transport::{Transport, TransportConfig},
};

type StateCallback<Ctx> = Box<dyn FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static>;
type DeltaCallback<Ctx> = Box<dyn FnMut(u32, &[u8], &mut Ctx) + Send + Sync + 'static>;
type OobCallback<Ctx> = Box<dyn FnMut(&str, SocketAddr, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a client
///
/// * `transport` - Socket settings, see [`TransportConfig`].
/// * `zport` - Fixes the channel's zport. By default a random one is picked for every
///   connection.
/// * `connect_retry_ms` - How often a connect request is repeated while disconnected.
/// * `timeout_ms` - How long a connected client waits for any packet before giving up.
/// * `on_state_change` - A callback that will be called when the client changes states.
/// * `on_delta` - Called with every delta snapshot, strictly in sequence order.
/// * `on_oob_command` - Called for out-of-band text the client does not understand itself.
///
/// # Example
/// ```
/// use znet::{ClientConfig, ClientState};
///
/// let cfg = ClientConfig::with_context(Vec::new())
///     .connect_retry_ms(1000)
///     .on_delta(|_sequence, delta, history: &mut Vec<Vec<u8>>| history.push(delta.to_vec()))
///     .on_state_change(|from, to, _| {
///         if let (ClientState::Disconnected, ClientState::Connected) = (from, to) {
///             println!("client connected to server");
///         }
///     });
/// ```
pub struct ClientConfig<Ctx> {
    transport: TransportConfig,
    zport: Option<u16>,
    connect_retry_ms: u32,
    timeout_ms: u32,
    context: Ctx,
    on_state_change: Option<StateCallback<Ctx>>,
    on_delta: Option<DeltaCallback<Ctx>>,
    on_oob_command: Option<OobCallback<Ctx>>,
}

impl Default for ClientConfig<()> {
    fn default() -> Self {
        ClientConfig::with_context(())
    }
}

impl ClientConfig<()> {
    /// Create a new, default client configuration with no context.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Ctx> ClientConfig<Ctx> {
    /// Create a new client configuration with context that will be passed to the callbacks.
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            transport: TransportConfig::default(),
            zport: None,
            connect_retry_ms: CONNECT_RETRY_MS,
            timeout_ms: CONNECTION_TIMEOUT_MS,
            context: ctx,
            on_state_change: None,
            on_delta: None,
            on_oob_command: None,
        }
    }
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
    pub fn zport(mut self, zport: u16) -> Self {
        self.zport = Some(zport);
        self
    }
    /// The default is 3000 milliseconds.
    pub fn connect_retry_ms(mut self, connect_retry_ms: u32) -> Self {
        self.connect_retry_ms = connect_retry_ms;
        self
    }
    /// The default is 60000 milliseconds. `0` disables the timeout.
    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
    pub fn on_state_change<F>(mut self, cb: F) -> Self
    where
        F: FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(cb));
        self
    }
    pub fn on_delta<F>(mut self, cb: F) -> Self
    where
        F: FnMut(u32, &[u8], &mut Ctx) + Send + Sync + 'static,
    {
        self.on_delta = Some(Box::new(cb));
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

/// The states in the client state machine.
///
/// The initial state is `None`: the client is idle and sends nothing.
/// [`connect`](Client::connect) moves it to `Disconnected`, where a connect request is
/// sent every few seconds until the server answers with a matching zport, which moves the
/// client to `Connected`.
///
/// While `Connected`, a disconnect (requested locally, by the server, or by a timeout)
/// returns the client to `Disconnected`, from where it starts reconnecting.
/// [`shutdown`](Client::shutdown) returns it to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    None,
    Disconnected,
    Connected,
}

/// The client side of a session.
///
/// The client is updated by calling [`tick`](Client::tick) once per frame with the elapsed
/// milliseconds. A tick never fails: anything that goes wrong is logged and the next tick
/// carries on.
///
/// # Example
/// ```no_run
/// use znet::{Client, ClientState};
/// use std::time::Duration;
///
/// let mut client = Client::new("127.0.0.1:27960").unwrap();
/// client.connect();
/// loop {
///     client.tick(16);
///     if client.state() == ClientState::Connected {
///         client.send_reliable(b"say hello").unwrap();
///         break;
///     }
///     std::thread::sleep(Duration::from_millis(16));
/// }
/// ```
pub struct Client<T: Transceiver, Ctx = ()> {
    transport: Transport<T>,
    server_addr: SocketAddr,
    channel: Channel,
    state: ClientState,
    delta_sequence: u32,
    reliable: SequenceRing<Vec<u8>>,
    reliable_sequence: u32,
    reliable_sequence_ack: u32,
    reliable_roll: u32,
    connect_timer_ms: u32,
    silence_ms: u32,
    message: WireMessage,
    body: WireMessage,
    packet: WireMessage,
    cfg: ClientConfig<Ctx>,
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        Error::from(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no socket addresses found",
        ))
    })
}

impl Client<NetSocket> {
    /// Create a new client for the server at `server_addr` with a default configuration.
    pub fn new(server_addr: impl ToSocketAddrs) -> Result<Self> {
        Client::with_config(server_addr, ClientConfig::default())
    }
}

impl<Ctx> Client<NetSocket, Ctx> {
    /// Create a new client bound to an ephemeral port.
    pub fn with_config(server_addr: impl ToSocketAddrs, cfg: ClientConfig<Ctx>) -> Result<Self> {
        let server_addr = resolve(server_addr)?;
        let bind_ip: IpAddr = match cfg.transport.ip() {
            ip if ip.is_unspecified() && server_addr.is_ipv6() => Ipv6Addr::UNSPECIFIED.into(),
            ip => ip,
        };
        let transport = Transport::bind((bind_ip, 0), cfg.transport)?;
        Ok(Self::from_transport(transport, server_addr, cfg))
    }
}

impl<T: Transceiver, Ctx> Client<T, Ctx> {
    /// Create a new client on any [`Transceiver`].
    pub fn with_transceiver(transceiver: T, server_addr: SocketAddr, cfg: ClientConfig<Ctx>) -> Self {
        let transport = Transport::with_transceiver(transceiver, cfg.transport);
        Self::from_transport(transport, server_addr, cfg)
    }
    fn from_transport(transport: Transport<T>, server_addr: SocketAddr, cfg: ClientConfig<Ctx>) -> Self {
        let channel = match cfg.zport {
            Some(zport) => Channel::with_zport(zport, transport.max_packet()),
            None => Channel::new(transport.max_packet()),
        };
        log::info!(
            "client {} started on {} for server {server_addr}",
            channel.zport(),
            transport.addr()
        );
        Self {
            transport,
            server_addr,
            channel,
            state: ClientState::None,
            delta_sequence: 0,
            reliable: SequenceRing::new(CLIENT_RELIABLE_SLOTS),
            reliable_sequence: 0,
            reliable_sequence_ack: 0,
            reliable_roll: 0,
            connect_timer_ms: 0,
            silence_ms: 0,
            message: WireMessage::new(),
            body: WireMessage::new(),
            packet: WireMessage::new(),
            cfg,
        }
    }

    /// Gets the local `SocketAddr` that the client is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.transport.addr()
    }
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
    pub fn zport(&self) -> u16 {
        self.channel.zport()
    }
    /// Gets the current state of the client.
    pub fn state(&self) -> ClientState {
        self.state
    }
    /// Returns true if the client is connected to a server.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Connected)
    }
    /// Sequence of the last delta applied.
    pub fn delta_sequence(&self) -> u32 {
        self.delta_sequence
    }
    /// Sequence of the last reliable command queued.
    pub fn reliable_sequence(&self) -> u32 {
        self.reliable_sequence
    }
    /// Sequence of the last reliable command the server confirmed.
    pub fn reliable_sequence_ack(&self) -> u32 {
        self.reliable_sequence_ack
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

    fn set_state(&mut self, state: ClientState) {
        log::debug!("client state changing from {:?} to {:?}", self.state, state);
        if let Some(ref mut cb) = self.cfg.on_state_change {
            cb(self.state, state, &mut self.cfg.context)
        }
        self.state = state;
    }
    fn reset_connection(&mut self) {
        self.channel.reset();
        self.delta_sequence = 0;
        self.reliable_sequence = 0;
        self.reliable_sequence_ack = 0;
        self.reliable_roll = 0;
        self.silence_ms = 0;
        for sequence in 0..CLIENT_RELIABLE_SLOTS as u32 {
            self.reliable.get_mut(sequence).clear();
        }
    }
    fn enter_disconnected(&mut self) {
        if self.cfg.zport.is_none() {
            // a server that missed our disconnect still holds the old zport
            self.channel = Channel::new(self.transport.max_packet());
            log::debug!("client switched to zport {}", self.zport());
        }
        self.reset_connection();
        self.connect_timer_ms = 0;
        if self.state != ClientState::Disconnected {
            self.set_state(ClientState::Disconnected);
        }
    }

    /// Starts connecting. The first connect request goes out on the next [`tick`](Client::tick).
    ///
    /// This function does not perform any IO.
    pub fn connect(&mut self) {
        if self.state != ClientState::None {
            return;
        }
        self.enter_disconnected();
        self.connect_timer_ms = self.cfg.connect_retry_ms;
        log::info!("client connecting to server {}", self.server_addr);
    }

    /// Tells the server the client is leaving and starts over from `Disconnected`.
    pub fn disconnect(&mut self) {
        if self.state != ClientState::Connected {
            return;
        }
        log::info!("client disconnecting from server {}", self.server_addr);
        self.transport
            .send_oob(OobCommand::DisconnectClient(self.zport()), self.server_addr);
        self.enter_disconnected();
    }

    /// Disconnects (if connected) and stops reconnecting.
    pub fn shutdown(&mut self) {
        self.disconnect();
        if self.state != ClientState::None {
            self.set_state(ClientState::None);
        }
    }

    /// Queues a reliable command. It is resent every tick until the server confirms it.
    pub fn send_reliable(&mut self, command: &[u8]) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(Error::NotConnected);
        }
        let max = Channel::MAX_PAYLOAD - 4;
        if command.len() > max {
            return Err(Error::PayloadTooLarge(command.len(), max));
        }
        let capacity = self.reliable.capacity();
        if (self.reliable_sequence - self.reliable_sequence_ack) as usize >= capacity {
            return Err(Error::ReliableBufferFull(capacity));
        }
        self.reliable_sequence += 1;
        self.reliable.store(self.reliable_sequence, command);
        Ok(())
    }

    /// Handles a connect response carrying `zport`.
    ///
    /// A zport that is not ours belongs to a stale connection; the server is told to drop
    /// it and the client stays disconnected.
    pub fn try_connect_response(&mut self, zport: u16) {
        if zport != self.zport() {
            log::debug!(
                "client got connect response for zport {zport}, expected {}",
                self.zport()
            );
            self.transport
                .send_oob(OobCommand::DisconnectClient(zport), self.server_addr);
            return;
        }
        if self.state != ClientState::Disconnected {
            log::trace!("client ignored connect response in state {:?}", self.state);
            return;
        }
        self.reset_connection();
        self.set_state(ClientState::Connected);
        log::info!("client connected to server {}", self.server_addr);
    }

    /// Executes `data` if it is an out-of-band command. Returns false for sequenced packets.
    pub fn try_execute_oob_command(&mut self, data: &[u8], from: SocketAddr) -> bool {
        let text = match oob::decode(data) {
            Ok(Some(text)) => text,
            Ok(None) => return false,
            Err(e) => {
                log::debug!("client ignored out-of-band packet from {from}: {e}");
                return true;
            }
        };
        log::trace!("client received `{text}` from {from}");
        match OobCommand::parse(text) {
            Some(_) if from != self.server_addr => {
                log::debug!("client ignored `{text}` from unknown address {from}");
            }
            Some(OobCommand::ConnectResponse(zport)) => self.try_connect_response(zport),
            Some(OobCommand::DisconnectResponse(zport)) => {
                if zport == self.zport() && self.state == ClientState::Connected {
                    log::info!("client was disconnected by server");
                    self.enter_disconnected();
                }
            }
            Some(command) => log::debug!("client ignored `{command}` from {from}"),
            None => match self.cfg.on_oob_command {
                Some(ref mut cb) => cb(text, from, &mut self.cfg.context),
                None => log::debug!("client ignored unknown command `{text}` from {from}"),
            },
        }
        true
    }

    /// Advances the client by `delta_time_ms`.
    ///
    /// Sends connect requests or pending reliable commands, drains every datagram
    /// available, and handles the connection timeout. Errors are logged, never returned.
    pub fn tick(&mut self, delta_time_ms: u32) {
        if let Err(e) = self.try_tick(delta_time_ms) {
            log::error!("client tick failed: {e}");
        }
    }

    fn try_tick(&mut self, delta_time_ms: u32) -> Result<()> {
        match self.state {
            ClientState::None => return Ok(()),
            ClientState::Disconnected => {
                self.connect_timer_ms = self.connect_timer_ms.saturating_add(delta_time_ms);
                if self.connect_timer_ms >= self.cfg.connect_retry_ms {
                    self.connect_timer_ms = 0;
                    log::debug!("client sending connect request to {}", self.server_addr);
                    self.transport
                        .send_oob(OobCommand::ConnectClient(self.zport()), self.server_addr);
                }
            }
            ClientState::Connected => {
                self.silence_ms = self.silence_ms.saturating_add(delta_time_ms);
                self.send_pending_reliable()?;
            }
        }

        let mut message = std::mem::take(&mut self.message);
        let drained = self.drain(&mut message);
        self.message = message;
        drained?;

        if self.state == ClientState::Connected
            && self.cfg.timeout_ms > 0
            && self.silence_ms >= self.cfg.timeout_ms
        {
            log::warn!("client connection timed out");
            self.disconnect();
        }
        Ok(())
    }

    fn drain(&mut self, message: &mut WireMessage) -> Result<()> {
        while let Some(from) = self.transport.receive_into(message) {
            if self.try_execute_oob_command(message.as_bytes(), from) {
                continue;
            }
            if self.state != ClientState::Connected {
                log::trace!("client ignored sequenced packet while disconnected");
                continue;
            }
            if from != self.server_addr {
                log::debug!("client ignored packet from unknown address {from}");
                continue;
            }
            self.process_packet(message)?;
        }
        Ok(())
    }

    fn process_packet(&mut self, message: &mut WireMessage) -> Result<()> {
        if !self.channel.receive(message) {
            return Ok(());
        }
        self.silence_ms = 0;
        let header = match DeltaHeader::read_from(message) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("client ignored malformed delta: {e}");
                return Ok(());
            }
        };
        if header.reliable_ack > self.reliable_sequence_ack
            && header.reliable_ack <= self.reliable_sequence
        {
            self.reliable_sequence_ack = header.reliable_ack;
        }
        let expected = self.delta_sequence + 1;
        if header.delta_sequence != expected {
            log::debug!(
                "client dropped delta {} (expected {expected})",
                header.delta_sequence
            );
            if header.delta_sequence < expected {
                // our ack may have been lost
                self.send_ack()?;
            }
            return Ok(());
        }
        self.delta_sequence = header.delta_sequence;
        log::trace!("client applying delta {}", self.delta_sequence);
        if let Some(ref mut cb) = self.cfg.on_delta {
            cb(self.delta_sequence, message.read_remaining(), &mut self.cfg.context);
        }
        self.send_ack()
    }

    fn send_ack(&mut self) -> Result<()> {
        if self.channel.has_pending_fragments() {
            return Ok(());
        }
        self.body.begin_write();
        ClientHeader::Ack(self.delta_sequence).write_to(&mut self.body);
        self.send_body()
    }

    fn send_pending_reliable(&mut self) -> Result<()> {
        if self.channel.has_pending_fragments() {
            self.channel.transmit_next_fragment(&mut self.packet);
            self.transport.send(self.packet.as_bytes(), self.server_addr);
            return Ok(());
        }
        if self.reliable_sequence == self.reliable_sequence_ack {
            return Ok(());
        }
        let sequence = resend_sequence(
            self.reliable_sequence_ack,
            self.reliable_sequence,
            self.reliable_roll,
        );
        self.reliable_roll = self.reliable_roll.wrapping_add(1);
        self.body.begin_write();
        ClientHeader::Command(sequence).write_to(&mut self.body);
        self.body.write_data(&self.reliable[sequence]);
        log::trace!("client sending reliable command {sequence}");
        self.send_body()
    }

    fn send_body(&mut self) -> Result<()> {
        self.channel.transmit(self.body.as_bytes(), &mut self.packet)?;
        self.transport.send(self.packet.as_bytes(), self.server_addr);
        Ok(())
    }
}
