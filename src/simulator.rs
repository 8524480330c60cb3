use std::{
    cell::RefCell,
    collections::HashMap,
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    sync::mpsc::{self, Receiver, Sender},
};

use rand::Rng;

use crate::transceiver::Transceiver;

#[derive(Debug, Clone)]
pub struct PacketEntry {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub packet: Vec<u8>,
}

pub struct Route {
    pub tx: Sender<PacketEntry>,
    pub rx: Receiver<PacketEntry>,
}

pub type RoutingTable = Rc<RefCell<HashMap<u16, Route>>>;

/// In-memory datagram network keyed by port. Delivery is in order, with optional
/// random loss on the sending side.
pub struct NetworkSimulator {
    pub port: u16,
    pub packet_loss_percent: f64,
    pub routing_table: RoutingTable,
}

impl NetworkSimulator {
    pub fn new(port: u16, table: RoutingTable) -> Self {
        let (tx, rx) = mpsc::channel::<PacketEntry>();
        table.borrow_mut().insert(port, Route { tx, rx });
        Self {
            port,
            packet_loss_percent: 0.0,
            routing_table: table,
        }
    }
}

pub fn routing_table() -> RoutingTable {
    Rc::new(RefCell::new(HashMap::new()))
}

impl Transceiver for NetworkSimulator {
    type IntoError = io::Error;

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::IntoError> {
        let table = self.routing_table.borrow();
        let Some(rx) = table.get(&self.port).map(|c| &c.rx) else {
            return Ok(None);
        };
        if let Ok(entry) = rx.try_recv() {
            if entry.to != self.addr() {
                return Err(io::Error::new(
                    ErrorKind::Other,
                    "received packet for wrong address",
                ));
            }
            // datagrams larger than the buffer are truncated, like a real socket
            let len = entry.packet.len().min(buf.len());
            buf[..len].copy_from_slice(&entry.packet[..len]);
            return Ok(Some((len, entry.from)));
        }
        Ok(None)
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::IntoError> {
        let table = self.routing_table.borrow();
        let Some(tx) = table.get(&addr.port()).map(|c| &c.tx) else {
            return Ok(0);
        };
        if self.packet_loss_percent > 0.0
            && rand::thread_rng().gen_range(0.0..100.0) < self.packet_loss_percent
        {
            return Ok(0);
        }
        let entry = PacketEntry {
            from: self.addr(),
            to: addr,
            packet: buf.to_vec(),
        };
        tx.send(entry).ok();
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::{Client, ClientConfig, ClientState},
        consts::{CONNECTION_TIMEOUT_MS, SERVER_DELTA_SLOTS},
        loss::{NoLoss, RandomLoss, WindowDrop},
        server::{Server, ServerConfig},
        transport::TransportConfig,
    };

    use super::*;

    fn enable_logging() {
        // Uncomment this to enable logging

        // static LOGGER_CELL: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        // LOGGER_CELL.get_or_init(|| {
        //     env_logger::Builder::new()
        //         .filter(None, log::LevelFilter::Debug)
        //         .init();
        // });
    }

    #[derive(Default)]
    struct World {
        tick: u32,
        snapshots: u32,
        commands: Vec<Vec<u8>>,
    }

    #[derive(Default)]
    struct View {
        deltas: Vec<(u32, Vec<u8>)>,
        states: Vec<(ClientState, ClientState)>,
    }

    fn server_cfg() -> ServerConfig<World> {
        ServerConfig::with_context(World::default())
            .on_tick(|_dt, _had_commands, world: &mut World| {
                world.tick += 1;
                if world.snapshots == 0 {
                    return Vec::new();
                }
                world.snapshots -= 1;
                format!("tick {}", world.tick).into_bytes()
            })
            .on_command(|_zport, command, world: &mut World| world.commands.push(command.to_vec()))
    }

    fn client_cfg() -> ClientConfig<View> {
        ClientConfig::with_context(View::default())
            .on_delta(|sequence, delta, view: &mut View| view.deltas.push((sequence, delta.to_vec())))
            .on_state_change(|from, to, view: &mut View| view.states.push((from, to)))
    }

    fn setup(
        client_zport: u16,
    ) -> (
        Server<NetworkSimulator, World>,
        Client<NetworkSimulator, View>,
    ) {
        setup_with(client_cfg().zport(client_zport), 0.0)
    }

    fn setup_with(
        cfg: ClientConfig<View>,
        packet_loss_percent: f64,
    ) -> (
        Server<NetworkSimulator, World>,
        Client<NetworkSimulator, View>,
    ) {
        let table = routing_table();
        let mut server_sim = NetworkSimulator::new(50000, table.clone());
        let mut client_sim = NetworkSimulator::new(40000, table);
        server_sim.packet_loss_percent = packet_loss_percent;
        client_sim.packet_loss_percent = packet_loss_percent;
        let server_addr = server_sim.addr();
        let server = Server::with_transceiver(server_sim, server_cfg());
        let client = Client::with_transceiver(client_sim, server_addr, cfg);
        (server, client)
    }

    /// Ticks both sides until the client's reliable commands are all acknowledged.
    fn flush_commands(
        server: &mut Server<NetworkSimulator, World>,
        client: &mut Client<NetworkSimulator, View>,
    ) {
        for _ in 0..100 {
            client.tick(16);
            server.update(16);
            if client.reliable_sequence_ack() == client.reliable_sequence() {
                break;
            }
        }
        assert_eq!(client.reliable_sequence_ack(), client.reliable_sequence());
    }

    /// Disconnects the client while the server drops everything it receives.
    fn disconnect_unnoticed(
        server: &mut Server<NetworkSimulator, World>,
        client: &mut Client<NetworkSimulator, View>,
    ) {
        server.transport_mut().set_loss_simulator(RandomLoss::new(100.0));
        client.disconnect();
        server.update(16);
        server.transport_mut().set_loss_simulator(NoLoss);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(!server.clients().is_empty());
    }

    fn reconnect(
        server: &mut Server<NetworkSimulator, World>,
        client: &mut Client<NetworkSimulator, View>,
    ) {
        for _ in 0..5 {
            client.tick(1000);
            server.update(1000);
        }
        client.tick(16);
        assert!(client.is_connected());
    }

    fn connect(server: &mut Server<NetworkSimulator, World>, client: &mut Client<NetworkSimulator, View>) {
        client.connect();
        for _ in 0..10 {
            client.tick(16);
            server.update(16);
            if client.is_connected() {
                break;
            }
        }
        assert!(client.is_connected());
        assert_eq!(server.clients().len(), 1);
    }

    #[test]
    fn connect_delta_ack_scenario() {
        enable_logging();
        let (mut server, mut client) = setup(4242);

        client.connect();
        assert_eq!(client.state(), ClientState::Disconnected);
        // first tick sends `sv_connect_client 4242`
        client.tick(16);
        // the server answers `cl_connect_response 4242`
        assert!(server.poll());
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.clients()[0].zport(), 4242);
        client.tick(16);
        assert_eq!(client.state(), ClientState::Connected);

        server.context_mut().snapshots = 1;
        server.tick(16, false);
        assert_eq!(server.clients()[0].delta_sequence(), 1);

        client.tick(16);
        assert_eq!(client.delta_sequence(), 1);
        assert_eq!(client.context().deltas, vec![(1, b"tick 1".to_vec())]);

        assert!(server.poll());
        assert_eq!(server.clients()[0].delta_sequence_ack(), 1);
        assert_eq!(
            client.context().states,
            vec![
                (ClientState::None, ClientState::Disconnected),
                (ClientState::Disconnected, ClientState::Connected)
            ]
        );
    }

    #[test]
    fn empty_tick_does_no_work() {
        enable_logging();
        let (mut server, mut client) = setup(7);
        connect(&mut server, &mut client);
        server.tick(16, false);
        assert_eq!(server.clients()[0].delta_sequence(), 0);
        // pending client commands force a (possibly empty) delta out
        server.tick(16, true);
        assert_eq!(server.clients()[0].delta_sequence(), 1);
    }

    #[test]
    fn deltas_survive_packet_loss() {
        enable_logging();
        let (mut server, mut client) = setup(11);
        connect(&mut server, &mut client);
        client.transport_mut().set_loss_simulator(WindowDrop::new(4));
        server.transport_mut().set_loss_simulator(WindowDrop::new(6));

        server.context_mut().snapshots = 20;
        for _ in 0..2000 {
            server.update(16);
            client.tick(16);
            if client.delta_sequence() == 20 && server.clients()[0].delta_sequence_ack() == 20 {
                break;
            }
        }
        assert!(client.is_connected());
        assert_eq!(client.delta_sequence(), 20);
        assert_eq!(server.clients()[0].delta_sequence_ack(), 20);
        let sequences: Vec<u32> = client.context().deltas.iter().map(|(s, _)| *s).collect();
        assert_eq!(sequences, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn large_deltas_are_fragmented() {
        enable_logging();
        let table = routing_table();
        let server_sim = NetworkSimulator::new(50000, table.clone());
        let client_sim = NetworkSimulator::new(40000, table);
        let server_addr = server_sim.addr();
        let transport = TransportConfig::new().max_packet(300);
        let big: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
        let snapshot = big.clone();
        let mut server = Server::with_transceiver(
            server_sim,
            ServerConfig::with_context(World::default())
                .transport(transport)
                .on_tick(move |_, _, world: &mut World| {
                    if world.snapshots == 0 {
                        return Vec::new();
                    }
                    world.snapshots -= 1;
                    snapshot.clone()
                }),
        );
        let mut client = Client::with_transceiver(
            client_sim,
            server_addr,
            client_cfg().zport(3).transport(transport),
        );
        connect(&mut server, &mut client);

        server.context_mut().snapshots = 2;
        for _ in 0..100 {
            server.update(16);
            client.tick(16);
            if client.delta_sequence() == 2 {
                break;
            }
        }
        assert_eq!(client.delta_sequence(), 2);
        assert_eq!(client.context().deltas[0], (1, big.clone()));
        assert_eq!(client.context().deltas[1], (2, big));
    }

    #[test]
    fn reliable_commands_are_delivered_in_order() {
        enable_logging();
        let (mut server, mut client) = setup(21);
        connect(&mut server, &mut client);
        client.transport_mut().set_loss_simulator(WindowDrop::new(5));
        server.transport_mut().set_loss_simulator(WindowDrop::new(5));

        for i in 0..5 {
            client.send_reliable(format!("cmd {i}").as_bytes()).unwrap();
        }
        for _ in 0..500 {
            client.tick(16);
            server.update(16);
            if client.reliable_sequence_ack() == 5 {
                break;
            }
        }
        assert_eq!(client.reliable_sequence_ack(), 5);
        let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("cmd {i}").into_bytes()).collect();
        assert_eq!(server.context().commands, expected);
        assert_eq!(server.clients()[0].reliable_sequence(), 5);
    }

    #[test]
    fn client_times_out_without_server() {
        enable_logging();
        let (mut server, mut client) = setup(31);
        connect(&mut server, &mut client);
        // drain the server's view so the disconnect notice is observable
        server.update(16);

        let mut elapsed = 0;
        while elapsed < CONNECTION_TIMEOUT_MS - 1000 {
            client.tick(1000);
            elapsed += 1000;
        }
        assert!(client.is_connected());
        client.tick(1000);
        assert_eq!(client.state(), ClientState::Disconnected);

        // the server sees `sv_disconnect_client`
        server.poll();
        assert!(server.clients().is_empty());
    }

    #[test]
    fn client_disconnect_and_reconnect() {
        enable_logging();
        let (mut server, mut client) = setup(41);
        connect(&mut server, &mut client);
        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
        server.update(16);
        assert!(server.clients().is_empty());

        // the client keeps retrying every few seconds
        for _ in 0..5 {
            client.tick(1000);
            server.update(1000);
        }
        client.tick(16);
        assert!(client.is_connected());
        assert_eq!(server.clients().len(), 1);
    }

    #[test]
    fn reconnect_with_pinned_zport_after_lost_disconnect() {
        enable_logging();
        let (mut server, mut client) = setup(71);
        connect(&mut server, &mut client);
        for i in 0..3 {
            client.send_reliable(format!("a{i}").as_bytes()).unwrap();
        }
        flush_commands(&mut server, &mut client);

        disconnect_unnoticed(&mut server, &mut client);
        reconnect(&mut server, &mut client);
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.clients()[0].reliable_sequence(), 0);

        client.send_reliable(b"after").unwrap();
        flush_commands(&mut server, &mut client);
        assert_eq!(server.clients()[0].reliable_sequence(), 1);
        assert_eq!(server.context().commands.last(), Some(&b"after".to_vec()));
        assert_eq!(server.context().commands.len(), 4);
    }

    #[test]
    fn reconnect_after_lost_disconnect_uses_a_new_zport() {
        enable_logging();
        let (mut server, mut client) = setup_with(client_cfg(), 0.0);
        connect(&mut server, &mut client);
        client.send_reliable(b"before").unwrap();
        flush_commands(&mut server, &mut client);

        disconnect_unnoticed(&mut server, &mut client);
        reconnect(&mut server, &mut client);
        let zport = client.zport();
        assert!(server.clients().iter().any(|c| c.zport() == zport));
        client.context_mut().deltas.clear();

        // the stale record keeps getting deltas; the client must ignore them
        server.context_mut().snapshots = 3;
        client.send_reliable(b"after").unwrap();
        flush_commands(&mut server, &mut client);
        for _ in 0..50 {
            server.update(16);
            client.tick(16);
        }
        assert_eq!(
            server.context().commands,
            vec![b"before".to_vec(), b"after".to_vec()]
        );
        let sequences: Vec<u32> = client.context().deltas.iter().map(|(s, _)| *s).collect();
        assert_eq!(sequences, (1..=client.delta_sequence()).collect::<Vec<_>>());
        assert!(client.delta_sequence() >= 3);
    }

    #[test]
    fn session_survives_random_loss() {
        enable_logging();
        let (mut server, mut client) = setup_with(client_cfg().zport(81).connect_retry_ms(100), 20.0);
        client.connect();
        for _ in 0..1000 {
            client.tick(16);
            server.update(16);
            if client.is_connected() {
                break;
            }
        }
        assert!(client.is_connected());

        server.context_mut().snapshots = 10;
        for i in 0..5 {
            client.send_reliable(format!("cmd {i}").as_bytes()).unwrap();
        }
        for _ in 0..3000 {
            client.tick(16);
            server.update(16);
            if client.reliable_sequence_ack() == 5
                && client.delta_sequence() >= 10
                && server.context().snapshots == 0
            {
                break;
            }
        }
        let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("cmd {i}").into_bytes()).collect();
        assert_eq!(server.context().commands, expected);
        assert_eq!(client.reliable_sequence_ack(), 5);
        assert!(client.delta_sequence() >= 10);
    }

    #[test]
    fn server_shutdown_notifies_clients() {
        enable_logging();
        let (mut server, mut client) = setup(51);
        connect(&mut server, &mut client);
        server.shutdown();
        assert!(server.clients().is_empty());
        client.tick(16);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn silent_client_overflows_delta_ring() {
        enable_logging();
        let (mut server, mut client) = setup(61);
        connect(&mut server, &mut client);
        server.context_mut().snapshots = u32::MAX;
        for _ in 0..SERVER_DELTA_SLOTS {
            server.tick(16, false);
        }
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.clients()[0].unacked() as usize, SERVER_DELTA_SLOTS);
        server.tick(16, false);
        assert!(server.clients().is_empty());
        // the client learns about it through `cl_disconnect_response`
        client.shutdown();
        assert_eq!(client.state(), ClientState::None);
    }
}
