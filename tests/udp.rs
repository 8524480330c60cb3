use std::net::Ipv4Addr;
use std::time::Duration;

use znet::{Client, ClientConfig, ClientState, Server, ServerConfig, TransportConfig};

fn local() -> TransportConfig {
    TransportConfig::new().bind_ip(Ipv4Addr::LOCALHOST)
}

#[test]
fn session_over_loopback_sockets() {
    let server_cfg = ServerConfig::with_context(Vec::<Vec<u8>>::new())
        .transport(local())
        .on_command(|_, command, commands| commands.push(command.to_vec()))
        .on_tick(|_, had_commands, _| {
            if had_commands {
                b"ack".to_vec()
            } else {
                Vec::new()
            }
        });
    let mut server = Server::bind((Ipv4Addr::LOCALHOST, 0), server_cfg).unwrap();

    let client_cfg = ClientConfig::with_context(Vec::<u32>::new())
        .transport(local())
        .connect_retry_ms(100)
        .on_delta(|sequence, _, deltas| deltas.push(sequence));
    let mut client = Client::with_config(server.addr(), client_cfg).unwrap();
    client.connect();

    let mut sent = false;
    for _ in 0..500 {
        client.tick(10);
        server.sleep(Some(Duration::from_millis(10)));
        server.update(10);
        if client.state() == ClientState::Connected && !sent {
            client.send_reliable(b"hello").unwrap();
            sent = true;
        }
        if sent && client.reliable_sequence_ack() == 1 && !client.context().is_empty() {
            break;
        }
    }

    assert!(client.is_connected());
    assert_eq!(server.clients().len(), 1);
    assert_eq!(server.clients()[0].zport(), client.zport());
    assert_eq!(server.context(), &vec![b"hello".to_vec()]);
    assert_eq!(client.reliable_sequence_ack(), 1);
    assert_eq!(client.context().first(), Some(&1));

    client.shutdown();
    assert_eq!(client.state(), ClientState::None);
    server.sleep(Some(Duration::from_millis(200)));
    server.update(10);
    assert!(server.clients().is_empty());
}

#[test]
fn client_without_server_keeps_retrying() {
    let mut client = Client::with_config(
        (Ipv4Addr::LOCALHOST, 9),
        ClientConfig::new().transport(local()).connect_retry_ms(10),
    )
    .unwrap();
    client.connect();
    for _ in 0..5 {
        client.tick(10);
    }
    assert_eq!(client.state(), ClientState::Disconnected);
}
