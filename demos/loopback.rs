use std::time::{Duration, Instant};

use znet::{Client, ClientConfig, ClientState, Server, ServerConfig, TransportConfig};

/// Server and client in one process, talking over real loopback sockets.
fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let transport = TransportConfig::new().bind_ip([127, 0, 0, 1]);
    let server_cfg = ServerConfig::with_context(0u32)
        .transport(transport)
        .on_connect(|zport, _, _| log::info!("`on_connect` called for zport {zport}"))
        .on_command(|zport, command, _| {
            log::info!(
                "client {zport} says: {}",
                String::from_utf8_lossy(command)
            )
        })
        .on_tick(|_, _, frame: &mut u32| {
            *frame += 1;
            if *frame % 30 == 0 {
                format!("frame {frame}").into_bytes()
            } else {
                Vec::new()
            }
        });
    let mut server = Server::with_config(server_cfg).unwrap();

    let client_cfg = ClientConfig::with_context(0usize)
        .transport(transport)
        .on_delta(|sequence, delta, received: &mut usize| {
            *received += 1;
            println!("delta {sequence}: {}", String::from_utf8_lossy(delta));
        })
        .on_state_change(|from, to, _| log::info!("client state {from:?} -> {to:?}"));
    let mut client = Client::with_config(server.addr(), client_cfg).unwrap();
    client.connect();

    let tick = Duration::from_millis(16);
    let mut said_hello = false;
    while *client.context() < 10 {
        let start = Instant::now();
        client.tick(16);
        server.update(16);
        if client.state() == ClientState::Connected && !said_hello {
            client.send_reliable(b"hello from loopback").unwrap();
            said_hello = true;
        }
        let elapsed = start.elapsed();
        if elapsed < tick {
            server.sleep(Some(tick - elapsed));
        }
    }
    client.shutdown();
    server.update(16);
    server.shutdown();
}
