use std::{
    io::{self, BufRead},
    sync::mpsc::{self, TryRecvError},
    thread,
    time::Duration,
};

use znet::{Client, ClientConfig, ClientState, TransportConfig};

/// Connects to a running server and sends each line of stdin as a reliable command.
///
/// Usage: `fake_client [server address] [drop window]`
fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "127.0.0.1:27960".to_owned());
    let drop_window = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);

    let cfg = ClientConfig::new()
        .transport(TransportConfig::new().drop_packets(drop_window))
        .on_delta(|sequence, delta, _| {
            log::info!("delta {sequence} ({} bytes)", delta.len());
        })
        .on_oob_command(|text, from, _| log::info!("{from}: {text}"));
    let mut client = Client::with_config(server.as_str(), cfg).unwrap();
    client.connect();

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        client.tick(16);
        match rx.try_recv() {
            Ok(line) if client.state() == ClientState::Connected => {
                if let Err(e) = client.send_reliable(line.as_bytes()) {
                    log::warn!("command dropped: {e}");
                }
            }
            Ok(_) => log::warn!("not connected yet"),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }
        client.sleep(Some(Duration::from_millis(16)));
    }
    client.shutdown();
}
