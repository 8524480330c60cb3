//! Sequenced UDP channels for client/server games.
//!
//! A [`Server`] sends each connected client a delta snapshot per tick and resends
//! unacknowledged deltas until the client confirms them. A [`Client`] applies deltas in
//! strict sequence order and sends reliable commands back. Both sides speak through a
//! [`Channel`], which numbers packets, drops stale ones and splits large messages into
//! fragments. Connection setup uses out-of-band text datagrams (see [`OobCommand`]).

mod bytes;
mod consts;
mod error;
mod message;
mod packet;
mod ring;
mod socket;
mod transceiver;

#[cfg(test)]
mod simulator;

pub mod channel;
pub mod client;
pub mod loss;
pub mod oob;
pub mod server;
pub mod transport;

pub use channel::Channel;
pub use client::{Client, ClientConfig, ClientState};
pub use consts::{
    max_fragment, CLIENT_RELIABLE_SLOTS, CONNECTION_TIMEOUT_MS, CONNECT_RETRY_MS,
    DEFAULT_MAX_PACKET, MIN_MAX_PACKET, SERVER_DELTA_SLOTS, SERVER_PORT,
};
pub use error::{Error, Result};
pub use loss::{LossSimulator, NoLoss, RandomLoss, WindowDrop};
pub use message::{WireError, WireMessage};
pub use oob::OobCommand;
pub use server::{Server, ServerConfig, SvClient};
pub use socket::NetSocket;
pub use transceiver::Transceiver;
pub use transport::{Transport, TransportConfig};
