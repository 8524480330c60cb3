pub const SERVER_PORT: u16 = 27960;
pub const PORT_ATTEMPTS: u16 = 10;

pub const DEFAULT_MAX_PACKET: usize = 1400;
pub const MIN_MAX_PACKET: usize = 256;
/// Room left in every datagram for headers when splitting a payload.
pub const FRAGMENT_SLACK: usize = 100;

pub const FRAG_BIT: u32 = 1 << 31;
pub const OOB_MARKER: i32 = -1;

pub const SERVER_DELTA_SLOTS: usize = 64;
pub const CLIENT_RELIABLE_SLOTS: usize = 32;

pub const CONNECT_RETRY_MS: u32 = 3000;
pub const CONNECTION_TIMEOUT_MS: u32 = 60000;

pub(crate) const SOCKET_RECV_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const SOCKET_SEND_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Largest fragment for a given packet size.
pub const fn max_fragment(max_packet: usize) -> usize {
    let max_packet = if max_packet < MIN_MAX_PACKET {
        MIN_MAX_PACKET
    } else {
        max_packet
    };
    max_packet - FRAGMENT_SLACK
}
