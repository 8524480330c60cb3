use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] crate::socket::Error),
    #[error("malformed message: {0}")]
    Wire(#[from] crate::message::WireError),
    #[error("no free port in range {first}-{last}")]
    PortsExhausted { first: u16, last: u16 },
    #[error("payload size exceeded, got {0} but max is {1}")]
    PayloadTooLarge(usize, usize),
    #[error("a fragmented message is still being sent on this channel")]
    FragmentsPending,
    #[error("not connected to a server")]
    NotConnected,
    #[error("reliable command buffer is full ({0} unacknowledged commands)")]
    ReliableBufferFull(usize),
}
