use crate::message::{WireError, WireMessage};

/// A fixed-layout piece of a packet that can be written to and read from a [`WireMessage`].
pub trait Bytes: Sized {
    fn write_to(&self, msg: &mut WireMessage);
    fn read_from(msg: &mut WireMessage) -> Result<Self, WireError>;
}
