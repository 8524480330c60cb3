use crate::bytes::Bytes;
use crate::consts::FRAG_BIT;
use crate::message::{WireError, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub start: u16,
    pub length: u16,
}

/// Header of every sequenced packet.
///
/// On the wire the sequence carries [`FRAG_BIT`] when a [`FragmentHeader`] follows.
/// The bit is stripped when reading, so `sequence` is always the plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub zport: u16,
    pub fragment: Option<FragmentHeader>,
}

impl PacketHeader {
    pub const SIZE: usize = 6;
    pub const FRAGMENT_SIZE: usize = 4;

    /// Reads the header from the front of a raw datagram without a [`WireMessage`].
    pub fn peek(data: &[u8]) -> Option<Self> {
        let mut msg = WireMessage::with_capacity(Self::SIZE + Self::FRAGMENT_SIZE);
        let len = data.len().min(Self::SIZE + Self::FRAGMENT_SIZE);
        msg.begin_read(&data[..len]);
        Self::read_from(&mut msg).ok()
    }
}

impl Bytes for PacketHeader {
    fn write_to(&self, msg: &mut WireMessage) {
        match self.fragment {
            Some(fragment) => {
                msg.write_u32(self.sequence | FRAG_BIT);
                msg.write_u16(self.zport);
                msg.write_u16(fragment.start);
                msg.write_u16(fragment.length);
            }
            None => {
                msg.write_u32(self.sequence);
                msg.write_u16(self.zport);
            }
        }
    }
    fn read_from(msg: &mut WireMessage) -> Result<Self, WireError> {
        let raw = msg.read_u32()?;
        let zport = msg.read_u16()?;
        let fragment = if raw & FRAG_BIT != 0 {
            Some(FragmentHeader {
                start: msg.read_u16()?,
                length: msg.read_u16()?,
            })
        } else {
            None
        };
        Ok(Self {
            sequence: raw & !FRAG_BIT,
            zport,
            fragment,
        })
    }
}

/// Body header of a server to client snapshot packet, followed by the delta bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaHeader {
    pub delta_sequence: u32,
    /// Last reliable command the server has accepted from this client.
    pub reliable_ack: u32,
}

impl Bytes for DeltaHeader {
    fn write_to(&self, msg: &mut WireMessage) {
        msg.write_i32(self.delta_sequence as i32);
        msg.write_i32(self.reliable_ack as i32);
    }
    fn read_from(msg: &mut WireMessage) -> Result<Self, WireError> {
        Ok(Self {
            delta_sequence: msg.read_i32()? as u32,
            reliable_ack: msg.read_i32()? as u32,
        })
    }
}

/// Body header of a client to server packet.
///
/// A single signed field: positive values acknowledge a delta, negative values
/// carry a reliable command (with the negated sequence) whose bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientHeader {
    Ack(u32),
    Command(u32),
}

impl Bytes for ClientHeader {
    fn write_to(&self, msg: &mut WireMessage) {
        match *self {
            ClientHeader::Ack(sequence) => msg.write_i32(sequence as i32),
            ClientHeader::Command(sequence) => msg.write_i32((sequence as i32).wrapping_neg()),
        }
    }
    fn read_from(msg: &mut WireMessage) -> Result<Self, WireError> {
        let field = msg.read_i32()?;
        if field < 0 {
            Ok(ClientHeader::Command(field.unsigned_abs()))
        } else {
            Ok(ClientHeader::Ack(field as u32))
        }
    }
}
