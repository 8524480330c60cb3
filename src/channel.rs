use crate::bytes::Bytes;
use crate::consts::max_fragment;
use crate::error::{Error, Result};
use crate::message::{WireError, WireMessage};
use crate::packet::{FragmentHeader, PacketHeader};

/// Per-peer sequencing, fragmentation and reassembly.
///
/// The send and receive halves are independent. Outgoing packets are numbered from 1;
/// incoming packets are accepted only if their sequence is strictly greater than the
/// last accepted one, with no reorder buffer.
///
/// A payload of at least [`max_fragment`](Channel::max_fragment) bytes is staged and sent
/// as a run of fragments sharing one sequence number. A fragment shorter than
/// `max_fragment` ends the run, so a payload that is an exact multiple of
/// `max_fragment` is terminated by an empty fragment. Only one fragmented message can be
/// in flight at a time; [`transmit`](Channel::transmit) refuses new payloads until
/// [`has_pending_fragments`](Channel::has_pending_fragments) is false.
#[derive(Debug, Clone)]
pub struct Channel {
    zport: u16,
    max_fragment: usize,
    out_sequence: u32,
    in_sequence: u32,

    unsent_fragments: bool,
    unsent_fragment_start: usize,
    unsent_buffer: Vec<u8>,

    fragment_sequence: u32,
    fragment_buffer: Vec<u8>,
}

impl Channel {
    /// The fragment header stores offsets in 16 bits.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    /// Creates a channel with a random zport.
    pub fn new(max_packet: usize) -> Self {
        Self::with_zport(rand::random(), max_packet)
    }
    pub fn with_zport(zport: u16, max_packet: usize) -> Self {
        Self {
            zport,
            max_fragment: max_fragment(max_packet),
            out_sequence: 1,
            in_sequence: 0,
            unsent_fragments: false,
            unsent_fragment_start: 0,
            unsent_buffer: Vec::new(),
            fragment_sequence: 0,
            fragment_buffer: Vec::new(),
        }
    }
    /// Forgets all sequencing and fragment state. The zport is kept.
    pub fn reset(&mut self) {
        self.out_sequence = 1;
        self.in_sequence = 0;
        self.unsent_fragments = false;
        self.unsent_fragment_start = 0;
        self.unsent_buffer.clear();
        self.fragment_sequence = 0;
        self.fragment_buffer.clear();
    }
    pub fn zport(&self) -> u16 {
        self.zport
    }
    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }
    /// Sequence number the next outgoing message will use.
    pub fn out_sequence(&self) -> u32 {
        self.out_sequence
    }
    /// Sequence number of the last accepted incoming message.
    pub fn in_sequence(&self) -> u32 {
        self.in_sequence
    }
    pub fn has_pending_fragments(&self) -> bool {
        self.unsent_fragments
    }

    /// Frames `payload` into `packet`, ready to be sent.
    ///
    /// Large payloads only produce the first fragment; keep calling
    /// [`transmit_next_fragment`](Channel::transmit_next_fragment) while
    /// [`has_pending_fragments`](Channel::has_pending_fragments) is true.
    pub fn transmit(&mut self, payload: &[u8], packet: &mut WireMessage) -> Result<()> {
        if self.unsent_fragments {
            return Err(Error::FragmentsPending);
        }
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len(), Self::MAX_PAYLOAD));
        }
        if payload.len() >= self.max_fragment {
            self.unsent_fragments = true;
            self.unsent_fragment_start = 0;
            self.unsent_buffer.clear();
            self.unsent_buffer.extend_from_slice(payload);
            self.transmit_next_fragment(packet);
            return Ok(());
        }
        packet.begin_write();
        PacketHeader {
            sequence: self.out_sequence,
            zport: self.zport,
            fragment: None,
        }
        .write_to(packet);
        packet.write_data(payload);
        self.out_sequence += 1;
        Ok(())
    }

    /// Frames the next fragment of the staged payload into `packet`.
    ///
    /// Does nothing (and leaves `packet` untouched) if no fragments are pending.
    pub fn transmit_next_fragment(&mut self, packet: &mut WireMessage) {
        if !self.unsent_fragments {
            return;
        }
        let start = self.unsent_fragment_start;
        let length = (self.unsent_buffer.len() - start).min(self.max_fragment);
        packet.begin_write();
        PacketHeader {
            sequence: self.out_sequence,
            zport: self.zport,
            fragment: Some(FragmentHeader {
                start: start as u16,
                length: length as u16,
            }),
        }
        .write_to(packet);
        packet.write_data(&self.unsent_buffer[start..start + length]);
        self.unsent_fragment_start += length;

        if self.unsent_fragment_start == self.unsent_buffer.len() && length != self.max_fragment
        {
            self.out_sequence += 1;
            self.unsent_fragments = false;
            self.unsent_fragment_start = 0;
            self.unsent_buffer.clear();
        }
    }

    /// Processes an incoming datagram loaded into `packet`.
    ///
    /// Returns true when a complete message was accepted; the cursor of `packet` is then
    /// positioned at the start of the payload. Fragmented messages are reassembled in
    /// place, so after the last fragment `packet` holds a plain packet with the full
    /// payload. Returns false for stale, malformed, or incomplete input, and for packets
    /// carrying another channel's zport.
    pub fn receive(&mut self, packet: &mut WireMessage) -> bool {
        match self.try_receive(packet) {
            Ok(accepted) => accepted,
            Err(e) => {
                log::debug!("channel {} dropped packet: {e}", self.zport);
                false
            }
        }
    }

    fn try_receive(&mut self, packet: &mut WireMessage) -> std::result::Result<bool, WireError> {
        packet.rewind();
        let header = PacketHeader::read_from(packet)?;
        if header.zport != self.zport {
            log::debug!(
                "channel {} dropped packet for zport {}",
                self.zport,
                header.zport
            );
            return Ok(false);
        }
        let sequence = header.sequence;
        if sequence <= self.in_sequence {
            log::debug!(
                "channel {} dropped out of order packet {sequence} (last {})",
                self.zport,
                self.in_sequence
            );
            return Ok(false);
        }

        if let Some(fragment) = header.fragment {
            if sequence != self.fragment_sequence {
                self.fragment_sequence = sequence;
                self.fragment_buffer.clear();
            }
            if fragment.start as usize != self.fragment_buffer.len() {
                log::debug!(
                    "channel {} dropped a message fragment at {} (expected {})",
                    self.zport,
                    fragment.start,
                    self.fragment_buffer.len()
                );
                return Ok(false);
            }
            let length = fragment.length as usize;
            if length > self.max_fragment || length > packet.remaining() {
                log::debug!(
                    "channel {} dropped illegal fragment length {length}",
                    self.zport
                );
                return Ok(false);
            }
            packet.append_data(&mut self.fragment_buffer, Some(length))?;
            if length == self.max_fragment {
                return Ok(false);
            }

            let payload = std::mem::take(&mut self.fragment_buffer);
            packet.begin_write();
            PacketHeader {
                sequence,
                zport: header.zport,
                fragment: None,
            }
            .write_to(packet);
            packet.write_data(&payload);
            self.fragment_buffer = payload;
            self.fragment_buffer.clear();
            packet.rewind();
            PacketHeader::read_from(packet)?;
        }

        self.in_sequence = sequence;
        Ok(true)
    }
}
