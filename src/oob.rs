//! Out-of-band commands: unsequenced ascii strings prefixed by the `-1` marker.

use std::fmt;

use crate::message::{is_oob, WireError};

/// The connection management commands exchanged between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobCommand {
    /// Client asks the server to open a channel for this zport.
    ConnectClient(u16),
    /// Client tells the server it is leaving.
    DisconnectClient(u16),
    /// Server accepted the connection for this zport.
    ConnectResponse(u16),
    /// Server dropped the client with this zport.
    DisconnectResponse(u16),
}

impl OobCommand {
    pub const CONNECT_CLIENT: &'static str = "sv_connect_client";
    pub const DISCONNECT_CLIENT: &'static str = "sv_disconnect_client";
    pub const CONNECT_RESPONSE: &'static str = "cl_connect_response";
    pub const DISCONNECT_RESPONSE: &'static str = "cl_disconnect_response";

    /// Parses `<name> <zport>`. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let name = words.next()?;
        let zport = words.next()?.parse::<u16>().ok()?;
        if words.next().is_some() {
            return None;
        }
        match name {
            Self::CONNECT_CLIENT => Some(OobCommand::ConnectClient(zport)),
            Self::DISCONNECT_CLIENT => Some(OobCommand::DisconnectClient(zport)),
            Self::CONNECT_RESPONSE => Some(OobCommand::ConnectResponse(zport)),
            Self::DISCONNECT_RESPONSE => Some(OobCommand::DisconnectResponse(zport)),
            _ => None,
        }
    }
}

impl fmt::Display for OobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OobCommand::ConnectClient(zport) => write!(f, "{} {zport}", Self::CONNECT_CLIENT),
            OobCommand::DisconnectClient(zport) => write!(f, "{} {zport}", Self::DISCONNECT_CLIENT),
            OobCommand::ConnectResponse(zport) => write!(f, "{} {zport}", Self::CONNECT_RESPONSE),
            OobCommand::DisconnectResponse(zport) => {
                write!(f, "{} {zport}", Self::DISCONNECT_RESPONSE)
            }
        }
    }
}

/// Extracts the command text of an out-of-band datagram.
///
/// Returns `Ok(None)` when the datagram is sequenced (no marker).
pub fn decode(data: &[u8]) -> Result<Option<&str>, WireError> {
    if !is_oob(data) {
        return Ok(None);
    }
    let text = &data[4..];
    if !text.is_ascii() {
        return Err(WireError::InvalidText);
    }
    // ascii is always valid utf-8
    std::str::from_utf8(text)
        .map(Some)
        .map_err(|_| WireError::InvalidText)
}
