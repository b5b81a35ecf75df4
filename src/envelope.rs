//! Framing for messages exchanged with a peer.
//!
//! A frame is a fixed-size ASCII header `"{type}_{body_len}"` padded with spaces, followed
//! by a JSON body. The body of a disconnect frame is the JSON string `"!DISCONNECT"`.

use std::str::FromStr;

use crate::error::SyncError;
use crate::model::board::BoardSnapshot;
use crate::model::diff::BoardDiff;

pub const HEADER_LEN: usize = 16;
pub const DISCONNECT_BODY: &str = "!DISCONNECT";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Board,
    Diff,
    Disconnect,
}

impl MessageType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Board => "PCB",
            Self::Diff => "DIF",
            Self::Disconnect => "!DIS",
        }
    }
}

impl FromStr for MessageType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PCB" => Ok(Self::Board),
            "DIF" => Ok(Self::Diff),
            "!DIS" => Ok(Self::Disconnect),
            other => Err(SyncError::Decode(format!("unknown message type `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage {
    /// Full snapshot, sent once when a peer connects.
    Board(BoardSnapshot),
    Diff(BoardDiff),
    Disconnect,
}

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Board(_) => MessageType::Board,
            Self::Diff(_) => MessageType::Diff,
            Self::Disconnect => MessageType::Disconnect,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub body_len: usize,
}

pub fn encode_body(message: &SyncMessage) -> Result<String, SyncError> {
    let body = match message {
        SyncMessage::Board(snapshot) => serde_json::to_string(snapshot),
        SyncMessage::Diff(diff) => serde_json::to_string(diff),
        SyncMessage::Disconnect => serde_json::to_string(DISCONNECT_BODY),
    };
    body.map_err(|err| SyncError::Encode(err.to_string()))
}

pub fn encode_frame(message: &SyncMessage) -> Result<Vec<u8>, SyncError> {
    let body = encode_body(message)?;
    let header = format!("{}_{}", message.message_type().code(), body.len());
    if header.len() > HEADER_LEN {
        return Err(SyncError::Encode(format!(
            "frame header `{header}` exceeds {HEADER_LEN} bytes"
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.resize(HEADER_LEN, b' ');
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, SyncError> {
    if bytes.len() < HEADER_LEN {
        return Err(SyncError::Decode(format!(
            "frame header needs {HEADER_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let header = std::str::from_utf8(&bytes[..HEADER_LEN])
        .map_err(|err| SyncError::Decode(err.to_string()))?
        .trim_end();
    let (code, body_len) = header
        .rsplit_once('_')
        .ok_or_else(|| SyncError::Decode(format!("malformed frame header `{header}`")))?;
    let body_len = body_len
        .parse::<usize>()
        .map_err(|err| SyncError::Decode(format!("bad body length in `{header}`: {err}")))?;

    Ok(FrameHeader {
        message_type: code.parse()?,
        body_len,
    })
}

pub fn decode_body(message_type: MessageType, body: &[u8]) -> Result<SyncMessage, SyncError> {
    let decode_err = |err: serde_json::Error| SyncError::Decode(err.to_string());
    match message_type {
        MessageType::Board => serde_json::from_slice(body)
            .map(SyncMessage::Board)
            .map_err(decode_err),
        MessageType::Diff => serde_json::from_slice(body)
            .map(SyncMessage::Diff)
            .map_err(decode_err),
        MessageType::Disconnect => {
            let text: String = serde_json::from_slice(body).map_err(decode_err)?;
            if text != DISCONNECT_BODY {
                return Err(SyncError::Decode(format!(
                    "unexpected disconnect body `{text}`"
                )));
            }
            Ok(SyncMessage::Disconnect)
        }
    }
}

/// Decodes one complete frame (header and body).
pub fn decode_frame(bytes: &[u8]) -> Result<SyncMessage, SyncError> {
    let header = decode_header(bytes)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != header.body_len {
        return Err(SyncError::Decode(format!(
            "frame body is {} bytes, header announced {}",
            body.len(),
            header.body_len
        )));
    }

    decode_body(header.message_type, body)
}
