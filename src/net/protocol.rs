//! Wire protocol between [`Client`](super::Client) and [`Server`](super::Server).
//!
//! # Handshake
//! The client opens with 9 raw bytes: the protocol magic as a little-endian
//! `u64` and a read-only flag byte. Everything after that is framed.
//!
//! # Frames
//! ```text
//! ┌────────────┬──────┬─────────────────┐
//! │ Length u32 │ Code │ Payload         │
//! │  (LE)      │  1B  │ Length - 1 B    │
//! └────────────┴──────┴─────────────────┘
//! ```
//! Strings are UTF-8 with a 7-bit encoded length. UUIDs are 16 raw bytes.
//! Keys and values travel in their fixed-size encoding.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::io::{decode_7bit, encode_7bit, MAX_7BIT_U32_LEN, MAX_7BIT_U64_LEN};
use crate::types::EncodingDefinition;

/// Magic the client opens a connection with.
pub const PROTOCOL_MAGIC: u64 = 0x2BA5_1736_1121;

/// Size of the raw handshake.
pub const HANDSHAKE_SIZE: usize = 9;

/// Frames above this size mean the stream is out of sync.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length prefix size.
const LENGTH_SIZE: usize = 4;

// ============================================================================
// Codes
// ============================================================================

/// Client to server command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ListDatabases = 1,
    ConnectToDatabase = 2,
    Write = 3,
    HardCommit = 4,
    Read = 5,
    CancelRead = 6,
    DisconnectDatabase = 7,
    Disconnect = 8,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            1 => Command::ListDatabases,
            2 => Command::ConnectToDatabase,
            3 => Command::Write,
            4 => Command::HardCommit,
            5 => Command::Read,
            6 => Command::CancelRead,
            7 => Command::DisconnectDatabase,
            8 => Command::Disconnect,
            other => return Err(Error::protocol(format!("unknown command code {}", other))),
        })
    }
}

/// Server to client response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    KnownProtocol = 1,
    UnknownProtocol = 2,
    AuthenticationFailed = 3,
    ConnectedToRoot = 4,
    ListOfDatabases = 5,
    SuccessfullyConnectedToDatabase = 6,
    DatabaseDoesNotExist = 7,
    DatabaseKeyUnknown = 8,
    DatabaseValueUnknown = 9,
    WriteAccepted = 10,
    CommitComplete = 11,
    ReadBatch = 12,
    ReadComplete = 13,
    ReadCancelled = 14,
    Error = 15,
    DatabaseDisconnected = 16,
    GoodBye = 17,
}

impl TryFrom<u8> for ResponseCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            1 => ResponseCode::KnownProtocol,
            2 => ResponseCode::UnknownProtocol,
            3 => ResponseCode::AuthenticationFailed,
            4 => ResponseCode::ConnectedToRoot,
            5 => ResponseCode::ListOfDatabases,
            6 => ResponseCode::SuccessfullyConnectedToDatabase,
            7 => ResponseCode::DatabaseDoesNotExist,
            8 => ResponseCode::DatabaseKeyUnknown,
            9 => ResponseCode::DatabaseValueUnknown,
            10 => ResponseCode::WriteAccepted,
            11 => ResponseCode::CommitComplete,
            12 => ResponseCode::ReadBatch,
            13 => ResponseCode::ReadComplete,
            14 => ResponseCode::ReadCancelled,
            15 => ResponseCode::Error,
            16 => ResponseCode::DatabaseDisconnected,
            17 => ResponseCode::GoodBye,
            other => return Err(Error::protocol(format!("unknown response code {}", other))),
        })
    }
}

// ============================================================================
// Messages
// ============================================================================

/// What a server says about one of its databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub key_type: Uuid,
    pub value_type: Uuid,
    /// Always starts with [`EncodingDefinition::FIXED_SIZE`].
    pub encodings: Vec<EncodingDefinition>,
}

impl DatabaseInfo {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.name);
        put_uuid(buf, &self.key_type);
        put_uuid(buf, &self.value_type);
        buf.put_u32_le(self.encodings.len() as u32);
        for encoding in &self.encodings {
            match encoding.key_value_method {
                Some(method) => {
                    buf.put_u8(1);
                    put_uuid(buf, &method);
                }
                None => {
                    buf.put_u8(0);
                    put_uuid(buf, &encoding.key_method);
                    put_uuid(buf, &encoding.value_method);
                }
            }
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let name = get_string(buf)?;
        let key_type = get_uuid(buf)?;
        let value_type = get_uuid(buf)?;
        let count = get_u32(buf)?;
        let mut encodings = Vec::new();
        for _ in 0..count {
            let encoding = if get_u8(buf)? != 0 {
                EncodingDefinition {
                    key_value_method: Some(get_uuid(buf)?),
                    key_method: Uuid::nil(),
                    value_method: Uuid::nil(),
                }
            } else {
                EncodingDefinition {
                    key_value_method: None,
                    key_method: get_uuid(buf)?,
                    value_method: get_uuid(buf)?,
                }
            };
            encodings.push(encoding);
        }
        Ok(Self {
            name,
            key_type,
            value_type,
            encodings,
        })
    }
}

/// A decoded client command.
///
/// Record payloads stay as raw fixed-size bytes; only the database they are
/// addressed to knows their layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListDatabases,
    ConnectToDatabase {
        name: String,
        key_type: Uuid,
        value_type: Uuid,
    },
    Write {
        count: u32,
        records: Bytes,
    },
    HardCommit,
    Read {
        start: Bytes,
        stop: Bytes,
    },
    CancelRead,
    DisconnectDatabase,
    Disconnect,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::ListDatabases => Command::ListDatabases,
            Request::ConnectToDatabase { .. } => Command::ConnectToDatabase,
            Request::Write { .. } => Command::Write,
            Request::HardCommit => Command::HardCommit,
            Request::Read { .. } => Command::Read,
            Request::CancelRead => Command::CancelRead,
            Request::DisconnectDatabase => Command::DisconnectDatabase,
            Request::Disconnect => Command::Disconnect,
        }
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = begin_frame(self.command() as u8);
        match self {
            Request::ConnectToDatabase {
                name,
                key_type,
                value_type,
            } => {
                put_string(&mut buf, name);
                put_uuid(&mut buf, key_type);
                put_uuid(&mut buf, value_type);
            }
            Request::Write { count, records } => {
                buf.put_u32_le(*count);
                buf.put_slice(records);
            }
            Request::Read { start, stop } => {
                put_bytes(&mut buf, start);
                put_bytes(&mut buf, stop);
            }
            _ => {}
        }
        finish_frame(buf)
    }

    /// Decode the payload of a frame.
    pub fn decode(code: u8, mut payload: Bytes) -> Result<Self> {
        let request = match Command::try_from(code)? {
            Command::ListDatabases => Request::ListDatabases,
            Command::ConnectToDatabase => Request::ConnectToDatabase {
                name: get_string(&mut payload)?,
                key_type: get_uuid(&mut payload)?,
                value_type: get_uuid(&mut payload)?,
            },
            Command::Write => {
                let count = get_u32(&mut payload)?;
                let records = payload.split_off(0);
                Request::Write { count, records }
            }
            Command::HardCommit => Request::HardCommit,
            Command::Read => Request::Read {
                start: get_bytes(&mut payload)?,
                stop: get_bytes(&mut payload)?,
            },
            Command::CancelRead => Request::CancelRead,
            Command::DisconnectDatabase => Request::DisconnectDatabase,
            Command::Disconnect => Request::Disconnect,
        };
        expect_end(&payload)?;
        Ok(request)
    }
}

/// A decoded server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    KnownProtocol,
    UnknownProtocol,
    AuthenticationFailed,
    ConnectedToRoot,
    ListOfDatabases(Vec<DatabaseInfo>),
    SuccessfullyConnectedToDatabase,
    DatabaseDoesNotExist(String),
    /// Carries the key type the database actually stores.
    DatabaseKeyUnknown(Uuid),
    /// Carries the value type the database actually stores.
    DatabaseValueUnknown(Uuid),
    /// Number of records that were new.
    WriteAccepted(u32),
    CommitComplete,
    ReadBatch {
        count: u32,
        records: Bytes,
    },
    ReadComplete,
    ReadCancelled,
    Error(String),
    DatabaseDisconnected,
    GoodBye,
}

impl Response {
    pub fn code(&self) -> ResponseCode {
        match self {
            Response::KnownProtocol => ResponseCode::KnownProtocol,
            Response::UnknownProtocol => ResponseCode::UnknownProtocol,
            Response::AuthenticationFailed => ResponseCode::AuthenticationFailed,
            Response::ConnectedToRoot => ResponseCode::ConnectedToRoot,
            Response::ListOfDatabases(_) => ResponseCode::ListOfDatabases,
            Response::SuccessfullyConnectedToDatabase => {
                ResponseCode::SuccessfullyConnectedToDatabase
            }
            Response::DatabaseDoesNotExist(_) => ResponseCode::DatabaseDoesNotExist,
            Response::DatabaseKeyUnknown(_) => ResponseCode::DatabaseKeyUnknown,
            Response::DatabaseValueUnknown(_) => ResponseCode::DatabaseValueUnknown,
            Response::WriteAccepted(_) => ResponseCode::WriteAccepted,
            Response::CommitComplete => ResponseCode::CommitComplete,
            Response::ReadBatch { .. } => ResponseCode::ReadBatch,
            Response::ReadComplete => ResponseCode::ReadComplete,
            Response::ReadCancelled => ResponseCode::ReadCancelled,
            Response::Error(_) => ResponseCode::Error,
            Response::DatabaseDisconnected => ResponseCode::DatabaseDisconnected,
            Response::GoodBye => ResponseCode::GoodBye,
        }
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = begin_frame(self.code() as u8);
        match self {
            Response::ListOfDatabases(infos) => {
                buf.put_u32_le(infos.len() as u32);
                for info in infos {
                    info.encode(&mut buf);
                }
            }
            Response::DatabaseDoesNotExist(name) => put_string(&mut buf, name),
            Response::DatabaseKeyUnknown(id) | Response::DatabaseValueUnknown(id) => {
                put_uuid(&mut buf, id)
            }
            Response::WriteAccepted(count) => buf.put_u32_le(*count),
            Response::ReadBatch { count, records } => {
                buf.put_u32_le(*count);
                buf.put_slice(records);
            }
            Response::Error(message) => put_string(&mut buf, message),
            _ => {}
        }
        finish_frame(buf)
    }

    /// Decode the payload of a frame.
    pub fn decode(code: u8, mut payload: Bytes) -> Result<Self> {
        let response = match ResponseCode::try_from(code)? {
            ResponseCode::KnownProtocol => Response::KnownProtocol,
            ResponseCode::UnknownProtocol => Response::UnknownProtocol,
            ResponseCode::AuthenticationFailed => Response::AuthenticationFailed,
            ResponseCode::ConnectedToRoot => Response::ConnectedToRoot,
            ResponseCode::ListOfDatabases => {
                let count = get_u32(&mut payload)?;
                let mut infos = Vec::new();
                for _ in 0..count {
                    infos.push(DatabaseInfo::decode(&mut payload)?);
                }
                Response::ListOfDatabases(infos)
            }
            ResponseCode::SuccessfullyConnectedToDatabase => {
                Response::SuccessfullyConnectedToDatabase
            }
            ResponseCode::DatabaseDoesNotExist => {
                Response::DatabaseDoesNotExist(get_string(&mut payload)?)
            }
            ResponseCode::DatabaseKeyUnknown => Response::DatabaseKeyUnknown(get_uuid(&mut payload)?),
            ResponseCode::DatabaseValueUnknown => {
                Response::DatabaseValueUnknown(get_uuid(&mut payload)?)
            }
            ResponseCode::WriteAccepted => Response::WriteAccepted(get_u32(&mut payload)?),
            ResponseCode::CommitComplete => Response::CommitComplete,
            ResponseCode::ReadBatch => {
                let count = get_u32(&mut payload)?;
                let records = payload.split_off(0);
                Response::ReadBatch { count, records }
            }
            ResponseCode::ReadComplete => Response::ReadComplete,
            ResponseCode::ReadCancelled => Response::ReadCancelled,
            ResponseCode::Error => Response::Error(get_string(&mut payload)?),
            ResponseCode::DatabaseDisconnected => Response::DatabaseDisconnected,
            ResponseCode::GoodBye => Response::GoodBye,
        };
        expect_end(&payload)?;
        Ok(response)
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// The bytes a client opens with.
pub fn encode_handshake(read_only: bool) -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[..8].copy_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
    buf[8] = u8::from(read_only);
    buf
}

/// Read a client handshake. Returns the read-only flag, or `None` if the
/// magic is not ours.
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<Option<bool>> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut buf)?;
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&buf[..8]);
    if u64::from_le_bytes(magic) != PROTOCOL_MAGIC {
        return Ok(None);
    }
    Ok(Some(buf[8] != 0))
}

// ============================================================================
// Frame I/O
// ============================================================================

fn begin_frame(code: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u32_le(0);
    buf.put_u8(code);
    buf
}

fn finish_frame(mut buf: BytesMut) -> Bytes {
    let length = (buf.len() - LENGTH_SIZE) as u32;
    buf[..LENGTH_SIZE].copy_from_slice(&length.to_le_bytes());
    buf.freeze()
}

/// Write an encoded frame. The caller flushes.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<()> {
    if frame.len() - LENGTH_SIZE > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            frame.len(),
            MAX_FRAME_SIZE
        )));
    }
    writer.write_all(frame)?;
    Ok(())
}

/// Read one frame as `(code, payload)`.
///
/// Returns `None` when the peer closed the stream cleanly between frames.
/// A zero or oversized length is a desynchronization.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(u8, Bytes)>> {
    let mut prefix = [0u8; LENGTH_SIZE];
    let mut filled = 0;
    while filled < LENGTH_SIZE {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside a frame header",
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let length = u32::from_le_bytes(prefix) as usize;
    if length == 0 || length > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!("bad frame length {}", length)));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    let mut body = Bytes::from(body);
    let code = body.get_u8();
    Ok(Some((code, body)))
}

// ============================================================================
// Payload helpers
// ============================================================================

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::protocol(format!(
            "payload truncated: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn expect_end(buf: &Bytes) -> Result<()> {
    if buf.has_remaining() {
        return Err(Error::protocol(format!(
            "{} unexpected trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn put_uuid(buf: &mut BytesMut, id: &Uuid) {
    buf.put_slice(id.as_bytes());
}

fn get_uuid(buf: &mut Bytes) -> Result<Uuid> {
    need(buf, 16)?;
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    let mut len = [0u8; MAX_7BIT_U64_LEN];
    let n = encode_7bit(data.len() as u64, &mut len);
    buf.put_slice(&len[..n]);
    buf.put_slice(data);
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = decode_7bit(MAX_7BIT_U32_LEN, || get_u8(buf))? as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn put_string(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::protocol(format!("bad string: {}", e)))
}
