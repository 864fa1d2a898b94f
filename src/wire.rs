//! Wire protocol encode/decode.
//!
//! Fixed-width integers are little-endian; byte strings are length-prefixed
//! with a `u32`. The transport supplies framing (one datagram per message),
//! so messages carry no outer length. Requests lead with a `u16` command
//! code and a `u64` session id; responses echo the command and lead with a
//! `u32` error code (0 = OK).

use snafu::Snafu;

use crate::types::{EventId, EventMask, HandleId, LockMode, LockStatus, OpenFlags, SessionId};

/// Cap on decoded byte strings; anything larger than a frame is malformed.
const MAX_BYTES: usize = 64 * 1024;

/// Command codes shared by requests and their response echoes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Handshake = 1,
    Keepalive = 2,
    Open = 3,
    Close = 4,
    Mkdir = 5,
    Delete = 6,
    AttrSet = 7,
    AttrGet = 8,
    AttrDel = 9,
    Exists = 10,
    Lock = 11,
    Release = 12,
}

impl TryFrom<u16> for Command {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        use Command::*;
        Ok(match value {
            1 => Handshake,
            2 => Keepalive,
            3 => Open,
            4 => Close,
            5 => Mkdir,
            6 => Delete,
            7 => AttrSet,
            8 => AttrGet,
            9 => AttrDel,
            10 => Exists,
            11 => Lock,
            12 => Release,
            other => return Err(CodecError::UnknownCommand { code: other }),
        })
    }
}

/// Codec failures; all map to a protocol error on the response path.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CodecError {
    #[snafu(display("message truncated"))]
    Truncated,
    #[snafu(display("unknown command code {code}"))]
    UnknownCommand { code: u16 },
    #[snafu(display("byte string of {len} bytes exceeds frame limit"))]
    Oversize { len: u32 },
    #[snafu(display("string is not valid utf-8"))]
    InvalidUtf8,
    #[snafu(display("invalid lock mode {value}"))]
    InvalidLockMode { value: u32 },
    #[snafu(display("invalid lock status {value}"))]
    InvalidLockStatus { value: u32 },
    #[snafu(display("{extra} trailing bytes after message"))]
    TrailingBytes { extra: usize },
}

/// A decoded request: session id plus the command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub session: SessionId,
    pub body: RequestBody,
}

/// Command-specific request payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Handshake,
    Keepalive { last_acked_event: EventId },
    Open { name: String, flags: OpenFlags, event_mask: EventMask },
    Close { handle: HandleId },
    Mkdir { name: String },
    Delete { name: String },
    AttrSet { handle: HandleId, attr: String, value: Vec<u8> },
    AttrGet { handle: HandleId, attr: String },
    AttrDel { handle: HandleId, attr: String },
    Exists { name: String },
    Lock { handle: HandleId, mode: LockMode, try_acquire: bool },
    Release { handle: HandleId },
}

impl Request {
    /// The command code this request encodes as.
    pub fn command(&self) -> Command {
        match self.body {
            RequestBody::Handshake => Command::Handshake,
            RequestBody::Keepalive { .. } => Command::Keepalive,
            RequestBody::Open { .. } => Command::Open,
            RequestBody::Close { .. } => Command::Close,
            RequestBody::Mkdir { .. } => Command::Mkdir,
            RequestBody::Delete { .. } => Command::Delete,
            RequestBody::AttrSet { .. } => Command::AttrSet,
            RequestBody::AttrGet { .. } => Command::AttrGet,
            RequestBody::AttrDel { .. } => Command::AttrDel,
            RequestBody::Exists { .. } => Command::Exists,
            RequestBody::Lock { .. } => Command::Lock,
            RequestBody::Release { .. } => Command::Release,
        }
    }
}

/// One queued notification as carried in a keep-alive reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireNotification {
    pub event_id: EventId,
    pub handle: HandleId,
    pub mask: u32,
    pub payload: Vec<u8>,
}

/// Responses. Success variants imply their command; `Ok` covers the
/// commands whose replies carry no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error { command: u16, code: u32 },
    Handshake { session: SessionId, generation: u32 },
    Keepalive { lease_remaining_ms: u64, notifications: Vec<WireNotification> },
    Open { handle: HandleId, created: bool },
    AttrGet { value: Vec<u8> },
    Exists { exists: bool },
    Lock { status: LockStatus, generation: u64 },
    Ok { command: Command },
}

// ============================================================================
// Encoding
// ============================================================================

fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, value: &[u8]) {
    put_u32(buf, value.len() as u32);
    buf.extend_from_slice(value);
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Encode a request frame.
pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut buf = Vec::new();
    put_u16(&mut buf, request.command() as u16);
    put_u64(&mut buf, request.session);
    match &request.body {
        RequestBody::Handshake => {}
        RequestBody::Keepalive { last_acked_event } => {
            put_u64(&mut buf, *last_acked_event);
        }
        RequestBody::Open { name, flags, event_mask } => {
            put_string(&mut buf, name);
            put_u32(&mut buf, flags.bits());
            put_u32(&mut buf, event_mask.bits());
        }
        RequestBody::Close { handle } | RequestBody::Release { handle } => {
            put_u64(&mut buf, *handle);
        }
        RequestBody::Mkdir { name }
        | RequestBody::Delete { name }
        | RequestBody::Exists { name } => {
            put_string(&mut buf, name);
        }
        RequestBody::AttrSet { handle, attr, value } => {
            put_u64(&mut buf, *handle);
            put_string(&mut buf, attr);
            put_bytes(&mut buf, value);
        }
        RequestBody::AttrGet { handle, attr } | RequestBody::AttrDel { handle, attr } => {
            put_u64(&mut buf, *handle);
            put_string(&mut buf, attr);
        }
        RequestBody::Lock { handle, mode, try_acquire } => {
            put_u64(&mut buf, *handle);
            put_u32(&mut buf, mode.to_wire());
            put_u8(&mut buf, u8::from(*try_acquire));
        }
    }
    buf
}

/// Encode a response frame.
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut buf = Vec::new();
    match response {
        Response::Error { command, code } => {
            put_u16(&mut buf, *command);
            put_u32(&mut buf, *code);
        }
        Response::Handshake { session, generation } => {
            put_u16(&mut buf, Command::Handshake as u16);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, *session);
            put_u32(&mut buf, *generation);
        }
        Response::Keepalive { lease_remaining_ms, notifications } => {
            put_u16(&mut buf, Command::Keepalive as u16);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, *lease_remaining_ms);
            put_u32(&mut buf, notifications.len() as u32);
            for notification in notifications {
                put_u64(&mut buf, notification.event_id);
                put_u64(&mut buf, notification.handle);
                put_u32(&mut buf, notification.mask);
                put_bytes(&mut buf, &notification.payload);
            }
        }
        Response::Open { handle, created } => {
            put_u16(&mut buf, Command::Open as u16);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, *handle);
            put_u8(&mut buf, u8::from(*created));
        }
        Response::AttrGet { value } => {
            put_u16(&mut buf, Command::AttrGet as u16);
            put_u32(&mut buf, 0);
            put_bytes(&mut buf, value);
        }
        Response::Exists { exists } => {
            put_u16(&mut buf, Command::Exists as u16);
            put_u32(&mut buf, 0);
            put_u8(&mut buf, u8::from(*exists));
        }
        Response::Lock { status, generation } => {
            put_u16(&mut buf, Command::Lock as u16);
            put_u32(&mut buf, 0);
            put_u32(&mut buf, status.to_wire());
            put_u64(&mut buf, *generation);
        }
        Response::Ok { command } => {
            put_u16(&mut buf, *command as u16);
            put_u32(&mut buf, 0);
        }
    }
    buf
}

// ============================================================================
// Decoding
// ============================================================================

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()?;
        if len as usize > MAX_BYTES {
            return Err(CodecError::Oversize { len });
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_lock_mode(&mut self) -> Result<LockMode, CodecError> {
        let raw = self.read_u32()?;
        LockMode::from_wire(raw).ok_or(CodecError::InvalidLockMode { value: raw })
    }

    fn finish(&self) -> Result<(), CodecError> {
        let extra = self.buf.len() - self.pos;
        if extra != 0 {
            return Err(CodecError::TrailingBytes { extra });
        }
        Ok(())
    }
}

/// Decode a request frame.
pub fn decode_request(buf: &[u8]) -> Result<Request, CodecError> {
    let mut cursor = Cursor::new(buf);
    let command = Command::try_from(cursor.read_u16()?)?;
    let session = cursor.read_u64()?;
    let body = match command {
        Command::Handshake => RequestBody::Handshake,
        Command::Keepalive => RequestBody::Keepalive {
            last_acked_event: cursor.read_u64()?,
        },
        Command::Open => RequestBody::Open {
            name: cursor.read_string()?,
            flags: OpenFlags::from_bits_truncate(cursor.read_u32()?),
            event_mask: EventMask::from_bits_truncate(cursor.read_u32()?),
        },
        Command::Close => RequestBody::Close { handle: cursor.read_u64()? },
        Command::Mkdir => RequestBody::Mkdir { name: cursor.read_string()? },
        Command::Delete => RequestBody::Delete { name: cursor.read_string()? },
        Command::AttrSet => RequestBody::AttrSet {
            handle: cursor.read_u64()?,
            attr: cursor.read_string()?,
            value: cursor.read_bytes()?,
        },
        Command::AttrGet => RequestBody::AttrGet {
            handle: cursor.read_u64()?,
            attr: cursor.read_string()?,
        },
        Command::AttrDel => RequestBody::AttrDel {
            handle: cursor.read_u64()?,
            attr: cursor.read_string()?,
        },
        Command::Exists => RequestBody::Exists { name: cursor.read_string()? },
        Command::Lock => RequestBody::Lock {
            handle: cursor.read_u64()?,
            mode: cursor.read_lock_mode()?,
            try_acquire: cursor.read_u8()? != 0,
        },
        Command::Release => RequestBody::Release { handle: cursor.read_u64()? },
    };
    cursor.finish()?;
    Ok(Request { session, body })
}

/// Decode a response frame. Used by clients and tests.
pub fn decode_response(buf: &[u8]) -> Result<Response, CodecError> {
    let mut cursor = Cursor::new(buf);
    let raw_command = cursor.read_u16()?;
    let code = cursor.read_u32()?;
    if code != 0 {
        cursor.finish()?;
        return Ok(Response::Error { command: raw_command, code });
    }
    let command = Command::try_from(raw_command)?;
    let response = match command {
        Command::Handshake => Response::Handshake {
            session: cursor.read_u64()?,
            generation: cursor.read_u32()?,
        },
        Command::Keepalive => {
            let lease_remaining_ms = cursor.read_u64()?;
            let count = cursor.read_u32()?;
            if count as usize > MAX_BYTES {
                return Err(CodecError::Oversize { len: count });
            }
            let mut notifications = Vec::with_capacity(count as usize);
            for _ in 0..count {
                notifications.push(WireNotification {
                    event_id: cursor.read_u64()?,
                    handle: cursor.read_u64()?,
                    mask: cursor.read_u32()?,
                    payload: cursor.read_bytes()?,
                });
            }
            Response::Keepalive { lease_remaining_ms, notifications }
        }
        Command::Open => Response::Open {
            handle: cursor.read_u64()?,
            created: cursor.read_u8()? != 0,
        },
        Command::AttrGet => Response::AttrGet { value: cursor.read_bytes()? },
        Command::Exists => Response::Exists { exists: cursor.read_u8()? != 0 },
        Command::Lock => {
            let raw = cursor.read_u32()?;
            let status = LockStatus::from_wire(raw)
                .ok_or(CodecError::InvalidLockStatus { value: raw })?;
            Response::Lock { status, generation: cursor.read_u64()? }
        }
        Command::Close
        | Command::Mkdir
        | Command::Delete
        | Command::AttrSet
        | Command::AttrDel
        | Command::Release => Response::Ok { command },
    };
    cursor.finish()?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(request: Request) {
        let encoded = encode_request(&request);
        let decoded = decode_request(&encoded).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn request_roundtrip_open() {
        roundtrip_request(Request {
            session: 7,
            body: RequestBody::Open {
                name: "/ranges/r42".to_string(),
                flags: OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::LOCK,
                event_mask: EventMask::LOCK_ACQUIRED | EventMask::LOCK_RELEASED,
            },
        });
    }

    #[test]
    fn request_roundtrip_attr_set() {
        roundtrip_request(Request {
            session: 3,
            body: RequestBody::AttrSet {
                handle: 12,
                attr: "location".to_string(),
                value: vec![0, 1, 2, 0xff],
            },
        });
    }

    #[test]
    fn request_roundtrip_lock() {
        roundtrip_request(Request {
            session: 1,
            body: RequestBody::Lock {
                handle: 9,
                mode: LockMode::Exclusive,
                try_acquire: true,
            },
        });
    }

    #[test]
    fn request_roundtrip_keepalive() {
        roundtrip_request(Request {
            session: 5,
            body: RequestBody::Keepalive { last_acked_event: 77 },
        });
    }

    #[test]
    fn response_roundtrip_keepalive_with_notifications() {
        let response = Response::Keepalive {
            lease_remaining_ms: 12_345,
            notifications: vec![
                WireNotification {
                    event_id: 1,
                    handle: 4,
                    mask: EventMask::CHILD_NODE_ADDED.bits(),
                    payload: b"r42".to_vec(),
                },
                WireNotification {
                    event_id: 2,
                    handle: 4,
                    mask: EventMask::LOCK_RELEASED.bits(),
                    payload: Vec::new(),
                },
            ],
        };
        let encoded = encode_response(&response);
        assert_eq!(decode_response(&encoded).expect("decode"), response);
    }

    #[test]
    fn response_roundtrip_error() {
        let response = Response::Error { command: Command::Open as u16, code: 4 };
        let encoded = encode_response(&response);
        assert_eq!(decode_response(&encoded).expect("decode"), response);
    }

    #[test]
    fn response_roundtrip_lock() {
        let response = Response::Lock { status: LockStatus::Granted, generation: 17 };
        let encoded = encode_response(&response);
        assert_eq!(decode_response(&encoded).expect("decode"), response);
    }

    #[test]
    fn truncated_request_rejected() {
        let request = Request {
            session: 1,
            body: RequestBody::Mkdir { name: "/a".to_string() },
        };
        let encoded = encode_request(&request);
        for len in 0..encoded.len() {
            assert!(decode_request(&encoded[..len]).is_err(), "prefix of {len} bytes accepted");
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = encode_request(&Request {
            session: 1,
            body: RequestBody::Handshake,
        });
        encoded.push(0);
        assert_eq!(decode_request(&encoded), Err(CodecError::TrailingBytes { extra: 1 }));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut buf = Vec::new();
        put_u16(&mut buf, 999);
        put_u64(&mut buf, 1);
        assert_eq!(decode_request(&buf), Err(CodecError::UnknownCommand { code: 999 }));
    }

    #[test]
    fn oversize_string_rejected() {
        let mut buf = Vec::new();
        put_u16(&mut buf, Command::Mkdir as u16);
        put_u64(&mut buf, 1);
        put_u32(&mut buf, u32::MAX);
        assert!(matches!(decode_request(&buf), Err(CodecError::Oversize { .. })));
    }

    #[test]
    fn invalid_lock_mode_rejected() {
        let mut buf = Vec::new();
        put_u16(&mut buf, Command::Lock as u16);
        put_u64(&mut buf, 1);
        put_u64(&mut buf, 2);
        put_u32(&mut buf, 9);
        put_u8(&mut buf, 0);
        assert_eq!(decode_request(&buf), Err(CodecError::InvalidLockMode { value: 9 }));
    }
}
