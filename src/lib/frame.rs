//! ## Binary Frame Codec
//!
//! Every message of the binary dialect is a single frame: a fixed 14-byte big-endian header,
//! followed by a routing `path`, a `socket` identifier and an opaque payload.
//!
//! | offset | size | field                |
//! |--------|------|----------------------|
//! | 0      | 1    | `version`            |
//! | 1      | 1    | `type`               |
//! | 2      | 4    | `id`                 |
//! | 6      | 2    | `status_code`        |
//! | 8      | 1    | path length          |
//! | 9      | 1    | socket length        |
//! | 10     | 2    | `heartbeat.interval` |
//! | 12     | 2    | `heartbeat.timeout`  |
//!
//! The payload is every byte after the socket and is interpreted by [`crate::codecs`] based on the
//! frame path.
use std::{convert::TryFrom, fmt};

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 14;
/// Longest `path` a frame may carry.
pub const MAX_PATH_LENGTH: usize = 100;
/// Longest `socket` a frame may carry.
pub const MAX_SOCKET_LENGTH: usize = 100;
/// Status code of a successful response.
pub const STATUS_OK: u16 = 200;
/// Status code used for application errors.
pub const STATUS_APPLICATION_ERROR: u16 = 499;

/// The kind of a frame, stored in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Hello = 0,
    Ping = 1,
    Update = 2,
    Request = 3,
    Undefined = 9,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Hello),
            1 => Ok(FrameType::Ping),
            2 => Ok(FrameType::Update),
            3 => Ok(FrameType::Request),
            9 => Ok(FrameType::Undefined),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Hello => "hello",
            FrameType::Ping => "ping",
            FrameType::Update => "update",
            FrameType::Request => "request",
            FrameType::Undefined => "undefined",
        };
        write!(f, "{name}")
    }
}

/// Keep-alive parameters negotiated in hello frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: u16,
    pub timeout: u16,
}

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed header.
    TooShort(usize),
    /// The type byte is not one of the known [`FrameType`]s.
    UnknownType(u8),
    /// Declared path length is over the limit or runs past the buffer.
    InvalidPathLength { declared: usize, available: usize },
    /// Declared socket length is over the limit or runs past the buffer.
    InvalidSocketLength { declared: usize, available: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FrameError::*;
        match self {
            TooShort(len) => write!(
                f,
                "Frame of {len} bytes is shorter than the {FRAME_HEADER_SIZE} byte header"
            ),
            UnknownType(t) => write!(f, "Unknown frame type `{t}`"),
            InvalidPathLength {
                declared,
                available,
            } => write!(
                f,
                "Invalid path length `{declared}` (max {MAX_PATH_LENGTH}, {available} bytes available)"
            ),
            InvalidSocketLength {
                declared,
                available,
            } => write!(
                f,
                "Invalid socket length `{declared}` (max {MAX_SOCKET_LENGTH}, {available} bytes available)"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// A decoded binary dialect frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub frame_type: FrameType,
    pub id: u32,
    pub status_code: u16,
    pub path: String,
    pub socket: String,
    pub heartbeat: Heartbeat,
    pub payload: Vec<u8>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            version: 0,
            frame_type: FrameType::Undefined,
            id: 1,
            status_code: STATUS_OK,
            path: String::new(),
            socket: String::new(),
            heartbeat: Heartbeat::default(),
            payload: Vec::new(),
        }
    }
}

impl Frame {
    /// Builds a request frame for `path`.
    pub fn request(id: u32, path: &str, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Request,
            id,
            path: path.to_string(),
            payload,
            ..Default::default()
        }
    }

    /// Builds the response to request `id`.
    pub fn response(id: u32, status_code: u16, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Request,
            id,
            status_code,
            payload,
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Self {
            frame_type: FrameType::Ping,
            ..Default::default()
        }
    }

    pub fn hello(id: u32, version: u8) -> Self {
        Self {
            frame_type: FrameType::Hello,
            id,
            version,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// Serializes the frame.
    ///
    /// Paths and sockets longer than their limits are cut at the limit so the output always
    /// decodes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let path = truncate(&self.path, MAX_PATH_LENGTH).as_bytes();
        let socket = truncate(&self.socket, MAX_SOCKET_LENGTH).as_bytes();

        let mut bytes =
            Vec::with_capacity(FRAME_HEADER_SIZE + path.len() + socket.len() + self.payload.len());
        bytes.push(self.version);
        bytes.push(self.frame_type as u8);
        bytes.extend_from_slice(&self.id.to_be_bytes());
        bytes.extend_from_slice(&self.status_code.to_be_bytes());
        bytes.push(path.len() as u8);
        bytes.push(socket.len() as u8);
        bytes.extend_from_slice(&self.heartbeat.interval.to_be_bytes());
        bytes.extend_from_slice(&self.heartbeat.timeout.to_be_bytes());
        bytes.extend_from_slice(path);
        bytes.extend_from_slice(socket);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parses a frame, validating the header and both length-prefixed strings.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let version = bytes[0];
        let frame_type = FrameType::try_from(bytes[1])?;
        let id = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let status_code = u16::from_be_bytes([bytes[6], bytes[7]]);
        let path_len = bytes[8] as usize;
        let socket_len = bytes[9] as usize;
        let heartbeat = Heartbeat {
            interval: u16::from_be_bytes([bytes[10], bytes[11]]),
            timeout: u16::from_be_bytes([bytes[12], bytes[13]]),
        };

        let rest = &bytes[FRAME_HEADER_SIZE..];
        if path_len > MAX_PATH_LENGTH || path_len > rest.len() {
            return Err(FrameError::InvalidPathLength {
                declared: path_len,
                available: rest.len(),
            });
        }
        let (path, rest) = rest.split_at(path_len);

        if socket_len > MAX_SOCKET_LENGTH || socket_len > rest.len() {
            return Err(FrameError::InvalidSocketLength {
                declared: socket_len,
                available: rest.len(),
            });
        }
        let (socket, payload) = rest.split_at(socket_len);

        Ok(Self {
            version,
            frame_type,
            id,
            status_code,
            path: String::from_utf8_lossy(path).into_owned(),
            socket: String::from_utf8_lossy(socket).into_owned(),
            heartbeat,
            payload: payload.to_vec(),
        })
    }
}

/// The longest prefix of `text` that fits in `limit` bytes without splitting a character.
fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(type: {}, id: {}, status: {}, path: {:?}, payload: {} bytes)",
            self.frame_type,
            self.id,
            self.status_code,
            self.path,
            self.payload.len()
        )
    }
}
