//! duo wire frames.
//!
//! Every frame on the stream is length-prefixed TLV:
//!
//! ```text
//! +----------------+---------+----------------------+
//! | length: u32 BE | type u8 | body (length - 1 B)  |
//! +----------------+---------+----------------------+
//! ```
//!
//! `length` covers the type byte and the body. A TEXT body is UTF-8, an INT
//! body is exactly eight bytes of big-endian `i64`. The explicit length means
//! a body may contain any byte sequence, including ones that look like a
//! header.

use std::fmt;
use thiserror::Error;

/// TEXT frame type: UTF-8 string body.
pub const TYPE_TEXT: u8 = 0x01;
/// INT frame type: 8-byte big-endian `i64` body.
pub const TYPE_INT: u8 = 0x02;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum value of the length prefix (type byte + body), 64 KiB.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Maximum TEXT body size in bytes.
pub const MAX_TEXT_LEN: usize = MAX_FRAME_LEN - 1;

const INT_BODY_LEN: usize = 8;

/// A single logical value carried by one frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frame {
    /// A string value.
    Text(String),
    /// A small integer value (auth results use `0` and `1`).
    Int(i64),
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The length prefix or body is shorter than the frame type requires.
    #[error("frame too short: expected {expected}, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
    /// The declared or encoded frame length exceeds [`MAX_FRAME_LEN`].
    #[error("frame too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed length.
        max: usize,
        /// Offending length.
        actual: usize,
    },
    /// The type byte does not match any known frame type.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),
    /// A TEXT body was not valid UTF-8.
    #[error("text frame is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// An INT body was not exactly eight bytes.
    #[error("int frame body must be 8 bytes, got {0}")]
    BadIntLength(usize),
    /// The underlying stream failed, or closed in the middle of a frame.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Frame {
    /// Creates a `Text` frame.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Creates an `Int` frame.
    #[must_use]
    pub const fn int(n: i64) -> Self {
        Self::Int(n)
    }

    /// Returns the wire type byte for this frame.
    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        match self {
            Self::Text(_) => TYPE_TEXT,
            Self::Int(_) => TYPE_INT,
        }
    }

    /// Returns the string if this is a `Text` frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// Returns the integer if this is an `Int` frame.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Length of the type byte plus body, i.e. the value of the length prefix.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Text(s) => 1 + s.len(),
            Self::Int(_) => 1 + INT_BODY_LEN,
        }
    }

    /// Serializes this frame, including its length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if a text body exceeds [`MAX_TEXT_LEN`].
    ///
    /// # Examples
    ///
    /// ```
    /// use duo_common::frame::{Frame, TYPE_TEXT};
    /// let bytes = Frame::text("hi").serialize().unwrap();
    /// assert_eq!(bytes, [0, 0, 0, 3, TYPE_TEXT, b'h', b'i']);
    /// ```
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        let mut v = Vec::with_capacity(HEADER_LEN + self.wire_len());
        self.write_to(&mut v)?;
        Ok(v)
    }

    /// Appends the serialized frame to `dst`.
    pub(crate) fn write_to(&self, dst: &mut impl Extend<u8>) -> Result<(), FrameError> {
        let len = self.wire_len();
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                max: MAX_FRAME_LEN,
                actual: len,
            });
        }
        // MAX_FRAME_LEN fits in u32
        let prefix = u32::try_from(len).map_err(|_| FrameError::TooLarge {
            max: MAX_FRAME_LEN,
            actual: len,
        })?;
        dst.extend(prefix.to_be_bytes());
        dst.extend([self.frame_type()]);
        match self {
            Self::Text(s) => dst.extend(s.bytes()),
            Self::Int(n) => dst.extend(n.to_be_bytes()),
        }
        Ok(())
    }

    /// Parses the bytes that follow a length prefix (type byte + body).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the data is empty, carries an unknown type,
    /// or has a body that does not match its type.
    ///
    /// # Examples
    ///
    /// ```
    /// use duo_common::frame::{Frame, TYPE_INT};
    /// let mut body = vec![TYPE_INT];
    /// body.extend_from_slice(&1i64.to_be_bytes());
    /// assert_eq!(Frame::parse(&body).unwrap(), Frame::Int(1));
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let Some((&kind, body)) = data.split_first() else {
            return Err(FrameError::TooShort {
                expected: 1,
                actual: 0,
            });
        };
        match kind {
            TYPE_TEXT => Ok(Self::Text(String::from_utf8(body.to_vec())?)),
            TYPE_INT => {
                let bytes: [u8; INT_BODY_LEN] = body
                    .try_into()
                    .map_err(|_| FrameError::BadIntLength(body.len()))?;
                Ok(Self::Int(i64::from_be_bytes(bytes)))
            }
            t => Err(FrameError::UnknownType(t)),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}
