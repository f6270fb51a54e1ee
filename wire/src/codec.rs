//! Binary codec for the session/proxy wire protocol.
//!
//! Integers are little-endian and fixed-width. Strings are a `u64` byte
//! length followed by raw UTF-8, no terminator. Sequences are a `u64` element
//! count followed by the elements. Aggregates are their fields concatenated
//! in declared order; [`Action`] prefixes its tag byte and always carries a
//! `Command` payload ([`Action::Drop`] encodes an empty placeholder) so that
//! both directions decode symmetrically.
//!
//! Decoding exists twice with identical semantics: blocking, over any
//! [`std::io::Read`] pull source, and (behind the `async` feature)
//! non-blocking, over any [`tokio::io::AsyncRead`]. A decode consumes exactly
//! the bytes its encode produced.

use std::io::Read;

use crate::model::{Action, Command, Request};

/// Upper bound for one string payload. A peer announcing more than this is
/// broken or hostile, not large.
const MAX_PAYLOAD_BYTES: u64 = 1 << 26;

/// Upper bound for one sequence's element count.
const MAX_SEQUENCE_LEN: u64 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown {kind} tag: {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },

    #[error("declared {kind} length {len} exceeds protocol limit")]
    Oversize { kind: &'static str, len: u64 },
}

pub type Result<T> = std::result::Result<T, WireError>;

/// A value that can be appended to an outgoing message buffer.
pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);
}

/// A value that can be decoded from a blocking pull source.
pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> Result<Self>;
}

/// Encode a single value into a fresh buffer.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

macro_rules! int_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl Decode for $ty {
            fn decode<R: Read>(reader: &mut R) -> Result<Self> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                reader.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    )*};
}

int_codec!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Encode for str {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u64).encode(out);
        out.extend_from_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.as_str().encode(out);
    }
}

impl Decode for String {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = u64::decode(reader)?;
        if len > MAX_PAYLOAD_BYTES {
            return Err(WireError::Oversize { kind: "string", len });
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u64).encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let count = u64::decode(reader)?;
        if count > MAX_SEQUENCE_LEN {
            return Err(WireError::Oversize {
                kind: "sequence",
                len: count,
            });
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl Encode for Command {
    fn encode(&self, out: &mut Vec<u8>) {
        self.cwd.encode(out);
        self.executable.encode(out);
        self.args.encode(out);
        self.env.encode(out);
    }
}

impl Decode for Command {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Command {
            cwd: String::decode(reader)?,
            executable: String::decode(reader)?,
            args: Vec::decode(reader)?,
            env: Vec::decode(reader)?,
        })
    }
}

impl Encode for Action {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tag().encode(out);
        match self {
            Action::Drop => Command::default().encode(out),
            Action::Inject(cmd) | Action::Wrap(cmd) => cmd.encode(out),
        }
    }
}

impl Decode for Action {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = u8::decode(reader)?;
        let cmd = Command::decode(reader)?;
        match tag {
            0 => Ok(Action::Drop),
            1 => Ok(Action::Inject(cmd)),
            2 => Ok(Action::Wrap(cmd)),
            _ => Err(WireError::UnknownTag {
                kind: "action",
                tag,
            }),
        }
    }
}

impl Encode for Request {
    fn encode(&self, out: &mut Vec<u8>) {
        (*self as u8).encode(out);
    }
}

impl Decode for Request {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = u8::decode(reader)?;
        Request::from_tag(tag).ok_or(WireError::UnknownTag {
            kind: "request",
            tag,
        })
    }
}

/// Non-blocking decoding, field for field identical to [`Decode`].
#[cfg(feature = "async")]
pub mod asynch {
    use tokio::io::{AsyncRead, AsyncReadExt};

    use super::{Result, WireError, MAX_PAYLOAD_BYTES, MAX_SEQUENCE_LEN};
    use crate::model::{Action, Command, IpcId, Request};

    pub async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_u64<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).await?;
        Ok(u64::from_le_bytes(buf))
    }

    pub async fn read_i64<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i64> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).await?;
        Ok(i64::from_le_bytes(buf))
    }

    pub async fn read_id<R: AsyncRead + Unpin>(reader: &mut R) -> Result<IpcId> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await?;
        Ok(IpcId::from_le_bytes(buf))
    }

    pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
        let len = read_u64(reader).await?;
        if len > MAX_PAYLOAD_BYTES {
            return Err(WireError::Oversize { kind: "string", len });
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        String::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)
    }

    pub async fn read_string_seq<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
        let count = read_u64(reader).await?;
        if count > MAX_SEQUENCE_LEN {
            return Err(WireError::Oversize {
                kind: "sequence",
                len: count,
            });
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(read_string(reader).await?);
        }
        Ok(items)
    }

    pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Command> {
        Ok(Command {
            cwd: read_string(reader).await?,
            executable: read_string(reader).await?,
            args: read_string_seq(reader).await?,
            env: read_string_seq(reader).await?,
        })
    }

    pub async fn read_action<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Action> {
        let tag = read_u8(reader).await?;
        let cmd = read_command(reader).await?;
        match tag {
            0 => Ok(Action::Drop),
            1 => Ok(Action::Inject(cmd)),
            2 => Ok(Action::Wrap(cmd)),
            _ => Err(WireError::UnknownTag {
                kind: "action",
                tag,
            }),
        }
    }

    pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request> {
        let tag = read_u8(reader).await?;
        Request::from_tag(tag).ok_or(WireError::UnknownTag {
            kind: "request",
            tag,
        })
    }
}
