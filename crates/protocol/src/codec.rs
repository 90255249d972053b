//! Length-prefixed frame codec.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+--------+-------------------+
//! | len: u32 (BE)  | format | payload (len - 1) |
//! +----------------+--------+-------------------+
//! ```
//!
//! `len` counts the format byte and the payload. The format byte says how the
//! payload is encoded, so a decoder accepts frames in either format no matter
//! which one it writes.

use bincode::Options;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Default upper bound on `len`.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Payload encoding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// Compact binary. Both ends must run the same message schema.
    Bincode,
    /// Self-describing; unknown fields are ignored on decode. The default, so
    /// peers on a newer schema can still talk to older ones.
    #[default]
    Json,
}

impl WireFormat {
    fn tag(self) -> u8 {
        match self {
            WireFormat::Bincode => 0,
            WireFormat::Json => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(WireFormat::Bincode),
            1 => Ok(WireFormat::Json),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" | "binary" => Ok(WireFormat::Bincode),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}

/// Encodes and decodes frames for any serde type.
#[derive(Copy, Clone, Debug)]
pub struct FrameCodec {
    format: WireFormat,
    max_frame: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(WireFormat::default())
    }
}

impl FrameCodec {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    fn bincode(&self) -> impl Options {
        bincode::DefaultOptions::new().with_limit(self.max_frame as u64)
    }

    /// Encodes `msg` as one complete frame.
    pub fn encode<T: Serialize>(&self, msg: &T) -> Result<Bytes, CodecError> {
        let mut dst = BytesMut::new();
        self.encode_into(msg, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Appends one frame for `msg` to `dst`.
    pub fn encode_into<T: Serialize>(&self, msg: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = match self.format {
            WireFormat::Bincode => self.bincode().serialize(msg)?,
            WireFormat::Json => serde_json::to_vec(msg)?,
        };
        let len = payload.len() + 1;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: len,
                limit: self.max_frame,
            });
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_u32(len as u32);
        dst.put_u8(self.format.tag());
        dst.put_slice(&payload);
        Ok(())
    }

    /// Takes one frame off the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a whole frame; the
    /// buffer is left untouched in that case.
    pub fn decode<T: DeserializeOwned>(&self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: len,
                limit: self.max_frame,
            });
        }
        if len == 0 {
            src.advance(HEADER_LEN);
            return Err(CodecError::EmptyFrame);
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let frame = src.split_to(len);
        let format = WireFormat::from_tag(frame[0])?;
        self.decode_payload(format, &frame[1..]).map(Some)
    }

    fn decode_payload<T: DeserializeOwned>(
        &self,
        format: WireFormat,
        payload: &[u8],
    ) -> Result<T, CodecError> {
        match format {
            WireFormat::Bincode => Ok(self.bincode().deserialize(payload)?),
            WireFormat::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}
