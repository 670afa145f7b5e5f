//! Compression envelope applied after serialization and before deserialization

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};

use crate::error::{Result, RoomcastError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Identity
    #[default]
    None,
    Gzip,
    /// Raw deflate stream, no zlib header
    Deflate,
    /// Snappy framing format
    Snappy,
}

impl Compression {
    pub fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let out = match self {
            Self::None => return Ok(Cow::Borrowed(data)),
            Self::Snappy if data.is_empty() => return Ok(Cow::Borrowed(data)),
            Self::Gzip => gzip(data),
            Self::Deflate => deflate(data),
            Self::Snappy => snappy(data),
        };
        out.map(Cow::Owned)
            .map_err(|e| RoomcastError::Compression(format!("{} compress: {}", self, e)))
    }

    pub fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let out = match self {
            Self::None => return Ok(Cow::Borrowed(data)),
            Self::Snappy if data.is_empty() => return Ok(Cow::Borrowed(data)),
            Self::Gzip => read_all(GzDecoder::new(data)),
            Self::Deflate => read_all(DeflateDecoder::new(data)),
            Self::Snappy => read_all(snap::read::FrameDecoder::new(data)),
        };
        out.map(Cow::Owned)
            .map_err(|e| RoomcastError::Compression(format!("{} decompress: {}", self, e)))
    }
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn snappy(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = snap::write::FrameEncoder::new(Vec::new());
    encoder.write_all(data)?;
    encoder
        .into_inner()
        .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
}

fn read_all<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

impl FromStr for Compression {
    type Err = RoomcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "deflate" | "flate" => Ok(Self::Deflate),
            "snappy" => Ok(Self::Snappy),
            other => Err(RoomcastError::ConfigError(format!(
                "unknown compression '{}', expected none, gzip, deflate or snappy",
                other
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Snappy => "snappy",
        };
        f.write_str(name)
    }
}
