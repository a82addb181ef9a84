//! Content addressing: digests, codecs and MIME inference.
//!
//! Everything here is pure. The codec name is persisted with each artifact, so
//! restores always pick the decompressor the bytes were written with.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArchiveError, Result};

/// Default compression level, shared by both codecs.
pub const DEFAULT_LEVEL: i32 = 9;

/// Hex SHA-256 of `bytes`.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Zstd,
    Zlib,
}

impl Codec {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Zlib => "zlib",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" | "zstandard" => Ok(Self::Zstd),
            "zlib" => Ok(Self::Zlib),
            other => Err(ArchiveError::UnsupportedCodec(other.to_string())),
        }
    }
}

/// Compress `bytes` with `codec`. zlib levels are clamped to 0..=9.
pub fn compress(bytes: &[u8], codec: Codec, level: i32) -> Result<Vec<u8>> {
    match codec {
        Codec::Zstd => Ok(zstd::encode_all(bytes, level)?),
        Codec::Zlib => {
            let level = u32::try_from(level.clamp(0, 9)).unwrap_or(6);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(bytes)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompress `bytes` written by the codec named `codec`.
pub fn decompress(bytes: &[u8], codec: &str) -> Result<Vec<u8>> {
    let parsed: Codec = codec.parse()?;
    let failed = |e: std::io::Error| ArchiveError::Decompression {
        codec: parsed.to_string(),
        reason: e.to_string(),
    };
    match parsed {
        Codec::Zstd => zstd::decode_all(bytes).map_err(failed),
        Codec::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(failed)?;
            Ok(out)
        }
    }
}

const MIME_TABLE: &[(&str, &str)] = &[
    ("py", "text/x-python"),
    ("rs", "text/x-rust"),
    ("go", "text/x-go"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("ts", "text/x-typescript"),
    ("java", "text/x-java"),
    ("c", "text/x-c"),
    ("h", "text/x-c"),
    ("cpp", "text/x-c++"),
    ("sh", "application/x-sh"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("rst", "text/x-rst"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("toml", "application/toml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("sql", "application/sql"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("wasm", "application/wasm"),
];

/// MIME type by file extension, `application/octet-stream` when unknown.
#[must_use]
pub fn guess_mime(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .and_then(|ext| {
            MIME_TABLE
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let d = digest(b"print(1)");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, digest(b"print(1)"));
        assert_ne!(d, digest(b"print(2)"));
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_both_codecs_round_trip() {
        let data = b"fn main() { println!(\"hi\"); }\n".repeat(20);
        for codec in [Codec::Zstd, Codec::Zlib] {
            let packed = compress(&data, codec, DEFAULT_LEVEL).unwrap();
            assert!(packed.len() < data.len());
            assert_eq!(decompress(&packed, codec.as_str()).unwrap(), data);
        }
    }

    #[test]
    fn test_unknown_codec_is_unsupported() {
        assert!(matches!(
            decompress(b"abc", "lz4"),
            Err(ArchiveError::UnsupportedCodec(name)) if name == "lz4"
        ));
        assert!("brotli".parse::<Codec>().is_err());
    }

    #[test]
    fn test_corrupt_bytes_fail_decompression() {
        assert!(matches!(
            decompress(b"definitely not zstd", "zstd"),
            Err(ArchiveError::Decompression { .. })
        ));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("src/old.py")), "text/x-python");
        assert_eq!(guess_mime(Path::new("README.MD")), "text/markdown");
        assert_eq!(guess_mime(Path::new("blob")), "application/octet-stream");
    }
}
