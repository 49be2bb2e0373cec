use std::{
    fmt::{self, Display},
    io::{self, BufRead, BufReader, Read, Write},
};

use flate2::read::MultiGzDecoder;
use tracing::trace;

use crate::{ImageError, ImageResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const BZIP2_MAGIC: &[u8] = b"BZh";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A compression format, as recognized from a stream's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No recognized compression; the stream is used as is
    None,

    /// gzip, possibly with several members
    Gzip,

    /// Zstandard
    Zstd,

    /// xz
    Xz,

    /// bzip2
    Bzip2,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Compression {
    /// Detects the compression format from the first bytes of a stream.
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if header.starts_with(ZSTD_MAGIC) {
            Compression::Zstd
        } else if header.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else if header.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else {
            Compression::None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies `reader` into `writer`, decompressing it on the way if it is compressed.
///
/// Returns the detected format and the number of bytes written.
///
/// ## Errors
///
/// Returns an error if:
/// - The stream is compressed with a format other than gzip
/// - Reading, decoding or writing fails
pub fn decompress(reader: impl Read, writer: &mut impl Write) -> ImageResult<(Compression, u64)> {
    let mut reader = BufReader::new(reader);
    let compression = Compression::detect(reader.fill_buf()?);
    trace!(%compression, "detected compression");

    let written = match compression {
        Compression::None => io::copy(&mut reader, writer)?,
        Compression::Gzip => io::copy(&mut MultiGzDecoder::new(reader), writer)?,
        other => return Err(ImageError::UnsupportedCompression(other)),
    };

    writer.flush()?;
    Ok((compression, written))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::Xz => "xz",
            Compression::Bzip2 => "bzip2",
        };
        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flate2::{write::GzEncoder, Compression as GzLevel};
    use layerfs::ErrorKind;

    use super::*;

    #[test]
    fn test_decompress_passes_plain_data_through() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let (compression, written) = decompress(&b"plain tar bytes"[..], &mut out)?;

        assert_eq!(compression, Compression::None);
        assert_eq!(written, 15);
        assert_eq!(out, b"plain tar bytes");

        Ok(())
    }

    #[test]
    fn test_decompress_multi_member_gzip() -> anyhow::Result<()> {
        let mut data = helper::gzip(b"hello ")?;
        data.extend(helper::gzip(b"world")?);

        let mut out = Vec::new();
        let (compression, _) = decompress(data.as_slice(), &mut out)?;

        assert_eq!(compression, Compression::Gzip);
        assert_eq!(out, b"hello world");

        Ok(())
    }

    #[test]
    fn test_decompress_rejects_unsupported_formats() {
        for (magic, expected) in [
            (ZSTD_MAGIC, Compression::Zstd),
            (XZ_MAGIC, Compression::Xz),
            (BZIP2_MAGIC, Compression::Bzip2),
        ] {
            let mut out = Vec::new();
            let result = decompress(magic, &mut out);

            match result {
                Err(ImageError::UnsupportedCompression(found)) => assert_eq!(found, expected),
                other => panic!("expected {expected} to be rejected, got {other:?}"),
            }
            assert_eq!(
                ImageError::UnsupportedCompression(expected).kind(),
                ErrorKind::Unsupported
            );
        }
    }

    #[test]
    fn test_decompress_empty_stream() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let (compression, written) = decompress(io::empty(), &mut out)?;

        assert_eq!(compression, Compression::None);
        assert_eq!(written, 0);

        Ok(())
    }

    mod helper {
        use super::*;

        pub(super) fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}
