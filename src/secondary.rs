// Secondary decompression for VCDIFF DATA/INST/ADDR sections.
//
// A delta stream may compress individual sections with a secondary
// compressor identified by a one-byte ID in the file header.  The decoder
// only knows the `SecondaryDecoder` trait; built-in backends:
//   - LZMA (via lzma-rs, feature-gated `lzma-secondary`), ID 2
//   - Zlib/Deflate (via flate2, feature-gated `zlib-secondary`), ID 3
//
// xdelta3 additionally defines DJW (ID 1) and FGK (ID 16) Huffman coders;
// those are not implemented and decode as unsupported.

use std::io;

use crate::decoder::Error;
#[cfg(feature = "lzma-secondary")]
use crate::header::VCD_LZMA_ID;

/// Secondary compressor ID for Zlib/Deflate (an extension; not part of
/// RFC 3284 or xdelta3).
pub const VCD_ZLIB_ID: u8 = 3;

// ---------------------------------------------------------------------------
// SecondaryDecoder trait
// ---------------------------------------------------------------------------

/// A pluggable secondary decompressor for VCDIFF sections.
///
/// Implementations decompress individual DATA, INST, and ADDR sections
/// before instruction decoding.
pub trait SecondaryDecoder: Send + Sync {
    /// The secondary compressor ID stored in the VCDIFF file header.
    fn id(&self) -> u8;

    /// Decompress one section.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Look up a decompression backend by secondary compressor ID.
///
/// Returns `None` for IDs with no built-in backend (including DJW and FGK),
/// which the decoder reports as unsupported.
pub fn for_id(id: u8) -> Option<Box<dyn SecondaryDecoder>> {
    match id {
        #[cfg(feature = "lzma-secondary")]
        VCD_LZMA_ID => Some(Box::new(LzmaBackend)),
        #[cfg(feature = "zlib-secondary")]
        VCD_ZLIB_ID => Some(Box::new(ZlibBackend)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// LZMA backend
// ---------------------------------------------------------------------------

/// LZMA secondary decompressor (ID 2).
#[cfg(feature = "lzma-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaBackend;

#[cfg(feature = "lzma-secondary")]
impl SecondaryDecoder for LzmaBackend {
    fn id(&self) -> u8 {
        VCD_LZMA_ID
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut input = io::BufReader::new(io::Cursor::new(data));
        let mut output = Vec::new();
        lzma_rs::lzma_decompress(&mut input, &mut output)
            .map_err(|_| Error::Malformed("LZMA decompression failed"))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Zlib backend
// ---------------------------------------------------------------------------

/// Zlib/Deflate secondary decompressor (ID 3).
#[cfg(feature = "zlib-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibBackend;

#[cfg(feature = "zlib-secondary")]
impl SecondaryDecoder for ZlibBackend {
    fn id(&self) -> u8 {
        VCD_ZLIB_ID
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        use io::Read;

        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|_| Error::Malformed("Zlib decompression failed"))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
