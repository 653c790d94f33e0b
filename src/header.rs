// VCDIFF file header and per-window header fields (RFC 3284).
//
// The decoder parses these field-by-field so it can suspend mid-header;
// this module holds the indicator flag types, format constants, and the
// parsed views the decoder exposes between steps.

use bitflags::bitflags;

use crate::varint;

// ---------------------------------------------------------------------------
// VCDIFF magic and version
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

bitflags! {
    /// Header indicator flags (`hdr_ind`).  Bits outside the mask are
    /// reserved; `from_bits` failing on them is the validity check.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct HdrIndicator: u8 {
        const SECONDARY = 1 << 0;
        const CODETABLE = 1 << 1;
        const APPHEADER = 1 << 2;
    }

    /// Window indicator flags (`win_ind`).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct WinIndicator: u8 {
        const SOURCE  = 1 << 0;
        const TARGET  = 1 << 1;
        const ADLER32 = 1 << 2;
    }

    /// Delta indicator flags (`del_ind`): which sections are secondary-
    /// compressed.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DelIndicator: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Secondary compressor IDs
// ---------------------------------------------------------------------------

pub const VCD_DJW_ID: u8 = 1;
pub const VCD_LZMA_ID: u8 = 2;
pub const VCD_FGK_ID: u8 = 16;

// ---------------------------------------------------------------------------
// Hard limits
// ---------------------------------------------------------------------------

/// Maximum decoded window size.  Protects against malicious window headers
/// demanding enormous allocations.
pub const HARD_MAX_WINSIZE: u64 = 1 << 24; // 16 MiB

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF file header.
#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    /// Header indicator flags.
    pub indicator: HdrIndicator,
    /// Secondary compressor ID (if SECONDARY is set).
    pub secondary_id: Option<u8>,
    /// Application-defined header data (if APPHEADER is set).
    pub app_header: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, Default)]
pub struct WindowHeader {
    /// Window indicator flags.
    pub win_ind: WinIndicator,

    // --- Copy window (if SOURCE or TARGET) ---
    /// Length of the source/target copy window.
    pub copy_len: u64,
    /// Offset into the source/target for the copy window.
    pub copy_off: u64,

    // --- Delta encoding lengths ---
    /// Total length of the delta encoding (redundancy check field).
    pub enc_len: u64,
    /// Length of the target window to reconstruct.
    pub tgt_len: u64,
    /// Delta indicator (secondary compression flags).
    pub del_ind: DelIndicator,

    // --- Section sizes ---
    /// Length of the data section.
    pub data_len: usize,
    /// Length of the instruction section.
    pub inst_len: usize,
    /// Length of the address section.
    pub addr_len: usize,

    // --- Optional checksum ---
    /// Adler-32 checksum of the target window (if ADLER32).
    pub adler32: Option<u32>,
}

impl WindowHeader {
    /// Is this a source-copy window?
    #[inline]
    pub fn has_source(&self) -> bool {
        self.win_ind.contains(WinIndicator::SOURCE)
    }

    /// Is this a target-copy window?
    #[inline]
    pub fn has_target(&self) -> bool {
        self.win_ind.contains(WinIndicator::TARGET)
    }

    /// Is the Adler-32 checksum present?
    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.win_ind.contains(WinIndicator::ADLER32)
    }

    /// Compute the expected `enc_len` from the current field values.
    ///
    /// `enc_len` is a redundancy check: it equals
    ///   1(del_ind) + sizeof(tgt_len) +
    ///   sizeof(data_len) + sizeof(inst_len) + sizeof(addr_len) +
    ///   data_len + inst_len + addr_len +
    ///   [4 if adler32]
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = 1u64; // del_ind
        len += varint::sizeof_u64(self.tgt_len) as u64;
        len += varint::sizeof_usize(self.data_len) as u64;
        len += varint::sizeof_usize(self.inst_len) as u64;
        len += varint::sizeof_usize(self.addr_len) as u64;
        len += self.data_len as u64;
        len += self.inst_len as u64;
        len += self.addr_len as u64;
        if self.has_checksum() {
            len += 4;
        }
        len
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
