//! Undelta: streaming VCDIFF (RFC 3284) delta decoding in Rust.
//!
//! The crate provides:
//! - A push-based [`Decoder`] that accepts input in arbitrary chunks and
//!   suspends instead of blocking (`decoder`)
//! - The VCDIFF building blocks: varints, the address cache, the default
//!   code table, and header types (`varint`, `address_cache`, `code_table`,
//!   `header`)
//! - A [`BlockSource`] seam for paging in source data block by block
//!   (`source`)
//! - Pluggable secondary section decompression (`secondary`)
//!
//! # Quick Start
//!
//! ```
//! // magic + header, then one window that ADDs "Hello".
//! let delta = [
//!     0xD6, 0xC3, 0xC4, 0x00, 0x00, // magic, version 0, no header flags
//!     0x00, 0x0C, 0x05, 0x00, 0x05, 0x02, 0x00, // window header
//!     b'H', b'e', b'l', b'l', b'o', // data section
//!     0x01, 0x05, // inst section: ADD, size 5
//! ];
//! let target = undelta::decode_all(&delta, b"").unwrap();
//! assert_eq!(target, b"Hello");
//! ```
//!
//! For streaming use, drive [`Decoder::decode`] directly and react to each
//! [`Step`]: refill input on `NeedInput`, page in source blocks on
//! `NeedBlock`, and read [`Decoder::output`] after `Output`.

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod header;
pub mod secondary;
mod section;
pub mod source;
pub mod varint;

// Re-export key types for convenience.
pub use address_cache::AddressCache;
pub use code_table::{CodeTable, CodeTableEntry};
pub use decoder::{DecodeFlags, Decoder, Error, Step, decode_all};
pub use header::{FileHeader, VCDIFF_MAGIC, WindowHeader};
pub use source::{BlockSource, MemSource};
