// Shared test support: a minimal VCDIFF window assembler.
//
// The crate only decodes, so the tests synthesize deltas by hand.  The
// assembler always encodes explicit-size opcodes and SELF-mode addresses,
// which every conforming decoder must accept; opcode-level corner cases are
// written out as raw bytes in the tests that need them.

#![allow(dead_code)] // each integration test binary uses a subset

use undelta::header::WindowHeader;
use undelta::header::WinIndicator;

pub const VCD_SOURCE: u8 = 0x01;
pub const VCD_TARGET: u8 = 0x02;
pub const VCD_ADLER32: u8 = 0x04;

/// Append a base-128 big-endian varint.
pub fn push_varint(out: &mut Vec<u8>, mut num: u64) {
    let mut buf = [0u8; 10];
    let mut i = 10;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[9] &= 0x7F;
    out.extend_from_slice(&buf[i..]);
}

/// File magic plus the header indicator byte.
pub fn file_header(hdr_ind: u8) -> Vec<u8> {
    vec![0xD6, 0xC3, 0xC4, 0x00, hdr_ind]
}

/// Scalar Adler-32 for expected-checksum construction.
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + u32::from(byte)) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// Builds one window's sections instruction by instruction.
pub struct WindowBuilder {
    copy: Option<(u64, u64)>,
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    tgt_len: u64,
}

impl WindowBuilder {
    /// A window with no copy window (pure ADD/RUN/target-copy).
    pub fn new() -> Self {
        Self {
            copy: None,
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            tgt_len: 0,
        }
    }

    /// A window copying from `len` source bytes starting at `off`.
    pub fn with_source(len: u64, off: u64) -> Self {
        Self {
            copy: Some((len, off)),
            ..Self::new()
        }
    }

    /// Length of the copy window (0 when none).
    pub fn copy_len(&self) -> u64 {
        self.copy.map_or(0, |(len, _)| len)
    }

    /// Current HERE address: copy window plus target emitted so far.
    pub fn here(&self) -> u64 {
        self.copy_len() + self.tgt_len
    }

    /// ADD literal bytes (explicit-size opcode 1).
    pub fn add(&mut self, bytes: &[u8]) -> &mut Self {
        self.inst.push(0x01);
        push_varint(&mut self.inst, bytes.len() as u64);
        self.data.extend_from_slice(bytes);
        self.tgt_len += bytes.len() as u64;
        self
    }

    /// RUN of `size` copies of `byte` (explicit-size opcode 0).
    pub fn run(&mut self, size: u64, byte: u8) -> &mut Self {
        self.inst.push(0x00);
        push_varint(&mut self.inst, size);
        self.data.push(byte);
        self.tgt_len += size;
        self
    }

    /// COPY `size` bytes from address `addr`, SELF mode (opcode 19).
    pub fn copy(&mut self, addr: u64, size: u64) -> &mut Self {
        self.inst.push(19);
        push_varint(&mut self.inst, size);
        push_varint(&mut self.addr, addr);
        self.tgt_len += size;
        self
    }

    /// Target bytes this window will produce.
    pub fn tgt_len(&self) -> u64 {
        self.tgt_len
    }

    /// Append the encoded window.  `adler32` attaches a checksum (and sets
    /// the indicator bit).
    pub fn push_to(&self, out: &mut Vec<u8>, adler32: Option<u32>) {
        let mut win_ind = 0u8;
        if self.copy.is_some() {
            win_ind |= VCD_SOURCE;
        }
        if adler32.is_some() {
            win_ind |= VCD_ADLER32;
        }
        push_window_raw(
            out,
            win_ind,
            self.copy,
            self.tgt_len,
            0,
            &self.data,
            &self.inst,
            &self.addr,
            adler32,
        );
    }
}

impl Default for WindowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append a window from raw parts, computing `enc_len` from the fields.
#[allow(clippy::too_many_arguments)]
pub fn push_window_raw(
    out: &mut Vec<u8>,
    win_ind: u8,
    copy: Option<(u64, u64)>,
    tgt_len: u64,
    del_ind: u8,
    data: &[u8],
    inst: &[u8],
    addr: &[u8],
    adler32: Option<u32>,
) {
    out.push(win_ind);
    if let Some((len, off)) = copy {
        push_varint(out, len);
        push_varint(out, off);
    }
    let wh = WindowHeader {
        win_ind: WinIndicator::from_bits_truncate(win_ind),
        tgt_len,
        data_len: data.len(),
        inst_len: inst.len(),
        addr_len: addr.len(),
        adler32,
        ..Default::default()
    };
    push_varint(out, wh.compute_enc_len());
    push_varint(out, tgt_len);
    out.push(del_ind);
    push_varint(out, data.len() as u64);
    push_varint(out, inst.len() as u64);
    push_varint(out, addr.len() as u64);
    if let Some(sum) = adler32 {
        out.extend_from_slice(&sum.to_be_bytes());
    }
    out.extend_from_slice(data);
    out.extend_from_slice(inst);
    out.extend_from_slice(addr);
}
