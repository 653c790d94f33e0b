// End-to-end tests for the streaming VCDIFF decoder.
//
// These tests verify:
//   - The concrete byte-level scenarios (empty delta, ADD, RUN, source
//     COPY, self-overlapping COPY, checksum mismatch)
//   - Suspension behavior: input chunking, source attachment, block paging
//   - Caller flags (JUST_HDR, SKIP_WINDOW, SKIP_EMIT, ADLER32_NOVER)
//   - Decoder robustness against malformed input

mod common;

use common::{
    VCD_SOURCE, VCD_TARGET, WindowBuilder, adler32, file_header, push_varint, push_window_raw,
};
use undelta::{BlockSource, DecodeFlags, Decoder, Error, MemSource, Step, decode_all};

// ===========================================================================
// Helpers
// ===========================================================================

/// Drive a decoder over the whole delta, concatenating window outputs.
fn decode_collect(
    delta: &[u8],
    flags: DecodeFlags,
    mut source: Option<&mut dyn BlockSource>,
) -> Result<Vec<u8>, Error> {
    let mut dec = Decoder::new(flags);
    let mut rest = delta;
    let mut out = Vec::new();
    loop {
        let reborrowed: Option<&mut dyn BlockSource> = match &mut source {
            Some(s) => Some(&mut **s),
            None => None,
        };
        let (n, step) = dec.decode(rest, reborrowed)?;
        rest = &rest[n..];
        match step {
            Step::Output => out.extend_from_slice(dec.output()),
            Step::NeedInput => {
                dec.finish()?;
                return Ok(out);
            }
            Step::NeedSource | Step::NeedBlock(_) => panic!("unexpected source suspension"),
            Step::GotHeader | Step::WinStart | Step::WinFinish => {}
        }
    }
}

/// A provider that keeps a single block resident, paging on demand.
struct PagedSource {
    data: Vec<u8>,
    blksize: usize,
    resident: Option<(u64, Vec<u8>)>,
    loads: usize,
}

impl PagedSource {
    fn new(data: &[u8], blksize: usize) -> Self {
        Self {
            data: data.to_vec(),
            blksize,
            resident: None,
            loads: 0,
        }
    }

    fn load(&mut self, blkno: u64) {
        let start = (blkno as usize * self.blksize).min(self.data.len());
        let end = (start + self.blksize).min(self.data.len());
        self.resident = Some((blkno, self.data[start..end].to_vec()));
        self.loads += 1;
    }
}

impl BlockSource for PagedSource {
    fn block_size(&self) -> usize {
        self.blksize
    }

    fn get_block(&mut self, blkno: u64) -> Option<&[u8]> {
        match &self.resident {
            Some((n, b)) if *n == blkno => Some(b),
            _ => None,
        }
    }
}

// ===========================================================================
// Byte-level scenarios
// ===========================================================================

#[test]
fn empty_delta() {
    // Magic, version 0, no header flags, no windows.
    let delta = file_header(0);
    let mut dec = Decoder::new(DecodeFlags::empty());

    let (n, step) = dec.decode(&delta, None).unwrap();
    assert_eq!(step, Step::GotHeader);
    let (_, step) = dec.decode(&delta[n..], None).unwrap();
    assert_eq!(step, Step::NeedInput);
    dec.finish().unwrap();
    assert_eq!(dec.total_out(), 0);
}

#[test]
fn single_add_window_exact_bytes() {
    let delta = [
        0xD6, 0xC3, 0xC4, 0x00, 0x00, // magic + version + hdr_ind
        0x00, // win_ind: no source, no checksum
        0x0C, // enc_len = 1+1+1+1+1 + 5 + 2
        0x05, // tgt_len
        0x00, // del_ind
        0x05, // data_len
        0x02, // inst_len
        0x00, // addr_len
        0x48, 0x65, 0x6C, 0x6C, 0x6F, // data: "Hello"
        0x01, 0x05, // inst: ADD, size 5
    ];
    assert_eq!(decode_all(&delta, &[]).unwrap(), b"Hello");
}

#[test]
fn run_window() {
    let mut delta = file_header(0);
    let mut win = WindowBuilder::new();
    win.run(10, 0x41);
    win.push_to(&mut delta, None);
    assert_eq!(decode_all(&delta, &[]).unwrap(), vec![b'A'; 10]);
}

#[test]
fn copy_from_source() {
    let source = b"abcdefghij";
    let mut delta = file_header(0);
    let mut win = WindowBuilder::with_source(10, 0);
    win.copy(2, 6);
    win.push_to(&mut delta, None);
    assert_eq!(decode_all(&delta, source).unwrap(), b"cdefgh");
}

#[test]
fn self_overlapping_copy() {
    // Two literal bytes, then a six-byte copy of the window's own start:
    // the copy expands "ab" into "ababab".
    let mut delta = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(b"ab");
    win.copy(win.copy_len(), 6);
    win.push_to(&mut delta, None);
    assert_eq!(decode_all(&delta, &[]).unwrap(), b"abababab");
}

#[test]
fn adler32_verified_and_mismatch_detected() {
    let target = b"Hello";

    let mut good = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(target);
    win.push_to(&mut good, Some(adler32(target)));
    assert_eq!(decode_all(&good, &[]).unwrap(), target);

    let mut bad = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(target);
    win.push_to(&mut bad, Some(adler32(target) ^ 0x1234));
    assert!(matches!(
        decode_all(&bad, &[]),
        Err(Error::ChecksumMismatch { .. })
    ));
}

// ===========================================================================
// Headers and metadata
// ===========================================================================

#[test]
fn app_header_is_exposed() {
    let mut delta = file_header(0x04); // VCD_APPHEADER
    let app = b"source.bin/target.bin";
    push_varint(&mut delta, app.len() as u64);
    delta.extend_from_slice(app);

    let mut dec = Decoder::new(DecodeFlags::empty());
    let (_, step) = dec.decode(&delta, None).unwrap();
    assert_eq!(step, Step::GotHeader);
    assert_eq!(dec.app_header(), Some(app.as_slice()));
}

#[test]
fn just_hdr_stops_after_header() {
    let mut delta = file_header(0x04);
    let app = b"metadata";
    push_varint(&mut delta, app.len() as u64);
    delta.extend_from_slice(app);
    // A window follows, but a JUST_HDR caller never decodes it.
    let mut win = WindowBuilder::new();
    win.add(b"payload");
    win.push_to(&mut delta, None);

    let mut dec = Decoder::new(DecodeFlags::JUST_HDR);
    let (_, step) = dec.decode(&delta, None).unwrap();
    assert_eq!(step, Step::GotHeader);
    assert_eq!(dec.app_header(), Some(app.as_slice()));
}

#[test]
fn window_metadata_visible_at_winstart() {
    let source = vec![7u8; 100];
    let mut delta = file_header(0);
    let mut win = WindowBuilder::with_source(100, 0);
    win.add(b"xy");
    win.copy(40, 8);
    win.push_to(&mut delta, None);

    let mut dec = Decoder::new(DecodeFlags::empty());
    let mut src = MemSource::new(&source);
    let mut rest = &delta[..];
    let mut saw_winstart = false;
    loop {
        let (n, step) = dec.decode(rest, Some(&mut src)).unwrap();
        rest = &rest[n..];
        match step {
            Step::WinStart => {
                saw_winstart = true;
                let wh = dec.window();
                assert!(wh.has_source());
                assert_eq!(wh.copy_len, 100);
                assert_eq!(wh.tgt_len, 10);
                assert_eq!(wh.data_len, 2);
            }
            Step::NeedInput => break,
            _ => {}
        }
    }
    assert!(saw_winstart);
    dec.finish().unwrap();
}

// ===========================================================================
// Multi-window streams
// ===========================================================================

#[test]
fn multi_window_stream_concatenates() {
    let source = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut delta = file_header(0);

    let mut w1 = WindowBuilder::with_source(10, 0);
    w1.copy(0, 10); // "0123456789"
    w1.push_to(&mut delta, None);

    let mut w2 = WindowBuilder::new();
    w2.add(b"--").run(3, b'=');
    w2.push_to(&mut delta, None);

    let mut w3 = WindowBuilder::with_source(26, 10);
    w3.copy(0, 5); // "abcde"
    w3.push_to(&mut delta, None);

    let out = decode_collect(&delta, DecodeFlags::empty(), Some(&mut MemSource::new(source)))
        .unwrap();
    assert_eq!(out, b"0123456789--===abcde");
}

#[test]
fn chunked_input_is_equivalent() {
    let source = b"A quick movement of the enemy will jeopardize six gunboats";
    let mut expected = Vec::new();
    expected.extend_from_slice(b">>");
    expected.extend_from_slice(&source[2..22]);
    expected.extend_from_slice(b"!!!!");
    let head = expected[..6].to_vec();
    expected.extend_from_slice(&head);

    let mut delta = file_header(0);
    let mut w1 = WindowBuilder::with_source(source.len() as u64, 0);
    w1.add(b">>").copy(2, 20).run(4, b'!');
    w1.copy(w1.copy_len(), 6); // re-copy the window's own first bytes
    w1.push_to(&mut delta, Some(adler32(&expected)));

    let whole = decode_all(&delta, source).unwrap();
    assert_eq!(whole, expected);

    for chunk_size in [1usize, 2, 3, 5, 7, 13, 64] {
        let mut dec = Decoder::new(DecodeFlags::empty());
        let mut src = MemSource::new(source);
        let mut out = Vec::new();
        for chunk in delta.chunks(chunk_size) {
            let mut rest = chunk;
            loop {
                let (n, step) = dec.decode(rest, Some(&mut src)).unwrap();
                rest = &rest[n..];
                match step {
                    Step::Output => out.extend_from_slice(dec.output()),
                    Step::NeedInput => break,
                    _ => {}
                }
            }
        }
        dec.finish().unwrap();
        assert_eq!(out, whole, "chunk size {chunk_size}");
    }
}

// ===========================================================================
// Source block paging
// ===========================================================================

#[test]
fn copy_pages_blocks_on_demand() {
    let source: Vec<u8> = (0..=255u8).cycle().take(300).collect();
    let mut delta = file_header(0);
    let mut win = WindowBuilder::with_source(300, 0);
    win.copy(10, 200); // spans several 64-byte blocks
    win.push_to(&mut delta, None);

    let mut dec = Decoder::new(DecodeFlags::empty());
    let mut src = PagedSource::new(&source, 64);
    let mut rest = &delta[..];
    let mut out = Vec::new();
    loop {
        let (n, step) = dec.decode(rest, Some(&mut src)).unwrap();
        rest = &rest[n..];
        match step {
            Step::Output => out.extend_from_slice(dec.output()),
            Step::NeedBlock(blkno) => src.load(blkno),
            Step::NeedInput => break,
            _ => {}
        }
    }
    dec.finish().unwrap();
    assert_eq!(out, &source[10..210]);
    // 10..210 touches blocks 0..=3.
    assert_eq!(src.loads, 4);
}

#[test]
fn need_source_then_attach() {
    let source = b"abcdefghij";
    let mut delta = file_header(0);
    let mut win = WindowBuilder::with_source(10, 0);
    win.copy(2, 6);
    win.push_to(&mut delta, None);

    let mut dec = Decoder::new(DecodeFlags::empty());
    let mut rest = &delta[..];
    loop {
        let (n, step) = dec.decode(rest, None).unwrap();
        rest = &rest[n..];
        if step == Step::NeedSource {
            break;
        }
        assert_ne!(step, Step::NeedInput, "ran out of input before NeedSource");
    }

    let mut src = MemSource::new(source);
    let mut out = Vec::new();
    loop {
        let (n, step) = dec.decode(rest, Some(&mut src)).unwrap();
        rest = &rest[n..];
        match step {
            Step::Output => out.extend_from_slice(dec.output()),
            Step::NeedInput => break,
            _ => {}
        }
    }
    dec.finish().unwrap();
    assert_eq!(out, b"cdefgh");
}

#[test]
fn short_source_block_is_rejected() {
    // The copy window claims ten source bytes but the document has six, so
    // the first (and only) block is short of the copy.
    let source = b"abcdef";
    let mut delta = file_header(0);
    let mut win = WindowBuilder::with_source(10, 0);
    win.copy(0, 8);
    win.push_to(&mut delta, None);

    let mut src = MemSource::with_block_size(source, 8);
    let err = decode_collect(&delta, DecodeFlags::empty(), Some(&mut src)).unwrap_err();
    assert!(matches!(err, Error::SourceTooShort { blkno: 0, .. }));
}

// ===========================================================================
// Caller flags
// ===========================================================================

#[test]
fn skip_window_consumes_payload() {
    let mut delta = file_header(0);
    let mut w1 = WindowBuilder::new();
    w1.add(b"first");
    w1.push_to(&mut delta, None);
    let mut w2 = WindowBuilder::new();
    w2.add(b"second");
    w2.push_to(&mut delta, None);

    let out = decode_collect(&delta, DecodeFlags::SKIP_WINDOW, None).unwrap();
    assert!(out.is_empty());
}

#[test]
fn skip_emit_parses_without_output() {
    let mut delta = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(b"payload");
    win.push_to(&mut delta, None);

    let out = decode_collect(&delta, DecodeFlags::SKIP_EMIT, None).unwrap();
    assert!(out.is_empty());
}

#[test]
fn adler32_nover_skips_verification() {
    let mut delta = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(b"Hello");
    win.push_to(&mut delta, Some(0xDEADBEEF)); // deliberately wrong

    let out = decode_collect(&delta, DecodeFlags::ADLER32_NOVER, None).unwrap();
    assert_eq!(out, b"Hello");
}

// ===========================================================================
// Malformed and unsupported input
// ===========================================================================

#[test]
fn vcd_target_window_is_unsupported() {
    let mut delta = file_header(0);
    push_window_raw(
        &mut delta,
        VCD_TARGET,
        Some((4, 0)),
        4,
        0,
        b"abcd",
        &[0x01, 0x04],
        &[],
        None,
    );
    let err = decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err();
    assert_eq!(err, Error::Unsupported("VCD_TARGET window"));
}

#[test]
fn source_and_target_together_are_malformed() {
    let mut delta = file_header(0);
    delta.push(VCD_SOURCE | VCD_TARGET);
    let mut dec = Decoder::new(DecodeFlags::empty());
    assert!(matches!(dec.decode(&delta, None), Err(Error::Malformed(_))));
}

#[test]
fn reserved_window_bits_are_malformed() {
    let mut delta = file_header(0);
    delta.push(0x18);
    let mut dec = Decoder::new(DecodeFlags::empty());
    assert!(matches!(dec.decode(&delta, None), Err(Error::Malformed(_))));
}

#[test]
fn unknown_secondary_id_is_unsupported() {
    let mut delta = file_header(0x01); // VCD_SECONDARY
    delta.push(16); // FGK, no built-in backend
    let mut dec = Decoder::new(DecodeFlags::empty());
    assert_eq!(
        dec.decode(&delta, None),
        Err(Error::Unsupported("unknown secondary compressor ID"))
    );
}

#[test]
fn truncated_stream_fails_finish() {
    let mut delta = file_header(0);
    let mut win = WindowBuilder::new();
    win.add(b"Hello");
    win.push_to(&mut delta, None);

    // Cut the stream at every point inside the window (a cut right after
    // the file header is a valid empty delta, so start past it); the
    // decoder must suspend and then fail finish.
    for cut in 6..delta.len() {
        let mut dec = Decoder::new(DecodeFlags::empty());
        let mut rest = &delta[..cut];
        loop {
            let (n, step) = dec.decode(rest, None).unwrap();
            rest = &rest[n..];
            match step {
                Step::NeedInput => break,
                Step::Output => panic!("cut {cut}: produced output from truncated window"),
                _ => {}
            }
        }
        assert!(dec.finish().is_err(), "cut {cut}");
    }
}

#[test]
fn oversized_instruction_is_malformed() {
    // Window claims 4 target bytes; the ADD says 100.
    let mut delta = file_header(0);
    let mut inst = vec![0x01];
    push_varint(&mut inst, 100);
    push_window_raw(&mut delta, 0, None, 4, 0, b"abcd", &inst, &[], None);
    assert_eq!(
        decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err(),
        Error::Malformed("size too large")
    );
}

#[test]
fn copy_address_beyond_here_is_malformed() {
    // COPY at address 5 when only 2 bytes exist before it.
    let mut delta = file_header(0);
    let mut inst = vec![0x01, 0x02]; // ADD size 2
    inst.push(19); // COPY size=varint mode=0
    push_varint(&mut inst, 4);
    let mut addr = Vec::new();
    push_varint(&mut addr, 5);
    push_window_raw(&mut delta, 0, None, 6, 0, b"ab", &inst, &addr, None);
    assert_eq!(
        decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err(),
        Error::Malformed("address too large")
    );
}

#[test]
fn missing_instruction_size_is_malformed() {
    // Opcode 1 (ADD, explicit size) with nothing after it.
    let mut delta = file_header(0);
    push_window_raw(&mut delta, 0, None, 5, 0, b"Hello", &[0x01], &[], None);
    assert_eq!(
        decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err(),
        Error::Malformed("invalid size in instruction section")
    );
}

#[test]
fn data_underflow_is_malformed() {
    // ADD of five bytes with only three in the data section.
    let mut delta = file_header(0);
    push_window_raw(&mut delta, 0, None, 5, 0, b"abc", &[0x01, 0x05], &[], None);
    assert_eq!(
        decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err(),
        Error::Malformed("data underflow")
    );
}

#[test]
fn extra_address_bytes_are_malformed() {
    let mut delta = file_header(0);
    push_window_raw(
        &mut delta,
        0,
        None,
        5,
        0,
        b"Hello",
        &[0x01, 0x05],
        &[0x00], // nothing consumes this
        None,
    );
    assert_eq!(
        decode_collect(&delta, DecodeFlags::empty(), None).unwrap_err(),
        Error::Malformed("extra address section")
    );
}

// ===========================================================================
// Secondary decompression
// ===========================================================================

#[cfg(feature = "zlib-secondary")]
#[test]
fn zlib_compressed_data_section() {
    use std::io::Write;

    let target = b"compressible compressible compressible compressible";
    let mut enc =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(target).unwrap();
    let packed = enc.finish().unwrap();
    assert!(packed.len() < target.len());

    let mut inst = vec![0x01];
    push_varint(&mut inst, target.len() as u64);

    let mut delta = file_header(0x01); // VCD_SECONDARY
    delta.push(3); // Zlib ID
    push_window_raw(
        &mut delta,
        0,
        None,
        target.len() as u64,
        0x01, // del_ind: VCD_DATACOMP
        &packed,
        &inst,
        &[],
        None,
    );

    let out = decode_collect(&delta, DecodeFlags::empty(), None).unwrap();
    assert_eq!(out, target);
}

// ===========================================================================
// Checksums over multiple windows
// ===========================================================================

#[test]
fn per_window_checksums() {
    let source = b"shared source text for both windows";
    let first_expected = &source[0..12];
    let second_expected = b"literal tail";

    let mut delta = file_header(0);
    let mut w1 = WindowBuilder::with_source(source.len() as u64, 0);
    w1.copy(0, 12);
    w1.push_to(&mut delta, Some(adler32(first_expected)));
    let mut w2 = WindowBuilder::new();
    w2.add(second_expected);
    w2.push_to(&mut delta, Some(adler32(second_expected)));

    let out = decode_collect(&delta, DecodeFlags::empty(), Some(&mut MemSource::new(source)))
        .unwrap();
    let mut expected = first_expected.to_vec();
    expected.extend_from_slice(second_expected);
    assert_eq!(out, expected);
}
