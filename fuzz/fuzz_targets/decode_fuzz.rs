#![no_main]
use libfuzzer_sys::fuzz_target;
use undelta::{DecodeFlags, Decoder, MemSource, Step};

fuzz_target!(|data: &[u8]| {
    // Fuzz the decoder with arbitrary bytes.
    // The decoder must never panic — only return errors or suspend.
    let _ = undelta::decode_all(data, &[]);

    // Also fuzz with a non-empty source.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, delta) = data.split_at(split);
        let _ = undelta::decode_all(delta, source);
    }

    // And through the push interface with pathological chunking.
    if data.len() >= 3 {
        let chunk = 1 + (data[0] as usize % 7);
        let (source, delta) = data[1..].split_at((data.len() - 1) / 3);
        let mut dec = Decoder::new(DecodeFlags::empty());
        let mut src = MemSource::with_block_size(source, 16);
        for mut piece in delta.chunks(chunk) {
            loop {
                match dec.decode(piece, Some(&mut src)) {
                    Ok((n, step)) => {
                        piece = &piece[n..];
                        if step == Step::NeedInput {
                            break;
                        }
                    }
                    Err(_) => return,
                }
            }
        }
        let _ = dec.finish();
    }
});
