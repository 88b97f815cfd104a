#![no_main]
use std::io::Read;

use libfuzzer_sys::fuzz_target;
use oxipress::{Codec, Engine, PipelineConfig};

fn engine(codec: Codec, level: u32) -> Engine {
    Engine::new(PipelineConfig {
        engine_count: 3,
        block_size_kib: 4,
        level,
        ..PipelineConfig::for_codec(codec)
    })
    .unwrap()
}

fuzz_target!(|data: &[u8]| {
    let level = u32::from(data.first().copied().unwrap_or(6)) % 10;

    // Our streams decode with the reference libraries.
    let packed = engine(Codec::Zlib, level).compress(data).unwrap();
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(&packed[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, data);

    let packed = engine(Codec::Lz4, level).compress(data).unwrap();
    let mut out = Vec::new();
    lz4_flex::frame::FrameDecoder::new(&packed[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, data);

    // Reference streams decode with ours.
    let mut enc = flate2::read::DeflateEncoder::new(data, flate2::Compression::new(level));
    let mut reference = Vec::new();
    enc.read_to_end(&mut reference).unwrap();
    assert_eq!(engine(Codec::Deflate, 6).decompress(&reference).unwrap(), data);
});
