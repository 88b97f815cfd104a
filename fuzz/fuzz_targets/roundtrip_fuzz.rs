#![no_main]
use std::io::Write;

use libfuzzer_sys::fuzz_target;
use oxipress::{Codec, DispatchPolicy, Engine, PipelineConfig, StreamCompressor};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    // Control bytes: codec and level, engines and policy, block size.
    let codec = Codec::ALL[data[0] as usize % Codec::ALL.len()];
    let level = u32::from(data[0] >> 4) % 10;
    let engines = 1 + (data[1] as usize & 7);
    let policy = if data[1] & 8 != 0 {
        DispatchPolicy::LeastLoaded
    } else {
        DispatchPolicy::RoundRobin
    };
    let block_size_kib = 1 + u32::from(data[2] % 8);
    let payload = &data[3..];

    let cfg = PipelineConfig {
        engine_count: engines,
        policy,
        level,
        block_size_kib,
        ..PipelineConfig::for_codec(codec)
    };
    let engine = Engine::new(cfg.clone()).unwrap();
    let packed = engine.compress(payload).unwrap();
    assert_eq!(engine.decompress(&packed).unwrap(), payload);

    let mut comp = StreamCompressor::new(cfg, Vec::new()).unwrap();
    for piece in payload.chunks(1 + data[2] as usize) {
        comp.write_all(piece).unwrap();
    }
    let streamed = comp.finish().unwrap();
    assert_eq!(engine.decompress_resident(&streamed).read_all().unwrap(), payload);
});
