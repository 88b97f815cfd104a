#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipress::{Codec, Engine, PipelineConfig};

fuzz_target!(|data: &[u8]| {
    // Every decoder must reject garbage with an error, never a panic.
    for codec in Codec::ALL {
        let engine = Engine::new(PipelineConfig {
            engine_count: 2,
            ..PipelineConfig::for_codec(codec)
        })
        .unwrap();
        let whole = engine.decompress(data);

        // The streaming decoder agrees with the one-shot decoder on success.
        let streamed = engine.decompress_resident(data).read_all();
        if let (Ok(a), Ok(b)) = (&whole, &streamed) {
            assert_eq!(a, b, "{codec}");
        }
    }
});
