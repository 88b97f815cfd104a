// Integration tests for the block pipeline.
//
// Every codec through Engine::compress -> Engine::decompress at several
// levels, block sizes and engine counts; the concrete byte-level cases;
// streaming front ends; cancellation.

use std::io::{Read, Write};

use oxipress::checksum::{self, Algorithm};
use oxipress::lz77::{MatchFinder, MatchParams, Token};
use oxipress::{
    CancelToken, ChecksumKind, Codec, DispatchPolicy, Engine, ErrorKind, PipelineConfig,
    ResidentSource, StreamCompressor, StreamDecompressor,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(codec: Codec, block_kib: u32, engines: usize, level: u32) -> PipelineConfig {
    PipelineConfig {
        block_size_kib: block_kib,
        engine_count: engines,
        level,
        ..PipelineConfig::for_codec(codec)
    }
}

fn roundtrip(cfg: PipelineConfig, data: &[u8]) -> Vec<u8> {
    let engine = Engine::new(cfg.clone()).unwrap();
    let packed = engine.compress(data).unwrap();
    let unpacked = engine.decompress(&packed).unwrap();
    assert_eq!(
        unpacked,
        data,
        "roundtrip mismatch ({} level {} block {} KiB, {} engines, input={}, packed={})",
        cfg.codec,
        cfg.level,
        cfg.block_size_kib,
        cfg.engine_count,
        data.len(),
        packed.len()
    );
    packed
}

fn generate_data(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        data.push((state >> 33) as u8);
    }
    data
}

fn text_data(size: usize) -> Vec<u8> {
    let words = [
        "engine ", "block ", "window ", "literal ", "match ", "offset ", "frame ", "trailer ",
        "checksum\n",
    ];
    let mut out = Vec::with_capacity(size + 16);
    let mut i = 0usize;
    while out.len() < size {
        out.extend_from_slice(words[(i * 7 + i / 5) % words.len()].as_bytes());
        i += 1;
    }
    out.truncate(size);
    out
}

// ---------------------------------------------------------------------------
// Concrete cases
// ---------------------------------------------------------------------------

#[test]
fn run_of_a_uses_offset_one_matches() {
    init_logging();
    let data = vec![0x41u8; 10_000];

    let mut tokens = Vec::new();
    MatchFinder::new(MatchParams::deflate(32 * 1024, 6)).tokenize(&data[..4096], &mut tokens);
    assert_eq!(tokens[0], Token::Literal(0x41));
    let mut covered = 0;
    for token in &tokens[1..] {
        match *token {
            Token::Match { offset, length } => {
                assert_eq!(offset, 1);
                covered += length as usize;
            }
            Token::Literal(b) => {
                assert_eq!(b, 0x41);
                covered += 1;
            }
        }
    }
    assert_eq!(covered, 4095);
    assert!(tokens.len() < 32);

    for codec in [Codec::Deflate, Codec::Zlib] {
        let cfg = config(codec, 4, 2, 6);
        let engine = Engine::new(cfg.clone()).unwrap();
        let (packed, stats) = engine.compress_with_stats(&data).unwrap();
        assert_eq!(stats.blocks, 3);
        assert!(stats.matches > 0);
        assert!(packed.len() < 200, "{codec}: {} bytes", packed.len());
        assert_eq!(engine.decompress(&packed).unwrap(), data);
        if codec == Codec::Zlib {
            let trailer = &packed[packed.len() - 4..];
            assert_eq!(trailer, &0x87C1_EB98u32.to_be_bytes());
            assert_eq!(checksum::adler32(&data), 0x87C1_EB98);
        }
    }
}

#[test]
fn empty_input_has_header_and_trailer() {
    init_logging();
    for codec in Codec::ALL {
        let packed = roundtrip(config(codec, 4, 2, 6), &[]);
        assert!(!packed.is_empty(), "{codec}");
    }
    assert_eq!(checksum::checksum(Algorithm::Crc32, &[]), 0);
    assert_eq!(checksum::checksum(Algorithm::Adler32, &[]), 1);

    let zlib = Engine::new(config(Codec::Zlib, 4, 1, 6)).unwrap();
    let (packed, stats) = zlib.compress_with_stats(&[]).unwrap();
    assert_eq!(&packed[packed.len() - 4..], &[0, 0, 0, 1]);
    assert_eq!(stats.checksum, Some(1));

    let deflate = Engine::new(PipelineConfig {
        checksum: ChecksumKind::Crc32,
        ..config(Codec::Deflate, 4, 1, 6)
    })
    .unwrap();
    let (_, stats) = deflate.compress_with_stats(&[]).unwrap();
    assert_eq!(stats.checksum, Some(0));
}

#[test]
fn single_byte_is_one_literal() {
    init_logging();
    for codec in Codec::ALL {
        let engine = Engine::new(config(codec, 4, 1, 6)).unwrap();
        let (packed, stats) = engine.compress_with_stats(&[0xFF]).unwrap();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.matches, 0, "{codec}");
        assert_eq!(engine.decompress(&packed).unwrap(), [0xFF]);
    }
    let gzip = Engine::new(config(Codec::Gzip, 4, 1, 6)).unwrap();
    let packed = gzip.compress(&[0xFF]).unwrap();
    assert_eq!(&packed[packed.len() - 8..], &[0, 0, 0, 0xFF, 1, 0, 0, 0]);
}

// ---------------------------------------------------------------------------
// Levels, block sizes, engines
// ---------------------------------------------------------------------------

#[test]
fn all_levels_every_codec() {
    init_logging();
    let data = text_data(40_000);
    for codec in Codec::ALL {
        for level in 0..=9 {
            roundtrip(config(codec, 16, 2, level), &data);
        }
    }
}

#[test]
fn level_zero_has_no_matches() {
    let data = text_data(20_000);
    for codec in [Codec::Deflate, Codec::Lz4, Codec::Snappy] {
        let engine = Engine::new(config(codec, 16, 1, 0)).unwrap();
        let (_, stats) = engine.compress_with_stats(&data).unwrap();
        assert_eq!(stats.matches, 0, "{codec}");
    }
}

#[test]
fn block_sizes_and_boundaries() {
    init_logging();
    let data = text_data(3 * 4096);
    for codec in Codec::ALL {
        for block_kib in [1, 4, 64] {
            roundtrip(config(codec, block_kib, 3, 6), &data);
            roundtrip(config(codec, block_kib, 3, 6), &data[..4096 + 1]);
        }
    }
}

#[test]
fn incompressible_input() {
    let data = generate_data(200_000, 7);
    for codec in Codec::ALL {
        let packed = roundtrip(config(codec, 64, 4, 6), &data);
        assert!(packed.len() < data.len() + data.len() / 50 + 256, "{codec}");
    }
}

#[test]
fn output_identical_for_any_engine_count() {
    init_logging();
    let mut data = text_data(150_000);
    data.extend(generate_data(50_000, 3));
    for codec in Codec::ALL {
        let reference = Engine::new(config(codec, 8, 1, 6))
            .unwrap()
            .compress(&data)
            .unwrap();
        for engines in [2, 3, 8] {
            for policy in [DispatchPolicy::RoundRobin, DispatchPolicy::LeastLoaded] {
                let cfg = PipelineConfig {
                    policy,
                    ..config(codec, 8, engines, 6)
                };
                let packed = Engine::new(cfg).unwrap().compress(&data).unwrap();
                assert_eq!(packed, reference, "{codec} with {engines} engines, {policy:?}");
            }
        }
    }
}

#[cfg(feature = "parallel")]
#[test]
fn stats_spread_blocks_over_engines() {
    let data = text_data(64 * 1024);
    let engine = Engine::new(config(Codec::Lz4, 4, 4, 6)).unwrap();
    let (packed, stats) = engine.compress_with_stats(&data).unwrap();
    assert_eq!(stats.blocks, 16);
    assert_eq!(stats.engines, 4);
    assert_eq!(stats.blocks_per_engine, vec![4, 4, 4, 4]);
    assert_eq!(stats.output_len as usize, packed.len());
    assert_eq!(stats.checksum_algorithm, Some(Algorithm::Xxh32));
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[test]
fn streaming_round_trip_in_small_writes() {
    init_logging();
    let data = text_data(100_000);
    for codec in Codec::ALL {
        let cfg = config(codec, 4, 3, 6);
        let mut comp = StreamCompressor::new(cfg.clone(), Vec::new()).unwrap();
        for piece in data.chunks(333) {
            comp.write_all(piece).unwrap();
        }
        let packed = comp.finish().unwrap();

        let mut out = Vec::new();
        StreamDecompressor::new(&cfg, ResidentSource::new(&packed))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data, "{codec}");

        let engine = Engine::new(cfg).unwrap();
        let mut out = Vec::new();
        engine
            .decompress_reader(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data, "{codec}");
    }
}

#[test]
fn stream_decoder_handles_every_prefix() {
    let data = text_data(3000);
    for codec in Codec::ALL {
        let cfg = config(codec, 1, 1, 6);
        let packed = Engine::new(cfg.clone()).unwrap().compress(&data).unwrap();
        for cut in 0..packed.len() {
            let mut lazy = StreamDecompressor::new(&cfg, ResidentSource::new(&packed[..cut])).unwrap();
            let mut produced = Vec::new();
            let mut failed = None;
            for unit in &mut lazy {
                match unit {
                    Ok(bytes) => produced.extend_from_slice(&bytes),
                    Err(e) => failed = Some(e),
                }
            }
            assert!(data.starts_with(&produced), "{codec} prefix {cut}");
            match failed {
                Some(err) => assert_eq!(err.kind(), ErrorKind::Truncated, "{codec} prefix {cut}: {err}"),
                // Members and chunks are self-contained: a prefix ending on
                // a boundary is a shorter valid stream.
                None => assert!(
                    matches!(codec, Codec::Gzip | Codec::Snappy) && cut > 0,
                    "{codec}: prefix {cut} decoded cleanly"
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancellation_is_reported() {
    let data = text_data(64 * 1024);
    let token = CancelToken::new();
    let engine = Engine::new(config(Codec::Gzip, 4, 4, 6))
        .unwrap()
        .with_cancel(token.clone());
    let packed = engine.compress(&data).unwrap();
    token.cancel();
    assert_eq!(engine.compress(&data).unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(engine.decompress(&packed).unwrap_err().kind(), ErrorKind::Cancelled);
    let mut lazy = engine.decompress_resident(&packed);
    assert_eq!(lazy.next().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(lazy.next().is_none());
}
