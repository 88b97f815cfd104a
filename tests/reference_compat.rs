// Cross-compatibility with the reference implementations.
//
// Our output must decode with flate2 (zlib-rs), lz4_flex, snap and libzstd,
// and streams those libraries produce must decode with our decoders, both
// one-shot and through the streaming front end.

use std::io::{Read, Write};

use oxipress::codec::snappy::{compress_raw, decompress_raw};
use oxipress::{Codec, Engine, PipelineConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine(codec: Codec, engines: usize) -> Engine {
    Engine::new(PipelineConfig {
        engine_count: engines,
        block_size_kib: 32,
        ..PipelineConfig::for_codec(codec)
    })
    .unwrap()
}

fn corpus() -> Vec<Vec<u8>> {
    let mut text = Vec::new();
    for i in 0..12_000u32 {
        text.extend_from_slice(
            format!("{{\"id\":{i},\"name\":\"item-{}\",\"tags\":[\"a\",\"b{}\"]}}\n", i % 113, i % 7)
                .as_bytes(),
        );
    }
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let noise: Vec<u8> = (0..100_000)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    let mut mixed = text[..50_000].to_vec();
    mixed.extend_from_slice(&noise[..30_000]);
    mixed.extend(std::iter::repeat_n(0u8, 70_000));
    mixed.extend_from_slice(&text[..20_000]);
    vec![Vec::new(), b"x".to_vec(), text, noise, mixed]
}

fn decode_all_stream(engine: &Engine, packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    engine.decompress_reader(packed).read_to_end(&mut out).unwrap();
    out
}

// ---------------------------------------------------------------------------
// DEFLATE family
// ---------------------------------------------------------------------------

#[test]
fn flate2_reads_our_streams() {
    for data in corpus() {
        let packed = engine(Codec::Deflate, 4).compress(&data).unwrap();
        let mut out = Vec::new();
        flate2::read::DeflateDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);

        let packed = engine(Codec::Zlib, 4).compress(&data).unwrap();
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);

        let packed = engine(Codec::Gzip, 4).compress(&data).unwrap();
        let mut out = Vec::new();
        flate2::read::MultiGzDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }
}

#[test]
fn we_read_flate2_streams() {
    for data in corpus() {
        for level in [1, 6, 9] {
            let compression = flate2::Compression::new(level);

            let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), compression);
            enc.write_all(&data).unwrap();
            let packed = enc.finish().unwrap();
            let e = engine(Codec::Deflate, 2);
            assert_eq!(e.decompress(&packed).unwrap(), data);
            assert_eq!(decode_all_stream(&e, &packed), data);

            let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), compression);
            enc.write_all(&data).unwrap();
            let packed = enc.finish().unwrap();
            let e = engine(Codec::Zlib, 2);
            assert_eq!(e.decompress(&packed).unwrap(), data);
            assert_eq!(decode_all_stream(&e, &packed), data);

            let mut enc = flate2::GzBuilder::new()
                .filename("corpus.json")
                .comment("reference")
                .write(Vec::new(), compression);
            enc.write_all(&data).unwrap();
            let packed = enc.finish().unwrap();
            let e = engine(Codec::Gzip, 2);
            assert_eq!(e.decompress(&packed).unwrap(), data);
            assert_eq!(decode_all_stream(&e, &packed), data);
        }
    }
}

// ---------------------------------------------------------------------------
// LZ4
// ---------------------------------------------------------------------------

#[test]
fn lz4_flex_reads_our_frames() {
    for data in corpus() {
        let packed = engine(Codec::Lz4, 4).compress(&data).unwrap();
        let mut out = Vec::new();
        lz4_flex::frame::FrameDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }
}

#[test]
fn we_read_lz4_flex_frames() {
    use lz4_flex::frame::{BlockMode, BlockSize, FrameEncoder, FrameInfo};

    for data in corpus() {
        for mode in [BlockMode::Independent, BlockMode::Linked] {
            let info = FrameInfo::new()
                .block_mode(mode)
                .block_size(BlockSize::Max64KB)
                .content_checksum(true);
            let mut enc = FrameEncoder::with_frame_info(info, Vec::new());
            enc.write_all(&data).unwrap();
            let packed = enc.finish().unwrap();
            let e = engine(Codec::Lz4, 3);
            assert_eq!(e.decompress(&packed).unwrap(), data, "{mode:?}");
            assert_eq!(decode_all_stream(&e, &packed), data, "{mode:?}");
        }
    }
}

// ---------------------------------------------------------------------------
// Snappy
// ---------------------------------------------------------------------------

#[test]
fn snappy_raw_both_directions() {
    for data in corpus() {
        let ours = compress_raw(&data, 6);
        let theirs = snap::raw::Decoder::new().decompress_vec(&ours).unwrap();
        assert_eq!(theirs, data);

        let packed = snap::raw::Encoder::new().compress_vec(&data).unwrap();
        assert_eq!(decompress_raw(&packed, data.len()).unwrap(), data);
    }
}

#[test]
fn snappy_framing_both_directions() {
    for data in corpus() {
        let packed = engine(Codec::Snappy, 4).compress(&data).unwrap();
        let mut out = Vec::new();
        snap::read::FrameDecoder::new(&packed[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);

        if data.is_empty() {
            // snap writes nothing at all for an empty stream.
            continue;
        }
        let mut enc = snap::write::FrameEncoder::new(Vec::new());
        enc.write_all(&data).unwrap();
        let packed = enc.into_inner().unwrap();
        let e = engine(Codec::Snappy, 2);
        assert_eq!(e.decompress(&packed).unwrap(), data);
        assert_eq!(decode_all_stream(&e, &packed), data);
    }
}

// ---------------------------------------------------------------------------
// Zstandard
// ---------------------------------------------------------------------------

#[test]
fn libzstd_reads_our_frames() {
    for data in corpus() {
        let packed = engine(Codec::Zstd, 4).compress(&data).unwrap();
        assert_eq!(zstd::decode_all(&packed[..]).unwrap(), data);
    }
}

#[test]
fn we_read_libzstd_frames() {
    for data in corpus() {
        for level in [1, 3, 9, 19] {
            let packed = zstd::encode_all(&data[..], level).unwrap();
            let e = engine(Codec::Zstd, 2);
            assert_eq!(e.decompress(&packed).unwrap(), data, "level {level}");
            assert_eq!(decode_all_stream(&e, &packed), data, "level {level}");
        }
    }
}

#[test]
fn we_verify_libzstd_checksums() {
    let data = corpus().swap_remove(2);
    let mut enc = zstd::Encoder::new(Vec::new(), 5).unwrap();
    enc.include_checksum(true).unwrap();
    enc.write_all(&data).unwrap();
    let mut packed = enc.finish().unwrap();
    let e = engine(Codec::Zstd, 1);
    assert_eq!(e.decompress(&packed).unwrap(), data);

    let last = packed.len() - 1;
    packed[last] ^= 0x55;
    let err = e.decompress(&packed).unwrap_err();
    assert_eq!(err.kind(), oxipress::ErrorKind::Checksum);
}

#[test]
fn concatenated_libzstd_frames() {
    let corpus = corpus();
    let mut packed = zstd::encode_all(&corpus[2][..], 3).unwrap();
    packed.extend(zstd::encode_all(&corpus[4][..], 3).unwrap());
    let mut expected = corpus[2].clone();
    expected.extend_from_slice(&corpus[4]);
    let e = engine(Codec::Zstd, 4);
    assert_eq!(e.decompress(&packed).unwrap(), expected);
    assert_eq!(decode_all_stream(&e, &packed), expected);
}
