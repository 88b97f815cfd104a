use oxipress::{Codec, Engine, ErrorKind, PipelineConfig};

#[derive(Debug)]
struct Vector {
    name: String,
    codec: Codec,
    expect: Option<ErrorKind>,
    compressed: Vec<u8>,
    plain: Vec<u8>,
}

fn hex_to_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    assert!(
        s.len().is_multiple_of(2),
        "hex string must have even length"
    );
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn parse_codec(name: &str) -> Codec {
    Codec::ALL
        .into_iter()
        .find(|c| c.name() == name)
        .unwrap_or_else(|| panic!("unknown codec {name}"))
}

fn parse_expect(s: &str) -> Option<ErrorKind> {
    match s {
        "ok" => None,
        "truncated" => Some(ErrorKind::Truncated),
        "corrupt" => Some(ErrorKind::Corrupt),
        "block_type" => Some(ErrorKind::UnsupportedBlockType),
        "checksum" => Some(ErrorKind::Checksum),
        "unsupported" => Some(ErrorKind::Unsupported),
        other => panic!("unknown expectation {other}"),
    }
}

fn load_vectors() -> Vec<Vector> {
    let manifest = include_str!("vectors/manifest.tsv");
    manifest
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|line| {
            let parts: Vec<_> = line.split('|').collect();
            assert_eq!(parts.len(), 5, "invalid vector row: {line}");
            Vector {
                name: parts[0].to_string(),
                codec: parse_codec(parts[1]),
                expect: parse_expect(parts[2]),
                compressed: hex_to_bytes(parts[3]),
                plain: hex_to_bytes(parts[4]),
            }
        })
        .collect()
}

fn engine(codec: Codec) -> Engine {
    Engine::new(PipelineConfig {
        engine_count: 2,
        ..PipelineConfig::for_codec(codec)
    })
    .unwrap()
}

fn decode_streaming(engine: &Engine, data: &[u8]) -> oxipress::Result<Vec<u8>> {
    engine.decompress_resident(data).read_all()
}

#[test]
fn manifest_covers_every_codec() {
    let vectors = load_vectors();
    for codec in Codec::ALL {
        assert!(
            vectors.iter().any(|v| v.codec == codec && v.expect.is_none()),
            "no valid vector for {codec}"
        );
        assert!(
            vectors.iter().any(|v| v.codec == codec && v.expect.is_some()),
            "no failure vector for {codec}"
        );
    }
}

#[test]
fn one_shot_decoding_matches_vectors() {
    for v in load_vectors() {
        let result = engine(v.codec).decompress(&v.compressed);
        match (v.expect, result) {
            (None, Ok(out)) => assert_eq!(out, v.plain, "vector {}", v.name),
            (None, Err(e)) => panic!("vector {}: {e}", v.name),
            (Some(kind), Ok(_)) => panic!("vector {}: expected {kind:?}, decoded", v.name),
            (Some(kind), Err(e)) => assert_eq!(e.kind(), kind, "vector {}: {e}", v.name),
        }
    }
}

#[test]
fn streaming_decoding_matches_vectors() {
    for v in load_vectors() {
        let result = decode_streaming(&engine(v.codec), &v.compressed);
        match (v.expect, result) {
            (None, Ok(out)) => assert_eq!(out, v.plain, "vector {}", v.name),
            (None, Err(e)) => panic!("vector {}: {e}", v.name),
            (Some(kind), Ok(_)) => panic!("vector {}: expected {kind:?}, decoded", v.name),
            (Some(kind), Err(e)) => assert_eq!(e.kind(), kind, "vector {}: {e}", v.name),
        }
    }
}

#[test]
fn valid_vectors_reencode_and_roundtrip() {
    for v in load_vectors().into_iter().filter(|v| v.expect.is_none()) {
        let e = engine(v.codec);
        let packed = e.compress(&v.plain).unwrap();
        assert_eq!(e.decompress(&packed).unwrap(), v.plain, "vector {}", v.name);
    }
}
