#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipress::block::ByteCursor;
use oxipress::codec::zstd::frame::FrameHeader;
use oxipress::codec::zstd::huffman::HuffmanTable;
use oxipress::codec::zstd::literals::decode_literals;
use oxipress::codec::zstd::sequences::{SequenceTables, read_sequences};

fuzz_target!(|data: &[u8]| {
    // Section parsers on their own, below the frame layer.
    let _ = FrameHeader::read(&mut ByteCursor::new(data));

    if let Ok((table, used)) = HuffmanTable::read(data) {
        let mut out = Vec::new();
        let _ = table.decode_stream(&data[used..], 64, &mut out);
    }

    let mut huffman = None;
    let mut literals = Vec::new();
    if let Ok(used) = decode_literals(data, &mut huffman, &mut literals) {
        let mut tables = SequenceTables::default();
        let _ = read_sequences(&data[used..], &mut tables);
    }
});
