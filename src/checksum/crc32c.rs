// CRC-32C (Castagnoli, reflected polynomial 0x82F63B78).
//
// Byte-at-a-time table variant.  Snappy framing stores the checksum
// "masked" (rotated and offset) so that checksumming data that itself
// embeds CRCs stays well distributed.

const POLY: u32 = 0x82F6_3B78;
const MASK_DELTA: u32 = 0xA282_EAD8;

static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a CRC-32C over `data`, starting from a finalized value.
pub fn update(crc: u32, data: &[u8]) -> u32 {
    let mut state = !crc;
    for &b in data {
        state = TABLE[((state ^ u32::from(b)) & 0xFF) as usize] ^ (state >> 8);
    }
    !state
}

/// CRC-32C of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}

/// Snappy framing mask.
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask`].
pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
