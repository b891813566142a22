use crate::consts::{
    MAX_MAB_MICROS, MIN_BREAK_MICROS, MIN_MAB_MICROS, PREAMBLE_BYTE,
    RDM_MAX_DISCOVERY_RESPONSE_SIZE, SEPARATOR_BYTE,
};
use crate::unique_identifier::UniqueIdentifier;

#[inline]
pub(crate) fn calculate_checksum(data: &[u8]) -> u16 {
    let mut checksum = 0u16;

    for byte in data {
        checksum = checksum.wrapping_add(*byte as u16);
    }

    checksum
}

/// Encode bytes for a discovery response. Every source byte becomes the pair
/// `byte | 0xAA, byte | 0x55`. The destination has to be twice the source size.
pub(crate) fn encode_disc_unique(src: &[u8], dest: &mut [u8]) {
    debug_assert!(dest.len() >= src.len() * 2);

    for (index, byte) in src.iter().enumerate() {
        dest[index * 2] = byte | 0xAA;
        dest[index * 2 + 1] = byte | 0x55;
    }
}

/// Decode a discovery package. The destination has to be at least half the source size.
pub(crate) fn decode_disc_unique(src: &[u8], dest: &mut [u8]) {
    debug_assert!(dest.len() * 2 >= src.len());

    for (index, byte) in src.chunks(2).map(|chunk| chunk[0] & chunk[1]).enumerate() {
        dest[index] = byte;
    }
}

/// Builds the 24 byte discovery response frame (7 preamble bytes, separator, encoded uid and
/// encoded checksum).
pub fn encode_discovery_response(uid: UniqueIdentifier) -> [u8; RDM_MAX_DISCOVERY_RESPONSE_SIZE] {
    let mut frame_buffer = [PREAMBLE_BYTE; RDM_MAX_DISCOVERY_RESPONSE_SIZE];
    frame_buffer[7] = SEPARATOR_BYTE;

    encode_disc_unique(&uid.to_bytes(), &mut frame_buffer[8..20]);

    let checksum = calculate_checksum(&frame_buffer[8..20]);
    encode_disc_unique(&checksum.to_be_bytes(), &mut frame_buffer[20..24]);

    frame_buffer
}

/// Duration in microseconds of `bits` bit times at `baud_rate`, rounded up.
pub fn bits_to_micros(bits: u32, baud_rate: u32) -> u32 {
    let numerator = bits as u64 * 1_000_000;
    let baud_rate = baud_rate.max(1) as u64;

    numerator.div_ceil(baud_rate) as u32
}

/// Returns true if the break length can be put on the wire.
pub fn is_valid_break(break_len_us: u32) -> bool {
    break_len_us >= MIN_BREAK_MICROS
}

/// Returns true if the mark after break length can be put on the wire.
pub fn is_valid_mab(mab_len_us: u32) -> bool {
    (MIN_MAB_MICROS..=MAX_MAB_MICROS).contains(&mab_len_us)
}
