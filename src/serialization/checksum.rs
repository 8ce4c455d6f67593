//! TFRecord checksum: CRC-32C (Castagnoli) with the format's masking step.

const MASK_DELTA: u32 = 0xA282_EAD8;

/// Masked CRC as stored in TFRecord frames.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
        .rotate_right(15)
        .wrapping_add(MASK_DELTA)
}
