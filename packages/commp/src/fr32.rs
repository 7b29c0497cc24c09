//! Fr32 padding: every 127 input bytes become four 254-bit field elements (128 bytes) with the
//! two high bits of each element cleared.

pub const UNPADDED_QUAD: usize = 127;
pub const PADDED_QUAD: usize = 128;

/// Expand one 127-byte quad into 128 bytes.
pub fn pad_quad(input: &[u8], out: &mut [u8]) {
    debug_assert_eq!(input.len(), UNPADDED_QUAD);
    debug_assert_eq!(out.len(), PADDED_QUAD);

    out[..32].copy_from_slice(&input[..32]);
    out[31] &= 0x3f;

    for i in 32..64 {
        out[i] = (input[i] << 2) | (input[i - 1] >> 6);
    }
    out[63] &= 0x3f;

    for i in 64..96 {
        out[i] = (input[i] << 4) | (input[i - 1] >> 4);
    }
    out[95] &= 0x3f;

    for i in 96..127 {
        out[i] = (input[i] << 6) | (input[i - 1] >> 2);
    }
    out[127] = input[126] >> 2;
}

/// Unpadded capacity of a padded size.
pub const fn unpadded_size(padded: u64) -> u64 {
    padded - padded / 128
}

/// Padded size holding `unpadded` bytes, before power-of-two alignment.
pub const fn padded_size(unpadded: u64) -> u64 {
    unpadded.div_ceil(UNPADDED_QUAD as u64) * PADDED_QUAD as u64
}
