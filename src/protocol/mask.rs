//! Payload masking (RFC 6455 section 5.3).
//!
//! Client frames arrive XOR-obfuscated with a 4-byte key; the same
//! operation both masks and unmasks.

/// XOR each payload byte with `mask[i % 4]`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
