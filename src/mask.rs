//! WebSocket frame masking utilities
//!
//! Client-to-server payloads are XORed with a repeating 4-byte key. The same
//! operation masks and unmasks, since XOR is its own inverse.

/// Apply a WebSocket mask in place.
///
/// Byte `i` of `data` is XORed with `mask[i % 4]`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // 8 bytes at a time; the mask repeats every 4 so a doubled key lines up
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Generate a random mask for client-side frames.
///
/// Masks need not be cryptographically strong here; they only exist so the
/// server side can be exercised the way a browser would drive it.
#[cfg(feature = "fastrand")]
#[inline]
pub fn generate_mask() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}

#[cfg(not(feature = "fastrand"))]
#[inline]
pub fn generate_mask() -> [u8; 4] {
    let mut seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    // xorshift64
    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;

    (seed as u32).to_ne_bytes()
}
