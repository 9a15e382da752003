//! MIFARE Classic tag PRNG
//!
//! The tag nonce generator is a 16-bit LFSR clocked into a 32-bit shift
//! register with feedback taps at bits 16, 18, 19 and 21 (counted on the
//! byte-swapped word). Key recovery tools assume nonces follow this sequence,
//! so emulated nonces are derived with the same successor function.

/// Advance the PRNG `n` steps from `x`
pub fn prng_successor(x: u32, n: u32) -> u32 {
    let mut x = x.swap_bytes();
    for _ in 0..n {
        let feedback = ((x >> 16) ^ (x >> 18) ^ (x >> 19) ^ (x >> 21)) & 1;
        x = (x >> 1) | (feedback << 31);
    }
    x.swap_bytes()
}

/// Tag nonce derived from a free-running counter value
pub fn nonce_from_counter(counter: u32) -> u32 {
    prng_successor(counter, 32)
}
