//! Compiler-resistant secure zeroing.
//!
//! Every secret buffer this crate ever allocates on the stack or heap —
//! scratch entropy, scratch digests, the RNG buffer's consumed prefix, the
//! RNG buffer at teardown — must be wiped with a primitive the optimizer
//! cannot elide as a dead store. `zeroize` is that primitive; we never hand
//! a plain `= [0u8; N]` assignment to the compiler for secret data.

use zeroize::Zeroize;

/// Zero `buf` in place with a compiler barrier against dead-store elimination.
#[inline]
pub fn secure_zero(buf: &mut [u8]) {
    buf.zeroize();
}

/// Zero any `Zeroize`-implementing value in place.
#[inline]
pub fn secure_zero_val<T: Zeroize>(val: &mut T) {
    val.zeroize();
}
