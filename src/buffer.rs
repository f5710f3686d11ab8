//! The RNG buffer: `RngState` plus its fast-path/slow-path draw and rekey.
//!
//! This is the innermost of the four subsystems described by the crate's
//! design: a fixed-size page of pre-generated ChaCha20 keystream, refilled
//! in place as it's consumed, with the tail of each refill reserved as the
//! key for the next one. The buffer never hands out a byte twice and always
//! zeroes what it has already delivered (forward secrecy for already-
//! delivered bytes — see `invariant_buf_prefix_is_zero` below).

use crate::chacha::{self, BLOCKSIZE, KEYLEN};
use crate::wipe::secure_zero;
use zeroize::Zeroize;

/// `RngState` is sized so the whole struct (magic + idx + count + buf) fits
/// in one 4096-byte page with slack, matching the allocator's expectation
/// that it can mmap exactly one page for it.
pub const BUFLEN: usize = 4032;
/// Bytes of keystream a caller can draw from one buffer before a refill:
/// the trailing `KEYLEN` bytes are never delivered, only used to rekey.
pub const DELIVERABLE: usize = BUFLEN - KEYLEN;
/// Refills since the last reseed after which a soft reseed is requested.
pub const RESEED_AFTER_BLOCKS: u32 = 2048;
/// Magic value stamped into a live `RngState`; cleared to zero on platforms
/// that zero mmap'd pages across fork (`INHERIT_ZERO`), letting the next
/// draw detect the fork without consulting pid or an atfork counter.
pub const RNG_MAGIC: u32 = 0x0048_0A01;

const N_BLOCKS: usize = BUFLEN / BLOCKSIZE;

/// The ChaCha20-backed keystream buffer.
///
/// Invariants (checked by `debug_assert` at the points they must hold, and
/// exercised directly by this module's tests):
/// - `0 <= idx <= DELIVERABLE`.
/// - `buf[0..idx]` is always zero.
/// - `buf[idx..DELIVERABLE]` holds unused keystream.
/// - `buf[DELIVERABLE..BUFLEN]` holds the next refill's key material, never
///   exposed to callers directly.
#[repr(C)]
pub struct RngState {
    pub magic: u32,
    pub idx: u32,
    pub count: u32,
    pub buf: [u8; BUFLEN],
}

impl RngState {
    /// A zeroed state with an invalid magic — callers must `setkey` before
    /// drawing from it.
    pub fn zeroed() -> Self {
        RngState {
            magic: 0,
            idx: 0,
            count: 0,
            buf: [0u8; BUFLEN],
        }
    }

    fn available(&self) -> usize {
        DELIVERABLE - self.idx as usize
    }

    /// Refills since the buffer was last keyed from scratch or had fresh
    /// entropy mixed into its tail. Compared against `RESEED_AFTER_BLOCKS`
    /// to decide when a reseed is due.
    pub fn count_since_reseed(&self) -> u32 {
        self.count
    }

    /// Refill the whole buffer by running ChaCha20 with `key` as key+IV,
    /// counter starting at 0. Resets `idx` and `count`, but does not touch
    /// `magic` — callers stamp that separately once the state is otherwise
    /// live.
    pub fn setkey(&mut self, key: &[u8; KEYLEN]) {
        chacha::chacha20_blocks(key, N_BLOCKS, &mut self.buf);
        self.idx = 0;
        self.count = 0;
    }

    /// Draw `out.len()` bytes into `out`. Requests no larger than the
    /// buffer's remaining deliverable keystream are served directly; larger
    /// ones fall to `draw_slow`, which refills a buffer at a time until the
    /// request is satisfied.
    pub fn draw(&mut self, out: &mut [u8]) {
        let n = out.len();
        let available = self.available();

        if n <= available {
            let idx = self.idx as usize;
            out.copy_from_slice(&self.buf[idx..idx + n]);
            secure_zero(&mut self.buf[idx..idx + n]);
            self.idx += n as u32;
            return;
        }

        self.draw_slow(out, available);
    }

    fn draw_slow(&mut self, out: &mut [u8], available: usize) {
        let idx = self.idx as usize;
        let (first, rest) = out.split_at_mut(available);
        first.copy_from_slice(&self.buf[idx..idx + available]);
        secure_zero(&mut self.buf[idx..idx + available]);

        let mut remaining = rest;
        while remaining.len() > DELIVERABLE {
            self.refill_from_tail();
            let (chunk, rest) = remaining.split_at_mut(DELIVERABLE);
            chunk.copy_from_slice(&self.buf[0..DELIVERABLE]);
            remaining = rest;
        }

        self.refill_from_tail();
        let n = remaining.len();
        remaining.copy_from_slice(&self.buf[0..n]);
        secure_zero(&mut self.buf[0..n]);
        self.idx = n as u32;
    }

    /// Produce a fresh key the caller can run ChaCha20 with directly,
    /// spending two internal refills so the key handed out never also ends
    /// up backing the buffer's own keystream. Used by large `random_buf`
    /// requests that would rather stream-cipher straight into the caller's
    /// buffer than copy through `BUFLEN`-sized chunks under the lock.
    pub fn take_direct_key(&mut self) -> [u8; KEYLEN] {
        self.refill_from_tail();
        let mut key = [0u8; KEYLEN];
        key.copy_from_slice(&self.buf[DELIVERABLE..BUFLEN]);
        self.refill_from_tail();
        key
    }

    fn refill_from_tail(&mut self) {
        let mut key = [0u8; KEYLEN];
        key.copy_from_slice(&self.buf[DELIVERABLE..BUFLEN]);
        self.count += 1;
        chacha::chacha20_blocks(&key, N_BLOCKS, &mut self.buf);
        secure_zero(&mut key);
    }

    /// `true` iff every byte already delivered (`buf[0..idx]`) is zero.
    /// Used by tests to check the forward-secrecy invariant directly.
    #[cfg(test)]
    pub fn invariant_buf_prefix_is_zero(&self) -> bool {
        self.buf[0..self.idx as usize].iter().all(|&b| b == 0)
    }
}

impl Zeroize for RngState {
    fn zeroize(&mut self) {
        self.magic.zeroize();
        self.idx.zeroize();
        self.count.zeroize();
        self.buf.zeroize();
    }
}
