//! Lifecycle management: single init, fork detection, periodic reseeding,
//! and the draw operations built on top of `buffer::RngState`.
//!
//! Grounded on `original_source/src/otterylite.c`'s `ottery_st_*` family.
//! The redesign collapses the original's separate "once" flag, pid field,
//! and atfork counter into one `needs_reinit()` predicate (spec.md §9), and
//! replaces the process-wide singleton's hand-rolled double-checked
//! locking with `OnceLock` (spec.md §9's other redesign flag).

use crate::alloc::MappedState;
use crate::blake2b;
use crate::buffer::{RESEED_AFTER_BLOCKS, RNG_MAGIC};
use crate::chacha::KEYLEN;
use crate::entropy::{self, MINLEN, Status};
use crate::error::{Error, Result};
use crate::lock::Lock;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

static FORK_GENERATION: AtomicU64 = AtomicU64::new(0);
static ATFORK_INSTALLED: std::sync::Once = std::sync::Once::new();

extern "C" fn on_fork_in_child() {
    FORK_GENERATION.fetch_add(1, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_atfork() {
    ATFORK_INSTALLED.call_once(|| {
        // SAFETY: `on_fork_in_child` only touches an atomic and is
        // async-signal-safe.
        unsafe {
            libc::pthread_atfork(None, None, Some(on_fork_in_child));
        }
    });
}

#[cfg(not(unix))]
fn install_atfork() {}

#[cfg(unix)]
fn current_pid() -> i32 {
    // SAFETY: getpid has no preconditions.
    unsafe { libc::getpid() }
}

#[cfg(not(unix))]
fn current_pid() -> i32 {
    std::process::id() as i32
}

struct Inner {
    state: MappedState,
    pid: i32,
    fork_generation: u64,
    status: Status,
    live: bool,
    /// Number of times this instance has been (re)seeded, hard or soft,
    /// since construction. Spec.md §3's `OuterState::seed_counter`.
    seed_counter: u32,
}

/// An isolated RNG instance. Most callers don't need this directly — see
/// the free functions at the crate root for the single-instance form — but
/// it's available for callers who want a private, independently-seeded
/// generator (tests, multi-tenant hosts, anything that must not share state
/// with the process-global instance).
pub struct Instance {
    lock: Lock<Inner>,
}

impl Instance {
    /// Construct and hard-seed a new instance. Fails only if every entropy
    /// source is unavailable or starved.
    pub fn try_init() -> Result<Self> {
        install_atfork();
        let instance = Instance {
            lock: Lock::new(Inner {
                state: MappedState::new(),
                pid: current_pid(),
                fork_generation: FORK_GENERATION.load(Ordering::SeqCst),
                status: Status::InitFailed,
                live: false,
                seed_counter: 0,
            }),
        };
        instance.hard_seed()?;
        Ok(instance)
    }

    /// Like `try_init`, but matches the spec's single-instance entry point
    /// naming — construction can't silently succeed with bad seeding, so
    /// this is just `try_init` under the name callers expect.
    pub fn init() -> Result<Self> {
        Self::try_init()
    }

    pub fn teardown(self) {
        drop(self);
    }

    /// Size in bytes of the state this instance keeps isolated on its own
    /// page — useful for callers sizing their own allocations to match.
    pub fn state_size() -> usize {
        std::mem::size_of::<crate::buffer::RngState>()
    }

    fn needs_reinit(&self, inner: &Inner) -> bool {
        if !inner.live {
            return true;
        }
        // pid and the atfork-maintained generation counter must be checked
        // *before* touching the mapped page. On platforms that fall back to
        // the INHERIT_NONE-equivalent strategy (`MADV_DONTFORK` on Linux,
        // `minherit(INHERIT_NONE)` on a BSD lacking INHERIT_ZERO), the page
        // is unmapped — not zeroed — in a forked child, so dereferencing
        // `state.get().magic` first would fault before this check ever ran.
        // pid/generation alone are always safe to check and always catch a
        // fork, so they go first; the magic check below is the additional,
        // page-resident signal used where INHERIT_ZERO actually zeroed it.
        if inner.pid != current_pid() {
            return true;
        }
        if inner.fork_generation != FORK_GENERATION.load(Ordering::SeqCst) {
            return true;
        }
        if inner.state.get().magic != RNG_MAGIC {
            return true;
        }
        false
    }

    fn hard_seed(&self) -> Result<()> {
        let mut seed_buf = vec![0u8; entropy::max_output_len().max(MINLEN)];
        let (written, status) = entropy::collect(&mut seed_buf);
        if written < MINLEN {
            let mut guard = self.lock.lock();
            guard.status = Status::InitFailed;
            return Err(Error::EntropyStarved);
        }

        let digest = blake2b::digest(&seed_buf[..written]);
        let mut key = [0u8; KEYLEN];
        key.copy_from_slice(&digest[..KEYLEN]);

        let mut guard = self.lock.lock();
        if guard.live {
            // Reinitializing an instance that was already live means this
            // call was triggered by `needs_reinit` — fork or state
            // corruption. Never reuse the old page: on the fault-on-access
            // strategies (`MADV_DONTFORK` on Linux, `minherit(INHERIT_NONE)`
            // on a BSD without INHERIT_ZERO) it may not even be mapped in
            // this process anymore, and on the heap fallback a forked
            // child's copy is a copy-on-write duplicate of the parent's key
            // material rather than a clean slate. A fresh page is always
            // correct; reusing one is only ever an optimization for the
            // INHERIT_ZERO case, and this crate doesn't special-case it.
            guard.state = MappedState::new();
        }
        guard.state.get_mut().setkey(&key);
        guard.state.get_mut().magic = RNG_MAGIC;
        guard.pid = current_pid();
        guard.fork_generation = FORK_GENERATION.load(Ordering::SeqCst);
        guard.status = status;
        guard.live = true;
        guard.seed_counter = guard.seed_counter.wrapping_add(1);
        drop(guard);

        crate::wipe::secure_zero_val(&mut key);
        Ok(())
    }

    /// Rekey from fresh entropy without a hard reinit. Releases the lock
    /// while collecting entropy (spec.md §5's concurrency note: entropy
    /// collection can block, so the mutex isn't held across it), and per
    /// spec.md §4.7's `seed(state, release_lock)`, draws `DIGEST_LEN` bytes
    /// from the live stream both before *and* after the unlocked collection
    /// window: the trailing draw captures any `addrandom` contributions
    /// that landed while the lock was released. The whole blob
    /// (`stream_prefix || entropy || stream_suffix`) is hashed once and the
    /// result replaces the key via `setkey`, matching the original's
    /// `ottery_seed` rather than XORing fresh material into the buffer's
    /// tail.
    fn soft_reseed(&self) {
        let mut stream_prefix = [0u8; blake2b::DIGEST_LEN];
        {
            let mut guard = self.lock.lock();
            guard.state.get_mut().draw(&mut stream_prefix);
        }

        let mut collected = vec![0u8; entropy::max_output_len().max(MINLEN)];
        let (written, status) = entropy::collect(&mut collected);

        if written < MINLEN {
            // Leave `count` untouched: it's still >= RESEED_AFTER_BLOCKS,
            // so the very next draw retries a soft reseed rather than
            // silently running on a stale key indefinitely.
            crate::wipe::secure_zero_val(&mut stream_prefix);
            return;
        }

        let mut stream_suffix = [0u8; blake2b::DIGEST_LEN];
        {
            let mut guard = self.lock.lock();
            guard.state.get_mut().draw(&mut stream_suffix);
        }

        let mut blob =
            Vec::with_capacity(blake2b::DIGEST_LEN + written + blake2b::DIGEST_LEN);
        blob.extend_from_slice(&stream_prefix);
        blob.extend_from_slice(&collected[..written]);
        blob.extend_from_slice(&stream_suffix);

        let digest = blake2b::digest(&blob);
        let mut key = [0u8; KEYLEN];
        key.copy_from_slice(&digest[..KEYLEN]);

        let mut guard = self.lock.lock();
        guard.state.get_mut().setkey(&key);
        if status as i8 > guard.status as i8 {
            guard.status = status;
        }
        guard.seed_counter = guard.seed_counter.wrapping_add(1);
        drop(guard);

        crate::wipe::secure_zero_val(&mut key);
        crate::wipe::secure_zero_val(&mut stream_prefix);
        crate::wipe::secure_zero_val(&mut stream_suffix);
        crate::wipe::secure_zero(&mut blob);
    }

    fn ensure_seeded(&self) -> Result<()> {
        let reinit_needed = {
            let guard = self.lock.lock();
            self.needs_reinit(&guard)
        };
        if reinit_needed {
            self.hard_seed()?;
        }

        let soft_needed = {
            let guard = self.lock.lock();
            guard.state.get().count_since_reseed() >= RESEED_AFTER_BLOCKS
        };
        if soft_needed {
            self.soft_reseed();
        }
        Ok(())
    }

    /// Draw arbitrary-length random bytes into `out`.
    pub fn random_buf(&self, out: &mut [u8]) -> Result<()> {
        self.ensure_seeded()?;

        if out.len() > crate::buffer::DELIVERABLE {
            let mut key = {
                let mut guard = self.lock.lock();
                guard.state.get_mut().take_direct_key()
            };
            let n_blocks = out.len().div_ceil(crate::chacha::BLOCKSIZE);
            let mut scratch = vec![0u8; n_blocks * crate::chacha::BLOCKSIZE];
            crate::chacha::chacha20_blocks(&key, n_blocks, &mut scratch);
            out.copy_from_slice(&scratch[..out.len()]);
            crate::wipe::secure_zero(&mut scratch);
            crate::wipe::secure_zero_val(&mut key);
            return Ok(());
        }

        let mut guard = self.lock.lock();
        guard.state.get_mut().draw(out);
        Ok(())
    }

    /// Draw a uniformly random `u32`.
    pub fn random(&self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.random_buf(&mut bytes)?;
        Ok(u32::from_ne_bytes(bytes))
    }

    /// Draw a uniformly random `u64`.
    ///
    /// The original reads only `sizeof(unsigned)` bytes here — effectively
    /// 4 bytes zero-extended to 64 bits on most platforms — and this is
    /// called out in spec.md as a bug not to replicate. This always draws
    /// a full 8 bytes.
    pub fn random64(&self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.random_buf(&mut bytes)?;
        Ok(u64::from_ne_bytes(bytes))
    }

    /// Draw a uniformly random `u32` in `[0, upper)`.
    ///
    /// `upper == 0` returns 0, matching the final revision of the original
    /// (an earlier revision treated it as undefined behavior; spec.md
    /// follows the later, safer one). The sampling method itself is the
    /// original's division method, not modulo-rejection: `divisor =
    /// u32::MAX / upper`, then draw raw words and divide by `divisor` until
    /// the quotient falls below `upper`. Kept bit-for-bit equivalent to
    /// `otterylite.c`'s `random_uniform` rather than the more common
    /// modulo-rejection idiom, since spec.md calls this algorithm out as
    /// exact.
    pub fn random_uniform(&self, upper: u32) -> Result<u32> {
        if upper == 0 {
            return Ok(0);
        }

        let divisor = u32::MAX / upper;
        loop {
            let result = self.random()? / divisor;
            if result < upper {
                return Ok(result);
            }
        }
    }

    /// `u64` counterpart to `random_uniform`.
    pub fn random_uniform64(&self, upper: u64) -> Result<u64> {
        if upper == 0 {
            return Ok(0);
        }

        let divisor = u64::MAX / upper;
        loop {
            let result = self.random64()? / divisor;
            if result < upper {
                return Ok(result);
            }
        }
    }

    /// Mix caller-supplied bytes into the pool as extra, never assumed-
    /// trustworthy, entropy. Does not by itself change `status()`.
    ///
    /// Per spec.md §4.7: composes `stream_bytes(DIGEST_LEN) || H(data)`,
    /// hashes the whole blob, and replaces the key with the result via
    /// `setkey` — not an XOR into the buffer's tail.
    pub fn addrandom(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.ensure_seeded()?;

        let input_digest = blake2b::digest(data);

        let mut guard = self.lock.lock();
        let mut blob = [0u8; blake2b::DIGEST_LEN * 2];
        guard.state.get_mut().draw(&mut blob[..blake2b::DIGEST_LEN]);
        blob[blake2b::DIGEST_LEN..].copy_from_slice(&input_digest);

        let combined = blake2b::digest(&blob);
        let mut key = [0u8; KEYLEN];
        key.copy_from_slice(&combined[..KEYLEN]);
        guard.state.get_mut().setkey(&key);
        drop(guard);

        crate::wipe::secure_zero_val(&mut key);
        crate::wipe::secure_zero(&mut blob);
        Ok(())
    }

    /// Force a reseed on the next draw. Per spec.md §4.7 and the original's
    /// `need_reseed` (`otterylite.c`: `RNG_PTR->count = RESEED_AFTER_BLOCKS
    /// + 1`), this is a mutating action, not a query: it pushes the refill
    /// counter past the threshold under the lock so the next `ensure_seeded`
    /// call trips a soft reseed.
    pub fn need_reseed(&self) {
        let mut guard = self.lock.lock();
        guard.state.get_mut().count = RESEED_AFTER_BLOCKS + 1;
    }

    /// Seeding quality: -2 init failed, -1 underseeded, 0 partial, 1
    /// weak-only, 2 strong. Never panics, even if `try_init` failed.
    pub fn status(&self) -> i8 {
        self.lock.lock().status.as_i8()
    }

    pub fn set_egd_address(&self, path: Option<String>) -> Result<()> {
        crate::entropy::egd::set_address(path)
    }

    /// Number of times this instance has been seeded (hard init, fork
    /// reinit, or soft reseed) since construction. Not part of spec.md §6's
    /// public API table, but exposed as a diagnostic hook matching
    /// `OuterState::seed_counter` (spec.md §3), useful for tests and
    /// callers auditing reseed behavior.
    pub fn seed_counter(&self) -> u32 {
        self.lock.lock().seed_counter
    }
}

static SINGLETON: OnceLock<std::result::Result<Instance, Error>> = OnceLock::new();

fn singleton() -> std::result::Result<&'static Instance, Error> {
    match SINGLETON.get_or_init(Instance::try_init) {
        Ok(instance) => Ok(instance),
        Err(e) => Err(*e),
    }
}

/// Draw a uniformly random `u32` from the process-wide instance.
pub fn random() -> Result<u32> {
    singleton()?.random()
}

/// Draw a uniformly random `u64` from the process-wide instance.
pub fn random64() -> Result<u64> {
    singleton()?.random64()
}

/// Draw a uniformly random `u32` in `[0, upper)` from the process-wide
/// instance.
pub fn random_uniform(upper: u32) -> Result<u32> {
    singleton()?.random_uniform(upper)
}

/// Draw a uniformly random `u64` in `[0, upper)` from the process-wide
/// instance.
pub fn random_uniform64(upper: u64) -> Result<u64> {
    singleton()?.random_uniform64(upper)
}

/// Fill `out` with random bytes from the process-wide instance.
pub fn random_buf(out: &mut [u8]) -> Result<()> {
    singleton()?.random_buf(out)
}

/// Mix extra bytes into the process-wide instance's pool.
pub fn addrandom(data: &[u8]) -> Result<()> {
    singleton()?.addrandom(data)
}

/// Force the process-wide instance's next draw to trigger a reseed. A
/// no-op if the instance was never successfully initialized — the next
/// call will hard-seed it from scratch anyway.
pub fn need_reseed() {
    if let Ok(instance) = singleton() {
        instance.need_reseed();
    }
}

/// Seeding quality of the process-wide instance; `-2` if it was never
/// successfully initialized.
pub fn status() -> i8 {
    match SINGLETON.get() {
        Some(Ok(instance)) => instance.status(),
        Some(Err(_)) => Status::InitFailed.as_i8(),
        None => Status::InitFailed.as_i8(),
    }
}

/// Configure the EGD socket path used by the process-wide instance's EGD
/// entropy source. Returns an error without changing the configured
/// address if `path` is too long for a Unix domain socket.
pub fn set_egd_address(path: Option<String>) -> Result<()> {
    if let Some(instance) = SINGLETON.get().and_then(|r| r.as_ref().ok()) {
        instance.set_egd_address(path)
    } else {
        crate::entropy::egd::set_address(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_instance_inits_and_draws() {
        let instance = Instance::try_init().expect("entropy must be available in test env");
        let mut buf = [0u8; 64];
        instance.random_buf(&mut buf).unwrap();
        assert_ne!(buf, [0u8; 64]);
    }

    #[test]
    fn large_request_above_buffer_capacity_still_fills_and_varies() {
        let instance = Instance::try_init().unwrap();
        let mut buf = vec![0u8; crate::buffer::DELIVERABLE + 4096];
        instance.random_buf(&mut buf).unwrap();
        assert!(buf.iter().any(|&b| b != 0));

        let mut second = vec![0u8; crate::buffer::DELIVERABLE + 4096];
        instance.random_buf(&mut second).unwrap();
        assert_ne!(buf, second);
    }

    #[test]
    fn status_is_not_init_failed_after_successful_init() {
        let instance = Instance::try_init().unwrap();
        assert_ne!(instance.status(), Status::InitFailed.as_i8());
    }

    #[test]
    fn random_uniform_zero_upper_returns_zero() {
        let instance = Instance::try_init().unwrap();
        assert_eq!(instance.random_uniform(0).unwrap(), 0);
        assert_eq!(instance.random_uniform64(0).unwrap(), 0);
    }

    #[test]
    fn random_uniform_respects_bound() {
        let instance = Instance::try_init().unwrap();
        for _ in 0..200 {
            let v = instance.random_uniform(17).unwrap();
            assert!(v < 17);
        }
    }

    #[test]
    fn random64_draws_eight_distinct_bytes_worth_of_entropy() {
        let instance = Instance::try_init().unwrap();
        let a = instance.random64().unwrap();
        let b = instance.random64().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn addrandom_does_not_error_on_empty_input() {
        let instance = Instance::try_init().unwrap();
        instance.addrandom(&[]).unwrap();
    }

    #[test]
    fn addrandom_changes_subsequent_output() {
        let instance = Instance::try_init().unwrap();
        let mut before = [0u8; 16];
        instance.random_buf(&mut before).unwrap();
        instance.addrandom(b"caller supplied entropy").unwrap();
        let mut after = [0u8; 16];
        instance.random_buf(&mut after).unwrap();
        assert_ne!(before, after);
    }

    /// P8 (spec.md §8): `next_bytes_after(addrandom(x))` equals
    /// `chacha20(H(stream_prefix || H(x)))[...]` for known `x` — the exact
    /// formula, not just "the output changed".
    #[test]
    fn addrandom_follows_the_stream_prefix_digest_formula() {
        let instance = Instance::try_init().unwrap();
        let mut warmup = [0u8; 8];
        instance.random_buf(&mut warmup).unwrap();

        let stream_prefix = {
            let guard = instance.lock.lock();
            let idx = guard.state.get().idx as usize;
            let mut snap = [0u8; blake2b::DIGEST_LEN];
            snap.copy_from_slice(&guard.state.get().buf[idx..idx + blake2b::DIGEST_LEN]);
            snap
        };

        let data = b"addrandom formula check";
        let input_digest = blake2b::digest(data);
        let mut blob = [0u8; blake2b::DIGEST_LEN * 2];
        blob[..blake2b::DIGEST_LEN].copy_from_slice(&stream_prefix);
        blob[blake2b::DIGEST_LEN..].copy_from_slice(&input_digest);
        let combined = blake2b::digest(&blob);
        let mut expected_key = [0u8; KEYLEN];
        expected_key.copy_from_slice(&combined[..KEYLEN]);

        instance.addrandom(data).unwrap();

        let mut expected_block = [0u8; crate::chacha::BLOCKSIZE];
        crate::chacha::chacha20_blocks(&expected_key, 1, &mut expected_block);

        let mut actual = [0u8; crate::chacha::BLOCKSIZE];
        instance.random_buf(&mut actual).unwrap();

        assert_eq!(actual, expected_block);
    }

    #[test]
    fn free_functions_delegate_to_a_working_singleton() {
        let mut buf = [0u8; 32];
        random_buf(&mut buf).unwrap();
        assert_ne!(buf, [0u8; 32]);
        assert!(status() >= Status::Underseeded.as_i8());
    }

    /// Scenario 1 (spec.md §8): cold draw. A fresh instance's first
    /// `random()` call should leave `seed_counter == 1` (the hard seed
    /// `try_init` performed) and advance the buffer's `idx` by exactly 4
    /// bytes.
    #[test]
    fn cold_draw_seeds_once_and_advances_idx_by_four() {
        let instance = Instance::try_init().unwrap();
        assert_eq!(instance.seed_counter(), 1);

        instance.random().unwrap();
        assert_eq!(instance.seed_counter(), 1);

        let guard = instance.lock.lock();
        assert_eq!(guard.state.get().idx, 4);
        assert!(guard.status.as_i8() >= Status::Underseeded.as_i8());
    }

    /// Scenario 2 (spec.md §8): drawing `(BUFLEN - KEYLEN) *
    /// (RESEED_AFTER_BLOCKS + 1)` bytes via repeated 4000-byte `random_buf`
    /// calls crosses the soft-reseed threshold exactly once, bumping
    /// `seed_counter` from 1 to 2. Each 4000-byte draw exceeds
    /// `DELIVERABLE` (3992) by 8 bytes, so it always costs exactly one
    /// internal refill; 2049 such draws reaches `count == RESEED_AFTER_BLOCKS`
    /// right before the last call, which is what trips the reseed.
    #[test]
    fn reseed_triggers_exactly_once_past_the_block_threshold() {
        let instance = Instance::try_init().unwrap();
        assert_eq!(instance.seed_counter(), 1);

        let mut buf = [0u8; 4000];
        for _ in 0..(RESEED_AFTER_BLOCKS + 1) {
            instance.random_buf(&mut buf).unwrap();
        }

        assert_eq!(instance.seed_counter(), 2);
    }

    /// `need_reseed` is a mutating action (spec.md §4.7/§6), not a query:
    /// it pushes `count` past `RESEED_AFTER_BLOCKS` so the very next draw
    /// triggers a soft reseed, without waiting for the normal volume
    /// threshold.
    #[test]
    fn need_reseed_forces_a_reseed_on_the_next_draw() {
        let instance = Instance::try_init().unwrap();
        assert_eq!(instance.seed_counter(), 1);

        instance.need_reseed();
        {
            let guard = instance.lock.lock();
            assert!(guard.state.get().count_since_reseed() > RESEED_AFTER_BLOCKS);
        }

        let mut buf = [0u8; 16];
        instance.random_buf(&mut buf).unwrap();
        assert_eq!(instance.seed_counter(), 2);
    }

    /// P10 (spec.md §8): the wipe primitive the allocator runs on teardown
    /// actually clears every field of the state, not just the buffer.
    /// `MappedState::drop` frees/unmaps the page immediately after wiping
    /// it, so this exercises the same `secure_zero_val` call against a live
    /// mapping instead of reading memory after it's released.
    #[test]
    fn wipe_clears_every_field_before_release() {
        let mut mapped = MappedState::new();
        {
            let st = mapped.get_mut();
            st.magic = 0xDEAD_BEEF;
            st.idx = 7;
            st.count = 3;
            st.buf[0] = 0xFF;
            st.buf[crate::buffer::BUFLEN - 1] = 0xAA;
        }

        crate::wipe::secure_zero_val(mapped.get_mut());

        let st = mapped.get();
        assert_eq!(st.magic, 0);
        assert_eq!(st.idx, 0);
        assert_eq!(st.count, 0);
        assert!(st.buf.iter().all(|&b| b == 0));
    }
}
