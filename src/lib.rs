//! A userspace cryptographically secure pseudorandom number generator.
//!
//! Built around a ChaCha20 keystream buffer that rekeys itself from its own
//! tail, seeded at startup — and periodically thereafter — from whatever mix
//! of OS and hardware entropy sources the platform offers, combined with
//! BLAKE2b. State lives on a page isolated from fork'd children and from
//! accidental sharing.
//!
//! Most callers only need the free functions at the crate root, which draw
//! from a single process-wide instance built lazily on first use:
//!
//! ```no_run
//! let word: u32 = securerandom::random().unwrap();
//! let die_roll = securerandom::random_uniform(6).unwrap();
//! ```
//!
//! Callers that need an independently-seeded generator — tests, multi-tenant
//! hosts, anything that must not share state with the process-wide instance
//! — can construct an [`Instance`] directly.

mod alloc;
mod blake2b;
mod buffer;
mod chacha;
mod entropy;
mod error;
mod lock;
mod state;
mod wipe;

pub use error::{Error, Result};
pub use state::Instance;

/// Draw a uniformly random `u32` from the process-wide instance.
pub fn random() -> Result<u32> {
    state::random()
}

/// Draw a uniformly random `u64` from the process-wide instance.
pub fn random64() -> Result<u64> {
    state::random64()
}

/// Draw a uniformly random `u32` in `[0, upper)` from the process-wide
/// instance. Returns `0` if `upper` is `0`.
pub fn random_uniform(upper: u32) -> Result<u32> {
    state::random_uniform(upper)
}

/// Draw a uniformly random `u64` in `[0, upper)` from the process-wide
/// instance. Returns `0` if `upper` is `0`.
pub fn random_uniform64(upper: u64) -> Result<u64> {
    state::random_uniform64(upper)
}

/// Fill `out` with random bytes drawn from the process-wide instance.
pub fn random_buf(out: &mut [u8]) -> Result<()> {
    state::random_buf(out)
}

/// Mix caller-supplied bytes into the process-wide instance's pool as
/// additional, not necessarily trustworthy, entropy.
pub fn addrandom(data: &[u8]) -> Result<()> {
    state::addrandom(data)
}

/// Force the process-wide instance's next draw to trigger a reseed.
pub fn need_reseed() {
    state::need_reseed()
}

/// Seeding quality of the process-wide instance: `-2` init failed, `-1`
/// underseeded, `0` partial, `1` weak-only, `2` strong.
pub fn status() -> i8 {
    state::status()
}

/// Configure the Unix domain socket path of an EGD instance to fold in as
/// an additional entropy source. Pass `None` to disable it. Returns
/// [`Error::ConfigError`] without changing the configured address if
/// `path` is too long for a Unix domain socket.
pub fn set_egd_address(path: Option<String>) -> Result<()> {
    state::set_egd_address(path)
}

/// Size in bytes of the state an isolated [`Instance`] keeps on its own
/// protected page.
pub fn state_size() -> usize {
    Instance::state_size()
}
