//! Entropy acquisition dispatcher: queries a static table of platform
//! sources under a group/strength policy and reports how well-seeded the
//! result is.
//!
//! Grounded on `original_source/src/otterylite_entropy.h`'s
//! `entropy_sources[]` table and `ottery_getentropy_impl` dispatch loop,
//! restructured as a Rust enum-returning trait (per spec.md §9's redesign
//! flag: "replace ad-hoc sentinel returns with a tagged result").

pub mod egd;
mod fallback;
mod sources;

/// One source's yield for a single 32-byte chunk request.
#[derive(Debug)]
pub enum SourceOutcome {
    /// The source produced a full 32-byte chunk.
    Full([u8; CHUNK]),
    /// The source produced fewer than 32 bytes — accumulated, but doesn't
    /// count as a "success" for status purposes.
    Partial(Vec<u8>),
    /// The source doesn't apply on this platform/build.
    Unavailable,
    /// The source is implemented here but failed at runtime.
    Failed,
}

/// Bytes every source is asked to produce per call.
pub const CHUNK: usize = 32;
/// Minimum total bytes across all sources before we call the collection
/// "seeded" at all.
pub const MINLEN: usize = 32;

/// A minimal hand-rolled bitflags type: the pack doesn't pull in the
/// `bitflags` crate for anything this small, so this mirrors the style the
/// teacher and `other_examples` use for small fixed flag sets (plain
/// constants on a newtype over an integer).
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $val:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $name = $name($val);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

bitflags_like! {
    /// Which family a source belongs to. Two successful sources from the
    /// same group don't both count — the dispatcher stops at the first.
    pub struct Group: u16 {
        const HW = 1 << 0;
        const CPU = 1 << 1;
        const SYSCALL = 1 << 2;
        const DEVICE = 1 << 3;
        const EGD = 1 << 4;
        const KLUDGE = 1 << 5;
    }
}

bitflags_like! {
    /// Per-source trust annotations.
    pub struct SourceFlags: u8 {
        const WEAK = 1 << 0;
        const AVOID = 1 << 1;
    }
}

/// A single entropy source: a name for diagnostics, the function that
/// attempts to fill a 32-byte chunk, which group it belongs to, and its
/// trust flags.
pub struct EntropySource {
    pub name: &'static str,
    pub collect: fn(&mut [u8; CHUNK]) -> SourceOutcome,
    pub group: Group,
    pub flags: SourceFlags,
}

/// Seeding quality, as returned by `status()`. Matches spec.md §6/§8
/// exactly: -2 init failed, -1 underseeded, 0 partial, 1 weak-only, 2 strong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InitFailed = -2,
    Underseeded = -1,
    Partial = 0,
    WeakOnly = 1,
    Strong = 2,
}

impl Status {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

fn static_table() -> Vec<EntropySource> {
    let mut table = sources::platform_sources();
    #[cfg(feature = "egd")]
    table.push(EntropySource {
        name: "egd",
        collect: egd::collect,
        group: Group::EGD,
        flags: SourceFlags::empty(),
    });
    #[cfg(feature = "fallback-entropy")]
    table.push(EntropySource {
        name: "fallback_kludge",
        collect: fallback::collect,
        group: Group::KLUDGE,
        flags: SourceFlags::AVOID | SourceFlags::WEAK,
    });
    table
}

/// Query every registered source in declared order, applying the
/// group/strength skip rules, and write the concatenated yield into
/// `out`. Returns the number of bytes written and the resulting `Status`.
///
/// Policy (spec.md §4.4):
/// 1. Skip a source unavailable on this platform.
/// 2. Skip an `AVOID`-flagged source once a strong source has succeeded.
/// 3. Skip a source whose group already has a full success.
/// 4. A `Partial` yield is still written to `out` (so it's folded into the
///    final hash) but does not count toward "have a full success".
pub fn collect(out: &mut [u8]) -> (usize, Status) {
    out.fill(0);

    let table = static_table();
    let mut have_strong = false;
    let mut have_full = false;
    let mut have_groups = Group::empty();
    let mut written = 0usize;

    for source in &table {
        if have_strong && source.flags.contains(SourceFlags::AVOID) {
            continue;
        }
        if have_groups.contains(source.group) {
            continue;
        }

        let mut chunk = [0u8; CHUNK];
        match (source.collect)(&mut chunk) {
            SourceOutcome::Unavailable | SourceOutcome::Failed => continue,
            SourceOutcome::Partial(bytes) => {
                let n = bytes.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&bytes[..n]);
                written += n;
            }
            SourceOutcome::Full(bytes) => {
                let n = bytes.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&bytes[..n]);
                written += n;

                have_full = true;
                have_groups = have_groups.union(source.group);
                if !source.flags.contains(SourceFlags::WEAK) {
                    have_strong = true;
                }
            }
        }

        if written >= out.len() {
            break;
        }
    }

    let status = if written < MINLEN {
        Status::Underseeded
    } else if !have_full {
        Status::Partial
    } else if !have_strong {
        Status::WeakOnly
    } else {
        Status::Strong
    };

    (written, status)
}

/// Upper bound on bytes `collect` can produce: one chunk per registered
/// source.
pub fn max_output_len() -> usize {
    static_table().len() * CHUNK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(
        name: &'static str,
        group: Group,
        flags: SourceFlags,
        outcome: fn(&mut [u8; CHUNK]) -> SourceOutcome,
    ) -> EntropySource {
        EntropySource {
            name,
            collect: outcome,
            group,
            flags,
        }
    }

    fn collect_with(table: &[EntropySource], out: &mut [u8]) -> (usize, Status) {
        out.fill(0);
        let mut have_strong = false;
        let mut have_full = false;
        let mut have_groups = Group::empty();
        let mut written = 0usize;

        for src in table {
            if have_strong && src.flags.contains(SourceFlags::AVOID) {
                continue;
            }
            if have_groups.contains(src.group) {
                continue;
            }
            let mut chunk = [0u8; CHUNK];
            match (src.collect)(&mut chunk) {
                SourceOutcome::Unavailable | SourceOutcome::Failed => continue,
                SourceOutcome::Partial(bytes) => {
                    let n = bytes.len().min(out.len() - written);
                    out[written..written + n].copy_from_slice(&bytes[..n]);
                    written += n;
                }
                SourceOutcome::Full(bytes) => {
                    let n = bytes.len().min(out.len() - written);
                    out[written..written + n].copy_from_slice(&bytes[..n]);
                    written += n;
                    have_full = true;
                    have_groups = have_groups.union(src.group);
                    if !src.flags.contains(SourceFlags::WEAK) {
                        have_strong = true;
                    }
                }
            }
        }

        let status = if written < MINLEN {
            Status::Underseeded
        } else if !have_full {
            Status::Partial
        } else if !have_strong {
            Status::WeakOnly
        } else {
            Status::Strong
        };
        (written, status)
    }

    #[test]
    fn dispatcher_policy_all_succeed_uses_only_first_per_group() {
        // A(strong,grp1), B(strong,grp1), C(strong,grp2), D(weak,grp2), E(avoid,weak,grp3)
        fn a(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [1u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn b(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [2u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn c_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [3u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn d_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [4u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn e_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [5u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        let grp1 = Group::HW;
        let grp2 = Group::CPU;
        let grp3 = Group::SYSCALL;

        let table = vec![
            source("A", grp1, SourceFlags::empty(), a),
            source("B", grp1, SourceFlags::empty(), b),
            source("C", grp2, SourceFlags::empty(), c_src),
            source("D", grp2, SourceFlags::WEAK, d_src),
            source(
                "E",
                grp3,
                SourceFlags::AVOID | SourceFlags::WEAK,
                e_src,
            ),
        ];

        let mut out = vec![0u8; CHUNK * 5];
        let (written, status) = collect_with(&table, &mut out);
        assert_eq!(status, Status::Strong);
        // Only A and C should have contributed (B skipped: same group as A
        // already full; D skipped: group2 already full; E skipped: avoid
        // once strong).
        assert_eq!(written, CHUNK * 2);
        assert_eq!(&out[0..CHUNK], &[1u8; CHUNK][..]);
        assert_eq!(&out[CHUNK..CHUNK * 2], &[3u8; CHUNK][..]);
    }

    #[test]
    fn dispatcher_policy_a_failing_falls_to_b_and_c() {
        fn a(_: &mut [u8; CHUNK]) -> SourceOutcome {
            SourceOutcome::Failed
        }
        fn b(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [2u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn c_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [3u8; CHUNK];
            SourceOutcome::Full(*c)
        }

        let grp1 = Group::HW;
        let grp2 = Group::CPU;

        let table = vec![
            source("A", grp1, SourceFlags::empty(), a),
            source("B", grp1, SourceFlags::empty(), b),
            source("C", grp2, SourceFlags::empty(), c_src),
        ];

        let mut out = vec![0u8; CHUNK * 3];
        let (written, status) = collect_with(&table, &mut out);
        assert_eq!(status, Status::Strong);
        assert_eq!(written, CHUNK * 2);
    }

    #[test]
    fn dispatcher_policy_a_and_c_failing_uses_b_d_e() {
        fn a(_: &mut [u8; CHUNK]) -> SourceOutcome {
            SourceOutcome::Failed
        }
        fn b(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [2u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn c_src(_: &mut [u8; CHUNK]) -> SourceOutcome {
            SourceOutcome::Failed
        }
        fn d_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [4u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        fn e_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [5u8; CHUNK];
            SourceOutcome::Full(*c)
        }

        let grp1 = Group::HW;
        let grp2 = Group::CPU;
        let grp3 = Group::SYSCALL;

        let table = vec![
            source("A", grp1, SourceFlags::empty(), a),
            source("B", grp1, SourceFlags::empty(), b),
            source("C", grp2, SourceFlags::empty(), c_src),
            source("D", grp2, SourceFlags::WEAK, d_src),
            source(
                "E",
                grp3,
                SourceFlags::AVOID | SourceFlags::WEAK,
                e_src,
            ),
        ];

        let mut out = vec![0u8; CHUNK * 5];
        let (written, status) = collect_with(&table, &mut out);
        // B is strong, so status is Strong; D is same group as C (failed,
        // so group not yet claimed) -> D succeeds and claims grp2; E is a
        // distinct group and still AVOID-skipped once B goes strong... but
        // B only becomes strong *after* processing in order, and B precedes
        // D/E, so AVOID sources are skipped once have_strong is set.
        assert_eq!(status, Status::Strong);
        assert_eq!(written, CHUNK * 2); // B, D (E skipped: avoid + strong already)
    }

    #[test]
    fn dispatcher_policy_only_weak_avoid_source_succeeds() {
        fn e_src(c: &mut [u8; CHUNK]) -> SourceOutcome {
            *c = [9u8; CHUNK];
            SourceOutcome::Full(*c)
        }
        let table = vec![source(
            "E",
            Group::KLUDGE,
            SourceFlags::AVOID | SourceFlags::WEAK,
            e_src,
        )];

        let mut out = vec![0u8; CHUNK];
        let (written, status) = collect_with(&table, &mut out);
        assert_eq!(written, CHUNK);
        assert_eq!(status, Status::WeakOnly);
    }

    #[test]
    fn dispatcher_policy_nothing_succeeds_is_underseeded() {
        fn fail(_: &mut [u8; CHUNK]) -> SourceOutcome {
            SourceOutcome::Failed
        }
        let table = vec![source("X", Group::HW, SourceFlags::empty(), fail)];

        let mut out = vec![0u8; CHUNK];
        let (written, status) = collect_with(&table, &mut out);
        assert_eq!(written, 0);
        assert_eq!(status, Status::Underseeded);
    }

    #[test]
    fn real_dispatcher_produces_enough_entropy_on_this_platform() {
        let mut out = vec![0u8; max_output_len()];
        let (written, status) = collect(&mut out);
        assert!(written >= MINLEN, "expected at least MINLEN bytes of real OS entropy");
        assert_ne!(status, Status::Underseeded);
    }
}
