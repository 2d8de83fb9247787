//! L2 synchronization primitives: the pSync sentinel protocol and scoped
//! scratch acquisition.
//!
//! Signaling via integer sentinels on long-typed pSync is encapsulated
//! rather than left as ad-hoc bit twiddling scattered through each
//! algorithm. [`SyncSlot`] is that encapsulation: every algorithm in
//! `barrier`, `broadcast`, `reduce`, `collect`, `fcollect`, and `alltoall`
//! goes through it instead of calling `p_long`/`wait_until_long` directly.

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;

use crate::error::Result;
use crate::substrate::{CmpOp, Pe, Rma, SymAddr};
use crate::team::{self, Team, TeamId};

/// Sentinel value a pSync slot holds when idle / reusable.
pub const SYNC_VALUE: i64 = -1;

/// Length, in longs, reserved for barrier pSync arrays.
pub const SYNC_SIZE: usize = 64;
/// Length, in longs, reserved for reduction pSync arrays (per-round
/// signaling plus donation handshake state).
pub const REDUCE_SYNC_SIZE: usize = 64;
/// Minimum length, in elements, of the reduction pWrk scratch buffer.
pub const REDUCE_MIN_WRKDATA_SIZE: usize = 1024;
/// Length, in longs, reserved for collect/fcollect pSync arrays.
pub const COLLECT_SYNC_SIZE: usize = 64;
/// Length, in longs, reserved for all-to-all pSync arrays (the
/// counter-synchronized variant uses one slot per peer; teams larger than
/// this constant must use the scoped-acquisition path, which sizes scratch
/// to the team's actual size rather than this fixed legacy contract — see
/// the "SYNC_SIZE contract" open question in DESIGN.md).
pub const ALLTOALL_SYNC_SIZE: usize = 128;

const ARENA_SYNC_SLOTS: usize = 128;
const ARENA_PSYNC_BASE: usize = 0;
const ARENA_PWRK_BASE: usize = ARENA_PSYNC_BASE + ARENA_SYNC_SLOTS * 8;
/// Total symmetric heap bytes the default scoped-scratch arena requires;
/// any [`crate::substrate::local::LocalRma`] heap used with the
/// scoped-acquisition API must be at least this large.
pub const ARENA_BYTES: usize = ARENA_PWRK_BASE + REDUCE_MIN_WRKDATA_SIZE * 8;

/// A named pSync slot: one long-sized rendezvous cell, addressed
/// symmetrically, used for exactly one signal/wait exchange at a time.
#[derive(Debug, Clone, Copy)]
pub struct SyncSlot(pub SymAddr);

impl SyncSlot {
    /// Slot `i` within a pSync region starting at `base`.
    pub fn nth(base: SymAddr, i: usize) -> SyncSlot {
        SyncSlot(base.offset(i * 8))
    }

    /// Reset this slot, on the local PE, back to the sentinel.
    pub fn reset<R: Rma>(&self, rma: &R) -> Result<()> {
        rma.p_long(self.0, SYNC_VALUE, rma.my_pe())
    }

    /// Single-long signal write to `target_pe`.
    pub fn signal<R: Rma>(&self, rma: &R, target_pe: Pe, value: i64) -> Result<()> {
        rma.p_long(self.0, value, target_pe)
    }

    /// Block on the local copy of this slot until it equals `value`.
    pub fn wait_eq<R: Rma>(&self, rma: &R, value: i64) -> Result<()> {
        rma.wait_until_long(self.0, CmpOp::Eq, value)
    }

    /// Block on the local copy of this slot until it differs from
    /// `value` (used to wait out the sentinel before a round's first
    /// signal arrives).
    pub fn wait_ne<R: Rma>(&self, rma: &R, value: i64) -> Result<()> {
        rma.wait_until_long(self.0, CmpOp::Ne, value)
    }

    /// Atomically add `delta` to this slot on `target_pe` (used by
    /// fan-in barriers to accumulate arrivals).
    pub fn bump<R: Rma>(&self, rma: &R, target_pe: Pe, delta: i64) -> Result<()> {
        rma.atomic_add_long(self.0, delta, target_pe)
    }

    /// Atomically read this slot's local value.
    pub fn fetch<R: Rma>(&self, rma: &R) -> Result<i64> {
        rma.atomic_fetch_long(self.0, rma.my_pe())
    }

    /// Zero this slot locally, then barrier with `team` before returning.
    /// Required before a fan-in counter where every member is
    /// simultaneously the counter's owner and a bumper of its peers'
    /// counters: without the barrier, a fast peer's `bump` can land on a
    /// slower peer's slot before that peer has zeroed it, and the
    /// zero-write then silently erases the arrival. A plain
    /// zero-then-`wait_eq`, as single-owner counters use (only one PE ever
    /// reads the slot, e.g. [`crate::barrier::linear`]'s root), is not
    /// enough once every PE is also a reader.
    pub fn arm_fan_in<R: Rma>(&self, rma: &R, team: &Team, barrier_region: ScratchRegion) -> Result<()> {
        rma.p_long(self.0, 0, rma.my_pe())?;
        crate::barrier::dissemination(rma, team, barrier_region)
    }
}

/// The symmetric region handed to one collective invocation: a pSync array
/// and a pWrk array, each addressed from its own base.
#[derive(Debug, Clone, Copy)]
pub struct ScratchRegion {
    pub psync_base: SymAddr,
    pub pwrk_base: SymAddr,
}

impl ScratchRegion {
    pub fn slot(&self, i: usize) -> SyncSlot {
        SyncSlot::nth(self.psync_base, i)
    }

    pub fn pwrk(&self, byte_offset: usize) -> SymAddr {
        self.pwrk_base.offset(byte_offset)
    }

    /// A sub-region whose pSync base is offset `slot_offset` slots into
    /// this one, sharing the same pWrk base. Used to carve one algorithm's
    /// scratch region into disjoint slot ranges for sub-phases (e.g. a
    /// reduction's fan-in rounds versus its broadcast rounds) that would
    /// otherwise reuse the same slots and race.
    pub fn sub(&self, slot_offset: usize) -> ScratchRegion {
        ScratchRegion {
            psync_base: self.psync_base.offset(slot_offset * 8),
            pwrk_base: self.pwrk_base,
        }
    }

    /// A region whose pWrk base is offset `byte_offset` bytes into this
    /// one, sharing the same pSync base. The pSync-disjoint sub-regions
    /// `sub` produces still all share one pWrk buffer underneath, so a
    /// multi-round exchange (or several logically distinct exchanges, e.g.
    /// a donation handshake followed by the main algorithm) needs this too:
    /// without it, a peer's write for a later round/phase can land in the
    /// buffer before the local PE has read an earlier round's payload out
    /// of it, silently corrupting the value it reads.
    pub fn sub_pwrk(&self, byte_offset: usize) -> ScratchRegion {
        ScratchRegion {
            psync_base: self.psync_base,
            pwrk_base: self.pwrk_base.offset(byte_offset),
        }
    }

    /// Reset `n_slots` consecutive pSync slots to the sentinel on the
    /// local PE (every slot an algorithm touches must equal the sentinel on entry).
    pub fn reset_slots<R: Rma>(&self, rma: &R, n_slots: usize) -> Result<()> {
        for i in 0..n_slots {
            self.slot(i).reset(rma)?;
        }
        Ok(())
    }
}

/// The fixed default scratch arena reserved at a constant symmetric offset
/// every PE computes the identical offsets, so no
/// runtime coordination is needed to agree where scratch lives. Concurrent
/// default-path collectives on the same team are serialized by the team's
/// `scratch_lock` (acquired by [`crate::api`] before calling into an
/// algorithm) rather than by dynamic allocation — documented in
/// DESIGN.md as the resolution of the "disjoint pSync" requirement for
/// the convenience API. Callers who need true concurrency
/// use the legacy active-set entry points with caller-owned pSync/pWrk.
pub fn default_region() -> ScratchRegion {
    ScratchRegion {
        psync_base: SymAddr(ARENA_PSYNC_BASE),
        pwrk_base: SymAddr(ARENA_PWRK_BASE),
    }
}

/// Slots of the arena reserved for the entry/exit housekeeping barrier the
/// scoped-acquisition path performs around every algorithm. The remaining
/// slots are free for the algorithm itself.
const BARRIER_RESERVED_SLOTS: usize = 16;

fn scoped_subregions() -> (ScratchRegion, ScratchRegion) {
    let barrier_region = ScratchRegion {
        psync_base: SymAddr(ARENA_PSYNC_BASE),
        pwrk_base: SymAddr(ARENA_PWRK_BASE),
    };
    let algo_region = ScratchRegion {
        psync_base: SymAddr(ARENA_PSYNC_BASE + BARRIER_RESERVED_SLOTS * 8),
        pwrk_base: SymAddr(ARENA_PWRK_BASE),
    };
    (barrier_region, algo_region)
}

/// Scoped acquisition of the default scratch arena for one collective call
/// replacing explicit malloc/free around each algorithm with a scoped
/// acquisition primitive that releases on every exit path. Holds the
/// team's `scratch_lock` for its lifetime, so
/// `Drop` — which runs even when an algorithm returns early via `?` —
/// always restores the sentinel and releases the lock.
pub struct ScratchGuard<'a, R: Rma> {
    rma: &'a R,
    pub barrier_region: ScratchRegion,
    pub algo_region: ScratchRegion,
    algo_slots: usize,
    _lock: ArcMutexGuard<RawMutex, ()>,
}

impl<'a, R: Rma> ScratchGuard<'a, R> {
    /// Acquire the arena for `team`, reserving `algo_slots` pSync longs for
    /// the algorithm (in addition to the fixed housekeeping barrier
    /// slots), and reset every slot to the sentinel.
    pub fn acquire(team: TeamId, rma: &'a R, algo_slots: usize) -> Result<Self> {
        let lock = team::scratch_lock(team)?;
        let guard = lock.lock_arc();
        let (barrier_region, algo_region) = scoped_subregions();
        barrier_region.reset_slots(rma, BARRIER_RESERVED_SLOTS)?;
        algo_region.reset_slots(rma, algo_slots)?;
        Ok(ScratchGuard {
            rma,
            barrier_region,
            algo_region,
            algo_slots,
            _lock: guard,
        })
    }
}

impl<'a, R: Rma> Drop for ScratchGuard<'a, R> {
    fn drop(&mut self) {
        // Defensive restoration: if the algorithm returned early (e.g. via
        // `?`) before restoring its own slots, make sure the arena is left
        // at the sentinel so the next acquisition starts clean.
        let _ = self.barrier_region.reset_slots(self.rma, BARRIER_RESERVED_SLOTS);
        let _ = self.algo_region.reset_slots(self.rma, self.algo_slots);
    }
}
