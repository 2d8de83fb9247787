//! L1 — team and context layer
//!
//! A team is a lightweight, immutable descriptor over world-rank space.
//! Team handles are tagged newtypes over a process-wide registry rather
//! than raw pointers cast through `void`; a child team holds an index to
//! its parent, never a back-pointer, so destruction cannot leave dangling
//! cycles.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{Result, ShcollError};
use crate::substrate::{Pe, Rma, SymAddr};

/// A team descriptor: `{world_start, stride, size}` plus the id of the
/// parent it was split from, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team {
    pub world_start: usize,
    pub stride: usize,
    pub size: usize,
}

impl Team {
    /// The distinguished WORLD team: every PE, unit stride.
    pub fn world(n_pes: usize) -> Team {
        Team {
            world_start: 0,
            stride: 1,
            size: n_pes,
        }
    }

    /// World rank of the `k`-th member, or `None` if `k` is out of range.
    pub fn member(&self, k: usize) -> Option<Pe> {
        if k < self.size {
            Some(self.world_start + k * self.stride)
        } else {
            None
        }
    }

    /// This team's rank for `world_pe`, or `None` if `world_pe` is not a
    /// member.
    pub fn rank_of(&self, world_pe: Pe) -> Option<usize> {
        if world_pe < self.world_start {
            return None;
        }
        let delta = world_pe - self.world_start;
        if delta % self.stride != 0 {
            return None;
        }
        let k = delta / self.stride;
        if k < self.size {
            Some(k)
        } else {
            None
        }
    }

    /// Translate `src_rank` (a rank in `self`) into a rank on `dst`, or
    /// `None` if the corresponding world PE is not a member of `dst` (spec:
    /// "`translate_pe` returns -1 when the source member does not exist in
    /// the destination team").
    pub fn translate_pe(&self, src_rank: usize, dst: &Team) -> Option<usize> {
        let world_pe = self.member(src_rank)?;
        dst.rank_of(world_pe)
    }

    /// Split a strided sub-team out of `self`. `start`/`stride`/`size` are
    /// expressed in `self`'s rank space.
    pub fn split_strided(&self, start: usize, stride: usize, size: usize) -> Result<Team> {
        if size == 0 || stride == 0 {
            return Err(ShcollError::InvalidArgument(
                "split_strided requires size >= 1 and stride >= 1".into(),
            ));
        }
        let last_rank = start + (size - 1) * stride;
        if last_rank >= self.size {
            return Err(ShcollError::InvalidArgument(format!(
                "split_strided range exceeds parent team size {}",
                self.size
            )));
        }
        let world_start = self
            .member(start)
            .expect("start already bounds-checked above");
        Ok(Team {
            world_start,
            stride: self.stride * stride,
            size,
        })
    }

    /// Split `self` into an `x`-team of `xrange` consecutive ranks and a
    /// `y`-team of the remaining ranks strided by `xrange` (a 2D Cartesian
    /// decomposition, e.g. node-local x global).
    pub fn split_2d(&self, xrange: usize) -> Result<(Team, Team)> {
        if xrange == 0 || self.size % xrange != 0 {
            return Err(ShcollError::InvalidArgument(
                "split_2d requires xrange to divide the parent team size".into(),
            ));
        }
        let my_x_start = 0; // caller resolves "my" sub-team externally; this
                             // returns the canonical first x/y team.
        let x_team = self.split_strided(my_x_start, 1, xrange)?;
        let y_team = self.split_strided(0, xrange, self.size / xrange)?;
        Ok((x_team, y_team))
    }
}

/// Symmetric-pointer query: resolves `team_rank` to a
/// world PE within `team`, then defers to the substrate's own notion of
/// node-local addressability. `None` if `team_rank` is out of range or the
/// substrate reports the target is not directly addressable.
pub fn team_ptr<R: Rma>(rma: &R, team: &Team, addr: SymAddr, team_rank: usize) -> Option<*const u8> {
    let world_pe = team.member(team_rank)?;
    rma.local_ptr(addr, world_pe)
}

/// Tagged handle to a team held in the process-wide [`registry`]. Replaces
/// raw opaque pointers with a small `Copy` integer plus a sentinel invalid
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TeamId(u64);

impl TeamId {
    /// Sentinel denoting "no team" / a destroyed handle.
    pub const INVALID: TeamId = TeamId(0);

    /// The always-valid WORLD team handle.
    pub const WORLD: TeamId = TeamId(1);
}

struct TeamEntry {
    team: Team,
    parent: Option<TeamId>,
    /// Serializes concurrent default-path collectives on this team so they
    /// can share the fixed scratch arena (see `sync::default_region`).
    scratch_lock: std::sync::Arc<Mutex<()>>,
}

struct Registry {
    entries: DashMap<TeamId, TeamEntry>,
    next_id: AtomicU64,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    entries: DashMap::new(),
    next_id: AtomicU64::new(2), // 0 = INVALID, 1 = WORLD
});

/// Register the WORLD team for this process. Idempotent: calling more than
/// once just re-asserts the same size.
pub fn init_world(n_pes: usize) {
    REGISTRY.entries.insert(
        TeamId::WORLD,
        TeamEntry {
            team: Team::world(n_pes),
            parent: None,
            scratch_lock: std::sync::Arc::new(Mutex::new(())),
        },
    );
}

/// Resolve a handle to its descriptor.
pub fn resolve(id: TeamId) -> Result<Team> {
    REGISTRY
        .entries
        .get(&id)
        .map(|e| e.team)
        .ok_or(ShcollError::InvalidTeam)
}

/// The mutex serializing default-path scoped-scratch collectives on this
/// team (the "disjoint pSync" rule, resolved for the convenience API as
/// documented on `sync::default_region`).
pub fn scratch_lock(id: TeamId) -> Result<std::sync::Arc<Mutex<()>>> {
    REGISTRY
        .entries
        .get(&id)
        .map(|e| e.scratch_lock.clone())
        .ok_or(ShcollError::InvalidTeam)
}

/// `split_strided` at the handle level: resolves `parent`, splits, and
/// registers the child with `parent` recorded by index (never a
/// back-pointer from parent to child, so there is no cycle to break on
/// destroy).
pub fn split_strided(parent: TeamId, start: usize, stride: usize, size: usize) -> Result<TeamId> {
    let parent_team = resolve(parent)?;
    let child = parent_team.split_strided(start, stride, size)?;
    let id = TeamId(REGISTRY.next_id.fetch_add(1, Ordering::Relaxed));
    REGISTRY.entries.insert(
        id,
        TeamEntry {
            team: child,
            parent: Some(parent),
            scratch_lock: std::sync::Arc::new(Mutex::new(())),
        },
    );
    Ok(id)
}

/// Release a team's bookkeeping. The WORLD team cannot be destroyed.
pub fn destroy(id: TeamId) -> Result<()> {
    if id == TeamId::WORLD {
        return Err(ShcollError::InvalidArgument(
            "the WORLD team cannot be destroyed".into(),
        ));
    }
    REGISTRY
        .entries
        .remove(&id)
        .map(|_| ())
        .ok_or(ShcollError::InvalidTeam)
}

/// The id of `id`'s parent team, if any.
pub fn parent_of(id: TeamId) -> Result<Option<TeamId>> {
    REGISTRY
        .entries
        .get(&id)
        .map(|e| e.parent)
        .ok_or(ShcollError::InvalidTeam)
}

/// A per-team handle carrying option bits, local to one thread at a time.
/// Guards per-context state with a `parking_lot::Mutex` rather than a
/// full actor: a context is
/// "busy" exactly while its mutex is held.
pub struct Context {
    team: TeamId,
    options: u32,
    busy: Mutex<()>,
}

/// RAII guard proving exclusive possession of a [`Context`] for the
/// lifetime of one collective call: a single context is exclusive to one
/// thread at a time.
pub struct ContextGuard<'a> {
    context: &'a Context,
    _lock: parking_lot::MutexGuard<'a, ()>,
}

impl Context {
    /// Create a new context bound to `team` with the given option bits.
    pub fn new(team: TeamId, options: u32) -> Context {
        Context {
            team,
            options,
            busy: Mutex::new(()),
        }
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn options(&self) -> u32 {
        self.options
    }

    /// Acquire exclusive use of this context. Blocks if another thread
    /// currently holds it.
    pub fn enter(&self) -> ContextGuard<'_> {
        ContextGuard {
            context: self,
            _lock: self.busy.lock(),
        }
    }

    /// Like [`Context::enter`], but never blocks: returns
    /// [`ShcollError::InvalidContext`] if another thread currently holds
    /// this context instead of waiting for it.
    pub fn try_enter(&self) -> Result<ContextGuard<'_>> {
        self.busy
            .try_lock()
            .map(|lock| ContextGuard {
                context: self,
                _lock: lock,
            })
            .ok_or(ShcollError::InvalidContext)
    }
}

impl<'a> ContextGuard<'a> {
    pub fn team(&self) -> TeamId {
        self.context.team
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_team_members_and_ranks() {
        let t = Team::world(4);
        assert_eq!(t.member(0), Some(0));
        assert_eq!(t.member(3), Some(3));
        assert_eq!(t.member(4), None);
        assert_eq!(t.rank_of(2), Some(2));
    }

    #[test]
    fn split_strided_translates_correctly() {
        let world = Team::world(8);
        // even PEs: start=0, stride=2, size=4 -> world ranks 0,2,4,6
        let evens = world.split_strided(0, 2, 4).unwrap();
        assert_eq!(evens.member(0), Some(0));
        assert_eq!(evens.member(1), Some(2));
        assert_eq!(evens.member(3), Some(6));
        assert_eq!(evens.rank_of(5), None);
        assert_eq!(evens.rank_of(4), Some(2));
    }

    #[test]
    fn translate_pe_returns_none_outside_dst() {
        let world = Team::world(8);
        let evens = world.split_strided(0, 2, 4).unwrap();
        let odds = world.split_strided(1, 2, 4).unwrap();
        // evens rank 1 is world pe 2, which is not a member of odds
        assert_eq!(evens.translate_pe(1, &odds), None);
        assert_eq!(evens.translate_pe(1, &world), Some(2));
    }

    #[test]
    fn team_ptr_defaults_to_none_and_respects_membership() {
        use crate::substrate::local::LocalRma;
        let pes = LocalRma::new_world(4, 64);
        let world = Team::world(4);
        // Default `Rma::local_ptr` always answers `None`; team_ptr must
        // still resolve `team_rank` to a world PE before deferring to it.
        assert_eq!(team_ptr(&pes[0], &world, SymAddr(0), 2), None);
        assert_eq!(team_ptr(&pes[0], &world, SymAddr(0), 99), None);
    }

    #[test]
    fn registry_round_trip() {
        init_world(4);
        let world = resolve(TeamId::WORLD).unwrap();
        assert_eq!(world.size, 4);

        let child = split_strided(TeamId::WORLD, 0, 2, 2).unwrap();
        assert_eq!(parent_of(child).unwrap(), Some(TeamId::WORLD));
        destroy(child).unwrap();
        assert!(matches!(resolve(child), Err(ShcollError::InvalidTeam)));
    }

    #[test]
    fn try_enter_fails_while_another_holder_is_active() {
        let ctx = Context::new(TeamId::WORLD, 0);
        let _held = ctx.enter();
        assert!(matches!(ctx.try_enter(), Err(ShcollError::InvalidContext)));
    }

    #[test]
    fn world_cannot_be_destroyed() {
        init_world(2);
        assert!(destroy(TeamId::WORLD).is_err());
    }
}
