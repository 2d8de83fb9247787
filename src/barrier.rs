//! L2 — barrier family
//!
//! Five algorithms share one contract: once every member of the active set
//! has entered, every member may leave, and every RMA operation issued by
//! any member before entry is remotely complete before any member exits.
//! Each algorithm below ends with an implicit [`Rma::quiet`] to uphold that
//! last guarantee, and leaves its pSync slots restored to
//! [`crate::sync::SYNC_VALUE`] so the region is reusable by the next call.
//!
//! All algorithms assume a bulk-synchronous SPMD discipline: no PE issues a second
//! collective against the same team before every PE has returned from the
//! first, so a PE's own pSync slots are never written by a peer still
//! "inside" a stale round.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::config::{BarrierAlgo, Config};
use crate::error::{Result, ShcollError};
use crate::substrate::Rma;
use crate::sync::{ScratchRegion, SYNC_VALUE};
use crate::team::Team;

fn world_pe(team: &Team, rank: usize) -> usize {
    team.member(rank).expect("rank within team size")
}

thread_local! {
    // Per-PE call count for `dissemination`, keyed by the region's pSync
    // base address. A lone round/call-index tag (as `linear`/`tree_barrier`
    // use) is ambiguous here: peer pairing for a round is the same on every
    // call, so a PE that outruns a slower peer and starts its *next*
    // `dissemination` call can deliver that next call's round-r signal
    // before the slow peer has consumed (and reset) the current call's
    // round-r slot, which then erases the arrival. Folding a call-local
    // epoch into the tag keeps every call's signals numerically disjoint,
    // so a stray next-call write can never be mistaken for (or overwrite
    // and lose) the current call's. Thread-local because each PE is
    // expected to be a single control thread end to end, same as a real
    // OpenSHMEM process; no cross-PE coordination is needed since every PE
    // calls a given collective the same number of times, in order.
    static DISSEMINATION_EPOCH: RefCell<HashMap<usize, i64>> = RefCell::new(HashMap::new());
}

fn next_dissemination_epoch(key: usize) -> i64 {
    DISSEMINATION_EPOCH.with(|m| {
        let mut m = m.borrow_mut();
        let epoch = m.entry(key).or_insert(0);
        *epoch += 1;
        *epoch
    })
}

/// Linear barrier: PE 0 collects arrival from all others, then releases
/// them.
pub fn linear<R: Rma>(rma: &R, team: &Team, region: ScratchRegion) -> Result<()> {
    let size = team.size;
    if size <= 1 {
        return rma.quiet();
    }
    let my_rank = team
        .rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))?;
    let root = world_pe(team, 0);
    let arrived = region.slot(0);
    let release = region.slot(1);

    if my_rank == 0 {
        rma.p_long(arrived.0, 0, rma.my_pe())?;
        arrived.wait_eq(rma, (size - 1) as i64)?;
        for rank in 1..size {
            release.signal(rma, world_pe(team, rank), 1)?;
        }
        rma.p_long(arrived.0, SYNC_VALUE, rma.my_pe())?;
    } else {
        arrived.bump(rma, root, 1)?;
        release.wait_eq(rma, 1)?;
        release.reset(rma)?;
    }
    rma.quiet()
}

fn children_of(rank: usize, degree: usize, size: usize) -> Vec<usize> {
    let first_child = rank * degree + 1;
    (0..degree)
        .map(|i| first_child + i)
        .take_while(|&c| c < size)
        .collect()
}

fn parent_of(rank: usize, degree: usize) -> Option<usize> {
    if rank == 0 {
        None
    } else {
        Some((rank - 1) / degree)
    }
}

/// Generic fan-in/fan-out tree barrier shared by the complete-k-tree and
/// k-nomial variants (they differ only in how `degree`/`radix` shapes the
/// tree).
fn tree_barrier<R: Rma>(rma: &R, team: &Team, region: ScratchRegion, degree: usize) -> Result<()> {
    let size = team.size;
    if size <= 1 {
        return rma.quiet();
    }
    let my_rank = team
        .rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))?;
    let children = children_of(my_rank, degree, size);
    let parent = parent_of(my_rank, degree);

    let arrived = region.slot(0);
    let release = region.slot(1);

    if !children.is_empty() {
        rma.p_long(arrived.0, 0, rma.my_pe())?;
        arrived.wait_eq(rma, children.len() as i64)?;
    }
    if let Some(p) = parent {
        arrived.bump(rma, world_pe(team, p), 1)?;
        release.wait_eq(rma, 1)?;
    }
    for &child in &children {
        release.signal(rma, world_pe(team, child), 1)?;
    }

    if !children.is_empty() {
        rma.p_long(arrived.0, SYNC_VALUE, rma.my_pe())?;
    }
    if parent.is_some() {
        release.reset(rma)?;
    }
    rma.quiet()
}

/// Complete k-tree barrier: fan-in of degree `d` followed by fan-out of the
/// same degree.
pub fn complete_tree<R: Rma>(rma: &R, team: &Team, region: ScratchRegion, degree: usize) -> Result<()> {
    if degree < 2 {
        return Err(ShcollError::PreconditionViolation(
            "complete tree barrier requires degree >= 2".into(),
        ));
    }
    tree_barrier(rma, team, region, degree)
}

/// Binomial barrier: the classic reduce-scatter-like fan-in on bitmask
/// neighbors, expressed here as a complete binary (degree-2) tree, which is
/// the binomial tree's shape for the fan-in/fan-out pattern this barrier
/// contract requires.
pub fn binomial<R: Rma>(rma: &R, team: &Team, region: ScratchRegion) -> Result<()> {
    tree_barrier(rma, team, region, 2)
}

/// K-nomial barrier: like binomial, with tunable radix `r`.
pub fn knomial<R: Rma>(rma: &R, team: &Team, region: ScratchRegion, radix: usize) -> Result<()> {
    if radix < 2 {
        return Err(ShcollError::PreconditionViolation(
            "k-nomial barrier requires radix >= 2".into(),
        ));
    }
    tree_barrier(rma, team, region, radix)
}

/// Dissemination barrier: log2(N) rounds of pair exchanges `(i <-> i +
/// 2^r mod N)`. Works for any team size, not just powers of two.
pub fn dissemination<R: Rma>(rma: &R, team: &Team, region: ScratchRegion) -> Result<()> {
    let size = team.size;
    if size <= 1 {
        return rma.quiet();
    }
    let my_rank = team
        .rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))?;

    let rounds = (usize::BITS - (size - 1).leading_zeros()) as usize; // ceil(log2(size))
    if rounds > crate::sync::SYNC_SIZE {
        return Err(ShcollError::PreconditionViolation(
            "team too large for dissemination barrier's pSync allocation".into(),
        ));
    }

    let epoch = next_dissemination_epoch(region.psync_base.0);
    let base_tag = epoch * (rounds as i64 + 1);

    for r in 0..rounds {
        let slot = region.slot(r);
        let peer_rank = (my_rank + (1 << r)) % size;
        let tag = base_tag + (r + 1) as i64;
        slot.signal(rma, world_pe(team, peer_rank), tag)?;
        slot.wait_eq(rma, tag)?;
    }
    for r in 0..rounds {
        region.slot(r).reset(rma)?;
    }
    rma.quiet()
}

/// Dispatch to the configured barrier algorithm.
pub fn team_barrier<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    cfg: &Config,
) -> Result<()> {
    match cfg.barrier_algo {
        BarrierAlgo::Linear => linear(rma, team, region),
        BarrierAlgo::CompleteTree => complete_tree(rma, team, region, cfg.tree_degree),
        BarrierAlgo::BinomialTree => binomial(rma, team, region),
        BarrierAlgo::KnomialTree => knomial(rma, team, region, cfg.knomial_radix),
        BarrierAlgo::Dissemination => dissemination(rma, team, region),
    }
}
