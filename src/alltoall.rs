//! L3 — strided all-to-all
//!
//! `alltoalls(dest, src, dst_stride, src_stride, nelems, team)`: PE `i`
//! sends `nelems` elements to PE `j`'s `dest + j_local*dst_stride...` for
//! every `j`, where `j_local` is `i`'s position from `j`'s perspective
//! (here: `i`'s own rank, since every PE addresses the same logical
//! slot). Three exchange patterns, crossed with two synchronization
//! styles, give the six entry points below.

use crate::error::{Result, ShcollError};
use crate::substrate::{Pe, Rma, SymAddr};
use crate::sync::ScratchRegion;
use crate::team::Team;

fn world_pe(team: &Team, rank: usize) -> Pe {
    team.member(rank).expect("rank within team size")
}

fn my_rank<R: Rma>(rma: &R, team: &Team) -> Result<usize> {
    team.rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))
}

fn src_block(src: SymAddr, rank: usize, src_stride: usize, nelems: usize, elem_bytes: usize) -> SymAddr {
    src.offset(rank * src_stride * nelems * elem_bytes)
}

fn dest_block(dest: SymAddr, rank: usize, dst_stride: usize, nelems: usize, elem_bytes: usize) -> SymAddr {
    dest.offset(rank * dst_stride * nelems * elem_bytes)
}

/// Copy PE `i`'s contribution destined for PE `dest_rank` directly: reads
/// the local `src` block addressed to `dest_rank` and puts it into that
/// PE's `dest` block for `i`.
fn send_to<R: Rma>(
    rma: &R,
    my_rank: usize,
    dest_rank: usize,
    dest_pe: Pe,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let block_bytes = nelems * elem_bytes;
    let mut buf = vec![0u8; block_bytes];
    rma.get(&mut buf, src_block(src, dest_rank, src_stride, nelems, elem_bytes), rma.my_pe())?;
    rma.put(dest_block(dest, my_rank, dst_stride, nelems, elem_bytes), &buf, dest_pe)
}

fn barrier_round<R: Rma>(rma: &R, team: &Team, region: ScratchRegion) -> Result<()> {
    crate::barrier::dissemination(rma, team, region)
}

/// Shift exchange: round `r` (1..N-1) pairs PE `i` with `(i+r) mod N`.
pub fn shift_exchange_barrier<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    send_to(rma, rank, rank, rma.my_pe(), dest, src, dst_stride, src_stride, nelems, elem_bytes)?;

    for r in 1..size {
        let peer_rank = (rank + r) % size;
        send_to(
            rma,
            rank,
            peer_rank,
            world_pe(team, peer_rank),
            dest,
            src,
            dst_stride,
            src_stride,
            nelems,
            elem_bytes,
        )?;
        rma.fence(Some(world_pe(team, peer_rank)))?;
        barrier_round(rma, team, region)?;
    }
    rma.quiet()
}

/// Shift exchange with per-peer arrival counting instead of a barrier
/// between rounds: every PE fires all its sends, then waits until it has
/// observed exactly `N-1` arrivals.
pub fn shift_exchange_counter<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let arrived = region.slot(0);
    arrived.arm_fan_in(rma, team, region.sub(8))?;
    send_to(rma, rank, rank, rma.my_pe(), dest, src, dst_stride, src_stride, nelems, elem_bytes)?;

    for r in 1..size {
        let peer_rank = (rank + r) % size;
        let peer_pe = world_pe(team, peer_rank);
        send_to(rma, rank, peer_rank, peer_pe, dest, src, dst_stride, src_stride, nelems, elem_bytes)?;
        rma.fence(Some(peer_pe))?;
        arrived.bump(rma, peer_pe, 1)?;
    }
    arrived.wait_eq(rma, (size - 1) as i64)?;
    arrived.reset(rma)?;
    rma.quiet()
}

/// XOR pairwise exchange: round `r` pairs `i` with `i XOR r`; requires a
/// power-of-2 team size so every rank's XOR partner stays in range.
pub fn xor_pairwise_barrier<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let size = team.size;
    if !size.is_power_of_two() {
        return Err(ShcollError::PreconditionViolation(
            "alltoall xor_pairwise requires a power-of-2 team size".into(),
        ));
    }
    let rank = my_rank(rma, team)?;
    for r in 0..size {
        let peer_rank = rank ^ r;
        let peer_pe = world_pe(team, peer_rank);
        send_to(rma, rank, peer_rank, peer_pe, dest, src, dst_stride, src_stride, nelems, elem_bytes)?;
        rma.fence(Some(peer_pe))?;
        barrier_round(rma, team, region)?;
    }
    rma.quiet()
}

/// XOR pairwise exchange, counter-synchronized.
pub fn xor_pairwise_counter<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let size = team.size;
    if !size.is_power_of_two() {
        return Err(ShcollError::PreconditionViolation(
            "alltoall xor_pairwise requires a power-of-2 team size".into(),
        ));
    }
    let rank = my_rank(rma, team)?;
    let arrived = region.slot(0);
    arrived.arm_fan_in(rma, team, region.sub(8))?;
    for r in 0..size {
        let peer_rank = rank ^ r;
        let peer_pe = world_pe(team, peer_rank);
        send_to(rma, rank, peer_rank, peer_pe, dest, src, dst_stride, src_stride, nelems, elem_bytes)?;
        if r != 0 {
            rma.fence(Some(peer_pe))?;
            arrived.bump(rma, peer_pe, 1)?;
        }
    }
    arrived.wait_eq(rma, (size - 1) as i64)?;
    arrived.reset(rma)?;
    rma.quiet()
}

/// A round-robin ("circle method") matching schedule for `n` participants:
/// `schedule[r][i]` is `i`'s partner in round `r`, or `None` if `n` is odd
/// and `i` draws the bye that round. Pure and deterministic, so every PE
/// computes the identical schedule independently.
fn round_robin_schedule(n: usize) -> Vec<Vec<Option<usize>>> {
    if n <= 1 {
        return vec![];
    }
    let padded = if n % 2 == 0 { n } else { n + 1 };
    let rounds = padded - 1;
    let mut arrangement: Vec<usize> = (0..padded).collect();
    let mut schedule = vec![vec![None; n]; rounds];
    for round in schedule.iter_mut() {
        for i in 0..padded / 2 {
            let a = arrangement[i];
            let b = arrangement[padded - 1 - i];
            if a < n && b < n {
                round[a] = Some(b);
                round[b] = Some(a);
            }
        }
        // Standard circle-method rotation: keep position 0 fixed, rotate
        // the remaining positions by one.
        if padded > 2 {
            let last = arrangement[padded - 1];
            for i in (1..padded - 1).rev() {
                arrangement[i + 1] = arrangement[i];
            }
            arrangement[1] = last;
        }
    }
    schedule
}

/// Color pairwise exchange: each round is one matching from a round-robin
/// tournament schedule over the team, so every PE either exchanges with
/// exactly one partner or sits out (odd team sizes only).
pub fn color_pairwise_barrier<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let rank = my_rank(rma, team)?;
    send_to(rma, rank, rank, rma.my_pe(), dest, src, dst_stride, src_stride, nelems, elem_bytes)?;

    let schedule = round_robin_schedule(team.size);
    for round in &schedule {
        if let Some(peer_rank) = round[rank] {
            let peer_pe = world_pe(team, peer_rank);
            send_to(rma, rank, peer_rank, peer_pe, dest, src, dst_stride, src_stride, nelems, elem_bytes)?;
            rma.fence(Some(peer_pe))?;
        }
        barrier_round(rma, team, region)?;
    }
    rma.quiet()
}

/// Color pairwise exchange, counter-synchronized.
pub fn color_pairwise_counter<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let arrived = region.slot(0);
    arrived.arm_fan_in(rma, team, region.sub(8))?;
    send_to(rma, rank, rank, rma.my_pe(), dest, src, dst_stride, src_stride, nelems, elem_bytes)?;

    let schedule = round_robin_schedule(size);
    let mut expected = 0i64;
    for round in &schedule {
        if let Some(peer_rank) = round[rank] {
            let peer_pe = world_pe(team, peer_rank);
            send_to(rma, rank, peer_rank, peer_pe, dest, src, dst_stride, src_stride, nelems, elem_bytes)?;
            rma.fence(Some(peer_pe))?;
            arrived.bump(rma, peer_pe, 1)?;
            expected += 1;
        }
    }
    if expected > 0 {
        arrived.wait_eq(rma, expected)?;
    }
    arrived.reset(rma)?;
    rma.quiet()
}
