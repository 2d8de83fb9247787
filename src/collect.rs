//! L3 — collect: variable-length gather-to-all
//!
//! Unlike [`crate::fcollect`], each PE may publish a different number of
//! bytes. Every member first publishes its own length; once every length
//! is known, the engine computes prefix offsets and moves each member's
//! `src` into the right slice of `dest`, using the same linear/all-linear
//! data-movement shapes fcollect does (the length-agnostic algorithms —
//! ring, bruck, neighbor-exchange — generalize awkwardly once block sizes
//! differ per PE and are left to the fixed-length sibling; see
//! DESIGN.md).

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

/// Gather every member's published length into a table of byte offsets
/// (`offsets[k]` is where member k's data starts in `dest`, `offsets[N]`
/// is the total). Uses fcollect's `all_linear` over one 8-byte length
/// per PE.
fn gather_offsets<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    my_nbytes: usize,
) -> Result<Vec<usize>> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let lengths_addr = region.pwrk(crate::sync::REDUCE_MIN_WRKDATA_SIZE * 8 - size * 8);

    rma.put(
        lengths_addr.offset(rank * 8),
        &(my_nbytes as u64).to_le_bytes(),
        rma.my_pe(),
    )?;
    for other in 0..size {
        if other != rank {
            rma.put(
                lengths_addr.offset(rank * 8),
                &(my_nbytes as u64).to_le_bytes(),
                world_pe(team, other),
            )?;
        }
    }
    rma.fence(None)?;
    let arrived = region.slot(0);
    arrived.arm_fan_in(rma, team, region.sub(8))?;
    for other in 0..size {
        if other != rank {
            arrived.bump(rma, world_pe(team, other), 1)?;
        }
    }
    arrived.wait_eq(rma, (size - 1) as i64)?;
    arrived.reset(rma)?;

    let mut raw = vec![0u8; size * 8];
    rma.get(&mut raw, lengths_addr, rma.my_pe())?;
    let mut offsets = vec![0usize; size + 1];
    for k in 0..size {
        let len = u64::from_le_bytes(raw[k * 8..(k + 1) * 8].try_into().unwrap()) as usize;
        offsets[k + 1] = offsets[k] + len;
    }
    Ok(offsets)
}

/// Linear: every non-root PE sends its (length-tagged) block directly to
/// team rank 0's `dest`, then rank 0 broadcasts the assembled buffer.
pub fn linear<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    my_nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let offsets = gather_offsets(rma, team, region, my_nbytes)?;
    let total = offsets[size];

    let mut own = vec![0u8; my_nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(dest.offset(offsets[rank]), &own, rma.my_pe())?;

    let arrived = region.slot(1);
    if rank == 0 {
        rma.p_long(arrived.0, 0, rma.my_pe())?;
        arrived.wait_eq(rma, (size - 1) as i64)?;
        arrived.reset(rma)?;
    } else {
        let root = world_pe(team, 0);
        rma.put(dest.offset(offsets[rank]), &own, root)?;
        rma.fence(Some(root))?;
        arrived.bump(rma, root, 1)?;
    }
    crate::broadcast::binomial_tree(rma, team, region.sub(64), 0, dest, total)
}

/// All-linear: every PE puts its block directly into every other
/// member's `dest` at the offset the length table assigns it, then syncs.
pub fn all_linear<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    my_nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let rank = my_rank(rma, team)?;
    let offsets = gather_offsets(rma, team, region, my_nbytes)?;

    let mut own = vec![0u8; my_nbytes];
    rma.get(&mut own, src, rma.my_pe())?;
    rma.put(dest.offset(offsets[rank]), &own, rma.my_pe())?;
    for other in 0..size {
        if other != rank {
            rma.put(dest.offset(offsets[rank]), &own, world_pe(team, other))?;
        }
    }
    rma.quiet()?;
    crate::barrier::dissemination(rma, team, region.sub(96))
}
