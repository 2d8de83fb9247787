//! L2 — internal broadcast
//!
//! A root PE's buffer is delivered to every other team member. These two
//! variants are used internally by the reduction algorithms in [`crate::
//! reduce`] and also service the public `broadcast` entry point in
//! [`crate::api`].

use crate::error::{Result, ShcollError};
use crate::substrate::{Rma, SymAddr};
use crate::sync::ScratchRegion;
use crate::team::Team;

fn world_pe(team: &Team, rank: usize) -> usize {
    team.member(rank).expect("rank within team size")
}

/// Linear broadcast: the root puts directly to every other member, then
/// signals completion; the rest wait for the signal before reading `dest`.
pub fn linear<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    root_rank: usize,
    dest: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let my_rank = team
        .rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))?;
    let done = region.slot(0);

    if my_rank == root_rank {
        let mut buf = vec![0u8; nbytes];
        rma.get(&mut buf, dest, rma.my_pe())?;
        for rank in 0..team.size {
            if rank != root_rank {
                rma.put(dest, &buf, world_pe(team, rank))?;
            }
        }
        rma.fence(None)?;
        for rank in 0..team.size {
            if rank != root_rank {
                done.signal(rma, world_pe(team, rank), 1)?;
            }
        }
    } else {
        done.wait_eq(rma, 1)?;
        done.reset(rma)?;
    }
    rma.quiet()
}

/// Binomial-tree broadcast: log2(N) steps; at step `s` every PE that
/// already has the data forwards it to the peer `2^s` ranks ahead (modulo
/// wraparound handled by restricting forwarding to in-range ranks only,
/// which is sufficient because every rank below `2^s` already has the
/// data by induction).
pub fn binomial_tree<R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    root_rank: usize,
    dest: SymAddr,
    nbytes: usize,
) -> Result<()> {
    let size = team.size;
    let my_rank = team
        .rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))?;
    // Rotate ranks so the root is logical rank 0; simplifies the standard
    // binomial recursive-doubling forward pattern.
    let rel_rank = (my_rank + size - root_rank) % size;

    let rounds = if size <= 1 {
        0
    } else {
        (usize::BITS - (size - 1).leading_zeros()) as usize
    };

    let mut have_data = rel_rank == 0;
    let mut buf = vec![0u8; nbytes];
    if have_data {
        rma.get(&mut buf, dest, rma.my_pe())?;
    }

    for s in 0..rounds {
        let step = 1usize << s;
        let slot = region.slot(s);
        if have_data && rel_rank + step < size {
            let target_rel = rel_rank + step;
            let target_rank = (target_rel + root_rank) % size;
            rma.put(dest, &buf, world_pe(team, target_rank))?;
            rma.fence(Some(world_pe(team, target_rank)))?;
            slot.signal(rma, world_pe(team, target_rank), 1)?;
        } else if !have_data && rel_rank >= step && rel_rank < 2 * step {
            slot.wait_eq(rma, 1)?;
            rma.get(&mut buf, dest, rma.my_pe())?;
            have_data = true;
            slot.reset(rma)?;
        }
    }
    rma.quiet()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::local::LocalRma;
    use crate::sync::{default_region, ARENA_BYTES};
    use std::sync::{Arc, Mutex};

    fn run_broadcast(n_pes: usize, root_rank: usize, use_binomial: bool) -> Vec<Vec<u8>> {
        let pes = LocalRma::new_world(n_pes, ARENA_BYTES);
        let team = Team::world(n_pes);
        let region = default_region();
        let dest = SymAddr(region.pwrk_base.0);
        let payload = vec![7u8, 8, 9, 10];

        // seed the root's copy before the collective
        pes[root_rank].put(dest, &payload, root_rank).unwrap();

        let results: Arc<Mutex<Vec<(usize, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

        crossbeam::scope(|scope| {
            for pe in &pes {
                let team = &team;
                let results = results.clone();
                let payload_len = payload.len();
                scope.spawn(move |_| {
                    if use_binomial {
                        binomial_tree(pe, team, region, root_rank, dest, payload_len).unwrap();
                    } else {
                        linear(pe, team, region, root_rank, dest, payload_len).unwrap();
                    }
                    let mut buf = vec![0u8; payload_len];
                    pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                    results.lock().unwrap().push((pe.my_pe(), buf));
                });
            }
        })
        .unwrap();

        let mut results = Arc::try_unwrap(results).unwrap().into_inner().unwrap();
        results.sort_by_key(|(pe, _)| *pe);
        results.into_iter().map(|(_, buf)| buf).collect()
    }

    #[test]
    fn linear_broadcast_delivers_to_all() {
        let out = run_broadcast(5, 0, false);
        for buf in out {
            assert_eq!(buf, vec![7, 8, 9, 10]);
        }
    }

    #[test]
    fn binomial_tree_broadcast_delivers_to_all_nonpow2() {
        let out = run_broadcast(6, 2, true);
        for buf in out {
            assert_eq!(buf, vec![7, 8, 9, 10]);
        }
    }
}
