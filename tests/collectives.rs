//! End-to-end integration tests driving full N-PE collectives over
//! `LocalRma`, covering the universal invariants: identity/order
//! independence of reduction results, concatenation correctness for
//! gather-to-all, bijection for all-to-all, pSync restoration across
//! back-to-back calls, and idempotence under repeated invocation.

use proptest::prelude::*;
use shcoll::barrier::dissemination;
use shcoll::fcollect;
use shcoll::reduce::rec_dbl;
use shcoll::substrate::local::LocalRma;
use shcoll::sync::{default_region, ScratchRegion, ARENA_BYTES};
use shcoll::{Rma, SymAddr, Team};

fn world(n_pes: usize, heap_bytes: usize) -> (Vec<LocalRma>, Team) {
    (LocalRma::new_world(n_pes, heap_bytes), Team::world(n_pes))
}

fn sum(a: i64, b: i64) -> i64 {
    a + b
}

fn run_reduce_sum(n_pes: usize, values: &[i64], region: ScratchRegion) -> Vec<i64> {
    let (pes, team) = world(n_pes, ARENA_BYTES * 2);
    let src = SymAddr(ARENA_BYTES);
    let dest = SymAddr(ARENA_BYTES + 8);
    for (pe, &v) in pes.iter().zip(values.iter()) {
        pe.put(src, &v.to_le_bytes(), pe.my_pe()).unwrap();
    }
    let results = std::sync::Mutex::new(vec![0i64; n_pes]);
    crossbeam::scope(|scope| {
        for pe in &pes {
            let team = &team;
            let results = &results;
            scope.spawn(move |_| {
                rec_dbl(pe, team, region, dest, src, 1, sum).unwrap();
                let mut buf = [0u8; 8];
                pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                results.lock().unwrap()[pe.my_pe()] = i64::from_le_bytes(buf);
            });
        }
    })
    .unwrap();
    results.into_inner().unwrap()
}

proptest! {
    /// Universal invariant: every member's result equals the identity fold
    /// of every contribution, regardless of team size.
    #[test]
    fn reduce_sum_identity_holds(
        values in prop::collection::vec(-1000i64..1000, 1..9)
    ) {
        let n_pes = values.len();
        let region = default_region();
        let expected: i64 = values.iter().sum();
        let out = run_reduce_sum(n_pes, &values, region);
        for result in out {
            prop_assert_eq!(result, expected);
        }
    }

    /// Order independence: summation is commutative, so permuting which
    /// rank holds which contribution must not change the result any PE
    /// observes.
    #[test]
    fn reduce_sum_is_order_independent(
        mut values in prop::collection::vec(-1000i64..1000, 2..7)
    ) {
        let region = default_region();
        let expected: i64 = values.iter().sum();
        let original = run_reduce_sum(values.len(), &values, region);
        values.reverse();
        let reversed = run_reduce_sum(values.len(), &values, region);
        for result in original {
            prop_assert_eq!(result, expected);
        }
        for result in reversed {
            prop_assert_eq!(result, expected);
        }
    }

    /// Concatenation correctness: fcollect's assembled buffer is exactly
    /// the members' contributions in rank order, for any team size and
    /// any per-element byte width.
    #[test]
    fn fcollect_all_linear_concatenates_in_rank_order(
        n_pes in 2usize..7,
        nbytes in 1usize..5,
    ) {
        let (pes, team) = world(n_pes, ARENA_BYTES * 2);
        let region = default_region();
        let src = SymAddr(ARENA_BYTES);
        let dest = SymAddr(ARENA_BYTES + nbytes);

        for (rank, pe) in pes.iter().enumerate() {
            let payload = vec![(rank + 1) as u8; nbytes];
            pe.put(src, &payload, pe.my_pe()).unwrap();
        }

        let results = std::sync::Mutex::new(vec![Vec::new(); n_pes]);
        crossbeam::scope(|scope| {
            for pe in &pes {
                let team = &team;
                let results = &results;
                scope.spawn(move |_| {
                    fcollect::all_linear(pe, team, region, dest, src, nbytes).unwrap();
                    let mut buf = vec![0u8; n_pes * nbytes];
                    pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                    results.lock().unwrap()[pe.my_pe()] = buf;
                });
            }
        })
        .unwrap();

        let mut expected = Vec::with_capacity(n_pes * nbytes);
        for rank in 0..n_pes {
            expected.extend(std::iter::repeat((rank + 1) as u8).take(nbytes));
        }
        for buf in results.into_inner().unwrap() {
            prop_assert_eq!(buf, expected.clone());
        }
    }

    /// Bijection: in a strided all-to-all, the block receiver `r` reads
    /// from sender `s` is exactly the block `s` addressed to `r`, for any
    /// team size.
    #[test]
    fn alltoall_shift_exchange_is_bijective(n_pes in 2usize..8) {
        use shcoll::alltoall::shift_exchange_barrier;
        let (pes, team) = world(n_pes, ARENA_BYTES * 4);
        let region = default_region();
        let src = SymAddr(ARENA_BYTES);
        let dest = SymAddr(ARENA_BYTES * 2);
        let elem_bytes = 8;

        for (rank, pe) in pes.iter().enumerate() {
            for j in 0..n_pes {
                let value = (rank * 1000 + j) as i64;
                pe.put(src.offset(j * elem_bytes), &value.to_le_bytes(), pe.my_pe()).unwrap();
            }
        }

        let results = std::sync::Mutex::new(vec![Vec::new(); n_pes]);
        crossbeam::scope(|scope| {
            for pe in &pes {
                let team = &team;
                let results = &results;
                scope.spawn(move |_| {
                    shift_exchange_barrier(pe, team, region, dest, src, 1, 1, 1, elem_bytes).unwrap();
                    let mut out = Vec::with_capacity(n_pes);
                    for sender in 0..n_pes {
                        let mut buf = [0u8; 8];
                        pe.get(&mut buf, dest.offset(sender * elem_bytes), pe.my_pe()).unwrap();
                        out.push(i64::from_le_bytes(buf));
                    }
                    results.lock().unwrap()[pe.my_pe()] = out;
                });
            }
        })
        .unwrap();

        for (receiver, row) in results.into_inner().unwrap().into_iter().enumerate() {
            for (sender, value) in row.into_iter().enumerate() {
                prop_assert_eq!(value, (sender * 1000 + receiver) as i64);
            }
        }
    }
}

/// pSync restoration: the region's slots must be back at the sentinel
/// after a collective returns, so the identical region can be reused by
/// the very next call without any caller-side reset.
#[test]
fn barrier_region_restored_for_back_to_back_calls() {
    let (pes, team) = world(4, ARENA_BYTES);
    let region = default_region();
    crossbeam::scope(|scope| {
        for pe in &pes {
            let team = &team;
            scope.spawn(move |_| {
                for _ in 0..50 {
                    dissemination(pe, team, region).unwrap();
                }
            });
        }
    })
    .unwrap();

    for slot_idx in 0..8 {
        let value = region.slot(slot_idx).fetch(&pes[0]).unwrap();
        assert_eq!(value, shcoll::sync::SYNC_VALUE);
    }
}

/// Idempotence: repeating the same reduction many times in a row yields
/// the same per-PE result every time (no residual state leaks between
/// calls through the shared scratch region).
#[test]
fn reduce_sum_idempotent_across_repeated_calls() {
    let n_pes = 5;
    let (pes, team) = world(n_pes, ARENA_BYTES * 2);
    let region = default_region();
    let src = SymAddr(ARENA_BYTES);
    let dest = SymAddr(ARENA_BYTES + 8);
    for pe in &pes {
        pe.put(src, &((pe.my_pe() + 1) as i64).to_le_bytes(), pe.my_pe()).unwrap();
    }

    crossbeam::scope(|scope| {
        for pe in &pes {
            let team = &team;
            scope.spawn(move |_| {
                for _ in 0..10 {
                    rec_dbl(pe, team, region, dest, src, 1, sum).unwrap();
                    let mut buf = [0u8; 8];
                    pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                    assert_eq!(i64::from_le_bytes(buf), 15); // 1+2+3+4+5
                }
            });
        }
    })
    .unwrap();
}
