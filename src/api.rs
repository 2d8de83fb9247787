//! L4/L5 — public entry points
//!
//! Mechanical specialization over the `(type, op)` cross-product for
//! reductions and over element types for the data-movement collectives.
//! Generated with [`paste`]: mechanical
//! specialization is expressed, rather than hand-duplicated per type.
//! Every entry here takes a [`crate::substrate::Rma`] and a [`TeamId`]
//! explicitly instead of hiding a global RMA singleton, since this crate
//! has no concrete fabric of its own to default to.

use crate::config::Config;
use crate::error::{Result, ShcollError};
use crate::reduce::ReduceElem;
use crate::substrate::{Rma, SymAddr};
use crate::sync::ScratchGuard;
use crate::team::{self, TeamId};

pub use crate::sync::{
    ALLTOALL_SYNC_SIZE, COLLECT_SYNC_SIZE, REDUCE_MIN_WRKDATA_SIZE, REDUCE_SYNC_SIZE, SYNC_SIZE,
    SYNC_VALUE,
};

/// Entry/exit team barrier plus scratch acquisition/release around one
/// collective call. The housekeeping barrier always
/// uses dissemination, independent of the caller's configured barrier
/// algorithm: it synchronizes scratch-region lifetime, not user-visible
/// collective semantics, so it has no reason to follow `Config`.
fn with_scratch<R: Rma, T>(
    rma: &R,
    team_id: TeamId,
    algo_slots: usize,
    f: impl FnOnce(&crate::team::Team, crate::sync::ScratchRegion) -> Result<T>,
) -> Result<T> {
    let team = team::resolve(team_id)?;
    let guard = ScratchGuard::acquire(team_id, rma, algo_slots)?;
    crate::barrier::dissemination(rma, &team, guard.barrier_region)?;
    let result = f(&team, guard.algo_region)?;
    crate::barrier::dissemination(rma, &team, guard.barrier_region)?;
    Ok(result)
}

/// Initialize process-global state: registers the WORLD team. Mirrors the
/// OpenSHMEM `shmem_init`; idempotent.
pub fn init(n_pes: usize) {
    team::init_world(n_pes);
    tracing::info!(n_pes, "collectives engine initialized");
}

/// Tear down process-global state. A no-op placeholder today (the
/// registry has no per-process resources beyond the WORLD entry this
/// crate's test harnesses re-`init` freely), kept so call sites match the
/// OpenSHMEM init/finalize pairing.
pub fn finalize() {
    tracing::info!("collectives engine finalized");
}

/// Abort the process: used for fatal errors (resource exhaustion,
/// substrate failure) rather than returned to the caller.
pub fn global_exit(code: i32) -> ! {
    tracing::error!(code, "global_exit");
    std::process::exit(code);
}

pub fn my_pe<R: Rma>(rma: &R) -> usize {
    rma.my_pe()
}

pub fn n_pes<R: Rma>(rma: &R) -> usize {
    rma.n_pes()
}

/// Dispatch a team barrier through the configured algorithm, using the
/// scoped scratch arena.
pub fn barrier<R: Rma>(rma: &R, team_id: TeamId, cfg: &Config) -> Result<()> {
    let team = team::resolve(team_id)?;
    let guard = ScratchGuard::acquire(team_id, rma, SYNC_SIZE)?;
    crate::barrier::team_barrier(rma, &team, guard.algo_region, cfg)
}

/// Broadcast `nbytes` from `root_rank`'s `dest` to every other member.
pub fn broadcast<R: Rma>(
    rma: &R,
    team_id: TeamId,
    root_rank: usize,
    dest: SymAddr,
    nbytes: usize,
) -> Result<()> {
    with_scratch(rma, team_id, SYNC_SIZE, |team, region| {
        crate::broadcast::binomial_tree(rma, team, region, root_rank, dest, nbytes)
    })
}

/// Team-scoped fixed-length gather-to-all, dispatched by `cfg.fcollect_algo`.
pub fn fcollect<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    nbytes: usize,
    cfg: &Config,
) -> Result<()> {
    use crate::config::CollectAlgo;
    with_scratch(rma, team_id, COLLECT_SYNC_SIZE, |team, region| {
        match cfg.fcollect_algo {
            CollectAlgo::Linear => crate::fcollect::linear(rma, team, region, dest, src, nbytes),
            CollectAlgo::AllLinear => crate::fcollect::all_linear(rma, team, region, dest, src, nbytes),
            CollectAlgo::RecDbl => crate::fcollect::rec_dbl(rma, team, region, dest, src, nbytes),
            CollectAlgo::Ring => crate::fcollect::ring(rma, team, region, dest, src, nbytes),
            CollectAlgo::Bruck => crate::fcollect::bruck(rma, team, region, dest, src, nbytes),
            CollectAlgo::BruckNoRotate => {
                crate::fcollect::bruck_no_rotate(rma, team, region, dest, src, nbytes)
            }
            CollectAlgo::BruckSignal => {
                crate::fcollect::bruck_signal(rma, team, region, dest, src, nbytes)
            }
            CollectAlgo::BruckInplace => {
                crate::fcollect::bruck_inplace(rma, team, region, dest, src, nbytes)
            }
            CollectAlgo::NeighborExchange => {
                crate::fcollect::neighbor_exchange(rma, team, region, dest, src, nbytes)
            }
        }
    })
}

/// Team-scoped variable-length gather-to-all, dispatched by
/// `cfg.collect_algo` (only the two algorithms that generalize to
/// variable per-PE lengths participate; see `collect`'s module doc).
pub fn collect<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    my_nbytes: usize,
    cfg: &Config,
) -> Result<()> {
    use crate::config::CollectAlgo;
    with_scratch(rma, team_id, COLLECT_SYNC_SIZE, |team, region| match cfg.collect_algo {
        CollectAlgo::AllLinear => crate::collect::all_linear(rma, team, region, dest, src, my_nbytes),
        _ => crate::collect::linear(rma, team, region, dest, src, my_nbytes),
    })
}

/// Team-scoped strided all-to-all, dispatched by `cfg.alltoall_algo`.
#[allow(clippy::too_many_arguments)]
pub fn alltoalls<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    dst_stride: usize,
    src_stride: usize,
    nelems: usize,
    elem_bytes: usize,
    cfg: &Config,
) -> Result<()> {
    use crate::config::AlltoallAlgo;
    with_scratch(rma, team_id, ALLTOALL_SYNC_SIZE, |team, region| {
        match cfg.alltoall_algo {
            AlltoallAlgo::ShiftExchangeBarrier => crate::alltoall::shift_exchange_barrier(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
            AlltoallAlgo::ShiftExchangeCounter => crate::alltoall::shift_exchange_counter(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
            AlltoallAlgo::XorPairwiseBarrier => crate::alltoall::xor_pairwise_barrier(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
            AlltoallAlgo::XorPairwiseCounter => crate::alltoall::xor_pairwise_counter(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
            AlltoallAlgo::ColorPairwiseBarrier => crate::alltoall::color_pairwise_barrier(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
            AlltoallAlgo::ColorPairwiseCounter => crate::alltoall::color_pairwise_counter(
                rma, team, region, dest, src, dst_stride, src_stride, nelems, elem_bytes,
            ),
        }
    })
}

fn reduce_dispatch<T: ReduceElem, R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    cfg: &Config,
    op: impl Fn(T, T) -> T + Copy,
) -> Result<()> {
    use crate::config::ReduceAlgo;
    with_scratch(rma, team_id, REDUCE_SYNC_SIZE, |team, region| {
        match cfg.reduce_algo {
            ReduceAlgo::Linear => crate::reduce::linear(rma, team, region, dest, src, n, op),
            ReduceAlgo::Binomial => crate::reduce::binomial(rma, team, region, dest, src, n, op),
            ReduceAlgo::RecDbl => crate::reduce::rec_dbl(rma, team, region, dest, src, n, op),
            ReduceAlgo::Rabenseifner => {
                crate::reduce::rabenseifner(rma, team, region, dest, src, n, op)
            }
            ReduceAlgo::RabenseifnerRing => {
                crate::reduce::rabenseifner_ring(rma, team, region, dest, src, n, op)
            }
        }
    })
}

/// Generates one `reduce_<op>_<type>` entry point per `(type, op)` pair in
/// `$matrix`, each forwarding to [`reduce_dispatch`] with a closure for
/// that operator — the mechanical (type, op) cross-product expansion,
/// done once per macro invocation instead of by hand.
macro_rules! reduce_entry {
    ($ty:ty, $opname:ident, $op:expr) => {
        paste::paste! {
            #[doc = concat!("`reduce_", stringify!($opname), "` over `", stringify!($ty), "`. Returns `Ok(())` on success; invalid-argument and precondition errors surface as `Err`.")]
            pub fn [<reduce_ $opname _ $ty>]<R: Rma>(
                rma: &R,
                team_id: TeamId,
                dest: SymAddr,
                src: SymAddr,
                n: usize,
                cfg: &Config,
            ) -> Result<()> {
                reduce_dispatch::<$ty, R>(rma, team_id, dest, src, n, cfg, $op)
            }
        }
    };
}

macro_rules! bitwise_entries {
    ($ty:ty) => {
        reduce_entry!($ty, and, |a: $ty, b: $ty| a & b);
        reduce_entry!($ty, or, |a: $ty, b: $ty| a | b);
        reduce_entry!($ty, xor, |a: $ty, b: $ty| a ^ b);
    };
}

macro_rules! minmax_sum_entries {
    ($ty:ty) => {
        reduce_entry!($ty, min, |a: $ty, b: $ty| if a < b { a } else { b });
        reduce_entry!($ty, max, |a: $ty, b: $ty| if a > b { a } else { b });
        reduce_entry!($ty, sum, |a: $ty, b: $ty| a + b);
    };
}

macro_rules! prod_entry {
    ($ty:ty) => {
        reduce_entry!($ty, prod, |a: $ty, b: $ty| a * b);
    };
}

// Integral types get the full operator set. Floating types get
// MIN/MAX/SUM/PROD but not AND/OR/XOR.
bitwise_entries!(i32);
bitwise_entries!(i64);
bitwise_entries!(u32);
bitwise_entries!(u64);
minmax_sum_entries!(i32);
minmax_sum_entries!(i64);
minmax_sum_entries!(u32);
minmax_sum_entries!(u64);
minmax_sum_entries!(f32);
minmax_sum_entries!(f64);
prod_entry!(i32);
prod_entry!(i64);
prod_entry!(u32);
prod_entry!(u64);
prod_entry!(f32);
prod_entry!(f64);

// Complex types get only SUM/PROD (no total order, so no MIN/MAX, and no
// AND/OR/XOR since they aren't integral): handwritten rather than run
// through `minmax_sum_entries!`/`prod_entry!`, since those generate the
// function name from `$ty` directly and `Complexf`/`Complexd` aren't valid
// lowercase suffixes the way `i32`/`f64` are.

/// `reduce_sum` over single-precision complex values.
pub fn reduce_sum_complexf<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    cfg: &Config,
) -> Result<()> {
    reduce_dispatch::<crate::reduce::Complexf, R>(rma, team_id, dest, src, n, cfg, |a, b| a + b)
}

/// `reduce_prod` over single-precision complex values.
pub fn reduce_prod_complexf<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    cfg: &Config,
) -> Result<()> {
    reduce_dispatch::<crate::reduce::Complexf, R>(rma, team_id, dest, src, n, cfg, |a, b| a * b)
}

/// `reduce_sum` over double-precision complex values.
pub fn reduce_sum_complexd<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    cfg: &Config,
) -> Result<()> {
    reduce_dispatch::<crate::reduce::Complexd, R>(rma, team_id, dest, src, n, cfg, |a, b| a + b)
}

/// `reduce_prod` over double-precision complex values.
pub fn reduce_prod_complexd<R: Rma>(
    rma: &R,
    team_id: TeamId,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    cfg: &Config,
) -> Result<()> {
    reduce_dispatch::<crate::reduce::Complexd, R>(rma, team_id, dest, src, n, cfg, |a, b| a * b)
}

/// Legacy "active set" entry points, parameterized by `(PE_start,
/// logPE_stride, PE_size, pSync[, pWrk])` instead of a [`TeamId`] —
/// retained for backward compatibility and marked deprecated. Each
/// constructs an ephemeral [`crate::team::Team`] directly rather than
/// resolving one from the registry, and the caller supplies the scratch
/// region instead of it being acquired implicitly.
pub mod legacy {
    use super::*;
    use crate::team::Team;

    fn active_set_team(pe_start: usize, log_pe_stride: u32, pe_size: usize) -> Team {
        Team {
            world_start: pe_start,
            stride: 1usize << log_pe_stride,
            size: pe_size,
        }
    }

    #[deprecated(note = "use crate::api::barrier with a TeamId instead")]
    pub fn barrier_active_set<R: Rma>(
        rma: &R,
        pe_start: usize,
        log_pe_stride: u32,
        pe_size: usize,
        psync: SymAddr,
    ) -> Result<()> {
        let team = active_set_team(pe_start, log_pe_stride, pe_size);
        let region = crate::sync::ScratchRegion {
            psync_base: psync,
            pwrk_base: psync, // barrier needs no pWrk; reuse harmlessly
        };
        crate::barrier::dissemination(rma, &team, region)
    }

    #[deprecated(note = "use crate::api::broadcast with a TeamId instead")]
    #[allow(clippy::too_many_arguments)]
    pub fn broadcast_active_set<R: Rma>(
        rma: &R,
        pe_start: usize,
        log_pe_stride: u32,
        pe_size: usize,
        psync: SymAddr,
        root_rank: usize,
        dest: SymAddr,
        nbytes: usize,
    ) -> Result<()> {
        let team = active_set_team(pe_start, log_pe_stride, pe_size);
        let region = crate::sync::ScratchRegion {
            psync_base: psync,
            pwrk_base: psync,
        };
        crate::broadcast::binomial_tree(rma, &team, region, root_rank, dest, nbytes)
    }

    #[deprecated(note = "use crate::api::reduce_sum_i64 (or the matching typed entry) with a TeamId instead")]
    pub fn reduce_sum_i64_active_set<R: Rma>(
        rma: &R,
        pe_start: usize,
        log_pe_stride: u32,
        pe_size: usize,
        psync: SymAddr,
        pwrk: SymAddr,
        dest: SymAddr,
        src: SymAddr,
        n: usize,
    ) -> Result<()> {
        let team = active_set_team(pe_start, log_pe_stride, pe_size);
        let region = crate::sync::ScratchRegion {
            psync_base: psync,
            pwrk_base: pwrk,
        };
        crate::reduce::linear(rma, &team, region, dest, src, n, |a: i64, b: i64| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::local::LocalRma;
    use crate::sync::ARENA_BYTES;
    use std::sync::{Arc, Mutex};

    #[test]
    fn reduce_sum_i64_round_trip() {
        let pes = LocalRma::new_world(4, ARENA_BYTES * 2);
        team::init_world(4);
        let src = SymAddr(ARENA_BYTES);
        let dest = SymAddr(ARENA_BYTES + 8);
        let cfg = Config::default();

        for pe in &pes {
            pe.put(src, &((pe.my_pe() + 1) as i64).to_le_bytes(), pe.my_pe()).unwrap();
        }

        let results: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        crossbeam::scope(|scope| {
            for pe in &pes {
                let results = results.clone();
                let cfg = &cfg;
                scope.spawn(move |_| {
                    reduce_sum_i64(pe, TeamId::WORLD, dest, src, 1, cfg).unwrap();
                    let mut buf = [0u8; 8];
                    pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                    results.lock().unwrap().push(i64::from_le_bytes(buf));
                });
            }
        })
        .unwrap();

        for v in results.lock().unwrap().iter() {
            assert_eq!(*v, 10); // 1+2+3+4
        }
    }

    /// Regression: `collect` under the default config (`collect_algo =
    /// AllLinear`) goes through `gather_offsets`'s all-peers-are-counters
    /// fan-in via the scoped-scratch path, which starts every slot at
    /// `SYNC_VALUE` rather than 0. Must actually return, not hang.
    #[test]
    fn collect_default_config_completes() {
        let n_pes = 4;
        let pes = LocalRma::new_world(n_pes, ARENA_BYTES * 4);
        team::init_world(n_pes);
        let lens = [1usize, 3, 2, 4];
        let total: usize = lens.iter().sum();
        let src = SymAddr(ARENA_BYTES);
        let dest = SymAddr(ARENA_BYTES * 2);
        let cfg = Config::default();

        for (rank, pe) in pes.iter().enumerate() {
            let payload = vec![(rank + 1) as u8; lens[rank]];
            pe.put(src, &payload, pe.my_pe()).unwrap();
        }

        crossbeam::scope(|scope| {
            for (rank, pe) in pes.iter().enumerate() {
                let cfg = &cfg;
                let my_len = lens[rank];
                scope.spawn(move |_| {
                    collect(pe, TeamId::WORLD, dest, src, my_len, cfg).unwrap();
                    let mut buf = vec![0u8; total];
                    pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                    let mut want = Vec::new();
                    for (r, &len) in lens.iter().enumerate() {
                        want.extend(std::iter::repeat((r + 1) as u8).take(len));
                    }
                    assert_eq!(buf, want);
                });
            }
        })
        .unwrap();
    }

    /// Regression: `fcollect` with each counter-synchronized algorithm
    /// (`Linear`'s root-owned counter, `BruckInplace`/`NeighborExchange`'s
    /// all-peers-are-counters fan-in) must complete through the
    /// scoped-scratch path, not hang on a slot that never saw a 0.
    #[test]
    fn fcollect_counter_synchronized_algos_complete() {
        use crate::config::CollectAlgo;
        for algo in [CollectAlgo::Linear, CollectAlgo::BruckInplace, CollectAlgo::NeighborExchange] {
            let n_pes = 4;
            let nbytes = 2;
            let pes = LocalRma::new_world(n_pes, ARENA_BYTES * 2);
            team::init_world(n_pes);
            let src = SymAddr(ARENA_BYTES);
            let dest = SymAddr(ARENA_BYTES + nbytes);
            let mut cfg = Config::default();
            cfg.fcollect_algo = algo;

            for (rank, pe) in pes.iter().enumerate() {
                let payload = vec![(rank + 1) as u8; nbytes];
                pe.put(src, &payload, pe.my_pe()).unwrap();
            }

            crossbeam::scope(|scope| {
                for pe in &pes {
                    let cfg = &cfg;
                    scope.spawn(move |_| {
                        fcollect(pe, TeamId::WORLD, dest, src, nbytes, cfg).unwrap();
                        let mut buf = vec![0u8; n_pes * nbytes];
                        pe.get(&mut buf, dest, pe.my_pe()).unwrap();
                        let mut want = Vec::new();
                        for rank in 0..n_pes {
                            want.extend(std::iter::repeat((rank + 1) as u8).take(nbytes));
                        }
                        assert_eq!(buf, want);
                    });
                }
            })
            .unwrap();
        }
    }

    /// Regression: every `*Counter` all-to-all variant must complete
    /// through the scoped-scratch path.
    #[test]
    fn alltoalls_counter_variants_complete() {
        use crate::config::AlltoallAlgo;
        for algo in [
            AlltoallAlgo::ShiftExchangeCounter,
            AlltoallAlgo::XorPairwiseCounter,
            AlltoallAlgo::ColorPairwiseCounter,
        ] {
            let n_pes = 4;
            let elem_bytes = 8;
            let pes = LocalRma::new_world(n_pes, ARENA_BYTES * 4);
            team::init_world(n_pes);
            let src = SymAddr(ARENA_BYTES);
            let dest = SymAddr(ARENA_BYTES * 2);
            let mut cfg = Config::default();
            cfg.alltoall_algo = algo;

            for (rank, pe) in pes.iter().enumerate() {
                for j in 0..n_pes {
                    let value = (rank * 100 + j) as i64;
                    pe.put(src.offset(j * elem_bytes), &value.to_le_bytes(), pe.my_pe()).unwrap();
                }
            }

            crossbeam::scope(|scope| {
                for pe in &pes {
                    let cfg = &cfg;
                    scope.spawn(move |_| {
                        alltoalls(pe, TeamId::WORLD, dest, src, 1, 1, 1, elem_bytes, cfg)
                            .unwrap();
                        for sender in 0..n_pes {
                            let mut buf = [0u8; 8];
                            pe.get(&mut buf, dest.offset(sender * elem_bytes), pe.my_pe()).unwrap();
                            assert_eq!(i64::from_le_bytes(buf), (sender * 100 + pe.my_pe()) as i64);
                        }
                    });
                }
            })
            .unwrap();
        }
    }

    #[test]
    fn invalid_team_surfaces_as_error_not_panic() {
        let pes = LocalRma::new_world(2, ARENA_BYTES);
        let cfg = Config::default();
        let bogus = TeamId::INVALID;
        let err = reduce_sum_i64(&pes[0], bogus, SymAddr(0), SymAddr(8), 1, &cfg).unwrap_err();
        assert!(matches!(err, ShcollError::InvalidTeam));
    }
}
