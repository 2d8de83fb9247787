//! Runtime configuration
//!
//! Parsed once at [`crate::api::init`] from the `COLL_*` environment
//! variables. A plain struct built once and read-only afterward, rather
//! than scattered global mutable state.

use std::env;
use tracing::warn;

/// Barrier algorithm selector (`COLL_BARRIER_ALGO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierAlgo {
    Linear,
    CompleteTree,
    BinomialTree,
    KnomialTree,
    Dissemination,
}

/// Reduction algorithm selector (`COLL_REDUCE_ALGO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceAlgo {
    Linear,
    Binomial,
    RecDbl,
    Rabenseifner,
    RabenseifnerRing,
}

/// Collect/fcollect algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectAlgo {
    Linear,
    AllLinear,
    RecDbl,
    Ring,
    Bruck,
    BruckNoRotate,
    BruckSignal,
    BruckInplace,
    NeighborExchange,
}

/// All-to-all strided algorithm selector (`COLL_ALLTOALL_ALGO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlltoallAlgo {
    ShiftExchangeBarrier,
    ShiftExchangeCounter,
    XorPairwiseBarrier,
    XorPairwiseCounter,
    ColorPairwiseBarrier,
    ColorPairwiseCounter,
}

/// Process-wide configuration, resolved once and treated as read-only.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub barrier_algo: BarrierAlgo,
    pub tree_degree: usize,
    pub knomial_radix: usize,
    pub reduce_algo: ReduceAlgo,
    pub collect_algo: CollectAlgo,
    pub fcollect_algo: CollectAlgo,
    pub alltoall_algo: AlltoallAlgo,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            barrier_algo: BarrierAlgo::Dissemination,
            tree_degree: 2,
            knomial_radix: 2,
            reduce_algo: ReduceAlgo::RecDbl,
            collect_algo: CollectAlgo::AllLinear,
            fcollect_algo: CollectAlgo::Ring,
            alltoall_algo: AlltoallAlgo::ShiftExchangeBarrier,
        }
    }
}

fn parse_env<T: Copy>(name: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match env::var(name) {
        Ok(raw) => match parse(&raw) {
            Some(value) => value,
            None => {
                warn!(env = name, value = %raw, "unrecognized value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_usize_min2(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|v| *v >= 2)
}

impl Config {
    /// Parse configuration from the process environment, falling back to
    /// defaults (and a `tracing::warn!`, never a panic) for any variable
    /// that is set but unparsable.
    pub fn from_env() -> Self {
        let default = Config::default();
        Config {
            barrier_algo: parse_env("COLL_BARRIER_ALGO", default.barrier_algo, |s| match s {
                "linear" => Some(BarrierAlgo::Linear),
                "complete_tree" => Some(BarrierAlgo::CompleteTree),
                "binomial_tree" => Some(BarrierAlgo::BinomialTree),
                "knomial_tree" => Some(BarrierAlgo::KnomialTree),
                "dissemination" => Some(BarrierAlgo::Dissemination),
                _ => None,
            }),
            tree_degree: parse_env("COLL_TREE_DEGREE", default.tree_degree, parse_usize_min2),
            knomial_radix: parse_env(
                "COLL_KNOMIAL_RADIX",
                default.knomial_radix,
                parse_usize_min2,
            ),
            reduce_algo: parse_env("COLL_REDUCE_ALGO", default.reduce_algo, |s| match s {
                "linear" => Some(ReduceAlgo::Linear),
                "binomial" => Some(ReduceAlgo::Binomial),
                "rec_dbl" => Some(ReduceAlgo::RecDbl),
                "rabenseifner" => Some(ReduceAlgo::Rabenseifner),
                "rabenseifner_ring" => Some(ReduceAlgo::RabenseifnerRing),
                _ => None,
            }),
            collect_algo: parse_env("COLL_COLLECT_ALGO", default.collect_algo, parse_collect_algo),
            fcollect_algo: parse_env(
                "COLL_FCOLLECT_ALGO",
                default.fcollect_algo,
                parse_collect_algo,
            ),
            alltoall_algo: parse_env("COLL_ALLTOALL_ALGO", default.alltoall_algo, |s| match s {
                "shift_barrier" => Some(AlltoallAlgo::ShiftExchangeBarrier),
                "shift_counter" => Some(AlltoallAlgo::ShiftExchangeCounter),
                "xor_barrier" => Some(AlltoallAlgo::XorPairwiseBarrier),
                "xor_counter" => Some(AlltoallAlgo::XorPairwiseCounter),
                "color_barrier" => Some(AlltoallAlgo::ColorPairwiseBarrier),
                "color_counter" => Some(AlltoallAlgo::ColorPairwiseCounter),
                _ => None,
            }),
        }
    }
}

fn parse_collect_algo(s: &str) -> Option<CollectAlgo> {
    match s {
        "linear" => Some(CollectAlgo::Linear),
        "all_linear" => Some(CollectAlgo::AllLinear),
        "rec_dbl" => Some(CollectAlgo::RecDbl),
        "ring" => Some(CollectAlgo::Ring),
        "bruck" => Some(CollectAlgo::Bruck),
        "bruck_no_rotate" => Some(CollectAlgo::BruckNoRotate),
        "bruck_signal" => Some(CollectAlgo::BruckSignal),
        "bruck_inplace" => Some(CollectAlgo::BruckInplace),
        "neighbor_exchange" => Some(CollectAlgo::NeighborExchange),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::default();
        assert_eq!(cfg.tree_degree, 2);
        assert_eq!(cfg.barrier_algo, BarrierAlgo::Dissemination);
    }

    #[test]
    fn parse_usize_rejects_small_values() {
        assert_eq!(parse_usize_min2("1"), None);
        assert_eq!(parse_usize_min2("0"), None);
        assert_eq!(parse_usize_min2("4"), Some(4));
        assert_eq!(parse_usize_min2("abc"), None);
    }

    #[test]
    fn collect_algo_round_trip() {
        assert_eq!(parse_collect_algo("ring"), Some(CollectAlgo::Ring));
        assert_eq!(parse_collect_algo("bogus"), None);
    }
}
