//! shcoll: collective communication algorithms for a PGAS/OpenSHMEM-style
//! one-sided runtime.
//!
//! # Architecture
//!
//! The crate is layered bottom-up, each module depending only on the ones
//! below it:
//!
//! - [`substrate`] (L0) — the abstract one-sided RMA contract ([`substrate::Rma`])
//!   plus an in-process reference implementation for testing.
//! - [`team`] (L1) — team/context descriptors and the process-wide team
//!   registry.
//! - [`sync`], [`barrier`], [`broadcast`] (L2) — the pSync sentinel
//!   protocol, scoped scratch acquisition, and the barrier/broadcast
//!   algorithms every higher-level collective is built from.
//! - [`reduce`], [`collect`], [`fcollect`], [`alltoall`] (L3) — the
//!   collective algorithm families.
//! - [`api`] (L4/L5) — the public, team-scoped entry points, including the
//!   mechanical `(type, op)` reduction cross-product and the deprecated
//!   legacy active-set surface.
//!
//! Every algorithm is generic over [`substrate::Rma`]; nothing in this
//! crate assumes a particular fabric or transport.

pub mod alltoall;
pub mod api;
pub mod barrier;
pub mod broadcast;
pub mod collect;
pub mod config;
pub mod error;
pub mod fcollect;
pub mod reduce;
pub mod substrate;
pub mod sync;
pub mod team;

#[cfg(test)]
pub mod testing;

pub use error::{Result, ShcollError};
pub use substrate::{CmpOp, Pe, Rma, SymAddr};
pub use team::{Team, TeamId};
