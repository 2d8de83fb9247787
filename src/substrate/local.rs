//! In-process reference substrate
//!
//! Simulates a symmetric heap shared by `n_pes` world PEs, each running on
//! its own OS thread, communicating only through [`LocalRma`]. This is the
//! concrete instantiation needed to exercise and test the collectives
//! engine without a real fabric: an in-process multi-thread harness
//! standing in for a live network.
//!
//! Every PE's slice of the symmetric heap is a plain byte buffer behind a
//! `parking_lot::Mutex`; a symmetric address is simply a byte offset that
//! is valid on every PE's buffer. All operations complete synchronously —
//! a stronger guarantee than the abstract contract requires, which is
//! always a safe substitute in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, ShcollError};
use crate::substrate::{CmpOp, Pe, Rma, SymAddr};

/// Shared state behind every PE's [`LocalRma`] handle.
struct Shared {
    heaps: Vec<Mutex<Vec<u8>>>,
    outstanding: Vec<AtomicUsize>,
}

/// One PE's view of an in-process symmetric heap.
///
/// Clone is cheap (an `Arc` and an integer); every clone sharing the same
/// [`Shared`] but a distinct `my_pe` models one simulated PE.
#[derive(Clone)]
pub struct LocalRma {
    shared: Arc<Shared>,
    my_pe: Pe,
}

impl LocalRma {
    /// Build `n_pes` handles onto a freshly allocated symmetric heap, each
    /// PE's region `heap_bytes` long.
    pub fn new_world(n_pes: usize, heap_bytes: usize) -> Vec<LocalRma> {
        let shared = Arc::new(Shared {
            heaps: (0..n_pes).map(|_| Mutex::new(vec![0u8; heap_bytes])).collect(),
            outstanding: (0..n_pes).map(|_| AtomicUsize::new(0)).collect(),
        });
        (0..n_pes)
            .map(|pe| LocalRma {
                shared: shared.clone(),
                my_pe: pe,
            })
            .collect()
    }

    fn check_bounds(&self, addr: SymAddr, len: usize, pe: Pe) -> Result<()> {
        if pe >= self.shared.heaps.len() {
            return Err(ShcollError::InvalidArgument(format!(
                "pe {pe} out of range (n_pes={})",
                self.shared.heaps.len()
            )));
        }
        let heap_len = self.shared.heaps[pe].lock().len();
        if addr.0.saturating_add(len) > heap_len {
            return Err(ShcollError::SubstrateFailure(format!(
                "symmetric address {}..{} out of bounds (heap len {})",
                addr.0,
                addr.0 + len,
                heap_len
            )));
        }
        Ok(())
    }
}

impl Rma for LocalRma {
    fn put(&self, dst: SymAddr, src: &[u8], pe: Pe) -> Result<()> {
        self.check_bounds(dst, src.len(), pe)?;
        let mut heap = self.shared.heaps[pe].lock();
        heap[dst.0..dst.0 + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn put_nb(&self, dst: SymAddr, src: &[u8], pe: Pe) -> Result<()> {
        self.shared.outstanding[self.my_pe].fetch_add(1, Ordering::SeqCst);
        let result = self.put(dst, src, pe);
        self.shared.outstanding[self.my_pe].fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn get(&self, dst: &mut [u8], src: SymAddr, pe: Pe) -> Result<()> {
        self.check_bounds(src, dst.len(), pe)?;
        let heap = self.shared.heaps[pe].lock();
        dst.copy_from_slice(&heap[src.0..src.0 + dst.len()]);
        Ok(())
    }

    fn get_nb(&self, dst: &mut [u8], src: SymAddr, pe: Pe) -> Result<()> {
        self.get(dst, src, pe)
    }

    fn fence(&self, _pe: Option<Pe>) -> Result<()> {
        Ok(())
    }

    fn quiet(&self) -> Result<()> {
        while self.shared.outstanding[self.my_pe].load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
        Ok(())
    }

    fn atomic_add_long(&self, addr: SymAddr, delta: i64, pe: Pe) -> Result<()> {
        self.check_bounds(addr, 8, pe)?;
        let mut heap = self.shared.heaps[pe].lock();
        let slot = &mut heap[addr.0..addr.0 + 8];
        let current = i64::from_le_bytes(slot.try_into().unwrap());
        slot.copy_from_slice(&(current + delta).to_le_bytes());
        Ok(())
    }

    fn atomic_fetch_long(&self, addr: SymAddr, pe: Pe) -> Result<i64> {
        self.check_bounds(addr, 8, pe)?;
        let heap = self.shared.heaps[pe].lock();
        Ok(i64::from_le_bytes(heap[addr.0..addr.0 + 8].try_into().unwrap()))
    }

    fn wait_until_long(&self, addr: SymAddr, cmp: CmpOp, value: i64) -> Result<()> {
        loop {
            let observed = self.atomic_fetch_long(addr, self.my_pe)?;
            if cmp.eval(observed, value) {
                return Ok(());
            }
            std::thread::yield_now();
        }
    }

    fn p_long(&self, addr: SymAddr, value: i64, pe: Pe) -> Result<()> {
        self.check_bounds(addr, 8, pe)?;
        let mut heap = self.shared.heaps[pe].lock();
        heap[addr.0..addr.0 + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn my_pe(&self) -> Pe {
        self.my_pe
    }

    fn n_pes(&self) -> usize {
        self.shared.heaps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let pes = LocalRma::new_world(2, 64);
        pes[0].put(SymAddr(0), &[1, 2, 3, 4], 1).unwrap();
        let mut buf = [0u8; 4];
        pes[1].get(&mut buf, SymAddr(0), 1).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn atomics_and_wait_until() {
        let pes = LocalRma::new_world(2, 64);
        pes[0].p_long(SymAddr(0), 0, 0).unwrap();
        pes[1].atomic_add_long(SymAddr(0), 5, 0).unwrap();
        assert_eq!(pes[0].atomic_fetch_long(SymAddr(0), 0).unwrap(), 5);
        pes[0].wait_until_long(SymAddr(0), CmpOp::Eq, 5).unwrap();
    }

    #[test]
    fn out_of_bounds_is_substrate_failure() {
        let pes = LocalRma::new_world(1, 8);
        let err = pes[0].put(SymAddr(4), &[1, 2, 3, 4, 5], 0).unwrap_err();
        assert!(matches!(err, ShcollError::SubstrateFailure(_)));
    }
}
