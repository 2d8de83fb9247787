//! L3 — reductions
//!
//! `reduce(op, dest, src, n, team)`: every member's `src` is folded through
//! an associative operator and the identical result lands in every
//! member's `dest`. Five algorithms are provided; each is written once,
//! generic over the element type `T` and the fold function, instead of
//! being textually duplicated per `(type, op, algorithm)` combination. The
//! concrete `(type, op)` entry points live in [`crate::api`].

use crate::error::{Result, ShcollError};
use crate::substrate::{Pe, Rma, SymAddr};
use crate::sync::ScratchRegion;
use crate::team::Team;

/// An element type a reduction can operate on: fixed-size, little-endian
/// (de)serializable. Implemented for the integral and floating-point types
/// the public API exposes; the associated operator set each type supports
/// is enforced by which entry points [`crate::api`] generates, not by this
/// trait.
pub trait ReduceElem: Copy + Default + Send + Sync + 'static {
    const SIZE: usize;
    fn write_le(self, buf: &mut [u8]);
    fn read_le(buf: &[u8]) -> Self;
}

macro_rules! impl_reduce_elem {
    ($t:ty) => {
        impl ReduceElem for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            fn write_le(self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_le_bytes());
            }
            fn read_le(buf: &[u8]) -> Self {
                <$t>::from_le_bytes(buf.try_into().expect("slice has exactly SIZE bytes"))
            }
        }
    };
}

impl_reduce_elem!(i32);
impl_reduce_elem!(i64);
impl_reduce_elem!(u32);
impl_reduce_elem!(u64);
impl_reduce_elem!(f32);
impl_reduce_elem!(f64);

/// Single-precision complex element (`re + im*i`), laid out as two
/// little-endian `f32`s. Only SUM/PROD are meaningful over complex values
/// (no total order), so this type does not participate in `min`/`max`
/// entry-point generation the way `f32`/`f64` do.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complexf {
    pub re: f32,
    pub im: f32,
}

impl Complexf {
    pub fn new(re: f32, im: f32) -> Self {
        Complexf { re, im }
    }
}

impl std::ops::Add for Complexf {
    type Output = Complexf;
    fn add(self, rhs: Complexf) -> Complexf {
        Complexf::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::Mul for Complexf {
    type Output = Complexf;
    fn mul(self, rhs: Complexf) -> Complexf {
        Complexf::new(self.re * rhs.re - self.im * rhs.im, self.re * rhs.im + self.im * rhs.re)
    }
}

impl ReduceElem for Complexf {
    const SIZE: usize = 8;
    fn write_le(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.re.to_le_bytes());
        buf[4..8].copy_from_slice(&self.im.to_le_bytes());
    }
    fn read_le(buf: &[u8]) -> Self {
        Complexf::new(
            f32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")),
            f32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")),
        )
    }
}

/// Double-precision complex element, the `Complexf` of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complexd {
    pub re: f64,
    pub im: f64,
}

impl Complexd {
    pub fn new(re: f64, im: f64) -> Self {
        Complexd { re, im }
    }
}

impl std::ops::Add for Complexd {
    type Output = Complexd;
    fn add(self, rhs: Complexd) -> Complexd {
        Complexd::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::Mul for Complexd {
    type Output = Complexd;
    fn mul(self, rhs: Complexd) -> Complexd {
        Complexd::new(self.re * rhs.re - self.im * rhs.im, self.re * rhs.im + self.im * rhs.re)
    }
}

impl ReduceElem for Complexd {
    const SIZE: usize = 16;
    fn write_le(self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.re.to_le_bytes());
        buf[8..16].copy_from_slice(&self.im.to_le_bytes());
    }
    fn read_le(buf: &[u8]) -> Self {
        Complexd::new(
            f64::from_le_bytes(buf[0..8].try_into().expect("8 bytes")),
            f64::from_le_bytes(buf[8..16].try_into().expect("8 bytes")),
        )
    }
}

fn world_pe(team: &Team, rank: usize) -> Pe {
    team.member(rank).expect("rank within team size")
}

fn my_rank<R: Rma>(rma: &R, team: &Team) -> Result<usize> {
    team.rank_of(rma.my_pe())
        .ok_or_else(|| ShcollError::InvalidArgument("caller is not a member of team".into()))
}

fn decode<T: ReduceElem>(buf: &[u8], n: usize) -> Vec<T> {
    (0..n).map(|i| T::read_le(&buf[i * T::SIZE..(i + 1) * T::SIZE])).collect()
}

fn encode<T: ReduceElem>(elems: &[T]) -> Vec<u8> {
    let mut buf = vec![0u8; elems.len() * T::SIZE];
    for (i, e) in elems.iter().enumerate() {
        e.write_le(&mut buf[i * T::SIZE..(i + 1) * T::SIZE]);
    }
    buf
}

fn get_elems<T: ReduceElem, R: Rma>(rma: &R, addr: SymAddr, pe: Pe, n: usize) -> Result<Vec<T>> {
    let mut buf = vec![0u8; n * T::SIZE];
    rma.get(&mut buf, addr, pe)?;
    Ok(decode(&buf, n))
}

fn put_elems<T: ReduceElem, R: Rma>(rma: &R, addr: SymAddr, pe: Pe, elems: &[T]) -> Result<()> {
    rma.put(addr, &encode(elems), pe)
}

/// `region`'s pWrk buffer must be split into `slices` mutually disjoint
/// byte ranges (one per concurrently-live round/phase of the calling
/// algorithm — see [`ScratchRegion::sub_pwrk`]), so the capacity actually
/// available to any one round is the full pWrk budget divided by `slices`,
/// not the whole budget.
fn check_wrk_capacity(n: usize, elem_size: usize, slices: usize) -> Result<()> {
    let per_slice = (crate::sync::REDUCE_MIN_WRKDATA_SIZE * 8) / slices.max(1);
    if n * elem_size > per_slice {
        return Err(ShcollError::PreconditionViolation(format!(
            "reduce of {n} elements needs {} disjoint pWrk rounds and exceeds the resulting per-round capacity; split into chunks of at most {} elements",
            slices.max(1),
            per_slice / elem_size.max(1)
        )));
    }
    Ok(())
}

/// One-sided pairwise exchange of a block of `T` with `peer_pe`, through
/// the region's pWrk slot: put our block, fence (a fence must separate a
/// data put from the signal that follows it to the same target), then
/// signal; the peer does the same toward us, so we wait
/// on our own pSync slot and then read our own pWrk (which the peer wrote
/// into). Callers are responsible for handing this a `region` whose pWrk
/// base is already offset (via [`ScratchRegion::sub_pwrk`]) to a slice
/// disjoint from every other round/phase that might still be in flight;
/// this function itself always targets `region.pwrk_base` unconditionally.
fn exchange_block<T: ReduceElem, R: Rma>(
    rma: &R,
    region: ScratchRegion,
    round_slot: usize,
    round_tag: i64,
    peer_pe: Pe,
    outgoing: &[T],
) -> Result<Vec<T>> {
    let n = outgoing.len();
    put_elems(rma, region.pwrk_base, peer_pe, outgoing)?;
    rma.fence(Some(peer_pe))?;
    region.slot(round_slot).signal(rma, peer_pe, round_tag)?;
    region.slot(round_slot).wait_eq(rma, round_tag)?;
    let incoming = get_elems::<T, _>(rma, region.pwrk_base, rma.my_pe(), n)?;
    region.slot(round_slot).reset(rma)?;
    Ok(incoming)
}

/// Linear reduction: team rank 0 gets every member's `src`, folds locally,
/// then broadcasts the result.
pub fn linear<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
) -> Result<()> {
    let rank = my_rank(rma, team)?;
    let bcast_region = region.sub(32);

    if rank == 0 {
        let mut acc = get_elems::<T, _>(rma, src, rma.my_pe(), n)?;
        for other in 1..team.size {
            let contribution = get_elems::<T, _>(rma, src, world_pe(team, other), n)?;
            for i in 0..n {
                acc[i] = op(acc[i], contribution[i]);
            }
        }
        put_elems(rma, dest, rma.my_pe(), &acc)?;
    }
    crate::broadcast::binomial_tree(rma, team, bcast_region, 0, dest, n * T::SIZE)
}

/// Binomial-tree reduction: bitmask fan-in to team rank 0, then a
/// binomial-tree broadcast of the result.
pub fn binomial<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
) -> Result<()> {
    let size = team.size;
    let levels = if size <= 1 { 0 } else { (usize::BITS - (size - 1).leading_zeros()) as usize };
    check_wrk_capacity(n, T::SIZE, levels)?;
    let slice_bytes = (crate::sync::REDUCE_MIN_WRKDATA_SIZE * 8) / levels.max(1);
    let rank = my_rank(rma, team)?;
    let fanin_region = region.sub(0);
    let bcast_region = region.sub(32);

    let mut acc = get_elems::<T, _>(rma, src, rma.my_pe(), n)?;
    let mut mask = 1usize;
    while mask < size {
        let level = mask.trailing_zeros() as usize;
        // Every level targets the same receiving PE's fanin_region, so
        // each needs its own slice: otherwise a deeper level's sender,
        // having already finished its own shallower levels, can write in
        // before this PE has consumed an earlier level's payload.
        let level_pwrk = fanin_region.sub_pwrk(level * slice_bytes);
        if rank & mask == 0 {
            let peer_rank = rank | mask;
            if peer_rank < size {
                fanin_region.slot(level).wait_eq(rma, 1)?;
                let incoming = get_elems::<T, _>(rma, level_pwrk.pwrk_base, rma.my_pe(), n)?;
                for i in 0..n {
                    acc[i] = op(acc[i], incoming[i]);
                }
                fanin_region.slot(level).reset(rma)?;
            }
            mask <<= 1;
        } else {
            let target_rank = rank & !mask;
            let target_pe = world_pe(team, target_rank);
            put_elems(rma, level_pwrk.pwrk_base, target_pe, &acc)?;
            rma.fence(Some(target_pe))?;
            fanin_region.slot(level).signal(rma, target_pe, 1)?;
            break;
        }
    }

    if rank == 0 {
        put_elems(rma, dest, rma.my_pe(), &acc)?;
    }
    crate::broadcast::binomial_tree(rma, team, bcast_region, 0, dest, n * T::SIZE)
}

fn largest_pow2_leq(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

fn log2_exact(n: usize) -> usize {
    debug_assert!(n.is_power_of_two());
    n.trailing_zeros() as usize
}

/// Off-subset donation used by recursive-doubling-family algorithms: a PE
/// outside the power-of-two subset sends its contribution to its matching
/// subset neighbor and later receives the final result from it; the
/// subset neighbor folds the donation into its own working value before
/// the main algorithm begins.
fn donate_if_outside_subset<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    rank: usize,
    p2s: usize,
    n: usize,
    acc: &mut Vec<T>,
    op: &impl Fn(T, T) -> T,
) -> Result<bool> {
    let extra = team.size - p2s;
    if rank >= p2s {
        // outside the subset: donate to neighbor `rank - p2s`.
        let neighbor_rank = rank - p2s;
        let neighbor_pe = world_pe(team, neighbor_rank);
        put_elems(rma, region.pwrk_base, neighbor_pe, acc)?;
        rma.fence(Some(neighbor_pe))?;
        region.slot(0).signal(rma, neighbor_pe, 1)?;
        return Ok(true); // this PE donated; caller should skip the main rounds
    }
    if rank < extra {
        // inside the subset, and has a donor waiting on slot 0.
        region.slot(0).wait_eq(rma, 1)?;
        let donation = get_elems::<T, _>(rma, region.pwrk_base, rma.my_pe(), n)?;
        for i in 0..n {
            acc[i] = op(acc[i], donation[i]);
        }
        region.slot(0).reset(rma)?;
    }
    Ok(false)
}

/// Deliver the final result back to a PE that donated outside the subset.
/// `slice_bytes` must be the same value the caller used to size every
/// other pWrk slice this call carves out of `region`: the return handshake
/// shares `region`'s pWrk buffer with the donation handshake
/// ([`donate_if_outside_subset`], slice 0) and the main algorithm's rounds,
/// so it gets slice 1 to stay disjoint from both.
fn return_to_donor<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    rank: usize,
    p2s: usize,
    final_value: &[T],
    slice_bytes: usize,
) -> Result<()> {
    let return_pwrk = region.sub_pwrk(slice_bytes);
    let extra = team.size - p2s;
    if rank < extra {
        let donor_rank = rank + p2s;
        let donor_pe = world_pe(team, donor_rank);
        put_elems(rma, return_pwrk.pwrk_base, donor_pe, final_value)?;
        rma.fence(Some(donor_pe))?;
        region.slot(1).signal(rma, donor_pe, 1)?;
    }
    Ok(())
}

fn absorb_final_if_donor<T: ReduceElem, R: Rma>(
    rma: &R,
    region: ScratchRegion,
    n: usize,
    slice_bytes: usize,
) -> Result<Vec<T>> {
    let return_pwrk = region.sub_pwrk(slice_bytes);
    region.slot(1).wait_eq(rma, 1)?;
    let result = get_elems::<T, _>(rma, return_pwrk.pwrk_base, rma.my_pe(), n)?;
    region.slot(1).reset(rma)?;
    Ok(result)
}

/// Recursive-doubling reduction: requires no particular team size; PEs
/// outside the largest power-of-two subset donate/absorb around a
/// recursive-doubling exchange run inside the subset.
pub fn rec_dbl<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
) -> Result<()> {
    let rank = my_rank(rma, team)?;
    let p2s = largest_pow2_leq(team.size);
    let rounds = if p2s == 0 { 0 } else { log2_exact(p2s) };
    // Slices 0 and 1 are the donation and return handshakes; each round
    // after that gets its own, since every round targets the same peer
    // pairing's receive buffer and a faster peer can be a round ahead.
    let total_slices = rounds + 2;
    check_wrk_capacity(n, T::SIZE, total_slices)?;
    let slice_bytes = (crate::sync::REDUCE_MIN_WRKDATA_SIZE * 8) / total_slices;
    let donate_region = region.sub(0);
    let round_region = region.sub(32);

    let mut acc = get_elems::<T, _>(rma, src, rma.my_pe(), n)?;

    let donated = donate_if_outside_subset(rma, team, donate_region, rank, p2s, n, &mut acc, &op)?;

    if !donated {
        for r in 0..rounds {
            let peer_rank = rank ^ (1 << r);
            let peer_pe = world_pe(team, peer_rank);
            let round_pwrk = round_region.sub_pwrk((2 + r) * slice_bytes);
            let incoming = exchange_block(rma, round_pwrk, r, (r + 1) as i64, peer_pe, &acc)?;
            for i in 0..n {
                acc[i] = op(acc[i], incoming[i]);
            }
        }
        return_to_donor(rma, team, donate_region, rank, p2s, &acc, slice_bytes)?;
        put_elems(rma, dest, rma.my_pe(), &acc)?;
    } else {
        let result = absorb_final_if_donor::<T, _>(rma, donate_region, n, slice_bytes)?;
        put_elems(rma, dest, rma.my_pe(), &result)?;
    }
    Ok(())
}

/// Rabenseifner's algorithm: recursive-halving reduce-scatter over the
/// power-of-2 subset, then recursive-doubling collect. Optimal for large
/// vectors (bandwidth term halves every round instead of staying
/// constant, unlike `binomial`).
pub fn rabenseifner<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
) -> Result<()> {
    rabenseifner_inner(rma, team, region, dest, src, n, op, CollectStyle::RecursiveDoubling)
}

/// Identical reduce-scatter to [`rabenseifner`]; the collect phase uses a
/// pipelined ring instead, trading latency for bandwidth when that is the
/// dominant cost.
pub fn rabenseifner_ring<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
) -> Result<()> {
    rabenseifner_inner(rma, team, region, dest, src, n, op, CollectStyle::Ring)
}

enum CollectStyle {
    RecursiveDoubling,
    Ring,
}

fn rabenseifner_inner<T: ReduceElem, R: Rma>(
    rma: &R,
    team: &Team,
    region: ScratchRegion,
    dest: SymAddr,
    src: SymAddr,
    n: usize,
    op: impl Fn(T, T) -> T,
    style: CollectStyle,
) -> Result<()> {
    let rank = my_rank(rma, team)?;
    let p2s = largest_pow2_leq(team.size);
    if n % p2s != 0 {
        return Err(ShcollError::PreconditionViolation(format!(
            "rabenseifner requires nelems ({n}) divisible by the power-of-2 subset size ({p2s})"
        )));
    }
    let rounds = log2_exact(p2s);
    // Slices 0/1: donate/return handshakes. Slices [2, 2+rounds): phase-1
    // reduce-scatter rounds. The rest: phase-2 collect rounds/steps. All
    // must stay disjoint — every round/phase targets the same peer's
    // receive buffer, and a faster peer can be one or more rounds ahead.
    let phase2_slices = match style {
        CollectStyle::RecursiveDoubling => rounds.max(1),
        CollectStyle::Ring => p2s.saturating_sub(1).min(32).max(1),
    };
    let total_slices = 2 + rounds + phase2_slices;
    check_wrk_capacity(n, T::SIZE, total_slices)?;
    let slice_bytes = (crate::sync::REDUCE_MIN_WRKDATA_SIZE * 8) / total_slices;
    let donate_region = region.sub(0);
    let round_region = region.sub(32);

    let mut acc = get_elems::<T, _>(rma, src, rma.my_pe(), n)?;
    let donated = donate_if_outside_subset(rma, team, donate_region, rank, p2s, n, &mut acc, &op)?;

    if donated {
        let result = absorb_final_if_donor::<T, _>(rma, donate_region, n, slice_bytes)?;
        put_elems(rma, dest, rma.my_pe(), &result)?;
        return Ok(());
    }

    // Phase 1: recursive-halving reduce-scatter within the subset.
    let mut offset = 0usize;
    let mut len = n;
    for r in 0..rounds {
        let distance = p2s >> (r + 1);
        let half = len / 2;
        let (keep_start, send_start) = if rank & distance == 0 {
            (offset, offset + half)
        } else {
            (offset + half, offset)
        };
        let peer_rank = rank ^ distance;
        let peer_pe = world_pe(team, peer_rank);
        let outgoing = &acc[send_start..send_start + half];
        let round_pwrk = round_region.sub_pwrk((2 + r) * slice_bytes);
        let incoming = exchange_block(rma, round_pwrk, r, (r + 1) as i64, peer_pe, outgoing)?;
        let keep_slice = &acc[keep_start..keep_start + half].to_vec();
        let mut merged = vec![T::default(); half];
        for i in 0..half {
            merged[i] = op(keep_slice[i], incoming[i]);
        }
        acc[keep_start..keep_start + half].copy_from_slice(&merged);
        offset = keep_start;
        len = half;
    }
    // `acc[offset..offset+len]` now holds this PE's reduced block; its
    // global position is `rank * (n / p2s)` (the halving above always
    // selects on the rank's bits from most to least significant, so the
    // final block boundary equals the natural block assignment).
    let base_unit = n / p2s;
    debug_assert_eq!(offset, rank * base_unit);
    debug_assert_eq!(len, base_unit);
    let my_block = acc[offset..offset + len].to_vec();

    // Phase 2: collect (allgather) the p2s reduced blocks.
    let mut full = vec![T::default(); n];
    full[offset..offset + len].copy_from_slice(&my_block);

    match style {
        CollectStyle::RecursiveDoubling => {
            let mut cur_offset = offset;
            let mut cur_len = len;
            for r in 0..rounds {
                let distance = 1usize << r;
                let peer_rank = rank ^ distance;
                let peer_pe = world_pe(team, peer_rank);
                // My current block is either the lower or upper half of the
                // merged range; the incoming block always belongs in the
                // other half.
                let (merged_offset, peer_offset) = if rank & distance == 0 {
                    (cur_offset, cur_offset + cur_len)
                } else {
                    (cur_offset - cur_len, cur_offset - cur_len)
                };
                let outgoing = full[cur_offset..cur_offset + cur_len].to_vec();
                // disjoint pSync from phase-1 rounds, and disjoint pWrk from
                // both phase-1 and the donate/return handshakes.
                let incoming_slot = round_region.sub(rounds).sub_pwrk((2 + rounds + r) * slice_bytes);
                let incoming = exchange_block(
                    rma,
                    incoming_slot,
                    r,
                    (r + 1) as i64,
                    peer_pe,
                    &outgoing,
                )?;
                full[peer_offset..peer_offset + cur_len].copy_from_slice(&incoming);
                cur_offset = merged_offset;
                cur_len *= 2;
            }
        }
        CollectStyle::Ring => {
            let mut segments: Vec<Option<Vec<T>>> = vec![None; p2s];
            segments[rank] = Some(my_block);
            let mut current_owner = rank;
            let ring_region = round_region.sub(rounds);
            for step in 0..p2s.saturating_sub(1) {
                let send_to_rank = (rank + 1) % p2s;
                let recv_from_owner = (current_owner + p2s - 1) % p2s;
                let send_to_pe = world_pe(team, send_to_rank);
                let outgoing = segments[current_owner].clone().expect("segment present");
                let step_slot = step % phase2_slices;
                let step_pwrk = ring_region.sub_pwrk((2 + rounds + step_slot) * slice_bytes);
                let incoming = exchange_block(
                    rma,
                    step_pwrk,
                    step_slot,
                    (step + 1) as i64,
                    send_to_pe,
                    &outgoing,
                )?;
                segments[recv_from_owner] = Some(incoming);
                current_owner = recv_from_owner;
            }
            for (block_idx, segment) in segments.into_iter().enumerate() {
                let segment = segment.expect("every block received by the end of the ring");
                full[block_idx * base_unit..(block_idx + 1) * base_unit].copy_from_slice(&segment);
            }
        }
    }

    return_to_donor(rma, team, donate_region, rank, p2s, &full, slice_bytes)?;
    put_elems(rma, dest, rma.my_pe(), &full)
}
