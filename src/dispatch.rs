//! Data-parallel dispatch contract (§5, §9 REDESIGN FLAGS).
//!
//! The teacher's `rcf.rs` hard-codes a `parallel_enabled: bool` branch at
//! every call site (`if self.parallel_enabled { par_iter() } else { iter() }`).
//! This crate replaces the CPU/GPU inheritance pair of the source program
//! with a single algorithm parameterised over this trait: the same component
//! code (4.A–4.G) runs unchanged whether `dispatch` is a work-stealing host
//! pool or, one day, a bulk-synchronous device backend. Only the two
//! concrete impls below differ.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rayon::ThreadPool;

/// A parallel-for over an index range, used by every data-parallel component
/// (pixels in 4.A, keypoints in 4.B, slots in 4.C, attempts in 4.D,
/// candidates in 4.E/4.G).
///
/// `for_each` and `map_sum` are dispatched dynamically (`&dyn Dispatch`) and
/// so may only use trait-object-safe closures. `map_collect` is generic over
/// its output type and therefore carries a `where Self: Sized` bound,
/// excluding it from the vtable; callers that need it take `D: Dispatch`
/// generically instead of `&dyn Dispatch` (see `Forest::evaluate`).
pub trait Dispatch: Send + Sync {
    /// Human-readable name, surfaced in logs.
    fn name(&self) -> &'static str;

    /// Invoke `body(i)` once for every `i` in `0..len`. No ordering guarantee
    /// across invocations (§5): callers must not assume a deterministic
    /// interleaving of side effects on shared arenas.
    fn for_each(&self, len: usize, body: &(dyn Fn(usize) + Sync));

    /// Parallel reduction: sum `body(i)` over `i` in `0..len` using the
    /// atomic accumulator of §5(b). Used by the per-candidate energy
    /// reduction of 4.E.
    fn map_sum(&self, len: usize, body: &(dyn Fn(usize) -> f64 + Sync)) -> f64 {
        let acc = AtomicF64::new(0.0);
        self.for_each(len, &|i| acc.add(body(i)));
        acc.load()
    }

    /// Invoke `body(i)` for every `i` in `0..len` and collect the results in
    /// index order. Used by components that produce one output value per
    /// input (4.A's leaf vectors, 4.B's merged predictions).
    fn map_collect<T: Send>(&self, len: usize, body: &(dyn Fn(usize) -> T + Sync)) -> Vec<T>
    where
        Self: Sized;
}

/// Single-threaded backend. Used for the determinism property in `spec.md`
/// §8: with a fixed seed and a tree-ordered reduction, this backend gives
/// byte-identical poses across runs.
pub struct SequentialDispatch;

impl Dispatch for SequentialDispatch {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn for_each(&self, len: usize, body: &(dyn Fn(usize) + Sync)) {
        for i in 0..len {
            body(i);
        }
    }

    fn map_collect<T: Send>(&self, len: usize, body: &(dyn Fn(usize) -> T + Sync)) -> Vec<T> {
        (0..len).map(body).collect()
    }
}

/// Multi-threaded host backend: a rayon work-stealing pool sized at
/// construction (`config.threadPoolSize`, ambient addition to §6).
pub struct RayonDispatch {
    pool: ThreadPool,
}

impl RayonDispatch {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build rayon thread pool");
        RayonDispatch { pool }
    }
}

impl Dispatch for RayonDispatch {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn for_each(&self, len: usize, body: &(dyn Fn(usize) + Sync)) {
        use rayon::prelude::*;
        self.pool.install(|| (0..len).into_par_iter().for_each(body));
    }

    fn map_collect<T: Send>(&self, len: usize, body: &(dyn Fn(usize) -> T + Sync)) -> Vec<T> {
        use rayon::prelude::*;
        self.pool
            .install(|| (0..len).into_par_iter().map(body).collect())
    }
}

/// Builds the dispatch backend named by `config.threadPoolSize`: `0` selects
/// [`SequentialDispatch`], anything else a [`RayonDispatch`] of that width.
pub fn build_dispatch(thread_pool_size: usize) -> Box<dyn Dispatch> {
    if thread_pool_size == 0 {
        Box::new(SequentialDispatch)
    } else {
        Box::new(RayonDispatch::new(thread_pool_size))
    }
}

/// Atomic append counter (§5(a)): reserves a dense prefix of slots in a
/// pre-sized arena. [`Self::try_reserve`] returns `None` once the arena's
/// capacity is exhausted, matching the "dense prefix of valid candidates"
/// contract of 4.C.
pub struct AtomicSlotCounter {
    next: AtomicUsize,
    capacity: usize,
}

impl AtomicSlotCounter {
    pub fn new(capacity: usize) -> Self {
        AtomicSlotCounter {
            next: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Reserve the next free slot, or `None` if the arena is full.
    pub fn try_reserve(&self) -> Option<usize> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        if idx < self.capacity {
            Some(idx)
        } else {
            None
        }
    }

    /// Number of slots actually populated (clamped to capacity).
    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.capacity)
    }
}

/// Atomic floating-point accumulator (§5(b)) for the per-candidate energy
/// reduction of 4.E. `std` has no `AtomicF64`; the standard workaround is a
/// bit-cast compare-and-swap loop over an `AtomicU64`.
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64 {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                updated,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// A write-once view over a slice that lets independent parallel workers
/// populate disjoint indices through a shared `&self` reference, used by
/// components that must drive the scatter through [`Dispatch::for_each`]
/// (dyn-dispatched) rather than the `Self: Sized`-bounded `map_collect`
/// (4.A's leaf vectors, 4.B's merged predictions).
///
/// # Safety contract
/// The caller must write each index at most once, and must not read any
/// index until every writing `for_each` call has returned. Both are upheld
/// by construction: `Dispatch::for_each` hands out each `i` in `0..len`
/// exactly once, and callers only read `into_inner()` after `for_each`
/// returns.
pub struct ScatterWrite<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: std::marker::PhantomData<&'a mut [T]>,
}

// SAFETY: distinct indices name disjoint memory; `T: Send` makes moving a
// `T` across the thread that produced it to the thread that owns the slice
// sound.
unsafe impl<'a, T: Send> Sync for ScatterWrite<'a, T> {}

impl<'a, T> ScatterWrite<'a, T> {
    pub fn over_uninit(slots: &'a mut [std::mem::MaybeUninit<T>]) -> Self {
        ScatterWrite {
            ptr: slots.as_mut_ptr() as *mut T,
            len: slots.len(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Write `value` into `index`. See the struct-level safety contract.
    pub fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "scatter write out of bounds");
        unsafe { std::ptr::write(self.ptr.add(index), value) };
    }
}

/// Runs `body(i)` for every `i` in `0..len` through [`Dispatch::for_each`]
/// (so it works uniformly across `&dyn Dispatch`) and returns the results in
/// index order, using [`ScatterWrite`] internally.
pub fn par_map_to_vec<T: Send>(
    dispatch: &dyn Dispatch,
    len: usize,
    body: &(dyn Fn(usize) -> T + Sync),
) -> Vec<T> {
    let mut buf: Vec<std::mem::MaybeUninit<T>> =
        (0..len).map(|_| std::mem::MaybeUninit::uninit()).collect();
    {
        let scatter = ScatterWrite::over_uninit(&mut buf);
        dispatch.for_each(len, &|i| scatter.write(i, body(i)));
    }
    // SAFETY: the `for_each` call above writes every index in `0..len`
    // exactly once before this line runs.
    buf.into_iter()
        .map(|slot| unsafe { slot.assume_init() })
        .collect()
}
