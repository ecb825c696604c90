use crate::error::Result;
use crate::message::comm::Communicator;
use crate::message::exchange::ExchangePlan;
use crate::state::Tensor;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/**
 * An `f64` stored in an atomic cell, so that worker threads can write
 * disjoint entries of a shared vector. All accesses are relaxed; stage
 * boundaries provide the ordering.
 */
#[derive(Default)]
pub struct AtomicF64(AtomicU64);

// ============================================================================
impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }

    /// Replace the stored value by the minimum of it and the given value,
    /// returning the previous value. A NaN argument is ignored.
    pub fn fetch_min(&self, value: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let stored = f64::from_bits(current);
            if value.is_nan() || value >= stored {
                return stored;
            }
            match self.0.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return stored,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for AtomicF64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.load())
    }
}

/**
 * A vector of per-node tensors, stored component-interleaved. Reads and
 * writes go through a shared reference; callers guarantee that each entry
 * has a single writer within a stage.
 */
pub struct MultiComponentVector<T: Tensor> {
    data: Vec<AtomicF64>,
    len: usize,
    phantom: PhantomData<T>,
}

// ============================================================================
impl<T: Tensor> MultiComponentVector<T> {
    pub fn new(len: usize) -> Self {
        Self {
            data: (0..len * T::NUM_FIELDS).map(|_| AtomicF64::default()).collect(),
            len,
            phantom: PhantomData,
        }
    }

    pub fn from_slice(values: &[T]) -> Self {
        let result = Self::new(values.len());
        for (i, value) in values.iter().enumerate() {
            result.set(i, value)
        }
        result
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, i: usize) -> T {
        let mut value = T::default();
        let n = T::NUM_FIELDS;
        for k in 0..n {
            value.set_component(k, self.data[i * n + k].load())
        }
        value
    }

    pub fn set(&self, i: usize, value: &T) {
        let n = T::NUM_FIELDS;
        for k in 0..n {
            self.data[i * n + k].store(value.component(k))
        }
    }

    pub fn fill(&self, value: &T) {
        for i in 0..self.len {
            self.set(i, value)
        }
    }

    pub fn copy_from(&self, other: &Self) {
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            a.store(b.load())
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len).map(|i| self.get(i)).collect()
    }

    /// Overwrite the ghost entries of this vector with the values owned by
    /// the peer ranks.
    pub fn update_ghost_values<C: Communicator>(
        &self,
        comm: &C,
        plan: &ExchangePlan,
        tag: u64,
    ) -> Result<()> {
        plan.exchange(comm, tag, &self.data, T::NUM_FIELDS)
    }
}

impl<T: Tensor> Clone for MultiComponentVector<T> {
    fn clone(&self) -> Self {
        let result = Self::new(self.len);
        result.copy_from(self);
        result
    }
}

impl<T: Tensor + fmt::Debug> fmt::Debug for MultiComponentVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

/**
 * A tensor per stored entry of the connectivity graph, indexed by flat entry
 * number (see `ConnectivityGraph::entry`).
 */
pub struct SparseMatrix<T: Tensor> {
    entries: MultiComponentVector<T>,
}

// ============================================================================
impl<T: Tensor> SparseMatrix<T> {
    pub fn new(n_entries: usize) -> Self {
        Self {
            entries: MultiComponentVector::new(n_entries),
        }
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, entry: usize) -> T {
        self.entries.get(entry)
    }

    pub fn set(&self, entry: usize, value: &T) {
        self.entries.set(entry, value)
    }

    pub fn fill(&self, value: &T) {
        self.entries.fill(value)
    }

    /// Overwrite the locally stored entries of ghost rows with the values
    /// computed by the owning ranks.
    pub fn update_ghost_rows<C: Communicator>(
        &self,
        comm: &C,
        plan: &ExchangePlan,
        tag: u64,
    ) -> Result<()> {
        self.entries.update_ghost_values(comm, plan, tag)
    }
}
