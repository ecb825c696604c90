use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/**
 * A one-shot event that runs a payload (typically a ghost exchange) as soon
 * as every export-range work unit of a stage has completed, so the
 * communication overlaps with the rest of the stage. If the eager trigger
 * never fires, `finish` runs the payload at the end of the stage. Either way
 * the payload runs exactly once.
 */
pub struct SynchronizationDispatch<F>
where
    F: Fn() -> Result<()> + Sync,
{
    payload: F,
    threshold: usize,
    completed: AtomicUsize,
    executed: AtomicBool,
    error: Mutex<Option<Error>>,
}

// ============================================================================
impl<F> SynchronizationDispatch<F>
where
    F: Fn() -> Result<()> + Sync,
{
    /// Create a dispatch that fires eagerly after `threshold` export units
    /// have checked in. A zero threshold defers the payload to `finish`.
    pub fn new(threshold: usize, payload: F) -> Self {
        Self {
            payload,
            threshold,
            completed: AtomicUsize::new(0),
            executed: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Called by a worker after completing a work unit.
    pub fn check(&self, is_export_unit: bool) {
        if !is_export_unit || self.threshold == 0 {
            return;
        }
        if self.completed.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold {
            self.execute()
        }
    }

    /// Run the payload if it has not run yet, and report its outcome.
    pub fn finish(self) -> Result<()> {
        self.execute();
        match self.error.into_inner() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn execute(&self) {
        if self
            .executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(error) = (self.payload)() {
                *self.error.lock() = Some(error)
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::SynchronizationDispatch;
    use crate::error::Error;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn eager_path_fires_once() {
        let count = AtomicUsize::new(0);
        let dispatch = SynchronizationDispatch::new(10, || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (0..100).into_par_iter().for_each(|k| dispatch.check(k < 10));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        dispatch.finish().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fallback_path_fires_once() {
        let count = AtomicUsize::new(0);
        let dispatch = SynchronizationDispatch::new(0, || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (0..100).into_par_iter().for_each(|_| dispatch.check(true));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        dispatch.finish().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_error_is_reported_by_finish() {
        let dispatch = SynchronizationDispatch::new(1, || Err(Error::NotPrepared));
        dispatch.check(true);
        assert!(matches!(dispatch.finish(), Err(Error::NotPrepared)));
    }
}
