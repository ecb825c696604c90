use crate::error::Result;
use core_affinity::{get_core_ids, set_for_current};

/// Build a worker pool for running hyperbolic updates. If `pin_to_cores` is
/// set, worker `n` is pinned to physical core `n` (modulo the number of
/// cores). Stepping code uses the current rayon context, so callers run it
/// inside `pool.install`.
///
pub fn build(num_threads: usize, pin_to_cores: bool) -> Result<rayon::ThreadPool> {
    let core_ids = if pin_to_cores {
        get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|index| format!("hydro-worker-{}", index))
        .start_handler(move |index| {
            if !core_ids.is_empty() {
                set_for_current(core_ids[index % core_ids.len()])
            }
        })
        .build()?;
    Ok(pool)
}
