//! Data-parallel map over independent work items (grid cells, groups).
//!
//! With the `threading` feature the map runs on the current rayon pool;
//! without it, sequentially. Output order always matches input order, and
//! collecting the results is the join point between stages.

#[cfg(feature = "threading")]
use rayon::prelude::*;

#[cfg(feature = "threading")]
pub fn map_indexed<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync + Send,
{
    items.par_iter().enumerate().map(|(i, t)| f(i, t)).collect()
}

#[cfg(not(feature = "threading"))]
pub fn map_indexed<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    F: Fn(usize, &T) -> R,
{
    items.iter().enumerate().map(|(i, t)| f(i, t)).collect()
}

/// Run `op` inside a dedicated pool of `workers` threads, or on the global
/// pool when `workers` is `None`.
#[cfg(feature = "threading")]
pub fn with_workers<R: Send>(workers: Option<usize>, op: impl FnOnce() -> R + Send) -> crate::Result<R> {
    match workers {
        None => Ok(op()),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| crate::SettleError::engine(format!("failed to build worker pool: {e}")))?;
            Ok(pool.install(op))
        }
    }
}

#[cfg(not(feature = "threading"))]
pub fn with_workers<R: Send>(_workers: Option<usize>, op: impl FnOnce() -> R + Send) -> crate::Result<R> {
    Ok(op())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order() {
        let items: Vec<u32> = (0..1000).collect();
        let out = map_indexed(&items, |i, v| (i as u32) * 2 + v);
        assert!(out.iter().enumerate().all(|(i, v)| *v == i as u32 * 3));
    }

    #[test]
    fn dedicated_pool_runs_op() {
        let total = with_workers(Some(2), || map_indexed(&[1u64, 2, 3], |_, v| v * v).iter().sum::<u64>()).unwrap();
        assert_eq!(total, 14);
    }
}
