//! Bounded parallel evaluation with cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Run `work(i)` for every `i` in `0..pieces` on up to `parallelism`
/// scoped threads. Workers stop picking up new pieces once `cancel` is
/// set; pieces already running finish.
pub fn parallelize_until<F>(parallelism: usize, pieces: usize, cancel: &AtomicBool, work: F)
where
    F: Fn(usize) + Sync,
{
    if pieces == 0 {
        return;
    }
    let workers = parallelism.clamp(1, pieces);
    let next = AtomicUsize::new(0);
    let work = &work;
    let next = &next;

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(move || {
                while !cancel.load(Ordering::Acquire) {
                    let piece = next.fetch_add(1, Ordering::Relaxed);
                    if piece >= pieces {
                        break;
                    }
                    work(piece);
                }
            });
        }
    });
}

/// Run a blocking pass from async code. On a multi-threaded runtime the
/// current worker hands its other tasks off first; elsewhere `f` runs
/// inline.
pub fn run_blocking<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
