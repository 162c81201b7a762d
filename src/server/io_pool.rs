//! Dedicated I/O runtimes.
//!
//! The pool is the "default" loop - the tokio runtime the caller started the
//! application controller from - plus a fixed set of dedicated
//! single-threaded runtimes, each on its own OS thread and (best effort)
//! pinned to its own CPU core. A connection is spawned onto exactly one
//! worker and stays there for its whole lifetime: there is no cross-worker
//! migration once accepted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::runtime::Handle;

struct Worker {
    handle: Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// A started set of dedicated I/O runtimes plus the default loop.
pub(crate) struct IoPool {
    default: Handle,
    workers: Vec<Worker>,
    next: AtomicUsize,
    running: AtomicBool,
}

impl IoPool {
    /// Starts `worker_count` dedicated runtimes (clamped to at least 1),
    /// capturing `Handle::current()` as the default loop. Must be called
    /// from within a running tokio runtime.
    pub(crate) fn start(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let workers = (0..worker_count).map(spawn_worker).collect();

        Self {
            default: Handle::current(),
            workers,
            next: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        }
    }

    /// The loop the pool was started from - used for the acceptor's own task
    /// and the shutdown signal watcher, both of which must outlive any
    /// single dedicated worker.
    pub(crate) fn default_io(&self) -> &Handle {
        &self.default
    }

    /// The next dedicated worker, chosen round-robin.
    pub(crate) fn next_io(&self) -> &Handle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[index].handle
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Idempotent. Signals every dedicated runtime to shut down and joins
    /// its thread, except the calling thread's own (a thread can't join
    /// itself) - calling `stop` from inside one of the pool's own workers
    /// still lets that worker's runtime wind down once its shutdown signal
    /// is observed, it just isn't waited on here.
    pub(crate) fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let current = std::thread::current().id();

        for worker in &mut self.workers {
            if let Some(tx) = worker.shutdown.take() {
                let _ = tx.send(());
            }
            if let Some(thread) = worker.thread.take() {
                if thread.thread().id() != current {
                    let _ = thread.join();
                }
            }
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(index: usize) -> Worker {
    let (handle_tx, handle_rx) = std::sync::mpsc::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(format!("forge_web-io-{index}"))
        .spawn(move || {
            pin_to_cpu(index);

            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(error) => {
                    tracing::error!(%error, worker = index, "failed to build dedicated I/O runtime");
                    return;
                }
            };

            if handle_tx.send(runtime.handle().clone()).is_err() {
                return;
            }

            runtime.block_on(async {
                let _ = shutdown_rx.await;
            });
        })
        .expect("failed to spawn dedicated I/O thread");

    let handle = handle_rx
        .recv()
        .expect("dedicated I/O runtime failed to start");

    Worker {
        handle,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(index: usize) {
    // Best effort: a failure here (e.g. a restrictive cgroup) just means the
    // worker's thread stays unpinned, not a reason to fail startup.
    unsafe {
        let available = libc::sysconf(libc::_SC_NPROCESSORS_ONLN).max(1) as usize;
        let cpu = index % available;

        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_index: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_io_round_robins_across_workers() {
        let pool = IoPool::start(3);
        assert_eq!(pool.worker_count(), 3);

        let first = format!("{:?}", pool.next_io().id());
        let second = format!("{:?}", pool.next_io().id());
        let third = format!("{:?}", pool.next_io().id());
        let fourth = format!("{:?}", pool.next_io().id());

        assert_eq!(first, fourth);
        assert_ne!(first, second);
        assert_ne!(second, third);
    }

    #[tokio::test]
    async fn a_dedicated_worker_can_run_a_task() {
        let pool = IoPool::start(1);
        let result = pool
            .next_io()
            .spawn(async { 1 + 1 })
            .await
            .expect("worker task should complete");
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut pool = IoPool::start(2);
        pool.stop();
        pool.stop();
    }

    #[tokio::test]
    async fn worker_count_is_clamped_to_at_least_one() {
        let pool = IoPool::start(0);
        assert_eq!(pool.worker_count(), 1);
    }
}
