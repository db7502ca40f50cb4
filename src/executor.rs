//! Bounded task execution and the saturation policy.
//!
//! A [`TaskExecutor`] admits work up to `threads` concurrent tasks plus
//! `queues` waiting slots; past that the injected [`RejectionPolicy`]
//! decides the fault raised to the caller. [`AbortPolicyWithReport`] is the
//! default policy: it logs one diagnostic line and fires a rate-limited,
//! detached dump of full-process diagnostics, then rejects regardless.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::{Result, RpcError};
use crate::runtime::DumpGate;
use crate::url::Url;

const THREADS_KEY: &str = "threads";
const QUEUES_KEY: &str = "queues";
const DUMP_DIRECTORY_KEY: &str = "dump.directory";
const DEFAULT_THREADS: u64 = 200;

/// Dump file name prefix; kept stable for external log collectors.
pub const DUMP_FILE_PREFIX: &str = "Dubbo_JStack.log";

/// Executor state snapshot passed to the rejection policy.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pool_size: usize,
    pub active: usize,
    pub core: usize,
    pub max: usize,
    pub largest: usize,
    pub tasks: u64,
    pub completed: u64,
    pub shutdown: bool,
}

/// Decides what happens when the executor refuses a task. Returns the fault
/// raised to the caller; it is always raised, whatever else the policy does.
pub trait RejectionPolicy: Send + Sync {
    fn rejected(&self, stats: &PoolStats) -> RpcError;
}

/// Provider of the full-process diagnostic text written by a dump
/// (stack summaries, pool states); an external capability.
pub trait DiagnosticSource: Send + Sync {
    fn render(&self) -> String;
}

/// Builds executors from url parameters; registered in the runtime's
/// thread-pool registry and resolved adaptively via the `threadpool`
/// parameter.
pub trait ThreadPool: Send + Sync {
    fn executor(&self, url: &Url, rejection: Arc<dyn RejectionPolicy>) -> Arc<TaskExecutor>;
}

/// Fixed-size pool: `threads` concurrent tasks, `queues` waiting slots.
#[derive(Debug, Default)]
pub struct FixedThreadPool;

impl ThreadPool for FixedThreadPool {
    fn executor(&self, url: &Url, rejection: Arc<dyn RejectionPolicy>) -> Arc<TaskExecutor> {
        let threads = url.u64_parameter(THREADS_KEY, DEFAULT_THREADS) as usize;
        let queues = url.u64_parameter(QUEUES_KEY, 0) as usize;
        Arc::new(TaskExecutor::new(threads, queues, rejection))
    }
}

pub struct TaskExecutor {
    threads: usize,
    queues: usize,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    largest: Arc<AtomicUsize>,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
    shut_down: AtomicBool,
    rejection: Arc<dyn RejectionPolicy>,
}

impl TaskExecutor {
    pub fn new(threads: usize, queues: usize, rejection: Arc<dyn RejectionPolicy>) -> Self {
        Self {
            threads,
            queues,
            permits: Arc::new(Semaphore::new(threads + queues)),
            active: Arc::new(AtomicUsize::new(0)),
            largest: Arc::new(AtomicUsize::new(0)),
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            shut_down: AtomicBool::new(false),
            rejection,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.threads + self.queues,
            active: self.active.load(Ordering::Relaxed),
            core: self.threads,
            max: self.threads + self.queues,
            largest: self.largest.load(Ordering::Relaxed),
            tasks: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            shutdown: self.shut_down.load(Ordering::Relaxed),
        }
    }

    /// Admit `task` or consult the rejection policy. The returned fault is
    /// whatever the policy produced, raised to this caller.
    pub fn try_execute<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(self.rejection.rejected(&self.stats()));
        }
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(self.rejection.rejected(&self.stats())),
        };

        self.submitted.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.largest.fetch_max(active, Ordering::Relaxed);

        let active_counter = Arc::clone(&self.active);
        let completed = Arc::clone(&self.completed);
        Ok(tokio::spawn(async move {
            let output = task.await;
            active_counter.fetch_sub(1, Ordering::Relaxed);
            completed.fetch_add(1, Ordering::Relaxed);
            drop(permit);
            output
        }))
    }

    /// Refuse new work from now on; running tasks finish.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

/// Rejection policy that reports before aborting.
///
/// Logs one warning line with the executor state and the bound address,
/// then attempts a diagnostic dump: at most one per gate window, detached
/// from the rejecting call, failures logged and swallowed. The rejection
/// fault reaches the caller in every case.
pub struct AbortPolicyWithReport {
    thread_name: String,
    url: Url,
    gate: Arc<DumpGate>,
    source: Arc<dyn DiagnosticSource>,
}

impl AbortPolicyWithReport {
    pub fn new(
        thread_name: impl Into<String>,
        url: Url,
        gate: Arc<DumpGate>,
        source: Arc<dyn DiagnosticSource>,
    ) -> Self {
        Self {
            thread_name: thread_name.into(),
            url,
            gate,
            source,
        }
    }

    fn dump_diagnostics(&self) {
        // Skip silently when a dump ran recently or is in flight.
        let Some(ticket) = self.gate.try_acquire() else {
            return;
        };

        let directory = self
            .url
            .parameter(DUMP_DIRECTORY_KEY)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let source = Arc::clone(&self.source);

        // Fire and forget: the rejecting caller never waits on the dump.
        tokio::spawn(async move {
            // No ':' in the timestamp, some filesystems refuse it.
            let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
            let path = directory.join(format!("{DUMP_FILE_PREFIX}.{timestamp}"));
            let text = source.render();
            if let Err(err) = tokio::fs::write(&path, text).await {
                error!(path = %path.display(), error = %err, "diagnostic dump failed");
            }
            drop(ticket);
        });
    }
}

impl RejectionPolicy for AbortPolicyWithReport {
    fn rejected(&self, stats: &PoolStats) -> RpcError {
        let message = format!(
            "Thread pool is EXHAUSTED! Thread Name: {}, Pool Size: {} (active: {}, core: {}, max: {}, largest: {}), Task: {} (completed: {}), Executor status:(isShutdown:{}), in {}://{}!",
            self.thread_name,
            stats.pool_size,
            stats.active,
            stats.core,
            stats.max,
            stats.largest,
            stats.tasks,
            stats.completed,
            stats.shutdown,
            self.url.protocol(),
            self.url.address(),
        );
        warn!("{message}");
        self.dump_diagnostics();
        RpcError::rejection(message)
    }
}
