use crate::analysis;
use crate::task::{AnalysisOutput, AnalysisResult, TaskPayload, WorkerTask};
use crate::{Result, WorkerPoolError};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};

/// How long `health_check` waits for each idle worker to answer a ping.
const PING_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Zero puts the pool in permanent fallback
    /// mode: every submit executes in-process and is tagged degraded.
    pub max_workers: usize,
    /// Hard per-task deadline enforced pool-side.
    pub task_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .clamp(1, 4),
            task_timeout: Duration::from_secs(30),
        }
    }
}

/// Rolling counters exposed by [`WorkerPool::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub fallback: u64,
    pub avg_latency_ms: f32,
}

/// Result of [`WorkerPool::health_check`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthReport {
    pub configured: usize,
    pub alive: usize,
    pub busy: usize,
    pub responsive: usize,
    pub fallback_mode: bool,
}

struct Job {
    task: WorkerTask,
    reply: oneshot::Sender<std::result::Result<AnalysisResult, String>>,
}

struct WorkerHandle {
    id: u64,
    sender: mpsc::Sender<Job>,
    busy: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

fn spawn_worker(id: u64) -> std::io::Result<WorkerHandle> {
    let (sender, receiver) = mpsc::channel::<Job>();
    let busy = Arc::new(AtomicBool::new(false));
    let alive = Arc::new(AtomicBool::new(true));

    let busy_in_thread = busy.clone();
    let alive_in_thread = alive.clone();
    let join = thread::Builder::new()
        .name(format!("expander-worker-{id}"))
        .spawn(move || {
            while let Ok(job) = receiver.recv() {
                let result = if Instant::now() >= job.task.deadline {
                    Err(format!("task {} already past deadline", job.task.task_id))
                } else {
                    match catch_unwind(AssertUnwindSafe(|| analysis::compute(&job.task.payload))) {
                        Ok(AnalysisResult::Unsupported { kind }) => {
                            Err(format!("unsupported task kind: {kind}"))
                        }
                        Ok(result) => Ok(result),
                        Err(_) => Err("analysis panicked".to_string()),
                    }
                };
                // Caller may have timed out and dropped the receiver.
                let _ = job.reply.send(result);
                busy_in_thread.store(false, Ordering::SeqCst);
            }
            alive_in_thread.store(false, Ordering::SeqCst);
        })?;

    Ok(WorkerHandle {
        id,
        sender,
        busy,
        alive,
        join: Some(join),
    })
}

struct StatsInner {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    fallback: AtomicU64,
    latency_micros: AtomicU64,
}

impl StatsInner {
    const fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            fallback: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }
}

/// Fixed-size pool of isolated worker threads with message-passing dispatch,
/// per-task deadlines, crash replacement, and a synchronous fallback path.
pub struct WorkerPool {
    workers: Mutex<Vec<WorkerHandle>>,
    semaphore: Arc<Semaphore>,
    config: WorkerPoolConfig,
    next_task_id: AtomicU64,
    next_worker_id: AtomicU64,
    destroyed: AtomicBool,
    stats: StatsInner,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: WorkerPoolConfig) -> Self {
        let mut workers = Vec::with_capacity(config.max_workers);
        for _ in 0..config.max_workers {
            let id = workers.len() as u64;
            match spawn_worker(id) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Degrade instead of failing construction; submits fall
                    // back in-process when no worker is available.
                    log::warn!("failed to spawn worker {id}: {err}");
                }
            }
        }
        let spawned = workers.len();
        if spawned < config.max_workers {
            log::warn!(
                "worker pool degraded: {spawned}/{} workers running",
                config.max_workers
            );
        }

        Self {
            workers: Mutex::new(workers),
            // At least one permit so submits still flow through the
            // fallback path when nothing spawned.
            semaphore: Arc::new(Semaphore::new(spawned.max(1))),
            config,
            next_task_id: AtomicU64::new(0),
            next_worker_id: AtomicU64::new(spawned as u64),
            destroyed: AtomicBool::new(false),
            stats: StatsInner::new(),
        }
    }

    /// Execute one analysis task, preferring an isolated worker and falling
    /// back to an in-process run tagged `fallback: true` whenever the pool
    /// cannot serve it. Only deadline expiry and destruction surface as
    /// errors.
    pub async fn submit(&self, payload: TaskPayload) -> Result<AnalysisOutput> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if self.destroyed.load(Ordering::SeqCst) {
            return Err(WorkerPoolError::Destroyed);
        }
        if self.config.max_workers == 0 {
            return Ok(self.run_fallback(task_id, &payload, start));
        }

        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return Err(WorkerPoolError::Destroyed);
        };
        let _permit = permit;

        let Some((worker_id, sender)) = self.checkout_worker() else {
            // Every worker is dead or wedged past its deadline.
            return Ok(self.run_fallback(task_id, &payload, start));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let task = WorkerTask {
            task_id,
            payload: payload.clone(),
            deadline: start + self.config.task_timeout,
        };
        if sender.send(Job { task, reply: reply_tx }).is_err() {
            self.replace_worker(worker_id);
            return Ok(self.run_fallback(task_id, &payload, start));
        }

        match tokio::time::timeout(self.config.task_timeout, reply_rx).await {
            Ok(Ok(Ok(result))) => {
                let duration = start.elapsed();
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.stats.latency_micros.fetch_add(
                    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );
                Ok(AnalysisOutput {
                    task_id,
                    result,
                    fallback: false,
                    duration,
                })
            }
            Ok(Ok(Err(message))) => {
                // Worker stayed alive but could not serve the task (unknown
                // kind, panic inside the analysis). Resolve via fallback.
                log::warn!("worker task {task_id} failed: {message}");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Ok(self.run_fallback(task_id, &payload, start))
            }
            Ok(Err(_)) => {
                // Reply channel dropped without an answer: the worker thread
                // died mid-task. Replace it; no automatic resubmission.
                log::warn!("worker {worker_id} crashed during task {task_id}");
                self.replace_worker(worker_id);
                if self.destroyed.load(Ordering::SeqCst) {
                    Err(WorkerPoolError::Destroyed)
                } else {
                    Ok(self.run_fallback(task_id, &payload, start))
                }
            }
            Err(_) => {
                // Deadline expired. The thread cannot be killed; it clears
                // its own busy flag when it eventually finishes and rejoins
                // the idle set on its own.
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                Err(WorkerPoolError::TaskTimeout { task_id })
            }
        }
    }

    // --- typed surface -----------------------------------------------------

    pub async fn analyze_structure(&self, content: impl Into<String>) -> Result<AnalysisOutput> {
        self.submit(TaskPayload::AnalyzeStructure {
            content: content.into(),
        })
        .await
    }

    pub async fn parse_candidates(
        &self,
        content: impl Into<String>,
        patterns: Vec<crate::task::PatternSpec>,
    ) -> Result<AnalysisOutput> {
        self.submit(TaskPayload::ParseCandidates {
            content: content.into(),
            patterns,
        })
        .await
    }

    pub async fn optimize_patterns(
        &self,
        patterns: Vec<crate::task::PatternSpec>,
        perf: Vec<crate::task::PatternPerf>,
    ) -> Result<AnalysisOutput> {
        self.submit(TaskPayload::OptimizePatterns { patterns, perf })
            .await
    }

    // --- introspection -----------------------------------------------------

    #[must_use]
    pub fn get_stats(&self) -> WorkerStats {
        let completed = self.stats.completed.load(Ordering::Relaxed);
        let latency_micros = self.stats.latency_micros.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if completed == 0 {
            0.0
        } else {
            (latency_micros as f32 / completed as f32) / 1000.0
        };
        WorkerStats {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed,
            failed: self.stats.failed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            fallback: self.stats.fallback.load(Ordering::Relaxed),
            avg_latency_ms,
        }
    }

    /// Ping idle workers and report liveness counts.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            configured: self.config.max_workers,
            alive: 0,
            busy: 0,
            responsive: 0,
            fallback_mode: self.config.max_workers == 0 || self.destroyed.load(Ordering::SeqCst),
        };

        let probes: Vec<(bool, mpsc::Sender<Job>)> = {
            let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers
                .iter()
                .filter(|w| w.alive.load(Ordering::SeqCst))
                .map(|w| (w.busy.load(Ordering::SeqCst), w.sender.clone()))
                .collect()
        };

        for (busy, sender) in probes {
            report.alive += 1;
            if busy {
                report.busy += 1;
                continue;
            }
            let (reply_tx, reply_rx) = oneshot::channel();
            let task = WorkerTask {
                task_id: self.next_task_id.fetch_add(1, Ordering::Relaxed),
                payload: TaskPayload::Ping,
                deadline: Instant::now() + PING_TIMEOUT,
            };
            if sender.send(Job { task, reply: reply_tx }).is_err() {
                continue;
            }
            if matches!(
                tokio::time::timeout(PING_TIMEOUT, reply_rx).await,
                Ok(Ok(Ok(AnalysisResult::Pong)))
            ) {
                report.responsive += 1;
            }
        }

        report
    }

    /// Terminate all workers. In-flight submits resolve with `Destroyed`;
    /// later submits are rejected outright.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();

        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };

        // Dropping the senders ends each worker loop; join off the async
        // runtime since a wedged worker can take up to one task deadline.
        let joined = tokio::task::spawn_blocking(move || {
            for mut handle in handles {
                drop(handle.sender);
                if let Some(join) = handle.join.take() {
                    if join.join().is_err() {
                        log::warn!("worker {} exited via panic", handle.id);
                    }
                }
            }
        })
        .await;
        if joined.is_err() {
            log::warn!("worker pool teardown task failed");
        }
    }

    // --- internals ---------------------------------------------------------

    fn run_fallback(&self, task_id: u64, payload: &TaskPayload, start: Instant) -> AnalysisOutput {
        self.stats.fallback.fetch_add(1, Ordering::Relaxed);
        let result = analysis::compute(payload);
        AnalysisOutput {
            task_id,
            result,
            fallback: true,
            duration: start.elapsed(),
        }
    }

    /// Pick an idle live worker and mark it busy. Dead workers found along
    /// the way are replaced in place.
    fn checkout_worker(&self) -> Option<(u64, mpsc::Sender<Job>)> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for slot in workers.iter_mut() {
            if !slot.alive.load(Ordering::SeqCst) {
                let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
                match spawn_worker(id) {
                    Ok(fresh) => *slot = fresh,
                    Err(err) => {
                        log::warn!("failed to respawn worker {id}: {err}");
                        continue;
                    }
                }
            }
            if slot
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some((slot.id, slot.sender.clone()));
            }
        }
        None
    }

    fn replace_worker(&self, worker_id: u64) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = workers.iter_mut().find(|w| w.id == worker_id) else {
            return;
        };
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        match spawn_worker(id) {
            Ok(fresh) => {
                log::info!("replaced worker {worker_id} with worker {id}");
                *slot = fresh;
            }
            Err(err) => log::warn!("failed to replace worker {worker_id}: {err}"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Senders drop with the handles; threads wind down on their own.
        self.destroyed.store(true, Ordering::SeqCst);
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_bounded() {
        let config = WorkerPoolConfig::default();
        assert!(config.max_workers >= 1 && config.max_workers <= 4);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn stats_start_at_zero() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: 0,
            task_timeout: Duration::from_secs(1),
        });
        assert_eq!(pool.get_stats(), WorkerStats::default());
    }
}
