//! Named FIFO task queues.
//!
//! Every queue owns a deque of task wrappers and a single worker. The worker
//! runs the front task, retries it with exponential backoff on failure and
//! only moves on once the task reached a terminal outcome (success,
//! cancellation or an exhausted backoff). Tasks of one queue therefore finish
//! in enqueue order; queues are independent of each other.

mod backoff;
mod waitgroup;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub use backoff::{Backoff, BackoffPolicy};
pub use waitgroup::WaitGroup;

/// A unit of work placed on a queue.
///
/// `execute` may be called several times (once per retry) but never
/// concurrently for the same wrapper.
#[async_trait]
pub trait Task: Send + Sync {
    /// Human-readable label; also the key used by [`EnqueueOptions::unique`].
    fn name(&self) -> String;

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()>;
}

/// Marker error for work that stopped because its context was cancelled.
/// Never retried and never reported as a condition.
#[derive(Debug, Clone, Copy, Error)]
#[error("task cancelled")]
pub struct Cancelled;

/// True when the error chain says the work was cancelled.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<Cancelled>())
}

pub type OnDone = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct EnqueueOptions {
    wait: Option<WaitGroup>,
    unique: bool,
    on_done: Option<OnDone>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the task in `wg` until it reaches a terminal outcome.
    pub fn with_wait(mut self, wg: &WaitGroup) -> Self {
        self.wait = Some(wg.clone());
        self
    }

    /// Drop the task if two or more tasks with the same label are queued.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Called after the task succeeded; never on cancellation.
    pub fn with_on_done(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }
}

struct TaskWrapper {
    id: Uuid,
    label: String,
    ctx: CancellationToken,
    task: Arc<dyn Task>,
    enqueued_at: SystemTime,
    backoff: Backoff,
    next_retry: Option<Instant>,
    attempts: u32,
    wait: Option<WaitGroup>,
    on_done: Option<OnDone>,
    last_error: Option<String>,
}

impl TaskWrapper {
    fn release(&mut self) {
        self.ctx.cancel();
        if let Some(wg) = self.wait.take() {
            wg.done();
        }
    }

    fn finish_cancelled(mut self) {
        self.release();
    }

    fn finish_succeeded(mut self) {
        self.release();
        if let Some(on_done) = self.on_done.take() {
            on_done();
        }
    }
}

/// Snapshot of one task wrapper, used by [`QueueService::dump`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskDump {
    pub index: usize,
    pub name: String,
    pub id: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDump {
    pub name: String,
    pub tasks: Vec<TaskDump>,
}

struct Queue {
    name: String,
    tasks: Mutex<VecDeque<TaskWrapper>>,
    signal: Notify,
    root: CancellationToken,
}

impl Queue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
            root: CancellationToken::new(),
        }
    }

    async fn run(self: Arc<Self>) {
        debug!(queue = %self.name, "queue worker started");
        loop {
            tokio::select! {
                _ = self.root.cancelled() => break,
                _ = self.signal.notified() => {}
            }
            self.drain().await;
        }
        self.cancel_all();
        debug!(queue = %self.name, "queue worker stopped");
    }

    /// Run every ready task from the front of the deque.
    async fn drain(self: &Arc<Self>) {
        loop {
            if self.root.is_cancelled() {
                return;
            }
            let (id, label, ctx, task) = {
                let mut tasks = self.tasks.lock().unwrap();
                let Some(front) = tasks.front() else {
                    return;
                };
                if front.ctx.is_cancelled() {
                    if let Some(wrapper) = tasks.pop_front() {
                        debug!(queue = %self.name, task = %wrapper.label, "dropping cancelled task");
                        wrapper.finish_cancelled();
                    }
                    continue;
                }
                if front.next_retry.is_some_and(|at| Instant::now() < at) {
                    return;
                }
                (
                    front.id,
                    front.label.clone(),
                    front.ctx.clone(),
                    front.task.clone(),
                )
            };

            debug!(queue = %self.name, task = %label, "executing task");
            let result = task.execute(&ctx).await;

            let mut tasks = self.tasks.lock().unwrap();
            // The wrapper is gone if the queue was cleared while it ran.
            let Some(pos) = tasks.iter().position(|w| w.id == id) else {
                continue;
            };
            match result {
                Ok(()) => {
                    if let Some(wrapper) = tasks.remove(pos) {
                        drop(tasks);
                        debug!(queue = %self.name, task = %label, "task done");
                        wrapper.finish_succeeded();
                    }
                }
                Err(err) if ctx.is_cancelled() || is_cancelled(&err) => {
                    if let Some(wrapper) = tasks.remove(pos) {
                        drop(tasks);
                        debug!(queue = %self.name, task = %label, "task cancelled");
                        wrapper.finish_cancelled();
                    }
                }
                Err(err) => {
                    let wrapper = &mut tasks[pos];
                    wrapper.attempts += 1;
                    wrapper.last_error = Some(format!("{err:#}"));
                    match wrapper.backoff.next_delay() {
                        Some(delay) => {
                            wrapper.next_retry = Some(Instant::now() + delay);
                            warn!(
                                queue = %self.name,
                                task = %label,
                                attempt = wrapper.attempts,
                                retry_in = ?delay,
                                error = %format!("{err:#}"),
                                "task failed, will retry"
                            );
                            drop(tasks);
                            self.wake_after(ctx, delay);
                            return;
                        }
                        None => {
                            warn!(
                                queue = %self.name,
                                task = %label,
                                error = %format!("{err:#}"),
                                "task failed, backoff exhausted; giving up"
                            );
                            if let Some(mut wrapper) = tasks.remove(pos) {
                                drop(tasks);
                                wrapper.release();
                            }
                        }
                    }
                }
            }
        }
    }

    /// Signal the worker once `delay` passed, or right away if the task's
    /// context gets cancelled in the meantime.
    fn wake_after(self: &Arc<Self>, ctx: CancellationToken, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.root.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => {}
            }
            queue.signal.notify_one();
        });
    }

    fn cancel_all(&self) {
        let drained: Vec<TaskWrapper> = self.tasks.lock().unwrap().drain(..).collect();
        for wrapper in drained {
            wrapper.finish_cancelled();
        }
    }

    fn dump(&self) -> QueueDump {
        let tasks = self.tasks.lock().unwrap();
        QueueDump {
            name: self.name.clone(),
            tasks: tasks
                .iter()
                .enumerate()
                .map(|(index, w)| TaskDump {
                    index,
                    name: w.label.clone(),
                    id: w.id.to_string(),
                    attempts: w.attempts,
                    last_error: w.last_error.clone(),
                    enqueued_at: w
                        .enqueued_at
                        .duration_since(SystemTime::UNIX_EPOCH)
                        .ok()
                        .map(|d| d.as_secs()),
                })
                .collect(),
        }
    }
}

struct QueueHandle {
    queue: Arc<Queue>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Queues {
    stopped: bool,
    by_name: HashMap<String, QueueHandle>,
}

/// Hosts every named queue of the process.
pub struct QueueService {
    queues: Mutex<Queues>,
    policy: BackoffPolicy,
    stop_timeout: Duration,
}

impl Default for QueueService {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), Duration::from_secs(10))
    }
}

impl QueueService {
    pub fn new(policy: BackoffPolicy, stop_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            policy,
            stop_timeout,
        }
    }

    /// Push `task` onto `queue`, creating the queue on first use.
    ///
    /// Never blocks. The wrapper's context is a child of `ctx`, so cancelling
    /// `ctx` aborts the task whether it is queued or running.
    pub fn enqueue(
        &self,
        ctx: &CancellationToken,
        queue: &str,
        task: Arc<dyn Task>,
        opts: EnqueueOptions,
    ) {
        let label = task.name();
        let mut queues = self.queues.lock().unwrap();
        if queues.stopped {
            debug!(queue, task = %label, "queue service stopped; dropping task");
            return;
        }

        let handle = queues.by_name.entry(queue.to_string()).or_insert_with(|| {
            let queue = Arc::new(Queue::new(queue));
            let worker = tokio::spawn(Arc::clone(&queue).run());
            QueueHandle { queue, worker }
        });

        let mut tasks = handle.queue.tasks.lock().unwrap();
        if opts.unique && tasks.iter().filter(|w| w.label == label).count() >= 2 {
            debug!(queue, task = %label, "duplicate task already queued; dropping");
            return;
        }
        if let Some(wg) = &opts.wait {
            wg.add(1);
        }
        tasks.push_back(TaskWrapper {
            id: Uuid::new_v4(),
            label,
            ctx: ctx.child_token(),
            task,
            enqueued_at: SystemTime::now(),
            backoff: Backoff::new(self.policy),
            next_retry: None,
            attempts: 0,
            wait: opts.wait,
            on_done: opts.on_done,
            last_error: None,
        });
        drop(tasks);
        handle.queue.signal.notify_one();
    }

    /// Cancel every task of `queue` and stop its worker. Does not wait for
    /// the worker, so it is safe to call from a task running on that queue.
    pub fn remove(&self, queue: &str) {
        let handle = self.queues.lock().unwrap().by_name.remove(queue);
        if let Some(handle) = handle {
            debug!(queue, "removing queue");
            handle.queue.cancel_all();
            handle.queue.root.cancel();
        }
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.queues.lock().unwrap().by_name.contains_key(queue)
    }

    /// Number of wrappers currently held by `queue` (including a running one).
    pub fn len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().unwrap();
        queues
            .by_name
            .get(queue)
            .map(|h| h.queue.tasks.lock().unwrap().len())
            .unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap();
        let mut names: Vec<String> = queues.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> Vec<QueueDump> {
        let queues: Vec<Arc<Queue>> = {
            let guard = self.queues.lock().unwrap();
            guard.by_name.values().map(|h| Arc::clone(&h.queue)).collect()
        };
        let mut dumps: Vec<QueueDump> = queues.iter().map(|q| q.dump()).collect();
        dumps.sort_by(|a, b| a.name.cmp(&b.name));
        dumps
    }

    /// YAML view of every queue and its pending tasks.
    pub fn dump(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.snapshot())
    }

    /// Cancel everything and join the workers, abandoning them after the
    /// configured bound.
    pub async fn stop(&self) {
        let handles: Vec<QueueHandle> = {
            let mut queues = self.queues.lock().unwrap();
            queues.stopped = true;
            queues.by_name.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.queue.cancel_all();
            handle.queue.root.cancel();
        }
        let workers = futures::future::join_all(handles.into_iter().map(|h| h.worker));
        if tokio::time::timeout(self.stop_timeout, workers).await.is_err() {
            warn!(
                timeout = ?self.stop_timeout,
                "queue workers did not stop in time; abandoning them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use tokio::sync::mpsc;

    use super::*;

    /// Records its label on every execute; fails the first `failures` calls.
    struct Recorder {
        label: String,
        log: mpsc::UnboundedSender<String>,
        failures: AtomicUsize,
    }

    impl Recorder {
        fn new(label: &str, log: &mpsc::UnboundedSender<String>, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                log: log.clone(),
                failures: AtomicUsize::new(failures),
            })
        }
    }

    #[async_trait]
    impl Task for Recorder {
        fn name(&self) -> String {
            self.label.clone()
        }

        async fn execute(&self, _ctx: &CancellationToken) -> anyhow::Result<()> {
            let _ = self.log.send(self.label.clone());
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(anyhow!("{} failed", self.label));
            }
            Ok(())
        }
    }

    /// Blocks until its context is cancelled.
    struct Blocker;

    #[async_trait]
    impl Task for Blocker {
        fn name(&self) -> String {
            "blocker".into()
        }

        async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
            ctx.cancelled().await;
            Err(Cancelled.into())
        }
    }

    fn fast_service() -> QueueService {
        QueueService::new(
            BackoffPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(40),
                ..BackoffPolicy::default()
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn runs_tasks_in_enqueue_order() {
        let service = fast_service();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        let wg = WaitGroup::new();
        for label in ["a", "b", "c"] {
            service.enqueue(
                &root,
                "q",
                Recorder::new(label, &tx, 0),
                EnqueueOptions::new().with_wait(&wg),
            );
        }
        wg.wait().await;
        let mut seen = Vec::new();
        while let Ok(label) = rx.try_recv() {
            seen.push(label);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failing_task_blocks_queue_until_retry_succeeds() {
        let service = fast_service();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        let wg = WaitGroup::new();
        service.enqueue(
            &root,
            "q",
            Recorder::new("flaky", &tx, 2),
            EnqueueOptions::new().with_wait(&wg),
        );
        service.enqueue(
            &root,
            "q",
            Recorder::new("after", &tx, 0),
            EnqueueOptions::new().with_wait(&wg),
        );
        tokio::time::timeout(Duration::from_secs(2), wg.wait())
            .await
            .expect("tasks must finish");
        let mut seen = Vec::new();
        while let Ok(label) = rx.try_recv() {
            seen.push(label);
        }
        assert_eq!(seen, vec!["flaky", "flaky", "flaky", "after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_for_initial_backoff() {
        let service = QueueService::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        service.enqueue(&root, "q", Recorder::new("t", &tx, 1), EnqueueOptions::new());

        assert_eq!(rx.recv().await.as_deref(), Some("t"));
        let failed_at = Instant::now();
        assert_eq!(rx.recv().await.as_deref(), Some("t"));
        assert!(failed_at.elapsed() >= Duration::from_secs(15));
        assert!(failed_at.elapsed() < Duration::from_secs(16));
    }

    #[tokio::test]
    async fn on_done_fires_only_on_success() {
        let service = fast_service();
        let (tx, _rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let wg = WaitGroup::new();
        let done = done_tx.clone();
        service.enqueue(
            &cancelled,
            "q",
            Recorder::new("skipped", &tx, 0),
            EnqueueOptions::new()
                .with_wait(&wg)
                .with_on_done(move || {
                    let _ = done.send("skipped");
                }),
        );
        service.enqueue(
            &root,
            "q",
            Recorder::new("ok", &tx, 0),
            EnqueueOptions::new()
                .with_wait(&wg)
                .with_on_done(move || {
                    let _ = done_tx.send("ok");
                }),
        );
        wg.wait().await;
        assert_eq!(done_rx.recv().await, Some("ok"));
        assert!(done_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelling_parent_aborts_running_task() {
        let service = fast_service();
        let parent = CancellationToken::new();
        let wg = WaitGroup::new();
        service.enqueue(
            &parent,
            "q",
            Arc::new(Blocker),
            EnqueueOptions::new().with_wait(&wg),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(wg.count(), 1);
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), wg.wait())
            .await
            .expect("cancelled task must release its wait group");
        assert_eq!(service.len("q"), 0);
    }

    #[tokio::test]
    async fn unique_rejects_third_duplicate() {
        let service = fast_service();
        let root = CancellationToken::new();
        // Block the queue so nothing drains while we count.
        service.enqueue(&root, "q", Arc::new(Blocker), EnqueueOptions::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let wg = WaitGroup::new();
        for _ in 0..3 {
            service.enqueue(
                &root,
                "q",
                Recorder::new("dup", &tx, 0),
                EnqueueOptions::new().unique().with_wait(&wg),
            );
        }
        assert_eq!(service.len("q"), 3);
        assert_eq!(wg.count(), 2);
        root.cancel();
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_dropped() {
        let service = fast_service();
        service.stop().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let wg = WaitGroup::new();
        service.enqueue(
            &CancellationToken::new(),
            "q",
            Recorder::new("late", &tx, 0),
            EnqueueOptions::new().with_wait(&wg),
        );
        assert_eq!(wg.count(), 0);
        assert!(!service.contains("q"));
    }

    #[tokio::test]
    async fn stop_cancels_pending_tasks() {
        let service = fast_service();
        let root = CancellationToken::new();
        let wg = WaitGroup::new();
        service.enqueue(
            &root,
            "a",
            Arc::new(Blocker),
            EnqueueOptions::new().with_wait(&wg),
        );
        service.enqueue(
            &root,
            "b",
            Arc::new(Blocker),
            EnqueueOptions::new().with_wait(&wg),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.stop().await;
        assert_eq!(wg.count(), 0);
        assert!(service.queue_names().is_empty());
    }

    #[tokio::test]
    async fn dump_lists_queues_and_errors() {
        let service = fast_service();
        let root = CancellationToken::new();
        service.enqueue(&root, "x", Arc::new(Blocker), EnqueueOptions::new());
        let yaml = service.dump().unwrap();
        assert!(yaml.contains("name: x"));
        assert!(yaml.contains("name: blocker"));
        root.cancel();
    }
}
