//! Batching scheduler.
//!
//! Balances batching throughput against realtime latency: each worker takes
//! one queued request, then accumulates more for at most `wait_time` each up
//! to `max_batch_size`, and dispatches the batch to the figmentator
//! resource. Results fan back out through per-request completion handles.

use crate::config::{SchedulerSettings, Settings};
use crate::error::{FigmentError, Result};
use crate::figment::resource::{ExecutorFactory, FigmentatorResource, PoolExecutorFactory};
use crate::models::figment::FigmentContext;
use crate::models::suggestion::SuggestionType;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Completion handle for one enqueued request.
pub type Completion = oneshot::Sender<Result<FigmentContext>>;

/// One queued request: the completion handle and the context to process.
pub type QueueItem = (Completion, FigmentContext);

/// FIFO queue with `task_done`/`join` accounting.
///
/// Every enqueued item must be marked done exactly once; `join` resolves when
/// the outstanding count reaches zero.
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueItem>>,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Enqueue one item.
    pub fn put(&self, item: QueueItem) -> Result<()> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(item)
            .map_err(|_| FigmentError::Scheduler("queue receiver dropped".to_owned()))
    }

    /// Take up to `max` items: one blocking take, then non-blocking
    /// accumulation with a `wait` timeout per additional item.
    ///
    /// Holding the receiver for the whole accumulation keeps batches
    /// contiguous in FIFO order across concurrent workers. Returns an empty
    /// vector only when the queue is closed.
    pub async fn take_batch(&self, max: usize, wait: Duration) -> Vec<QueueItem> {
        let mut rx = self.rx.lock().await;
        let mut items = Vec::with_capacity(max);

        match rx.recv().await {
            Some(item) => items.push(item),
            None => return items,
        }
        while items.len() < max {
            match tokio::time::timeout(wait, rx.recv()).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) | Err(_) => break,
            }
        }

        items
    }

    /// Mark one previously-taken item as fully processed.
    pub fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every enqueued item has been marked done.
    pub async fn join(&self) {
        loop {
            let drained = self.drained.notified();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Number of items enqueued but not yet marked done.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler for one suggestion type.
pub struct FigmentScheduler {
    suggestion_type: SuggestionType,
    settings: SchedulerSettings,
    queue: Arc<TaskQueue>,
    resource: Arc<FigmentatorResource>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl FigmentScheduler {
    /// Create a scheduler; no workers run until [`startup`](Self::startup).
    pub fn new(
        suggestion_type: SuggestionType,
        settings: SchedulerSettings,
        factory: Box<dyn ExecutorFactory>,
    ) -> Self {
        info!(
            "scheduler for {suggestion_type} using settings: {}",
            serde_json::to_string(&settings).unwrap_or_default()
        );
        Self {
            suggestion_type,
            settings,
            queue: Arc::new(TaskQueue::new()),
            resource: Arc::new(FigmentatorResource::new(suggestion_type, factory)),
            workers: tokio::sync::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The suggestion type this scheduler serves.
    pub fn suggestion_type(&self) -> SuggestionType {
        self.suggestion_type
    }

    /// Acquire the resource and start the worker tasks.
    pub async fn startup(&self) -> Result<()> {
        info!("starting up figmentator for {}", self.suggestion_type);
        self.resource.acquire().await?;

        let mut workers = self.workers.lock().await;
        for _ in 0..self.settings.num_workers {
            let queue = Arc::clone(&self.queue);
            let resource = Arc::clone(&self.resource);
            let settings = self.settings.clone();
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(main_loop(queue, resource, settings, cancel)));
        }
        Ok(())
    }

    /// Drain the queue, stop the workers, and release the resource.
    ///
    /// Cancellation is cooperative: a worker already processing a batch
    /// completes it before observing the cancel.
    pub async fn shutdown(&self) {
        info!("waiting for queue to drain");
        self.queue.join().await;

        info!("cancelling workers");
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!("unhandled exception during figmentator shutdown: {e}");
                }
            }
        }

        self.resource.release().await;
    }

    /// Schedule one context and wait for its result.
    pub async fn figmentate(&self, context: FigmentContext) -> Result<FigmentContext> {
        let (tx, rx) = oneshot::channel();
        self.queue.put((tx, context))?;
        rx.await
            .map_err(|_| FigmentError::Scheduler("completion handle dropped".to_owned()))?
    }

    /// Preprocess a story snapshot on this scheduler's resource.
    pub async fn preprocess(
        &self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.resource.preprocess(story, prior).await
    }
}

/// Consume batches of tasks and execute them until cancelled.
async fn main_loop(
    queue: Arc<TaskQueue>,
    resource: Arc<FigmentatorResource>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            () = cancel.cancelled() => break,
            batch = queue.take_batch(settings.max_batch_size, settings.wait_duration()) => batch,
        };
        if batch.is_empty() {
            break;
        }

        resource.enter().await;
        resource.process(&queue, batch).await;
        resource.exit().await;
    }
}

/// One scheduler per configured suggestion type.
pub struct SchedulerCollection {
    schedulers: BTreeMap<SuggestionType, Arc<FigmentScheduler>>,
}

impl SchedulerCollection {
    /// Build schedulers for every figmentator named in the settings.
    ///
    /// Each scheduler gets its own worker pool factory and its own
    /// `FIG_SCHEDULER_<TYPE>_*` tuning.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut schedulers = BTreeMap::new();
        for (type_name, figmentator) in &settings.figmentators {
            let suggestion_type = *type_name;
            let scheduler_settings = SchedulerSettings::from_env(suggestion_type)?;
            let factory = PoolExecutorFactory::new(
                suggestion_type,
                figmentator.plugin.clone(),
                figmentator.properties.clone(),
                scheduler_settings.num_workers,
            );
            schedulers.insert(
                suggestion_type,
                Arc::new(FigmentScheduler::new(
                    suggestion_type,
                    scheduler_settings,
                    Box::new(factory),
                )),
            );
        }
        Ok(Self { schedulers })
    }

    /// Build a collection from pre-constructed schedulers.
    pub fn from_schedulers(
        schedulers: impl IntoIterator<Item = FigmentScheduler>,
    ) -> Self {
        Self {
            schedulers: schedulers
                .into_iter()
                .map(|scheduler| (scheduler.suggestion_type(), Arc::new(scheduler)))
                .collect(),
        }
    }

    /// Whether any figmentator is configured.
    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// The configured suggestion types.
    pub fn types(&self) -> Vec<SuggestionType> {
        self.schedulers.keys().copied().collect()
    }

    /// Start every scheduler concurrently.
    ///
    /// A failing scheduler is logged and does not abort the rest.
    pub async fn startup(&self) {
        let mut tasks = JoinSet::new();
        for scheduler in self.schedulers.values() {
            let scheduler = Arc::clone(scheduler);
            tasks.spawn(async move { (scheduler.suggestion_type(), scheduler.startup().await) });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((suggestion_type, Err(e))) => {
                    error!("unhandled exception during figmentator startup for {suggestion_type}: {e}");
                }
                Ok((_, Ok(()))) => {}
                Err(e) => error!("figmentator startup task failed: {e}"),
            }
        }
    }

    /// Shut every scheduler down concurrently.
    pub async fn shutdown(&self) {
        let mut tasks = JoinSet::new();
        for scheduler in self.schedulers.values() {
            let scheduler = Arc::clone(scheduler);
            tasks.spawn(async move {
                scheduler.shutdown().await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("unhandled exception during figmentator shutdown: {e}");
            }
        }
    }

    /// Schedule one context on the matching scheduler.
    pub async fn figmentate(
        &self,
        suggestion_type: SuggestionType,
        context: FigmentContext,
    ) -> Result<FigmentContext> {
        let scheduler = self.scheduler(suggestion_type)?;
        scheduler.figmentate(context).await
    }

    /// Preprocess a snapshot on the matching scheduler's resource.
    pub async fn preprocess(
        &self,
        suggestion_type: SuggestionType,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let scheduler = self.scheduler(suggestion_type)?;
        scheduler.preprocess(story, prior).await
    }

    fn scheduler(&self, suggestion_type: SuggestionType) -> Result<&Arc<FigmentScheduler>> {
        self.schedulers.get(&suggestion_type).ok_or_else(|| {
            FigmentError::NoFigmentator(format!(
                "no figmentator configured for {suggestion_type}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::figment::resource::BatchExecutor;
    use crate::models::figment::FigmentStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    /// In-process executor recording batch sizes; optionally fails batches.
    struct StubExecutor {
        batches: Arc<Mutex<Vec<usize>>>,
        fail_next: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BatchExecutor for StubExecutor {
        async fn preprocess(
            &self,
            story: serde_json::Value,
            _prior: Option<serde_json::Value>,
        ) -> crate::error::Result<serde_json::Value> {
            Ok(story)
        }

        async fn figmentate(
            &self,
            mut contexts: Vec<FigmentContext>,
        ) -> crate::error::Result<Vec<FigmentContext>> {
            self.batches.lock().unwrap().push(contexts.len());
            if self.fail_next.swap(false, Ordering::AcqRel) {
                return Err(FigmentError::Model("injected model crash".to_owned()));
            }
            for context in contexts.iter_mut() {
                context.status = FigmentStatus::Partial;
            }
            Ok(contexts)
        }

        async fn shutdown(&self) {}
    }

    struct StubFactory {
        batches: Arc<Mutex<Vec<usize>>>,
        fail_next: Arc<AtomicBool>,
        builds: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExecutorFactory for StubFactory {
        async fn build(&self) -> crate::error::Result<Box<dyn BatchExecutor>> {
            self.builds.fetch_add(1, Ordering::AcqRel);
            Ok(Box::new(StubExecutor {
                batches: Arc::clone(&self.batches),
                fail_next: Arc::clone(&self.fail_next),
            }))
        }
    }

    struct Probe {
        batches: Arc<Mutex<Vec<usize>>>,
        fail_next: Arc<AtomicBool>,
        builds: Arc<AtomicUsize>,
    }

    fn stub_scheduler(settings: SchedulerSettings) -> (Arc<FigmentScheduler>, Probe) {
        let probe = Probe {
            batches: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(AtomicBool::new(false)),
            builds: Arc::new(AtomicUsize::new(0)),
        };
        let factory = StubFactory {
            batches: Arc::clone(&probe.batches),
            fail_next: Arc::clone(&probe.fail_next),
            builds: Arc::clone(&probe.builds),
        };
        let scheduler = Arc::new(FigmentScheduler::new(
            SuggestionType::SceneEntry,
            settings,
            Box::new(factory),
        ));
        (scheduler, probe)
    }

    fn context() -> FigmentContext {
        FigmentContext {
            status: FigmentStatus::Pending,
            range: Some("words=0-4".parse().unwrap()),
            entry: serde_json::from_value(serde_json::json!({
                "user_pid": "u",
                "seq_id": "1",
                "format": "move",
                "pretty_format": "Move",
                "role": "character:1",
            }))
            .unwrap(),
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn fifteen_requests_form_two_batches() {
        let (scheduler, probe) = stub_scheduler(SchedulerSettings {
            wait_time: 0.05,
            max_batch_size: 10,
            num_workers: 1,
        });

        // Enqueue everything before the workers start so batch formation is
        // deterministic: 10 then 5.
        let mut requests = Vec::new();
        for _ in 0..15 {
            let scheduler = Arc::clone(&scheduler);
            requests.push(tokio::spawn(
                async move { scheduler.figmentate(context()).await },
            ));
        }
        while scheduler.queue.outstanding() < 15 {
            tokio::task::yield_now().await;
        }

        scheduler.startup().await.unwrap();
        for request in requests {
            let result = request.await.unwrap().unwrap();
            assert_eq!(result.status, FigmentStatus::Partial);
        }

        let batches = probe.batches.lock().unwrap().clone();
        assert_eq!(batches, vec![10, 5]);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn batches_never_exceed_the_configured_bound() {
        let (scheduler, probe) = stub_scheduler(SchedulerSettings {
            wait_time: 0.01,
            max_batch_size: 3,
            num_workers: 2,
        });
        scheduler.startup().await.unwrap();

        let mut requests = Vec::new();
        for _ in 0..11 {
            let scheduler = Arc::clone(&scheduler);
            requests.push(tokio::spawn(
                async move { scheduler.figmentate(context()).await },
            ));
        }
        for request in requests {
            request.await.unwrap().unwrap();
        }

        let batches = probe.batches.lock().unwrap().clone();
        assert_eq!(batches.iter().sum::<usize>(), 11);
        assert!(batches.iter().all(|&size| size <= 3), "batches: {batches:?}");
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn crashed_batch_fails_requests_and_renews_the_resource() {
        let (scheduler, probe) = stub_scheduler(SchedulerSettings {
            wait_time: 0.01,
            max_batch_size: 10,
            num_workers: 1,
        });
        probe.fail_next.store(true, Ordering::Release);
        let mut requests = Vec::new();
        for _ in 0..3 {
            let scheduler = Arc::clone(&scheduler);
            requests.push(tokio::spawn(
                async move { scheduler.figmentate(context()).await },
            ));
        }
        // Enqueue the whole doomed batch before the worker starts.
        while scheduler.queue.outstanding() < 3 {
            tokio::task::yield_now().await;
        }
        scheduler.startup().await.unwrap();
        assert_eq!(probe.builds.load(Ordering::Acquire), 1);

        for request in requests {
            let result = request.await.unwrap();
            assert!(matches!(result, Err(FigmentError::Model(_))));
        }

        // A later request succeeds against the renewed executor.
        let result = scheduler.figmentate(context()).await.unwrap();
        assert_eq!(result.status, FigmentStatus::Partial);
        assert_eq!(probe.builds.load(Ordering::Acquire), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_dispatches_within_the_latency_bound() {
        let (scheduler, probe) = stub_scheduler(SchedulerSettings {
            wait_time: 0.1,
            max_batch_size: 5,
            num_workers: 1,
        });
        scheduler.startup().await.unwrap();

        let started = tokio::time::Instant::now();
        scheduler.figmentate(context()).await.unwrap();
        let elapsed = started.elapsed();

        // wait_time * (max_batch_size - 1) plus scheduling slack.
        assert!(
            elapsed <= Duration::from_millis(450),
            "dispatch took {elapsed:?}"
        );
        assert_eq!(probe.batches.lock().unwrap().clone(), vec![1]);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_the_queue_before_stopping() {
        let (scheduler, _probe) = stub_scheduler(SchedulerSettings {
            wait_time: 0.01,
            max_batch_size: 4,
            num_workers: 2,
        });

        let mut requests = Vec::new();
        for _ in 0..6 {
            let scheduler = Arc::clone(&scheduler);
            requests.push(tokio::spawn(
                async move { scheduler.figmentate(context()).await },
            ));
        }
        while scheduler.queue.outstanding() < 6 {
            tokio::task::yield_now().await;
        }

        scheduler.startup().await.unwrap();
        scheduler.shutdown().await;

        for request in requests {
            // Every request was resolved exactly once, never dropped.
            assert!(request.await.unwrap().is_ok());
        }
        assert_eq!(scheduler.queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn task_queue_accounts_for_every_item() {
        let queue = TaskQueue::new();
        let (tx, _rx) = oneshot::channel();
        queue.put((tx, context())).unwrap();
        assert_eq!(queue.outstanding(), 1);

        let batch = queue.take_batch(10, Duration::from_millis(1)).await;
        assert_eq!(batch.len(), 1);
        queue.task_done();
        queue.join().await;
        assert_eq!(queue.outstanding(), 0);
    }
}
