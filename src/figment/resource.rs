//! Scoped holder for one running model and its worker pool.
//!
//! The resource moves through three states: *Initialized* (no executor),
//! *Ready* (executor up, ready flag set), and *Draining* (ready cleared while
//! scheduler workers are still inside the scope). `acquire` enters Ready; an
//! executor failure clears the flag and enters Draining; the last in-scope
//! user out of Draining triggers a renew back to Ready.

use crate::error::{FigmentError, Result};
use crate::figment::pool::{WorkerPool, WorkerRequest, WorkerResponse};
use crate::figment::scheduler::{Completion, TaskQueue};
use crate::models::figment::FigmentContext;
use crate::models::suggestion::SuggestionType;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info};

/// Executes model operations for a batch. Implemented by [`WorkerPool`];
/// tests substitute an in-process stub.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Preprocess one story snapshot.
    async fn preprocess(
        &self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Generate figments for a batch of contexts.
    async fn figmentate(&self, contexts: Vec<FigmentContext>) -> Result<Vec<FigmentContext>>;

    /// Release the executor's resources.
    async fn shutdown(&self);
}

/// Builds a fresh [`BatchExecutor`]; invoked on acquire and on every renew.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Build and start an executor.
    async fn build(&self) -> Result<Box<dyn BatchExecutor>>;
}

#[async_trait]
impl BatchExecutor for WorkerPool {
    async fn preprocess(
        &self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match self.submit(WorkerRequest::Preprocess { story, prior }).await? {
            WorkerResponse::Preprocessed { data } => Ok(data),
            WorkerResponse::Error { message } => Err(FigmentError::Model(message)),
            other => Err(FigmentError::Pool(format!(
                "unexpected preprocess response: {other:?}"
            ))),
        }
    }

    async fn figmentate(&self, contexts: Vec<FigmentContext>) -> Result<Vec<FigmentContext>> {
        match self.submit(WorkerRequest::Figmentate { contexts }).await? {
            WorkerResponse::Figmentated { contexts } => Ok(contexts),
            WorkerResponse::Error { message } => Err(FigmentError::Model(message)),
            other => Err(FigmentError::Pool(format!(
                "unexpected figmentate response: {other:?}"
            ))),
        }
    }

    async fn shutdown(&self) {
        WorkerPool::shutdown(self).await;
    }
}

/// [`ExecutorFactory`] that spawns a [`WorkerPool`] from factory settings.
pub struct PoolExecutorFactory {
    suggestion_type: SuggestionType,
    plugin: String,
    properties: Option<serde_json::Value>,
    num_workers: usize,
}

impl PoolExecutorFactory {
    /// Create a factory for one configured figmentator.
    pub fn new(
        suggestion_type: SuggestionType,
        plugin: String,
        properties: Option<serde_json::Value>,
        num_workers: usize,
    ) -> Self {
        Self {
            suggestion_type,
            plugin,
            properties,
            num_workers,
        }
    }
}

#[async_trait]
impl ExecutorFactory for PoolExecutorFactory {
    async fn build(&self) -> Result<Box<dyn BatchExecutor>> {
        let pool = WorkerPool::spawn(
            self.suggestion_type,
            &self.plugin,
            self.properties.clone(),
            self.num_workers,
        )
        .await?;
        Ok(Box::new(pool))
    }
}

#[derive(Default)]
struct Inner {
    executor: Option<Arc<dyn BatchExecutor>>,
    users: usize,
}

/// Tracks the state of one figmentator and catches its failures so the
/// executor can be rebuilt without crashing the scheduler.
pub struct FigmentatorResource {
    suggestion_type: SuggestionType,
    factory: Box<dyn ExecutorFactory>,
    inner: Mutex<Inner>,
    ready: watch::Sender<bool>,
}

impl FigmentatorResource {
    /// Create an unacquired resource.
    pub fn new(suggestion_type: SuggestionType, factory: Box<dyn ExecutorFactory>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            suggestion_type,
            factory,
            inner: Mutex::new(Inner::default()),
            ready,
        }
    }

    /// Whether a batch may currently start.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Build a fresh executor and mark the resource ready.
    pub async fn acquire(&self) -> Result<()> {
        // Make all workers block on processing another batch.
        self.ready.send_replace(false);
        info!("acquiring figmentator for {}", self.suggestion_type);
        let executor: Arc<dyn BatchExecutor> = Arc::from(self.factory.build().await?);
        if let Ok(mut inner) = self.inner.lock() {
            inner.executor = Some(executor);
        }
        self.ready.send_replace(true);
        Ok(())
    }

    /// Shut the executor down and mark the resource unready.
    pub async fn release(&self) {
        self.ready.send_replace(false);
        let executor = self
            .inner
            .lock()
            .ok()
            .and_then(|mut inner| inner.executor.take());
        if let Some(executor) = executor {
            info!("releasing figmentator for {}", self.suggestion_type);
            executor.shutdown().await;
        }
    }

    /// Release and reacquire the underlying resources.
    pub async fn renew(&self) -> Result<()> {
        self.release().await;
        self.acquire().await
    }

    /// Enter the resource scope, waiting until the resource is ready.
    pub async fn enter(&self) {
        loop {
            let mut ready_rx = self.ready.subscribe();
            if ready_rx.wait_for(|ready| *ready).await.is_err() {
                // The sender lives as long as `self`; unreachable in practice.
                return;
            }
            if let Ok(mut inner) = self.inner.lock() {
                if *self.ready.borrow() {
                    inner.users += 1;
                    return;
                }
            }
        }
    }

    /// Leave the resource scope.
    ///
    /// The last user out of a non-ready resource triggers a renew, rebuilding
    /// the executor after a crash.
    pub async fn exit(&self) {
        let renew_needed = match self.inner.lock() {
            Ok(mut inner) => {
                inner.users = inner.users.saturating_sub(1);
                inner.users == 0 && !*self.ready.borrow() && inner.executor.is_some()
            }
            Err(_) => false,
        };
        if renew_needed {
            if let Err(e) = self.renew().await {
                error!(
                    "failed to renew figmentator resource for {}: {e}",
                    self.suggestion_type
                );
            }
        }
    }

    /// Have the figmentator process a batch.
    ///
    /// Every item is completed exactly once: on success each context goes to
    /// its paired completion handle; on failure the error goes to every
    /// handle and the ready flag is cleared so the scope triggers a renew.
    pub async fn process(&self, queue: &TaskQueue, batch: Vec<(Completion, FigmentContext)>) {
        let (handles, contexts): (Vec<_>, Vec<_>) = batch.into_iter().unzip();

        let outcome = match self.executor() {
            Some(executor) => executor.figmentate(contexts).await,
            None => Err(FigmentError::Pool("no executor acquired".to_owned())),
        };
        let outcome = outcome.and_then(|results| {
            if results.len() == handles.len() {
                Ok(results)
            } else {
                Err(FigmentError::Pool(format!(
                    "batch size mismatch: sent {}, received {}",
                    handles.len(),
                    results.len()
                )))
            }
        });

        match outcome {
            Ok(results) => {
                for (handle, context) in handles.into_iter().zip(results) {
                    // An orphaned handle (cancelled request) is dropped here.
                    let _ = handle.send(Ok(context));
                    queue.task_done();
                }
            }
            Err(e) => {
                error!("caught exception while processing batch: {e}");
                self.ready.send_replace(false);
                let message = e.to_string();
                for handle in handles {
                    let _ = handle.send(Err(FigmentError::Model(message.clone())));
                    queue.task_done();
                }
            }
        }
    }

    /// Preprocess one story snapshot on the executor, inside the scope.
    pub async fn preprocess(
        &self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.enter().await;
        let result = match self.executor() {
            Some(executor) => executor.preprocess(story, prior).await,
            None => Err(FigmentError::Pool("no executor acquired".to_owned())),
        };
        if result.is_err() {
            self.ready.send_replace(false);
        }
        self.exit().await;
        result
    }

    fn executor(&self) -> Option<Arc<dyn BatchExecutor>> {
        self.inner.lock().ok().and_then(|inner| inner.executor.clone())
    }
}
