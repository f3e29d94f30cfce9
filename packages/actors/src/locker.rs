//! Locker actor: claims jobs from the store and feeds them to the worker pool.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use queue_core::{
    CandidateQuery, ConfigError, JobEvent, JobId, JobNotification, JobStore, LockerConfig, LockerRecord,
    NotificationStream,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::handler::JobHandlerRegistry;
use crate::job_queue::{JobKey, JobQueue, QueueEntry};
use crate::messages::{LockerError, LockerInfo, LockerMessage};
use crate::notifier::{ErrorNotifier, LogNotifier};
use crate::pool::WorkerPool;
use crate::result_queue::ResultQueue;
use crate::worker::WorkerContext;

/// Everything a locker needs to start.
pub struct LockerArgs<S: JobStore> {
    store: Arc<S>,
    config: LockerConfig,
    handlers: Arc<JobHandlerRegistry>,
    notifier: Arc<dyn ErrorNotifier>,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl<S: JobStore> LockerArgs<S> {
    /// Use `store` as the locker's session, with the default configuration.
    pub fn new(store: S, handlers: JobHandlerRegistry) -> Self {
        Self {
            store: Arc::new(store),
            config: LockerConfig::default(),
            handlers: Arc::new(handlers),
            notifier: Arc::new(LogNotifier),
            event_tx: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: LockerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the error notifier.
    pub fn with_notifier(mut self, notifier: impl ErrorNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

/// State for the locker actor.
pub struct LockerState<S: JobStore> {
    locker_id: String,
    store: Arc<S>,
    config: LockerConfig,
    job_queue: Arc<JobQueue>,
    result_queue: Arc<ResultQueue>,
    pool: WorkerPool,
    /// Ids whose advisory lock this session holds.
    locked: HashSet<JobId>,
    driver: Option<JoinHandle<()>>,
    event_tx: Option<broadcast::Sender<JobEvent>>,
    /// The last poll filled its whole batch, so more jobs are probably waiting.
    more_available: bool,
    stopped: bool,
}

impl<S: JobStore> LockerState<S> {
    fn broadcast(&self, event: JobEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn info(&self) -> LockerInfo {
        let mut locked: Vec<JobId> = self.locked.iter().copied().collect();
        locked.sort();
        LockerInfo {
            locker_id: self.locker_id.clone(),
            locked,
            buffered: self.job_queue.len(),
            worker_count: self.pool.size(),
        }
    }

    async fn heartbeat(&self) {
        if let Err(e) = self.store.heartbeat_locker(&self.locker_id).await {
            tracing::warn!("Failed to heartbeat locker {}: {}", self.locker_id, e);
        }
    }

    /// Query the store for claimable jobs and push the ones we manage to lock.
    async fn poll(&mut self) {
        self.drain_results().await;

        let space = self.job_queue.space();
        let (limit, max_priority) = if space > 0 {
            (space, None)
        } else {
            // Full: only jobs that would displace the worst resident entry are worth locking.
            match self.job_queue.lowest_priority() {
                Some(lowest) if lowest > i16::MIN => {
                    (self.job_queue.maximum_size(), Some(lowest - 1))
                }
                _ => return,
            }
        };

        let query = CandidateQuery::new(self.config.queues.clone(), limit)
            .with_max_priority(max_priority)
            .with_exclude(self.locked.iter().copied().collect());

        let candidates = match self.store.select_candidates(query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Failed to poll for jobs: {}", e);
                return;
            }
        };
        self.more_available = candidates.len() >= limit;

        let mut claimed = Vec::with_capacity(candidates.len());
        for job in candidates {
            if let Some(entry) = self.claim(job.id).await {
                claimed.push(entry);
            }
        }

        if !claimed.is_empty() {
            tracing::debug!("Locker {} claimed {} jobs", self.locker_id, claimed.len());
            let evicted = self.job_queue.push(claimed);
            self.release_evicted(evicted).await;
        }
    }

    /// React to a published job without waiting for the next poll.
    async fn job_available(&mut self, notification: JobNotification) {
        if !self.config.queues.contains(&notification.queue)
            || notification.run_at > Utc::now()
            || self.locked.contains(&notification.id)
        {
            return;
        }

        let key = JobKey {
            priority: notification.priority,
            run_at: notification.run_at,
            id: notification.id,
        };
        if !self.job_queue.accepts(&key) {
            return;
        }

        if let Some(entry) = self.claim(notification.id).await {
            let evicted = self.job_queue.push([entry]);
            self.release_evicted(evicted).await;
        }
    }

    /// Lock a job and re-read its row. The lock is released again if the row was worked
    /// by someone else in the meantime.
    async fn claim(&mut self, id: JobId) -> Option<QueueEntry> {
        if self.locked.contains(&id) {
            return None;
        }

        match self.store.try_advisory_lock(id).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!("Failed to lock job {}: {}", id, e);
                return None;
            }
        }

        let job = match self.store.get_job(id).await {
            Ok(Some(job)) if job.is_due(Utc::now()) => job,
            Ok(_) => {
                self.unlock(id).await;
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to load job {}: {}", id, e);
                self.unlock(id).await;
                return None;
            }
        };

        self.locked.insert(id);
        self.broadcast(JobEvent::JobLocked {
            job_id: id,
            priority: job.priority,
            locker_id: self.locker_id.clone(),
            timestamp: Utc::now(),
        });

        Some(QueueEntry::from(job))
    }

    async fn release_evicted(&mut self, evicted: Vec<QueueEntry>) {
        for entry in evicted {
            tracing::debug!("Evicted job {} (priority {})", entry.id(), entry.priority());
            self.locked.remove(&entry.id());
            self.unlock(entry.id()).await;
            self.broadcast(JobEvent::JobEvicted {
                job_id: entry.id(),
                priority: entry.priority(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Release the locks of every job the workers reported.
    async fn drain_results(&mut self) {
        for id in self.result_queue.drain() {
            self.locked.remove(&id);
            self.unlock(id).await;
            self.broadcast(JobEvent::JobReleased {
                job_id: id,
                timestamp: Utc::now(),
            });
        }
    }

    async fn unlock(&self, id: JobId) {
        if let Err(e) = self.store.advisory_unlock(id).await {
            tracing::warn!("Failed to unlock job {}: {}", id, e);
        }
    }

    async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!("Stopping locker: {}", self.locker_id);

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }

        self.pool.stop().await;
        self.drain_results().await;

        for entry in self.job_queue.clear() {
            self.locked.remove(&entry.id());
            self.unlock(entry.id()).await;
        }
        for id in std::mem::take(&mut self.locked) {
            self.unlock(id).await;
        }

        if let Err(e) = self.store.unregister_locker(&self.locker_id).await {
            tracing::warn!("Failed to unregister locker {}: {}", self.locker_id, e);
        }

        self.broadcast(JobEvent::LockerStopped {
            locker_id: self.locker_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!("Locker stopped: {}", self.locker_id);
    }
}

/// Turn timer ticks, worker results and notifications into locker messages.
///
/// Heartbeats run on their own timer so a listen-only locker keeps its registration alive.
fn spawn_driver(
    myself: ActorRef<LockerMessage>,
    heartbeat_interval: Duration,
    poll_interval: Option<Duration>,
    result_queue: Arc<ResultQueue>,
    mut notifications: Option<NotificationStream>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ticker = |period: Duration| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        };
        let mut heartbeat = ticker(heartbeat_interval);
        let mut interval = poll_interval.map(ticker);

        loop {
            let message = tokio::select! {
                _ = heartbeat.tick() => Some(LockerMessage::Heartbeat),
                _ = async {
                    match interval.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => Some(LockerMessage::Poll),
                _ = result_queue.notified() => Some(LockerMessage::DrainResults),
                notification = async {
                    match notifications.as_mut() {
                        Some(stream) => stream.next().await,
                        None => std::future::pending().await,
                    }
                } => match notification {
                    Some(notification) => Some(LockerMessage::JobAvailable(notification)),
                    None => {
                        tracing::warn!("Notification stream closed, relying on polling");
                        notifications = None;
                        None
                    }
                },
            };

            if let Some(message) = message
                && myself.send_message(message).is_err()
            {
                break;
            }
        }
    })
}

/// Check the config on its own and against the store's locker TTL.
fn validate<S: JobStore>(config: &LockerConfig, store: &S) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(ttl) = store.locker_ttl() {
        config.validate_heartbeat(ttl)?;
    }
    Ok(())
}

/// Locker actor that claims jobs for one worker pool.
pub struct LockerActor<S>(PhantomData<fn() -> S>);

impl<S> LockerActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for LockerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for LockerActor<S> {
    type Msg = LockerMessage;
    type State = LockerState<S>;
    type Arguments = LockerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let LockerArgs {
            store,
            config,
            handlers,
            notifier,
            event_tx,
        } = args;

        validate(&config, store.as_ref())
            .map_err(|e| ActorProcessingErr::from(format!("Invalid locker config: {}", e)))?;

        let locker_id = store.session_id().to_string();
        tracing::info!("Starting locker: {} (queues {:?})", locker_id, config.queues);

        let now = Utc::now();
        let record = LockerRecord {
            id: locker_id.clone(),
            pid: std::process::id(),
            worker_count: config.worker_count,
            worker_priorities: config.worker_thresholds(),
            queues: config.queues.clone(),
            listening: config.listen,
            started_at: now,
            heartbeat_at: now,
        };
        if let Err(e) = store.register_locker(record).await {
            tracing::warn!("Failed to register locker {}: {}", locker_id, e);
        }

        let notifications = if config.listen {
            match store.listen().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::warn!("Failed to listen for notifications: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let job_queue = Arc::new(JobQueue::new(config.maximum_buffer_size));
        let result_queue = Arc::new(ResultQueue::new());

        let mut context = WorkerContext::new(store.clone(), handlers)
            .with_notifier(notifier)
            .with_maximum_retry_count(config.maximum_retry_count);
        if let Some(ref tx) = event_tx {
            context = context.with_event_tx(tx.clone());
        }

        let mut pool = WorkerPool::new(job_queue.clone(), result_queue.clone());
        pool.start(context, config.worker_count, &config.worker_thresholds());

        let driver = spawn_driver(
            myself,
            config.heartbeat_interval(),
            config.poll.then(|| config.poll_interval()),
            result_queue.clone(),
            notifications,
        );

        let state = LockerState {
            locker_id,
            store,
            config,
            job_queue,
            result_queue,
            pool,
            locked: HashSet::new(),
            driver: Some(driver),
            event_tx,
            more_available: false,
            stopped: false,
        };

        state.broadcast(JobEvent::LockerStarted {
            locker_id: state.locker_id.clone(),
            worker_count: state.pool.size(),
            queues: state.config.queues.clone(),
            timestamp: Utc::now(),
        });

        Ok(state)
    }

    async fn post_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.poll().await;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            LockerMessage::Poll => {
                if !state.stopped {
                    state.poll().await;
                }
            }

            LockerMessage::Heartbeat => {
                if !state.stopped {
                    state.heartbeat().await;
                }
            }

            LockerMessage::JobAvailable(notification) => {
                if !state.stopped {
                    state.job_available(notification).await;
                }
            }

            LockerMessage::DrainResults => {
                state.drain_results().await;
                if !state.stopped && state.more_available && state.job_queue.space() > 0 {
                    state.poll().await;
                }
            }

            LockerMessage::Info { reply } => {
                let _ = reply.send(state.info());
            }

            LockerMessage::Stop { reply } => {
                state.shutdown().await;
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.shutdown().await;
        Ok(())
    }
}

/// Handle to a running locker.
pub struct Locker {
    locker_id: String,
    actor: ActorRef<LockerMessage>,
    handle: JoinHandle<()>,
}

impl Locker {
    /// Register a locker, start its workers and begin claiming jobs.
    pub async fn start<S: JobStore>(args: LockerArgs<S>) -> Result<Self, LockerError> {
        validate(&args.config, args.store.as_ref())?;
        let locker_id = args.store.session_id().to_string();

        let (actor, handle) = Actor::spawn(
            Some(format!("locker-{}", locker_id)),
            LockerActor::<S>::new(),
            args,
        )
        .await
        .map_err(|e| LockerError::Spawn(e.to_string()))?;

        Ok(Self {
            locker_id,
            actor,
            handle,
        })
    }

    /// Session id the locker registered under.
    pub fn locker_id(&self) -> &str {
        &self.locker_id
    }

    pub fn actor(&self) -> &ActorRef<LockerMessage> {
        &self.actor
    }

    /// Ask the locker to poll now.
    pub fn poll(&self) -> Result<(), LockerError> {
        self.actor
            .send_message(LockerMessage::Poll)
            .map_err(|e| LockerError::Actor(e.to_string()))
    }

    /// Snapshot of the locker's claims and buffer.
    pub async fn info(&self) -> Result<LockerInfo, LockerError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| LockerMessage::Info { reply },
            Some(Duration::from_secs(5)),
        )
        .await
        .map_err(|e| LockerError::Actor(e.to_string()))?;

        match result {
            CallResult::Success(info) => Ok(info),
            CallResult::Timeout => Err(LockerError::Timeout),
            CallResult::SenderError => Err(LockerError::Actor("Locker dropped the reply".into())),
        }
    }

    /// Stop claiming, let in-flight jobs finish, release every lock and unregister.
    pub async fn stop(self) -> Result<(), LockerError> {
        let result = ractor::rpc::call(&self.actor, |reply| LockerMessage::Stop { reply }, None)
            .await
            .map_err(|e| LockerError::Actor(e.to_string()))?;

        match result {
            CallResult::Success(()) => {}
            CallResult::Timeout => return Err(LockerError::Timeout),
            CallResult::SenderError => {
                return Err(LockerError::Actor("Locker dropped the reply".into()));
            }
        }

        self.handle
            .await
            .map_err(|e| LockerError::Actor(e.to_string()))
    }
}
