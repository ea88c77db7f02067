// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-Poll Ingestion
//!
//! One [`EventPoller`] per remote stream (`/events`, `/logs`). Each owns a
//! single cursor and issues one request at a time; the loop consumes the
//! poller, so two polls for the same cursor can never be in flight.
//!
//! Poll outcomes:
//!
//! | Outcome | Cursor | Next poll |
//! |---------|--------|-----------|
//! | page processed | advanced to `last_index`, persisted | immediately |
//! | idle timeout | unchanged | immediately |
//! | transport / HTTP error | unchanged | after `retry_backoff` |
//! | page behind the cursor | unchanged, page dropped | after `retry_backoff` |
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Feed remote events and logs into the per-deployment bus

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{EventsPage, LogsPage};
use crate::domain::provisioning::{ProvisioningClient, ProvisioningError};
use crate::domain::repository::{CursorRepository, PollStream};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::worker_pool::WorkerPool;

/// A long-poll endpoint and where its items go
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Page: Send + 'static;

    fn stream(&self) -> PollStream;

    /// Issue one long-poll request starting at `index`.
    async fn fetch(&self, index: u64) -> Result<Self::Page, ProvisioningError>;

    /// Index of the remote's latest item, used when no cursor was persisted.
    async fn bootstrap_index(&self) -> Result<u64, ProvisioningError>;

    fn last_index(page: &Self::Page) -> u64;

    /// Route every item of `page` in order. Returns how many were delivered.
    fn dispatch(&self, page: Self::Page) -> usize;
}

/// `GET /events` into each deployment's remote event channel
pub struct EventSource {
    client: Arc<dyn ProvisioningClient>,
    bus: EventBus,
}

impl EventSource {
    pub fn new(client: Arc<dyn ProvisioningClient>, bus: EventBus) -> Self {
        Self { client, bus }
    }
}

#[async_trait]
impl PollSource for EventSource {
    type Page = EventsPage;

    fn stream(&self) -> PollStream {
        PollStream::Events
    }

    async fn fetch(&self, index: u64) -> Result<EventsPage, ProvisioningError> {
        self.client.poll_events(index).await
    }

    async fn bootstrap_index(&self) -> Result<u64, ProvisioningError> {
        self.client.latest_event_index().await
    }

    fn last_index(page: &EventsPage) -> u64 {
        page.last_index
    }

    fn dispatch(&self, page: EventsPage) -> usize {
        page.events
            .into_iter()
            .map(|event| self.bus.publish_remote_event(event))
            .filter(Result::is_ok)
            .count()
    }
}

/// `GET /logs` into each deployment's log channel
pub struct LogSource {
    client: Arc<dyn ProvisioningClient>,
    bus: EventBus,
}

impl LogSource {
    pub fn new(client: Arc<dyn ProvisioningClient>, bus: EventBus) -> Self {
        Self { client, bus }
    }
}

#[async_trait]
impl PollSource for LogSource {
    type Page = LogsPage;

    fn stream(&self) -> PollStream {
        PollStream::Logs
    }

    async fn fetch(&self, index: u64) -> Result<LogsPage, ProvisioningError> {
        self.client.poll_logs(index).await
    }

    async fn bootstrap_index(&self) -> Result<u64, ProvisioningError> {
        self.client.latest_log_index().await
    }

    fn last_index(page: &LogsPage) -> u64 {
        page.last_index
    }

    fn dispatch(&self, page: LogsPage) -> usize {
        page.logs
            .into_iter()
            .map(|record| self.bus.publish_log(record))
            .filter(Result::is_ok)
            .count()
    }
}

pub type RemoteEventPoller = EventPoller<EventSource>;
pub type LogPoller = EventPoller<LogSource>;

/// Result of a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Processed { dispatched: usize, last_index: u64 },
    Timeout,
    Failed(String),
    Regressed { last_index: u64 },
}

impl PollOutcome {
    fn label(&self) -> &'static str {
        match self {
            PollOutcome::Processed { .. } => "ok",
            PollOutcome::Timeout => "timeout",
            PollOutcome::Failed(_) => "error",
            PollOutcome::Regressed { .. } => "regressed",
        }
    }

    /// Whether the loop must wait the backoff before the next request
    pub fn needs_backoff(&self) -> bool {
        matches!(self, PollOutcome::Failed(_) | PollOutcome::Regressed { .. })
    }
}

pub struct EventPoller<S: PollSource> {
    source: S,
    repository: Arc<dyn CursorRepository>,
    orchestrator_id: String,
    retry_backoff: Duration,
    cursor: u64,
    cursor_tx: watch::Sender<u64>,
}

impl<S: PollSource> EventPoller<S> {
    pub fn new(
        source: S,
        repository: Arc<dyn CursorRepository>,
        orchestrator_id: impl Into<String>,
        retry_backoff: Duration,
    ) -> Self {
        let (cursor_tx, _) = watch::channel(0);
        Self {
            source,
            repository,
            orchestrator_id: orchestrator_id.into(),
            retry_backoff,
            cursor: 0,
            cursor_tx,
        }
    }

    pub fn stream(&self) -> PollStream {
        self.source.stream()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Follow the cursor as it advances.
    pub fn subscribe_cursor(&self) -> watch::Receiver<u64> {
        self.cursor_tx.subscribe()
    }

    /// Spawn the poll loop on `pool`, stopping with the pool's shutdown.
    pub fn start(self, pool: &WorkerPool) -> JoinHandle<()> {
        let shutdown = pool.shutdown_token();
        pool.spawn(self.run(shutdown))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let stream = self.source.stream();
        let Some(start) = self.resolve_start(&shutdown).await else {
            return;
        };
        self.set_cursor(start);
        info!(stream = %stream, index = start, "Long-poll started");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            if outcome.needs_backoff() && !self.backoff(&shutdown).await {
                break;
            }
        }
        info!(stream = %stream, index = self.cursor, "Long-poll stopped");
    }

    /// Issue one request at the current cursor and apply its result.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let stream = self.source.stream();
        let outcome = match self.source.fetch(self.cursor).await {
            Ok(page) => {
                let last_index = S::last_index(&page);
                if last_index < self.cursor {
                    warn!(
                        stream = %stream,
                        index = self.cursor,
                        last_index,
                        "Remote reported an index behind the cursor, dropping page"
                    );
                    PollOutcome::Regressed { last_index }
                } else {
                    let dispatched = self.source.dispatch(page);
                    self.set_cursor(last_index);
                    self.persist().await;
                    debug!(
                        stream = %stream,
                        dispatched,
                        index = last_index,
                        "Long-poll page processed"
                    );
                    PollOutcome::Processed { dispatched, last_index }
                }
            }
            Err(ProvisioningError::PollTimeout) => {
                debug!(stream = %stream, index = self.cursor, "Long-poll idle, polling again");
                PollOutcome::Timeout
            }
            Err(e) => {
                warn!(
                    stream = %stream,
                    index = self.cursor,
                    backoff_secs = self.retry_backoff.as_secs_f64(),
                    "Long-poll failed: {}",
                    e
                );
                PollOutcome::Failed(e.to_string())
            }
        };

        metrics::counter!(
            "yorc_bridge_poll_requests_total",
            "stream" => stream.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    /// Persisted cursor, else the remote's current head. Returns `None` on
    /// shutdown.
    async fn resolve_start(&self, shutdown: &CancellationToken) -> Option<u64> {
        let stream = self.source.stream();
        match self.repository.load(&self.orchestrator_id, stream).await {
            Ok(Some(index)) => return Some(index),
            Ok(None) => {}
            Err(e) => warn!(stream = %stream, "Could not load persisted cursor: {}", e),
        }

        loop {
            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                attempt = self.source.bootstrap_index() => attempt,
            };
            match attempt {
                Ok(index) => {
                    info!(
                        stream = %stream,
                        index,
                        "No persisted cursor, starting from remote head"
                    );
                    return Some(index);
                }
                Err(e) => {
                    warn!(stream = %stream, "Could not read remote head index: {}", e);
                    if !self.backoff(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Returns `false` when shutdown interrupted the wait.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.retry_backoff) => true,
        }
    }

    fn set_cursor(&mut self, index: u64) {
        self.cursor = index;
        self.cursor_tx.send_replace(index);
    }

    async fn persist(&self) {
        if let Err(e) = self
            .repository
            .save(&self.orchestrator_id, self.source.stream(), self.cursor)
            .await
        {
            warn!(
                stream = %self.source.stream(),
                index = self.cursor,
                "Could not persist cursor: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryCursorRepository;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Source replaying canned page indexes
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<u64, ProvisioningError>>>,
        dispatched: Mutex<Vec<u64>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<u64, ProvisioningError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                dispatched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PollSource for ScriptedSource {
        type Page = u64;

        fn stream(&self) -> PollStream {
            PollStream::Events
        }

        async fn fetch(&self, _index: u64) -> Result<u64, ProvisioningError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(ProvisioningError::PollTimeout))
        }

        async fn bootstrap_index(&self) -> Result<u64, ProvisioningError> {
            Ok(0)
        }

        fn last_index(page: &u64) -> u64 {
            *page
        }

        fn dispatch(&self, page: u64) -> usize {
            self.dispatched.lock().push(page);
            1
        }
    }

    fn poller(
        script: Vec<Result<u64, ProvisioningError>>,
    ) -> (EventPoller<ScriptedSource>, Arc<InMemoryCursorRepository>) {
        let repository = Arc::new(InMemoryCursorRepository::new());
        let poller = EventPoller::new(
            ScriptedSource::new(script),
            repository.clone(),
            "yorc-test",
            Duration::from_secs(5),
        );
        (poller, repository)
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic_and_tracks_last_processed_page() {
        let (mut poller, repository) = poller(vec![
            Ok(3),
            Err(ProvisioningError::PollTimeout),
            Err(ProvisioningError::Transport("connection refused".into())),
            Ok(2),
            Ok(7),
            Ok(7),
        ]);

        let mut seen = Vec::new();
        for _ in 0..6 {
            poller.poll_once().await;
            seen.push(poller.cursor());
        }

        assert_eq!(seen, vec![3, 3, 3, 3, 7, 7]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*poller.source.dispatched.lock(), vec![3, 7, 7]);
        assert_eq!(repository.load("yorc-test", PollStream::Events).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_outcomes_classify_backoff() {
        let (mut poller, _) = poller(vec![
            Err(ProvisioningError::PollTimeout),
            Err(ProvisioningError::Http { status: 502, body: "bad gateway".into() }),
            Err(ProvisioningError::Transport("error trying to connect: timed out".into())),
        ]);

        let timeout = poller.poll_once().await;
        assert_eq!(timeout, PollOutcome::Timeout);
        assert!(!timeout.needs_backoff());

        let failed = poller.poll_once().await;
        assert!(matches!(failed, PollOutcome::Failed(_)));
        assert!(failed.needs_backoff());

        let connect_timeout = poller.poll_once().await;
        assert!(matches!(connect_timeout, PollOutcome::Failed(_)));
        assert!(connect_timeout.needs_backoff());
    }
}
