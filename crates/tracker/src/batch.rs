//! Per record type batch collectors.
//!
//! Each record type has one bounded channel and one collector task. The
//! collector accumulates rows until the batch is full or old enough, then
//! hands the batch to a save task. Each channel has its own semaphore, which
//! caps its concurrent inserts at the configured worker count.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use pirsch_core::{Error, Event, PageView, Result, Session, Store, UserAgent};
use telemetry::metrics;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Callback for failed batch inserts.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

type SaveFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A row type with its own table and channel.
pub trait Record: Send + Sync + Sized + 'static {
    const CHANNEL: &'static str;

    fn save<'a>(store: &'a dyn Store, rows: &'a [Self]) -> SaveFuture<'a>;
}

impl Record for PageView {
    const CHANNEL: &'static str = "page_view";

    fn save<'a>(store: &'a dyn Store, rows: &'a [Self]) -> SaveFuture<'a> {
        store.save_page_views(rows)
    }
}

impl Record for Session {
    const CHANNEL: &'static str = "session";

    fn save<'a>(store: &'a dyn Store, rows: &'a [Self]) -> SaveFuture<'a> {
        store.save_sessions(rows)
    }
}

impl Record for Event {
    const CHANNEL: &'static str = "event";

    fn save<'a>(store: &'a dyn Store, rows: &'a [Self]) -> SaveFuture<'a> {
        store.save_events(rows)
    }
}

impl Record for UserAgent {
    const CHANNEL: &'static str = "user_agent";

    fn save<'a>(store: &'a dyn Store, rows: &'a [Self]) -> SaveFuture<'a> {
        store.save_user_agents(rows)
    }
}

pub(crate) enum Message<T> {
    /// Rows that must land in the same batch.
    Rows(Vec<T>),
    /// Dispatch everything buffered, then acknowledge.
    Flush(oneshot::Sender<()>),
}

/// Capacity for one message on a channel. Dropping it unused gives the
/// capacity back.
pub(crate) struct Slot<'a, T> {
    permit: mpsc::Permit<'a, Message<T>>,
}

impl<T: Record> Slot<'_, T> {
    /// Sends the rows; cannot fail once the slot is held.
    pub fn send(self, rows: Vec<T>) {
        if rows.is_empty() {
            return;
        }
        metrics().queued_records.add(rows.len() as u64);
        self.permit.send(Message::Rows(rows));
    }
}

/// Reserves capacity for one message, waiting at most `timeout`.
pub(crate) async fn reserve<T: Record>(
    tx: &mpsc::Sender<Message<T>>,
    timeout: Option<Duration>,
) -> Result<Slot<'_, T>> {
    let permit = match timeout {
        None => tx.reserve().await.map_err(|_| Error::Stopped)?,
        Some(timeout) => match tokio::time::timeout(timeout, tx.reserve()).await {
            Ok(reserved) => reserved.map_err(|_| Error::Stopped)?,
            Err(_) => {
                return Err(Error::overloaded(
                    T::CHANNEL,
                    timeout.as_millis() as u64,
                ))
            }
        },
    };
    Ok(Slot { permit })
}

pub(crate) struct Collector<T: Record> {
    pub rx: mpsc::Receiver<Message<T>>,
    pub store: Arc<dyn Store>,
    pub pool: Arc<Semaphore>,
    pub batch_size: usize,
    pub max_age: Duration,
    pub on_error: Option<ErrorHandler>,
    pub cancel: CancellationToken,
}

impl<T: Record> Collector<T> {
    /// Runs until every sender is dropped or the token is cancelled.
    pub async fn run(mut self) {
        let mut buffer: Vec<T> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.max_age);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let mut dropped = buffer.len();
                    self.rx.close();
                    while let Ok(message) = self.rx.try_recv() {
                        if let Message::Rows(rows) = message {
                            dropped += rows.len();
                        }
                    }
                    metrics().queued_records.sub(dropped as u64);
                    if dropped > 0 {
                        metrics().records_dropped.inc_by(dropped as u64);
                        error!(channel = T::CHANNEL, dropped = dropped, "Dropped unsaved records on stop");
                    }
                    break;
                }
                message = self.rx.recv() => match message {
                    Some(Message::Rows(rows)) => {
                        if !buffer.is_empty() && buffer.len() + rows.len() > self.batch_size {
                            self.dispatch(std::mem::take(&mut buffer)).await;
                        }
                        buffer.extend(rows);
                        if buffer.len() >= self.batch_size {
                            self.dispatch(std::mem::take(&mut buffer)).await;
                        }
                    }
                    Some(Message::Flush(done)) => {
                        if !buffer.is_empty() {
                            self.dispatch(std::mem::take(&mut buffer)).await;
                        }
                        let _ = done.send(());
                    }
                    None => {
                        if !buffer.is_empty() {
                            self.dispatch(std::mem::take(&mut buffer)).await;
                        }
                        debug!(channel = T::CHANNEL, "Collector stopped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.dispatch(std::mem::take(&mut buffer)).await;
                    }
                }
            }
        }
    }

    /// Waits for a free worker and saves the batch on it.
    async fn dispatch(&self, rows: Vec<T>) {
        let n = rows.len();
        let permit = match self.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                metrics().queued_records.sub(n as u64);
                metrics().records_dropped.inc_by(n as u64);
                error!(channel = T::CHANNEL, dropped = n, "Worker pool closed");
                return;
            }
        };
        metrics().queued_records.sub(n as u64);

        let store = self.store.clone();
        let on_error = self.on_error.clone();
        tokio::spawn(async move {
            let result = T::save(store.as_ref(), &rows).await;
            match result {
                Ok(()) => debug!(channel = T::CHANNEL, count = n, "Saved batch"),
                Err(e) => {
                    error!(channel = T::CHANNEL, count = n, error = %e, "Failed to save batch");
                    if let Some(on_error) = on_error {
                        on_error(&e);
                    }
                }
            }
            drop(permit);
        });
    }
}
