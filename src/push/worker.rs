use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::codec::{encode_canonical, CanonicalRecord};
use crate::error::{PromError, PromResult};

const IMPORT_PATH: &str = "/api/v1/import";
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const IMPORT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a full batch goes.
#[derive(Debug, Clone)]
pub enum FlushTarget {
    /// POST the batch to `<endpoint>/api/v1/import`.
    Import { client: Client, url: String },
    /// Drop the batch (dry run).
    Discard,
}

impl FlushTarget {
    pub fn import(endpoint: &str) -> PromResult<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(PromError::config("vm-endpoint is required"));
        }
        let client = Client::builder()
            .user_agent(concat!("promdump/", env!("CARGO_PKG_VERSION")))
            .timeout(IMPORT_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| PromError::config(format!("failed to build HTTP client: {err}")))?;
        Ok(FlushTarget::Import {
            client,
            url: format!("{endpoint}{IMPORT_PATH}"),
        })
    }

    async fn send(&self, body: Vec<u8>) -> PromResult<()> {
        let FlushTarget::Import { client, url } = self else {
            return Ok(());
        };
        let response = client
            .post(url)
            .header(CONTENT_TYPE, "application/jsonl")
            .body(body)
            .send()
            .await
            .map_err(|err| PromError::PushTransport(format!("POST {url}: {err}")))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(PromError::PushTransport(format!(
                "status={} body={body}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub records: u64,
    pub batches: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Batch {
    buf: Vec<u8>,
    count: usize,
    stats: PushStats,
}

struct Shared {
    batch: Mutex<Batch>,
    target: FlushTarget,
    last_failure: StdMutex<Option<String>>,
}

impl Shared {
    async fn flush(&self) -> PromResult<()> {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch).await
    }

    /// Sends a snapshot of the buffer while the caller keeps holding the lock,
    /// so appends wait for the request. The buffer is only cleared once the
    /// target accepted it.
    async fn flush_locked(&self, batch: &mut Batch) -> PromResult<()> {
        if batch.buf.is_empty() {
            return Ok(());
        }

        let body = batch.buf.clone();
        let bytes = body.len() as u64;
        if let Err(err) = self.target.send(body).await {
            self.set_failure(Some(err.to_string()));
            return Err(err);
        }

        debug!(records = batch.count, bytes, "flushed batch");
        batch.stats.records += batch.count as u64;
        batch.stats.batches += 1;
        batch.stats.bytes += bytes;
        batch.buf.clear();
        batch.count = 0;
        self.set_failure(None);
        Ok(())
    }

    fn failure(&self) -> Option<String> {
        match self.last_failure.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_failure(&self, failure: Option<String>) {
        let mut guard = match self.last_failure.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = failure;
    }
}

enum Message {
    Record(CanonicalRecord),
    Flush(oneshot::Sender<PromResult<()>>),
}

/// Batches canonical records and ships them to the import endpoint.
///
/// A single background task owns the receiving end of a channel bounded at
/// `batch_size`; producers block in [`PushWorker::push`] when it is full.
pub struct PushWorker {
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    consumer: JoinHandle<()>,
    cancel: CancellationToken,
}

impl PushWorker {
    pub fn new(target: FlushTarget, batch_size: usize, cancel: CancellationToken) -> Self {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::channel(batch_size);
        let shared = Arc::new(Shared {
            batch: Mutex::new(Batch::default()),
            target,
            last_failure: StdMutex::new(None),
        });
        let consumer = tokio::spawn(consume(
            Arc::clone(&shared),
            rx,
            batch_size,
            cancel.clone(),
        ));
        Self {
            tx,
            shared,
            consumer,
            cancel,
        }
    }

    /// Queues a record. Fails once a flush has been rejected and not yet
    /// retried successfully, or after cancellation.
    pub async fn push(&self, record: CanonicalRecord) -> PromResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PromError::Cancelled);
        }
        if let Some(failure) = self.shared.failure() {
            return Err(PromError::PushTransport(failure));
        }
        self.tx
            .send(Message::Record(record))
            .await
            .map_err(|_| PromError::Cancelled)
    }

    /// Flushes everything queued so far. On failure the buffered records are
    /// kept for the next attempt.
    pub async fn flush(&self) -> PromResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(reply_tx)).await.is_ok() {
            if let Ok(result) = reply_rx.await {
                return result;
            }
        }
        // The consumer is gone; flush whatever it left in the buffer.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PromError::Cancelled),
            result = self.shared.flush() => result,
        }
    }

    pub async fn stats(&self) -> PushStats {
        self.shared.batch.lock().await.stats
    }

    /// Drains the queue, then makes one best-effort final flush. Draining and
    /// the final flush share one short deadline; a consumer still stuck on a
    /// request when it passes is aborted. Errors are logged, not returned.
    pub async fn close(self) -> PushStats {
        let PushWorker {
            tx,
            shared,
            mut consumer,
            ..
        } = self;
        drop(tx);
        let deadline = Instant::now() + CLOSE_FLUSH_TIMEOUT;
        match tokio::time::timeout_at(deadline, &mut consumer).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "push consumer task ended abnormally"),
            Err(_) => {
                consumer.abort();
                warn!(
                    timeout_secs = CLOSE_FLUSH_TIMEOUT.as_secs(),
                    "push consumer did not drain in time"
                );
            }
        }

        match tokio::time::timeout_at(deadline, shared.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "final flush failed"),
            Err(_) => error!(
                timeout_secs = CLOSE_FLUSH_TIMEOUT.as_secs(),
                "final flush timed out"
            ),
        }
        let stats = shared.batch.lock().await.stats;
        stats
    }
}

async fn consume(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Message>,
    batch_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("push consumer cancelled");
                return;
            }
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            return;
        };

        match message {
            Message::Record(record) => {
                let mut batch = shared.batch.lock().await;
                // A rejected batch stays put until someone flushes explicitly.
                if batch.count >= batch_size && shared.failure().is_none() {
                    let flushed = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!("push consumer cancelled during flush");
                            return;
                        }
                        result = shared.flush_locked(&mut batch) => result,
                    };
                    if let Err(err) = flushed {
                        error!(error = %err, records = batch.count, "failed to flush");
                    }
                }
                if let Err(err) = encode_canonical(&mut batch.buf, &record) {
                    error!(error = %err, "failed to encode record");
                    continue;
                }
                batch.count += 1;
            }
            Message::Flush(reply) => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(PromError::Cancelled),
                    result = shared.flush() => result,
                };
                let _ = reply.send(result);
            }
        }
    }
}
