//! Asynchronous CDEvents delivery. Workers enqueue events without blocking;
//! a single consumer task drains the queue and POSTs CloudEvents envelopes
//! to the configured sink, retrying with exponential backoff and dropping
//! events that exhaust their retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use nopea_defs::CdEvent;
use serde_json::Value;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct EmitterConfig {
    pub retry_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            retry_delay_ms: 1000,
            max_retries: 3,
        }
    }
}

/// Where envelopes go. Pluggable so tests can observe delivery attempts.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Returns the HTTP status code, or a transport error message.
    async fn post(&self, body: &Value) -> Result<u16, String>;
}

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: &str) -> Self {
        HttpSink {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn post(&self, body: &Value) -> Result<u16, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/cloudevents+json")
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

/// Handle shared by all workers. `emit` never blocks and never fails from
/// the caller's point of view; a full queue or a disabled emitter counts the
/// event as dropped.
#[derive(Clone)]
pub struct Emitter {
    tx: Option<mpsc::Sender<CdEvent>>,
    sent: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl Emitter {
    /// No endpoint configured: every event is silently discarded.
    pub fn disabled() -> Self {
        Emitter {
            tx: None,
            sent: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn spawn(sink: Arc<dyn EventSink>, config: EmitterConfig) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let emitter = Emitter {
            tx: Some(tx),
            sent: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        tokio::spawn(deliver_loop(
            rx,
            sink,
            config,
            emitter.sent.clone(),
            emitter.dropped.clone(),
        ));
        emitter
    }

    pub fn emit(&self, event: CdEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn deliver_loop(
    mut rx: mpsc::Receiver<CdEvent>,
    sink: Arc<dyn EventSink>,
    config: EmitterConfig,
    sent: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
) {
    while let Some(event) = rx.recv().await {
        let body = event.to_cloudevent();
        let mut delivered = false;

        for attempt in 1..=config.max_retries.max(1) {
            match sink.post(&body).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!("delivered event {} ({})", event.id, event.event_type);
                    sent.fetch_add(1, Ordering::Relaxed);
                    delivered = true;
                    break;
                }
                Ok(status) => {
                    warn!(
                        "event {} attempt {} got status {}",
                        event.id, attempt, status
                    );
                }
                Err(e) => {
                    warn!("event {} attempt {} transport error: {}", event.id, attempt, e);
                }
            }
            if attempt < config.max_retries {
                let backoff = config.retry_delay_ms.saturating_mul(1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        if !delivered {
            warn!(
                "dropping event {} after {} attempts",
                event.id, config.max_retries
            );
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
