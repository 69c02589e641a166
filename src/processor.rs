//! Trap processing pipeline
//!
//! One [`TrapProcessor`] consumes decoded notifications in arrival order:
//! match -> extract -> render -> publish. Every failure is contained to the
//! trap that caused it.

use crate::descriptor::DescriptorStore;
use crate::extractor::FieldExtractor;
use crate::matcher::TrapMatcher;
use crate::publisher::EventPublisher;
use crate::templater::{render, OutputEvent};
use crate::trap::{IncomingTrap, Notification};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Rendered and written to the client socket.
    Published(OutputEvent),
    /// No descriptor matched.
    Unmatched,
    /// SNMPv1 traps are logged only.
    IgnoredV1,
    /// Rendered, but no client socket is configured.
    NotForwarded(OutputEvent),
    /// Rendered, but the client socket write failed; the event is dropped.
    ForwardFailed(OutputEvent),
}

#[derive(Debug, Default)]
pub struct ProcessorStats {
    received: AtomicU64,
    ignored_v1: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub ignored_v1: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub published: u64,
    pub failed: u64,
}

impl ProcessorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored_v1: self.ignored_v1.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &ProcessOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProcessOutcome::IgnoredV1 => &self.ignored_v1,
            ProcessOutcome::Unmatched => &self.unmatched,
            ProcessOutcome::Published(_) => {
                self.matched.fetch_add(1, Ordering::Relaxed);
                &self.published
            }
            ProcessOutcome::NotForwarded(_) => &self.matched,
            ProcessOutcome::ForwardFailed(_) => {
                self.matched.fetch_add(1, Ordering::Relaxed);
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct TrapProcessor {
    descriptors: DescriptorStore,
    matcher: TrapMatcher,
    extractor: FieldExtractor,
    publisher: Option<Arc<dyn EventPublisher>>,
    default_handler: Option<String>,
    stats: Arc<ProcessorStats>,
}

impl TrapProcessor {
    pub fn new(
        descriptors: DescriptorStore,
        matcher: TrapMatcher,
        extractor: FieldExtractor,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        Self {
            descriptors,
            matcher,
            extractor,
            publisher,
            default_handler: None,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    /// Set `handler` on events whose template does not provide one.
    pub fn with_default_handler(mut self, handler: impl Into<String>) -> Self {
        let handler = handler.into();
        self.default_handler = (!handler.is_empty()).then_some(handler);
        self
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    pub async fn process(&self, notification: Notification) -> ProcessOutcome {
        let outcome = match notification {
            Notification::V1(trap) => {
                info!("ignoring {}", trap);
                ProcessOutcome::IgnoredV1
            }
            Notification::V2c(trap) => {
                let span = tracing::info_span!("trap", id = %trap.id, source = %trap.source_address);
                self.process_trap(&trap).instrument(span).await
            }
        };
        self.stats.record(&outcome);
        outcome
    }

    pub async fn process_trap(&self, trap: &IncomingTrap) -> ProcessOutcome {
        debug!("v2 trap caught: {}", trap.identifier);

        let Some(descriptor) = self.matcher.match_trap(trap, self.descriptors.as_slice()) else {
            info!("ignoring unrecognised trap: {}", trap.identifier);
            return ProcessOutcome::Unmatched;
        };
        info!(
            "processing a defined SNMP v2 trap oid:{} ({})",
            trap.identifier, descriptor.origin
        );

        let fields = self.extractor.extract(trap, descriptor).await;
        let mut event = render(&fields, &descriptor.event_template);
        if let Some(handler) = &self.default_handler {
            if !event.contains_key("handler") {
                event.insert("handler", JsonValue::String(handler.clone()));
            }
        }
        debug!("rendered event: {:?}", event);

        let Some(publisher) = &self.publisher else {
            info!("client socket not configured, event not forwarded");
            return ProcessOutcome::NotForwarded(event);
        };

        match publisher.publish(&event).await {
            Ok(()) => {
                info!("forwarded event for trap {} to {}", trap.identifier, publisher.endpoint());
                ProcessOutcome::Published(event)
            }
            Err(e) => {
                error!("dropping event for trap {}: {}", trap.identifier, e);
                ProcessOutcome::ForwardFailed(event)
            }
        }
    }

    /// Handle notifications one at a time until the channel closes.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<Notification>) {
        info!(
            "trap processor started with {} trap definition(s)",
            self.descriptors.len()
        );
        while let Some(notification) = receiver.recv().await {
            self.process(notification).await;
        }
        let totals = self.stats.snapshot();
        info!(
            "trap processor stopped: {} received, {} published, {} unmatched, {} failed",
            totals.received, totals.published, totals.unmatched, totals.failed
        );
    }
}

/// Log a summary of trap activity every `interval`.
pub fn spawn_stats_reporter(
    stats: Arc<ProcessorStats>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        let mut previous = stats.snapshot();
        loop {
            ticker.tick().await;
            let current = stats.snapshot();
            if current.received != previous.received {
                info!(
                    "last {:?}: {} trap(s) received, {} published, {} unmatched, {} v1 ignored, {} failed",
                    interval,
                    current.received - previous.received,
                    current.published - previous.published,
                    current.unmatched - previous.unmatched,
                    current.ignored_v1 - previous.ignored_v1,
                    current.failed - previous.failed,
                );
            }
            previous = current;
        }
    })
}
