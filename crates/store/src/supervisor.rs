//! One consumer task per watched kind, all writing to a shared sink.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use kwatch_core::{meta_str, RawEvent};
use kwatch_render::Differ;
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::router::EventRouter;
use crate::sink::OutputSink;

/// Notifications for one kind, in delivery order. The stream ending is a normal
/// shutdown; an `Err` item ends the consumer with an error.
pub type EventStream = BoxStream<'static, anyhow::Result<RawEvent>>;

pub struct KindSource {
    /// Kind name used in identities, titles and log fields (e.g. `Deployment`).
    pub kind: String,
    pub stream: EventStream,
}

impl KindSource {
    pub fn new(kind: impl Into<String>, stream: EventStream) -> Self {
        Self { kind: kind.into(), stream }
    }
}

/// What one consumer did before its stream ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub kind: String,
    pub events: u64,
    pub rendered: u64,
    pub failed: u64,
    pub stream_error: Option<String>,
}

/// Starts and joins the per-kind consumers.
#[derive(Debug, Clone)]
pub struct Supervisor {
    differ: Arc<Differ>,
    sink: OutputSink,
    names: Arc<[String]>,
}

impl Supervisor {
    pub fn new(differ: Differ, sink: OutputSink) -> Self {
        Self { differ: Arc::new(differ), sink, names: Arc::from(Vec::new()) }
    }

    /// Only route objects with one of these names. Empty means all objects.
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Arc::from(names);
        self
    }

    pub fn spawn(&self, source: KindSource) -> JoinHandle<TaskSummary> {
        let span = info_span!("watch", kind = %source.kind);
        let watcher = KindWatcher {
            router: EventRouter::new(source.kind),
            differ: Arc::clone(&self.differ),
            sink: self.sink.clone(),
            names: Arc::clone(&self.names),
        };
        tokio::spawn(watcher.run(source.stream).instrument(span))
    }

    /// Start every consumer, then wait until all of their streams have closed.
    pub async fn run(&self, sources: Vec<KindSource>) -> Vec<TaskSummary> {
        let handles: Vec<_> = sources.into_iter().map(|s| self.spawn(s)).collect();
        info!(tasks = handles.len(), "watch tasks started");
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            match h.await {
                Ok(summary) => out.push(summary),
                Err(e) => error!(error = %e, "watch task aborted"),
            }
        }
        out
    }
}

/// Sequential consumer for one kind. Owns the router, and with it the kind's
/// cache, for its whole lifetime.
struct KindWatcher {
    router: EventRouter,
    differ: Arc<Differ>,
    sink: OutputSink,
    names: Arc<[String]>,
}

impl KindWatcher {
    async fn run(mut self, mut stream: EventStream) -> TaskSummary {
        let mut summary = TaskSummary { kind: self.router.kind().to_string(), ..Default::default() };
        debug!("consumer started");
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.handle(event, &mut summary),
                Err(e) => {
                    let msg = format!("{e:#}");
                    error!(error = %msg, "watch stream failed");
                    summary.stream_error = Some(msg);
                    break;
                }
            }
        }
        info!(events = summary.events, rendered = summary.rendered, failed = summary.failed, "watch stream closed");
        summary
    }

    fn handle(&mut self, event: RawEvent, summary: &mut TaskSummary) {
        if !self.names.is_empty() {
            let name = meta_str(&event.object, "name").unwrap_or("");
            if !self.names.iter().any(|n| n == name) {
                return;
            }
        }
        summary.events += 1;
        counter!("kwatch_events_total", 1u64, "action" => event.kind.label());
        let started = Instant::now();

        let action = event.kind;
        let change = match self.router.route(event, Utc::now()) {
            Ok(change) => change,
            Err(e) => {
                warn!(%action, error = %e, "dropping notification");
                summary.failed += 1;
                counter!("kwatch_event_errors_total", 1u64);
                return;
            }
        };

        let written = self
            .differ
            .render(&change)
            .map_err(|e| e.to_string())
            .and_then(|block| self.sink.write_block_in_task(&block).map_err(|e| e.to_string()));
        match written {
            Ok(()) => summary.rendered += 1,
            Err(e) => {
                error!(%action, object = %change.identity, error = %e, "failed to render change");
                summary.failed += 1;
                counter!("kwatch_event_errors_total", 1u64);
            }
        }
        histogram!("kwatch_render_ms", started.elapsed().as_secs_f64() * 1000.0);
    }
}
