use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "turnstone";
const BACKEND_DURATION_BUCKETS: [f64; 10] =
    [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnstone=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();
        let component = metadata.target();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let span_path = current_span_path(ctx);

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = span_path {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        if let Some(file) = metadata.file() {
            push_field(&mut line, "file", file);
        }
        if let Some(line_no) = metadata.line() {
            push_field(&mut line, "line", &line_no.to_string());
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    transformer_fallbacks: AtomicU64,
    handles_allocated: AtomicU64,
    active_connections: AtomicU64,
    requests: RequestOutcomeRegistry,
    backend_calls: BackendCallMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub transformer_fallbacks: u64,
    pub handles_allocated: u64,
    pub active_connections: u64,
    pub requests: Vec<RequestOutcomeSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOutcomeSnapshot {
    pub operation: String,
    pub status: String,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCallCountSnapshot {
    pub label: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendDurationSnapshot {
    pub label: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendMetricsSnapshot {
    pub calls: Vec<BackendCallCountSnapshot>,
    pub durations: Vec<BackendDurationSnapshot>,
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_transformer_fallback(&self) {
        self.transformer_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_handles_allocated(&self) {
        self.handles_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        let _ = self.active_connections.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| (current > 0).then(|| current - 1),
        );
    }

    pub fn record_request(&self, operation: &str, status: &str) {
        self.requests.record(operation, status);
    }

    pub fn record_backend_call(&self, label: &str, status: u16, duration: Duration) {
        self.backend_calls.record(label, status, duration);
    }

    pub fn backend_metrics_snapshot(&self) -> BackendMetricsSnapshot {
        self.backend_calls.snapshot()
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            transformer_fallbacks: self.transformer_fallbacks.load(Ordering::Relaxed),
            handles_allocated: self.handles_allocated.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            requests: self.requests.snapshot(),
        }
    }
}

#[derive(Default)]
struct RequestOutcomeRegistry {
    inner: Mutex<BTreeMap<(String, String), u64>>,
}

impl RequestOutcomeRegistry {
    fn record(&self, operation: &str, status: &str) {
        let mut guard = self
            .inner
            .lock()
            .expect("request outcome registry poisoned");
        let key = (operation.to_string(), status.to_string());
        *guard.entry(key).or_insert(0) += 1;
    }

    fn snapshot(&self) -> Vec<RequestOutcomeSnapshot> {
        let guard = self
            .inner
            .lock()
            .expect("request outcome registry poisoned");
        guard
            .iter()
            .map(|((operation, status), total)| RequestOutcomeSnapshot {
                operation: operation.clone(),
                status: status.clone(),
                total: *total,
            })
            .collect()
    }
}

#[derive(Default)]
struct BackendCallMetrics {
    counts: Mutex<HashMap<(String, u16), u64>>,
    durations: Mutex<HashMap<String, DurationBuckets>>,
}

impl BackendCallMetrics {
    fn record(&self, label: &str, status: u16, duration: Duration) {
        let mut counts = self.counts.lock().expect("backend call counts lock poisoned");
        *counts.entry((label.to_string(), status)).or_insert(0) += 1;
        drop(counts);

        let mut durations = self
            .durations
            .lock()
            .expect("backend call durations lock poisoned");
        let entry = durations.entry(label.to_string()).or_default();
        entry.observe(duration.as_secs_f64());
    }

    fn snapshot(&self) -> BackendMetricsSnapshot {
        let counts_guard = self.counts.lock().expect("backend call counts lock poisoned");
        let durations_guard = self
            .durations
            .lock()
            .expect("backend call durations lock poisoned");

        let calls = counts_guard
            .iter()
            .map(|((label, status), total)| BackendCallCountSnapshot {
                label: label.clone(),
                status_code: *status,
                total: *total,
            })
            .collect();

        let durations = durations_guard
            .iter()
            .map(|(label, buckets)| BackendDurationSnapshot {
                label: label.clone(),
                buckets: buckets.histogram(),
                sum: buckets.sum,
                count: buckets.total,
            })
            .collect();

        BackendMetricsSnapshot { calls, durations }
    }
}

#[derive(Default)]
struct DurationBuckets {
    counts: [u64; BACKEND_DURATION_BUCKETS.len()],
    sum: f64,
    total: u64,
}

impl DurationBuckets {
    fn observe(&mut self, duration_secs: f64) {
        for (idx, boundary) in BACKEND_DURATION_BUCKETS.iter().enumerate() {
            if duration_secs <= *boundary {
                self.counts[idx] += 1;
                break;
            }
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0;
        BACKEND_DURATION_BUCKETS
            .iter()
            .enumerate()
            .map(|(idx, boundary)| {
                cumulative += self.counts[idx];
                (*boundary, cumulative)
            })
            .collect()
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
