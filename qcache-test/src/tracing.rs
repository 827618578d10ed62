//! Tracing utilities for tests.
//!
//! [`with_span_capture`] records the `qcache.*` spans opened by a closure so
//! tests can assert on them; [`init_logging`] prints logs of failing tests.

use std::sync::{Arc, Mutex, Once};

use tracing::span::{Attributes, Id};
use tracing::{Dispatch, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Captured span information.
#[derive(Debug, Clone)]
pub struct CapturedSpan {
    /// The span name, e.g. `qcache.redis.put`.
    pub name: String,
    /// Field values rendered as strings.
    pub fields: Vec<(String, String)>,
}

struct FieldVisitor {
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .push((field.name().to_string(), format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

struct SpanCaptureLayer {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

impl<S> Layer<S> for SpanCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let metadata = attrs.metadata();
        if !metadata.name().starts_with("qcache.") {
            return;
        }

        let mut visitor = FieldVisitor { fields: Vec::new() };
        attrs.record(&mut visitor);

        self.spans.lock().unwrap().push(CapturedSpan {
            name: metadata.name().to_string(),
            fields: visitor.fields,
        });
    }
}

/// Collector for captured spans.
#[derive(Clone)]
pub struct SpanCollector {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
    dispatch: Dispatch,
}

impl SpanCollector {
    fn new() -> Self {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(SpanCaptureLayer {
            spans: spans.clone(),
        });
        Self {
            spans,
            dispatch: Dispatch::new(subscriber),
        }
    }

    /// Captured span names in order.
    pub fn span_names(&self) -> Vec<String> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Check if a span with the given name was captured.
    pub fn has_span(&self, name: &str) -> bool {
        self.spans.lock().unwrap().iter().any(|s| s.name == name)
    }

    /// Field value of the last span named `span_name`.
    pub fn get_field(&self, span_name: &str, field_name: &str) -> Option<String> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.name == span_name)
            .and_then(|s| {
                s.fields
                    .iter()
                    .find(|(k, _)| k == field_name)
                    .map(|(_, v)| v.clone())
            })
    }

    /// Assert that all given spans were captured (in any order).
    pub fn assert_has_spans(&self, expected: &[&str]) {
        for name in expected {
            if !self.has_span(name) {
                panic!(
                    "Expected span '{}' not found. Captured spans: {:?}",
                    name,
                    self.span_names()
                );
            }
        }
    }
}

/// Runs `f` with span capturing enabled on the current thread.
///
/// Spans are recorded when they are created, so operations issued inside `f`
/// are captured even though they complete on other threads.
pub fn with_span_capture<F, R>(f: F) -> (R, SpanCollector)
where
    F: FnOnce() -> R,
{
    let collector = SpanCollector::new();
    let result = tracing::dispatcher::with_default(&collector.dispatch, f);
    (result, collector)
}

/// Installs a test writer honouring `RUST_LOG`; later calls do nothing.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use tracing::{Level, span};

    use super::*;

    #[test]
    fn captures_only_qcache_spans() {
        let ((), collector) = with_span_capture(|| {
            let _ignored = span!(Level::TRACE, "other.span");
            let span = span!(Level::DEBUG, "qcache.test", storage = "c", tags = 2u64);
            let _enter = span.enter();
        });

        assert_eq!(collector.span_names(), vec!["qcache.test".to_string()]);
        assert_eq!(collector.get_field("qcache.test", "storage"), Some("c".to_string()));
        assert_eq!(collector.get_field("qcache.test", "tags"), Some("2".to_string()));
    }
}
