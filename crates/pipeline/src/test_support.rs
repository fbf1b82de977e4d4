//! Log capture for assertions about what each stage emitted.

use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone)]
pub(crate) struct Captured {
    pub target: String,
    pub level: Level,
    pub message: String,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.events.lock().unwrap().push(Captured {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            message,
        });
    }
}

/// Captures every event on the current thread while alive.
pub(crate) struct CapturedLogs {
    events: Arc<Mutex<Vec<Captured>>>,
    _guard: DefaultGuard,
}

impl CapturedLogs {
    pub fn install() -> Self {
        let layer = CaptureLayer::default();
        let events = layer.events.clone();
        let subscriber = tracing_subscriber::registry().with(layer);
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            events,
            _guard: guard,
        }
    }

    pub fn all(&self) -> Vec<Captured> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_at(&self, target: &str, level: Level) -> usize {
        self.all()
            .iter()
            .filter(|e| e.target == target && e.level == level)
            .count()
    }

    pub fn count_from(&self, target: &str) -> usize {
        self.all().iter().filter(|e| e.target == target).count()
    }
}
