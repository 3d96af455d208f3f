use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Session-layer metrics, labeled by request kind where it matters.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    received: Family<KindLabels, Counter>,
    failed: Family<KindLabels, Counter>,
    malformed: Counter,
    sessions: Gauge,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct KindLabels {
    kind: String,
}

// === impl SessionMetrics ===

impl SessionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let received = Family::<KindLabels, Counter>::default();
        reg.register(
            "messages_received",
            "Total number of stream messages dispatched to handlers",
            received.clone(),
        );

        let failed = Family::<KindLabels, Counter>::default();
        reg.register(
            "requests_failed",
            "Total number of requests answered with a failure response",
            failed.clone(),
        );

        let malformed = Counter::default();
        reg.register(
            "messages_malformed",
            "Total number of stream messages dropped before dispatch",
            malformed.clone(),
        );

        let sessions = Gauge::default();
        reg.register(
            "sessions",
            "Number of currently connected cluster streams",
            sessions.clone(),
        );

        Self {
            received,
            failed,
            malformed,
            sessions,
        }
    }

    pub(crate) fn inc_received(&self, kind: &str) {
        self.received
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn inc_failed(&self, kind: &str) {
        self.failed
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn inc_malformed(&self) {
        self.malformed.inc();
    }

    pub(crate) fn session_opened(&self) {
        self.sessions.inc();
    }

    pub(crate) fn session_closed(&self) {
        self.sessions.dec();
    }
}
