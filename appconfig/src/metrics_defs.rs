//! Metrics definitions for the remote configuration source.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SESSION_OPEN_FAILED: MetricDef = MetricDef {
    name: "session.open.failed",
    metric_type: MetricType::Counter,
    description: "Number of times a polling session could not be established",
};

pub const POLL_UPDATED: MetricDef = MetricDef {
    name: "poll.updated",
    metric_type: MetricType::Counter,
    description: "Number of polls that delivered a new configuration",
};

pub const POLL_UNCHANGED: MetricDef = MetricDef {
    name: "poll.unchanged",
    metric_type: MetricType::Counter,
    description: "Number of polls where the remote reported no changes",
};

pub const POLL_FAILED: MetricDef = MetricDef {
    name: "poll.failed",
    metric_type: MetricType::Counter,
    description: "Number of polls that failed and left the snapshot untouched",
};

pub const POLL_DURATION: MetricDef = MetricDef {
    name: "poll.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a poll in seconds",
};

pub const SNAPSHOT_KEYS: MetricDef = MetricDef {
    name: "snapshot.keys",
    metric_type: MetricType::Gauge,
    description: "Number of keys in the current configuration snapshot",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SESSION_OPEN_FAILED,
    POLL_UPDATED,
    POLL_UNCHANGED,
    POLL_FAILED,
    POLL_DURATION,
    SNAPSHOT_KEYS,
];
