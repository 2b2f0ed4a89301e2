//! Observability for the conference coordinator.
//!
//! Instrumented entry points use `#[instrument(skip_all)]` with explicit
//! identifier fields; passwords, tokens, chat bodies and whiteboard
//! documents never reach logs or metric labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `conf_conferences_active` | Gauge | none |
//! | `conf_joins_total` | Counter | `outcome` |
//! | `conf_relay_events_total` | Counter | `audience` |
//! | `conf_relay_events_dropped_total` | Counter | `reason` |
//! | `conf_signals_total` | Counter | `kind` |
//! | `conf_screen_share_preemptions_total` | Counter | none |
//! | `conf_persistence_failures_total` | Counter | `operation` |
//! | `conf_redis_latency_seconds` | Histogram | `operation` |
//! | `conf_operation_duration_seconds` | Histogram | `operation` |
//! | `conf_http_requests_total` | Counter | `method`, `endpoint`, `status_code` |
//! | `conf_http_request_duration_seconds` | Histogram | `method`, `endpoint`, `status` |
//! | `conf_peer_streams_active` | Gauge | none |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
