// SPDX-License-Identifier: Apache-2.0

//! Structured logging setup and the Prometheus-backed metrics registry.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{MetricsRegistry, PipelineStage, RatioMetricKind};
pub use tracing_setup::init_tracing;
