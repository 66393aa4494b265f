// SPDX-License-Identifier: Apache-2.0

//! The process-wide metrics registry: a registration handle
//! (`MetricsRegistry`) separate from the call sites that emit into its
//! already-registered instruments, rather than a global singleton.

use prometheus::{GaugeVec, IntGaugeVec, Opts, Registry};

/// Labeled gauges the control loop updates once per tick. Grouped into a
/// single struct so `rm-core` constructs it once and threads `&self`
/// through each phase.
pub struct MetricsRegistry {
    registry: Registry,
    /// Megabytes allocated, used, and requested per memory/core ratio.
    ratio_memory_mb: GaugeVec,
    /// Cores allocated, used, and requested per memory/core ratio.
    ratio_core: GaugeVec,
    /// Pending FIFO depth per leaf queue.
    queue_depth: IntGaugeVec,
    /// Container counts per pipeline stage, segment, and ratio.
    container_pipeline: IntGaugeVec,
}

/// The three counters tracked per ratio: how much is granted, how much
/// the grantee reported using, and how much is waiting to be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioMetricKind {
    Allocated,
    Used,
    Requested,
}

impl RatioMetricKind {
    fn label(self) -> &'static str {
        match self {
            RatioMetricKind::Allocated => "allocated",
            RatioMetricKind::Used => "used",
            RatioMetricKind::Requested => "requested",
        }
    }
}

/// The four container lifecycle stages (spec.md §3 "Container Set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ToAccept,
    Accepted,
    ToKick,
    Kicked,
}

impl PipelineStage {
    fn label(self) -> &'static str {
        match self {
            PipelineStage::ToAccept => "to_accept",
            PipelineStage::Accepted => "accepted",
            PipelineStage::ToKick => "to_kick",
            PipelineStage::Kicked => "kicked",
        }
    }
}

impl MetricsRegistry {
    /// Registers every instrument against a fresh [`Registry`]. Failure
    /// here means a duplicate metric name, which is a programming error,
    /// so callers are expected to `expect()` this at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ratio_memory_mb = GaugeVec::new(
            Opts::new("rm_ratio_memory_mb", "Memory megabytes per ratio, by kind"),
            &["ratio", "kind"],
        )?;
        let ratio_core = GaugeVec::new(
            Opts::new("rm_ratio_core", "Cores per ratio, by kind"),
            &["ratio", "kind"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("rm_queue_depth", "Pending acquire requests per leaf queue"),
            &["queue"],
        )?;
        let container_pipeline = IntGaugeVec::new(
            Opts::new(
                "rm_container_pipeline",
                "Container counts per lifecycle stage, segment, and ratio",
            ),
            &["stage", "segment", "ratio"],
        )?;

        registry.register(Box::new(ratio_memory_mb.clone()))?;
        registry.register(Box::new(ratio_core.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(container_pipeline.clone()))?;

        Ok(Self {
            registry,
            ratio_memory_mb,
            ratio_core,
            queue_depth,
            container_pipeline,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_ratio_memory_mb(&self, ratio: u32, kind: RatioMetricKind, value: f64) {
        self.ratio_memory_mb
            .with_label_values(&[&ratio.to_string(), kind.label()])
            .set(value);
    }

    pub fn set_ratio_core(&self, ratio: u32, kind: RatioMetricKind, value: f64) {
        self.ratio_core
            .with_label_values(&[&ratio.to_string(), kind.label()])
            .set(value);
    }

    pub fn set_queue_depth(&self, queue_name: &str, depth: u32) {
        self.queue_depth
            .with_label_values(&[queue_name])
            .set(i64::from(depth));
    }

    pub fn set_container_pipeline(&self, stage: PipelineStage, segment: &str, ratio: u32, count: u32) {
        self.container_pipeline
            .with_label_values(&[stage.label(), segment, &ratio.to_string()])
            .set(i64::from(count));
    }

    /// Renders the current snapshot in Prometheus text exposition format,
    /// for a `/metrics` endpoint or local inspection.
    pub fn export_text(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new().expect("metric registration is infallible for a fixed, non-duplicated set")
    }
}
