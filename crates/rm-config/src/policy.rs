// SPDX-License-Identifier: Apache-2.0

//! Allocation policy and resource-provider mode declarations.

use serde::{Deserialize, Serialize};

/// Per-queue admission/dispatch discipline (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocatePolicy {
    /// Even split of cluster capacity across active statements.
    #[default]
    Even,
    /// First-in-first-out; intentionally over-subscribes concurrency.
    Fifo,
}

/// The external resource-provider capability the pool is wired to
/// (spec.md §9: the `ImpType` branch, abstracted to a `ResourceBroker`
/// capability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// Self-contained: capacity is the FTS (heartbeat) totals, containers
    /// are never returned to an external provider. Breathing is a no-op.
    #[default]
    None,
    /// An external provider is present (e.g. YARN/libyarn): capacity is
    /// the provider's totals and containers flow through the four-stage
    /// acceptance pipeline.
    YarnLibyarn,
}
