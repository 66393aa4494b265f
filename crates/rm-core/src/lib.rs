// SPDX-License-Identifier: Apache-2.0

//! The core state singleton and its six-phase control loop, tying
//! together the queue tree, the resource pool, and the two capability
//! boundaries (catalog persistence, external resource provider).

pub mod granted;
pub mod state;

pub use granted::GrantedResource;
pub use state::CoreState;

// Re-exported here because the control loop is this crate's reason for
// existing: a caller wiring up `CoreState` without a catalog backend
// reaches for these alongside it rather than importing `rm-proto`
// directly for just these two types.
pub use otap_df_rm_proto::{LoggingCatalogHook, NullCatalogHook, NullResourceBroker};
