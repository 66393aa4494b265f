// SPDX-License-Identifier: Apache-2.0

//! Decoded RPC message bodies and the two capability traits the core
//! depends on at its boundaries: [`broker::ResourceBroker`] for an
//! external resource provider, [`catalog::CatalogHook`] for persistence.

pub mod broker;
pub mod catalog;
pub mod messages;

pub use broker::{ContainerRequest, ContainerStatus, NullResourceBroker, ResourceBroker};
pub use catalog::{CatalogHook, LoggingCatalogHook, NullCatalogHook, QueueRow, SegmentRow};
pub use messages::{
    AcquireResourceRequest, AcquireResourceResponse, AcquireResult, AllocatedHost, ConnId,
    QueueDdlAction, QueueDdlRequest, RegisterRequest, ReturnResourceRequest, RoleDdlAction,
    RoleDdlRequest,
};
