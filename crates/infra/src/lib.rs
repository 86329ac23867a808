//! Infrastructure layer: event store, command dispatch, read models, config,
//! and the `ProcurementService` that wires the domain crates together.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod read_model;
pub mod service;

mod integration_tests;

pub use config::EngineConfig;
pub use service::{
    CART_STREAM_TYPE, IssuedCart, IssuedPurchaseOrders, NewCart, ORDER_STREAM_TYPE, OrderSummary,
    ProcurementService, ServiceError, Shipment,
};
