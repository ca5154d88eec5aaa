pub mod alert_sink;
pub mod broadcast_hub;
pub mod broker_mock;
pub mod csv_loader;
pub mod event_bus;
pub mod observability;
pub mod persistence;

pub use broadcast_hub::BroadcastHub;
pub use event_bus::EventBus;
pub use persistence::Database;
