pub mod filter_metrics;
pub mod filter_registry;
pub mod proxy;
pub mod transport;
pub mod usage_notifier;
