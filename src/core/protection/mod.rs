// Core protection module - per-guild anti-abuse detectors.
// Following the same pattern as the other core modules: models, service, port traits.

pub mod protection_models;
pub mod protection_registry;
pub mod protection_service;
pub mod protection_stats;
pub mod similarity;
pub mod window_stats;

pub use protection_models::*;
pub use protection_service::*;
