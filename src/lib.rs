//! Clients for the Tuya smart-device cloud and the HOBOlink data-logger
//! web services: token handling, request signing, JSON decoding and
//! device-log pagination.

pub mod config;
pub mod error;
pub mod hobo;
pub mod security;
pub mod tuya;
pub mod utils;

pub use config::{Config, HoboConfig, TuyaConfig, TuyaRegion};
pub use error::ResponseError;
pub use hobo::HoboApi;
pub use security::request_signer::Query;
pub use tuya::{DeviceLogQuery, SmartHomeDeviceApi, TuyaDeviceManager, TuyaOpenApi};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
