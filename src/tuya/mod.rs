//! Tuya smart-device cloud (OpenAPI) client.

pub mod device;
pub mod logs;
pub mod openapi;

pub use device::{SmartHomeDeviceApi, TuyaDeviceManager};
pub use logs::{DeviceLogPages, DeviceLogQuery};
pub use openapi::{TuyaOpenApi, TuyaTokenInfo};
