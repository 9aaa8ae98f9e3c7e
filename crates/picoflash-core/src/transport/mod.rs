//! Transport layer module.

pub mod http;
pub mod mock;
pub mod traits;

pub use http::{CallTimeouts, HttpGateway};
pub use mock::{GatewayCall, MockGateway};
pub use traits::{DeviceGateway, DeviceStatus, GatewayError, WriteAck};
