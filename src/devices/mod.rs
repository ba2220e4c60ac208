//! Device Key Exchange (C7)

mod exchange;
mod sweeper;

pub use exchange::{
    DeviceKeyExchange, DeviceRecord, DeviceStatus, ExchangeRequest, ExchangeResponse, RotationRecord,
};
pub use sweeper::SweeperHandle;
