// Device state store

mod store;

pub use store::{DeviceState, StateSnapshot, StateStore};
