pub mod ble;
pub mod gatt_transport;
pub mod rpc;
