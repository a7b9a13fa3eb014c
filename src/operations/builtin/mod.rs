//! Built-in device operations

pub mod fault;
pub mod firmware;
pub mod reboot;

pub use fault::Order66;
pub use firmware::FirmwareUpgrade;
pub use reboot::Reboot;
