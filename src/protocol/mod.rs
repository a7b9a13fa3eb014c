//! Device management protocol: topics and wire documents

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
