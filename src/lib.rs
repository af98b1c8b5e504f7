pub mod config;
pub use config::Config;

pub mod ctrl_proto;
pub use ctrl_proto::{ControlProtocol, ProtocolCore};

pub mod session;
