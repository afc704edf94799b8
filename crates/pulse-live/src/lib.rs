//! Live session registry for pulse: tracks connected recipients and fans
//! notification payloads out to their open push channels.

pub mod registry;

pub use registry::{SessionHandle, SessionRegistry};
