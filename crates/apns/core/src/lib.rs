//! APNs Core Types
//!
//! Notification model and wire formats for the legacy binary push gateway.

mod assemble;
mod endpoint;
mod error_frame;
mod frame;
mod notification;
mod outcome;

pub use assemble::*;
pub use endpoint::*;
pub use error_frame::*;
pub use frame::*;
pub use notification::*;
pub use outcome::*;
