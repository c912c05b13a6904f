//! APNs Push Delivery
//!
//! Delivery over the legacy binary gateway protocol, which only reports the
//! first rejected frame on a connection and then closes it.

mod coordinator;
mod feedback;
mod tls;
mod traits;

pub use coordinator::*;
pub use feedback::*;
pub use tls::*;
pub use traits::*;
