//! APNs Crypto Utilities
//!
//! Client identity loading and push certificate inspection.

mod cert;
mod identity;

pub use cert::*;
pub use identity::*;
