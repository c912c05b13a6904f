pub mod config;
pub mod expiry;

pub use config::Config;
pub use expiry::expiry_after;
