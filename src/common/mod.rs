pub mod config;
pub mod crypto;
pub mod error;
pub mod id;

pub use config::*;
pub use error::*;
pub use id::*;
