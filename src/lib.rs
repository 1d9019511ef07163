pub mod docker;
pub mod error;
pub mod operator;
pub mod server;
pub mod shared;
pub mod storage;
pub mod workspace;

pub use error::{ProvisionError, Result};
