pub mod config;
pub mod error;
pub mod types;
pub mod utils;
pub mod prelude;

pub use error::{HlError, Result};
pub use types::*;
