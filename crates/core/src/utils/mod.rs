pub mod time;
pub mod validation;
pub mod id_generator;

pub use time::*;
pub use validation::*;
pub use id_generator::*;
