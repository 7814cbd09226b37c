pub mod logging;

pub use logging::{build_filter, setup_logging, StructuredLogger};

pub mod prelude {
    pub use super::{setup_logging, StructuredLogger};
    pub use tracing_appender::non_blocking::WorkerGuard;
}
