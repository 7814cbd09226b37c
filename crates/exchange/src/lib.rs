pub mod backoff;
pub mod events;
pub mod heartbeat;
pub mod normalizer;
pub mod prelude;
pub mod rate_limiter;
pub mod rest;
pub mod subscription;
pub mod traits;
pub mod transport;
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use backoff::*;
pub use events::*;
pub use heartbeat::*;
pub use normalizer::*;
pub use rate_limiter::*;
pub use rest::*;
pub use subscription::*;
pub use traits::*;
pub use transport::*;
pub use websocket::*;
