use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::time::now_timestamp_ms;

/// Hands out strictly increasing millisecond nonces, even when called several
/// times within the same millisecond.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next_nonce(&self) -> u64 {
        let now = now_timestamp_ms();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = if now > current { now } else { current + 1 };
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn last_nonce(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// 128-bit client order id in the `0x`-prefixed hex form the venue expects.
pub fn generate_cloid() -> String {
    format!("0x{}", Uuid::new_v4().simple())
}
