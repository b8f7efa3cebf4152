use std::sync::Mutex;

use ulid::{Generator, Ulid};

/// Process-wide ULID source. The underlying generator increments the random
/// component when two IDs land in the same millisecond, so generation order
/// equals lexicographic order.
pub struct UlidGen {
    inner: Mutex<Generator>,
}

impl UlidGen {
    pub fn new() -> Self {
        UlidGen {
            inner: Mutex::new(Generator::new()),
        }
    }

    pub fn next(&self) -> String {
        let mut generator = self.inner.lock().unwrap();
        match generator.generate() {
            Ok(id) => id.to_string(),
            // Random-component overflow within one millisecond; a fresh
            // non-monotonic ULID is still unique.
            Err(_) => Ulid::new().to_string(),
        }
    }

    /// Liveness probe used by the health endpoint.
    pub fn available(&self) -> bool {
        self.next().len() == 26
    }
}

impl Default for UlidGen {
    fn default() -> Self {
        Self::new()
    }
}
