//! Environment traits: time and id generation behind seams.
//!
//! Commands stamp `verified_at` timestamps and mint aggregate ids; both go
//! through these traits so tests run with a fixed clock and sequential ids.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of new aggregate ids.
pub trait IdGenerator: Send + Sync {
    /// A fresh unique id.
    fn next_id(&self) -> String;
}

/// Random UUIDv4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_generator_yields_unique_ids() {
        let generator = UuidGenerator;
        assert_ne!(generator.next_id(), generator.next_id());
    }
}
