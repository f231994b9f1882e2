//! IdGenerator port - mints run ids.
//!
//! # Implementation
//! - **UlidGenerator**: ULID whose timestamp part comes from a `Clock`.

use crate::domain::ids::RunId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates identifiers usable across workers without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;
}

/// ULID generator driven by a `Clock`, so a `FixedClock` gives
/// deterministic timestamp bits in tests.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        RunId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_run_id();
        let id2 = id_gen.generate_run_id();

        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("run-"));
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_bits() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_run_id();
        let id2 = id_gen.generate_run_id();

        // random part differs, timestamp part does not
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
