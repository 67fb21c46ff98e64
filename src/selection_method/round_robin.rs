use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;

/// Where a service's rotation starts the first time it is seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum InitialPosition {
    #[serde(rename = "zero")]
    Zero,
    /// Somewhere in `0..1000`, so fresh clients don't all start on the
    /// first instance.
    #[default]
    #[serde(rename = "random")]
    Random,
}

impl InitialPosition {
    fn value(self) -> usize {
        match self {
            InitialPosition::Zero => 0,
            InitialPosition::Random => rand::thread_rng().gen_range(0..1000),
        }
    }
}

/// One rotation counter per service id.
#[derive(Debug, Default)]
pub struct RoundRobin {
    positions: DashMap<String, AtomicUsize>,
    initial: InitialPosition,
}

impl RoundRobin {
    pub fn new(initial: InitialPosition) -> Self {
        Self {
            positions: DashMap::new(),
            initial,
        }
    }

    /// Returns the current position for `service_id` and advances it by one.
    /// Concurrent callers always observe distinct values; the counter wraps
    /// on overflow.
    pub fn next(&self, service_id: &str) -> usize {
        // Wraps at usize::MAX; unless len divides 2^64, `% len` takes one
        // uneven step there.
        if let Some(counter) = self.positions.get(service_id) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.positions
            .entry(service_id.to_owned())
            .or_insert_with(|| AtomicUsize::new(self.initial.value()))
            .fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_counters_are_per_service() {
        let rr = RoundRobin::new(InitialPosition::Zero);

        assert_eq!(rr.next("a"), 0);
        assert_eq!(rr.next("a"), 1);
        assert_eq!(rr.next("b"), 0);
        assert_eq!(rr.next("a"), 2);
    }

    #[test]
    fn test_random_start_is_bounded() {
        let rr = RoundRobin::new(InitialPosition::Random);
        let first = rr.next("a");

        assert!(first < 1000);
        assert_eq!(rr.next("a"), first + 1);
    }

    #[test]
    fn test_wraps_on_overflow() {
        let rr = RoundRobin::new(InitialPosition::Zero);
        rr.positions
            .insert("a".to_string(), AtomicUsize::new(usize::MAX));

        assert_eq!(rr.next("a"), usize::MAX);
        assert_eq!(rr.next("a"), 0);
    }

    #[test]
    fn test_concurrent_positions_are_distinct() {
        let rr = Arc::new(RoundRobin::new(InitialPosition::Zero));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rr = rr.clone();
                thread::spawn(move || (0..250).map(|_| rr.next("a")).collect::<Vec<_>>())
            })
            .collect();

        let seen: HashSet<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(seen.len(), 2000);
        assert_eq!(seen, (0..2000).collect::<HashSet<_>>());
    }
}
