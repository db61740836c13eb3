//! Bounded in-memory history of recent samples.
//!
//! Shared between the acquisition loop (single writer) and display or trend
//! readers. Mutation is serialized behind one lock; the length invariant
//! (`len <= limit`) holds after every push, with the oldest sample evicted
//! first on overflow.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::Sample;

/// Thread-safe FIFO of the most recent samples.
pub struct SampleHistory {
    limit: usize,
    samples: Mutex<VecDeque<Sample>>,
}

impl SampleHistory {
    /// Create a history bounded to `limit` samples. A limit of zero is
    /// clamped to one so the latest sample is always observable.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a sample, evicting the oldest when at capacity.
    pub fn push(&self, sample: Sample) {
        let mut samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if samples.len() == self.limit {
            samples.pop_front();
        }
        samples.push_back(sample);
        debug_assert!(samples.len() <= self.limit);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        let samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.iter().cloned().collect()
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        let samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.back().cloned()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        match self.samples.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// True when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn sample_at(secs: i64) -> Sample {
        Sample {
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            values: BTreeMap::new(),
        }
    }

    #[test]
    fn length_never_exceeds_limit() {
        let history = SampleHistory::new(5);
        for i in 0..20 {
            history.push(sample_at(i));
            assert!(history.len() <= 5);
        }
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn evicts_oldest_first_keeping_chronological_order() {
        let history = SampleHistory::new(5);
        for i in 0..7 {
            history.push(sample_at(i));
        }
        let snapshot = history.snapshot();
        let times: Vec<i64> = snapshot.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(times, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn latest_returns_newest() {
        let history = SampleHistory::new(3);
        assert!(history.latest().is_none());
        history.push(sample_at(1));
        history.push(sample_at(2));
        assert_eq!(history.latest().unwrap().timestamp.timestamp(), 2);
    }

    #[test]
    fn zero_limit_clamped_to_one() {
        let history = SampleHistory::new(0);
        history.push(sample_at(1));
        history.push(sample_at(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().timestamp.timestamp(), 2);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        use std::sync::Arc;
        let history = Arc::new(SampleHistory::new(100));
        let mut handles = Vec::new();
        for t in 0..4 {
            let history = Arc::clone(&history);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    history.push(sample_at(t * 1000 + i));
                    let _ = history.snapshot();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(history.len(), 100);
    }
}
