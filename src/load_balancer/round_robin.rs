//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{LoadBalancer, SelectorError};

/// Round-robin cursor over a group of fixed length.
///
/// The index always satisfies `0 <= index < len`; the only way to move it is
/// [`LoadBalancer::next_index`], which is atomic with respect to concurrent
/// callers.
#[derive(Debug)]
pub struct RoundRobinCursor {
    index: AtomicUsize,
    len: usize,
}

impl RoundRobinCursor {
    /// Create a cursor for a group of `len` entries. Empty groups are rejected.
    pub fn new(len: usize) -> Result<Self, SelectorError> {
        if len == 0 {
            return Err(SelectorError::EmptyGroup);
        }
        Ok(Self {
            index: AtomicUsize::new(0),
            len,
        })
    }
}

impl LoadBalancer for RoundRobinCursor {
    fn next_index(&self) -> usize {
        let len = self.len;
        // The closure never returns None, so both arms carry the previous value.
        match self
            .index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobinCursor::new(2).unwrap();
        assert_eq!(lb.next_index(), 0);
        assert_eq!(lb.next_index(), 1);
        assert_eq!(lb.next_index(), 0);
    }

    #[test]
    fn test_each_index_once_per_cycle() {
        for len in 1..=7 {
            let lb = RoundRobinCursor::new(len).unwrap();
            let first: Vec<usize> = (0..len).map(|_| lb.next_index()).collect();
            let unique: HashSet<usize> = first.iter().copied().collect();
            assert_eq!(unique.len(), len);
            assert!(first.iter().all(|&i| i < len));

            let second: Vec<usize> = (0..len).map(|_| lb.next_index()).collect();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(matches!(RoundRobinCursor::new(0), Err(SelectorError::EmptyGroup)));
    }

    #[test]
    fn test_concurrent_callers_stay_fair() {
        let lb = Arc::new(RoundRobinCursor::new(4).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                std::thread::spawn(move || (0..1000).map(|_| lb.next_index()).collect::<Vec<_>>())
            })
            .collect();

        let mut counts = [0usize; 4];
        for handle in handles {
            for index in handle.join().unwrap() {
                counts[index] += 1;
            }
        }
        assert_eq!(counts, [1000; 4]);
    }
}
