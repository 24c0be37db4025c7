use std::sync::atomic::{AtomicUsize, Ordering};

use super::ProxyEndpoint;

/// Round-robin view over one validated pool.
///
/// The pool itself is immutable; refreshing means building a new rotator.
/// The cursor is a fetch-and-increment counter so concurrent callers never
/// observe the same slot twice in a row.
#[derive(Debug, Default)]
pub struct ProxyRotator {
    endpoints: Vec<ProxyEndpoint>,
    cursor: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn next_proxy(&self) -> Option<ProxyEndpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.endpoints[slot % self.endpoints.len()].clone())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(size: usize) -> Vec<ProxyEndpoint> {
        (0..size)
            .map(|i| ProxyEndpoint::http(&format!("10.0.0.{}:8080", i + 1)))
            .collect()
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let rotator = ProxyRotator::empty();
        assert!(rotator.next_proxy().is_none());
        assert!(rotator.next_proxy().is_none());
    }

    #[test]
    fn test_round_robin_wraps_modulo_pool_size() {
        let endpoints = pool(3);
        let rotator = ProxyRotator::new(endpoints.clone());

        for n in 0..10 {
            let proxy = rotator.next_proxy().unwrap();
            assert_eq!(proxy, endpoints[n % 3], "call {} should map to slot {}", n, n % 3);
        }
    }

    #[test]
    fn test_concurrent_callers_share_one_cursor() {
        let rotator = Arc::new(ProxyRotator::new(pool(4)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| rotator.next_proxy().unwrap().address)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for address in handle.join().unwrap() {
                *counts.entry(address).or_insert(0) += 1;
            }
        }

        // 400 draws over 4 slots with an atomic cursor hits each slot exactly 100 times
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&count| count == 100));
    }
}
