//! Request Coalescer
//!
//! Single-flight execution keyed by a cache key: concurrent callers with the
//! same key share one in-flight call and all receive its settled result.

use crate::error::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Calls that actually executed
    pub leaders: u64,
    /// Calls that joined an in-flight call
    pub joined: u64,
    pub in_flight: usize,
}

pub struct RequestCoalescer<T> {
    in_flight: DashMap<String, Arc<OnceCell<Result<T>>>>,
    leaders: AtomicU64,
    joined: AtomicU64,
}

impl<T: Clone> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            leaders: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `call` unless an identical call is already in flight, in which case
    /// wait for that call's result instead.
    pub async fn run<F, Fut>(&self, key: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut created = false;
        let cell = {
            let entry = self.in_flight.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(OnceCell::new())
            });
            Arc::clone(entry.value())
        };

        if !created {
            self.joined.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Joining in-flight request");
        }

        let mut executed = false;
        let result = cell
            .get_or_init(|| {
                executed = true;
                call()
            })
            .await
            .clone();

        if executed {
            self.leaders.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));

        result
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            leaders: self.leaders.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }
}

impl<T: Clone> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}
