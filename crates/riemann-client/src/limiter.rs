//! Admission control for outstanding writes.
//!
//! Each connection owns one [`WriteLimiter`]. A send takes a [`WritePermit`]
//! without blocking; the permit is returned when the socket write finishes
//! (not when the response arrives). When no permit is left the send fails
//! at once with [`Error::Overloaded`] instead of queueing.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default number of writes that may be in flight per connection.
pub const DEFAULT_WRITE_LIMIT: usize = 8192;

struct LimiterInner {
    outstanding: AtomicUsize,
    limit: AtomicUsize,
}

/// A counting semaphore over atomics; acquisition never blocks.
#[derive(Clone)]
pub struct WriteLimiter {
    inner: Arc<LimiterInner>,
}

impl WriteLimiter {
    /// Creates a limiter allowing `limit` outstanding writes.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                outstanding: AtomicUsize::new(0),
                limit: AtomicUsize::new(limit),
            }),
        }
    }

    /// Takes one permit, or fails with `Overloaded` carrying the current counts.
    pub fn try_acquire(&self) -> Result<WritePermit> {
        let limit = self.inner.limit.load(Ordering::Acquire);
        let mut current = self.inner.outstanding.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return Err(Error::Overloaded {
                    outstanding: current,
                    limit,
                });
            }
            match self.inner.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(WritePermit {
                        inner: Arc::clone(&self.inner),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Writes currently holding a permit.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// The configured limit.
    pub fn limit(&self) -> usize {
        self.inner.limit.load(Ordering::Acquire)
    }

    /// Changes the limit. The owning transport only calls this while
    /// disconnected, when no permits can be outstanding.
    pub(crate) fn set_limit(&self, limit: usize) {
        self.inner.limit.store(limit, Ordering::Release);
    }
}

impl Default for WriteLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_LIMIT)
    }
}

impl fmt::Debug for WriteLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLimiter")
            .field("outstanding", &self.outstanding())
            .field("limit", &self.limit())
            .finish()
    }
}

/// RAII guard for one outstanding write; dropping it frees the slot.
pub struct WritePermit {
    inner: Arc<LimiterInner>,
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for WritePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePermit").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_limit_exhaustion_fails_fast() {
        let limiter = WriteLimiter::new(3);
        let permits: Vec<_> = (0..3).map(|_| limiter.try_acquire().unwrap()).collect();
        assert_eq!(limiter.outstanding(), 3);

        let err = limiter.try_acquire().unwrap_err();
        assert!(matches!(
            err,
            Error::Overloaded {
                outstanding: 3,
                limit: 3
            }
        ));
        drop(permits);
        assert_eq!(limiter.outstanding(), 0);
    }

    #[test]
    fn test_release_admits_exactly_one_more() {
        let limiter = WriteLimiter::new(2);
        let first = limiter.try_acquire().unwrap();
        let _second = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_err());

        drop(first);
        let _third = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_err());
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let limiter = WriteLimiter::new(50);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..100)
                        .filter_map(|_| limiter.try_acquire().ok())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let held: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(held.len(), 50);
        assert_eq!(limiter.outstanding(), 50);
    }

    #[test]
    fn test_set_limit() {
        let limiter = WriteLimiter::default();
        assert_eq!(limiter.limit(), DEFAULT_WRITE_LIMIT);
        limiter.set_limit(1);
        let _p = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().unwrap_err().is_overloaded());
    }
}
