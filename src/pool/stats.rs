//! File handle pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked by the file handle pool.
///
/// All fields are atomic for lock-free, thread-safe updates. I/O counters
/// are bumped by borrowed handles outside the pool lock.
///
/// We use `Ordering::Relaxed` throughout: counters are independent and
/// only read for display.
///
/// # Example
/// ```
/// use pagevault::PoolStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = PoolStats::new();
/// stats.hits.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
/// ```
#[derive(Debug)]
pub struct PoolStats {
    /// Borrows served by an already open handle.
    pub hits: AtomicU64,

    /// Borrows that had to open the file.
    pub opens: AtomicU64,

    /// Idle handles closed to make room for another file.
    pub evictions: AtomicU64,

    /// Transient handles opened beyond capacity because every handle was borrowed.
    pub overflow_opens: AtomicU64,

    /// Bytes read through borrowed handles.
    pub bytes_read: AtomicU64,

    /// Bytes written through borrowed handles.
    pub bytes_written: AtomicU64,
}

impl PoolStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            overflow_opens: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Fraction of borrows served without opening a file (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Get a non-atomic copy for display/logging.
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            overflow_opens: self.overflow_opens.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.opens.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.overflow_opens.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    pub hits: u64,
    pub opens: u64,
    pub evictions: u64,
    pub overflow_opens: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl PoolStatsSnapshot {
    /// Fraction of borrows served without opening a file (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.opens;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for PoolStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStats {{ hits: {}, opens: {}, evictions: {}, overflow: {}, read: {}B, written: {}B, hit_rate: {:.2}% }}",
            self.hits,
            self.opens,
            self.evictions,
            self.overflow_opens,
            self.bytes_read,
            self.bytes_written,
            self.hit_rate() * 100.0
        )
    }
}
