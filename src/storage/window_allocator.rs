//! Byte Window Allocator - maps pages to byte ranges of a bounded session file.
//!
//! The [`WindowAllocator`] treats a session's data file as a ring buffer of
//! `max_bytes` bytes. New pages are placed at the write cursor; when a page
//! does not fit before the end, the cursor wraps to offset 0. Whatever was
//! stored in the claimed range is evicted, so the oldest pages are
//! sacrificed first.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::common::{Error, PageId, Result};

/// The byte range holding one page's serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub page_id: PageId,
    pub offset: u64,
    pub length: u64,
}

impl Window {
    /// One past the last byte of the window.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Whether this window shares at least one byte with `[start, end)`.
    #[inline]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.offset < end && start < self.end()
    }
}

/// Serializable state of one allocator, as written to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    pub max_bytes: u64,
    pub next_offset: u64,
    pub windows: Vec<Window>,
}

/// Ring-buffer allocator for one session.
///
/// # Layout
/// ```text
///  0                                                     max_bytes
///  ├──────────┬───────────────┬──────────┬───────────────┤
///  │ Page 9   │    Page 4     │  (free)  │    Page 7     │
///  └──────────┴───────────────┴──────────┴───────────────┘
///                             ▲
///                        next_offset
/// ```
///
/// # Invariants
/// - Live windows never overlap and all lie within `[0, max_bytes)`.
/// - `next_offset` is the end of the most recently allocated window.
/// - At most one live window per page id.
#[derive(Debug)]
pub struct WindowAllocator {
    max_bytes: u64,
    next_offset: u64,

    /// Live windows keyed by offset.
    by_offset: BTreeMap<u64, Window>,

    /// Page id -> offset of its live window.
    by_page: HashMap<PageId, u64>,
}

impl WindowAllocator {
    /// Create an empty allocator for a file of at most `max_bytes` bytes.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            next_offset: 0,
            by_offset: BTreeMap::new(),
            by_page: HashMap::new(),
        }
    }

    /// Claim a window of `length` bytes for `page_id`.
    ///
    /// A previous window of the same page is dropped first. Windows that
    /// intersect the claimed range are evicted and returned alongside the
    /// new window, oldest placement first.
    ///
    /// # Errors
    /// - `Error::OversizedPage` if `length > max_bytes`
    /// - `Error::EmptyPage` if `length == 0`
    pub fn allocate(&mut self, page_id: PageId, length: u64) -> Result<(Window, Vec<Window>)> {
        if length == 0 {
            return Err(Error::EmptyPage(page_id));
        }
        if length > self.max_bytes {
            return Err(Error::OversizedPage {
                page_id,
                size: length,
                max: self.max_bytes,
            });
        }

        self.free(page_id);

        let start = if self.next_offset + length > self.max_bytes {
            0
        } else {
            self.next_offset
        };
        let end = start + length;

        // Windows are disjoint and sorted, so walking back from `end` finds
        // every overlapping one before the first that ends at or before `start`.
        let victims: Vec<u64> = self
            .by_offset
            .range(..end)
            .rev()
            .take_while(|(_, w)| w.end() > start)
            .map(|(&offset, _)| offset)
            .collect();

        let mut evicted = Vec::with_capacity(victims.len());
        for offset in victims.into_iter().rev() {
            if let Some(window) = self.by_offset.remove(&offset) {
                self.by_page.remove(&window.page_id);
                evicted.push(window);
            }
        }

        let window = Window {
            page_id,
            offset: start,
            length,
        };
        self.by_offset.insert(start, window);
        self.by_page.insert(page_id, start);
        self.next_offset = end;

        Ok((window, evicted))
    }

    /// Find the live window of a page.
    ///
    /// Unknown and evicted pages look the same: None.
    pub fn lookup(&self, page_id: PageId) -> Option<Window> {
        let offset = self.by_page.get(&page_id)?;
        self.by_offset.get(offset).copied()
    }

    /// Forget a page's window.
    ///
    /// The bytes stay where they are until a later allocation wraps over them.
    pub fn free(&mut self, page_id: PageId) -> Option<Window> {
        let offset = self.by_page.remove(&page_id)?;
        self.by_offset.remove(&offset)
    }

    /// Capacity of the session file.
    #[inline]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Where the next window will be placed if it fits before the end.
    #[inline]
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Sum of live window lengths.
    pub fn live_bytes(&self) -> u64 {
        self.by_offset.values().map(|w| w.length).sum()
    }

    /// Number of live windows.
    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    /// Live windows in file order.
    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.by_offset.values()
    }

    /// Capture the allocator state for the index.
    pub fn snapshot(&self) -> AllocatorSnapshot {
        AllocatorSnapshot {
            max_bytes: self.max_bytes,
            next_offset: self.next_offset,
            windows: self.by_offset.values().copied().collect(),
        }
    }

    /// Rebuild an allocator from an index snapshot.
    ///
    /// # Errors
    /// Returns `Error::IndexCorrupt` if the snapshot breaks any invariant.
    pub fn restore(snapshot: &AllocatorSnapshot) -> Result<Self> {
        if snapshot.max_bytes == 0 || snapshot.next_offset > snapshot.max_bytes {
            return Err(Error::IndexCorrupt(format!(
                "cursor {} outside capacity {}",
                snapshot.next_offset, snapshot.max_bytes
            )));
        }

        let mut allocator = Self::new(snapshot.max_bytes);
        allocator.next_offset = snapshot.next_offset;

        let mut sorted = snapshot.windows.clone();
        sorted.sort_by_key(|w| w.offset);

        let mut prev_end = 0;
        for window in sorted {
            if window.length == 0
                || window.offset < prev_end
                || window.end() > snapshot.max_bytes
            {
                return Err(Error::IndexCorrupt(format!(
                    "window {:?} overlaps or exceeds capacity",
                    window
                )));
            }
            if allocator.by_page.insert(window.page_id, window.offset).is_some() {
                return Err(Error::IndexCorrupt(format!(
                    "{} has more than one window",
                    window.page_id
                )));
            }
            allocator.by_offset.insert(window.offset, window);
            prev_end = window.end();
        }

        Ok(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid(id: u32) -> PageId {
        PageId::new(id)
    }

    #[test]
    fn test_sequential_allocation() {
        let mut alloc = WindowAllocator::new(100);

        let (w1, ev) = alloc.allocate(pid(1), 30).unwrap();
        assert!(ev.is_empty());
        assert_eq!((w1.offset, w1.length), (0, 30));

        let (w2, _) = alloc.allocate(pid(2), 40).unwrap();
        assert_eq!((w2.offset, w2.length), (30, 40));
        assert_eq!(alloc.next_offset(), 70);
        assert_eq!(alloc.live_bytes(), 70);
    }

    #[test]
    fn test_wrap_evicts_overlapping() {
        // 60 + 50 > 100: page 1 is sacrificed, page 2 lands at 0.
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 60).unwrap();

        let (w2, evicted) = alloc.allocate(pid(2), 50).unwrap();

        assert_eq!((w2.offset, w2.length), (0, 50));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].page_id, pid(1));
        assert_eq!(alloc.lookup(pid(1)), None);
        assert_eq!(alloc.lookup(pid(2)), Some(w2));
    }

    #[test]
    fn test_wrap_keeps_non_overlapping() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 20).unwrap(); // 0..20
        alloc.allocate(pid(2), 30).unwrap(); // 20..50
        alloc.allocate(pid(3), 40).unwrap(); // 50..90

        let (w4, evicted) = alloc.allocate(pid(4), 25).unwrap(); // wraps: 0..25

        assert_eq!(w4.offset, 0);
        let ids: Vec<PageId> = evicted.iter().map(|w| w.page_id).collect();
        assert_eq!(ids, vec![pid(1), pid(2)]);
        assert!(alloc.lookup(pid(3)).is_some());
        assert_eq!(alloc.next_offset(), 25);
    }

    #[test]
    fn test_exact_fit_does_not_wrap() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 50).unwrap();
        let (w2, evicted) = alloc.allocate(pid(2), 50).unwrap();

        assert_eq!(w2.offset, 50);
        assert!(evicted.is_empty());
        assert_eq!(alloc.live_bytes(), 100);
    }

    #[test]
    fn test_reallocate_same_page_replaces_window() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 10).unwrap();
        let (w, evicted) = alloc.allocate(pid(1), 20).unwrap();

        assert!(evicted.is_empty());
        assert_eq!((w.offset, w.length), (10, 20));
        assert_eq!(alloc.len(), 1);
        assert_eq!(alloc.lookup(pid(1)), Some(w));
    }

    #[test]
    fn test_oversized_rejected() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 10).unwrap();

        let result = alloc.allocate(pid(2), 101);
        assert!(matches!(
            result,
            Err(Error::OversizedPage { size: 101, max: 100, .. })
        ));
        // Nothing else was disturbed.
        assert!(alloc.lookup(pid(1)).is_some());
        assert_eq!(alloc.next_offset(), 10);
    }

    #[test]
    fn test_empty_rejected() {
        let mut alloc = WindowAllocator::new(100);
        assert!(matches!(alloc.allocate(pid(1), 0), Err(Error::EmptyPage(_))));
    }

    #[test]
    fn test_free_leaves_slack() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 40).unwrap();
        alloc.allocate(pid(2), 40).unwrap();

        let freed = alloc.free(pid(1)).unwrap();
        assert_eq!(freed.offset, 0);
        assert_eq!(alloc.lookup(pid(1)), None);
        assert_eq!(alloc.free(pid(1)), None);

        // The cursor did not move back: the next page still wraps.
        let (w3, evicted) = alloc.allocate(pid(3), 30).unwrap();
        assert_eq!(w3.offset, 0);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut alloc = WindowAllocator::new(100);
        alloc.allocate(pid(1), 30).unwrap();
        alloc.allocate(pid(2), 30).unwrap();

        let restored = WindowAllocator::restore(&alloc.snapshot()).unwrap();

        assert_eq!(restored.next_offset(), 60);
        assert_eq!(restored.lookup(pid(2)), alloc.lookup(pid(2)));
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_restore_rejects_overlap() {
        let snapshot = AllocatorSnapshot {
            max_bytes: 100,
            next_offset: 50,
            windows: vec![
                Window { page_id: pid(1), offset: 0, length: 30 },
                Window { page_id: pid(2), offset: 20, length: 30 },
            ],
        };
        assert!(matches!(
            WindowAllocator::restore(&snapshot),
            Err(Error::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_restore_rejects_out_of_bounds() {
        let snapshot = AllocatorSnapshot {
            max_bytes: 100,
            next_offset: 120,
            windows: vec![Window { page_id: pid(1), offset: 90, length: 30 }],
        };
        assert!(WindowAllocator::restore(&snapshot).is_err());
    }

    proptest! {
        #[test]
        fn prop_windows_stay_bounded_and_disjoint(
            max in 1u64..512,
            ops in prop::collection::vec((0u32..16, 1u64..600), 1..64),
        ) {
            let mut alloc = WindowAllocator::new(max);

            for (id, len) in ops {
                match alloc.allocate(pid(id), len) {
                    Ok((w, _)) => {
                        prop_assert!(w.end() <= max);
                        prop_assert_eq!(alloc.next_offset(), w.end());
                        prop_assert_eq!(alloc.lookup(pid(id)), Some(w));
                    }
                    Err(Error::OversizedPage { .. }) => prop_assert!(len > max),
                    Err(e) => return Err(TestCaseError::fail(format!("unexpected {}", e))),
                }

                prop_assert!(alloc.live_bytes() <= max);
                let mut prev_end = 0;
                for w in alloc.windows() {
                    prop_assert!(w.offset >= prev_end);
                    prev_end = w.end();
                }
                prop_assert!(prev_end <= max);
            }
        }
    }
}
