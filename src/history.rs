//! Fixed-capacity circular history keyed by a monotone global index (spec §3, §4.2.1).
//!
//! Global indices never wrap: only the storage does. `find(i)` is defined
//! for `oldest_i <= i <= newest_i`; inserting past capacity silently
//! overwrites the oldest stored item, exactly like the C `sync_hist`
//! structure it mirrors.

#[derive(Clone, Debug)]
pub struct History<T> {
    buffer: Vec<Option<T>>,
    capacity: usize,
    item_count: usize,
    oldest_i: u64,
    newest_i: u64,
}

impl<T: Copy> History<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        History {
            buffer: vec![None; capacity],
            capacity,
            item_count: 0,
            oldest_i: 0,
            newest_i: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn oldest_i(&self) -> u64 {
        self.oldest_i
    }

    pub fn newest_i(&self) -> u64 {
        self.newest_i
    }

    fn slot(&self, i: u64) -> usize {
        (i as usize) % self.capacity
    }

    /// Insert `item` at global index `i`. `i` must be `newest_i + 1` (or any
    /// value on the first insertion); out-of-order insertion is a caller bug
    /// since stamps are required to arrive with strictly increasing index.
    pub fn add(&mut self, i: u64, item: T) {
        let slot = self.slot(i);
        self.buffer[slot] = Some(item);

        if self.item_count == 0 {
            self.oldest_i = i;
            self.item_count = 1;
        } else if self.item_count == self.capacity {
            // full: oldest slot was just overwritten, window slides forward
            self.oldest_i += 1;
        } else {
            self.item_count += 1;
        }
        self.newest_i = i;
    }

    pub fn find(&self, i: u64) -> Option<T> {
        if self.item_count == 0 || i < self.oldest_i || i > self.newest_i {
            return None;
        }
        self.buffer[self.slot(i)]
    }

    /// Grow or shrink the backing storage, preserving the mapping from
    /// global index to value for whatever suffix still fits.
    pub fn resize(&mut self, new_capacity: usize) {
        assert!(new_capacity > 0);
        let mut items: Vec<(u64, T)> = (self.oldest_i..=self.newest_i)
            .filter_map(|i| self.find(i).map(|v| (i, v)))
            .collect();
        if items.len() > new_capacity {
            items.drain(0..items.len() - new_capacity);
        }

        self.buffer = vec![None; new_capacity];
        self.capacity = new_capacity;
        self.item_count = 0;
        self.oldest_i = 0;
        self.newest_i = 0;
        for (i, v) in items {
            self.add(i, v);
        }
    }
}

impl<T: Copy + PartialOrd> History<T> {
    /// Index of the minimum value over the inclusive global-index range
    /// `[j, i]`. Both bounds are clamped to the stored range.
    pub fn min_index(&self, j: u64, i: u64) -> Option<u64> {
        let lo = j.max(self.oldest_i);
        let hi = i.min(self.newest_i);
        if lo > hi {
            return None;
        }
        (lo..=hi)
            .filter_map(|idx| self.find(idx).map(|v| (idx, v)))
            .fold(None, |acc: Option<(u64, T)>, (idx, v)| match acc {
                Some((_, best)) if best <= v => acc,
                _ => Some((idx, v)),
            })
            .map(|(idx, _)| idx)
    }

    /// Value of the minimum over `[j, i]`.
    pub fn min(&self, j: u64, i: u64) -> Option<T> {
        self.min_index(j, i).and_then(|idx| self.find(idx))
    }

    /// Sliding-minimum update: given the previous minimum value over a
    /// window that has now advanced to `[j, i]`, recompute cheaply when the
    /// previous minimum has fallen out of range, otherwise compare against
    /// just the newly admitted sample at `i`.
    pub fn min_slide(&self, min_curr: T, prev_j: u64, j: u64, i: u64) -> Option<T> {
        if prev_j == j {
            // Window only grew on the right: compare against the new tail.
            let tail = self.find(i)?;
            return Some(if tail < min_curr { tail } else { min_curr });
        }
        // Window's left edge advanced: the old minimum may have expired.
        self.min(j, i)
    }
}

/// Overwrite the last `count` entries (ending at global index `end_i`, working
/// backwards) with `value`. Used by the RTT upward-shift rewrite of §4.3.2.
impl<T: Copy> History<T> {
    pub fn rewrite_tail(&mut self, end_i: u64, count: u64, value: T) {
        let start = end_i.saturating_sub(count.saturating_sub(1)).max(self.oldest_i);
        for i in start..=end_i.min(self.newest_i) {
            let slot = self.slot(i);
            if self.buffer[slot].is_some() {
                self.buffer[slot] = Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_respects_bounds() {
        let mut h: History<u64> = History::new(4);
        for i in 0..4 {
            h.add(i, i * 10);
        }
        assert_eq!(h.find(0), Some(0));
        assert_eq!(h.find(3), Some(30));
        assert_eq!(h.find(4), None);
    }

    #[test]
    fn wraps_on_overflow() {
        let mut h: History<u64> = History::new(3);
        for i in 0..5 {
            h.add(i, i);
        }
        assert_eq!(h.oldest_i(), 2);
        assert_eq!(h.newest_i(), 4);
        assert_eq!(h.find(0), None);
        assert_eq!(h.find(2), Some(2));
        assert_eq!(h.find(4), Some(4));
    }

    #[test]
    fn min_over_range() {
        let mut h: History<u64> = History::new(8);
        let vals = [9u64, 3, 7, 1, 5, 8, 2, 6];
        for (i, v) in vals.iter().enumerate() {
            h.add(i as u64, *v);
        }
        assert_eq!(h.min(0, 7), Some(1));
        assert_eq!(h.min_index(0, 7), Some(3));
        assert_eq!(h.min(4, 7), Some(2));
    }

    #[test]
    fn resize_preserves_mapping() {
        let mut h: History<u64> = History::new(4);
        for i in 0..4 {
            h.add(i, i * 100);
        }
        h.resize(8);
        assert_eq!(h.find(0), Some(0));
        assert_eq!(h.find(3), Some(300));
        h.add(4, 400);
        assert_eq!(h.find(4), Some(400));
    }
}
