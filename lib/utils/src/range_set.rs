use alloc::vec::Vec;
use core::ops::Range;

/// A set of disjoint, non-empty, sorted half-open address ranges.
///
/// Adjacent or overlapping ranges are merged on [SortedRangeSet::add];
/// [SortedRangeSet::sub] may split one range into two.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedRangeSet {
    inner: Vec<Range<u64>>,
}

impl SortedRangeSet {
    pub const fn new() -> SortedRangeSet {
        SortedRangeSet { inner: Vec::new() }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Range<u64>> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn combine(&mut self) {
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.inner.len());
        for current in self.inner.drain(..) {
            if current.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.end >= current.start => {
                    last.end = last.end.max(current.end);
                }
                _ => merged.push(current),
            }
        }
        self.inner = merged;
    }

    pub fn add(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let at = self.inner.partition_point(|r| r.start <= range.start);
        self.inner.insert(at, range);
        self.combine();
    }

    pub fn sub(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let mut res = Vec::with_capacity(self.inner.len() + 1);
        for current in self.inner.drain(..) {
            if current.end <= range.start || current.start >= range.end {
                res.push(current);
                continue;
            }
            // [      ]
            //   [  ]
            if current.start < range.start {
                res.push(current.start..range.start);
            }
            if current.end > range.end {
                res.push(range.end..current.end);
            }
        }
        self.inner = res;
    }

    /// Whether `range` lies entirely inside one member range.
    pub fn contains(&self, range: &Range<u64>) -> bool {
        self.inner
            .iter()
            .any(|r| r.start <= range.start && range.end <= r.end)
    }

    /// Length of the largest member range, 0 when empty.
    pub fn largest(&self) -> u64 {
        self.inner
            .iter()
            .map(|r| r.end - r.start)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_add_merges() {
        let mut set = SortedRangeSet::new();
        set.add(0x30..0x40);
        set.add(0x0..0x10);
        set.add(0x10..0x20);
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![0x0..0x20, 0x30..0x40]);
    }

    #[test]
    fn test_sub_splits() {
        let mut set = SortedRangeSet::new();
        set.add(0x0..0x100);
        set.sub(0x40..0x80);
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![0x0..0x40, 0x80..0x100]);
        assert!(set.contains(&(0x80..0x100)));
        assert!(!set.contains(&(0x30..0x50)));
        assert_eq!(set.largest(), 0x80);
        set.sub(0x0..0x100);
        assert!(set.is_empty());
    }
}
