use alloc::vec::Vec;

/// A lazily populated child list. The tag says whether the list has been read from the
/// enumeration service; the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection<T> {
    /// Not read yet, or invalidated by a refresh. `retained` keeps the entries a refresh
    /// found unchanged so the next population hands out the same ids.
    Unpopulated { retained: Vec<T> },
    Populated(Vec<T>),
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection::Unpopulated {
            retained: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> Collection<T> {
    pub fn is_populated(&self) -> bool {
        matches!(self, Collection::Populated(_))
    }

    /// Cached entries, `None` until populated.
    pub fn get(&self) -> Option<&[T]> {
        match self {
            Collection::Populated(items) => Some(items),
            Collection::Unpopulated { .. } => None,
        }
    }

    /// Every entry held, populated or retained.
    pub fn entries(&self) -> &[T] {
        match self {
            Collection::Populated(items) => items,
            Collection::Unpopulated { retained } => retained,
        }
    }

    pub fn retained(&self) -> &[T] {
        match self {
            Collection::Populated(_) => &[],
            Collection::Unpopulated { retained } => retained,
        }
    }

    pub fn fill(&mut self, items: Vec<T>) {
        *self = Collection::Populated(items);
    }

    /// Drop the populated tag, keeping the entries `keep` accepts for reuse.
    pub fn invalidate(&mut self, keep: impl Fn(&T) -> bool) {
        let retained = self.entries().iter().filter(|t| keep(t)).cloned().collect();
        *self = Collection::Unpopulated { retained };
    }

    /// Append to a populated collection, or to the retained set otherwise.
    pub fn push(&mut self, item: T) {
        match self {
            Collection::Populated(items) => items.push(item),
            Collection::Unpopulated { retained } => retained.push(item),
        }
    }

    pub fn remove(&mut self, item: &T) {
        match self {
            Collection::Populated(items) => items.retain(|t| t != item),
            Collection::Unpopulated { retained } => retained.retain(|t| t != item),
        }
    }
}
