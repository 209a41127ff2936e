use std::slice;

/// A borrowed, restartable view over the entries of a snapshot.
///
/// Iterating a sequence never touches guest memory and never changes the
/// snapshot it was taken from. Every call to [`iter`] starts over from the
/// first entry.
///
/// [`iter`]: Self::iter
#[derive(Debug)]
pub struct Sequence<'s, T> {
    items: &'s [T],
}

impl<T> Clone for Sequence<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Sequence<'_, T> {}

impl<'s, T> Sequence<'s, T> {
    pub(crate) fn new(items: &'s [T]) -> Self {
        Self { items }
    }

    /// Returns an iterator over the entries.
    pub fn iter(&self) -> slice::Iter<'s, T> {
        self.items.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Checks whether the sequence has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Option<&'s T> {
        self.items.get(index)
    }

    /// Returns the entries as a slice.
    pub fn as_slice(&self) -> &'s [T] {
        self.items
    }
}

impl<'s, T> IntoIterator for Sequence<'s, T> {
    type Item = &'s T;
    type IntoIter = slice::Iter<'s, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'s, T> IntoIterator for &Sequence<'s, T> {
    type Item = &'s T;
    type IntoIter = slice::Iter<'s, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_restarts() {
        let storage = vec![1, 2, 3];
        let sequence = Sequence::new(&storage);

        let first: Vec<_> = sequence.iter().copied().collect();
        let second: Vec<_> = sequence.into_iter().copied().collect();
        assert_eq!(first, second);
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.get(1), Some(&2));
        assert_eq!(sequence.get(3), None);
    }

    #[test]
    fn empty_sequence() {
        let storage: Vec<u32> = Vec::new();
        let sequence = Sequence::new(&storage);
        assert!(sequence.is_empty());
        assert_eq!(sequence.iter().next(), None);
    }
}
