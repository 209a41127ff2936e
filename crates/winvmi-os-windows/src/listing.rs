use crate::Sequence;

/// Result of a tolerant enumeration.
///
/// Holds every entry collected before the walk stopped, together with the
/// reason it stopped early, if any.
#[derive(Debug, Clone)]
pub struct Listing<T, F> {
    pub(crate) entries: Vec<T>,
    pub(crate) fault: Option<F>,
}

impl<T, F> Listing<T, F> {
    /// Creates a complete listing.
    pub fn complete(entries: Vec<T>) -> Self {
        Self {
            entries,
            fault: None,
        }
    }

    /// Creates a listing that stopped early with `fault`.
    pub fn partial(entries: Vec<T>, fault: F) -> Self {
        Self {
            entries,
            fault: Some(fault),
        }
    }

    /// Returns the collected entries.
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Consumes the listing and returns the collected entries.
    pub fn into_entries(self) -> Vec<T> {
        self.entries
    }

    /// Returns a sequence over the collected entries.
    pub fn sequence(&self) -> Sequence<'_, T> {
        Sequence::new(&self.entries)
    }

    /// Returns the reason the walk stopped early.
    pub fn fault(&self) -> Option<&F> {
        self.fault.as_ref()
    }

    /// Checks whether the walk reached the end of the list.
    pub fn is_complete(&self) -> bool {
        self.fault.is_none()
    }

    /// Maps the entries, keeping the fault.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U, F> {
        Listing {
            entries: self.entries.into_iter().map(f).collect(),
            fault: self.fault,
        }
    }
}
