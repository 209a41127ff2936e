use smallvec::SmallVec;

use super::{PageTableEntry, PageTableLevel};
use crate::{Pa, VmiError};

/// A single entry in the page table hierarchy visited during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// The level of the page table hierarchy this entry belongs to.
    pub level: PageTableLevel,

    /// The raw page table entry.
    pub entry: PageTableEntry,

    /// The physical address where this entry is located in memory.
    pub entry_address: Pa,
}

impl TranslationEntry {
    /// Checks if the entry terminates the walk with a mapped page.
    pub fn is_leaf(&self) -> bool {
        self.entry.present()
            && (self.level == PageTableLevel::Pt
                || (self.level.supports_large_pages() && self.entry.large()))
    }
}

/// Collection of translation entries, typically used in page table walks.
pub type TranslationEntries = SmallVec<[TranslationEntry; 4]>;

/// The record of a page table walk.
///
/// Unlike [`Amd64::translate_address`], which stops at the first problem,
/// this keeps every entry read so far together with the outcome.
///
/// [`Amd64::translate_address`]: crate::Amd64
#[derive(Debug)]
pub struct VaTranslation {
    pub(super) entries: TranslationEntries,
    pub(super) result: Result<Pa, VmiError>,
}

impl VaTranslation {
    /// Returns the page table entries traversed during the walk.
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Consumes the `VaTranslation` and returns the `TranslationEntries`.
    pub fn into_entries(self) -> TranslationEntries {
        self.entries
    }

    /// Returns the physical address, if the walk succeeded.
    pub fn pa(&self) -> Option<Pa> {
        self.result.as_ref().ok().copied()
    }

    /// Returns the outcome of the walk.
    pub fn result(&self) -> Result<Pa, &VmiError> {
        self.result.as_ref().copied()
    }

    /// Returns the deepest level reached.
    pub fn last_level(&self) -> Option<PageTableLevel> {
        self.entries.last().map(|entry| entry.level)
    }

    /// Checks if all page table entries in the translation path are writable.
    pub fn write(&self) -> bool {
        self.entries.iter().all(|entry| entry.entry.write())
    }

    /// Checks if all page table entries in the translation path are user
    /// accessible.
    pub fn user(&self) -> bool {
        self.entries.iter().all(|entry| entry.entry.user())
    }
}

impl IntoIterator for VaTranslation {
    type Item = TranslationEntry;
    type IntoIter = <TranslationEntries as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
