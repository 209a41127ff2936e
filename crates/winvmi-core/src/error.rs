use crate::{Pa, Va};

/// An error that can occur when working with the VMI.
#[derive(thiserror::Error, Debug)]
pub enum VmiError {
    /// A virtual address could not be translated.
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// The backend completed fewer bytes than requested.
    ///
    /// A short transfer is never returned as a partial value.
    #[error("Short transfer ({transferred} of {requested} bytes)")]
    ShortTransfer {
        /// Number of bytes requested.
        requested: usize,

        /// Number of bytes actually transferred.
        transferred: usize,
    },

    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[source] std::io::Error),

    /// An error occurred in the VMI driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// An OS-specific error occurred.
    #[error(transparent)]
    Os(Box<dyn std::error::Error + Send + Sync>),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The given address has invalid width.
    #[error("Invalid address width")]
    InvalidAddressWidth,

    /// Operation not supported.
    #[error("Operation not supported.")]
    NotSupported,

    /// Out of bounds.
    #[error("Out of bounds")]
    OutOfBounds,
}

/// An error that occurred while walking the paging structures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationError {
    /// A paging structure entry on the translation path is not present.
    #[error("Page not present ({})", .0)]
    Unmapped(PageFault),

    /// The paging root is not a usable physical address.
    #[error("Invalid paging root {0}")]
    InvalidRoot(Pa),

    /// The virtual address is not canonical.
    #[error("Invalid virtual address {0}")]
    InvalidAddress(Va),
}

/// A page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageFault {
    /// The virtual address that caused the page fault.
    pub address: Va,

    /// The root of the page table hierarchy.
    pub root: Pa,
}

impl std::fmt::Display for PageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.address, self.root)
    }
}

impl From<(Va, Pa)> for PageFault {
    fn from((address, root): (Va, Pa)) -> Self {
        Self { address, root }
    }
}

impl VmiError {
    /// Creates a new page fault error.
    pub fn page_fault(pf: impl Into<PageFault>) -> Self {
        Self::Translation(TranslationError::Unmapped(pf.into()))
    }

    /// Returns the page fault, if this error was caused by one.
    pub fn as_page_fault(&self) -> Option<&PageFault> {
        match self {
            Self::Translation(TranslationError::Unmapped(pf)) => Some(pf),
            _ => None,
        }
    }
}
