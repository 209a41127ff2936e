use serde::{Deserialize, Serialize};

use super::macros::impl_ops;

impl_ops!(Gfn, u64, "Guest Frame Number");
impl_ops!(Pa, u64, "Guest Physical Address");
impl_ops!(Va, u64, "Guest Virtual Address");

impl Va {
    /// Checks if the virtual address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// The mechanism used for translating addresses to physical addresses.
///
/// Kernel-context accesses in winvmi address guest physical memory directly,
/// while process-context accesses go through the page tables rooted at the
/// process directory base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TranslationMechanism {
    /// Direct mapping (no translation).
    ///
    /// In this mode, the provided address is treated as a physical address.
    Direct,

    /// Paging-based translation.
    ///
    /// The address is a virtual address, translated through the paging
    /// structures rooted at `root`.
    Paging {
        /// The root of the paging structure (the directory base).
        root: Pa,
    },
}

/// Defines the context for memory access operations.
///
/// Pairs an address with the mechanism that resolves it to guest physical
/// memory. It's the input of every read and write of [`VmiCore`].
///
/// [`VmiCore`]: crate::VmiCore
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessContext {
    /// The address to access.
    ///
    /// Depending on the [`mechanism`] field, this could be interpreted
    /// as either a virtual address or a physical address.
    ///
    /// [`mechanism`]: Self::mechanism
    pub address: u64,

    /// The mechanism used for address translation.
    pub mechanism: TranslationMechanism,
}

impl AccessContext {
    /// Creates a new `AccessContext` with direct mapping.
    pub fn direct(address: impl Into<Pa>) -> Self {
        Self {
            address: u64::from(address.into()),
            mechanism: TranslationMechanism::Direct,
        }
    }

    /// Creates a new `AccessContext` with paging-based translation.
    pub fn paging(address: impl Into<Va>, root: impl Into<Pa>) -> Self {
        Self {
            address: address.into().0,
            mechanism: TranslationMechanism::Paging { root: root.into() },
        }
    }

    /// Returns a copy of this context moved forward by `offset` bytes.
    ///
    /// The addition wraps, so a malformed guest pointer cannot overflow.
    pub fn offset(self, offset: u64) -> Self {
        Self {
            address: self.address.wrapping_add(offset),
            ..self
        }
    }
}

impl From<Pa> for AccessContext {
    fn from(value: Pa) -> Self {
        Self::direct(value)
    }
}

impl From<(Va, Pa)> for AccessContext {
    fn from(value: (Va, Pa)) -> Self {
        Self::paging(value.0, value.1)
    }
}

impl ::std::ops::Add<u64> for AccessContext {
    type Output = AccessContext;

    fn add(self, rhs: u64) -> Self::Output {
        self.offset(rhs)
    }
}

impl ::std::ops::AddAssign<u64> for AccessContext {
    fn add_assign(&mut self, rhs: u64) {
        self.address = self.address.wrapping_add(rhs);
    }
}

impl ::std::fmt::Display for AccessContext {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match self.mechanism {
            TranslationMechanism::Direct => write!(f, "{}", Pa(self.address)),
            TranslationMechanism::Paging { root } => {
                write!(f, "{} @ {}", Va(self.address), root)
            }
        }
    }
}
