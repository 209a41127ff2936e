use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Gfn, Pa};

/// The levels in the page table hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PageTableLevel {
    /// Page Table (PT) - the lowest level, pointing directly to 4KB pages.
    Pt,

    /// Page Directory (PD) - can point to PTs or 2MB large pages.
    Pd,

    /// Page Directory Pointer Table (PDPT) - can point to PDs or 1GB large
    /// pages.
    Pdpt,

    /// Page Map Level 4 (PML4) - the highest level in 4-level paging.
    Pml4,
}

impl PageTableLevel {
    /// Returns the next lower level in the page table hierarchy.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pt => None,
            Self::Pd => Some(Self::Pt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pml4 => Some(Self::Pdpt),
        }
    }

    /// Returns the next higher level in the page table hierarchy.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Pt => Some(Self::Pd),
            Self::Pd => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pml4),
            Self::Pml4 => None,
        }
    }

    /// Returns the number of address bits mapped by an entry at this level.
    pub fn shift(self) -> u64 {
        match self {
            Self::Pt => 12,
            Self::Pd => 21,
            Self::Pdpt => 30,
            Self::Pml4 => 39,
        }
    }

    /// Returns `true` if an entry at this level may map a large page.
    ///
    /// The large bit of a PML4 entry is reserved and never terminates a walk.
    pub fn supports_large_pages(self) -> bool {
        matches!(self, Self::Pd | Self::Pdpt)
    }
}

/// A page table entry in the paging structures.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageTableEntry(pub u64);

impl PageTableEntry {
    /// Bits 12..52 of an entry, the physical frame it points to.
    pub const ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

    /// Checks if the page is present in physical memory.
    pub fn present(self) -> bool {
        self.0 & 1 != 0
    }

    /// Checks if the page is writable.
    pub fn write(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }

    /// Checks if the page is accessible in user mode.
    pub fn user(self) -> bool {
        (self.0 >> 2) & 1 != 0
    }

    /// Checks if this entry refers to a large page.
    pub fn large(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }

    /// Extracts the page frame number from the entry.
    pub fn pfn(self) -> Gfn {
        Gfn::new((self.0 & Self::ADDRESS_MASK) >> 12)
    }

    /// Returns the physical base of the page mapped by this entry when it is
    /// the last entry of a walk at `level`.
    ///
    /// For large pages the low frame bits hold the PAT flag and are not part
    /// of the address.
    pub fn page_base(self, level: PageTableLevel) -> Pa {
        let size_mask = (1u64 << level.shift()) - 1;
        Pa(self.0 & Self::ADDRESS_MASK & !size_mask)
    }
}

impl std::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("present", &self.present())
            .field("write", &self.write())
            .field("user", &self.user())
            .field("large", &self.large())
            .field("pfn", &self.pfn())
            .finish()
    }
}
