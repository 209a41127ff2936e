//! AMD64 architecture definitions.
//!
//! Implements 4-level paging translation over any [`VmiDriver`].

mod address;
mod paging;
mod translation;

use winvmi_core::{
    AccessContext, Architecture, Gfn, Pa, TranslationError, Va, VmiCore, VmiDriver, VmiError,
};

pub use self::{
    paging::{PageTableEntry, PageTableLevel},
    translation::{TranslationEntries, TranslationEntry, VaTranslation},
};

/// AMD64 architecture.
#[derive(Debug)]
pub struct Amd64;

impl Architecture for Amd64 {
    const PAGE_SIZE: u64 = 0x1000;
    const PAGE_SHIFT: u64 = 12;
    const PAGE_MASK: u64 = 0xFFFFFFFFFFFFF000;

    type PageTableLevel = PageTableLevel;

    fn gfn_from_pa(pa: Pa) -> Gfn {
        Gfn(pa.0 >> Self::PAGE_SHIFT)
    }

    fn pa_from_gfn(gfn: Gfn) -> Pa {
        Pa(gfn.0 << Self::PAGE_SHIFT)
    }

    fn pa_offset(pa: Pa) -> u64 {
        pa.0 & !Self::PAGE_MASK
    }

    fn va_offset(va: Va) -> u64 {
        Self::va_offset_for(va, PageTableLevel::Pt)
    }

    fn va_offset_for(va: Va, level: Self::PageTableLevel) -> u64 {
        match level {
            // 4KB page (4 * 1024 - 1).
            PageTableLevel::Pt => va.0 & 0xfff,

            // 2MB page (2 * 1024 * 1024 - 1).
            PageTableLevel::Pd => va.0 & 0x1fffff,

            // 1GB page (1024 * 1024 * 1024 - 1).
            PageTableLevel::Pdpt => va.0 & 0x3fffffff,

            // 512GB page (512 * 1024 * 1024 * 1024 - 1).
            PageTableLevel::Pml4 => va.0 & 0x7fffffffff,
        }
    }

    fn va_index_for(va: Va, level: Self::PageTableLevel) -> u64 {
        (va.0 >> level.shift()) & 0x1ff
    }

    fn translate_address<Driver>(vmi: &VmiCore<Driver>, va: Va, root: Pa) -> Result<Pa, VmiError>
    where
        Driver: VmiDriver<Architecture = Self>,
    {
        Self::walk(vmi, va, root, |_| {})
    }
}

impl Amd64 {
    /// Performs a page table walk and records every entry it reads.
    ///
    /// The outcome is identical to [`Architecture::translate_address`]; the
    /// recorded entries help explain why a translation failed.
    pub fn translation<Driver>(vmi: &VmiCore<Driver>, va: Va, root: Pa) -> VaTranslation
    where
        Driver: VmiDriver<Architecture = Self>,
    {
        let mut entries = TranslationEntries::new();
        let result = Self::walk(vmi, va, root, |entry| entries.push(entry));
        VaTranslation { entries, result }
    }

    fn walk<Driver>(
        vmi: &VmiCore<Driver>,
        va: Va,
        root: Pa,
        mut visit: impl FnMut(TranslationEntry),
    ) -> Result<Pa, VmiError>
    where
        Driver: VmiDriver<Architecture = Self>,
    {
        if root.0 & 0xfff != 0 {
            return Err(TranslationError::InvalidRoot(root).into());
        }

        let mut table = Self::paging_root(root.0)?;

        if !Self::is_canonical(va) {
            return Err(TranslationError::InvalidAddress(va).into());
        }

        let mut level = PageTableLevel::Pml4;
        loop {
            let index = Self::va_index_for(va, level);
            let entry_address = table + index * size_of::<PageTableEntry>() as u64;
            let entry = vmi.read_struct::<PageTableEntry>(AccessContext::direct(entry_address))?;

            let visited = TranslationEntry {
                level,
                entry,
                entry_address,
            };
            visit(visited);

            if !entry.present() {
                return Err(VmiError::page_fault((va, root)));
            }

            match level.next() {
                Some(next) if !visited.is_leaf() => {
                    table = Self::pa_from_gfn(entry.pfn());
                    level = next;
                }
                _ => return Ok(entry.page_base(level) + Self::va_offset_for(va, level)),
            }
        }
    }
}
