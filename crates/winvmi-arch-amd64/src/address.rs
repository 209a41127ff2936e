use crate::{Amd64, Pa, PageTableEntry, TranslationError, Va};

impl Amd64 {
    /// Number of implemented virtual address bits in 4-level paging.
    pub const VA_BITS: u64 = 48;

    /// Checks that bits 63..48 of the address are copies of bit 47.
    pub fn is_canonical(va: Va) -> bool {
        let upper = va.0 >> (Self::VA_BITS - 1);
        upper == 0 || upper == (1 << (64 - Self::VA_BITS + 1)) - 1
    }

    /// Sign-extends bit 47 into the upper bits of the address.
    pub fn va_canonical(va: Va) -> Va {
        let shift = 64 - Self::VA_BITS;
        Va((((va.0 << shift) as i64) >> shift) as u64)
    }

    /// Checks if the address lies in the upper (kernel) half.
    pub fn is_kernel_address(va: Va) -> bool {
        Self::is_canonical(va) && (va.0 >> 63) != 0
    }

    /// Converts a raw directory base (as stored in `CR3` or a process
    /// record) into a paging root.
    ///
    /// The low 12 bits carry flags and the PCID and are ignored. The
    /// remaining frame must be non-zero and addressable with 52 bits.
    pub fn paging_root(directory_table_base: u64) -> Result<Pa, TranslationError> {
        let root = directory_table_base & PageTableEntry::ADDRESS_MASK;
        let excess = directory_table_base & !PageTableEntry::ADDRESS_MASK & !0xfff;

        if root == 0 || excess != 0 {
            return Err(TranslationError::InvalidRoot(Pa(directory_table_base)));
        }

        Ok(Pa(root))
    }
}
