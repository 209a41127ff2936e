//! Kernel image discovery.

use memchr::memmem;
use winvmi_arch_amd64::Amd64;
use winvmi_core::{AccessContext, Architecture as _, Pa, Va, VmiCore, VmiDriver};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::InitError;

/// How the kernel image is located when attaching to a guest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum KernelLocator {
    /// Scan low physical memory for the processor start block, then search
    /// for the kernel image below the kernel entry point it records.
    #[default]
    Scan,

    /// Search for the kernel image below a known kernel address.
    Hinted {
        /// Kernel directory table base.
        directory_table_base: Pa,

        /// Any address inside the kernel image, typically its entry point.
        kernel_entry: Va,
    },

    /// Use a known kernel image base.
    Known {
        /// Kernel directory table base.
        directory_table_base: Pa,

        /// Base address of the kernel image.
        kernel_base: Va,
    },
}

/// A located kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    /// Base address of the kernel image.
    pub base: Va,

    /// Kernel directory table base.
    pub directory_table_base: Pa,
}

/// The fields of the x64 processor start block (low stub) used to find
/// the kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct LowStub {
    jump: u64,
    _reserved1: [u64; 13],
    kernel_entry: u64,
    _reserved2: [u64; 5],
    directory_table_base: u64,
}

impl LowStub {
    const JUMP_MASK: u64 = 0xffff_ffff_ffff_00ff;
    const JUMP_SIGNATURE: u64 = 0x0000_0001_0006_00e9;
    const KERNEL_ENTRY_MASK: u64 = 0xffff_f800_0000_0003;
    const KERNEL_ENTRY_PREFIX: u64 = 0xffff_f800_0000_0000;
    const DIRECTORY_TABLE_BASE_MASK: u64 = 0xffff_ff00_0000_0fff;

    fn is_valid(&self) -> bool {
        self.jump & Self::JUMP_MASK == Self::JUMP_SIGNATURE
            && self.kernel_entry & Self::KERNEL_ENTRY_MASK == Self::KERNEL_ENTRY_PREFIX
            && self.directory_table_base != 0
            && self.directory_table_base & Self::DIRECTORY_TABLE_BASE_MASK == 0
    }
}

impl KernelLocator {
    /// Size of the physical range scanned for the low stub.
    pub const LOW_STUB_SCAN_LIMIT: u64 = 0x10_0000;

    /// Maximum backward search distance for the kernel image base.
    pub const MAX_BACKWARD_SEARCH: u64 = 512 * 1024 * 1024;

    /// Granularity of the backward search.
    const SEARCH_CHUNK: u64 = 0x20_0000;

    /// Alignments tried within each chunk, most likely first.
    const ALIGNMENT_MASKS: [u64; 3] = [0xfffff, 0xffff, 0xfff];

    /// Locates the kernel image.
    pub fn locate<Driver>(&self, vmi: &VmiCore<Driver>) -> Result<KernelImage, InitError>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let (directory_table_base, kernel_entry) = match *self {
            Self::Known {
                directory_table_base,
                kernel_base,
            } => {
                return Ok(KernelImage {
                    base: kernel_base,
                    directory_table_base,
                });
            }
            Self::Hinted {
                directory_table_base,
                kernel_entry,
            } => (directory_table_base, kernel_entry),
            Self::Scan => Self::find_low_stub(vmi).ok_or(InitError::KernelNotFound)?,
        };

        match Self::find_image(vmi, directory_table_base, kernel_entry) {
            Some(base) => Ok(KernelImage {
                base,
                directory_table_base,
            }),
            None => {
                tracing::warn!(
                    %kernel_entry,
                    "no kernel image within {} MB",
                    Self::MAX_BACKWARD_SEARCH / 1024 / 1024
                );
                Err(InitError::KernelNotFound)
            }
        }
    }

    /// Scans low physical memory for the processor start block.
    ///
    /// Returns the kernel directory table base and kernel entry point.
    pub fn find_low_stub<Driver>(vmi: &VmiCore<Driver>) -> Option<(Pa, Va)>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        for address in (0..Self::LOW_STUB_SCAN_LIMIT).step_by(Amd64::PAGE_SIZE as usize) {
            let stub = match vmi.read_struct::<LowStub>(AccessContext::direct(address)) {
                Ok(stub) => stub,
                Err(_) => continue,
            };

            if !stub.is_valid() {
                continue;
            }

            let directory_table_base = Pa(stub.directory_table_base);
            let kernel_entry = Va(stub.kernel_entry);
            tracing::debug!(
                stub = %Pa(address),
                %directory_table_base,
                %kernel_entry,
                "found low stub"
            );

            return Some((directory_table_base, kernel_entry));
        }

        tracing::warn!("no low stub in the first megabyte of physical memory");
        None
    }

    /// Searches downwards from `kernel_entry` for the kernel image.
    pub fn find_image<Driver>(vmi: &VmiCore<Driver>, root: Pa, kernel_entry: Va) -> Option<Va>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let top = kernel_entry.0 & !(Self::SEARCH_CHUNK - 1);
        let bottom = top.saturating_sub(Self::MAX_BACKWARD_SEARCH);

        let mut page = [0u8; Amd64::PAGE_SIZE as usize];
        let mut chunk = top;

        loop {
            for (position, mask) in Self::ALIGNMENT_MASKS.into_iter().enumerate() {
                // Bases aligned to an earlier mask were already checked.
                let checked = position
                    .checked_sub(1)
                    .map(|previous| Self::ALIGNMENT_MASKS[previous]);

                for index in (0..Self::SEARCH_CHUNK / Amd64::PAGE_SIZE).rev() {
                    let base = chunk + index * Amd64::PAGE_SIZE;
                    if base & mask != 0 || checked.is_some_and(|checked| base & checked == 0) {
                        continue;
                    }

                    let base = Va(base);
                    if Self::is_kernel_image(vmi, root, base, &mut page) {
                        tracing::debug!(%base, "found kernel image");
                        return Some(base);
                    }
                }
            }

            if chunk <= bottom {
                return None;
            }

            chunk -= Self::SEARCH_CHUNK;
        }
    }

    fn is_kernel_image<Driver>(
        vmi: &VmiCore<Driver>,
        root: Pa,
        base: Va,
        page: &mut [u8],
    ) -> bool
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let ctx = AccessContext::paging(base, root);

        // Unreadable pages are skipped.
        let mut signature = [0u8; 2];
        if vmi.read(ctx, &mut signature).is_err() || &signature != b"MZ" {
            return false;
        }

        if vmi.read(ctx, page).is_err() {
            return false;
        }

        memmem::find(page, b"INITKDBG").is_some() && memmem::find(page, b"POOLCODE").is_some()
    }
}
