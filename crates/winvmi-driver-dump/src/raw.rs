use std::{cell::RefCell, fs::File, marker::PhantomData, ops::Range, path::Path};

use memmap2::{MmapMut, MmapOptions};
use winvmi_core::{Architecture, Gfn, Pa, VmiDriver, VmiError, VmiInfo};

use crate::Error;

/// Guest physical memory from a raw dump file.
///
/// Byte `n` of the file is guest physical address `n`. The file is mapped
/// copy-on-write, so writes change the private view and never reach the
/// file on disk.
///
/// A transfer that does not fit in the file fails as a whole with
/// [`VmiError::OutOfBounds`].
pub struct RawDumpDriver<Arch>
where
    Arch: Architecture,
{
    mmap: RefCell<MmapMut>,
    _marker: PhantomData<Arch>,
}

impl<Arch> RawDumpDriver<Arch>
where
    Arch: Architecture,
{
    /// Maps the dump at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // SAFETY: The mapping is private. Only a concurrent truncation of the
        // file by another process could invalidate it.
        let mmap = unsafe { MmapOptions::new().map_copy(&file)? };

        tracing::debug!(path = %path.display(), size = mmap.len(), "raw dump mapped");

        Ok(Self {
            mmap: RefCell::new(mmap),
            _marker: PhantomData,
        })
    }

    /// Returns the size of the dump in bytes.
    pub fn len(&self) -> u64 {
        self.mmap.borrow().len() as u64
    }

    /// Checks whether the dump is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(&self, pa: Pa, len: usize) -> Result<Range<usize>, Error> {
        let start = usize::try_from(pa.0).map_err(|_| Error::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(Error::OutOfBounds)?;

        if end > self.mmap.borrow().len() {
            return Err(Error::OutOfBounds);
        }

        Ok(start..end)
    }
}

impl<Arch> VmiDriver for RawDumpDriver<Arch>
where
    Arch: Architecture,
{
    type Architecture = Arch;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        let pages = self.len().div_ceil(Arch::PAGE_SIZE);

        Ok(VmiInfo {
            page_size: Arch::PAGE_SIZE,
            page_shift: Arch::PAGE_SHIFT,
            max_gfn: Gfn(pages.saturating_sub(1)),
        })
    }

    fn read(&self, pa: Pa, buffer: &mut [u8]) -> Result<usize, VmiError> {
        let range = self.range(pa, buffer.len())?;
        buffer.copy_from_slice(&self.mmap.borrow()[range]);
        Ok(buffer.len())
    }

    fn write(&self, pa: Pa, buffer: &[u8]) -> Result<usize, VmiError> {
        let range = self.range(pa, buffer.len())?;
        self.mmap.borrow_mut()[range].copy_from_slice(buffer);
        Ok(buffer.len())
    }
}
