use std::{marker::PhantomData, path::Path};

use kdmp_parser::{gxa::Gpa, map::MappedFileReader, parse::KernelDumpParser, phys::Reader};
use winvmi_core::{Architecture, Gfn, Pa, Va, VmiDriver, VmiError, VmiInfo};

use crate::Error;

/// Guest physical memory from a Windows kernel crash dump.
///
/// Pages that are not part of the dump read as [`VmiError::OutOfBounds`].
/// Writes are not supported.
pub struct KdmpDriver<Arch>
where
    Arch: Architecture,
{
    dump: KernelDumpParser,
    _marker: PhantomData<Arch>,
}

impl<Arch> KdmpDriver<Arch>
where
    Arch: Architecture,
{
    /// Opens and parses the dump at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let dump = KernelDumpParser::with_reader(MappedFileReader::new(path)?)?;

        let headers = dump.headers();
        tracing::debug!(
            path = %path.display(),
            directory_table_base = %Pa(headers.directory_table_base),
            "kernel dump opened"
        );

        Ok(Self {
            dump,
            _marker: PhantomData,
        })
    }

    /// Returns the kernel directory table base recorded in the dump header.
    pub fn directory_table_base(&self) -> Pa {
        Pa(self.dump.headers().directory_table_base & Arch::PAGE_MASK)
    }

    /// Returns an address inside the kernel image, recorded in the dump
    /// header.
    ///
    /// This is the address of the active process list head, which lives in
    /// the data section of the kernel image. A backward search for the image
    /// base can start here.
    pub fn kernel_address(&self) -> Va {
        Va(self.dump.headers().ps_active_process_head)
    }
}

impl<Arch> VmiDriver for KdmpDriver<Arch>
where
    Arch: Architecture,
{
    type Architecture = Arch;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        // Kernel dumps are sparse, the highest frame is not recorded.
        Ok(VmiInfo {
            page_size: Arch::PAGE_SIZE,
            page_shift: Arch::PAGE_SHIFT,
            max_gfn: Gfn(u64::MAX >> Arch::PAGE_SHIFT),
        })
    }

    fn read(&self, pa: Pa, buffer: &mut [u8]) -> Result<usize, VmiError> {
        let reader = Reader::new(&self.dump);
        reader
            .read_exact(Gpa::new(pa.0), buffer)
            .map_err(Error::from)?;
        Ok(buffer.len())
    }

    fn write(&self, _pa: Pa, _buffer: &[u8]) -> Result<usize, VmiError> {
        Err(Error::NotSupported.into())
    }
}
