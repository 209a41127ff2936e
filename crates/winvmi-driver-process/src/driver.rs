use std::{io, marker::PhantomData};

use winvmi_core::{Architecture, Gfn, Pa, VmiDriver, VmiError, VmiInfo};

use crate::{Error, GuestRamLayout, maps};

/// Guest physical memory inside a live host process.
///
/// Transfers stop at the end of a contiguous host range, so a read or
/// write that crosses the PCI hole or the end of guest RAM is short.
pub struct ProcessMemoryDriver<Arch>
where
    Arch: Architecture,
{
    pid: libc::pid_t,
    layout: GuestRamLayout,
    _marker: PhantomData<Arch>,
}

impl<Arch> ProcessMemoryDriver<Arch>
where
    Arch: Architecture,
{
    /// Attaches to process `pid` and uses its largest writable anonymous
    /// mapping as guest RAM.
    pub fn new(pid: u32) -> Result<Self, Error> {
        let maps = maps::read_maps(pid)?;
        let ram = maps::largest_guest_ram(&maps).ok_or(Error::NoGuestRam)?;

        tracing::debug!(
            pid,
            start = format_args!("{:#x}", ram.start),
            size = format_args!("{:#x}", ram.len()),
            "guest RAM mapping selected"
        );

        Self::with_layout(pid, GuestRamLayout::new(ram.start, ram.len()))
    }

    /// Attaches to process `pid` with an explicit guest RAM layout.
    pub fn with_layout(pid: u32, layout: GuestRamLayout) -> Result<Self, Error> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| Error::Io(io::Error::from(io::ErrorKind::InvalidInput)))?;

        Ok(Self {
            pid,
            layout,
            _marker: PhantomData,
        })
    }

    /// Returns the process ID.
    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Returns the guest RAM layout.
    pub fn layout(&self) -> &GuestRamLayout {
        &self.layout
    }

    fn host_range(&self, pa: Pa, len: usize) -> Result<(u64, usize), VmiError> {
        let (host, available) = self.layout.host_range(pa).ok_or(VmiError::OutOfBounds)?;
        let len = usize::try_from(available).map_or(len, |available| len.min(available));
        Ok((host, len))
    }
}

impl<Arch> VmiDriver for ProcessMemoryDriver<Arch>
where
    Arch: Architecture,
{
    type Architecture = Arch;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        let end = self.layout.guest_end();

        Ok(VmiInfo {
            page_size: Arch::PAGE_SIZE,
            page_shift: Arch::PAGE_SHIFT,
            max_gfn: Gfn(end.div_ceil(Arch::PAGE_SIZE).saturating_sub(1)),
        })
    }

    fn read(&self, pa: Pa, buffer: &mut [u8]) -> Result<usize, VmiError> {
        let (host, len) = self.host_range(pa, buffer.len())?;

        let local = libc::iovec {
            iov_base: buffer.as_mut_ptr().cast(),
            iov_len: len,
        };
        let remote = libc::iovec {
            iov_base: host as *mut libc::c_void,
            iov_len: len,
        };

        // SAFETY: `local` covers the first `len` bytes of `buffer`. The remote
        // range is only touched by the kernel, which validates it.
        let result = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };

        transferred(result)
    }

    fn write(&self, pa: Pa, buffer: &[u8]) -> Result<usize, VmiError> {
        let (host, len) = self.host_range(pa, buffer.len())?;

        let local = libc::iovec {
            iov_base: buffer.as_ptr() as *mut libc::c_void,
            iov_len: len,
        };
        let remote = libc::iovec {
            iov_base: host as *mut libc::c_void,
            iov_len: len,
        };

        // SAFETY: `local` covers the first `len` bytes of `buffer` and is
        // only read from.
        let result = unsafe { libc::process_vm_writev(self.pid, &local, 1, &remote, 1, 0) };

        transferred(result)
    }
}

fn transferred(result: libc::ssize_t) -> Result<usize, VmiError> {
    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()).into());
    }

    Ok(result as usize)
}
