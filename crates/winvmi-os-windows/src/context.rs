use winvmi_arch_amd64::Amd64;
use winvmi_core::{
    AccessContext, Architecture as _, Pa, TranslationMechanism, Va, VmiCore, VmiDriver,
    WriteBatch,
};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{
    Exports, InitError, KernelImage, KernelLocator, Offsets, ProcessEntry, ProcessList,
    WindowsError,
    pe::{ImageHeaders, PeExports},
};

/// Version of the inspected Windows kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsVersion {
    /// Major version, from the kernel image headers.
    pub major: u16,

    /// Minor version, from the kernel image headers.
    pub minor: u16,

    /// Build number, from `NtBuildNumber`.
    pub build: u16,
}

/// An attached Windows guest.
///
/// Owns the memory backend, the structure offsets and everything learned
/// about the kernel while attaching. Process and module handles borrow the
/// context, so they cannot outlive it.
pub struct GuestContext<Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    vmi: VmiCore<Driver>,
    offsets: Offsets,
    kernel: KernelImage,
    version: WindowsVersion,
    kernel_exports: Exports,
    initial_process: ProcessEntry,
}

impl<Driver> GuestContext<Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    /// Attaches to the guest behind `driver`.
    ///
    /// Either every step succeeds or no context is returned.
    pub fn attach(
        driver: Driver,
        offsets: Offsets,
        locator: KernelLocator,
    ) -> Result<Self, WindowsError> {
        let vmi = VmiCore::new(driver).map_err(InitError::from)?;
        Self::with_vmi(vmi, offsets, locator)
    }

    /// Attaches to the guest behind an existing [`VmiCore`].
    pub fn with_vmi(
        vmi: VmiCore<Driver>,
        offsets: Offsets,
        locator: KernelLocator,
    ) -> Result<Self, WindowsError> {
        Ok(Self::initialize(vmi, offsets, locator)?)
    }

    fn initialize(
        vmi: VmiCore<Driver>,
        offsets: Offsets,
        locator: KernelLocator,
    ) -> Result<Self, InitError> {
        offsets.validate()?;

        let kernel = locator.locate(&vmi)?;
        let root = kernel.directory_table_base;
        tracing::debug!(base = %kernel.base, %root, "kernel located");

        let mut page = [0u8; Amd64::PAGE_SIZE as usize];
        vmi.read(AccessContext::paging(kernel.base, root), &mut page)?;
        let headers = ImageHeaders::parse(&page)?;

        let kernel_exports = PeExports::parse_with_headers(&vmi, root, kernel.base, &headers);
        if let Some(fault) = kernel_exports.fault() {
            tracing::warn!(
                %fault,
                parsed = kernel_exports.len(),
                "kernel export directory is incomplete"
            );
        }

        let export = |name: &'static str| {
            kernel_exports
                .find(name)
                .map(|entry| entry.address)
                .map_err(|_| InitError::MissingExport(name))
        };

        let build_number = vmi.read_u32(AccessContext::paging(export("NtBuildNumber")?, root))?;
        let version = WindowsVersion {
            major: headers.major_operating_system_version,
            minor: headers.minor_operating_system_version,
            build: (build_number & 0xffff) as u16,
        };

        let initial_process =
            vmi.read_va64(AccessContext::paging(export("PsInitialSystemProcess")?, root))?;

        let initial_process = match ProcessEntry::read(&vmi, &offsets, root, initial_process) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Err(InitError::InitialProcess),
            Err(err) => {
                tracing::warn!(%err, %initial_process, "initial process record is unreadable");
                return Err(InitError::InitialProcess);
            }
        };

        tracing::debug!(
            major = version.major,
            minor = version.minor,
            build = version.build,
            initial_process = %initial_process.va,
            "attached"
        );

        Ok(Self {
            vmi,
            offsets,
            kernel,
            version,
            kernel_exports,
            initial_process,
        })
    }

    /// Detaches from the guest and returns the memory backend.
    pub fn close(self) -> Driver {
        tracing::debug!(base = %self.kernel.base, "detached");
        self.vmi.into_driver()
    }

    /// Returns the core memory access layer.
    pub fn vmi(&self) -> &VmiCore<Driver> {
        &self.vmi
    }

    /// Returns the structure offsets.
    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    /// Returns the base address of the kernel image.
    pub fn kernel_base(&self) -> Va {
        self.kernel.base
    }

    /// Returns the kernel directory table base.
    pub fn directory_table_base(&self) -> Pa {
        self.kernel.directory_table_base
    }

    /// Returns the kernel version.
    pub fn version(&self) -> WindowsVersion {
        self.version
    }

    /// Returns the exports of the kernel image.
    pub fn kernel_exports(&self) -> &Exports {
        &self.kernel_exports
    }

    /// Returns the address of a kernel export.
    pub fn kernel_export(&self, name: &str) -> Result<Va, WindowsError> {
        Ok(self.kernel_exports.find(name)?.address)
    }

    /// Returns the initial system process, the anchor of the process list.
    pub fn initial_process(&self) -> &ProcessEntry {
        &self.initial_process
    }

    /// Enumerates the running processes.
    pub fn processes(&self) -> Result<ProcessList<'_, Driver>, WindowsError> {
        let mut processes = ProcessList::new(self);
        processes.refresh()?;
        Ok(processes)
    }

    /// Reads a value from guest physical memory.
    pub fn read<T>(&self, address: Pa) -> Result<T, WindowsError>
    where
        T: FromBytes + IntoBytes,
    {
        Ok(self.vmi.read_struct(AccessContext::direct(address))?)
    }

    /// Writes a value to guest physical memory.
    pub fn write<T>(&self, address: Pa, value: &T) -> Result<(), WindowsError>
    where
        T: IntoBytes + Immutable,
    {
        Ok(self.vmi.write(AccessContext::direct(address), value.as_bytes())?)
    }

    /// Reads bytes from guest physical memory.
    pub fn read_bytes(&self, address: Pa, buffer: &mut [u8]) -> Result<(), WindowsError> {
        Ok(self.vmi.read(AccessContext::direct(address), buffer)?)
    }

    /// Writes bytes to guest physical memory.
    pub fn write_bytes(&self, address: Pa, buffer: &[u8]) -> Result<(), WindowsError> {
        Ok(self.vmi.write(AccessContext::direct(address), buffer)?)
    }

    /// Reads a value from kernel virtual memory.
    pub fn read_kernel<T>(&self, address: Va) -> Result<T, WindowsError>
    where
        T: FromBytes + IntoBytes,
    {
        Ok(self.vmi.read_struct(self.kernel_access(address))?)
    }

    /// Writes a value to kernel virtual memory.
    pub fn write_kernel<T>(&self, address: Va, value: &T) -> Result<(), WindowsError>
    where
        T: IntoBytes + Immutable,
    {
        Ok(self.vmi.write(self.kernel_access(address), value.as_bytes())?)
    }

    /// Creates a batch of writes to guest physical memory.
    pub fn write_batch(&self) -> WriteBatch<'_, Driver> {
        self.vmi.write_batch(TranslationMechanism::Direct)
    }

    /// Creates a batch of writes to kernel virtual memory.
    pub fn kernel_write_batch(&self) -> WriteBatch<'_, Driver> {
        self.vmi.write_batch(TranslationMechanism::Paging {
            root: self.kernel.directory_table_base,
        })
    }

    fn kernel_access(&self, address: Va) -> AccessContext {
        AccessContext::paging(address, self.kernel.directory_table_base)
    }
}
