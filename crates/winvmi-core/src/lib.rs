//! Core memory access layer.
//!
//! [`VmiCore`] wraps a [`VmiDriver`] (a source of guest physical memory) and
//! provides typed reads and writes through either a physical address or a
//! virtual address translated by the driver's [`Architecture`].

pub mod arch;
mod batch;
mod core;
mod driver;
mod error;

use zerocopy::{FromBytes, Immutable, IntoBytes};

pub use self::{
    arch::Architecture,
    batch::{CommitReport, WriteBatch},
    core::{AccessContext, Gfn, Pa, TranslationMechanism, Va, VmiInfo, VmiVa},
    driver::VmiDriver,
    error::{PageFault, TranslationError, VmiError},
};

/// The core functionality for Virtual Machine Introspection (VMI).
pub struct VmiCore<Driver>
where
    Driver: VmiDriver,
{
    driver: Driver,
    read_string_length_limit: Option<usize>,
}

impl<Driver> VmiCore<Driver>
where
    Driver: VmiDriver,
{
    /// Creates a new `VmiCore` instance with the given driver.
    pub fn new(driver: Driver) -> Result<Self, VmiError> {
        Ok(Self {
            driver,
            read_string_length_limit: None,
        })
    }

    /// Sets a limit on the length of strings read by the `read_string` methods.
    /// If the limit is reached, the string will be truncated.
    pub fn with_read_string_length_limit(self, limit_in_bytes: usize) -> Self {
        Self {
            read_string_length_limit: Some(limit_in_bytes),
            ..self
        }
    }

    /// Returns the current limit on the length of strings read by the
    /// `read_string` methods.
    pub fn read_string_length_limit(&self) -> Option<usize> {
        self.read_string_length_limit
    }

    /// Returns the driver used by this `VmiCore` instance.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Consumes the `VmiCore` and returns the driver.
    pub fn into_driver(self) -> Driver {
        self.driver
    }

    /// Retrieves information about the guest physical memory.
    pub fn info(&self) -> Result<VmiInfo, VmiError> {
        self.driver.info()
    }

    /// Reads memory from the virtual machine.
    ///
    /// The transfer is split at page boundaries and every page is translated
    /// on its own. Either the whole buffer is filled or an error is returned.
    pub fn read(&self, ctx: impl Into<AccessContext>, buffer: &mut [u8]) -> Result<(), VmiError> {
        let ctx = ctx.into();
        let requested = buffer.len();
        let mut position = 0usize;

        while position < requested {
            let address = self.translate_access_context(ctx + position as u64)?;
            let offset = Driver::Architecture::pa_offset(address);

            let size = std::cmp::min(
                requested - position,
                (Driver::Architecture::PAGE_SIZE - offset) as usize,
            );

            let transferred = self
                .driver
                .read(address, &mut buffer[position..position + size])?;

            if transferred != size {
                return Err(VmiError::ShortTransfer {
                    requested,
                    transferred: position + transferred,
                });
            }

            position += size;
        }

        Ok(())
    }

    /// Writes memory to the virtual machine.
    ///
    /// Splitting and translation follow [`read`]. A failure leaves the pages
    /// already written in place.
    ///
    /// [`read`]: Self::read
    pub fn write(&self, ctx: impl Into<AccessContext>, buffer: &[u8]) -> Result<(), VmiError> {
        let ctx = ctx.into();
        let requested = buffer.len();
        let mut position = 0usize;

        while position < requested {
            let address = self.translate_access_context(ctx + position as u64)?;
            let offset = Driver::Architecture::pa_offset(address);

            let size = std::cmp::min(
                requested - position,
                (Driver::Architecture::PAGE_SIZE - offset) as usize,
            );

            let transferred = self
                .driver
                .write(address, &buffer[position..position + size])?;

            if transferred != size {
                return Err(VmiError::ShortTransfer {
                    requested,
                    transferred: position + transferred,
                });
            }

            position += size;
        }

        Ok(())
    }

    /// Reads a single byte from the virtual machine.
    pub fn read_u8(&self, ctx: impl Into<AccessContext>) -> Result<u8, VmiError> {
        let mut buffer = [0u8; 1];
        self.read(ctx, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Reads a 16-bit unsigned integer from the virtual machine.
    pub fn read_u16(&self, ctx: impl Into<AccessContext>) -> Result<u16, VmiError> {
        let mut buffer = [0u8; 2];
        self.read(ctx, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Reads a 32-bit unsigned integer from the virtual machine.
    pub fn read_u32(&self, ctx: impl Into<AccessContext>) -> Result<u32, VmiError> {
        let mut buffer = [0u8; 4];
        self.read(ctx, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Reads a 64-bit unsigned integer from the virtual machine.
    pub fn read_u64(&self, ctx: impl Into<AccessContext>) -> Result<u64, VmiError> {
        let mut buffer = [0u8; 8];
        self.read(ctx, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Reads an address-sized unsigned integer from the virtual machine.
    ///
    /// The width is 4 for 32-bit (WoW64) structures and 8 for native ones.
    pub fn read_address(
        &self,
        ctx: impl Into<AccessContext>,
        address_width: usize,
    ) -> Result<u64, VmiError> {
        match address_width {
            4 => self.read_u32(ctx).map(u64::from),
            8 => self.read_u64(ctx),
            _ => Err(VmiError::InvalidAddressWidth),
        }
    }

    /// Reads a virtual address of the given width from the virtual machine.
    pub fn read_va(
        &self,
        ctx: impl Into<AccessContext>,
        address_width: usize,
    ) -> Result<Va, VmiError> {
        Ok(Va(self.read_address(ctx, address_width)?))
    }

    /// Reads a 32-bit virtual address from the virtual machine.
    pub fn read_va32(&self, ctx: impl Into<AccessContext>) -> Result<Va, VmiError> {
        Ok(Va(u64::from(self.read_u32(ctx)?)))
    }

    /// Reads a 64-bit virtual address from the virtual machine.
    pub fn read_va64(&self, ctx: impl Into<AccessContext>) -> Result<Va, VmiError> {
        Ok(Va(self.read_u64(ctx)?))
    }

    /// Reads a null-terminated string of bytes, stopping after `limit` bytes.
    ///
    /// Memory is read one page at a time, so a terminator early in a page
    /// never causes the following page to be touched.
    pub fn read_string_bytes_limited(
        &self,
        ctx: impl Into<AccessContext>,
        limit: usize,
    ) -> Result<Vec<u8>, VmiError> {
        let mut ctx = ctx.into();
        let mut result = Vec::new();
        let mut page = vec![0u8; Driver::Architecture::PAGE_SIZE as usize];

        while result.len() < limit {
            let in_page = Driver::Architecture::PAGE_SIZE
                - (ctx.address & !Driver::Architecture::PAGE_MASK);
            let size = std::cmp::min(in_page as usize, limit - result.len());

            let chunk = &mut page[..size];
            self.read(ctx, chunk)?;

            if let Some(position) = memchr::memchr(0, chunk) {
                result.extend_from_slice(&chunk[..position]);
                break;
            }

            result.extend_from_slice(chunk);
            ctx += size as u64;
        }

        Ok(result)
    }

    /// Reads a null-terminated string of bytes from the virtual machine.
    pub fn read_string_bytes(&self, ctx: impl Into<AccessContext>) -> Result<Vec<u8>, VmiError> {
        self.read_string_bytes_limited(ctx, self.read_string_length_limit.unwrap_or(usize::MAX))
    }

    /// Reads a null-terminated string from the virtual machine with a
    /// specified limit. Invalid UTF-8 is replaced.
    pub fn read_string_limited(
        &self,
        ctx: impl Into<AccessContext>,
        limit: usize,
    ) -> Result<String, VmiError> {
        Ok(String::from_utf8_lossy(&self.read_string_bytes_limited(ctx, limit)?).into())
    }

    /// Reads a null-terminated string from the virtual machine.
    pub fn read_string(&self, ctx: impl Into<AccessContext>) -> Result<String, VmiError> {
        self.read_string_limited(ctx, self.read_string_length_limit.unwrap_or(usize::MAX))
    }

    /// Reads `length` bytes of UTF-16LE text and decodes it lossily.
    ///
    /// This is the shape of a counted string (such as `UNICODE_STRING`),
    /// which is not null-terminated. An odd trailing byte is ignored.
    pub fn read_utf16_lossy(
        &self,
        ctx: impl Into<AccessContext>,
        length: usize,
    ) -> Result<String, VmiError> {
        let mut buffer = vec![0u8; length & !1];
        self.read(ctx, &mut buffer)?;

        let units = buffer
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect::<Vec<_>>();

        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads a struct from the virtual machine.
    pub fn read_struct<T>(&self, ctx: impl Into<AccessContext>) -> Result<T, VmiError>
    where
        T: FromBytes + IntoBytes,
    {
        let mut result = T::new_zeroed();
        self.read(ctx, result.as_mut_bytes())?;
        Ok(result)
    }

    /// Writes a single byte to the virtual machine.
    pub fn write_u8(&self, ctx: impl Into<AccessContext>, value: u8) -> Result<(), VmiError> {
        self.write(ctx, &value.to_le_bytes())
    }

    /// Writes a 16-bit unsigned integer to the virtual machine.
    pub fn write_u16(&self, ctx: impl Into<AccessContext>, value: u16) -> Result<(), VmiError> {
        self.write(ctx, &value.to_le_bytes())
    }

    /// Writes a 32-bit unsigned integer to the virtual machine.
    pub fn write_u32(&self, ctx: impl Into<AccessContext>, value: u32) -> Result<(), VmiError> {
        self.write(ctx, &value.to_le_bytes())
    }

    /// Writes a 64-bit unsigned integer to the virtual machine.
    pub fn write_u64(&self, ctx: impl Into<AccessContext>, value: u64) -> Result<(), VmiError> {
        self.write(ctx, &value.to_le_bytes())
    }

    /// Writes a struct to the virtual machine.
    pub fn write_struct<T>(&self, ctx: impl Into<AccessContext>, value: T) -> Result<(), VmiError>
    where
        T: IntoBytes + Immutable,
    {
        self.write(ctx, value.as_bytes())
    }

    /// Creates a batch of deferred writes resolved with `mechanism`.
    pub fn write_batch(&self, mechanism: TranslationMechanism) -> WriteBatch<'_, Driver> {
        WriteBatch::new(self, mechanism)
    }

    /// Translates a virtual address to a physical address.
    pub fn translate_address(&self, va: Va, root: Pa) -> Result<Pa, VmiError> {
        <Driver::Architecture as Architecture>::translate_address(self, va, root)
    }

    /// Translates an access context to a physical address.
    pub fn translate_access_context(&self, ctx: AccessContext) -> Result<Pa, VmiError> {
        match ctx.mechanism {
            TranslationMechanism::Direct => Ok(Pa(ctx.address)),
            TranslationMechanism::Paging { root } => self.translate_address(Va(ctx.address), root),
        }
    }
}
