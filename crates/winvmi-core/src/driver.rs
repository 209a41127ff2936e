use crate::{Architecture, Pa, VmiError, VmiInfo};

/// A source of guest physical memory.
///
/// Drivers transfer raw byte ranges; address translation, page splitting and
/// short-transfer detection happen in [`VmiCore`].
///
/// [`VmiCore`]: crate::VmiCore
pub trait VmiDriver {
    /// The architecture supported by the driver.
    type Architecture: Architecture + ?Sized;

    /// Retrieves information about the guest physical memory.
    fn info(&self) -> Result<VmiInfo, VmiError>;

    /// Reads guest physical memory starting at `pa` into `buffer`.
    ///
    /// Returns the number of bytes read, which may be less than the length
    /// of `buffer`.
    fn read(&self, pa: Pa, buffer: &mut [u8]) -> Result<usize, VmiError>;

    /// Writes `buffer` to guest physical memory starting at `pa`.
    ///
    /// Returns the number of bytes written, which may be less than the
    /// length of `buffer`.
    fn write(&self, pa: Pa, buffer: &[u8]) -> Result<usize, VmiError>;
}
