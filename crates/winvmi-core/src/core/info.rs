use super::Gfn;

/// Information about the guest physical memory exposed by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmiInfo {
    /// The size of a page in bytes.
    pub page_size: u64,

    /// The number of bits to shift to convert a page number to an address.
    pub page_shift: u64,

    /// The highest guest frame number backed by the driver.
    pub max_gfn: Gfn,
}
