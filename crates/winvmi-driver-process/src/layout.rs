use winvmi_core::Pa;

/// A range of guest physical addresses that is not backed by RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciHole {
    /// First guest physical address of the hole.
    pub start: u64,

    /// Size of the hole in bytes.
    pub size: u64,
}

impl PciHole {
    /// Returns the guest physical address where RAM resumes.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }
}

/// Where guest RAM lives in the host process.
///
/// Guest RAM is one contiguous host mapping. Without a hole, guest physical
/// address `pa` is at host address `host_base + pa`. With a hole, RAM below
/// the hole maps the same way, the hole itself is unbacked and RAM above it
/// continues in the host mapping right after the low part. QEMU on x86
/// places the hole just below 4 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRamLayout {
    /// Host address of the first byte of guest RAM.
    pub host_base: u64,

    /// Size of the host mapping in bytes.
    pub size: u64,

    /// Optional unbacked range of guest physical addresses.
    pub hole: Option<PciHole>,
}

impl GuestRamLayout {
    /// Creates a linear layout without a hole.
    pub fn new(host_base: u64, size: u64) -> Self {
        Self {
            host_base,
            size,
            hole: None,
        }
    }

    /// Adds a PCI hole of `size` bytes at guest physical address `start`.
    pub fn with_hole(self, start: u64, size: u64) -> Self {
        Self {
            hole: Some(PciHole { start, size }),
            ..self
        }
    }

    /// Returns the highest guest physical address plus one.
    pub fn guest_end(&self) -> u64 {
        match self.hole {
            Some(hole) if self.size > hole.start => self.size.saturating_add(hole.size),
            _ => self.size,
        }
    }

    /// Maps a guest physical address to a host address.
    ///
    /// Returns the host address and the number of bytes that are contiguous
    /// from there, or `None` if the address is not backed.
    pub fn host_range(&self, pa: Pa) -> Option<(u64, u64)> {
        let (offset, limit) = match self.hole {
            Some(hole) if pa.0 >= hole.end() => (pa.0 - hole.size, self.size),
            Some(hole) if pa.0 >= hole.start => return None,
            Some(hole) => (pa.0, self.size.min(hole.start)),
            None => (pa.0, self.size),
        };

        if offset >= limit {
            return None;
        }

        Some((self.host_base.checked_add(offset)?, limit - offset))
    }
}
