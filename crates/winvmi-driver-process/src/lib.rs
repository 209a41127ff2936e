//! Driver for guest RAM that lives in the address space of a host process.
//!
//! Hypervisors such as QEMU keep guest RAM in an ordinary mapping of their
//! own process. [`ProcessMemoryDriver`] reads and writes that mapping with
//! `process_vm_readv(2)` and `process_vm_writev(2)`, which requires the same
//! permissions as attaching with `ptrace(2)`. Linux only.
//!
//! The guest RAM mapping is found in `/proc/<pid>/maps` or described
//! explicitly with a [`GuestRamLayout`].

mod driver;
mod error;
mod layout;
mod maps;

pub use self::{
    driver::ProcessMemoryDriver,
    error::Error,
    layout::{GuestRamLayout, PciHole},
    maps::{MemoryMapping, parse_maps, read_maps},
};
