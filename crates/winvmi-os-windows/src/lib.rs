//! # Windows guest introspection
//!
//! This crate reconstructs the state of a running Windows guest from its
//! physical memory, working in conjunction with the `winvmi-core` crate.
//! It locates the kernel, enumerates processes, their loaded modules and
//! the exports of each module, and gives typed access to kernel and process
//! address spaces.
//!
//! ## Example
//!
//! ```no_run
//! # use winvmi_arch_amd64::Amd64;
//! # use winvmi_core::VmiDriver;
//! # use winvmi_os_windows::{GuestContext, KernelLocator, Offsets};
//! #
//! # fn example<Driver>(driver: Driver) -> Result<(), Box<dyn std::error::Error>>
//! # where
//! #     Driver: VmiDriver<Architecture = Amd64>,
//! # {
//! let ctx = GuestContext::attach(driver, Offsets::WINDOWS_10_19041, KernelLocator::Scan)?;
//! let processes = ctx.processes()?;
//!
//! let explorer = processes.find("explorer.exe")?;
//! for module in explorer.modules()? {
//!     println!("{} @ {}", module.name(), module.base());
//! }
//!
//! let kernel32 = explorer.module("kernel32.dll")?;
//! let address = kernel32.find_export("CreateFileW")?;
//! println!("CreateFileW @ {address}");
//! # Ok(())
//! # }
//! ```
//!
//! The guest keeps running while it is inspected. Lists are snapshots and
//! may be stale or inconsistent by the time they are read, so enumeration
//! skips records it cannot make sense of instead of failing.

mod context;
mod error;
mod iter;
mod kernel;
mod listing;
mod module;
mod offsets;
pub mod pe;
mod process;
mod sequence;

pub use self::{
    context::{GuestContext, WindowsVersion},
    error::{EnumError, FormatError, InitError, WindowsError},
    iter::ListEntryIterator,
    kernel::{KernelImage, KernelLocator},
    listing::Listing,
    module::{ModuleEntry, ModuleEnumerator, ModuleHandle},
    offsets::{Offsets, PebOffsets},
    pe::{ExportEntry, Exports, PeExports},
    process::{PebInfo, PebKind, ProcessEntry, ProcessEnumerator, ProcessHandle, ProcessList},
    sequence::Sequence,
};
