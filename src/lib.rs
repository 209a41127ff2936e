//! # winvmi
//!
//! Windows guest memory introspection from raw physical memory.
//!
//! The workspace is split into small crates that this crate re-exports:
//!
//! - [`winvmi_core`]: the [`VmiCore`] memory access layer, address types,
//!   typed reads and writes, and deferred write batches.
//! - [`arch::amd64`]: four-level page-table translation.
//! - [`driver`]: physical memory backends for captured dumps and live
//!   hypervisor processes.
//! - [`os::windows`]: kernel discovery and process, module and export
//!   enumeration.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use winvmi_core::*;

/// Architecture-specific implementations.
pub mod arch {
    #[cfg(feature = "arch-amd64")]
    #[cfg_attr(docsrs, doc(cfg(feature = "arch-amd64")))]
    pub use winvmi_arch_amd64 as amd64;
}

/// Physical memory backends.
pub mod driver {
    #[cfg(feature = "driver-dump")]
    #[cfg_attr(docsrs, doc(cfg(feature = "driver-dump")))]
    pub use winvmi_driver_dump as dump;

    #[cfg(feature = "driver-process")]
    #[cfg_attr(docsrs, doc(cfg(feature = "driver-process")))]
    pub use winvmi_driver_process as process;
}

/// Operating system introspection.
pub mod os {
    #[cfg(feature = "os-windows")]
    #[cfg_attr(docsrs, doc(cfg(feature = "os-windows")))]
    pub use winvmi_os_windows as windows;
}
