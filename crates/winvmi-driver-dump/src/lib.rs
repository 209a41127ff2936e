//! Drivers for captured guest memory.
//!
//! - [`RawDumpDriver`] serves a flat file that holds guest physical memory
//!   from address zero, as produced by `virsh dump --memory-only --format=raw`
//!   or QEMU's `pmemsave`.
//! - [`KdmpDriver`] serves a Windows kernel crash dump. The dump header
//!   records the kernel directory table base and a kernel address, which
//!   together let the kernel image be found without scanning for the low
//!   stub.
//!
//! Both drivers are synchronous. The kernel dump is read-only, the raw dump
//! accepts writes into a private copy-on-write view.

mod error;
mod kdmp;
mod raw;

pub use self::{error::Error, kdmp::KdmpDriver, raw::RawDumpDriver};
