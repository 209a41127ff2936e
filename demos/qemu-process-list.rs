//! Lists the processes of a Windows guest running under QEMU/KVM on this
//! host, by reading guest RAM straight out of the QEMU process.
//!
//! Usage: `qemu-process-list <qemu-pid> [offsets.json]`
//!
//! Large guests are assumed to use the memory split of QEMU's i440fx
//! machine type: 3 GiB below the PCI hole, the rest from 4 GiB upwards.

#[path = "_common.rs"]
mod common;

use std::path::PathBuf;

use winvmi::{
    arch::amd64::Amd64,
    driver::process::{GuestRamLayout, ProcessMemoryDriver},
    os::windows::{GuestContext, KernelLocator},
};

const GIB: u64 = 1 << 30;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();

    let mut args = std::env::args().skip(1);
    let pid: u32 = args
        .next()
        .ok_or("usage: qemu-process-list <qemu-pid> [offsets.json]")?
        .parse()?;
    let offsets = common::load_offsets(args.next().map(PathBuf::from).as_deref())?;

    let driver = ProcessMemoryDriver::<Amd64>::new(pid)?;
    let layout = *driver.layout();
    tracing::info!(
        host_base = format_args!("{:#x}", layout.host_base),
        size = format_args!("{:#x}", layout.size),
        "guest RAM"
    );

    let driver = if layout.size >= 0xe000_0000 {
        let layout = GuestRamLayout::new(layout.host_base, layout.size).with_hole(3 * GIB, GIB);
        ProcessMemoryDriver::<Amd64>::with_layout(pid, layout)?
    }
    else {
        driver
    };

    let ctx = GuestContext::attach(driver, offsets, KernelLocator::Scan)?;
    let processes = ctx.processes()?;

    for process in processes.iter() {
        let image = match process.peb() {
            Ok(peb) => format!("{:?} PEB at {}", peb.kind, peb.address),
            Err(_) => String::from("no PEB"),
        };

        println!("[{:5}] {:<16} {image}", process.pid(), process.name());
    }

    Ok(())
}
