//! Lists the processes and loaded modules recorded in a Windows kernel
//! dump file.
//!
//! Usage: `windows-dump <dump> [offsets.json]`

#[path = "_common.rs"]
mod common;

use std::path::PathBuf;

use winvmi::{
    arch::amd64::Amd64,
    driver::dump::KdmpDriver,
    os::windows::{GuestContext, KernelLocator, ProcessHandle, WindowsError},
};

type Driver = KdmpDriver<Amd64>;

fn print_modules(process: &ProcessHandle<Driver>) -> Result<(), WindowsError> {
    let modules = match process.module_listing() {
        Ok(modules) => modules,
        Err(WindowsError::NoPeb) => return Ok(()),
        Err(WindowsError::Vmi(err)) if err.as_page_fault().is_some() => {
            println!("    <paged out>");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    for module in modules.sequence() {
        let exports = match module.exports() {
            Ok(exports) => exports.len().to_string(),
            Err(_) => String::from("?"),
        };

        println!(
            "    {} @ {} ({:#x} bytes, {exports} exports)",
            module.name(),
            module.base(),
            module.entry().size
        );
    }

    if let Some(fault) = modules.fault() {
        println!("    <{fault}>");
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();

    let mut args = std::env::args_os().skip(1);
    let dump = PathBuf::from(args.next().ok_or("usage: windows-dump <dump> [offsets.json]")?);
    let offsets = common::load_offsets(args.next().map(PathBuf::from).as_deref())?;

    let driver = Driver::open(&dump)?;
    let locator = KernelLocator::Hinted {
        directory_table_base: driver.directory_table_base(),
        kernel_entry: driver.kernel_address(),
    };

    let ctx = GuestContext::attach(driver, offsets, locator)?;
    let version = ctx.version();
    println!(
        "Windows {}.{} build {}, kernel at {}",
        version.major,
        version.minor,
        version.build,
        ctx.kernel_base()
    );

    let processes = ctx.processes()?;
    for process in processes.iter() {
        println!(
            "[{:5}] {} (DTB {})",
            process.pid(),
            process.name(),
            process.directory_table_base()
        );
        print_modules(process)?;
    }

    if let Some(fault) = processes.fault() {
        println!("process list incomplete: {fault}");
    }

    Ok(())
}
