use std::io::Write as _;

use tempfile::NamedTempFile;
use winvmi_arch_amd64::Amd64;
use winvmi_core::{AccessContext, Gfn, Pa, VmiCore, VmiDriver as _, VmiError};
use winvmi_driver_dump::RawDumpDriver;

/// Three pages; every byte holds the low bits of its page number and offset.
fn dump_file() -> NamedTempFile {
    let content: Vec<u8> = (0..3 * 0x1000u32)
        .map(|offset| ((offset >> 12) * 0x40 + (offset & 0x3f)) as u8)
        .collect();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&content).unwrap();
    file.flush().unwrap();
    file
}

fn open(file: &NamedTempFile) -> VmiCore<RawDumpDriver<Amd64>> {
    let driver = RawDumpDriver::<Amd64>::open(file.path()).unwrap();
    VmiCore::new(driver).unwrap()
}

#[test]
fn info_covers_the_file() {
    let file = dump_file();
    let vmi = open(&file);

    let info = vmi.info().unwrap();
    assert_eq!(info.page_size, 0x1000);
    assert_eq!(info.max_gfn, Gfn(2));
    assert_eq!(vmi.driver().len(), 0x3000);
}

#[test]
fn reads_are_linear() -> Result<(), VmiError> {
    let file = dump_file();
    let vmi = open(&file);

    assert_eq!(vmi.read_u8(Pa(0x0005))?, 0x05);
    assert_eq!(vmi.read_u8(Pa(0x1005))?, 0x45);

    // Crosses the page boundary.
    let mut buffer = [0u8; 4];
    vmi.read(AccessContext::direct(Pa(0x1ffe)), &mut buffer)?;
    assert_eq!(buffer, [0x7e, 0x7f, 0x80, 0x81]);

    Ok(())
}

#[test]
fn read_past_the_end_fails_completely() {
    let file = dump_file();
    let vmi = open(&file);

    let mut buffer = [0xaau8; 8];
    let result = vmi.driver().read(Pa(0x2ffc), &mut buffer);
    assert!(matches!(result, Err(VmiError::OutOfBounds)));
    assert_eq!(buffer, [0xaa; 8]);

    assert!(matches!(vmi.read_u32(Pa(0x3000)), Err(VmiError::OutOfBounds)));
    assert!(matches!(vmi.read_u32(Pa(u64::MAX - 1)), Err(VmiError::OutOfBounds)));
}

#[test]
fn writes_stay_in_the_private_view() -> Result<(), VmiError> {
    let file = dump_file();
    let vmi = open(&file);

    vmi.write(AccessContext::direct(Pa(0x1000)), &[0xde, 0xad])?;
    assert_eq!(vmi.read_u16(Pa(0x1000))?, 0xadde);

    let on_disk = std::fs::read(file.path()).unwrap();
    assert_eq!(&on_disk[0x1000..0x1002], &[0x40, 0x41]);

    // A fresh mapping sees the original content.
    let reopened = open(&file);
    assert_eq!(reopened.read_u16(Pa(0x1000))?, 0x4140);

    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let result = RawDumpDriver::<Amd64>::open("/nonexistent/winvmi.raw");
    assert!(matches!(result, Err(winvmi_driver_dump::Error::Io(_))));
}
