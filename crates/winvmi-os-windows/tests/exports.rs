mod common;

use winvmi_core::{Pa, Va, VmiCore, VmiError};
use winvmi_os_windows::{FormatError, PeExports, WindowsError, pe::ImageHeaders};

use self::common::{
    MemoryBuilder, MockDriver,
    pe::{ADDRESS_OF_NAMES, EXPORT_DIRECTORY, NUMBER_OF_NAMES, PeBuilder, PeImage},
};

const BASE: Va = Va(0x7ff6_2000_0000);

fn load(image: &PeImage) -> (VmiCore<MockDriver>, Pa) {
    let mut memory = MemoryBuilder::new();
    let root = memory.address_space();
    memory.write(root, BASE, &image.bytes);

    (VmiCore::new(memory.finish()).unwrap(), root)
}

#[test]
fn exports_resolve_to_base_plus_rva() -> Result<(), WindowsError> {
    let pairs = [
        ("Alpha", 0x1000),
        ("Beta", 0x1234),
        ("Gamma", 0x2ff0),
        ("Delta", 0x10),
    ];
    let image = PeBuilder::new(0x3000).exports(&pairs).build();
    let (vmi, root) = load(&image);

    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert!(exports.fault().is_none());
    assert_eq!(exports.len(), pairs.len());

    for (name, rva) in pairs {
        let entry = exports.find(name)?;
        assert_eq!(entry.address, BASE + u64::from(rva));
        assert_eq!(entry.rva, rva);
    }

    let names: Vec<_> = exports.sequence().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Beta", "Gamma", "Delta"]);

    Ok(())
}

#[test]
fn lookup_is_case_sensitive() -> Result<(), WindowsError> {
    let image = PeBuilder::new(0x3000).exports(&[("Foo", 0x10)]).build();
    let (vmi, root) = load(&image);

    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert!(exports.find("Foo").is_ok());
    assert!(matches!(exports.find("foo"), Err(WindowsError::NotFound)));
    assert!(matches!(exports.find("Missing"), Err(WindowsError::NotFound)));

    Ok(())
}

#[test]
fn image_without_export_directory() -> Result<(), WindowsError> {
    let image = PeBuilder::new(0x2000).build();
    let (vmi, root) = load(&image);

    let exports = PeExports::parse_strict(&vmi, root, BASE)?;
    assert!(exports.is_empty());
    assert!(exports.listing().is_complete());

    Ok(())
}

#[test]
fn headers_are_read_from_first_page() -> Result<(), WindowsError> {
    let image = PeBuilder::new(0x5000).version(6, 3).build();
    let (vmi, root) = load(&image);

    let headers = ImageHeaders::read(&vmi, root, BASE)?;
    assert_eq!(headers.size_of_image, 0x5000);
    assert_eq!(headers.major_operating_system_version, 6);
    assert_eq!(headers.minor_operating_system_version, 3);

    Ok(())
}

#[test]
fn bad_signature_is_rejected() {
    let mut image = PeBuilder::new(0x3000).exports(&[("Foo", 0x10)]).build();
    image.bytes[0] = 0;
    let (vmi, root) = load(&image);

    assert!(matches!(
        PeExports::parse(&vmi, root, BASE),
        Err(WindowsError::Format(FormatError::BadSignature))
    ));
}

#[test]
fn unmapped_image_is_a_memory_error() {
    let image = PeBuilder::new(0x3000).build();
    let (vmi, root) = load(&image);

    let result = PeExports::parse(&vmi, root, Va(0x7ff6_3000_0000));
    match result {
        Err(WindowsError::Vmi(err)) => assert!(err.as_page_fault().is_some()),
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("parsed an unmapped image"),
    }
}

#[test]
fn ordinal_past_function_count_truncates() -> Result<(), WindowsError> {
    let mut image = PeBuilder::new(0x3000)
        .exports(&[("First", 0x100), ("Second", 0x200), ("Third", 0x300)])
        .build();

    // Second name points past the function array.
    image.put_u16(image.ordinals + 2, 0x7fff);
    let (vmi, root) = load(&image);

    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert_eq!(exports.fault(), Some(FormatError::TruncatedDirectory));
    assert_eq!(exports.len(), 1);
    assert_eq!(exports.find("First")?.address, BASE + 0x100);
    assert!(matches!(
        exports.find("Third"),
        Err(WindowsError::Format(FormatError::TruncatedDirectory))
    ));

    assert!(matches!(
        PeExports::parse_strict(&vmi, root, BASE),
        Err(WindowsError::Format(FormatError::TruncatedDirectory))
    ));

    Ok(())
}

#[test]
fn names_array_outside_image_truncates() -> Result<(), WindowsError> {
    let mut image = PeBuilder::new(0x3000)
        .exports(&[("First", 0x100), ("Second", 0x200)])
        .build();

    // Move the name array so that only its first element lies inside the image.
    let names = 0x3000 - 4;
    let first_name = image.bytes[image.names..image.names + 4].to_vec();
    image.bytes[names..names + 4].copy_from_slice(&first_name);
    image.put_u32(EXPORT_DIRECTORY + ADDRESS_OF_NAMES, names as u32);
    let (vmi, root) = load(&image);

    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert_eq!(exports.fault(), Some(FormatError::TruncatedDirectory));
    assert_eq!(exports.len(), 1);
    assert_eq!(exports.find("First")?.address, BASE + 0x100);

    Ok(())
}

#[test]
fn name_count_is_capped() -> Result<(), WindowsError> {
    let mut image = PeBuilder::new(0x3000).exports(&[("Foo", 0x10)]).build();
    image.put_u32(EXPORT_DIRECTORY + NUMBER_OF_NAMES, u32::MAX);
    let (vmi, root) = load(&image);

    // The declared arrays cannot fit, so the directory is partial, but
    // parsing terminates and keeps what it could read.
    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert_eq!(exports.fault(), Some(FormatError::TruncatedDirectory));
    assert_eq!(exports.find("Foo")?.address, BASE + 0x10);

    Ok(())
}

#[test]
fn unreadable_names_truncate_from_that_entry() -> Result<(), VmiError> {
    let names: Vec<String> = (0..300).map(|i| format!("Export{i:03}")).collect();
    let pairs: Vec<(&str, u32)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), 0x100 + i as u32))
        .collect();
    let image = PeBuilder::new(0x4000).exports(&pairs).build();

    let mut memory = MemoryBuilder::new();
    let root = memory.address_space();
    memory.write(root, BASE, &image.bytes);

    // Name strings run from the second page into the third; drop the third.
    memory.unmap(root, BASE + 0x2000);
    let vmi = VmiCore::new(memory.finish())?;

    let exports = PeExports::parse(&vmi, root, BASE)?;
    assert_eq!(exports.fault(), Some(FormatError::TruncatedDirectory));
    assert!(exports.len() > 0);
    assert!(exports.len() < 300);

    for (i, entry) in exports.sequence().iter().enumerate() {
        assert_eq!(entry.name, names[i]);
        assert_eq!(entry.address, BASE + 0x100 + i as u64);
    }

    Ok(())
}
