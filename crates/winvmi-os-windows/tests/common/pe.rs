//! Synthetic PE32+ images.

pub const NT_HEADERS: usize = 0x80;
pub const OPTIONAL_HEADER: usize = NT_HEADERS + 0x18;
pub const SECTION_TABLE: usize = OPTIONAL_HEADER + 0xf0;
pub const EXPORT_DIRECTORY: usize = 0x1000;

/// Field offsets inside `IMAGE_EXPORT_DIRECTORY`.
pub const NUMBER_OF_FUNCTIONS: usize = 20;
pub const NUMBER_OF_NAMES: usize = 24;
pub const ADDRESS_OF_FUNCTIONS: usize = 28;
pub const ADDRESS_OF_NAMES: usize = 32;
pub const ADDRESS_OF_NAME_ORDINALS: usize = 36;

/// A built image and the locations of its export arrays.
pub struct PeImage {
    pub bytes: Vec<u8>,
    pub functions: usize,
    pub names: usize,
    pub ordinals: usize,
}

impl PeImage {
    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

pub struct PeBuilder<'a> {
    size_of_image: u32,
    major_version: u16,
    minor_version: u16,
    sections: &'a [&'a [u8; 8]],
    exports: Option<&'a [(&'a str, u32)]>,
}

impl<'a> PeBuilder<'a> {
    pub fn new(size_of_image: u32) -> Self {
        Self {
            size_of_image,
            major_version: 10,
            minor_version: 0,
            sections: &[],
            exports: None,
        }
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn sections(mut self, sections: &'a [&'a [u8; 8]]) -> Self {
        self.sections = sections;
        self
    }

    pub fn exports(mut self, exports: &'a [(&'a str, u32)]) -> Self {
        self.exports = Some(exports);
        self
    }

    pub fn build(self) -> PeImage {
        let mut image = PeImage {
            bytes: vec![0u8; self.size_of_image as usize],
            functions: 0,
            names: 0,
            ordinals: 0,
        };

        // DOS header.
        image.bytes[0..2].copy_from_slice(b"MZ");
        image.put_u32(0x3c, NT_HEADERS as u32);

        // NT headers.
        image.bytes[NT_HEADERS..NT_HEADERS + 4].copy_from_slice(b"PE\0\0");
        image.put_u16(NT_HEADERS + 4, 0x8664);
        image.put_u16(NT_HEADERS + 6, self.sections.len() as u16);
        image.put_u16(NT_HEADERS + 20, 0xf0);

        // Optional header.
        image.put_u16(OPTIONAL_HEADER, 0x20b);
        image.put_u16(OPTIONAL_HEADER + 0x28, self.major_version);
        image.put_u16(OPTIONAL_HEADER + 0x2a, self.minor_version);
        image.put_u32(OPTIONAL_HEADER + 0x38, self.size_of_image);
        image.put_u32(OPTIONAL_HEADER + 0x6c, 16);

        for (index, name) in self.sections.iter().enumerate() {
            let offset = SECTION_TABLE + index * 40;
            image.bytes[offset..offset + 8].copy_from_slice(*name);
        }

        if let Some(exports) = self.exports {
            Self::build_exports(&mut image, exports);
        }

        image
    }

    fn build_exports(image: &mut PeImage, exports: &[(&str, u32)]) {
        let count = exports.len();

        image.functions = EXPORT_DIRECTORY + 40;
        image.names = image.functions + count * 4;
        image.ordinals = image.names + count * 4;
        let mut strings = image.ordinals + count * 2;

        for (index, (name, rva)) in exports.iter().enumerate() {
            image.put_u32(image.functions + index * 4, *rva);
            image.put_u32(image.names + index * 4, strings as u32);
            image.put_u16(image.ordinals + index * 2, index as u16);

            image.bytes[strings..strings + name.len()].copy_from_slice(name.as_bytes());
            strings += name.len() + 1;
        }

        let directory = EXPORT_DIRECTORY;
        image.put_u32(directory + NUMBER_OF_FUNCTIONS, count as u32);
        image.put_u32(directory + NUMBER_OF_NAMES, count as u32);
        image.put_u32(directory + ADDRESS_OF_FUNCTIONS, image.functions as u32);
        image.put_u32(directory + ADDRESS_OF_NAMES, image.names as u32);
        image.put_u32(directory + ADDRESS_OF_NAME_ORDINALS, image.ordinals as u32);

        // Export data directory.
        image.put_u32(OPTIONAL_HEADER + 0x70, EXPORT_DIRECTORY as u32);
        image.put_u32(OPTIONAL_HEADER + 0x74, (strings - EXPORT_DIRECTORY) as u32);
    }
}
