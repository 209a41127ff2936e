//! Portable Executable headers and export directories.
//!
//! Headers are parsed from the first page of an image with the `object`
//! crate. Export directories are read directly from guest memory, since
//! they usually live well past the first page.

use std::collections::HashMap;

use object::{
    endian::{LittleEndian as LE, U16},
    pe::{
        IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DOS_SIGNATURE, IMAGE_NT_OPTIONAL_HDR32_MAGIC,
        IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE, ImageDataDirectory, ImageDosHeader,
        ImageExportDirectory, ImageFileHeader, ImageNtHeaders32, ImageNtHeaders64,
    },
    read::{
        ReadRef as _,
        pe::{ImageNtHeaders, ImageOptionalHeader},
    },
};
use winvmi_core::{AccessContext, Architecture as _, Pa, Va, VmiCore, VmiDriver};

use crate::{FormatError, Listing, Sequence, WindowsError};

/// Optional header flavor of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// 32-bit image (`PE32`).
    Pe32,

    /// 64-bit image (`PE32+`).
    Pe32Plus,
}

/// The header fields winvmi needs from an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeaders {
    /// Optional header flavor.
    pub kind: ImageKind,

    /// `OptionalHeader.SizeOfImage`.
    pub size_of_image: u32,

    /// `OptionalHeader.MajorOperatingSystemVersion`.
    pub major_operating_system_version: u16,

    /// `OptionalHeader.MinorOperatingSystemVersion`.
    pub minor_operating_system_version: u16,

    /// RVA and size of the export directory, if the image has one.
    pub export_directory: Option<(u32, u32)>,
}

impl ImageHeaders {
    /// Parses the headers from the first page of an image.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let dos_header = data
            .read_at::<ImageDosHeader>(0)
            .map_err(|_| FormatError::BadSignature)?;

        if dos_header.e_magic.get(LE) != IMAGE_DOS_SIGNATURE {
            return Err(FormatError::BadSignature);
        }

        let nt_offset = u64::from(dos_header.nt_headers_offset());

        // Signature, then the file header, then the optional header magic.
        let magic_offset = nt_offset + 4 + size_of::<ImageFileHeader>() as u64;
        let magic = data
            .read_at::<U16<LE>>(magic_offset)
            .map_err(|_| FormatError::BadSignature)?
            .get(LE);

        match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => {
                Self::parse_nt::<ImageNtHeaders32>(data, nt_offset, ImageKind::Pe32)
            }
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => {
                Self::parse_nt::<ImageNtHeaders64>(data, nt_offset, ImageKind::Pe32Plus)
            }
            _ => Err(FormatError::BadSignature),
        }
    }

    fn parse_nt<Pe>(data: &[u8], mut offset: u64, kind: ImageKind) -> Result<Self, FormatError>
    where
        Pe: ImageNtHeaders,
    {
        let nt_headers = data
            .read::<Pe>(&mut offset)
            .map_err(|_| FormatError::BadSignature)?;

        if nt_headers.signature() != IMAGE_NT_SIGNATURE || !nt_headers.is_valid_optional_magic() {
            return Err(FormatError::BadSignature);
        }

        // The data directories follow the fixed part of the optional header.
        let optional_data_size =
            u64::from(nt_headers.file_header().size_of_optional_header.get(LE))
                .checked_sub(size_of::<Pe::ImageOptionalHeader>() as u64)
                .ok_or(FormatError::BadSignature)?;

        let optional_data = data
            .read_bytes(&mut offset, optional_data_size)
            .map_err(|_| FormatError::BadSignature)?;

        let optional_header = nt_headers.optional_header();
        let data_directories = optional_data
            .read_slice_at::<ImageDataDirectory>(
                0,
                optional_header.number_of_rva_and_sizes() as usize,
            )
            .map_err(|_| FormatError::BadSignature)?;

        let export_directory = data_directories
            .get(IMAGE_DIRECTORY_ENTRY_EXPORT)
            .map(|entry| (entry.virtual_address.get(LE), entry.size.get(LE)))
            .filter(|&(rva, size)| rva != 0 && size != 0);

        Ok(Self {
            kind,
            size_of_image: optional_header.size_of_image(),
            major_operating_system_version: optional_header.major_operating_system_version(),
            minor_operating_system_version: optional_header.minor_operating_system_version(),
            export_directory,
        })
    }

    /// Reads the first page of the image at `base` and parses its headers.
    pub fn read<Driver>(vmi: &VmiCore<Driver>, root: Pa, base: Va) -> Result<Self, WindowsError>
    where
        Driver: VmiDriver,
    {
        let mut page = vec![0u8; Driver::Architecture::PAGE_SIZE as usize];
        vmi.read(AccessContext::paging(base, root), &mut page)?;
        Ok(Self::parse(&page)?)
    }
}

/// A named export of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    /// Export name.
    pub name: String,

    /// Resolved virtual address (`base + rva`).
    pub address: Va,

    /// Relative virtual address of the export.
    pub rva: u32,

    /// Index into the function address array.
    pub ordinal: u16,
}

/// The named exports of an image, indexed by name.
#[derive(Debug, Clone)]
pub struct Exports {
    listing: Listing<ExportEntry, FormatError>,
    index: HashMap<String, usize>,
}

impl Exports {
    fn new(listing: Listing<ExportEntry, FormatError>) -> Self {
        let mut index = HashMap::with_capacity(listing.entries.len());
        for (position, entry) in listing.entries.iter().enumerate() {
            index.entry(entry.name.clone()).or_insert(position);
        }

        Self { listing, index }
    }

    /// Returns the underlying listing.
    pub fn listing(&self) -> &Listing<ExportEntry, FormatError> {
        &self.listing
    }

    /// Returns a sequence over the exports in directory order.
    pub fn sequence(&self) -> Sequence<'_, ExportEntry> {
        self.listing.sequence()
    }

    /// Returns the number of parsed exports.
    pub fn len(&self) -> usize {
        self.listing.entries.len()
    }

    /// Checks whether no export was parsed.
    pub fn is_empty(&self) -> bool {
        self.listing.entries.is_empty()
    }

    /// Returns the reason parsing stopped early.
    pub fn fault(&self) -> Option<FormatError> {
        self.listing.fault
    }

    /// Finds an export by exact, case-sensitive name.
    ///
    /// A miss on a partially parsed directory reports the format error,
    /// since the export may have been in the part that was not parsed.
    pub fn find(&self, name: &str) -> Result<&ExportEntry, WindowsError> {
        match self.index.get(name) {
            Some(&position) => Ok(&self.listing.entries[position]),
            None => match self.listing.fault {
                Some(fault) => Err(fault.into()),
                None => Err(WindowsError::NotFound),
            },
        }
    }
}

/// Export directory parser.
pub struct PeExports;

impl PeExports {
    /// Maximum length of an export name, in bytes.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Maximum number of names considered.
    pub const MAX_NAMES: u32 = 0x10000;

    /// Maximum number of function addresses considered.
    ///
    /// Name ordinals are 16-bit, so no name refers past this bound.
    pub const MAX_FUNCTIONS: u32 = 0x10000;

    /// Parses the export directory of the image at `base`.
    ///
    /// Malformed headers are an error. A malformed or partly unreadable
    /// export directory yields the exports parsed up to that point,
    /// together with the reason parsing stopped.
    pub fn parse<Driver>(vmi: &VmiCore<Driver>, root: Pa, base: Va) -> Result<Exports, WindowsError>
    where
        Driver: VmiDriver,
    {
        let headers = ImageHeaders::read(vmi, root, base)?;
        Ok(Self::parse_with_headers(vmi, root, base, &headers))
    }

    /// Parses the export directory of the image at `base`, failing on any
    /// defect in the directory.
    pub fn parse_strict<Driver>(
        vmi: &VmiCore<Driver>,
        root: Pa,
        base: Va,
    ) -> Result<Exports, WindowsError>
    where
        Driver: VmiDriver,
    {
        let exports = Self::parse(vmi, root, base)?;
        match exports.fault() {
            Some(fault) => Err(fault.into()),
            None => Ok(exports),
        }
    }

    /// Parses the export directory using already parsed headers.
    pub fn parse_with_headers<Driver>(
        vmi: &VmiCore<Driver>,
        root: Pa,
        base: Va,
        headers: &ImageHeaders,
    ) -> Exports
    where
        Driver: VmiDriver,
    {
        let mut entries = Vec::new();
        let listing = match ExportReader::new(vmi, root, base, headers).collect(&mut entries) {
            Ok(()) => Listing::complete(entries),
            Err(fault) => {
                tracing::debug!(%base, %fault, parsed = entries.len(), "partial export directory");
                Listing::partial(entries, fault)
            }
        };

        Exports::new(listing)
    }
}

struct ExportReader<'a, Driver>
where
    Driver: VmiDriver,
{
    vmi: &'a VmiCore<Driver>,
    root: Pa,
    base: Va,
    headers: &'a ImageHeaders,
}

impl<'a, Driver> ExportReader<'a, Driver>
where
    Driver: VmiDriver,
{
    fn new(vmi: &'a VmiCore<Driver>, root: Pa, base: Va, headers: &'a ImageHeaders) -> Self {
        Self {
            vmi,
            root,
            base,
            headers,
        }
    }

    fn collect(&self, entries: &mut Vec<ExportEntry>) -> Result<(), FormatError> {
        let Some((directory_rva, _)) = self.headers.export_directory
        else {
            return Ok(());
        };

        let mut raw = [0u8; size_of::<ImageExportDirectory>()];
        if self.fits(directory_rva, 1, raw.len() as u64) < 1
            || self.read_prefix(directory_rva, &mut raw) < raw.len()
        {
            return Err(FormatError::TruncatedDirectory);
        }

        let directory = raw
            .as_slice()
            .read_at::<ImageExportDirectory>(0)
            .map_err(|_| FormatError::TruncatedDirectory)?;

        let mut fault = None;

        let number_of_functions = Self::capped(
            directory.number_of_functions.get(LE),
            PeExports::MAX_FUNCTIONS,
            &mut fault,
        );
        let number_of_names =
            Self::capped(directory.number_of_names.get(LE), PeExports::MAX_NAMES, &mut fault);

        let functions = self.read_array::<4>(
            directory.address_of_functions.get(LE),
            number_of_functions,
            &mut fault,
        );
        let names = self.read_array::<4>(
            directory.address_of_names.get(LE),
            number_of_names,
            &mut fault,
        );
        let ordinals = self.read_array::<2>(
            directory.address_of_name_ordinals.get(LE),
            number_of_names,
            &mut fault,
        );

        for (name_rva, ordinal) in names.iter().zip(&ordinals) {
            let name_rva = u32::from_le_bytes(*name_rva);
            let ordinal = u16::from_le_bytes(*ordinal);

            let Some(function) = functions.get(usize::from(ordinal))
            else {
                return Err(FormatError::TruncatedDirectory);
            };

            let name = self
                .vmi
                .read_string_bytes_limited(
                    AccessContext::paging(self.base.wrapping_add(u64::from(name_rva)), self.root),
                    PeExports::MAX_NAME_LENGTH,
                )
                .map_err(|_| FormatError::TruncatedDirectory)?;

            let rva = u32::from_le_bytes(*function);
            entries.push(ExportEntry {
                name: String::from_utf8_lossy(&name).into_owned(),
                address: self.base.wrapping_add(u64::from(rva)),
                rva,
                ordinal,
            });
        }

        // Names that did not fit, or could not be read, are missing.
        match fault {
            Some(fault) => Err(fault),
            None if names.len() < number_of_names as usize
                || ordinals.len() < number_of_names as usize =>
            {
                Err(FormatError::TruncatedDirectory)
            }
            None => Ok(()),
        }
    }

    /// Limits a count read from the directory, recording a fault when the
    /// limit applies.
    fn capped(count: u32, limit: u32, fault: &mut Option<FormatError>) -> u32 {
        if count > limit {
            fault.get_or_insert(FormatError::TruncatedDirectory);
        }

        count.min(limit)
    }

    /// Returns how many elements of `size` bytes starting at `rva` lie
    /// within the image, up to `count`.
    fn fits(&self, rva: u32, count: u32, size: u64) -> u32 {
        let image_size = u64::from(self.headers.size_of_image);
        let rva = u64::from(rva);
        if rva >= image_size {
            return 0;
        }

        ((image_size - rva) / size).min(u64::from(count)) as u32
    }

    /// Reads as many whole `N`-byte elements of the array as possible.
    ///
    /// Records a fault when the array does not fit in the image or is not
    /// fully readable.
    fn read_array<const N: usize>(
        &self,
        rva: u32,
        count: u32,
        fault: &mut Option<FormatError>,
    ) -> Vec<[u8; N]> {
        let fitting = self.fits(rva, count, N as u64);
        let mut buffer = vec![0u8; fitting as usize * N];
        let read = self.read_prefix(rva, &mut buffer);

        if fitting < count || read < buffer.len() {
            fault.get_or_insert(FormatError::TruncatedDirectory);
        }

        buffer[..read - read % N]
            .chunks_exact(N)
            .map(|chunk| {
                let mut element = [0u8; N];
                element.copy_from_slice(chunk);
                element
            })
            .collect()
    }

    /// Reads `buffer` page by page from `base + rva`, stopping at the first
    /// unreadable page. Returns the number of bytes read.
    fn read_prefix(&self, rva: u32, buffer: &mut [u8]) -> usize {
        let page_size = Driver::Architecture::PAGE_SIZE;
        let mut ctx = AccessContext::paging(self.base.wrapping_add(u64::from(rva)), self.root);
        let mut position = 0;

        while position < buffer.len() {
            let in_page = (page_size - (ctx.address & (page_size - 1))) as usize;
            let size = in_page.min(buffer.len() - position);

            if self.vmi.read(ctx, &mut buffer[position..position + size]).is_err() {
                break;
            }

            position += size;
            ctx += size as u64;
        }

        position
    }
}
