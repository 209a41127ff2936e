//! Structure offsets.
//!
//! The layout of kernel and loader structures changes between Windows
//! builds. The caller supplies the offsets for the inspected build, usually
//! deserialized from a configuration file.

use serde::{Deserialize, Serialize};
use winvmi_core::Va;

use crate::InitError;

/// Byte offsets of the `_EPROCESS` fields used by winvmi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offsets {
    /// `_EPROCESS.ActiveProcessLinks`.
    pub active_process_links: i64,

    /// `_EPROCESS.UniqueProcessId`.
    pub unique_process_id: i64,

    /// `_EPROCESS.ImageFileName`.
    pub image_file_name: i64,

    /// `_EPROCESS.Pcb.DirectoryTableBase`.
    pub directory_table_base: i64,

    /// `_EPROCESS.Peb`.
    pub peb: i64,

    /// `_EPROCESS.WoW64Process`.
    pub wow64_process: i64,

    /// `_EWOW64PROCESS.Peb`.
    ///
    /// Since Windows 10 `WoW64Process` points to an `_EWOW64PROCESS`
    /// record instead of the 32-bit PEB itself. Leave unset for older
    /// builds.
    #[serde(default)]
    pub ewow64process_peb: Option<i64>,

    /// Environment block layout of native processes.
    #[serde(default = "PebOffsets::native")]
    pub peb_native: PebOffsets,

    /// Environment block layout of 32-bit processes under WoW64.
    #[serde(default = "PebOffsets::wow64")]
    pub peb_wow64: PebOffsets,
}

impl Offsets {
    /// Upper bound for any single field offset.
    pub const MAX_FIELD_OFFSET: i64 = 0x2000;

    /// Windows 10 20H1 (build 19041) x64.
    pub const WINDOWS_10_19041: Self = Self {
        active_process_links: 0x448,
        unique_process_id: 0x440,
        image_file_name: 0x5a8,
        directory_table_base: 0x28,
        peb: 0x550,
        wow64_process: 0x580,
        ewow64process_peb: Some(0),
        peb_native: PebOffsets::NATIVE,
        peb_wow64: PebOffsets::WOW64,
    };

    /// Checks the table for structural sanity.
    ///
    /// Every offset must be non-negative and below [`MAX_FIELD_OFFSET`].
    ///
    /// [`MAX_FIELD_OFFSET`]: Self::MAX_FIELD_OFFSET
    pub fn validate(&self) -> Result<(), InitError> {
        let fields = [
            ("active_process_links", self.active_process_links),
            ("unique_process_id", self.unique_process_id),
            ("image_file_name", self.image_file_name),
            ("directory_table_base", self.directory_table_base),
            ("peb", self.peb),
            ("wow64_process", self.wow64_process),
            (
                "ewow64process_peb",
                self.ewow64process_peb.unwrap_or_default(),
            ),
        ];

        for (name, offset) in fields {
            check_offset(name, offset)?;
        }

        self.peb_native.validate()?;
        self.peb_wow64.validate()
    }
}

/// Byte offsets inside the process environment block and loader structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PebOffsets {
    /// Pointer size of the layout, 8 or 4.
    pub pointer_width: i64,

    /// `_PEB.ImageBaseAddress`.
    pub image_base_address: i64,

    /// `_PEB.Ldr`.
    pub ldr: i64,

    /// `_PEB_LDR_DATA.InLoadOrderModuleList`.
    pub in_load_order_module_list: i64,

    /// `_LDR_DATA_TABLE_ENTRY.InLoadOrderLinks`.
    pub in_load_order_links: i64,

    /// `_LDR_DATA_TABLE_ENTRY.DllBase`.
    pub dll_base: i64,

    /// `_LDR_DATA_TABLE_ENTRY.EntryPoint`.
    pub entry_point: i64,

    /// `_LDR_DATA_TABLE_ENTRY.SizeOfImage`.
    pub size_of_image: i64,

    /// `_LDR_DATA_TABLE_ENTRY.BaseDllName`.
    pub base_dll_name: i64,

    /// `_LDR_DATA_TABLE_ENTRY.ObsoleteLoadCount`.
    pub load_count: i64,
}

impl PebOffsets {
    /// 64-bit `_PEB` layout.
    pub const NATIVE: Self = Self {
        pointer_width: 8,
        image_base_address: 0x10,
        ldr: 0x18,
        in_load_order_module_list: 0x10,
        in_load_order_links: 0x00,
        dll_base: 0x30,
        entry_point: 0x38,
        size_of_image: 0x40,
        base_dll_name: 0x58,
        load_count: 0x6c,
    };

    /// 32-bit `_PEB32` layout.
    pub const WOW64: Self = Self {
        pointer_width: 4,
        image_base_address: 0x08,
        ldr: 0x0c,
        in_load_order_module_list: 0x0c,
        in_load_order_links: 0x00,
        dll_base: 0x18,
        entry_point: 0x1c,
        size_of_image: 0x20,
        base_dll_name: 0x2c,
        load_count: 0x38,
    };

    fn native() -> Self {
        Self::NATIVE
    }

    fn wow64() -> Self {
        Self::WOW64
    }

    /// Returns the pointer width in bytes.
    pub fn width(&self) -> usize {
        self.pointer_width as usize
    }

    fn validate(&self) -> Result<(), InitError> {
        if !matches!(self.pointer_width, 4 | 8) {
            return Err(InitError::MalformedOffsets("pointer_width"));
        }

        let fields = [
            ("image_base_address", self.image_base_address),
            ("ldr", self.ldr),
            ("in_load_order_module_list", self.in_load_order_module_list),
            ("in_load_order_links", self.in_load_order_links),
            ("dll_base", self.dll_base),
            ("entry_point", self.entry_point),
            ("size_of_image", self.size_of_image),
            ("base_dll_name", self.base_dll_name),
            ("load_count", self.load_count),
        ];

        for (name, offset) in fields {
            check_offset(name, offset)?;
        }

        Ok(())
    }
}

fn check_offset(name: &'static str, offset: i64) -> Result<(), InitError> {
    if !(0..Offsets::MAX_FIELD_OFFSET).contains(&offset) {
        return Err(InitError::MalformedOffsets(name));
    }

    Ok(())
}

/// Returns the address of the field at `offset` in the structure at `base`.
pub(crate) fn field(base: Va, offset: i64) -> Va {
    base.wrapping_add(offset as u64)
}
