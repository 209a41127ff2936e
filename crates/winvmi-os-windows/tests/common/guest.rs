//! A synthetic Windows guest.

use winvmi_core::{Gfn, Pa, Va};
use winvmi_os_windows::{Offsets, PebOffsets};

use super::{
    MemoryBuilder, MockDriver,
    pe::{PeBuilder, PeImage},
};

pub const OFFSETS: Offsets = Offsets::WINDOWS_10_19041;

pub const KERNEL_BASE: Va = Va(0xfffff800_0020_0000);
pub const KERNEL_ENTRY: Va = Va(0xfffff800_0020_1500);
pub const KERNEL_SIZE: u32 = 0x3000;
pub const NT_BUILD_NUMBER_RVA: u32 = 0x2000;
pub const PS_INITIAL_SYSTEM_PROCESS_RVA: u32 = 0x2008;

pub const LOW_STUB: Pa = Pa(0x13000);

pub const SYSTEM_EPROCESS: Va = Va(0xffffe000_0010_0000);
pub const SYSTEM_PID: u32 = 4;

pub const MODULE_BASE: Va = Va(0x7ff6_1000_0000);
pub const MODULE_SIZE: u32 = 0x3000;
pub const FOO_RVA: u32 = 0x10;

/// Describes one process to place in the guest.
pub struct ProcessSpec {
    pub eprocess: Va,
    pub pid: u64,
    pub name: &'static [u8],
    pub peb: Option<Va>,
    pub wow64: bool,
    pub modules: Vec<ModuleSpec>,
}

pub struct ModuleSpec {
    pub name: &'static str,
    pub base: Va,
    pub exports: Vec<(&'static str, u32)>,
}

impl ProcessSpec {
    pub fn new(eprocess: Va, pid: u64, name: &'static [u8]) -> Self {
        Self {
            eprocess,
            pid,
            name,
            peb: None,
            wow64: false,
            modules: Vec::new(),
        }
    }

    pub fn with_peb(mut self, peb: Va) -> Self {
        self.peb = Some(peb);
        self
    }

    pub fn wow64(mut self) -> Self {
        self.wow64 = true;
        self
    }

    pub fn with_module(
        mut self,
        name: &'static str,
        base: Va,
        exports: &[(&'static str, u32)],
    ) -> Self {
        self.modules.push(ModuleSpec {
            name,
            base,
            exports: exports.to_vec(),
        });
        self
    }
}

/// The standard user process: `test.exe` with one module exporting `Foo`.
pub fn test_process() -> ProcessSpec {
    ProcessSpec::new(Va(0xffffe000_0010_2000), 1234, b"test.exe")
        .with_peb(Va(0x7ff7_0000_0000))
        .with_module("test.exe", MODULE_BASE, &[("Foo", FOO_RVA), ("Bar", 0x20)])
}

/// Builds a guest with a kernel, the system process and `processes`.
pub struct GuestBuilder {
    pub memory: MemoryBuilder,
    pub kernel_root: Pa,
    pub kernel_exports: Vec<(&'static str, u32)>,
    pub roots: Vec<Pa>,
}

impl GuestBuilder {
    pub fn new() -> Self {
        let mut memory = MemoryBuilder::new();
        let kernel_root = memory.address_space();

        Self {
            memory,
            kernel_root,
            kernel_exports: vec![
                ("NtBuildNumber", NT_BUILD_NUMBER_RVA),
                ("PsInitialSystemProcess", PS_INITIAL_SYSTEM_PROCESS_RVA),
            ],
            roots: Vec::new(),
        }
    }

    /// Places the kernel image and the low stub.
    pub fn kernel(&mut self) -> &mut Self {
        let mut image = kernel_image(&self.kernel_exports);

        image.put_u32(NT_BUILD_NUMBER_RVA as usize, 0xf000_4a61);
        image.put_u64(PS_INITIAL_SYSTEM_PROCESS_RVA as usize, SYSTEM_EPROCESS.0);
        self.memory.write(self.kernel_root, KERNEL_BASE, &image.bytes);

        self.memory.driver().insert_page(Gfn(LOW_STUB.0 >> 12));
        self.memory.driver().poke(LOW_STUB, &0x0000_0001_0006_00e9u64.to_le_bytes());
        self.memory.driver().poke(LOW_STUB + 0x70, &KERNEL_ENTRY.0.to_le_bytes());
        self.memory.driver().poke(LOW_STUB + 0xa0, &self.kernel_root.0.to_le_bytes());
        self
    }

    /// Writes an `_EPROCESS` record. Links are written separately.
    pub fn process(&mut self, spec: &ProcessSpec) -> Pa {
        let root = self.memory.address_space();
        self.roots.push(root);

        let kernel_root = self.kernel_root;
        let eprocess = spec.eprocess;
        let at = |offset: i64| eprocess + offset as u64;

        // Zero the record so every field is mapped.
        self.memory.write(kernel_root, eprocess, &[0u8; 0x600]);
        self.memory.write_u64(kernel_root, at(OFFSETS.unique_process_id), spec.pid);
        self.memory.write_u64(kernel_root, at(OFFSETS.directory_table_base), root.0);
        self.memory.write(kernel_root, at(OFFSETS.image_file_name), spec.name);

        if let Some(peb) = spec.peb {
            if spec.wow64 {
                // The `_EWOW64PROCESS` record holds the 32-bit PEB pointer.
                let ewow64 = eprocess + 0x700;
                self.memory.write_u64(kernel_root, at(OFFSETS.wow64_process), ewow64.0);
                self.memory.write_u64(kernel_root, ewow64, peb.0);
                self.peb(root, peb, &OFFSETS.peb_wow64, &spec.modules);
            }
            else {
                self.memory.write_u64(kernel_root, at(OFFSETS.peb), peb.0);
                self.peb(root, peb, &OFFSETS.peb_native, &spec.modules);
            }
        }

        root
    }

    fn pointer(&mut self, root: Pa, va: Va, layout: &PebOffsets, value: Va) {
        match layout.pointer_width {
            4 => self.memory.write_u32(root, va, value.0 as u32),
            _ => self.memory.write_u64(root, va, value.0),
        }
    }

    /// Writes a PEB, its loader data and one loader entry per module.
    fn peb(&mut self, root: Pa, peb: Va, layout: &PebOffsets, modules: &[ModuleSpec]) {
        let ldr = peb + 0x1000;
        let head = ldr + layout.in_load_order_module_list as u64;
        let entry_at = |index: usize| peb + 0x2000 + index as u64 * 0x100;
        let name_at = |index: usize| peb + 0x3000 + index as u64 * 0x100;

        self.memory.write(root, peb, &[0u8; 0x100]);
        self.memory.write(root, ldr, &[0u8; 0x100]);
        let image_base = modules.first().map_or(Va(0), |module| module.base);
        self.pointer(root, peb + layout.image_base_address as u64, layout, image_base);
        self.pointer(root, peb + layout.ldr as u64, layout, ldr);

        let links = |index: usize| entry_at(index) + layout.in_load_order_links as u64;
        let count = modules.len();
        let first = if count == 0 { head } else { links(0) };
        self.pointer(root, head, layout, first);

        for (index, module) in modules.iter().enumerate() {
            let entry = entry_at(index);
            let next = if index + 1 == count { head } else { links(index + 1) };

            self.memory.write(root, entry, &[0u8; 0x100]);
            self.pointer(root, links(index), layout, next);
            self.pointer(root, entry + layout.dll_base as u64, layout, module.base);
            self.pointer(root, entry + layout.entry_point as u64, layout, module.base + 0x1000);
            self.memory.write_u32(root, entry + layout.size_of_image as u64, MODULE_SIZE);
            self.memory.write_u16(root, entry + layout.load_count as u64, 1);

            let name: Vec<u8> = module
                .name
                .encode_utf16()
                .flat_map(u16::to_le_bytes)
                .collect();
            let unicode_string = entry + layout.base_dll_name as u64;
            self.memory.write_u16(root, unicode_string, name.len() as u16);
            self.memory.write_u16(root, unicode_string + 2, name.len() as u16 + 2);
            self.pointer(
                root,
                unicode_string + layout.pointer_width as u64,
                layout,
                name_at(index),
            );
            self.memory.write(root, name_at(index), &name);

            let image = PeBuilder::new(MODULE_SIZE).exports(&module.exports).build();
            self.memory.write(root, module.base, &image.bytes);
        }
    }

    /// Writes the `ActiveProcessLinks.Flink` of `from` to point at `to`.
    pub fn link(&mut self, from: Va, to: Va) {
        let apl = OFFSETS.active_process_links as u64;
        self.memory.write_u64(self.kernel_root, from + apl, (to + apl).0);
    }

    /// Links the records into a ring, in order.
    pub fn ring(&mut self, records: &[Va]) {
        for (index, &record) in records.iter().enumerate() {
            let next = records[(index + 1) % records.len()];
            self.link(record, next);
        }
    }

    /// Shares the final kernel mappings with every process address space.
    pub fn finish(mut self) -> MockDriver {
        for root in std::mem::take(&mut self.roots) {
            self.memory.share_kernel(self.kernel_root, root);
        }

        self.memory.finish()
    }
}

/// The kernel image bytes as they are placed in the guest.
pub fn kernel_image(exports: &[(&str, u32)]) -> PeImage {
    PeBuilder::new(KERNEL_SIZE)
        .sections(&[b".text\0\0\0", b"POOLCODE", b"INITKDBG"])
        .exports(exports)
        .build()
}

/// A guest with the system process and `test.exe`.
pub fn standard_guest() -> (MockDriver, Pa, Pa) {
    let mut guest = GuestBuilder::new();
    guest.kernel();

    let system = ProcessSpec::new(SYSTEM_EPROCESS, u64::from(SYSTEM_PID), b"System");
    let test = test_process();

    guest.process(&system);
    let test_root = guest.process(&test);
    guest.ring(&[system.eprocess, test.eprocess]);

    let kernel_root = guest.kernel_root;
    (guest.finish(), kernel_root, test_root)
}
