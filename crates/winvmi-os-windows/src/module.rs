use once_cell::unsync::OnceCell;
use winvmi_arch_amd64::Amd64;
use winvmi_core::{AccessContext, Pa, Va, VmiCore, VmiDriver, VmiError, VmiVa};

use crate::{
    EnumError, ExportEntry, Exports, GuestContext, Listing, PebOffsets, ProcessHandle, Sequence,
    WindowsError, iter::ListEntryIterator, offsets::field, pe::PeExports,
};

/// A module loaded into a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// `BaseDllName`.
    pub name: String,

    /// `DllBase`.
    pub base: Va,

    /// `EntryPoint`.
    pub entry_point: Va,

    /// `SizeOfImage`.
    pub size: u32,

    /// `ObsoleteLoadCount`.
    pub load_count: u16,
}

impl ModuleEntry {
    /// Maximum length of a module name, in bytes of UTF-16.
    pub const MAX_NAME_LENGTH: usize = 512;

    /// Reads the loader entry at `va`.
    pub fn read<Driver>(
        vmi: &VmiCore<Driver>,
        root: Pa,
        layout: &PebOffsets,
        va: Va,
    ) -> Result<Self, VmiError>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let at = |offset| AccessContext::paging(field(va, offset), root);
        let width = layout.width();

        let base = vmi.read_va(at(layout.dll_base), width)?;
        let entry_point = vmi.read_va(at(layout.entry_point), width)?;
        let size = vmi.read_u32(at(layout.size_of_image))?;
        let load_count = vmi.read_u16(at(layout.load_count))?;

        // UNICODE_STRING: Length, MaximumLength, then the aligned Buffer.
        let length = vmi.read_u16(at(layout.base_dll_name))?;
        let buffer = vmi.read_va(at(layout.base_dll_name + layout.pointer_width), width)?;
        let length = usize::from(length).min(Self::MAX_NAME_LENGTH);
        let name = match length {
            0 => String::new(),
            _ => vmi.read_utf16_lossy(AccessContext::paging(buffer, root), length)?,
        };

        Ok(Self {
            name,
            base,
            entry_point,
            size,
            load_count,
        })
    }
}

impl VmiVa for ModuleEntry {
    fn va(&self) -> Va {
        self.base
    }
}

/// Walks the loader module list of a process.
pub struct ModuleEnumerator;

impl ModuleEnumerator {
    /// Maximum number of modules in one walk.
    pub const MAX_MODULES: usize = 4096;

    /// Walks `InLoadOrderModuleList` of the process.
    ///
    /// Entries that cannot be read are skipped. Fails with
    /// [`WindowsError::NoPeb`] if the environment block or loader data is
    /// missing or unreadable.
    pub fn walk<Driver>(
        process: &ProcessHandle<'_, Driver>,
    ) -> Result<Listing<ModuleEntry, EnumError>, WindowsError>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let peb = process.peb()?;
        let vmi = process.context().vmi();
        let layout = peb.kind.layout(process.context().offsets());
        let root = process.directory_table_base();
        let head = field(peb.ldr, layout.in_load_order_module_list);

        vmi.read_va(AccessContext::paging(head, root), layout.width())
            .map_err(|_| WindowsError::NoPeb)?;

        let mut entries = Vec::new();

        let walk = ListEntryIterator::new(
            vmi,
            root,
            head,
            layout.in_load_order_links as u64,
            layout.width(),
            Self::MAX_MODULES,
        );

        for va in walk {
            let va = match va {
                Ok(va) => va,
                Err(err) => {
                    tracing::warn!(
                        pid = process.pid(),
                        %err,
                        collected = entries.len(),
                        "module list walk stopped early"
                    );
                    return Ok(Listing::partial(entries, err));
                }
            };

            match ModuleEntry::read(vmi, root, layout, va) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::debug!(pid = process.pid(), %va, %err, "unreadable module"),
            }
        }

        Ok(Listing::complete(entries))
    }
}

/// A module loaded into a process of an attached guest.
pub struct ModuleHandle<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    ctx: &'ctx GuestContext<Driver>,
    root: Pa,
    entry: ModuleEntry,
    exports: OnceCell<Exports>,
}

impl<'ctx, Driver> ModuleHandle<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    /// Creates a handle for a module mapped in the address space at `root`.
    pub fn new(ctx: &'ctx GuestContext<Driver>, root: Pa, entry: ModuleEntry) -> Self {
        Self {
            ctx,
            root,
            entry,
            exports: OnceCell::new(),
        }
    }

    /// Returns the loader entry.
    pub fn entry(&self) -> &ModuleEntry {
        &self.entry
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Returns the module base address.
    pub fn base(&self) -> Va {
        self.entry.base
    }

    /// Returns the exports of the module.
    ///
    /// The export directory is parsed on first access and cached. A
    /// partially readable directory yields the exports parsed before the
    /// fault.
    pub fn exports(&self) -> Result<&Exports, WindowsError> {
        self.exports
            .get_or_try_init(|| PeExports::parse(self.ctx.vmi(), self.root, self.entry.base))
    }

    /// Returns a sequence over the exports of the module.
    pub fn export_entries(&self) -> Result<Sequence<'_, ExportEntry>, WindowsError> {
        Ok(self.exports()?.sequence())
    }

    /// Resolves an export by exact name.
    pub fn find_export(&self, name: &str) -> Result<Va, WindowsError> {
        Ok(self.exports()?.find(name)?.address)
    }
}

impl<Driver> VmiVa for ModuleHandle<'_, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    fn va(&self) -> Va {
        self.entry.base
    }
}
