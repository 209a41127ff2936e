use std::collections::HashSet;

use once_cell::unsync::OnceCell;
use winvmi_arch_amd64::Amd64;
use winvmi_core::{
    AccessContext, Pa, TranslationMechanism, Va, VmiCore, VmiDriver, VmiError, VmiVa,
    WriteBatch,
};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{
    EnumError, GuestContext, Listing, ModuleEnumerator, ModuleHandle, Offsets, PebOffsets,
    Sequence, WindowsError, iter::ListEntryIterator, offsets::field,
};

/// A process as recorded in the kernel process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process ID.
    pub pid: u32,

    /// Image file name, ASCII only.
    pub name: String,

    /// Directory table base of the process address space.
    pub directory_table_base: Pa,

    /// Virtual address of the `_EPROCESS` record.
    pub va: Va,

    /// Physical address of the `_EPROCESS` record.
    pub pa: Pa,
}

impl ProcessEntry {
    /// Maximum length of a process name, in characters.
    pub const MAX_NAME_LENGTH: usize = 63;

    /// Length of `_EPROCESS.ImageFileName`.
    const IMAGE_FILE_NAME_LENGTH: usize = 15;

    /// Reads the process record at `va`.
    ///
    /// Returns `None` for a record that does not describe a live process,
    /// such as one whose process ID is out of range or whose directory
    /// table base is invalid.
    pub fn read<Driver>(
        vmi: &VmiCore<Driver>,
        offsets: &Offsets,
        root: Pa,
        va: Va,
    ) -> Result<Option<Self>, VmiError>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let pa = vmi.translate_address(va, root)?;

        let at = |offset| AccessContext::paging(field(va, offset), root);

        let pid = vmi.read_u64(at(offsets.unique_process_id))?;
        let pid = match u32::try_from(pid) {
            Ok(pid) if pid < 1 << 31 => pid,
            _ => return Ok(None),
        };

        let directory_table_base = vmi.read_u64(at(offsets.directory_table_base))?;
        let directory_table_base = match Amd64::paging_root(directory_table_base) {
            Ok(directory_table_base) => directory_table_base,
            Err(_) => return Ok(None),
        };

        let mut name = [0u8; Self::IMAGE_FILE_NAME_LENGTH];
        vmi.read(at(offsets.image_file_name), &mut name)?;

        Ok(Some(Self {
            pid,
            name: ascii_name(&name),
            directory_table_base,
            va,
            pa,
        }))
    }
}

impl VmiVa for ProcessEntry {
    fn va(&self) -> Va {
        self.va
    }
}

/// Converts a fixed-size, null-padded name to a printable ASCII string.
///
/// Non-ASCII bytes become `?` and the result is cut to
/// [`ProcessEntry::MAX_NAME_LENGTH`] characters.
fn ascii_name(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&byte| byte != 0)
        .take(ProcessEntry::MAX_NAME_LENGTH)
        .map(|&byte| {
            if byte.is_ascii() && !byte.is_ascii_control() {
                byte as char
            }
            else {
                '?'
            }
        })
        .collect()
}

/// Walks the kernel process list.
pub struct ProcessEnumerator;

impl ProcessEnumerator {
    /// Maximum number of processes in one walk.
    pub const MAX_PROCESSES: usize = 16384;

    /// Walks the active process list starting at the initial process.
    ///
    /// Records that cannot be read, stale records and duplicate process
    /// IDs are skipped. Fails only if the list cannot be entered at all.
    pub fn walk<Driver>(
        ctx: &GuestContext<Driver>,
    ) -> Result<Listing<ProcessEntry, EnumError>, WindowsError>
    where
        Driver: VmiDriver<Architecture = Amd64>,
    {
        let vmi = ctx.vmi();
        let offsets = ctx.offsets();
        let root = ctx.directory_table_base();
        let anchor = field(ctx.initial_process().va, offsets.active_process_links);

        vmi.read_va64(AccessContext::paging(anchor, root))?;

        let mut entries = Vec::new();
        let mut pids = HashSet::new();

        let walk = ListEntryIterator::ring(
            vmi,
            root,
            anchor,
            offsets.active_process_links as u64,
            size_of::<u64>(),
            Self::MAX_PROCESSES,
        );

        for va in walk {
            let va = match va {
                Ok(va) => va,
                Err(err) => {
                    tracing::warn!(
                        %err,
                        collected = entries.len(),
                        "process list walk stopped early"
                    );
                    return Ok(Listing::partial(entries, err));
                }
            };

            match ProcessEntry::read(vmi, offsets, root, va) {
                Ok(Some(entry)) => {
                    if pids.insert(entry.pid) {
                        entries.push(entry);
                    }
                    else {
                        tracing::debug!(pid = entry.pid, %va, "duplicate process ID");
                    }
                }
                Ok(None) => tracing::debug!(%va, "stale process record"),
                Err(err) => tracing::debug!(%va, %err, "unreadable process record"),
            }
        }

        Ok(Listing::complete(entries))
    }
}

/// A snapshot of the running processes.
pub struct ProcessList<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    ctx: &'ctx GuestContext<Driver>,
    handles: Vec<ProcessHandle<'ctx, Driver>>,
    fault: Option<EnumError>,
}

impl<'ctx, Driver> ProcessList<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    /// Creates an empty snapshot.
    pub fn new(ctx: &'ctx GuestContext<Driver>) -> Self {
        Self {
            ctx,
            handles: Vec::new(),
            fault: None,
        }
    }

    /// Walks the process list again and replaces the snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub fn refresh(&mut self) -> Result<(), WindowsError> {
        let listing = ProcessEnumerator::walk(self.ctx)?;
        let fault = listing.fault;

        self.handles = listing
            .into_entries()
            .into_iter()
            .map(|entry| ProcessHandle::new(self.ctx, entry))
            .collect();
        self.fault = fault;

        Ok(())
    }

    /// Returns a sequence over the processes.
    pub fn iter(&self) -> Sequence<'_, ProcessHandle<'ctx, Driver>> {
        Sequence::new(&self.handles)
    }

    /// Returns the number of processes.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Checks whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the reason the last walk stopped early.
    pub fn fault(&self) -> Option<EnumError> {
        self.fault
    }

    /// Finds a process by name, ignoring ASCII case.
    pub fn find(&self, name: &str) -> Result<&ProcessHandle<'ctx, Driver>, WindowsError> {
        self.handles
            .iter()
            .find(|handle| handle.entry.name.eq_ignore_ascii_case(name))
            .ok_or(WindowsError::NotFound)
    }

    /// Finds a process by process ID.
    pub fn find_by_pid(&self, pid: u32) -> Result<&ProcessHandle<'ctx, Driver>, WindowsError> {
        self.handles
            .iter()
            .find(|handle| handle.entry.pid == pid)
            .ok_or(WindowsError::NotFound)
    }
}

/// Environment block flavor of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PebKind {
    /// 64-bit process.
    Native,

    /// 32-bit process under WoW64.
    Wow64,
}

impl PebKind {
    /// Returns the layout of this flavor.
    pub fn layout(self, offsets: &Offsets) -> &PebOffsets {
        match self {
            Self::Native => &offsets.peb_native,
            Self::Wow64 => &offsets.peb_wow64,
        }
    }
}

/// Fields read from a process environment block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PebInfo {
    /// Address of the environment block.
    pub address: Va,

    /// Environment block flavor.
    pub kind: PebKind,

    /// `ImageBaseAddress`.
    pub image_base: Va,

    /// `Ldr`.
    pub ldr: Va,
}

/// A process of an attached guest.
pub struct ProcessHandle<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    ctx: &'ctx GuestContext<Driver>,
    entry: ProcessEntry,
    modules: OnceCell<Listing<ModuleHandle<'ctx, Driver>, EnumError>>,
}

impl<'ctx, Driver> ProcessHandle<'ctx, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    /// Creates a handle for `entry`.
    pub fn new(ctx: &'ctx GuestContext<Driver>, entry: ProcessEntry) -> Self {
        Self {
            ctx,
            entry,
            modules: OnceCell::new(),
        }
    }

    /// Returns the context the process belongs to.
    pub fn context(&self) -> &'ctx GuestContext<Driver> {
        self.ctx
    }

    /// Returns the process record.
    pub fn entry(&self) -> &ProcessEntry {
        &self.entry
    }

    /// Returns the process ID.
    pub fn pid(&self) -> u32 {
        self.entry.pid
    }

    /// Returns the image file name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Returns the directory table base of the process address space.
    pub fn directory_table_base(&self) -> Pa {
        self.entry.directory_table_base
    }

    /// Reads a value from the process address space.
    pub fn read<T>(&self, address: Va) -> Result<T, WindowsError>
    where
        T: FromBytes + IntoBytes,
    {
        Ok(self.ctx.vmi().read_struct(self.access(address))?)
    }

    /// Writes a value to the process address space.
    pub fn write<T>(&self, address: Va, value: &T) -> Result<(), WindowsError>
    where
        T: IntoBytes + Immutable,
    {
        Ok(self.ctx.vmi().write(self.access(address), value.as_bytes())?)
    }

    /// Reads bytes from the process address space.
    pub fn read_bytes(&self, address: Va, buffer: &mut [u8]) -> Result<(), WindowsError> {
        Ok(self.ctx.vmi().read(self.access(address), buffer)?)
    }

    /// Writes bytes to the process address space.
    pub fn write_bytes(&self, address: Va, buffer: &[u8]) -> Result<(), WindowsError> {
        Ok(self.ctx.vmi().write(self.access(address), buffer)?)
    }

    /// Creates a batch of writes to the process address space.
    pub fn write_batch(&self) -> WriteBatch<'ctx, Driver> {
        self.ctx.vmi().write_batch(TranslationMechanism::Paging {
            root: self.entry.directory_table_base,
        })
    }

    /// Reads the process environment block.
    ///
    /// 32-bit processes under WoW64 report their 32-bit block. Fails with
    /// [`WindowsError::NoPeb`] if any pointer on the way to the block or its
    /// loader data is null or unreadable.
    pub fn peb(&self) -> Result<PebInfo, WindowsError> {
        let vmi = self.ctx.vmi();
        let offsets = self.ctx.offsets();
        let kernel_root = self.ctx.directory_table_base();

        let read_kernel_pointer = |va, offset| {
            vmi.read_va64(AccessContext::paging(field(va, offset), kernel_root))
                .map_err(|_| WindowsError::NoPeb)
        };

        let wow64 = read_kernel_pointer(self.entry.va, offsets.wow64_process)?;

        let (address, kind) = if wow64.is_null() {
            let peb = read_kernel_pointer(self.entry.va, offsets.peb)?;
            (peb, PebKind::Native)
        }
        else {
            let peb = match offsets.ewow64process_peb {
                Some(offset) => read_kernel_pointer(wow64, offset)?,
                None => wow64,
            };
            (peb, PebKind::Wow64)
        };

        if address.is_null() {
            return Err(WindowsError::NoPeb);
        }

        let layout = kind.layout(offsets);
        let read_pointer = |offset| {
            vmi.read_va(self.access(field(address, offset)), layout.width())
                .map_err(|_| WindowsError::NoPeb)
        };

        let image_base = read_pointer(layout.image_base_address)?;
        let ldr = read_pointer(layout.ldr)?;
        if ldr.is_null() {
            return Err(WindowsError::NoPeb);
        }

        Ok(PebInfo {
            address,
            kind,
            image_base,
            ldr,
        })
    }

    /// Returns the loaded modules.
    ///
    /// The list is read on first access and cached for the life of the
    /// handle. A failed read is not cached.
    pub fn modules(&self) -> Result<Sequence<'_, ModuleHandle<'ctx, Driver>>, WindowsError> {
        Ok(self.module_listing()?.sequence())
    }

    /// Returns the loaded modules together with the fault that stopped the
    /// module list walk early, if any.
    pub fn module_listing(
        &self,
    ) -> Result<&Listing<ModuleHandle<'ctx, Driver>, EnumError>, WindowsError> {
        self.modules.get_or_try_init(|| {
            let root = self.entry.directory_table_base;
            Ok(ModuleEnumerator::walk(self)?
                .map(|entry| ModuleHandle::new(self.ctx, root, entry)))
        })
    }

    /// Finds a loaded module by name, ignoring ASCII case.
    pub fn module(&self, name: &str) -> Result<&ModuleHandle<'ctx, Driver>, WindowsError> {
        self.module_listing()?
            .entries()
            .iter()
            .find(|module| module.name().eq_ignore_ascii_case(name))
            .ok_or(WindowsError::NotFound)
    }

    /// Finds a loaded module by base address.
    pub fn module_by_base(&self, base: Va) -> Result<&ModuleHandle<'ctx, Driver>, WindowsError> {
        self.module_listing()?
            .entries()
            .iter()
            .find(|module| module.base() == base)
            .ok_or(WindowsError::NotFound)
    }

    /// Resolves an export of the module loaded at `module_base`.
    pub fn find_export(&self, module_base: Va, name: &str) -> Result<Va, WindowsError> {
        self.module_by_base(module_base)?.find_export(name)
    }

    fn access(&self, address: Va) -> AccessContext {
        AccessContext::paging(address, self.entry.directory_table_base)
    }
}

impl<Driver> VmiVa for ProcessHandle<'_, Driver>
where
    Driver: VmiDriver<Architecture = Amd64>,
{
    fn va(&self) -> Va {
        self.entry.va
    }
}
