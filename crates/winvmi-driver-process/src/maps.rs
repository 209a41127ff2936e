use crate::Error;

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    /// First address of the mapping.
    pub start: u64,

    /// Address past the end of the mapping.
    pub end: u64,

    /// The mapping is readable.
    pub readable: bool,

    /// The mapping is writable.
    pub writable: bool,

    /// The mapping is shared rather than private.
    pub shared: bool,

    /// Backing file, or pseudo path such as `[heap]`.
    pub path: Option<String>,
}

impl MemoryMapping {
    /// Returns the size of the mapping in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Checks whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Checks whether the mapping is not backed by a regular file.
    ///
    /// Memory file descriptors count as anonymous; QEMU backs guest RAM
    /// with one when memory sharing is enabled.
    pub fn is_anonymous(&self) -> bool {
        match &self.path {
            None => true,
            Some(path) => path.starts_with("/memfd:"),
        }
    }

    /// Checks whether the mapping could hold guest RAM.
    pub fn is_guest_ram_candidate(&self) -> bool {
        self.readable && self.writable && self.is_anonymous()
    }
}

/// Reads and parses `/proc/<pid>/maps`.
pub fn read_maps(pid: u32) -> Result<Vec<MemoryMapping>, Error> {
    let text = std::fs::read_to_string(format!("/proc/{pid}/maps"))?;
    parse_maps(&text)
}

/// Parses the contents of a `/proc/<pid>/maps` file.
pub fn parse_maps(text: &str) -> Result<Vec<MemoryMapping>, Error> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_line(line).ok_or(Error::MalformedMaps { line: index + 1 }))
        .collect()
}

/// Format: `start-end perms offset dev inode [path]`.
fn parse_line(line: &str) -> Option<MemoryMapping> {
    let mut fields = line.split_whitespace();

    let (start, end) = fields.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    if end < start {
        return None;
    }

    let perms = fields.next()?.as_bytes();
    if perms.len() != 4 {
        return None;
    }

    // Offset, device and inode.
    for _ in 0..3 {
        fields.next()?;
    }

    // Paths may contain spaces, e.g. "/memfd:pc.ram (deleted)".
    let path = fields.collect::<Vec<_>>().join(" ");
    let path = (!path.is_empty()).then_some(path);

    Some(MemoryMapping {
        start,
        end,
        readable: perms[0] == b'r',
        writable: perms[1] == b'w',
        shared: perms[3] == b's',
        path,
    })
}

/// Returns the largest mapping that could hold guest RAM.
pub(crate) fn largest_guest_ram(maps: &[MemoryMapping]) -> Option<&MemoryMapping> {
    maps.iter()
        .filter(|mapping| mapping.is_guest_ram_candidate())
        .max_by_key(|mapping| mapping.len())
}
