#![allow(dead_code)]

pub mod guest;
pub mod pe;

use std::{cell::RefCell, collections::HashMap};

use winvmi_arch_amd64::{Amd64, PageTableEntry, PageTableLevel};
use winvmi_core::{Architecture as _, Gfn, Pa, Va, VmiDriver, VmiError, VmiInfo};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

///////////////////////////////////////////////////////////////////////////////
// Mock Driver
///////////////////////////////////////////////////////////////////////////////

/// Sparse guest physical memory.
#[derive(Default)]
pub struct MockDriver {
    pages: RefCell<HashMap<Gfn, Vec<u8>>>,
    writes: RefCell<Vec<(Pa, Vec<u8>)>>,
}

impl MockDriver {
    pub fn insert_page(&self, gfn: Gfn) {
        self.pages
            .borrow_mut()
            .entry(gfn)
            .or_insert_with(|| vec![0u8; Amd64::PAGE_SIZE as usize]);
    }

    pub fn remove_page(&self, gfn: Gfn) {
        self.pages.borrow_mut().remove(&gfn);
    }

    pub fn has_page(&self, gfn: Gfn) -> bool {
        self.pages.borrow().contains_key(&gfn)
    }

    /// Writes bytes without recording them as guest writes.
    pub fn poke(&self, pa: Pa, data: &[u8]) {
        let mut position = 0;
        while position < data.len() {
            let address = pa + position as u64;
            let offset = Amd64::pa_offset(address) as usize;
            let size = (Amd64::PAGE_SIZE as usize - offset).min(data.len() - position);

            let mut pages = self.pages.borrow_mut();
            let page = pages
                .get_mut(&Amd64::gfn_from_pa(address))
                .unwrap_or_else(|| panic!("no page at {address}"));
            page[offset..offset + size].copy_from_slice(&data[position..position + size]);

            position += size;
        }
    }

    pub fn peek(&self, pa: Pa, size: usize) -> Vec<u8> {
        let offset = Amd64::pa_offset(pa) as usize;
        let pages = self.pages.borrow();
        let page = pages
            .get(&Amd64::gfn_from_pa(pa))
            .unwrap_or_else(|| panic!("no page at {pa}"));
        page[offset..offset + size].to_vec()
    }

    pub fn writes(&self) -> Vec<(Pa, Vec<u8>)> {
        self.writes.borrow().clone()
    }
}

impl VmiDriver for MockDriver {
    type Architecture = Amd64;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        Ok(VmiInfo {
            page_size: Amd64::PAGE_SIZE,
            page_shift: Amd64::PAGE_SHIFT,
            max_gfn: Gfn(0xfffff),
        })
    }

    fn read(&self, pa: Pa, buffer: &mut [u8]) -> Result<usize, VmiError> {
        let offset = Amd64::pa_offset(pa) as usize;
        let pages = self.pages.borrow();
        let page = pages
            .get(&Amd64::gfn_from_pa(pa))
            .ok_or(VmiError::OutOfBounds)?;
        buffer.copy_from_slice(&page[offset..offset + buffer.len()]);
        Ok(buffer.len())
    }

    fn write(&self, pa: Pa, buffer: &[u8]) -> Result<usize, VmiError> {
        let offset = Amd64::pa_offset(pa) as usize;
        let mut pages = self.pages.borrow_mut();
        let page = pages
            .get_mut(&Amd64::gfn_from_pa(pa))
            .ok_or(VmiError::OutOfBounds)?;
        page[offset..offset + buffer.len()].copy_from_slice(buffer);
        self.writes.borrow_mut().push((pa, buffer.to_vec()));
        Ok(buffer.len())
    }
}

///////////////////////////////////////////////////////////////////////////////
// Memory Builder
///////////////////////////////////////////////////////////////////////////////

/// Allocates guest frames and builds 4-level page tables on a [`MockDriver`].
pub struct MemoryBuilder {
    driver: MockDriver,
    next_gfn: u64,
}

impl MemoryBuilder {
    /// Frames are allocated above the first megabyte, which is left for
    /// the low stub.
    pub fn new() -> Self {
        Self {
            driver: MockDriver::default(),
            next_gfn: 0x100,
        }
    }

    pub fn driver(&self) -> &MockDriver {
        &self.driver
    }

    pub fn finish(self) -> MockDriver {
        self.driver
    }

    pub fn alloc(&mut self) -> Gfn {
        let gfn = Gfn(self.next_gfn);
        self.next_gfn += 1;
        self.driver.insert_page(gfn);
        gfn
    }

    /// Allocates an empty top-level table.
    pub fn address_space(&mut self) -> Pa {
        Amd64::pa_from_gfn(self.alloc())
    }

    /// Copies the kernel half of `from` into `to`.
    pub fn share_kernel(&mut self, from: Pa, to: Pa) {
        let upper = self.driver.peek(from + 0x800, 0x800);
        self.driver.poke(to + 0x800, &upper);
    }

    fn read_entry(&self, address: Pa) -> PageTableEntry {
        let raw = self.driver.peek(address, 8);
        PageTableEntry(u64::from_le_bytes(raw.try_into().unwrap()))
    }

    fn write_entry(&self, address: Pa, gfn: Gfn) {
        let entry = (gfn.0 << 12) | 0b111;
        self.driver.poke(address, &entry.to_le_bytes());
    }

    /// Maps the page containing `va`, allocating tables and the frame as
    /// needed. Returns the physical address of `va`.
    pub fn map(&mut self, root: Pa, va: Va) -> Pa {
        let mut table = root;
        let mut level = PageTableLevel::Pml4;

        loop {
            let entry_address = table + Amd64::va_index_for(va, level) * 8;
            let mut entry = self.read_entry(entry_address);
            if !entry.present() {
                let gfn = self.alloc();
                self.write_entry(entry_address, gfn);
                entry = self.read_entry(entry_address);
            }

            match level.next() {
                Some(next) => {
                    table = Amd64::pa_from_gfn(entry.pfn());
                    level = next;
                }
                None => return Amd64::pa_from_gfn(entry.pfn()) + Amd64::va_offset(va),
            }
        }
    }

    /// Removes the mapping of the page containing `va`.
    pub fn unmap(&mut self, root: Pa, va: Va) {
        let mut table = root;
        let mut level = PageTableLevel::Pml4;

        loop {
            let entry_address = table + Amd64::va_index_for(va, level) * 8;
            let entry = self.read_entry(entry_address);
            if !entry.present() {
                return;
            }

            match level.next() {
                Some(next) => {
                    table = Amd64::pa_from_gfn(entry.pfn());
                    level = next;
                }
                None => {
                    self.driver.poke(entry_address, &0u64.to_le_bytes());
                    return;
                }
            }
        }
    }

    /// Writes `data` at `va`, mapping pages as needed.
    pub fn write(&mut self, root: Pa, va: Va, data: &[u8]) {
        let mut position = 0;
        while position < data.len() {
            let address = va + position as u64;
            let size = (Amd64::PAGE_SIZE - Amd64::va_offset(address)) as usize;
            let size = size.min(data.len() - position);

            let pa = self.map(root, address);
            self.driver.poke(pa, &data[position..position + size]);
            position += size;
        }
    }

    pub fn write_u16(&mut self, root: Pa, va: Va, value: u16) {
        self.write(root, va, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, root: Pa, va: Va, value: u32) {
        self.write(root, va, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, root: Pa, va: Va, value: u64) {
        self.write(root, va, &value.to_le_bytes());
    }
}
