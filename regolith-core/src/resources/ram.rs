use crate::bus::Bus;
use crate::{Allocated, Allocator, Xlen};
use nohash::IntMap;

/// Size of a backing page. Matches the 4 KiB granularity of the virtual memory system.
pub const PAGE_SIZE: usize = 4096;

const_assert!(PAGE_SIZE.is_power_of_two());

type Page = Box<[u8; PAGE_SIZE]>;

/// Byte-addressable sparse memory covering the full `2^XLEN` address space.
///
/// Pages are materialised lazily: a page only occupies host memory once it has been written to.
/// Reads from untouched pages return zeros without allocating.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec: reads and writes have no side effects.
#[derive(Debug)]
pub struct SparseRam<A: Allocator> {
    pages: Allocated<A, PageMap>,
    /// The highest byte address.
    max_address: u64,
}

#[derive(Debug, Clone, Default)]
struct PageMap {
    pages: IntMap<u64, Page>,
}

impl<A: Allocator> SparseRam<A> {
    /// Create a new zero-initialized sparse memory addressable with `xlen`-wide addresses.
    pub fn new(allocator: &mut A, xlen: Xlen) -> Self {
        Self {
            pages: Allocated::new(allocator, PageMap::default()),
            max_address: xlen.mask(),
        }
    }

    /// Returns the highest valid byte address.
    pub fn max_address(&self) -> u64 {
        self.max_address
    }

    pub fn drop(self, allocator: &mut A) {
        self.pages.drop(allocator);
    }

    /// Force memory back to its reset state, which is all-zeros.
    pub fn reset(&self, allocator: &mut A) {
        self.pages.get_mut(allocator).pages.clear();
    }

    /// Reads a range of bytes into `buf`. Bytes of pages that were never written read as zero.
    ///
    /// Addresses beyond [`Self::max_address`] are left untouched in `buf`; the caller is expected
    /// to have bounds-checked the access.
    pub fn read(&self, buf: &mut [u8], allocator: &A, address: u64) {
        let map = self.pages.get(allocator);
        let mut pos = 0;
        while pos < buf.len() {
            let Some(address) = address.checked_add(pos as u64) else {
                return;
            };
            if address > self.max_address {
                return;
            }
            let offset = (address % PAGE_SIZE as u64) as usize;
            let chunk = (buf.len() - pos).min(PAGE_SIZE - offset);
            match map.pages.get(&(address / PAGE_SIZE as u64)) {
                Some(page) => buf[pos..pos + chunk].copy_from_slice(&page[offset..offset + chunk]),
                None => buf[pos..pos + chunk].fill(0),
            }
            pos += chunk;
        }
    }

    /// Writes a range of bytes from `buf`, materialising pages as needed.
    ///
    /// Bytes addressed beyond [`Self::max_address`] are ignored.
    pub fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let map = self.pages.get_mut(allocator);
        let mut pos = 0;
        while pos < buf.len() {
            let Some(address) = address.checked_add(pos as u64) else {
                return;
            };
            if address > self.max_address {
                return;
            }
            let offset = (address % PAGE_SIZE as u64) as usize;
            let chunk = (buf.len() - pos).min(PAGE_SIZE - offset);
            let page = map
                .pages
                .entry(address / PAGE_SIZE as u64)
                .or_insert_with(|| Box::new([0; PAGE_SIZE]));
            page[offset..offset + chunk].copy_from_slice(&buf[pos..pos + chunk]);
            pos += chunk;
        }
    }
}

impl<A: Allocator> Bus<A> for SparseRam<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.read(buf, allocator, address);
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        self.read(buf, allocator, address);
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.write(allocator, address, buf);
    }

    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.write(allocator, address, buf);
    }
}
