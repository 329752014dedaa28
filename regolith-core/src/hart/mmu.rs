//! The memory path and the Sv32/Sv39/Sv48/Sv57/Sv64 page-table walker.
//!
//! Memory accesses are checked for fetch alignment, split at page boundaries while translation
//! is active, translated (unless tagged physical), bounds-checked against the physical address
//! space, and finally dispatched onto the system bus. Page-table walks re-enter the same path
//! with physically tagged reads, so PTE fetches see the same bus the program sees.

use nohash::IntMap;

use super::{csr, AccessKind, AccessType, Exception, Fault, Hart, MemFailure};
use crate::bus::Bus;
use crate::{Allocator, RawPrivilegeLevel, Xlen};

pub const PGSHIFT: u32 = 12;
pub const PGSIZE: u64 = 1 << PGSHIFT;
pub const PGMASK: u64 = PGSIZE - 1;

// The walker splits accesses at translation granularity; the backing memory must not be coarser.
const_assert_eq!(PGSIZE as usize, crate::resources::ram::PAGE_SIZE);

// Page-table entry fields.
const PTE_V: u64 = 0x001;
const PTE_R: u64 = 0x002;
const PTE_W: u64 = 0x004;
const PTE_X: u64 = 0x008;
const PTE_U: u64 = 0x010;
const PTE_A: u64 = 0x040;
const PTE_D: u64 = 0x080;
const PTE_PPN_SHIFT: u32 = 10;

/// A PTE with V set and none of R/W/X points to the next level of the page table.
fn pte_is_table(pte: u64) -> bool {
    pte & (PTE_V | PTE_R | PTE_W | PTE_X) == PTE_V
}

/// Shape of the active virtual-memory scheme, decoded from `satp` per translation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VmInfo {
    /// Number of page-table levels; `0` means Bare (no translation).
    pub levels: u32,
    /// Virtual-address bits consumed per level.
    pub idxbits: u32,
    /// Size of a PTE in bytes.
    pub ptesize: u32,
    /// Physical address of the root page table.
    pub ptbase: u64,
}

const BARE: VmInfo = VmInfo {
    levels: 0,
    idxbits: 0,
    ptesize: 0,
    ptbase: 0,
};

/// Decode the virtual-memory scheme in effect for an access at privilege level `mode`.
///
/// M-mode is never translated. Unsupported `satp` MODE values are fatal: the register is written
/// raw, so an unexpected value here means the simulation has already gone off the rails.
///
/// # Panics
///
/// Panics on reserved RV64 MODE values and on accesses from the reserved privilege level.
pub fn decode_vm_info(xlen: Xlen, mode: RawPrivilegeLevel, satp: u64) -> VmInfo {
    if mode == RawPrivilegeLevel::Machine {
        return BARE;
    }
    if mode.is_reserved() {
        panic!("address translation requested for reserved privilege level");
    }
    match xlen {
        Xlen::Rv32 => match (satp >> 31) & 0x1 {
            0 => BARE,
            _ => VmInfo {
                levels: 2,
                idxbits: 10,
                ptesize: 4,
                ptbase: (satp & 0x3F_FFFF) << PGSHIFT,
            },
        },
        Xlen::Rv64 => {
            let levels = match (satp >> 60) & 0xF {
                0 => return BARE,
                8 => 3,  // Sv39
                9 => 4,  // Sv48
                10 => 5, // Sv57
                11 => 6, // Sv64
                mode => panic!("unsupported satp MODE value {mode}"),
            };
            VmInfo {
                levels,
                idxbits: 9,
                ptesize: 8,
                ptbase: (satp & 0xFFF_FFFF_FFFF) << PGSHIFT,
            }
        }
    }
}

/// Cache of completed page-table walks, keyed by virtual page number.
///
/// Entries hold the flattened leaf: the physical page base of the translation with the PTE's
/// permission byte in the low bits. Entries stay valid until the next SFENCE.VMA; they are never
/// stale with respect to the A/D bits observed at insertion time, since a hit with insufficient
/// A/D evicts and re-walks.
#[derive(Debug, Clone, Default)]
pub(super) struct PtwCache {
    entries: IntMap<u64, u64>,
}

impl PtwCache {
    pub fn lookup(&self, vpn: u64) -> Option<u64> {
        self.entries.get(&vpn).copied()
    }

    pub fn insert(&mut self, vpn: u64, leaf: u64) {
        self.entries.insert(vpn, leaf);
    }

    pub fn evict(&mut self, vpn: u64) {
        self.entries.remove(&vpn);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Access wrapper around the system bus to address it as memory from the hart's point of view.
///
/// This takes into account the hart's privilege level (including the MPRV override), its address
/// translation state, and the device windows on the bus.
#[derive(Debug, Clone)]
pub struct Mmu<'c, A: Allocator, B: Bus<A>> {
    hart: &'c Hart<A, B>,
}

impl<'c, A: Allocator, B: Bus<A>> Mmu<'c, A, B> {
    pub(super) fn new(hart: &'c Hart<A, B>) -> Self {
        Self { hart }
    }

    pub(super) fn read(
        &self,
        buf: &mut [u8],
        allocator: &mut A,
        address: u64,
        access: AccessType,
    ) -> Result<(), MemFailure> {
        if access.kind == AccessKind::Fetch && address & 0x1 == 1 {
            return Err(Fault::new(Exception::InstructionAddressMisaligned, address).into());
        }
        if let Some(len1) = self.page_split(allocator, address, buf.len()) {
            let (first, second) = buf.split_at_mut(len1);
            self.read(first, allocator, address, access)?;
            return self.read(second, allocator, address + len1 as u64, access);
        }
        let paddr = self.physical(allocator, address, access)?;
        self.check_bounds(paddr, buf.len())?;
        match access.debug {
            false => self.hart.system_bus().read(buf, allocator, paddr),
            true => self.hart.system_bus().read_debug(buf, allocator, paddr),
        }
        Ok(())
    }

    pub(super) fn write(
        &self,
        allocator: &mut A,
        address: u64,
        buf: &[u8],
        access: AccessType,
    ) -> Result<(), MemFailure> {
        if let Some(len1) = self.page_split(allocator, address, buf.len()) {
            let (first, second) = buf.split_at(len1);
            self.write(allocator, address, first, access)?;
            return self.write(allocator, address + len1 as u64, second, access);
        }
        let paddr = self.physical(allocator, address, access)?;
        self.check_bounds(paddr, buf.len())?;
        match access.debug {
            false => self.hart.system_bus().write(allocator, paddr, buf),
            true => self.hart.system_bus().write_debug(allocator, paddr, buf),
        }
        Ok(())
    }

    /// Returns the length of the first chunk if the access crosses a page boundary while
    /// translation is active, so the two pages can be translated independently.
    fn page_split(&self, allocator: &A, address: u64, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if (address & !PGMASK) == (address.wrapping_add(len as u64 - 1) & !PGMASK) {
            return None;
        }
        let machine_state = self.hart.privilege_mode(allocator);
        let satp = self.hart.csr_raw(allocator, csr::SATP);
        let vm = decode_vm_info(self.hart.xlen(), machine_state.into(), satp);
        if vm.levels == 0 {
            return None;
        }
        let boundary = (address | PGMASK).checked_add(1)?;
        Some((boundary - address) as usize)
    }

    fn physical(
        &self,
        allocator: &mut A,
        address: u64,
        access: AccessType,
    ) -> Result<u64, MemFailure> {
        match access.physical {
            true => Ok(address),
            false => self.translate(allocator, address, access).map_err(Into::into),
        }
    }

    fn check_bounds(&self, paddr: u64, len: usize) -> Result<(), MemFailure> {
        let capacity = self.hart.xlen().mask() as u128 + 1;
        match paddr as u128 + len as u128 > capacity {
            true => Err(MemFailure::OutOfBounds),
            false => Ok(()),
        }
    }

    /// Map a virtual address to a physical address for an access of the given type.
    ///
    /// Consults the walk cache first; a miss (or a hit lacking the required accessed/dirty bits)
    /// performs a full walk, with PTE reads issued as physically tagged reads through the normal
    /// memory path. Superpage leaves are flattened to 4 KiB granularity before caching.
    pub fn translate(
        &self,
        allocator: &mut A,
        address: u64,
        access: AccessType,
    ) -> Result<u64, Fault> {
        let hart = self.hart;
        let xlen = hart.xlen();
        let status = hart.status(allocator);
        // MPRV redirects loads and stores (never fetches) to the privilege level in MPP.
        let mode: RawPrivilegeLevel = match access.kind != AccessKind::Fetch && status.mprv() {
            true => status.mpp().into(),
            false => hart.privilege_mode(allocator).into(),
        };
        let satp = hart.csr_raw(allocator, csr::SATP);
        let vm = decode_vm_info(xlen, mode, satp);
        if vm.levels == 0 {
            return Ok(address & xlen.mask());
        }

        let s_mode = mode == RawPrivilegeLevel::Supervisor;
        let sum = status.sum();
        let mxr = status.mxr();
        let ad = PTE_A
            | match access.kind == AccessKind::Write {
                true => PTE_D,
                false => 0,
            };
        let vpn = address >> PGSHIFT;

        if let Some(pte) = hart.ptw_cache.get(allocator).lookup(vpn) {
            if pte & ad == ad {
                return Ok((pte & !PGMASK) | (address & PGMASK));
            }
            // The walk that cached this entry didn't prove the required A/D bits; drop it and
            // walk afresh.
            hart.ptw_cache.get_mut(allocator).evict(vpn);
        }

        // Verify bits XLEN-1 : va_bits-1 are all equal. Sv64 consumes the entire address, in
        // which case there is nothing to check.
        let va_bits = PGSHIFT + vm.levels * vm.idxbits;
        let levels = match va_bits <= xlen.bits() {
            true => {
                let mask = (1u64 << (xlen.bits() - (va_bits - 1))) - 1;
                let masked_msbs = (address >> (va_bits - 1)) & mask;
                match masked_msbs != 0 && masked_msbs != mask {
                    true => 0, // non-canonical; skip the walk and fault below
                    false => vm.levels,
                }
            }
            false => vm.levels,
        };

        let mut base = vm.ptbase;
        for i in (0..levels).rev() {
            let ptshift = i * vm.idxbits;
            let idx = (address >> (PGSHIFT + ptshift)) & ((1u64 << vm.idxbits) - 1);

            let mut bytes = [0u8; 8];
            let pte_access = AccessType {
                physical: true,
                ..access
            };
            self.read(
                &mut bytes[..vm.ptesize as usize],
                allocator,
                base + idx * vm.ptesize as u64,
                pte_access,
            )
            .map_err(|_| Fault::new(Exception::LoadAccessFault, address))?;
            let pte = u64::from_le_bytes(bytes);
            let ppn = pte >> PTE_PPN_SHIFT;

            if pte_is_table(pte) {
                base = ppn << PGSHIFT;
                continue;
            }
            if !leaf_permits(pte, access.kind, s_mode, sum, mxr) {
                break;
            }
            // Superpage leaves must have their low PPN bits clear.
            if ppn & ((1u64 << ptshift) - 1) != 0 {
                break;
            }
            // Hardware never sets A/D; take the fault so software can.
            if pte & ad != ad {
                break;
            }
            // For superpage mappings, make a fake 4 KiB leaf for the cache's benefit.
            let value = (ppn | (vpn & ((1u64 << ptshift) - 1))) << PGSHIFT;
            hart.ptw_cache
                .get_mut(allocator)
                .insert(vpn, value | (pte & 0xFF));
            return Ok(value | (address & PGMASK));
        }

        Err(Fault::new(
            match access.kind {
                AccessKind::Fetch => Exception::InstructionPageFault,
                AccessKind::Read => Exception::LoadPageFault,
                AccessKind::Write => Exception::StorePageFault,
            },
            address,
        ))
    }
}

/// The per-leaf permission checks, in architectural order: the user-access gate, structural
/// validity, then the access-type permission (with MXR letting loads use execute-only pages).
fn leaf_permits(pte: u64, kind: AccessKind, s_mode: bool, sum: bool, mxr: bool) -> bool {
    if pte & PTE_U != 0 {
        if s_mode && (kind == AccessKind::Fetch || !sum) {
            return false;
        }
    } else if !s_mode {
        return false;
    }
    if pte & PTE_V == 0 || (pte & PTE_R == 0 && pte & PTE_W != 0) {
        return false;
    }
    match kind {
        AccessKind::Fetch => pte & PTE_X != 0,
        AccessKind::Read => pte & PTE_R != 0 || (mxr && pte & PTE_X != 0),
        AccessKind::Write => pte & PTE_R != 0 && pte & PTE_W != 0,
    }
}
