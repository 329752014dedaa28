//! Provides the privileged-architecture core of a single RV32/RV64 hart.
//!
//! The hart models everything a guest program observes apart from instruction decode/execute:
//! the CSR file and its per-privilege views, the U/S/M privilege stack, trap entry and exit, the
//! page-table walker with its translation cache, the load/store path with its memory-mapped
//! device hooks, the LR/SC reservation set, and interrupt prioritisation. Fetching and executing
//! instructions is the job of an external executor that drives this core through
//! [`Hart::read`]/[`Hart::write`] and the trap entry points.

pub mod csr;
mod interrupts;
mod mmu;
mod status;
mod trap;

use std::collections::HashMap;
use std::fmt;

use log::trace;
use nohash::IntMap;
use thiserror::Error;

use crate::bus::Bus;
use crate::{Allocated, Allocator, PrivilegeLevel, Xlen};
use csr::{CsrFile, CsrSpecifier, ReadHook, WriteHook};
use mmu::PtwCache;

pub use mmu::{decode_vm_info, Mmu, VmInfo, PGMASK, PGSHIFT, PGSIZE};
pub use status::Status;
pub use trap::TrapCause;

#[derive(Debug, Clone)]
pub struct Config {
    /// Register width of the hart. All architectural state is kept as `u64` internally and
    /// truncated to this width where observable.
    pub xlen: Xlen,
    /// Address to which the hart's `pc` and `next_pc` registers are reset.
    pub reset_vector: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xlen: Xlen::Rv32,
            reset_vector: 0,
        }
    }
}

/// The program-counter pair of a hart.
///
/// `pc` is the address of the instruction currently being executed; `next_pc` the address the
/// executor will continue at. Trap entry and exit redirect control flow by replacing `next_pc`.
#[derive(Debug, Clone, Default)]
pub struct Registers {
    pc: u64,
    next_pc: u64,
}

impl Registers {
    pub fn new(reset_vector: u64) -> Self {
        Self {
            pc: reset_vector,
            next_pc: reset_vector,
        }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    pub fn next_pc(&self) -> u64 {
        self.next_pc
    }

    pub fn set_next_pc(&mut self, next_pc: u64) {
        self.next_pc = next_pc;
    }
}

/// Retired-instruction counter of a hart.
///
/// Allocated separately from the other register state because memory-mapped timers derive their
/// values from it, and therefore share the handle.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    icount: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icount(&self) -> u64 {
        self.icount
    }

    pub fn set_icount(&mut self, icount: u64) {
        self.icount = icount;
    }

    /// Count one retired instruction.
    pub fn retire(&mut self) {
        self.icount = self.icount.wrapping_add(1);
    }
}

/// Latched trap state, surfaced to the executor between instructions.
///
/// A failing access raises its trap by storing the exception here (together with the bad address
/// in `fault_data`); the executor observes it on its next cycle and reifies it through
/// [`Hart::enter_trap`]. Pending interrupts are latched separately by the prioritisation logic.
#[derive(Debug, Clone, Default)]
pub struct TrapState {
    taken: Option<Exception>,
    pending_interrupt: Option<u16>,
    fault_data: u64,
}

impl TrapState {
    /// The exception raised by the last failing access, if it has not been entered yet.
    pub fn taken(&self) -> Option<Exception> {
        self.taken
    }

    /// The highest-priority enabled pending interrupt, as computed by the last
    /// `mstatus`/`mie`/`mip` update.
    pub fn pending_interrupt(&self) -> Option<u16> {
        self.pending_interrupt
    }

    /// The faulting address (or other trap value) that will be written to `xtval` on trap entry.
    pub fn fault_data(&self) -> u64 {
        self.fault_data
    }
}

/// Synchronous exceptions of the privileged architecture.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not aligned to a halfword boundary.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - `satp`/SFENCE.VMA/SRET/WFI intercepted by the TVM/TSR/TW bits.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAddressMisaligned,
    StoreAccessFault,
    /// Environment call. Carries the raw cause (11); the effective cause is derived from the
    /// privilege level the call was made from at trap-entry time.
    EnvironmentCall,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    ///
    /// [`Exception::EnvironmentCall`] reports its raw, unadjusted code.
    pub fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreAddressMisaligned => 6,
            Self::StoreAccessFault => 7,
            Self::EnvironmentCall => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StorePageFault => 15,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstructionAddressMisaligned => "Instruction address misaligned",
            Self::InstructionAccessFault => "Instruction access fault",
            Self::IllegalInstruction => "Illegal instruction",
            Self::Breakpoint => "Breakpoint",
            Self::LoadAddressMisaligned => "Load address misaligned",
            Self::LoadAccessFault => "Load access fault",
            Self::StoreAddressMisaligned => "Store/AMO address misaligned",
            Self::StoreAccessFault => "Store/AMO access fault",
            Self::EnvironmentCall => "Environment call",
            Self::InstructionPageFault => "Instruction page fault",
            Self::LoadPageFault => "Load page fault",
            Self::StorePageFault => "Store/AMO page fault",
        })
    }
}

/// A trap descriptor carried up the call stack by failing accesses.
///
/// Deep code never touches the latched [`TrapState`] directly; the top-level entry points are the
/// only place a `Fault` is materialised into it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Fault {
    pub exception: Exception,
    /// Value for `fault_data` (and eventually `xtval`). `None` leaves `fault_data` untouched.
    pub tval: Option<u64>,
}

impl Fault {
    fn new(exception: Exception, tval: u64) -> Self {
        Self {
            exception,
            tval: Some(tval),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tval {
            Some(tval) => write!(f, "{} @ {:#x}", self.exception, tval),
            None => write!(f, "{}", self.exception),
        }
    }
}

/// The address spaces an executor-issued access can target.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressSpace {
    /// The virtual (or, with [`AccessType::physical`], physical) memory space.
    Memory,
    /// The 12-bit CSR space.
    Csr,
    /// Fence operations, encoded by address value (`2`/`3` are the SFENCE.VMA halves).
    Fence,
    /// The LR/SC reservation set, addressed by byte address.
    Reservation,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessKind {
    Fetch,
    Read,
    Write,
}

/// Kind of an access plus its modifier flags.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AccessType {
    pub kind: AccessKind,
    /// Debug accesses report traps synchronously instead of latching them, and suppress device
    /// side effects.
    pub debug: bool,
    /// Physical accesses bypass address translation.
    pub physical: bool,
}

impl AccessType {
    pub fn fetch() -> Self {
        Self {
            kind: AccessKind::Fetch,
            debug: false,
            physical: false,
        }
    }

    pub fn read() -> Self {
        Self {
            kind: AccessKind::Read,
            debug: false,
            physical: false,
        }
    }

    pub fn write() -> Self {
        Self {
            kind: AccessKind::Write,
            debug: false,
            physical: false,
        }
    }

    pub fn debug(self) -> Self {
        Self {
            debug: true,
            ..self
        }
    }

    pub fn physical(self) -> Self {
        Self {
            physical: true,
            ..self
        }
    }
}

/// An executor-facing address: a value within one of the hart's address spaces, together with the
/// access type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Address {
    pub space: AddressSpace,
    pub access: AccessType,
    pub value: u64,
}

impl Address {
    pub fn mem(value: u64, access: AccessType) -> Self {
        Self {
            space: AddressSpace::Memory,
            access,
            value,
        }
    }

    pub fn csr(specifier: CsrSpecifier, access: AccessType) -> Self {
        Self {
            space: AddressSpace::Csr,
            access,
            value: specifier as u64,
        }
    }

    pub fn fence(op: u64) -> Self {
        Self {
            space: AddressSpace::Fence,
            access: AccessType::write(),
            value: op,
        }
    }

    pub fn reservation(value: u64, access: AccessType) -> Self {
        Self {
            space: AddressSpace::Reservation,
            access,
            value,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{:#x}", self.space, self.value)
    }
}

/// The two SFENCE.VMA codes in the [`AddressSpace::Fence`] space.
pub const FENCE_VMA_LOWER: u64 = 2;
pub const FENCE_VMA_UPPER: u64 = 3;

/// Errors reported by the hart's access entry points.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    /// An architectural trap was raised; it has been latched in [`TrapState`] for the executor to
    /// enter on its next cycle.
    #[error("architectural trap raised")]
    Trap,
    /// An architectural trap on a debug-tagged access, reported synchronously and *not* latched.
    #[error("trap on debug access: {0}")]
    DebugTrap(Fault),
    /// The physical access extends beyond the end of the address space. No trap is raised.
    #[error("physical address beyond the end of memory")]
    OutOfBounds,
    /// A CSR access with a width other than XLEN. No trap is raised.
    #[error("CSR accesses must be exactly XLEN bits wide")]
    InvalidLength,
    /// A CSR address outside the 12-bit CSR space, or a counter shadow that does not exist for
    /// this XLEN. No trap is raised.
    #[error("no such CSR")]
    UnknownCsr,
}

/// Failure of an inner memory-path operation; converted to [`AccessError`] (and possibly a
/// latched trap) only at the hart's entry points.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum MemFailure {
    Fault(Fault),
    OutOfBounds,
}

impl From<Fault> for MemFailure {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// Failure of an inner CSR operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum CsrFailure {
    Fault(Fault),
    /// Hard error: nonexistent CSR (address out of range, or an RV32-only shadow on RV64).
    Unsupported,
}

impl From<Fault> for CsrFailure {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// The LR/SC reservation set.
///
/// A reservation exists iff the address is a key and the marker is non-zero.
#[derive(Debug, Clone, Default)]
struct ReservationSet {
    markers: IntMap<u64, u8>,
}

/// A single RISC-V hart's privileged-architecture state and logic.
///
/// As we don't support hardware multithreading, every core always only has a single hart; `Hart`
/// is the whole of a core minus its instruction fetch/execute unit.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// All accesses are funnelled through [`Hart::read`] and [`Hart::write`], which dispatch on the
/// target [`AddressSpace`]. Memory accesses pass through address translation (unless tagged
/// physical) and then hit the system bus, where device windows and the sparse memory live.
#[derive(Debug)]
pub struct Hart<A: Allocator, B: Bus<A>> {
    config: Config,
    system_bus: B,
    registers: Allocated<A, Registers>,
    /// Shared with memory-mapped timers, hence allocated by the caller.
    counters: Allocated<A, Counters>,
    trap: Allocated<A, TrapState>,
    csrs: Allocated<A, CsrFile>,
    privilege_mode: Allocated<A, PrivilegeLevel>,
    ptw_cache: Allocated<A, PtwCache>,
    reservations: Allocated<A, ReservationSet>,
    read_hooks: HashMap<CsrSpecifier, ReadHook>,
    write_hooks: HashMap<CsrSpecifier, WriteHook>,
}

impl<A: Allocator, B: Bus<A>> Hart<A, B> {
    /// Create a hart in its reset state.
    ///
    /// `counters` is the retired-instruction counter; it is passed in rather than allocated here
    /// so that memory-mapped timers can hold a clone of the same handle.
    pub fn new(
        allocator: &mut A,
        system_bus: B,
        counters: Allocated<A, Counters>,
        config: Config,
    ) -> Self {
        let mut csrs = CsrFile::default();
        csrs.reset(config.xlen);
        Self {
            system_bus,
            registers: Allocated::new(allocator, Registers::new(config.reset_vector)),
            counters,
            trap: Allocated::new(allocator, TrapState::default()),
            csrs: Allocated::new(allocator, csrs),
            privilege_mode: Allocated::new(allocator, PrivilegeLevel::Machine),
            ptw_cache: Allocated::new(allocator, PtwCache::default()),
            reservations: Allocated::new(allocator, ReservationSet::default()),
            read_hooks: csr::read_hooks(),
            write_hooks: csr::write_hooks(),
            config,
        }
    }

    pub fn drop(self, allocator: &mut A) {
        self.registers.drop(allocator);
        self.trap.drop(allocator);
        self.csrs.drop(allocator);
        self.privilege_mode.drop(allocator);
        self.ptw_cache.drop(allocator);
        self.reservations.drop(allocator);
    }

    /// Force this hart back to its reset state.
    pub fn reset(&self, allocator: &mut A) {
        *self.registers.get_mut(allocator) = Registers::new(self.config.reset_vector);
        *self.trap.get_mut(allocator) = TrapState::default();
        self.csrs.get_mut(allocator).reset(self.config.xlen);
        *self.privilege_mode.get_mut(allocator) = PrivilegeLevel::Machine;
        self.ptw_cache.get_mut(allocator).clear();
        self.reservations.get_mut(allocator).markers.clear();
    }

    /// Provide a read-only view of this hart's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn xlen(&self) -> Xlen {
        self.config.xlen
    }

    pub fn system_bus(&self) -> &B {
        &self.system_bus
    }

    pub fn registers<'a>(&self, allocator: &'a A) -> &'a Registers {
        self.registers.get(allocator)
    }

    pub fn registers_mut<'a>(&self, allocator: &'a mut A) -> &'a mut Registers {
        self.registers.get_mut(allocator)
    }

    pub fn counters<'a>(&self, allocator: &'a A) -> &'a Counters {
        self.counters.get(allocator)
    }

    pub fn counters_mut<'a>(&self, allocator: &'a mut A) -> &'a mut Counters {
        self.counters.get_mut(allocator)
    }

    /// The latched trap state the executor polls between instructions.
    pub fn trap<'a>(&self, allocator: &'a A) -> &'a TrapState {
        self.trap.get(allocator)
    }

    /// Returns the current privilege mode the hart is in.
    pub fn privilege_mode(&self, allocator: &A) -> PrivilegeLevel {
        *self.privilege_mode.get(allocator)
    }

    /// Force the hart into a privilege mode.
    ///
    /// The privilege mode is part of the externally owned register block; trap entry/exit moves
    /// it architecturally, but the embedding executor (or a test harness) may set it directly.
    pub fn set_privilege_mode(&self, allocator: &mut A, level: PrivilegeLevel) {
        *self.privilege_mode.get_mut(allocator) = level;
    }

    /// Provides an access wrapper around the system bus to address it as this hart's memory.
    pub fn mmu(&self) -> Mmu<A, B> {
        Mmu::new(self)
    }

    /// Invoke a read access for `address`, filling `buf` with `buf.len()` bytes.
    ///
    /// Architectural traps latch into [`TrapState`] and surface as [`AccessError::Trap`], except
    /// on debug-tagged accesses, where they are reported synchronously as
    /// [`AccessError::DebugTrap`].
    pub fn read(
        &self,
        allocator: &mut A,
        address: Address,
        buf: &mut [u8],
    ) -> Result<(), AccessError> {
        trace!("read of {} bytes @{}", buf.len(), address);
        match address.space {
            AddressSpace::Memory => self
                .mmu()
                .read(buf, allocator, address.value, address.access)
                .map_err(|failure| self.surface(allocator, address.access, failure)),
            AddressSpace::Csr => {
                let specifier = self.check_csr_address(address, buf.len())?;
                let value = self
                    .read_csr_inner(allocator, specifier)
                    .map_err(|failure| self.surface_csr(allocator, address.access, failure))?;
                let bytes = value.to_le_bytes();
                buf.copy_from_slice(&bytes[..buf.len()]);
                Ok(())
            }
            AddressSpace::Fence => self
                .fence(allocator, address.value)
                .map_err(|fault| self.surface(allocator, address.access, fault.into())),
            AddressSpace::Reservation => {
                let reservations = self.reservations.get_mut(allocator);
                let held = reservations
                    .markers
                    .get(&address.value)
                    .is_some_and(|marker| *marker != 0);
                if held {
                    buf.fill(0xFF);
                    reservations.markers.remove(&address.value);
                } else {
                    buf.fill(0);
                }
                Ok(())
            }
        }
    }

    /// Invoke a write access for `address`, storing the `buf.len()` bytes of `buf`.
    ///
    /// Trap reporting follows the same rules as [`Hart::read`].
    pub fn write(
        &self,
        allocator: &mut A,
        address: Address,
        buf: &[u8],
    ) -> Result<(), AccessError> {
        trace!("write of {} bytes @{}", buf.len(), address);
        match address.space {
            AddressSpace::Memory => self
                .mmu()
                .write(allocator, address.value, buf, address.access)
                .map_err(|failure| self.surface(allocator, address.access, failure)),
            AddressSpace::Csr => {
                let specifier = self.check_csr_address(address, buf.len())?;
                let mut bytes = [0u8; 8];
                bytes[..buf.len()].copy_from_slice(buf);
                self.write_csr_inner(allocator, specifier, u64::from_le_bytes(bytes))
                    .map_err(|failure| self.surface_csr(allocator, address.access, failure))
            }
            AddressSpace::Fence => {
                if matches!(address.value, FENCE_VMA_LOWER | FENCE_VMA_UPPER) {
                    self.ptw_cache.get_mut(allocator).clear();
                }
                self.fence(allocator, address.value)
                    .map_err(|fault| self.surface(allocator, address.access, fault.into()))
            }
            AddressSpace::Reservation => {
                let marker = buf.first().copied().unwrap_or(0);
                self.reservations
                    .get_mut(allocator)
                    .markers
                    .insert(address.value, marker);
                Ok(())
            }
        }
    }

    /// Read the value of a CSR by its specifier, at the hart's current privilege level.
    pub fn read_csr(&self, allocator: &mut A, specifier: CsrSpecifier) -> Result<u64, AccessError> {
        self.read_csr_inner(allocator, specifier)
            .map_err(|failure| self.surface_csr(allocator, AccessType::read(), failure))
    }

    /// Write `value` to a CSR by its specifier, at the hart's current privilege level.
    pub fn write_csr(
        &self,
        allocator: &mut A,
        specifier: CsrSpecifier,
        value: u64,
    ) -> Result<(), AccessError> {
        self.write_csr_inner(allocator, specifier, value)
            .map_err(|failure| self.surface_csr(allocator, AccessType::write(), failure))
    }

    /// Map an executor-facing address to a physical address.
    ///
    /// Non-memory addresses map to themselves, truncated to XLEN. Memory addresses pass through
    /// the page-table walker unless tagged physical.
    pub fn v2p(&self, allocator: &mut A, address: Address) -> Result<u64, AccessError> {
        if address.space != AddressSpace::Memory || address.access.physical {
            return Ok(self.config.xlen.truncate(address.value));
        }
        self.mmu()
            .translate(allocator, address.value, address.access)
            .map_err(|fault| self.surface(allocator, address.access, fault.into()))
    }

    /// Execute the fence operation `op` (the [`AddressSpace::Fence`] address value).
    ///
    /// The PTW cache flush for SFENCE.VMA happens on the write path before this check runs.
    fn fence(&self, allocator: &mut A, op: u64) -> Result<(), Fault> {
        match op {
            FENCE_VMA_LOWER | FENCE_VMA_UPPER => {
                let privilege = self.privilege_mode(allocator);
                if privilege == PrivilegeLevel::Supervisor && self.status(allocator).tvm() {
                    let pc = self.registers(allocator).pc();
                    return Err(Fault::new(Exception::IllegalInstruction, pc));
                }
                Ok(())
            }
            // Plain FENCE/FENCE.I codes have no effect on this core.
            _ => Ok(()),
        }
    }

    fn check_csr_address(&self, address: Address, len: usize) -> Result<CsrSpecifier, AccessError> {
        if len != self.config.xlen.bytes() as usize {
            return Err(AccessError::InvalidLength);
        }
        if address.value >= 1 << 12 {
            return Err(AccessError::UnknownCsr);
        }
        Ok(address.value as CsrSpecifier)
    }

    /// Latch a fault into [`TrapState`] for the executor to observe.
    pub(crate) fn raise(&self, allocator: &mut A, fault: Fault) {
        let trap = self.trap.get_mut(allocator);
        trap.taken = Some(fault.exception);
        if let Some(tval) = fault.tval {
            trap.fault_data = tval;
        }
    }

    /// The single point where a [`Fault`] becomes observable: latched into [`TrapState`] for
    /// regular accesses, passed through synchronously for debug accesses.
    fn surface(&self, allocator: &mut A, access: AccessType, failure: MemFailure) -> AccessError {
        match failure {
            MemFailure::OutOfBounds => AccessError::OutOfBounds,
            MemFailure::Fault(fault) => {
                if access.debug {
                    return AccessError::DebugTrap(fault);
                }
                self.raise(allocator, fault);
                AccessError::Trap
            }
        }
    }

    fn surface_csr(&self, allocator: &mut A, access: AccessType, failure: CsrFailure) -> AccessError {
        match failure {
            CsrFailure::Unsupported => AccessError::UnknownCsr,
            CsrFailure::Fault(fault) => self.surface(allocator, access, fault.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ram::SparseRam;
    use bedrock::Arena;
    use std::rc::Rc;

    pub(super) type TestHart = Hart<Arena, Rc<SparseRam<Arena>>>;

    impl<A: Allocator> Bus<A> for Rc<SparseRam<A>> {
        fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
            SparseRam::read(self, buf, allocator, address);
        }

        fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
            SparseRam::read(self, buf, allocator, address);
        }

        fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
            SparseRam::write(self, allocator, address, buf);
        }

        fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
            SparseRam::write(self, allocator, address, buf);
        }
    }

    pub(super) fn hart(xlen: Xlen) -> (Arena, TestHart) {
        let mut allocator = Arena::new();
        let ram = Rc::new(SparseRam::new(&mut allocator, xlen));
        let counters = Allocated::new(&mut allocator, Counters::new());
        let hart = Hart::new(
            &mut allocator,
            ram,
            counters,
            Config {
                xlen,
                reset_vector: 0,
            },
        );
        (allocator, hart)
    }

    #[test]
    fn test_reservation_consumed_once() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let addr = Address::reservation(0x8000_0100, AccessType::write());
        hart.write(&mut allocator, addr, &[1]).unwrap();
        let mut buf = [0u8; 4];
        hart.read(
            &mut allocator,
            Address::reservation(0x8000_0100, AccessType::read()),
            &mut buf,
        )
        .unwrap();
        assert_eq!([0xFF; 4], buf);
        hart.read(
            &mut allocator,
            Address::reservation(0x8000_0100, AccessType::read()),
            &mut buf,
        )
        .unwrap();
        assert_eq!([0x00; 4], buf);
    }

    #[test]
    fn test_zero_marker_is_no_reservation() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        hart.write(
            &mut allocator,
            Address::reservation(0x4000, AccessType::write()),
            &[0],
        )
        .unwrap();
        let mut buf = [0xAAu8; 2];
        hart.read(
            &mut allocator,
            Address::reservation(0x4000, AccessType::read()),
            &mut buf,
        )
        .unwrap();
        assert_eq!([0x00; 2], buf);
    }

    #[test]
    fn test_csr_access_requires_xlen_width() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let mut buf = [0u8; 8];
        let err = hart
            .read(
                &mut allocator,
                Address::csr(csr::MSTATUS, AccessType::read()),
                &mut buf,
            )
            .unwrap_err();
        assert_eq!(AccessError::InvalidLength, err);
        hart.read(
            &mut allocator,
            Address::csr(csr::MSTATUS, AccessType::read()),
            &mut buf[..4],
        )
        .unwrap();
    }

    #[test]
    fn test_csr_address_out_of_range() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let mut buf = [0u8; 4];
        let address = Address {
            space: AddressSpace::Csr,
            access: AccessType::read(),
            value: 0x1000,
        };
        assert_eq!(
            AccessError::UnknownCsr,
            hart.read(&mut allocator, address, &mut buf).unwrap_err()
        );
        // Hard errors don't latch a trap.
        assert_eq!(None, hart.trap(&allocator).taken());
    }

    #[test]
    fn test_memory_roundtrip_bare() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        hart.write(
            &mut allocator,
            Address::mem(0x8000_0000, AccessType::write()),
            &0xDEAD_BEEFu32.to_le_bytes(),
        )
        .unwrap();
        let mut buf = [0u8; 4];
        hart.read(
            &mut allocator,
            Address::mem(0x8000_0000, AccessType::read()),
            &mut buf,
        )
        .unwrap();
        assert_eq!(0xDEAD_BEEF, u32::from_le_bytes(buf));
    }

    #[test]
    fn test_fetch_misaligned_latches_trap() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let mut buf = [0u8; 4];
        let err = hart
            .read(
                &mut allocator,
                Address::mem(0x8000_0001, AccessType::fetch()),
                &mut buf,
            )
            .unwrap_err();
        assert_eq!(AccessError::Trap, err);
        assert_eq!(
            Some(Exception::InstructionAddressMisaligned),
            hart.trap(&allocator).taken()
        );
        assert_eq!(0x8000_0001, hart.trap(&allocator).fault_data());
    }

    #[test]
    fn test_debug_fetch_misaligned_reports_synchronously() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let mut buf = [0u8; 4];
        let err = hart
            .read(
                &mut allocator,
                Address::mem(0x8000_0001, AccessType::fetch().debug()),
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::DebugTrap(_)));
        assert_eq!(None, hart.trap(&allocator).taken());
    }

    #[test]
    fn test_out_of_bounds_is_hard_error() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        let mut buf = [0u8; 8];
        let err = hart
            .read(
                &mut allocator,
                Address::mem(0xFFFF_FFFC, AccessType::read()),
                &mut buf,
            )
            .unwrap_err();
        assert_eq!(AccessError::OutOfBounds, err);
        assert_eq!(None, hart.trap(&allocator).taken());
    }
}
