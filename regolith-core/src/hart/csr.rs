//! Specifiers, storage, and dispatch for the CSR file.
//!
//! Storage is a sparse map over the 12-bit CSR space with implicit-zero slots. Most registers
//! read and write their raw slot; the registers with architectural side conditions (status,
//! interrupt enable/pending, `satp`, the counter shadows) are routed through a pair of hook
//! tables built at hart construction. Debug-mode and hypervisor CSRs are not supported.

use std::collections::HashMap;

use log::trace;
use nohash::IntMap;

use super::{CsrFailure, Exception, Fault, Hart};
use crate::bus::Bus;
use crate::{Allocator, RawPrivilegeLevel, Xlen};

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

//
// User trap setup and handling (`0x000..=0x044`).
//
/// User status register.
pub const USTATUS: CsrSpecifier = 0x000;
/// User interrupt-enable register.
pub const UIE: CsrSpecifier = 0x004;
/// User trap handler base address.
pub const UTVEC: CsrSpecifier = 0x005;
/// Scratch register for user trap handlers.
pub const USCRATCH: CsrSpecifier = 0x040;
/// User exception program counter.
pub const UEPC: CsrSpecifier = 0x041;
/// User trap cause.
pub const UCAUSE: CsrSpecifier = 0x042;
/// User bad address or instruction.
pub const UTVAL: CsrSpecifier = 0x043;
/// User interrupt pending.
pub const UIP: CsrSpecifier = 0x044;

//
// Unprivileged counters/timers (`0xC00..=0xC1F`, `0xC80..=0xC9F`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// First performance-monitoring counter.
pub const HPMCOUNTER3: CsrSpecifier = 0xC03;
/// Last performance-monitoring counter.
pub const HPMCOUNTER31: CsrSpecifier = 0xC1F;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;
/// Upper 32 bits of [`HPMCOUNTER31`], RV32 only; last of the upper-half counter shadows.
pub const HPMCOUNTER31H: CsrSpecifier = 0xC9F;

//
// Supervisor trap setup (`0x100..=0x106`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor exception delegation register.
pub const SEDELEG: CsrSpecifier = 0x102;
/// Supervisor interrupt delegation register.
pub const SIDELEG: CsrSpecifier = 0x103;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handling.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

//
// Supervisor protection and translation (`0x180`).
//
/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine information registers (`0xF11..=0xF14`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

//
// Machine trap setup (`0x300..=0x306`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine counters/timers (`0xB00..=0xB1F`, `0xB80..=0xB9F`).
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

// misa extension bits.
const ISA_A: u64 = 1;
const ISA_I: u64 = 1 << 8;
const ISA_M: u64 = 1 << 12;
const ISA_S: u64 = 1 << 18;
const ISA_U: u64 = 1 << 20;

/// The constant `misa` value for this implementation: MXL plus the IMASU extension set.
///
/// > The misa CSR is a WARL read-write register reporting the ISA supported by the hart.
///
/// Here it is read-only; writes raise an illegal-instruction exception.
pub fn misa(xlen: Xlen) -> u64 {
    let mxl = match xlen {
        Xlen::Rv32 => 1,
        Xlen::Rv64 => 2,
    };
    (mxl << (xlen.bits() - 2)) | ISA_A | ISA_I | ISA_M | ISA_S | ISA_U
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Bits `9:8` of the specifier encode the level; note that the result may be the reserved level
/// `2`, which still has a defined meaning: only higher privilege levels may access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// Sparse storage for the 4096-entry CSR space.
///
/// Slots that have never been written read as zero, matching a zeroed register file at reset.
/// The same physical `mstatus`/`mie`/`mip` slots underlie their S- and U-mode views; the views
/// are produced by masking in the hooks, never by separate storage.
#[derive(Debug, Clone, Default)]
pub struct CsrFile {
    slots: IntMap<CsrSpecifier, u64>,
}

impl CsrFile {
    /// Reset all registers, then seed the constant `misa`.
    pub fn reset(&mut self, xlen: Xlen) {
        self.slots.clear();
        self.slots.insert(MISA, misa(xlen));
    }

    /// Raw value of a slot, zero if never written.
    pub fn raw(&self, specifier: CsrSpecifier) -> u64 {
        self.slots.get(&specifier).copied().unwrap_or(0)
    }

    /// Store a raw slot value verbatim.
    pub fn set_raw(&mut self, specifier: CsrSpecifier, value: u64) {
        self.slots.insert(specifier, value);
    }
}

/// Read-side dispatch entries. Any specifier without an entry reads its raw slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum ReadHook {
    /// `mcycle`/`minstret` and their RV32 upper halves, backed by the instruction counter.
    Counter,
    Status,
    InterruptEnable,
    InterruptPending,
    Satp,
}

/// Write-side dispatch entries. Any specifier without an entry stores verbatim.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum WriteHook {
    /// Writes raise an illegal-instruction exception.
    ReadOnly,
    Status,
    InterruptEnable,
    InterruptPending,
    Satp,
}

pub(super) fn read_hooks() -> HashMap<CsrSpecifier, ReadHook> {
    let mut hooks = HashMap::new();
    for specifier in [MCYCLE, MCYCLEH, MINSTRET, MINSTRETH] {
        hooks.insert(specifier, ReadHook::Counter);
    }
    for specifier in [MSTATUS, SSTATUS, USTATUS] {
        hooks.insert(specifier, ReadHook::Status);
    }
    for specifier in [MIE, SIE, UIE] {
        hooks.insert(specifier, ReadHook::InterruptEnable);
    }
    for specifier in [MIP, SIP, UIP] {
        hooks.insert(specifier, ReadHook::InterruptPending);
    }
    hooks.insert(SATP, ReadHook::Satp);
    hooks
}

pub(super) fn write_hooks() -> HashMap<CsrSpecifier, WriteHook> {
    let mut hooks = HashMap::new();
    // Read-only registers: misa and both banks of counters (machine counters and their
    // unprivileged shadows alike).
    hooks.insert(MISA, WriteHook::ReadOnly);
    for specifier in MCYCLE..=HPMCOUNTER31 {
        hooks.insert(specifier, WriteHook::ReadOnly);
    }
    for specifier in MCYCLEH..=HPMCOUNTER31H {
        hooks.insert(specifier, WriteHook::ReadOnly);
    }
    for specifier in [MSTATUS, SSTATUS, USTATUS] {
        hooks.insert(specifier, WriteHook::Status);
    }
    for specifier in [MIE, SIE, UIE] {
        hooks.insert(specifier, WriteHook::InterruptEnable);
    }
    for specifier in [MIP, SIP, UIP] {
        hooks.insert(specifier, WriteHook::InterruptPending);
    }
    hooks.insert(SATP, WriteHook::Satp);
    hooks
}

impl<A: Allocator, B: Bus<A>> Hart<A, B> {
    /// Raw CSR slot value, bypassing all hooks.
    pub(super) fn csr_raw(&self, allocator: &A, specifier: CsrSpecifier) -> u64 {
        self.csrs.get(allocator).raw(specifier)
    }

    pub(super) fn set_csr_raw(&self, allocator: &mut A, specifier: CsrSpecifier, value: u64) {
        self.csrs.get_mut(allocator).set_raw(specifier, value);
    }

    /// Fails with an illegal-instruction fault if the hart's privilege level is below the level
    /// encoded in bits `9:8` of `specifier`.
    pub(super) fn csr_privilege_gate(
        &self,
        allocator: &A,
        specifier: CsrSpecifier,
    ) -> Result<(), Fault> {
        let required = required_privilege_level(specifier);
        if self.privilege_mode(allocator) < required {
            return Err(Fault {
                exception: Exception::IllegalInstruction,
                tval: None,
            });
        }
        Ok(())
    }

    pub(super) fn read_csr_inner(
        &self,
        allocator: &mut A,
        specifier: CsrSpecifier,
    ) -> Result<u64, CsrFailure> {
        if specifier >= 1 << 12 {
            return Err(CsrFailure::Unsupported);
        }
        let value = match self.read_hooks.get(&specifier) {
            None => self.csr_raw(allocator, specifier),
            Some(ReadHook::Counter) => self.read_counter(allocator, specifier)?,
            Some(ReadHook::Status) => self.read_status(allocator, specifier)?,
            Some(ReadHook::InterruptEnable) => self.read_ie(allocator, specifier)?,
            Some(ReadHook::InterruptPending) => self.read_ip(allocator, specifier)?,
            Some(ReadHook::Satp) => self.read_satp(allocator)?,
        };
        trace!("csr read {specifier:#05x} -> {value:#x}");
        Ok(value)
    }

    pub(super) fn write_csr_inner(
        &self,
        allocator: &mut A,
        specifier: CsrSpecifier,
        value: u64,
    ) -> Result<(), CsrFailure> {
        if specifier >= 1 << 12 {
            return Err(CsrFailure::Unsupported);
        }
        trace!("csr write {specifier:#05x} <- {value:#x}");
        match self.write_hooks.get(&specifier) {
            None => {
                self.set_csr_raw(allocator, specifier, value);
                Ok(())
            }
            Some(WriteHook::ReadOnly) => Err(Fault {
                exception: Exception::IllegalInstruction,
                tval: None,
            }
            .into()),
            Some(WriteHook::Status) => Ok(self.write_status(allocator, specifier, value)?),
            Some(WriteHook::InterruptEnable) => Ok(self.write_ie(allocator, specifier, value)?),
            Some(WriteHook::InterruptPending) => Ok(self.write_ip(allocator, specifier, value)?),
            Some(WriteHook::Satp) => Ok(self.write_satp(allocator, value)?),
        }
    }

    /// `mcycle`, `minstret`, and (on RV32) their upper halves, all backed by `icount`.
    fn read_counter(&self, allocator: &A, specifier: CsrSpecifier) -> Result<u64, CsrFailure> {
        let icount = self.counters.get(allocator).icount();
        match specifier {
            MCYCLE | MINSTRET => Ok(self.config().xlen.truncate(icount)),
            MCYCLEH | MINSTRETH => match self.config().xlen {
                Xlen::Rv32 => Ok(icount >> 32),
                // The upper-half shadows don't exist on RV64.
                Xlen::Rv64 => Err(CsrFailure::Unsupported),
            },
            _ => unreachable!("counter hook registered for non-counter CSR"),
        }
    }

    /// `satp` read, intercepted when `mstatus.TVM` traps S-mode accesses.
    fn read_satp(&self, allocator: &mut A) -> Result<u64, Fault> {
        self.tvm_gate(allocator)?;
        Ok(self.csr_raw(allocator, SATP))
    }

    /// `satp` write. Note that this does *not* flush the translation cache; software must issue
    /// an SFENCE.VMA, as on real hardware.
    fn write_satp(&self, allocator: &mut A, value: u64) -> Result<(), Fault> {
        self.tvm_gate(allocator)?;
        self.set_csr_raw(allocator, SATP, value);
        Ok(())
    }

    fn tvm_gate(&self, allocator: &A) -> Result<(), Fault> {
        if self.privilege_mode(allocator) == crate::PrivilegeLevel::Supervisor
            && self.status(allocator).tvm()
        {
            let pc = self.registers(allocator).pc();
            return Err(Fault::new(Exception::IllegalInstruction, pc));
        }
        Ok(())
    }
}
