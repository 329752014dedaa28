//! Trap entry (`enter_trap`) and exit (`leave_trap`), plus the WFI intercept.

use log::info;

use super::status::{bit, Status};
use super::{csr, Exception, Fault, Hart};
use crate::bus::Bus;
use crate::{Allocator, PrivilegeLevel};

/// Cause of a trap being entered.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    /// An interrupt by its cause code (its bit index in `mip`).
    Interrupt(u16),
}

/// The `x`-mode trap CSRs differ only in specifier bits `9:8`, so each register bank can be
/// addressed by OR-ing the privilege level into the U-mode specifier.
fn banked(base: csr::CsrSpecifier, level: PrivilegeLevel) -> csr::CsrSpecifier {
    base | ((level as u16) << 8)
}

fn trap_name(cause: u64) -> &'static str {
    match cause {
        0 => "Instruction address misaligned",
        1 => "Instruction access fault",
        2 => "Illegal instruction",
        3 => "Breakpoint",
        4 => "Load address misaligned",
        5 => "Load access fault",
        6 => "Store/AMO address misaligned",
        7 => "Store/AMO access fault",
        8 => "Environment call from U-mode",
        9 => "Environment call from S-mode",
        11 => "Environment call from M-mode",
        12 => "Instruction page fault",
        13 => "Load page fault",
        15 => "Store/AMO page fault",
        _ => "Reserved",
    }
}

fn irq_name(cause: u64) -> &'static str {
    match cause {
        0 => "User software interrupt",
        1 => "Supervisor software interrupt",
        3 => "Machine software interrupt",
        4 => "User timer interrupt",
        5 => "Supervisor timer interrupt",
        7 => "Machine timer interrupt",
        8 => "User external interrupt",
        9 => "Supervisor external interrupt",
        11 => "Machine external interrupt",
        _ => "Reserved",
    }
}

impl<A: Allocator, B: Bus<A>> Hart<A, B> {
    /// Enter a trap, updating the privilege stack and redirecting control flow.
    ///
    /// `addr` is the address of the faulting instruction; it becomes `xepc` for exceptions.
    /// Interrupts record `next_pc` instead, so execution resumes behind the interrupted
    /// instruction.
    ///
    /// Returns the address execution continues at (the new `next_pc`).
    pub fn enter_trap(&self, allocator: &mut A, cause: TrapCause, addr: u64) -> u64 {
        let cur_priv = self.privilege_mode(allocator);
        let (interrupt, mut cause_code) = match cause {
            TrapCause::Exception(exception) => (false, exception.code()),
            TrapCause::Interrupt(code) => (true, code as u64),
        };
        if !interrupt && cause_code == 11 {
            // Adjust the environment-call cause to the privilege level it was made from.
            cause_code = 0x8 + cur_priv as u64;
        }

        // Traps target M-mode unless delegated down (at most one level further to U).
        let mut new_priv = PrivilegeLevel::Machine;
        if !interrupt {
            if cur_priv != PrivilegeLevel::Machine
                && (self.csr_raw(allocator, csr::MEDELEG) >> cause_code) & 1 != 0
            {
                new_priv = match (self.csr_raw(allocator, csr::SEDELEG) >> cause_code) & 1 {
                    0 => PrivilegeLevel::Supervisor,
                    _ => PrivilegeLevel::User,
                };
            }
            // Store the actual address of the trapping instruction.
            let epc = self.xlen().truncate(addr);
            self.set_csr_raw(allocator, banked(csr::UEPC, new_priv), epc);
            // The faulting effective address (if any) moves into xtval.
            let trap = self.trap.get_mut(allocator);
            let fault_data = trap.fault_data;
            trap.fault_data = 0;
            self.set_csr_raw(allocator, banked(csr::UTVAL, new_priv), fault_data);
        } else {
            if cur_priv != PrivilegeLevel::Machine
                && (self.csr_raw(allocator, csr::MIDELEG) >> cause_code) & 1 != 0
            {
                new_priv = match (self.csr_raw(allocator, csr::SIDELEG) >> cause_code) & 1 {
                    0 => PrivilegeLevel::Supervisor,
                    _ => PrivilegeLevel::User,
                };
            }
            let next_pc = self.registers(allocator).next_pc();
            self.set_csr_raw(allocator, banked(csr::UEPC, new_priv), next_pc);
            self.trap.get_mut(allocator).pending_interrupt = None;
        }
        self.set_csr_raw(allocator, banked(csr::UCAUSE, new_priv), cause_code);

        // Push the mstatus stack: the xPP field is written with the active privilege mode at the
        // time of the trap, the xPIE field with the active interrupt-enable bit at the time of
        // the trap, and both the old and new level's IE bits are cleared.
        let mut status = self.csr_raw(allocator, csr::MSTATUS);
        let xie = (status >> cur_priv as u32) & 1;
        match new_priv {
            PrivilegeLevel::Machine => {
                status &= !(0b11 << bit::MPP);
                status |= ((cur_priv as u64) & 0b11) << bit::MPP;
            }
            PrivilegeLevel::Supervisor => {
                status &= !(1 << bit::SPP);
                status |= ((cur_priv as u64) & 0b1) << bit::SPP;
            }
            PrivilegeLevel::User => {}
        }
        status &= !((1 << new_priv as u32) | (1 << cur_priv as u32));
        let pie_bit = new_priv as u32 + 4;
        status = (status & !(1 << pie_bit)) | (xie << pie_bit);
        self.set_csr_raw(allocator, csr::MSTATUS, status);

        // Jump to the trap vector; vectored mode offsets interrupts by their cause.
        let ivec = self.csr_raw(allocator, banked(csr::UTVEC, new_priv));
        let mut next_pc = ivec & !0x1;
        if interrupt && ivec & 0x1 == 1 {
            next_pc += 4 * cause_code;
        }
        self.registers.get_mut(allocator).set_next_pc(next_pc);
        *self.privilege_mode.get_mut(allocator) = new_priv;
        self.trap.get_mut(allocator).taken = None;

        if interrupt {
            info!(
                "Interrupt with cause '{}' at address {:#018x} occurred, \
                 changing privilege level from {} to {}",
                irq_name(cause_code),
                addr,
                cur_priv,
                new_priv
            );
        } else {
            info!(
                "Trap with cause '{}' at address {:#018x} occurred, \
                 changing privilege level from {} to {}",
                trap_name(cause_code),
                addr,
                cur_priv,
                new_priv
            );
        }
        next_pc
    }

    /// Return from the trap handler entered by an `xRET` instruction executed in `inst_priv`.
    ///
    /// Pops the privilege stack: execution continues at `xepc`, the returned-to privilege level
    /// comes from `xPP`, and its interrupt-enable bit is restored from `xPIE`.
    ///
    /// Returns the address execution continues at; if the TSR bit intercepts the SRET, the
    /// current `pc` is returned unchanged and an illegal-instruction trap is latched instead.
    pub fn leave_trap(&self, allocator: &mut A, inst_priv: PrivilegeLevel) -> u64 {
        let cur_priv = self.privilege_mode(allocator);
        let mut status = self.csr_raw(allocator, csr::MSTATUS);

        if cur_priv == PrivilegeLevel::Supervisor
            && inst_priv == PrivilegeLevel::Supervisor
            && Status::new(status).tsr()
        {
            let pc = self.registers(allocator).pc();
            self.raise(allocator, Fault::new(Exception::IllegalInstruction, pc));
            return pc;
        }

        // Pop the relevant lower-privilege interrupt-enable and privilege-mode stack; the popped
        // xPP field resets to U.
        let ppl = match inst_priv {
            PrivilegeLevel::Machine => {
                let ppl = Status::new(status).mpp();
                status &= !(0b11 << bit::MPP);
                ppl
            }
            PrivilegeLevel::Supervisor => {
                let ppl = Status::new(status).spp();
                status &= !(1 << bit::SPP);
                ppl
            }
            PrivilegeLevel::User => PrivilegeLevel::User,
        };

        let next_pc = self.csr_raw(allocator, banked(csr::UEPC, inst_priv));
        status &= !(1 << ppl as u32);
        let pie = (status >> (inst_priv as u32 + 4)) & 1;
        status |= pie << ppl as u32;
        self.set_csr_raw(allocator, csr::MSTATUS, status);
        self.registers.get_mut(allocator).set_next_pc(next_pc);
        *self.privilege_mode.get_mut(allocator) = ppl;

        info!(
            "Executing xRET, changing privilege level from {} to {}",
            cur_priv, ppl
        );
        next_pc
    }

    /// The WFI intercept: with `mstatus.TW` set, WFI from S-mode raises illegal instruction.
    ///
    /// Otherwise this has no effect; whether the executor idles or skips ahead is its own
    /// business.
    pub fn wait_until(&self, allocator: &mut A) {
        if self.privilege_mode(allocator) == PrivilegeLevel::Supervisor
            && self.status(allocator).tw()
        {
            let pc = self.registers(allocator).pc();
            self.raise(allocator, Fault::new(Exception::IllegalInstruction, pc));
        }
    }
}
