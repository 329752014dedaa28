//! Interrupt enable/pending registers and pending-interrupt prioritisation.
//!
//! Like the status register, `mie` and `mip` are single physical registers with masked S/U
//! views. Reads of the sub-mode views are additionally masked by the delegation registers, so
//! `sie`/`sip` only show interrupts delegated to S-mode.

use super::{csr, Fault, Hart};
use crate::bus::Bus;
use crate::{Allocator, PrivilegeLevel, RawPrivilegeLevel};

/// Writable interrupt bits per privilege level.
///
/// Each level may touch the software/timer/external bits of its own and all lower levels:
/// U: {0, 4, 8}; S: U ∪ {1, 5, 9}; M: S ∪ {3, 7, 11}.
pub(super) fn irq_mask(level: RawPrivilegeLevel) -> u64 {
    match level {
        RawPrivilegeLevel::User => 0b0001_0001_0001,
        RawPrivilegeLevel::Supervisor => 0b0011_0011_0011,
        RawPrivilegeLevel::Reserved => 0,
        RawPrivilegeLevel::Machine => 0b1011_1011_1011,
    }
}

impl<A: Allocator, B: Bus<A>> Hart<A, B> {
    /// Read hook for `mie`/`sie`/`uie`.
    pub(super) fn read_ie(
        &self,
        allocator: &A,
        specifier: csr::CsrSpecifier,
    ) -> Result<u64, Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mut value = self.csr_raw(allocator, csr::MIE);
        if specifier < csr::MIE {
            value &= self.csr_raw(allocator, csr::MIDELEG);
        }
        if specifier < csr::SIE {
            value &= self.csr_raw(allocator, csr::SIDELEG);
        }
        Ok(value)
    }

    /// Write hook for `mie`/`sie`/`uie`.
    pub(super) fn write_ie(
        &self,
        allocator: &mut A,
        specifier: csr::CsrSpecifier,
        value: u64,
    ) -> Result<(), Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mask = irq_mask(csr::required_privilege_level(specifier));
        let old = self.csr_raw(allocator, csr::MIE);
        self.set_csr_raw(allocator, csr::MIE, (old & !mask) | (value & mask));
        self.check_interrupt(allocator);
        Ok(())
    }

    /// Read hook for `mip`/`sip`/`uip`, masked by delegation like the enable views.
    pub(super) fn read_ip(
        &self,
        allocator: &A,
        specifier: csr::CsrSpecifier,
    ) -> Result<u64, Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mut value = self.csr_raw(allocator, csr::MIP);
        if specifier < csr::MIP {
            value &= self.csr_raw(allocator, csr::MIDELEG);
        }
        if specifier < csr::SIP {
            value &= self.csr_raw(allocator, csr::SIDELEG);
        }
        Ok(value)
    }

    /// Write hook for `mip`/`sip`/`uip`.
    pub(super) fn write_ip(
        &self,
        allocator: &mut A,
        specifier: csr::CsrSpecifier,
        value: u64,
    ) -> Result<(), Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mask = irq_mask(csr::required_privilege_level(specifier));
        let old = self.csr_raw(allocator, csr::MIP);
        self.set_csr_raw(allocator, csr::MIP, (old & !mask) | (value & mask));
        self.check_interrupt(allocator);
        Ok(())
    }

    /// Recompute the pending interrupt after every `mstatus`/`mie`/`mip` update.
    ///
    /// M-level candidates (pending, enabled, and not delegated) win over S-level candidates
    /// (pending, enabled, and delegated); within a level the lowest-numbered bit wins, the
    /// architectural external > software > timer ordering being encoded by the bit assignment.
    /// If no candidate exists the previously latched pending interrupt stays untouched.
    pub(super) fn check_interrupt(&self, allocator: &mut A) {
        let status = self.status(allocator);
        let machine_state = self.privilege_mode(allocator);
        let ena_irq = self.csr_raw(allocator, csr::MIP) & self.csr_raw(allocator, csr::MIE);
        let ideleg = self.csr_raw(allocator, csr::MIDELEG);

        let m_enabled = machine_state < PrivilegeLevel::Machine
            || (machine_state == PrivilegeLevel::Machine && status.mie());
        let mut enabled_interrupts = if m_enabled { ena_irq & !ideleg } else { 0 };

        if enabled_interrupts == 0 {
            let s_enabled = machine_state < PrivilegeLevel::Supervisor
                || (machine_state == PrivilegeLevel::Supervisor && status.sie());
            enabled_interrupts = if s_enabled { ena_irq & ideleg } else { 0 };
        }

        if enabled_interrupts != 0 {
            let code = enabled_interrupts.trailing_zeros() as u16;
            self.trap.get_mut(allocator).pending_interrupt = Some(code);
        }
    }
}
