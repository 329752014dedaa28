//! The `mstatus` register and its `sstatus`/`ustatus` views.
//!
//! There is a single physical status register; the S- and U-mode CSRs are masked views of it.
//! The per-privilege WARL masks decide which fields each view exposes, both on read and on the
//! merge performed by a write.

use bitvec::{field::BitField, order::Lsb0, view::BitView};

use super::{csr, Fault, Hart};
use crate::bus::Bus;
use crate::{Allocator, PrivilegeLevel, RawPrivilegeLevel, Xlen};

/// Bit indices into the status register.
pub(super) mod bit {
    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const UPIE: usize = 4;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const FS: usize = 13;
    pub const XS: usize = 15;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    // RV64 only.
    pub const UXL: usize = 32;
    pub const SXL: usize = 34;
}

/// WARL mask of the status view for a privilege level: the set of fields that level may observe
/// and write.
///
/// The U view exposes {SD, MXR, SUM, XS, FS, UPIE, UIE} (plus UXL on RV64); the S view adds
/// {SPP, SPIE, SIE}; the M view adds everything else that is architecturally defined, including
/// {TSR, TW, TVM, MPRV, MPP, MPIE, MIE} (plus SXL on RV64).
pub(super) fn view_mask(xlen: Xlen, level: RawPrivilegeLevel) -> u64 {
    let sd = 1u64 << (xlen.bits() - 1);
    let mut mask = sd
        | 1 << bit::MXR
        | 1 << bit::SUM
        | 0b11 << bit::XS
        | 0b11 << bit::FS
        | 1 << bit::UPIE
        | 1 << bit::UIE;
    if xlen == Xlen::Rv64 {
        mask |= 0b11 << bit::UXL;
    }
    if level == RawPrivilegeLevel::User {
        return mask;
    }
    mask |= 1 << bit::SPP | 1 << bit::SPIE | 1 << bit::SIE;
    if level == RawPrivilegeLevel::Supervisor {
        return mask;
    }
    mask |= 1 << bit::TSR
        | 1 << bit::TW
        | 1 << bit::TVM
        | 1 << bit::MPRV
        | 0b11 << bit::MPP
        | 1 << bit::MPIE
        | 1 << bit::MIE;
    if xlen == Xlen::Rv64 {
        mask |= 0b11 << bit::SXL;
    }
    mask
}

/// Read-only view over a raw status value with named field accessors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Status(u64);

impl Status {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    fn bit(self, index: usize) -> bool {
        self.0.view_bits::<Lsb0>()[index]
    }

    /// M-mode Interrupt Enable.
    pub fn mie(self) -> bool {
        self.bit(bit::MIE)
    }

    /// S-mode Interrupt Enable.
    pub fn sie(self) -> bool {
        self.bit(bit::SIE)
    }

    /// U-mode Interrupt Enable.
    pub fn uie(self) -> bool {
        self.bit(bit::UIE)
    }

    /// M-mode Previous Interrupt Enable.
    pub fn mpie(self) -> bool {
        self.bit(bit::MPIE)
    }

    /// S-mode Previous Interrupt Enable.
    pub fn spie(self) -> bool {
        self.bit(bit::SPIE)
    }

    /// U-mode Previous Interrupt Enable.
    pub fn upie(self) -> bool {
        self.bit(bit::UPIE)
    }

    /// Modify PRiVilege: loads and stores use the privilege level in MPP.
    pub fn mprv(self) -> bool {
        self.bit(bit::MPRV)
    }

    /// permit Supervisor User Memory access.
    pub fn sum(self) -> bool {
        self.bit(bit::SUM)
    }

    /// Make eXecutable Readable.
    pub fn mxr(self) -> bool {
        self.bit(bit::MXR)
    }

    /// Trap Virtual Memory: virtual-memory management from S-mode raises illegal instruction.
    pub fn tvm(self) -> bool {
        self.bit(bit::TVM)
    }

    /// Timeout Wait: WFI from S-mode raises illegal instruction.
    pub fn tw(self) -> bool {
        self.bit(bit::TW)
    }

    /// Trap SRET.
    pub fn tsr(self) -> bool {
        self.bit(bit::TSR)
    }

    /// The privilege level encoded by the MPP (M-mode Previous Privilege) field.
    ///
    /// The WARL filter on writes guarantees the field never holds the reserved level.
    pub fn mpp(self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(self.0.view_bits::<Lsb0>()[bit::MPP..bit::MPP + 2].load_le())
            .try_into()
            .unwrap()
    }

    /// The privilege level encoded by the SPP (S-mode Previous Privilege) field.
    pub fn spp(self) -> PrivilegeLevel {
        match self.bit(bit::SPP) {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }
}

impl<A: Allocator, B: Bus<A>> Hart<A, B> {
    /// The hart's current status register as a typed view.
    pub fn status(&self, allocator: &A) -> Status {
        Status::new(self.csr_raw(allocator, csr::MSTATUS))
    }

    /// Read hook for `mstatus`/`sstatus`/`ustatus`: the shared register masked by the view of the
    /// privilege level encoded in the specifier.
    pub(super) fn read_status(
        &self,
        allocator: &A,
        specifier: csr::CsrSpecifier,
    ) -> Result<u64, Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mask = view_mask(self.xlen(), csr::required_privilege_level(specifier));
        Ok(self.csr_raw(allocator, csr::MSTATUS) & mask)
    }

    /// Write hook for `mstatus`/`sstatus`/`ustatus`: merge the view's fields into the shared
    /// register, then re-evaluate pending interrupts.
    pub(super) fn write_status(
        &self,
        allocator: &mut A,
        specifier: csr::CsrSpecifier,
        value: u64,
    ) -> Result<(), Fault> {
        self.csr_privilege_gate(allocator, specifier)?;
        let mask = view_mask(self.xlen(), csr::required_privilege_level(specifier));
        let old = self.csr_raw(allocator, csr::MSTATUS);
        let mut new = (old & !mask) | (value & mask);
        // MPP is WARL; a write of the reserved level keeps the previous value.
        let new_bits = new.view_bits_mut::<Lsb0>();
        if new_bits[bit::MPP..bit::MPP + 2].load_le::<u8>() == 2 {
            let old_mpp = old.view_bits::<Lsb0>()[bit::MPP..bit::MPP + 2].load_le::<u8>();
            new_bits[bit::MPP..bit::MPP + 2].store_le(old_mpp);
        }
        self.set_csr_raw(allocator, csr::MSTATUS, new);
        self.check_interrupt(allocator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::hart;
    use super::super::AccessError;
    use super::*;

    #[test]
    fn test_view_masks_nest() {
        for xlen in [Xlen::Rv32, Xlen::Rv64] {
            let u = view_mask(xlen, RawPrivilegeLevel::User);
            let s = view_mask(xlen, RawPrivilegeLevel::Supervisor);
            let m = view_mask(xlen, RawPrivilegeLevel::Machine);
            assert_eq!(u, u & s, "U view must be a subset of S view");
            assert_eq!(s, s & m, "S view must be a subset of M view");
        }
    }

    #[test]
    fn test_rv32_mask_values() {
        assert_eq!(0x800D_E011, view_mask(Xlen::Rv32, RawPrivilegeLevel::User));
        assert_eq!(
            0x800D_E133,
            view_mask(Xlen::Rv32, RawPrivilegeLevel::Supervisor)
        );
        assert_eq!(
            0x807F_F9BB,
            view_mask(Xlen::Rv32, RawPrivilegeLevel::Machine)
        );
    }

    #[test]
    fn test_mask_idempotence() {
        // read(c) after write(c, v) equals v & mask for every status view.
        let (mut allocator, hart) = hart(Xlen::Rv32);
        for specifier in [csr::MSTATUS, csr::SSTATUS, csr::USTATUS] {
            let mask = view_mask(Xlen::Rv32, csr::required_privilege_level(specifier));
            // Avoid MPP=0b10, which the WARL filter rejects.
            let value = 0xFFFF_E7FFu64;
            hart.write_csr(&mut allocator, specifier, value).unwrap();
            assert_eq!(
                value & mask,
                hart.read_csr(&mut allocator, specifier).unwrap(),
                "view {specifier:#x}"
            );
            hart.write_csr(&mut allocator, csr::MSTATUS, 0).unwrap();
        }
    }

    #[test]
    fn test_sstatus_write_does_not_touch_machine_fields() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        hart.write_csr(&mut allocator, csr::MSTATUS, 1 << bit::MIE)
            .unwrap();
        hart.write_csr(&mut allocator, csr::SSTATUS, 0).unwrap();
        assert!(hart.status(&allocator).mie());
    }

    #[test]
    fn test_mpp_warl_filter() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        hart.write_csr(&mut allocator, csr::MSTATUS, 0b11 << bit::MPP)
            .unwrap();
        assert_eq!(PrivilegeLevel::Machine, hart.status(&allocator).mpp());
        hart.write_csr(&mut allocator, csr::MSTATUS, 0b10 << bit::MPP)
            .unwrap();
        // The reserved level is ignored; the previous value stays.
        assert_eq!(PrivilegeLevel::Machine, hart.status(&allocator).mpp());
    }

    #[test]
    fn test_status_privilege_gate() {
        let (mut allocator, hart) = hart(Xlen::Rv32);
        hart.set_privilege_mode(&mut allocator, PrivilegeLevel::User);
        assert_eq!(
            AccessError::Trap,
            hart.read_csr(&mut allocator, csr::SSTATUS).unwrap_err()
        );
        assert_eq!(
            AccessError::Trap,
            hart.read_csr(&mut allocator, csr::MSTATUS).unwrap_err()
        );
        hart.read_csr(&mut allocator, csr::USTATUS).unwrap();
    }

    #[test]
    fn test_rv64_uxl_in_views() {
        let m32 = view_mask(Xlen::Rv32, RawPrivilegeLevel::Machine);
        let m64 = view_mask(Xlen::Rv64, RawPrivilegeLevel::Machine);
        assert_eq!(0, m32 & (0b1111 << bit::UXL));
        assert_eq!(0b1111 << bit::UXL, m64 & (0b1111 << bit::UXL));
        assert_eq!(1 << 63, m64 & (1 << 63));
    }
}
