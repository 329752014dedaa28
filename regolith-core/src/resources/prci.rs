//! Power, Reset, Clock and Interrupt block of the FE310, reduced to the two clock-configuration
//! registers boot ROMs spin on.

use crate::bus::Bus;
use crate::hart::Counters;
use crate::{Allocated, Allocator};

/// Local offset of the `hfrosccfg` register.
const HFROSCCFG: u64 = 0x0;
/// Local offset of the `pllcfg` register.
const PLLCFG: u64 = 0x8;

/// Number of retired instructions after which the high-frequency oscillator always reads as
/// ready, so guest code polling for it cannot spin forever.
const HFROSC_READY_ICOUNT: u64 = 30000;

/// Clock configuration registers (`hfrosccfg` at local offset 0, `pllcfg` at local offset 8).
///
/// The registers store whatever is written; the ready/lock handshake bits are forced so that the
/// usual polling loops terminate:
/// - `hfrosccfg.hfroscrdy` (bit 31) is set whenever `hfroscen` (bit 30) is written as 1, and is
///   additionally forced on reads once enough instructions have retired.
/// - `pllcfg.plllock` (bit 31) is set on every write.
#[derive(Debug)]
pub struct Prci<A: Allocator> {
    regs: Allocated<A, PrciState>,
    counters: Allocated<A, Counters>,
}

#[derive(Debug, Clone, Default)]
struct PrciState {
    regs: [u8; 16],
}

impl<A: Allocator> Prci<A> {
    pub fn new(allocator: &mut A, counters: Allocated<A, Counters>) -> Self {
        Self {
            regs: Allocated::new(allocator, PrciState::default()),
            counters,
        }
    }

    pub fn drop(self, allocator: &mut A) {
        self.regs.drop(allocator);
    }

    fn read_regs(&self, buf: &mut [u8], allocator: &A, address: u64) {
        let state = self.regs.get(allocator);
        for (i, out) in buf.iter_mut().enumerate() {
            *out = *state.regs.get(address as usize + i).unwrap_or(&0);
        }
        // Report the oscillator ready once the guest has been running for a while.
        if address == HFROSCCFG
            && buf.len() > 3
            && self.counters.get(allocator).icount() > HFROSC_READY_ICOUNT
        {
            buf[3] |= 0x80;
        }
    }

    fn write_regs(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let state = self.regs.get_mut(allocator);
        for (i, value) in buf.iter().enumerate() {
            if let Some(reg) = state.regs.get_mut(address as usize + i) {
                *reg = *value;
            }
        }
        match address {
            // hfroscrdy = 1 if hfroscen == 1
            HFROSCCFG => {
                if state.regs[3] & 0x40 != 0 {
                    state.regs[3] |= 0x80;
                }
            }
            // pll locks upon writing
            PLLCFG => state.regs[11] |= 0x80,
            _ => {}
        }
    }
}

impl<A: Allocator> Bus<A> for Prci<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.read_regs(buf, allocator, address);
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        self.read_regs(buf, allocator, address);
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.write_regs(allocator, address, buf);
    }

    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        // Storing raw register values has no further side effects to suppress.
        self.write_regs(allocator, address, buf);
    }
}
