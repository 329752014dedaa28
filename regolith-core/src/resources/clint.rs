//! Core Local Interruptor, reduced to its memory-mapped `mtime` register.

use crate::bus::Bus;
use crate::hart::Counters;
use crate::{Allocated, Allocator};

/// Number of retired instructions per `mtime` tick.
///
/// The timer is derived from the hart's instruction count instead of wall-clock time so that
/// simulations stay deterministic.
const MTIME_SHIFT: u32 = 12;

/// Memory-mapped timer exposing `mtime` as a read-only 64-bit little-endian register at local
/// offset `0`.
///
/// Writes are ignored; `mtime` is a pure function of the hart's instruction count.
#[derive(Debug)]
pub struct Clint<A: Allocator> {
    counters: Allocated<A, Counters>,
}

impl<A: Allocator> Clint<A> {
    pub fn new(counters: Allocated<A, Counters>) -> Self {
        Self { counters }
    }

    pub fn mtime(&self, allocator: &A) -> u64 {
        self.counters.get(allocator).icount() >> MTIME_SHIFT
    }

    fn read_reg(&self, buf: &mut [u8], allocator: &A, address: u64) {
        let bytes = self.mtime(allocator).to_le_bytes();
        for (i, out) in buf.iter_mut().enumerate() {
            *out = *bytes.get(address as usize + i).unwrap_or(&0);
        }
    }
}

impl<A: Allocator> Bus<A> for Clint<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.read_reg(buf, allocator, address);
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        self.read_reg(buf, allocator, address);
    }

    fn write(&self, _allocator: &mut A, _address: u64, _buf: &[u8]) {}

    fn write_debug(&self, _allocator: &mut A, _address: u64, _buf: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock::Arena;

    #[test]
    fn test_mtime_follows_icount() {
        let mut allocator = Arena::new();
        let counters = Allocated::new(&mut allocator, Counters::new());
        let clint = Clint::new(counters.clone());
        assert_eq!(0, clint.mtime(&allocator));
        counters.get_mut(&mut allocator).set_icount(3 << MTIME_SHIFT);
        let mut buf = [0u8; 8];
        clint.read_reg(&mut buf, &allocator, 0);
        assert_eq!(3, u64::from_le_bytes(buf));
    }
}
