//! Defines a generalization of a TileLink-like bus interface.

use crate::Allocator;
use std::fmt::Debug;

/// A generalization of a TileLink-like bus interface, without the hardware details.
///
/// Implementors of this trait should see it as the TileLink *slave* interface they are exposing,
/// while this interface serves as the TileLink *master* interface to callers of this trait.
///
/// Accesses can be made for any `(address, size)` pair; the addresses are 64 bits wide, sized for
/// the largest supported physical address space. Values are serialized in little-endian byte
/// order. Slaves decide themselves how to treat addresses or sizes they don't support, but they
/// must do so without panicking: only the *simulated* state may become undefined, never the
/// simulating entity itself.
///
/// Every access comes in a regular and a `_debug` flavour. The debug flavour is used by external
/// agents (image loaders, test harnesses) that need to move bytes without triggering the side
/// effects a real access would have: device registers store their raw value, character output is
/// not emitted, and host-communication protocols are not advanced.
pub trait Bus<A: Allocator>: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64);

    /// Perform a side-effect-free read for `address` with size `buf.len()`.
    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]);

    /// Perform a write of raw bytes for `address`, suppressing all side effects of a regular
    /// write.
    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]);
}
