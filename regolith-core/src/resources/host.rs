//! The `tohost`/`fromhost` bridge of the riscv-tests framework.
//!
//! Guest programs report results by storing an encoded command into the 64-bit `tohost` cell. The
//! commands understood here are simulation exit (high 16 bits zero; value 1 is a clean pass,
//! anything else an abort code) and the character device (high 16 bits `0x0101`). `fromhost`
//! completions are acknowledged by copying the `fromhost` value back into `tohost`.

use crate::bus::Bus;
use crate::{Allocated, Allocator, Xlen};
use log::{error, info};

/// Local offset of the 64-bit `tohost` cell.
const TOHOST: u64 = 0x0;
/// Local offset of the 64-bit `fromhost` cell.
const FROMHOST: u64 = 0x8;

/// Memory-mapped host-communication cells.
///
/// On RV32 the 64-bit cells are written as two halves; a command is considered complete when the
/// upper half is stored, or when the lower half is stored for the second time in a row. On RV64 a
/// single store completes the command.
///
/// Debug stores update the cell bytes without advancing the protocol, so image loading cannot
/// accidentally stop the simulation.
#[derive(Debug)]
pub struct HostBridge<A: Allocator> {
    xlen: Xlen,
    state: Allocated<A, HostState>,
}

#[derive(Debug, Clone, Default)]
struct HostState {
    tohost: u64,
    fromhost: u64,
    /// Number of consecutive lower-half `tohost` stores seen without a completion.
    tohost_wr_cnt: u32,
    console_buf: String,
    exit: Option<u64>,
}

impl<A: Allocator> HostBridge<A> {
    pub fn new(allocator: &mut A, xlen: Xlen) -> Self {
        Self {
            xlen,
            state: Allocated::new(allocator, HostState::default()),
        }
    }

    pub fn drop(self, allocator: &mut A) {
        self.state.drop(allocator);
    }

    /// The value the guest stopped the simulation with, if it has.
    ///
    /// `Some(1)` is a clean exit; any other value is an abort code.
    pub fn exit_status(&self, allocator: &A) -> Option<u64> {
        self.state.get(allocator).exit
    }

    /// Current raw value of the `tohost` cell.
    pub fn tohost(&self, allocator: &A) -> u64 {
        self.state.get(allocator).tohost
    }

    fn read_cells(&self, buf: &mut [u8], allocator: &A, address: u64) {
        let state = self.state.get(allocator);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&state.tohost.to_le_bytes());
        bytes[8..].copy_from_slice(&state.fromhost.to_le_bytes());
        for (i, out) in buf.iter_mut().enumerate() {
            *out = *bytes.get(address as usize + i).unwrap_or(&0);
        }
    }

    fn store_cells(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let state = self.state.get_mut(allocator);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&state.tohost.to_le_bytes());
        bytes[8..].copy_from_slice(&state.fromhost.to_le_bytes());
        for (i, value) in buf.iter().enumerate() {
            if let Some(cell) = bytes.get_mut(address as usize + i) {
                *cell = *value;
            }
        }
        state.tohost = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        state.fromhost = u64::from_le_bytes(bytes[8..].try_into().unwrap());
    }

    fn write_cells(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.store_cells(allocator, address, buf);

        let (tohost_lower, tohost_upper, fromhost_done) = match self.xlen {
            Xlen::Rv32 => (address == TOHOST, address == TOHOST + 4, address == FROMHOST + 4),
            Xlen::Rv64 => (address == TOHOST, address == TOHOST, address == FROMHOST),
        };

        let state = self.state.get_mut(allocator);
        if tohost_lower || tohost_upper {
            let hostvar = state.tohost;
            if tohost_upper || (tohost_lower && state.tohost_wr_cnt > 0) {
                match hostvar >> 48 {
                    0 => {
                        if hostvar == 0x1 {
                            info!("tohost value is {hostvar:#x} ({hostvar}), stopping simulation");
                        } else {
                            error!("tohost value is {hostvar:#x} ({hostvar}), stopping simulation");
                        }
                        state.exit = Some(hostvar);
                    }
                    0x0101 => {
                        let c = (hostvar & 0xFF) as u8;
                        if c == b'\n' || c == 0 {
                            info!("tohost send '{}'", state.console_buf);
                            state.console_buf.clear();
                        } else {
                            state.console_buf.push(c as char);
                        }
                        state.tohost_wr_cnt = 0;
                    }
                    _ => {}
                }
            } else if tohost_lower {
                state.tohost_wr_cnt += 1;
            }
        } else if fromhost_done {
            state.tohost = state.fromhost;
        }
    }
}

impl<A: Allocator> Bus<A> for HostBridge<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.read_cells(buf, allocator, address);
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        self.read_cells(buf, allocator, address);
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.write_cells(allocator, address, buf);
    }

    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.store_cells(allocator, address, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock::Arena;

    fn fixture(xlen: Xlen) -> (Arena, HostBridge<Arena>) {
        let mut allocator = Arena::new();
        let host = HostBridge::new(&mut allocator, xlen);
        (allocator, host)
    }

    #[test]
    fn test_rv32_exit_on_upper_half() {
        let (mut allocator, host) = fixture(Xlen::Rv32);
        host.write_cells(&mut allocator, TOHOST, &1u32.to_le_bytes());
        assert_eq!(None, host.exit_status(&allocator));
        host.write_cells(&mut allocator, TOHOST + 4, &0u32.to_le_bytes());
        assert_eq!(Some(1), host.exit_status(&allocator));
    }

    #[test]
    fn test_rv32_exit_on_second_lower_half() {
        let (mut allocator, host) = fixture(Xlen::Rv32);
        host.write_cells(&mut allocator, TOHOST, &3u32.to_le_bytes());
        assert_eq!(None, host.exit_status(&allocator));
        host.write_cells(&mut allocator, TOHOST, &3u32.to_le_bytes());
        assert_eq!(Some(3), host.exit_status(&allocator));
    }

    #[test]
    fn test_rv64_exit_on_single_store() {
        let (mut allocator, host) = fixture(Xlen::Rv64);
        host.write_cells(&mut allocator, TOHOST, &1u64.to_le_bytes());
        assert_eq!(Some(1), host.exit_status(&allocator));
    }

    #[test]
    fn test_character_device() {
        let (mut allocator, host) = fixture(Xlen::Rv64);
        let cmd = (0x0101u64 << 48) | u64::from(b'y');
        host.write_cells(&mut allocator, TOHOST, &cmd.to_le_bytes());
        assert_eq!("y", host.state.get(&allocator).console_buf);
        let flush = 0x0101u64 << 48;
        host.write_cells(&mut allocator, TOHOST, &flush.to_le_bytes());
        assert_eq!("", host.state.get(&allocator).console_buf);
        assert_eq!(None, host.exit_status(&allocator));
    }

    #[test]
    fn test_fromhost_copied_to_tohost() {
        let (mut allocator, host) = fixture(Xlen::Rv64);
        host.write_cells(&mut allocator, FROMHOST, &0xABCDu64.to_le_bytes());
        assert_eq!(0xABCD, host.tohost(&allocator));
    }

    #[test]
    fn test_debug_store_does_not_exit() {
        let (mut allocator, host) = fixture(Xlen::Rv64);
        Bus::write_debug(&host, &mut allocator, TOHOST, &1u64.to_le_bytes());
        assert_eq!(None, host.exit_status(&allocator));
        assert_eq!(1, host.tohost(&allocator));
    }
}
