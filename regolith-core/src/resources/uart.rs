//! Transmit path of the FE310 UARTs.
//!
//! Only the TXFIFO register is modelled: written bytes are buffered and emitted as whole lines
//! through the logging facade. There is no receive path and no interrupt support.

use crate::bus::Bus;
use crate::{Allocated, Allocator};
use log::info;

/// Write-only transmit register of a UART.
///
/// Bytes written to local offset 0 are collected in a line buffer; a newline or NUL byte flushes
/// the buffered line. Reads return zero.
#[derive(Debug)]
pub struct Uart<A: Allocator> {
    name: &'static str,
    state: Allocated<A, UartState>,
}

#[derive(Debug, Clone, Default)]
struct UartState {
    tx_buf: String,
}

impl<A: Allocator> Uart<A> {
    pub fn new(allocator: &mut A, name: &'static str) -> Self {
        Self {
            name,
            state: Allocated::new(allocator, UartState::default()),
        }
    }

    pub fn drop(self, allocator: &mut A) {
        self.state.drop(allocator);
    }

    fn transmit(&self, allocator: &mut A, byte: u8) {
        let state = self.state.get_mut(allocator);
        if byte == b'\n' || byte == 0 {
            info!("{} send '{}'", self.name, state.tx_buf);
            state.tx_buf.clear();
        } else {
            state.tx_buf.push(byte as char);
        }
    }
}

impl<A: Allocator> Bus<A> for Uart<A> {
    fn read(&self, buf: &mut [u8], _allocator: &mut A, _address: u64) {
        buf.fill(0);
    }

    fn read_debug(&self, buf: &mut [u8], _allocator: &A, _address: u64) {
        buf.fill(0);
    }

    fn write(&self, allocator: &mut A, _address: u64, buf: &[u8]) {
        if let Some(byte) = buf.first() {
            self.transmit(allocator, *byte);
        }
    }

    fn write_debug(&self, _allocator: &mut A, _address: u64, _buf: &[u8]) {
        // Debug stores must not emit output.
    }
}
