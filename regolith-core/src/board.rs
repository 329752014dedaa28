//! Provides a generic board wrapping a single hart with the FE310-flavoured peripherals guest
//! images expect.
//!
//! > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores
//! > together with other non-RISC-V-compatible cores, fixed-function accelerators, various
//! > physical memory structures, I/O devices, and an interconnect structure to allow the
//! > components to communicate.

use std::ops::Deref;
use std::rc::Rc;

use crate::bus::Bus;
use crate::hart::{self, Counters, Hart};
use crate::loader::Image;
use crate::resources::clint::Clint;
use crate::resources::host::HostBridge;
use crate::resources::prci::Prci;
use crate::resources::ram::SparseRam;
use crate::resources::uart::Uart;
use crate::system_bus::SystemBus;
use crate::{address_range, Allocated, Allocator, Xlen};

/// Physical address of the memory-mapped `mtime` register.
pub const MTIME_ADDRESS: u64 = 0x0200_BFF8;
/// Physical base address of the PRCI clock-configuration block.
pub const PRCI_ADDRESS: u64 = 0x1000_8000;
/// Physical address of UART0's transmit register.
pub const UART0_ADDRESS: u64 = 0x1001_3000;
/// Physical address of UART1's transmit register.
pub const UART1_ADDRESS: u64 = 0x1002_3000;

/// Default address of the `tohost` cell, used when the loaded image doesn't define one.
pub const TOHOST_DEFAULT: u64 = 0xF000_1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub xlen: Xlen,
    /// Address to which the hart's program counters are reset.
    pub reset_vector: u64,
    /// Address of the 64-bit `tohost` host-communication cell.
    pub tohost: u64,
    /// Address of the 64-bit `fromhost` host-communication cell.
    pub fromhost: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xlen: Xlen::Rv32,
            reset_vector: 0,
            tohost: TOHOST_DEFAULT,
            fromhost: TOHOST_DEFAULT + 0x40,
        }
    }
}

impl Config {
    /// Configuration for running a parsed image: entry point as reset vector, host cells where
    /// the image's `.tohost` section puts them.
    pub fn for_image(xlen: Xlen, image: &Image) -> Self {
        let tohost = image.tohost().unwrap_or(TOHOST_DEFAULT);
        Self {
            xlen,
            reset_vector: image.entry(),
            tohost,
            fromhost: tohost + 0x40,
        }
    }
}

/// Single-hart RISC-V platform: sparse main memory covering the whole physical space, with the
/// CLINT timer, PRCI clock block, two transmit-only UARTs, and the riscv-tests host interface
/// mapped over it.
#[derive(Debug)]
pub struct Board<A: Allocator> {
    hart: Hart<A, Interconnect<A>>,
    system_bus: Interconnect<A>,
    ram: Rc<SparseRam<A>>,
    host: Rc<HostBridge<A>>,
}

impl<A: Allocator + 'static> Board<A> {
    pub fn new(allocator: &mut A, config: Config) -> Self {
        let counters = Allocated::new(allocator, Counters::new());
        let ram = Rc::new(SparseRam::new(allocator, config.xlen));
        let clint = Rc::new(Clint::new(counters.clone()));
        let prci = Rc::new(Prci::new(allocator, counters.clone()));
        let uart0 = Rc::new(Uart::new(allocator, "UART0"));
        let uart1 = Rc::new(Uart::new(allocator, "UART1"));
        let host = Rc::new(HostBridge::new(allocator, config.xlen));

        let system_bus = Rc::new(
            SystemBus::new(Rc::clone(&ram) as Rc<dyn Bus<A>>)
                .with_resource(
                    clint,
                    [(address_range![MTIME_ADDRESS, MTIME_ADDRESS + 7], 0)],
                )
                .unwrap()
                .with_resource(
                    prci,
                    [(address_range![PRCI_ADDRESS, PRCI_ADDRESS + 0xF], 0)],
                )
                .unwrap()
                .with_resource(
                    uart0,
                    [(address_range![UART0_ADDRESS, UART0_ADDRESS + 3], 0)],
                )
                .unwrap()
                .with_resource(
                    uart1,
                    [(address_range![UART1_ADDRESS, UART1_ADDRESS + 3], 0)],
                )
                .unwrap()
                .with_resource(
                    Rc::clone(&host) as Rc<dyn Bus<A>>,
                    [
                        (address_range![config.tohost, config.tohost + 7], 0),
                        (address_range![config.fromhost, config.fromhost + 7], 8),
                    ],
                )
                .unwrap(),
        );

        let hart = Hart::new(
            allocator,
            Rc::clone(&system_bus),
            counters,
            hart::Config {
                xlen: config.xlen,
                reset_vector: config.reset_vector,
            },
        );

        Self {
            hart,
            system_bus,
            ram,
            host,
        }
    }

    pub fn hart(&self) -> &Hart<A, impl Bus<A>> {
        &self.hart
    }

    pub fn system_bus(&self) -> &SystemBus<A> {
        &self.system_bus
    }

    pub fn ram(&self) -> &SparseRam<A> {
        &self.ram
    }

    /// The value the guest stopped the simulation with, if it has stopped.
    ///
    /// `Some(1)` is a clean exit; any other value is an abort code.
    pub fn exit_status(&self, allocator: &A) -> Option<u64> {
        self.host.exit_status(allocator)
    }

    /// Load a parsed image's segments into memory through the hart's debug path.
    pub fn load_image(&self, allocator: &mut A, image: &Image) -> Result<(), hart::AccessError> {
        image.load_into(allocator, &self.hart)
    }

    /// Force the board back to its reset state. Memory contents are cleared, so a fresh image
    /// load is required afterwards.
    pub fn reset(&self, allocator: &mut A) {
        self.hart.reset(allocator);
        self.ram.reset(allocator);
    }
}

// TODO: In the past this was a Rc<RefCell<SystemBus<A>>>, we might need that back in the future.
type Interconnect<A> = Rc<SystemBus<A>>;

impl<A: Allocator> Bus<A> for Interconnect<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.deref().read(buf, allocator, address)
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        self.deref().read_debug(buf, allocator, address)
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.deref().write(allocator, address, buf)
    }

    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.deref().write_debug(allocator, address, buf)
    }
}
