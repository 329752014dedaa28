use crate::bus::Bus;
use crate::{AddressRange, Allocator};
use rangemap::RangeInclusiveMap;
use std::rc::Rc;
use thiserror::Error;

/// Abstraction of a (TileLink) crossbar providing a single *master* interface for the entire
/// physical address space, and delegating requests to the appropriate agent's *slave* interface
/// depending on a configurable address mapping.
///
/// The mapping consists of a set of non-overlapping device windows; every access whose *start*
/// address falls within a window is forwarded in full to that window's slave, with the address
/// rebased to the slave's local address space. Accesses that start outside every window go to the
/// backing store, which covers the remainder of the address space (in this system: the sparse
/// memory). Matching on the start address mirrors how memory-mapped device registers are decoded
/// here; windows are small register blocks, and an access beginning inside one belongs to the
/// device no matter its length.
#[derive(Debug)]
pub struct SystemBus<A: Allocator> {
    /// Map of physical address range to `(slave_index, base_address)`, where `base_address` is
    /// the slave-local address of the window's first byte.
    regions: RangeInclusiveMap<u64, Region>,
    slaves: Vec<Rc<dyn Bus<A>>>,
    backing: Rc<dyn Bus<A>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct Region {
    slave: usize,
    base: u64,
}

impl<A: Allocator> SystemBus<A> {
    /// Create a crossbar whose entire address space maps to `backing`.
    pub fn new(backing: Rc<dyn Bus<A>>) -> Self {
        Self {
            regions: RangeInclusiveMap::new(),
            slaves: Vec::new(),
            backing,
        }
    }

    /// Chainable version of [`Self::attach_resource`].
    pub fn with_resource(
        mut self,
        slave: Rc<dyn Bus<A>>,
        mappings: impl IntoIterator<Item = (AddressRange, u64)>,
    ) -> Result<Self, ResourceMappingError> {
        self.attach_resource(slave, mappings).map(|()| self)
    }

    /// Attaches the `slave` interface at the given windows.
    ///
    /// Each mapping is a `(window, base_address)` pair: accesses starting within `window` are
    /// forwarded to `slave` at `base_address + offset_within_window`.
    pub fn attach_resource(
        &mut self,
        slave: Rc<dyn Bus<A>>,
        mappings: impl IntoIterator<Item = (AddressRange, u64)>,
    ) -> Result<(), ResourceMappingError> {
        let index = self.slaves.len();
        self.slaves.push(slave);
        for (window, base) in mappings {
            if self.regions.overlaps(&window.into()) {
                return Err(ResourceMappingError::OverlappingWindows);
            }
            if base.checked_add(window.delta()).is_none() {
                return Err(ResourceMappingError::UnrepresentableTarget);
            }
            self.regions
                .insert(window.into(), Region { slave: index, base });
        }
        Ok(())
    }

    fn route(&self, address: u64) -> (&dyn Bus<A>, u64) {
        match self.regions.get_key_value(&address) {
            Some((range, region)) => (
                &*self.slaves[region.slave],
                region.base + (address - range.start()),
            ),
            None => (&*self.backing, address),
        }
    }
}

impl<A: Allocator> Bus<A> for SystemBus<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        let (slave, mapped) = self.route(address);
        slave.read(buf, allocator, mapped);
    }

    fn read_debug(&self, buf: &mut [u8], allocator: &A, address: u64) {
        let (slave, mapped) = self.route(address);
        slave.read_debug(buf, allocator, mapped);
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let (slave, mapped) = self.route(address);
        slave.write(allocator, mapped, buf);
    }

    fn write_debug(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let (slave, mapped) = self.route(address);
        slave.write_debug(allocator, mapped, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ram::SparseRam;
    use crate::{address_range, Xlen};
    use bedrock::Arena;

    /// Reads return a constant plus the slave-local address, making the rebasing observable.
    #[derive(Debug)]
    struct Probe(u8);

    impl Bus<Arena> for Probe {
        fn read(&self, buf: &mut [u8], _allocator: &mut Arena, address: u64) {
            buf.fill(self.0.wrapping_add(address as u8));
        }

        fn read_debug(&self, buf: &mut [u8], _allocator: &Arena, address: u64) {
            buf.fill(self.0.wrapping_add(address as u8));
        }

        fn write(&self, _allocator: &mut Arena, _address: u64, _buf: &[u8]) {}

        fn write_debug(&self, _allocator: &mut Arena, _address: u64, _buf: &[u8]) {}
    }

    fn bus_with_probe() -> (Arena, SystemBus<Arena>) {
        let mut allocator = Arena::new();
        let ram = Rc::new(SparseRam::new(&mut allocator, Xlen::Rv32));
        let bus = SystemBus::new(ram as Rc<dyn Bus<Arena>>)
            .with_resource(
                Rc::new(Probe(0x40)),
                [(address_range![0x100, 0x10F], 0x8)],
            )
            .unwrap();
        (allocator, bus)
    }

    #[test]
    fn test_window_access_is_rebased() {
        let (mut allocator, bus) = bus_with_probe();
        let mut buf = [0u8; 1];
        bus.read(&mut buf, &mut allocator, 0x104);
        assert_eq!([0x40 + 0x8 + 0x4], buf);
    }

    #[test]
    fn test_unmapped_access_goes_to_backing() {
        let (mut allocator, bus) = bus_with_probe();
        bus.write(&mut allocator, 0x200, &[0xAB]);
        let mut buf = [0u8; 1];
        bus.read(&mut buf, &mut allocator, 0x200);
        assert_eq!([0xAB], buf);
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let mut allocator = Arena::new();
        let ram = Rc::new(SparseRam::new(&mut allocator, Xlen::Rv32));
        let result = SystemBus::new(ram as Rc<dyn Bus<Arena>>)
            .with_resource(Rc::new(Probe(0)), [(address_range![0x100, 0x10F], 0)])
            .unwrap()
            .with_resource(Rc::new(Probe(1)), [(address_range![0x108, 0x117], 0)]);
        assert!(result.is_err());
    }
}

#[derive(Error, Debug)]
pub enum ResourceMappingError {
    /// The window mapped to the resource overlaps with another window for the same resource, or
    /// with a window from an already attached resource.
    #[error("device window overlaps with previously mapped window")]
    OverlappingWindows,
    /// The window does not fit in the slave's local address space when rebased.
    #[error("device window exceeds the slave's local address space")]
    UnrepresentableTarget,
}
