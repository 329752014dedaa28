#[macro_use]
extern crate static_assertions;

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod address_range;
pub mod board;
pub mod bus;
pub mod hart;
pub mod loader;
pub mod resources;
pub mod system_bus;

// Re-export Allocator trait so dependants don't need to include bedrock as a dependency
/// Trait for types that can store state of simulated components.
pub use bedrock::allocator::Allocator;

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;

/// Register width of a hart, the `XLEN` parameter of the RISC-V ISA.
///
/// Registers and addresses are kept as `u64` internally regardless of the
/// configured width; values that architecturally have XLEN bits are truncated
/// through [`Xlen::truncate`] at the points where the width is observable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Xlen {
    Rv32,
    Rv64,
}

impl Xlen {
    /// The register width in bits (32 or 64).
    pub fn bits(self) -> u32 {
        match self {
            Self::Rv32 => 32,
            Self::Rv64 => 64,
        }
    }

    /// The register width in bytes (4 or 8).
    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// All-ones mask of XLEN bits.
    pub fn mask(self) -> u64 {
        match self {
            Self::Rv32 => u32::MAX as u64,
            Self::Rv64 => u64::MAX,
        }
    }

    /// Truncate `value` to XLEN bits.
    pub fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }
}

impl fmt::Display for Xlen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RV{}", self.bits())
    }
}

/// List of all possible privilege levels for RISC-V.
///
/// Same as [`PrivilegeLevel`] except that it allows specifying the reserved privilege level `2`.
/// This can be useful in case a minimum required privilege level is specified as a 2-bit value,
/// since that value itself may be a reserved privilege level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA. When using the hypervisor extension,
    /// this becomes the Hypervisor privilege level.
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Convert a 2-bit value into a [`RawPrivilegeLevel`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Reserved)
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Reserved => "2",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// List of defined privilege levels for RISC-V.
///
/// A privilege level is always referenced by two bits, so only `0`, `1`, `2`, and `3` are valid
/// privilege levels. However, only levels `0`, `1`, and `3` are defined; level `2` is considered
/// *reserved* for now.
///
/// > The machine level has the highest privileges and is the only mandatory privilege level for a
/// > RISC-V hardware platform. Code run in machine-mode (M-mode) is usually inherently trusted, as
/// > it has low-level access to the machine implementation. M-mode can be used to manage secure
/// > execution environments on RISC-V. User-mode (U-mode) and supervisor-mode (S-mode) are intended
/// > for conventional application and operating system usage respectively.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lower privilege level.
    User = 0,
    /// Supervisor (abbreviated `S`) is an intermediate privilege level,
    /// that allows protection from OS.
    Supervisor = 1,
    // Level 2 is reserved
    /// Machine (abbreviated `M`) is the highest privilege level.
    /// It is the only mandatory privilege level for a RISC-V hardware platform.
    Machine = 3,
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

/// Wrapper around [`Allocator`] for single objects of type `T` that are never deallocated during
/// the lifetime of this wrapper.
///
/// The primary goal of this wrapper is to provide a more convenient interface around
/// [`Allocator::get`] and [`Allocator::get_mut`], which does return a (mutable) reference directly
/// rather than a `Result`.
///
/// Handles are cheap to clone; clones refer to the same underlying object. Components that need to
/// observe another component's state (e.g. a device deriving a timer from the hart's instruction
/// count) hold a cloned handle.
#[derive(Debug)]
pub struct Allocated<A: Allocator, T: 'static + Clone>(A::Id<T>);

impl<A: Allocator, T: 'static + Clone> Allocated<A, T> {
    /// Inserts `object` into `allocator`. See also [`Allocator::insert`].
    pub fn new(allocator: &mut A, object: T) -> Self {
        Self(allocator.insert(object))
    }

    /// Pops the inner object from `allocator`, returning it while consuming `self`.
    /// See also [`Allocator::pop`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object was already removed from `allocator`.
    pub fn into_inner(self, allocator: &mut A) -> T {
        allocator.pop(self.0).unwrap()
    }

    /// Removes the inner object from `allocator`, consuming `self`. See also [`Allocator::remove`].
    ///
    /// If you need an owned version of the inner object, use [`into_inner`](Self::into_inner).
    ///
    /// # Panics
    ///
    /// Panics if the inner object was already removed from `allocator`.
    pub fn drop(self, allocator: &mut A) {
        allocator.remove(self.0).unwrap()
    }

    /// Returns a reference to the stored object. See also [`Allocator::get`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object has been removed from `allocator`.
    pub fn get<'a>(&self, allocator: &'a A) -> &'a T {
        allocator.get(self.0).unwrap()
    }

    /// Returns a mutable reference to the stored object. See also [`Allocator::get_mut`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object has been removed from `allocator`.
    pub fn get_mut<'a>(&self, allocator: &'a mut A) -> &'a mut T {
        allocator.get_mut(self.0).unwrap()
    }
}

impl<A: Allocator, T: 'static + Clone> Clone for Allocated<A, T> {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}
