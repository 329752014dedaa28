use std::fmt::Debug;

use crate::errors::InvalidIdError;

/// Trait for types that provide insertion/removal and access capabilities for
/// the state objects of simulated components.
///
/// Components don't own their state directly; they own *ids* of objects kept
/// in an allocator, so that all mutable simulation state lives in one place
/// and components themselves can be shared freely.
pub trait Allocator: Debug {
    /// Type used to identify objects of type `T`.
    ///
    /// For safety, once an object with an id is removed, that id should never be used again by the
    /// same [`Allocator`].
    type Id<T>: Copy + Eq + Debug;

    /// Inserts an object of type `T`.
    ///
    /// Note that the size of `T` should be kept reasonable, since accessing an object always means
    /// accessing it as a whole. When parts of a component's state are updated at very different
    /// rates, prefer allocating them as separate objects.
    fn insert<T: Clone + 'static>(&mut self, object: T) -> Self::Id<T>;

    /// Removes an object of type `T`.
    ///
    /// If you need an owned version of the removed object, use [`Self::pop`].
    fn remove<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError>;

    /// Removes an object of type `T` and returns an owned version.
    fn pop<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError>;

    /// Acquire a reference to an object of type `T` by id.
    fn get<T: Clone + 'static>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError>;

    /// Acquire a mutable reference to an object of type `T` by id.
    fn get_mut<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError>;
}
