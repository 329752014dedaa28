/// This error indicates an invalid [`crate::allocator::Allocator::Id`] was used.
///
/// Within the context of one [`crate::allocator::Allocator`], an id can be invalid if it has never
/// been created by that allocator, if it has been removed or popped from the allocator, or if it
/// identifies an object of a different type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InvalidIdError;
