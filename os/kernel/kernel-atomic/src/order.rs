use crate::sealed::Sealed;

/// The four ordering flavors of an atomic operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OrderKind {
    /// Atomicity only.
    Relaxed,
    /// Later accesses stay after the operation.
    Acquire,
    /// Earlier accesses stay before the operation.
    Release,
    /// A full fence on both sides of the operation.
    Full,
}

/// Ordering selected at compile time.
///
/// Implemented only by [`Relaxed`], [`Acquire`], [`Release`] and [`Full`].
pub trait MemoryOrder: Sealed {
    const KIND: OrderKind;
}

#[derive(Debug, Copy, Clone)]
pub struct Relaxed;

#[derive(Debug, Copy, Clone)]
pub struct Acquire;

#[derive(Debug, Copy, Clone)]
pub struct Release;

#[derive(Debug, Copy, Clone)]
pub struct Full;

macro_rules! memory_order {
    ($($ty:ident),*) => {$(
        impl Sealed for $ty {}
        impl MemoryOrder for $ty {
            const KIND: OrderKind = OrderKind::$ty;
        }
    )*};
}

memory_order!(Relaxed, Acquire, Release, Full);
