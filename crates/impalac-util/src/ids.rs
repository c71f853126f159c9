//! Handle types shared between compiler phases.

use crate::index_vec::Idx;

/// Unique identifier of a declaration site (item, parameter, local, type
/// parameter). Allocated by the semantic analyzer; the AST caches it on
/// declaring and referencing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefId(pub u32);

impl Idx for DefId {
    fn from_usize(idx: usize) -> Self {
        DefId(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl DefId {
    /// Reserved id for nodes that have no real declaration.
    pub const DUMMY: DefId = DefId(u32::MAX);

    pub fn is_dummy(self) -> bool {
        self == Self::DUMMY
    }
}

/// Handle of a type term owned by the semantic analyzer's type table.
///
/// Handles are stable for the lifetime of their table; structurally equal
/// types share a handle (hash-consing), so handle comparison is type
/// equality for structural types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl Idx for TypeId {
    fn from_usize(idx: usize) -> Self {
        TypeId(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeId {
    /// Reserved id marking an unfilled operand slot of a nominal type under
    /// construction.
    pub const DUMMY: TypeId = TypeId(u32::MAX);

    pub fn is_dummy(self) -> bool {
        self == Self::DUMMY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_ids() {
        assert!(DefId::DUMMY.is_dummy());
        assert!(!DefId(0).is_dummy());
        assert!(TypeId::DUMMY.is_dummy());
        assert!(!TypeId(0).is_dummy());
    }

    #[test]
    fn idx_roundtrip() {
        assert_eq!(DefId::from_usize(42).index(), 42);
        assert_eq!(TypeId::from_usize(7).index(), 7);
    }
}
