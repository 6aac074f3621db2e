//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Purchase orders, goods-received-notes and reorder rules are entities: two
/// records with the same id are the same record, whatever their fields say.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
