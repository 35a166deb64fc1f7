//! This module defines traits describing general properties of abstract domains
//! as well as the domain types used by the taint analysis.

mod taint;
pub use taint::*;

mod tree;
pub use tree::*;

/// The main trait describing an abstract domain.
///
/// Each abstract domain is partially ordered and elements of the same domain
/// can be merged. All domains in this crate grow upwards from a bottom
/// element (the empty taint).
pub trait AbstractDomain: Sized + Eq + Clone {
    /// Return an upper bound (with respect to the partial order on the domain)
    /// for the two inputs `self` and `other`.
    fn merge(&self, other: &Self) -> Self;

    /// Returns whether `self` is less than or equal to `other`
    /// with respect to the partial order on the domain.
    fn less_or_equal(&self, other: &Self) -> bool;

    /// Returns whether the element is the bottom element
    /// (i.e. minimal with respect to the partial order).
    fn is_bottom(&self) -> bool;
}

/// An abstract domain implementing this trait has a global minimum, i.e. a *Bottom* element.
pub trait HasBottom {
    /// Return an instance of the *Bottom* element.
    fn bottom() -> Self;
}
