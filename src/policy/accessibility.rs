//! Requested accessibility levels of policy bindings.

use strum::{EnumCount, EnumIter};

use crate::metadata::members::{FieldAttributes, MemberVisibility, MethodAttributes, TypeVisibility};

/// How much of a type a binding grants, ordered from nothing to everything.
///
/// `Public` grants public members, `Protected` adds family members and `Private` grants every
/// member regardless of its visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, EnumCount)]
pub enum Accessibility {
    /// Nothing is granted
    None,
    /// Public members
    Public,
    /// Public and family members
    Protected,
    /// All members
    Private,
}

impl Accessibility {
    /// Returns true if a member of the given visibility is granted at this level
    #[must_use]
    pub fn admits(self, visibility: MemberVisibility) -> bool {
        match visibility {
            MemberVisibility::Public => self >= Accessibility::Public,
            MemberVisibility::Family | MemberVisibility::FamOrAssem => self >= Accessibility::Protected,
            _ => self >= Accessibility::Private,
        }
    }

    /// Returns true if a field with these flags is granted at this level
    #[must_use]
    pub fn admits_field(self, flags: FieldAttributes) -> bool {
        self.admits(flags.visibility())
    }

    /// Returns true if a method with these flags is granted at this level
    #[must_use]
    pub fn admits_method(self, flags: MethodAttributes) -> bool {
        self.admits(flags.visibility())
    }

    /// Level applied to a nested type of a type bound at this level.
    ///
    /// Nested types that are neither public nor family only expose their public members, unless
    /// everything was requested.
    #[must_use]
    pub fn for_nested(self, visibility: TypeVisibility) -> Accessibility {
        let hidden = !matches!(visibility, TypeVisibility::NestedPublic | TypeVisibility::NestedFamily);
        if hidden && self != Accessibility::Private {
            self.min(Accessibility::Public)
        } else {
            self
        }
    }

    /// Level applied to a top-level type of a module bound at this level.
    ///
    /// Non-public classes and interface implementors expose their public members, other
    /// non-public types nothing, unless everything was requested.
    #[must_use]
    pub fn for_top_level(self, visibility: TypeVisibility, class_like: bool) -> Accessibility {
        let hidden = visibility != TypeVisibility::Public && self != Accessibility::Private;
        match (hidden, class_like) {
            (false, _) => self,
            (true, true) => self.min(Accessibility::Public),
            (true, false) => Accessibility::None,
        }
    }
}
