//! Frozen allow-lists and the decision applied to them.

use std::{collections::HashMap, fmt, sync::Arc};

use bitflags::bitflags;

use crate::{
    metadata::{identity::MemberId, module::FieldDef},
    runtime::LoadedModule,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Operations a policy admits on one member
    pub struct MemberAccess: u8 {
        /// Load the field or take its address for reading
        const READ = 0x01;
        /// Store to the field
        const WRITE = 0x02;
        /// Call the method, construct through it or load a pointer to it
        const CALL = 0x04;
    }
}

impl MemberAccess {
    /// Everything applicable to `id`, `None` if `module` does not define it.
    ///
    /// Methods take [`MemberAccess::CALL`], fields as [`MemberAccess::for_field`].
    #[must_use]
    pub fn applicable(module: &LoadedModule, id: MemberId) -> Option<MemberAccess> {
        if let Some((_, field)) = module.field(id) {
            return Some(MemberAccess::for_field(field));
        }
        module.method(id).map(|_| MemberAccess::CALL)
    }

    /// Read, plus write unless the field is `initonly` or a literal
    #[must_use]
    pub fn for_field(field: &FieldDef) -> MemberAccess {
        if field.flags.is_writable() {
            MemberAccess::READ | MemberAccess::WRITE
        } else {
            MemberAccess::READ
        }
    }
}

/// Judges whether a grant table admits an access.
pub trait AccessDecision: Send + Sync {
    /// Returns true if `access` to `member` is admitted
    fn admits(&self, grants: &HashMap<MemberId, MemberAccess>, member: MemberId, access: MemberAccess) -> bool;
}

/// Admits exactly the granted operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MembershipDecision;

impl AccessDecision for MembershipDecision {
    fn admits(&self, grants: &HashMap<MemberId, MemberAccess>, member: MemberId, access: MemberAccess) -> bool {
        !access.is_empty() && grants.get(&member).is_some_and(|granted| granted.contains(access))
    }
}

/// An immutable allow-list of external members.
///
/// A member that is not listed is not denied outright: its guard falls through to the full
/// runtime check, which may still admit it through the load-context rule.
#[derive(Clone)]
pub struct CasPolicy {
    grants: HashMap<MemberId, MemberAccess>,
    decision: Arc<dyn AccessDecision>,
}

impl CasPolicy {
    pub(crate) fn new(grants: HashMap<MemberId, MemberAccess>, decision: Arc<dyn AccessDecision>) -> Self {
        CasPolicy { grants, decision }
    }

    /// A policy that grants nothing
    #[must_use]
    pub fn empty() -> Self {
        CasPolicy::new(HashMap::new(), Arc::new(MembershipDecision))
    }

    /// Returns true if the member may be used: called for methods, read for fields
    #[must_use]
    pub fn can_access(&self, member: MemberId) -> bool {
        let access = if member.is_field() {
            MemberAccess::READ
        } else {
            MemberAccess::CALL
        };
        self.decision.admits(&self.grants, member, access)
    }

    /// Returns true if every operation in `access` is admitted on `field`
    #[must_use]
    pub fn can_access_field(&self, field: MemberId, access: MemberAccess) -> bool {
        self.decision.admits(&self.grants, field, access)
    }

    /// Returns true if `method` may always be called.
    ///
    /// Virtual methods are never always-callable: the method that runs depends on the receiver
    /// and must be judged after late binding.
    #[must_use]
    pub fn can_call(&self, method: MemberId, is_virtual: bool) -> bool {
        !is_virtual && self.decision.admits(&self.grants, method, MemberAccess::CALL)
    }

    /// The operations granted on `member`
    #[must_use]
    pub fn granted(&self, member: MemberId) -> MemberAccess {
        self.grants.get(&member).copied().unwrap_or_default()
    }

    /// Number of members with at least one grant
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Returns true if nothing is granted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl fmt::Debug for CasPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasPolicy").field("grants", &self.grants.len()).finish()
    }
}

impl Default for CasPolicy {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{identity::ModuleId, token::Token};

    fn field() -> MemberId {
        MemberId::new(ModuleId(1), Token::from_parts(Token::FIELD, 1))
    }

    fn method() -> MemberId {
        MemberId::new(ModuleId(1), Token::from_parts(Token::METHODDEF, 1))
    }

    #[test]
    fn test_field_access_is_per_operation() {
        let mut grants = HashMap::new();
        grants.insert(field(), MemberAccess::READ);
        let policy = CasPolicy::new(grants, Arc::new(MembershipDecision));

        assert!(policy.can_access(field()));
        assert!(policy.can_access_field(field(), MemberAccess::READ));
        assert!(!policy.can_access_field(field(), MemberAccess::WRITE));
        assert!(!policy.can_access_field(field(), MemberAccess::READ | MemberAccess::WRITE));
    }

    #[test]
    fn test_virtual_calls_are_never_always_callable() {
        let mut grants = HashMap::new();
        grants.insert(method(), MemberAccess::CALL);
        let policy = CasPolicy::new(grants, Arc::new(MembershipDecision));

        assert!(policy.can_call(method(), false));
        assert!(!policy.can_call(method(), true));
        assert!(policy.can_access(method()));
        assert!(!CasPolicy::empty().can_access(method()));
    }
}
