//! Incremental construction of a [`CasPolicy`].

use std::{collections::HashMap, sync::Arc};

use crate::{
    metadata::identity::MemberId,
    policy::grants::{AccessDecision, CasPolicy, MemberAccess, MembershipDecision},
    runtime::LoadedModule,
};

/// Collects grants and freezes them into a [`CasPolicy`].
///
/// Grants are accumulated in call order: a later [`CasPolicyBuilder::deny`] removes operations
/// that an earlier [`CasPolicyBuilder::allow`] added, and a later `allow` adds them back.
///
/// # Examples
///
/// ```rust,no_run
/// use dotcas::prelude::*;
///
/// # fn example(shared: &LoadedModule) -> dotcas::Result<()> {
/// let policy = CasPolicyBuilder::new()
///     .allow(ModuleBinding::new(shared, Accessibility::Public))
///     .deny(TypeBinding::by_name(shared, "Shared.SharedClass", Accessibility::None)?
///         .with_field("DeniedStaticField", Accessibility::Public)?)
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct CasPolicyBuilder {
    grants: HashMap<MemberId, MemberAccess>,
    decision: Arc<dyn AccessDecision>,
}

impl CasPolicyBuilder {
    /// Creates an empty builder using [`MembershipDecision`]
    #[must_use]
    pub fn new() -> Self {
        CasPolicyBuilder {
            grants: HashMap::new(),
            decision: Arc::new(MembershipDecision),
        }
    }

    /// Replaces the decision applied to the grant table
    #[must_use]
    pub fn with_decision(mut self, decision: Arc<dyn AccessDecision>) -> Self {
        self.decision = decision;
        self
    }

    /// Adds every grant of `grants`, typically a binding
    #[must_use]
    pub fn allow(mut self, grants: impl IntoIterator<Item = (MemberId, MemberAccess)>) -> Self {
        for (member, access) in grants {
            *self.grants.entry(member).or_default() |= access;
        }
        self
    }

    /// Removes every grant of `grants`
    #[must_use]
    pub fn deny(mut self, grants: impl IntoIterator<Item = (MemberId, MemberAccess)>) -> Self {
        for (member, access) in grants {
            if let Some(granted) = self.grants.get_mut(&member) {
                granted.remove(access);
                if granted.is_empty() {
                    self.grants.remove(&member);
                }
            }
        }
        self
    }

    /// Grants everything applicable to a single member of `module`.
    ///
    /// `initonly` and literal fields are granted reads only. A member that `module` does not
    /// define grants nothing.
    #[must_use]
    pub fn allow_member(self, module: &LoadedModule, member: MemberId) -> Self {
        match MemberAccess::applicable(module, member) {
            Some(access) => self.allow([(member, access)]),
            None => {
                log::warn!("{:?} is not a member of {}, nothing granted", member, module.name());
                self
            }
        }
    }

    /// Revokes everything granted on a single member
    #[must_use]
    pub fn deny_member(self, member: MemberId) -> Self {
        self.deny([(member, MemberAccess::all())])
    }

    /// Number of members with at least one grant so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Returns true if nothing is granted so far
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Freezes the grants
    #[must_use]
    pub fn build(self) -> CasPolicy {
        log::debug!("built policy with {} granted members", self.grants.len());
        CasPolicy::new(self.grants, self.decision)
    }
}

impl Default for CasPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
