//! The runtime decision surface called by instrumented code.
//!
//! Instrumented modules call into [`CasRuntime`] in two situations: the static constructor of
//! their guard type asks the `can_*` questions once per guarded member to fill the cached flags,
//! and guarded sites whose flag is not set call the `assert_*` operations right before the
//! original instruction runs.
//!
//! An access is admitted when the caller and the target share a load context (and
//! [`RuntimeConfig::trust_load_context`] is on), or when the caller's policy grants it. Virtual
//! calls are judged on the method that dispatch selects for the actual receiver, so a grant on
//! an override does not leak to the base declaration and vice versa.
//!
//! The core library is not loaded into the [`Domain`] and its members cannot be granted. Calls
//! into it are admitted, except that a virtual call is judged on the loaded override the receiver
//! dispatches to. Its dangerous entry points are shimmed at rewrite time instead.
//!
//! # Thread Safety
//!
//! All operations take `&self` and may be called concurrently from any number of threads.

use std::sync::Arc;

use crate::{
    config::RuntimeConfig,
    instrument::{
        expression::SiteDecision,
        shims::ShimTable,
        site::{AccessSite, GuardKind},
    },
    metadata::{
        identity::{MemberId, ModuleId, TypeHandle},
        members::MethodRef,
        typesig::CORE_LIBRARY,
    },
    policy::{CasPolicy, MemberAccess},
    runtime::{
        domain::{Domain, LoadedModule},
        resolver::LateBindingResolver,
        table::PolicyTable,
        violation::{DenyViolations, ViolationHandler},
    },
    Error, Result,
};

/// Answers and enforces access questions for sandboxed modules.
pub struct CasRuntime {
    domain: Arc<Domain>,
    policies: PolicyTable,
    resolver: LateBindingResolver,
    config: RuntimeConfig,
    handler: Arc<dyn ViolationHandler>,
    shims: ShimTable,
}

impl CasRuntime {
    /// Creates a runtime over `domain` that denies every violation
    #[must_use]
    pub fn new(domain: Arc<Domain>, config: RuntimeConfig) -> Self {
        CasRuntime {
            resolver: LateBindingResolver::new(domain.clone()),
            domain,
            policies: PolicyTable::new(),
            config,
            handler: Arc::new(DenyViolations),
            shims: ShimTable::with_default_shims(),
        }
    }

    /// Replaces the violation handler
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ViolationHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replaces the shim table consulted for reflective invocation
    #[must_use]
    pub fn with_shims(mut self, shims: ShimTable) -> Self {
        self.shims = shims;
        self
    }

    /// The modules this runtime judges
    #[must_use]
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// The registered policies
    #[must_use]
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// The runtime settings
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subjects `module` to `policy`
    pub fn register_policy(&self, module: &Arc<LoadedModule>, policy: Arc<CasPolicy>) {
        self.policies.register(module, policy);
    }

    /// Returns true if `caller` may always read `field`
    ///
    /// # Errors
    /// Returns [`Error::NoPolicy`] if `caller` has no policy, or an error if either module is
    /// not loaded.
    pub fn can_read_field(&self, caller: ModuleId, field: MemberId) -> Result<bool> {
        self.can_access_field(caller, field, MemberAccess::READ)
    }

    /// Returns true if `caller` may always write `field`
    ///
    /// # Errors
    /// Returns [`Error::NoPolicy`] if `caller` has no policy, or an error if either module is
    /// not loaded.
    pub fn can_write_field(&self, caller: ModuleId, field: MemberId) -> Result<bool> {
        self.can_access_field(caller, field, MemberAccess::WRITE)
    }

    /// Returns true if `caller` may call `method` without looking at the receiver.
    ///
    /// Virtual methods outside the caller's load context never qualify, since the method that
    /// runs is only known once the receiver is.
    ///
    /// # Errors
    /// Returns [`Error::NoPolicy`] if `caller` has no policy, or an error if `method` is not a
    /// loaded method.
    pub fn can_call_always(&self, caller: ModuleId, method: MemberId) -> Result<bool> {
        let policy = self.policy(caller)?;
        if self.same_context(caller, method.module)? {
            return Ok(true);
        }
        let is_virtual = self.is_virtual(method)?;
        Ok(policy.can_call(method, is_virtual))
    }

    /// Fails unless `caller` may read `field`
    ///
    /// # Errors
    /// Returns [`Error::PolicyViolation`] when denied and the handler does not admit it.
    pub fn assert_can_read_field(&self, caller: ModuleId, field: MemberId) -> Result<()> {
        if self.can_read_field(caller, field)? {
            return Ok(());
        }
        self.violation(caller, field)
    }

    /// Fails unless `caller` may write `field`
    ///
    /// # Errors
    /// Returns [`Error::PolicyViolation`] when denied and the handler does not admit it.
    pub fn assert_can_write_field(&self, caller: ModuleId, field: MemberId) -> Result<()> {
        if self.can_write_field(caller, field)? {
            return Ok(());
        }
        self.violation(caller, field)
    }

    /// Fails unless `caller` may call the method that `method` dispatches to on `receiver`.
    ///
    /// `receiver` is the runtime type of the instance, `None` for static calls, constructors and
    /// receivers without a loaded definition.
    ///
    /// # Errors
    /// Returns [`Error::PolicyViolation`] when denied and the handler does not admit it, or
    /// [`Error::ResolutionFailure`] if dispatch finds no target.
    pub fn assert_can_call(&self, caller: ModuleId, receiver: Option<TypeHandle>, method: MemberId) -> Result<()> {
        let policy = self.policy(caller)?;
        let target = self.resolver.resolve(receiver, method)?;
        self.judge_call(caller, &policy, target)
    }

    /// As [`CasRuntime::can_call_always`] for a method reference.
    ///
    /// Methods of the core library are not loaded. Its static methods and constructors always
    /// qualify, while its instance methods never do since a loaded type may override them.
    ///
    /// # Errors
    /// Returns [`Error::NoPolicy`] if `caller` has no policy, or a resolution error for a
    /// method outside the core library that is not loaded.
    pub fn can_call_always_ref(&self, caller: ModuleId, method: &MethodRef) -> Result<bool> {
        match self.domain.resolve_method(method) {
            Ok(id) => self.can_call_always(caller, id),
            Err(_) if is_core(method) => {
                self.policy(caller)?;
                Ok(!method.sig.has_this || method.is_constructor())
            }
            Err(err) => Err(err),
        }
    }

    /// As [`CasRuntime::assert_can_call`] for a method reference.
    ///
    /// A core library method is late-bound against `receiver` by name and signature. A loaded
    /// override is judged by the policy, the core implementation itself is admitted.
    ///
    /// # Errors
    /// As [`CasRuntime::assert_can_call`].
    pub fn assert_can_call_ref(&self, caller: ModuleId, receiver: Option<TypeHandle>, method: &MethodRef) -> Result<()> {
        match self.domain.resolve_method(method) {
            Ok(id) => self.assert_can_call(caller, receiver, id),
            Err(_) if is_core(method) => {
                let policy = self.policy(caller)?;
                let Some(receiver) = receiver else {
                    return Ok(());
                };
                match self.resolver.resolve_unloaded(receiver, method)? {
                    Some(target) => self.judge_call(caller, &policy, target),
                    None => Ok(()),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Fails unless `caller` may make a `constrained.` call of `method` on `constraint`.
    ///
    /// Value types dispatch statically to their own implementation, reference types through
    /// their runtime type; in both cases the constraining type stands in for the receiver.
    ///
    /// # Errors
    /// As [`CasRuntime::assert_can_call`].
    pub fn assert_can_call_constrained(
        &self,
        caller: ModuleId,
        constraint: Option<TypeHandle>,
        method: MemberId,
    ) -> Result<()> {
        self.assert_can_call(caller, constraint, method)
    }

    /// Rejects a dynamic route to a shimmed method, reporting it to the handler first
    ///
    /// # Errors
    /// Always returns [`Error::ShimInvocationDenied`].
    pub fn deny_shim_invocation(&self, caller: ModuleId, method: &MethodRef) -> Result<()> {
        let denial = Error::ShimInvocationDenied {
            caller: self.module_name(caller),
            member: method.to_string(),
        };
        log::warn!("{}", denial);
        // the handler observes the denial but cannot lift it
        let _ = self.handler.on_violation(denial.clone());
        Err(denial)
    }

    /// Fails unless `caller` may invoke `method` reflectively.
    ///
    /// Shimmed methods are never invocable this way, everything else is judged as a call.
    ///
    /// # Errors
    /// Returns [`Error::ShimInvocationDenied`] for shimmed methods, otherwise as
    /// [`CasRuntime::assert_can_call`].
    pub fn assert_can_invoke(&self, caller: ModuleId, receiver: Option<TypeHandle>, method: MemberId) -> Result<()> {
        let method_ref = self.domain.method_ref(method)?;
        if self.shims.contains(&method_ref) {
            return self.deny_shim_invocation(caller, &method_ref);
        }
        self.assert_can_call(caller, receiver, method)
    }

    fn can_access_field(&self, caller: ModuleId, field: MemberId, access: MemberAccess) -> Result<bool> {
        if !field.is_field() {
            return Err(Error::InvalidMember(field));
        }
        let policy = self.policy(caller)?;
        Ok(self.same_context(caller, field.module)? || policy.can_access_field(field, access))
    }

    fn judge_call(&self, caller: ModuleId, policy: &CasPolicy, target: MemberId) -> Result<()> {
        if self.same_context(caller, target.module)? || policy.can_access(target) {
            return Ok(());
        }
        self.violation(caller, target)
    }

    fn policy(&self, caller: ModuleId) -> Result<Arc<CasPolicy>> {
        self.policies
            .get(caller)
            .ok_or_else(|| Error::NoPolicy(self.module_name(caller)))
    }

    fn same_context(&self, caller: ModuleId, target: ModuleId) -> Result<bool> {
        if caller == target {
            return Ok(true);
        }
        if !self.config.trust_load_context {
            return Ok(false);
        }
        Ok(self.domain.context_of(caller)? == self.domain.context_of(target)?)
    }

    fn is_virtual(&self, method: MemberId) -> Result<bool> {
        let module = self.domain.module(method.module)?;
        let (_, def) = module.method(method).ok_or(Error::InvalidMember(method))?;
        Ok(def.flags.is_virtual() && !def.is_static())
    }

    fn violation(&self, caller: ModuleId, member: MemberId) -> Result<()> {
        let (member, declaring_type) = self.domain.describe(member)?;
        let violation = Error::PolicyViolation {
            caller: self.module_name(caller),
            member,
            declaring_type,
        };
        log::warn!("{}", violation);
        self.handler.on_violation(violation)
    }

    fn module_name(&self, id: ModuleId) -> String {
        self.domain
            .module(id)
            .map_or_else(|_| id.to_string(), |module| module.name().to_string())
    }

    fn caller_id(&self, caller: &str) -> Result<ModuleId> {
        self.domain
            .module_by_name(caller)
            .map(|module| module.id)
            .ok_or_else(|| Error::NoPolicy(caller.to_string()))
    }
}

fn is_core(method: &MethodRef) -> bool {
    method.scope() == Some(CORE_LIBRARY)
}

impl SiteDecision for CasRuntime {
    fn is_always_allowed(&self, caller: &str, site: &AccessSite) -> Result<bool> {
        let caller = self.caller_id(caller)?;
        match site {
            AccessSite::Field { field, kind } => {
                let field = self.domain.resolve_field(field)?;
                match kind {
                    GuardKind::Read => self.can_read_field(caller, field),
                    GuardKind::Write => self.can_write_field(caller, field),
                    GuardKind::ReadWrite | GuardKind::Call => {
                        Ok(self.can_read_field(caller, field)? && self.can_write_field(caller, field)?)
                    }
                }
            }
            AccessSite::Call { method }
            | AccessSite::VirtualCall { method, .. }
            | AccessSite::StaticDelegate { method }
            | AccessSite::VirtualDelegate { method } => {
                if self.shims.contains(method) {
                    return Ok(false);
                }
                Ok(!site.is_virtual() && self.can_call_always_ref(caller, method)?)
            }
        }
    }

    fn assert_allowed(&self, caller: &str, site: &AccessSite, receiver: Option<TypeHandle>) -> Result<()> {
        let caller = self.caller_id(caller)?;
        match site {
            AccessSite::Field { field, kind } => {
                let field = self.domain.resolve_field(field)?;
                if matches!(kind, GuardKind::Read | GuardKind::ReadWrite) {
                    self.assert_can_read_field(caller, field)?;
                }
                if matches!(kind, GuardKind::Write | GuardKind::ReadWrite) {
                    self.assert_can_write_field(caller, field)?;
                }
                Ok(())
            }
            AccessSite::VirtualCall {
                method,
                constrained: Some(constraint),
            } => {
                if self.shims.contains(method) {
                    return self.deny_shim_invocation(caller, method);
                }
                let constraint = self.domain.resolve_type(constraint).ok();
                self.assert_can_call_ref(caller, constraint, method)
            }
            AccessSite::Call { method }
            | AccessSite::VirtualCall { method, .. }
            | AccessSite::StaticDelegate { method }
            | AccessSite::VirtualDelegate { method } => {
                if self.shims.contains(method) {
                    return self.deny_shim_invocation(caller, method);
                }
                let receiver = if site.is_virtual() { receiver } else { None };
                self.assert_can_call_ref(caller, receiver, method)
            }
        }
    }
}
