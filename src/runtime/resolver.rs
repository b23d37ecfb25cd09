//! Late binding of virtual calls.
//!
//! A guard on a virtual call knows the statically declared target, but the policy must judge the
//! method that will actually run. [`LateBindingResolver`] maps the declared method and the runtime
//! type of the receiver to that method, the same way dispatch does: interface methods through
//! explicit and then implicit implementations along the receiver's type chain, class methods
//! through the most-derived override that still shares the declared slot.

use std::sync::Arc;

use crate::{
    metadata::{
        identity::{MemberId, TypeHandle},
        members::{MemberVisibility, MethodAttributes, MethodRef},
        module::MethodDef,
    },
    runtime::domain::{signature_matches, Domain, LoadedModule},
    Error, Result,
};

/// Resolves declared virtual targets to the method dispatch selects.
pub struct LateBindingResolver {
    domain: Arc<Domain>,
}

impl LateBindingResolver {
    /// Creates a resolver over the modules of `domain`
    #[must_use]
    pub fn new(domain: Arc<Domain>) -> Self {
        LateBindingResolver { domain }
    }

    /// Returns the method a call to `declared` on `receiver` dispatches to.
    ///
    /// Non-virtual methods, calls without a receiver and receivers without a loaded type
    /// definition (arrays) resolve to `declared` itself.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] if the receiver does not implement the declared
    /// method or only an abstract declaration is found. This indicates an inconsistent program.
    pub fn resolve(&self, receiver: Option<TypeHandle>, declared: MemberId) -> Result<MemberId> {
        let module = self.domain.module(declared.module)?;
        let (owner, method) = module.method(declared).ok_or(Error::InvalidMember(declared))?;
        let Some(receiver) = receiver else {
            return Ok(declared);
        };
        if !method.flags.is_virtual() || method.is_static() {
            return Ok(declared);
        }

        let declaring = module.type_handle(owner);
        let is_interface = module.type_def(owner).is_some_and(|t| t.is_interface());
        let chain = self.type_chain(receiver)?;

        let resolved = if is_interface {
            self.resolve_interface(&chain, declaring, declared, method)?
        } else {
            self.resolve_override(&chain, declaring, declared, method)?
        };

        let resolved_module = self.domain.module(resolved.module)?;
        let is_abstract = resolved_module
            .method(resolved)
            .is_some_and(|(_, m)| m.flags.contains(MethodAttributes::ABSTRACT));
        if is_abstract {
            return Err(Error::ResolutionFailure(format!(
                "no implementation of {} for {}",
                self.describe(declared),
                self.domain.type_name(receiver)?
            )));
        }
        Ok(resolved)
    }

    /// Returns the loaded override that a call to `declared` on `receiver` dispatches to, for a
    /// declared method whose type is not loaded (the core library's `Object::ToString`, for
    /// example).
    ///
    /// Overrides are matched by name and signature from the base-most loaded type down to the
    /// receiver. `None` means no loaded type overrides the method and the declared
    /// implementation runs.
    ///
    /// # Errors
    /// Returns an error if the receiver is not loaded or its base chain is circular.
    pub fn resolve_unloaded(&self, receiver: TypeHandle, declared: &MethodRef) -> Result<Option<MemberId>> {
        if !declared.sig.has_this {
            return Ok(None);
        }
        let chain = self.type_chain(receiver)?;
        let mut current = None;
        for (module, index) in chain.iter().rev() {
            let explicit = module.type_def(*index).and_then(|type_def| {
                type_def
                    .method_impls
                    .iter()
                    .filter(|imp| {
                        imp.declaration.declaring_type == declared.declaring_type
                            && imp.declaration.name == declared.name
                            && signature_matches(&imp.declaration.sig, &declared.sig)
                    })
                    .find_map(|imp| module.method_at(*index, imp.method))
            });
            if explicit.is_some() {
                current = explicit;
                continue;
            }
            let candidate = module.method_ids(*index).find(|(_, candidate)| {
                candidate.flags.is_virtual()
                    && !candidate.is_static()
                    && candidate.name == declared.name
                    && signature_matches(&candidate.sig, &declared.sig)
            });
            if let Some((id, candidate)) = candidate {
                if candidate.flags.contains(MethodAttributes::NEW_SLOT) {
                    break;
                }
                current = Some(id);
            }
        }
        Ok(current)
    }

    /// The receiver type followed by its base types, stopping at the first base that is not loaded
    fn type_chain(&self, receiver: TypeHandle) -> Result<Vec<(Arc<LoadedModule>, usize)>> {
        let mut chain = vec![self.domain.type_entry(receiver)?];
        loop {
            let base = {
                let (module, index) = &chain[chain.len() - 1];
                module.type_def(*index).and_then(|t| t.base.clone())
            };
            let Some(base) = base else { break };
            let Ok(handle) = self.domain.resolve_type(&base) else { break };
            let entry = self.domain.type_entry(handle)?;
            if chain.iter().any(|(m, i)| m.id == entry.0.id && *i == entry.1) {
                return Err(Error::ResolutionFailure(format!(
                    "circular base type chain at {}",
                    self.domain.type_name(handle)?
                )));
            }
            chain.push(entry);
        }
        Ok(chain)
    }

    /// Walks the chain from the receiver upwards. A type that lists the interface fills the slot
    /// with the first matching public virtual at or above it, and overrides of that method below
    /// it then apply as for class methods.
    fn resolve_interface(
        &self,
        chain: &[(Arc<LoadedModule>, usize)],
        interface: TypeHandle,
        declared: MemberId,
        method: &MethodDef,
    ) -> Result<MemberId> {
        for (depth, (module, index)) in chain.iter().enumerate() {
            if let Some(explicit) = self.explicit_implementation(module, *index, declared) {
                return Ok(explicit);
            }
            if !self.lists_interface(module, *index, interface) {
                continue;
            }
            for (owner, owner_index) in &chain[depth..] {
                let implicit = owner.method_ids(*owner_index).find(|(_, candidate)| {
                    candidate.flags.is_virtual()
                        && !candidate.is_static()
                        && candidate.flags.visibility() == MemberVisibility::Public
                        && candidate.name == method.name
                        && signature_matches(&candidate.sig, &method.sig)
                });
                if let Some((id, slot)) = implicit {
                    return self.resolve_override(chain, owner.type_handle(*owner_index), id, slot);
                }
            }
        }
        Err(Error::ResolutionFailure(format!(
            "receiver does not implement {}",
            self.describe(declared)
        )))
    }

    /// Returns true if the type at `index` lists `interface`, directly or through an inherited
    /// interface
    fn lists_interface(&self, module: &LoadedModule, index: usize, interface: TypeHandle) -> bool {
        let mut pending: Vec<TypeHandle> = module
            .type_def(index)
            .map(|t| t.interfaces.iter().filter_map(|sig| self.domain.resolve_type(sig).ok()).collect())
            .unwrap_or_default();
        let mut seen = Vec::new();
        while let Some(handle) = pending.pop() {
            if handle == interface {
                return true;
            }
            if seen.contains(&handle) {
                continue;
            }
            seen.push(handle);
            if let Ok((owner, owner_index)) = self.domain.type_entry(handle) {
                if let Some(type_def) = owner.type_def(owner_index) {
                    pending.extend(type_def.interfaces.iter().filter_map(|sig| self.domain.resolve_type(sig).ok()));
                }
            }
        }
        false
    }

    fn resolve_override(
        &self,
        chain: &[(Arc<LoadedModule>, usize)],
        declaring: TypeHandle,
        declared: MemberId,
        method: &MethodDef,
    ) -> Result<MemberId> {
        let Some(depth) = chain
            .iter()
            .position(|(module, index)| module.type_handle(*index) == declaring)
        else {
            return Err(Error::ResolutionFailure(format!(
                "receiver is not derived from the declaring type of {}",
                self.describe(declared)
            )));
        };

        // walk from the declaring type down to the receiver
        let mut current = declared;
        for (module, index) in chain[..depth].iter().rev() {
            if let Some(explicit) = self.explicit_implementation(module, *index, current) {
                current = explicit;
                continue;
            }
            let candidate = module.method_ids(*index).find(|(_, candidate)| {
                candidate.flags.is_virtual()
                    && !candidate.is_static()
                    && candidate.name == method.name
                    && signature_matches(&candidate.sig, &method.sig)
            });
            if let Some((id, candidate)) = candidate {
                if candidate.flags.contains(MethodAttributes::NEW_SLOT) {
                    break;
                }
                current = id;
            }
        }
        Ok(current)
    }

    /// An explicit `MethodImpl` of the type at `index` whose declaration resolves to `target`
    fn explicit_implementation(&self, module: &LoadedModule, index: usize, target: MemberId) -> Option<MemberId> {
        let type_def = module.type_def(index)?;
        type_def
            .method_impls
            .iter()
            .filter(|imp| self.domain.resolve_method(&imp.declaration).ok() == Some(target))
            .find_map(|imp| module.method_at(index, imp.method))
    }

    fn describe(&self, id: MemberId) -> String {
        match self.domain.describe(id) {
            Ok((member, declaring_type)) => format!("{}::{}", declaring_type, member),
            Err(_) => format!("{:?}", id),
        }
    }
}
