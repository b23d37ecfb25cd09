//! References to the runtime guard surface that instrumented code calls.
//!
//! Instrumented modules never reference the sandbox by anything but these structural references.
//! All of them live in [`RUNTIME_SCOPE`], which the patcher treats as trusted so its own checks
//! are never guarded, and which the host binds to [`crate::runtime::CasRuntime`].

use crate::metadata::{
    members::{MethodRef, MethodSig},
    typesig::{TypeRef, TypeSig},
};

/// Scope of the runtime guard surface and the shim implementations
pub const RUNTIME_SCOPE: &str = "Cas.Runtime";

/// Namespace of the runtime types
pub const RUNTIME_NAMESPACE: &str = "Cas";

/// Type that declares the guard entry points
pub const RUNTIME_TYPE: &str = "CasRuntime";

/// Type that declares the shim replacements
pub const SHIMS_TYPE: &str = "MethodShims";

/// Method references used by inserted code.
#[derive(Clone, Debug)]
pub struct RuntimeReferences {
    /// `bool CanReadField(RuntimeFieldHandle, RuntimeTypeHandle)`
    pub can_read_field: MethodRef,
    /// `bool CanWriteField(RuntimeFieldHandle, RuntimeTypeHandle)`
    pub can_write_field: MethodRef,
    /// `bool CanCallAlways(RuntimeMethodHandle, RuntimeTypeHandle)`
    pub can_call_always: MethodRef,
    /// `void AssertCanReadField(RuntimeFieldHandle, RuntimeTypeHandle)`
    pub assert_can_read_field: MethodRef,
    /// `void AssertCanWriteField(RuntimeFieldHandle, RuntimeTypeHandle)`
    pub assert_can_write_field: MethodRef,
    /// `void AssertCanCall(object, RuntimeMethodHandle, RuntimeTypeHandle)`
    pub assert_can_call: MethodRef,
    /// `void AssertCanCallConstrained<T>(ref T, RuntimeMethodHandle, RuntimeTypeHandle)`
    pub assert_can_call_constrained: MethodRef,
    /// `void DenyShimInvocation(RuntimeMethodHandle, RuntimeTypeHandle)`
    pub deny_shim_invocation: MethodRef,
}

impl RuntimeReferences {
    /// Builds the reference set
    #[must_use]
    pub fn new() -> Self {
        let field_handle = handle_type("RuntimeFieldHandle");
        let method_handle = handle_type("RuntimeMethodHandle");
        let type_handle = handle_type("RuntimeTypeHandle");

        let check = |name: &str, handle: &TypeSig| {
            runtime_method(
                name,
                MethodSig::new_static(TypeSig::Boolean, vec![handle.clone(), type_handle.clone()]),
            )
        };
        let assert = |name: &str, handle: &TypeSig| {
            runtime_method(
                name,
                MethodSig::new_static(TypeSig::Void, vec![handle.clone(), type_handle.clone()]),
            )
        };

        RuntimeReferences {
            can_read_field: check("CanReadField", &field_handle),
            can_write_field: check("CanWriteField", &field_handle),
            can_call_always: check("CanCallAlways", &method_handle),
            assert_can_read_field: assert("AssertCanReadField", &field_handle),
            assert_can_write_field: assert("AssertCanWriteField", &field_handle),
            assert_can_call: runtime_method(
                "AssertCanCall",
                MethodSig::new_static(
                    TypeSig::Void,
                    vec![TypeSig::Object, method_handle.clone(), type_handle.clone()],
                ),
            ),
            assert_can_call_constrained: runtime_method(
                "AssertCanCallConstrained",
                MethodSig::new_static(
                    TypeSig::Void,
                    vec![TypeSig::MVar(0).by_ref(), method_handle.clone(), type_handle.clone()],
                )
                .with_generic_arity(1),
            ),
            deny_shim_invocation: assert("DenyShimInvocation", &method_handle),
        }
    }

    /// The constrained assertion instantiated for a constraining type
    #[must_use]
    pub fn assert_can_call_constrained_for(&self, constraint: TypeSig) -> MethodRef {
        self.assert_can_call_constrained.clone().instantiate(vec![constraint])
    }
}

impl Default for RuntimeReferences {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to the runtime type declaring the guard surface
#[must_use]
pub fn runtime_type() -> TypeSig {
    TypeSig::of(TypeRef::new(RUNTIME_SCOPE, RUNTIME_NAMESPACE, RUNTIME_TYPE))
}

/// Reference to the type declaring the shim replacements
#[must_use]
pub fn shims_type() -> TypeSig {
    TypeSig::of(TypeRef::new(RUNTIME_SCOPE, RUNTIME_NAMESPACE, SHIMS_TYPE))
}

fn runtime_method(name: &str, sig: MethodSig) -> MethodRef {
    MethodRef::new(runtime_type(), name, sig)
}

fn handle_type(name: &str) -> TypeSig {
    TypeSig::of(TypeRef::core("System", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_live_in_runtime_scope() {
        let references = RuntimeReferences::new();
        for method in [
            &references.can_read_field,
            &references.can_call_always,
            &references.assert_can_call,
            &references.deny_shim_invocation,
        ] {
            assert_eq!(method.scope(), Some(RUNTIME_SCOPE));
        }
        assert_eq!(references.assert_can_call.sig.params.len(), 3);
    }

    #[test]
    fn test_constrained_instantiation() {
        let references = RuntimeReferences::new();
        let constrained = references.assert_can_call_constrained_for(TypeSig::I4);
        assert_eq!(constrained.generic_args, vec![TypeSig::I4]);
        assert_eq!(constrained.sig.generic_arity, 1);
    }
}
