//! Replacement table for dangerous library entry points.
//!
//! Calls to a shimmed method are redirected unconditionally to a policy-aware replacement in the
//! runtime scope. Lookup goes through [`SignatureHash`], so a reference that reaches the library
//! through a facade module still matches.

use std::collections::HashMap;

use crate::{
    instrument::references::shims_type,
    metadata::{
        identity::SignatureHash,
        members::{MethodRef, MethodSig},
        typesig::{TypeRef, TypeSig},
    },
};

/// Map from shimmed method to replacement.
#[derive(Clone, Debug, Default)]
pub struct ShimTable {
    shims: HashMap<SignatureHash, MethodRef>,
}

impl ShimTable {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with the built-in replacements for reflection, activation, delegate
    /// binding, array initialization, expression compilation and direct file access
    #[must_use]
    pub fn with_default_shims() -> Self {
        let mut table = ShimTable::new();

        let system_type = core_type("System", "Type");
        let method_info = core_type("System.Reflection", "MethodInfo");
        let field_info = core_type("System.Reflection", "FieldInfo");
        let method_base = core_type("System.Reflection", "MethodBase");
        let constructor_info = core_type("System.Reflection", "ConstructorInfo");
        let delegate = core_type("System", "Delegate");
        let activator = core_type("System", "Activator");
        let object_array = TypeSig::Object.array();

        for params in [
            vec![system_type.clone(), TypeSig::Object, TypeSig::String],
            vec![system_type.clone(), system_type.clone(), TypeSig::String],
            vec![system_type.clone(), method_info.clone()],
            vec![system_type.clone(), TypeSig::Object, method_info.clone()],
        ] {
            table.redirect(&MethodRef::new(
                delegate.clone(),
                "CreateDelegate",
                MethodSig::new_static(delegate.clone(), params),
            ));
        }

        table.redirect(&MethodRef::new(
            activator.clone(),
            "CreateInstance",
            MethodSig::new_static(TypeSig::Object, vec![system_type.clone()]),
        ));
        table.redirect(&MethodRef::new(
            activator.clone(),
            "CreateInstance",
            MethodSig::new_static(TypeSig::Object, vec![system_type.clone(), object_array.clone()]),
        ));
        table.redirect(&MethodRef::new(
            activator,
            "CreateInstance",
            MethodSig::new_static(TypeSig::MVar(0), vec![]).with_generic_arity(1),
        ));

        table.redirect(&MethodRef::new(
            core_type("System.Runtime.CompilerServices", "RuntimeHelpers"),
            "InitializeArray",
            MethodSig::new_static(
                TypeSig::Void,
                vec![core_type("System", "Array"), core_type("System", "RuntimeFieldHandle")],
            ),
        ));

        table.redirect(&MethodRef::new(
            field_info.clone(),
            "GetValue",
            MethodSig::new_instance(TypeSig::Object, vec![TypeSig::Object]),
        ));
        table.redirect(&MethodRef::new(
            field_info,
            "SetValue",
            MethodSig::new_instance(TypeSig::Void, vec![TypeSig::Object, TypeSig::Object]),
        ));
        table.redirect(&MethodRef::new(
            method_base,
            "Invoke",
            MethodSig::new_instance(TypeSig::Object, vec![TypeSig::Object, object_array.clone()]),
        ));
        table.redirect(&MethodRef::new(
            constructor_info,
            "Invoke",
            MethodSig::new_instance(TypeSig::Object, vec![object_array]),
        ));
        table.redirect(&MethodRef::new(
            method_info,
            "CreateDelegate",
            MethodSig::new_instance(delegate, vec![system_type]),
        ));

        table.redirect(&MethodRef::new(
            TypeSig::GenericInst(
                TypeRef::core("System.Linq.Expressions", "Expression`1"),
                vec![TypeSig::Var(0)],
            ),
            "Compile",
            MethodSig::new_instance(TypeSig::Var(0), vec![]),
        ));
        table.redirect(&MethodRef::new(
            core_type("System.Linq.Expressions", "LambdaExpression"),
            "Compile",
            MethodSig::new_instance(core_type("System", "Delegate"), vec![]),
        ));

        let file = core_type("System.IO", "File");
        for (name, ret, params) in [
            ("ReadAllText", TypeSig::String, vec![TypeSig::String]),
            ("ReadAllBytes", TypeSig::U1.array(), vec![TypeSig::String]),
            ("WriteAllText", TypeSig::Void, vec![TypeSig::String, TypeSig::String]),
            ("WriteAllBytes", TypeSig::Void, vec![TypeSig::String, TypeSig::U1.array()]),
            ("Delete", TypeSig::Void, vec![TypeSig::String]),
        ] {
            table.redirect(&MethodRef::new(file.clone(), name, MethodSig::new_static(ret, params)));
        }

        table
    }

    /// Registers a replacement for `original`
    pub fn insert(&mut self, original: &MethodRef, replacement: MethodRef) {
        self.shims
            .insert(SignatureHash::of_method_ref(&original.definition()), replacement);
    }

    /// Registers `original` with a replacement of the same name in the runtime shim type.
    ///
    /// Instance methods become static replacements taking the original receiver first.
    pub fn redirect(&mut self, original: &MethodRef) {
        let mut params = Vec::with_capacity(original.sig.params.len() + 1);
        if original.sig.has_this {
            params.push(original.declaring_type.clone());
        }
        params.extend(original.sig.params.iter().cloned());

        let replacement = MethodRef::new(
            shims_type(),
            original.name.clone(),
            MethodSig::new_static(original.sig.return_type.clone(), params)
                .with_generic_arity(original.sig.generic_arity),
        );
        self.insert(original, replacement);
    }

    /// Finds the replacement for a call target.
    ///
    /// The method instantiation of the call site is carried over to the replacement.
    #[must_use]
    pub fn replacement(&self, target: &MethodRef) -> Option<MethodRef> {
        let replacement = self
            .shims
            .get(&SignatureHash::of_method_ref(&target.definition()))?;
        Some(replacement.clone().instantiate(target.generic_args.clone()))
    }

    /// Returns true if `target` is shimmed
    #[must_use]
    pub fn contains(&self, target: &MethodRef) -> bool {
        self.shims
            .contains_key(&SignatureHash::of_method_ref(&target.definition()))
    }

    /// Number of shimmed methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.shims.len()
    }

    /// Returns true if nothing is shimmed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shims.is_empty()
    }
}

fn core_type(namespace: &str, name: &str) -> TypeSig {
    TypeSig::of(TypeRef::core(namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::references::RUNTIME_SCOPE;

    #[test]
    fn test_default_shims_match_facade_references() {
        let table = ShimTable::with_default_shims();
        assert!(!table.is_empty());

        let through_facade = MethodRef::new(
            TypeSig::of(TypeRef::new("System.IO.FileSystem", "System.IO", "File")),
            "ReadAllText",
            MethodSig::new_static(TypeSig::String, vec![TypeSig::String]),
        );
        let replacement = table.replacement(&through_facade).unwrap();
        assert_eq!(replacement.scope(), Some(RUNTIME_SCOPE));
        assert_eq!(replacement.name, "ReadAllText");
    }

    #[test]
    fn test_generic_instantiation_is_carried_over() {
        let table = ShimTable::with_default_shims();
        let create = MethodRef::new(
            core_type("System", "Activator"),
            "CreateInstance",
            MethodSig::new_static(TypeSig::MVar(0), vec![]).with_generic_arity(1),
        )
        .instantiate(vec![TypeSig::String]);

        let replacement = table.replacement(&create).unwrap();
        assert_eq!(replacement.generic_args, vec![TypeSig::String]);
        assert_eq!(replacement.sig.generic_arity, 1);
    }

    #[test]
    fn test_instance_methods_take_receiver_first() {
        let table = ShimTable::with_default_shims();
        let get_value = MethodRef::new(
            core_type("System.Reflection", "FieldInfo"),
            "GetValue",
            MethodSig::new_instance(TypeSig::Object, vec![TypeSig::Object]),
        );
        let replacement = table.replacement(&get_value).unwrap();
        assert!(!replacement.sig.has_this);
        assert_eq!(replacement.sig.params.len(), 2);
    }

    #[test]
    fn test_unrelated_method_is_not_shimmed() {
        let table = ShimTable::with_default_shims();
        let exists = MethodRef::new(
            core_type("System.IO", "File"),
            "Exists",
            MethodSig::new_static(TypeSig::Boolean, vec![TypeSig::String]),
        );
        assert!(!table.contains(&exists));
    }
}
