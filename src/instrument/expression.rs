//! Guarding of expression trees compiled at run time.
//!
//! Sandboxed code can build an expression tree and compile it into a delegate, which would
//! produce code the bytecode patcher never sees. The compile entry points are shimmed, and the
//! shim runs the tree through [`GuardExpressionVisitor`] first: every node that reaches a member
//! of another module is classified as an [`AccessSite`], exactly like an instruction, and wrapped
//! in [`Expr::Guarded`] unless the runtime says it is always allowed. Evaluating a guarded node
//! calls [`Expr::check`], which performs the same assertion as the inserted bytecode.
//!
//! # Key Components
//!
//! - [`Expr`] - Expression node
//! - [`SiteDecision`] - Decision surface shared with the bytecode guards
//! - [`GuardExpressionVisitor`] - Tree rewriter

use crate::{
    instrument::site::{AccessSite, GuardKind},
    metadata::{
        identity::TypeHandle,
        members::{FieldRef, MethodRef},
        typesig::TypeSig,
    },
    Result,
};

/// Operators of unary and binary nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Equal,
    NotEqual,
    Negate,
    Not,
    Convert,
}

/// A node of an expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Literal in display form
    Constant {
        /// Literal type
        value_type: TypeSig,
        /// Literal text
        value: String,
    },
    /// Lambda parameter
    Parameter {
        /// Parameter name
        name: String,
        /// Parameter type
        param_type: TypeSig,
    },
    /// Field load, `target` is `None` for static fields
    Field {
        /// Instance expression
        target: Option<Box<Expr>>,
        /// Loaded field
        field: FieldRef,
    },
    /// Store to a field node
    Assign {
        /// Field being written
        target: Box<Expr>,
        /// Stored value
        value: Box<Expr>,
    },
    /// Method call, `receiver` is `None` for static methods
    Call {
        /// Instance expression
        receiver: Option<Box<Expr>>,
        /// Called method
        method: MethodRef,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Object construction
    New {
        /// Constructor, `None` for default value-type construction
        constructor: Option<MethodRef>,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Unary operator, optionally implemented by a user-defined method
    Unary {
        /// Operator
        op: Operator,
        /// Operand
        operand: Box<Expr>,
        /// Operator method
        method: Option<MethodRef>,
    },
    /// Binary operator, optionally implemented by a user-defined method
    Binary {
        /// Operator
        op: Operator,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
        /// Operator method
        method: Option<MethodRef>,
    },
    /// Indexer access or array element access when `indexer` is `None`
    Index {
        /// Indexed object
        target: Box<Expr>,
        /// Indexer getter
        indexer: Option<MethodRef>,
        /// Index arguments
        args: Vec<Expr>,
    },
    /// Collection initializer: construction followed by one add call per element
    ListInit {
        /// Construction of the collection
        new: Box<Expr>,
        /// Element add method
        add_method: MethodRef,
        /// Argument lists of each add call
        elements: Vec<Vec<Expr>>,
    },
    /// Late-bound operation
    Dynamic {
        /// Binder description
        binder: String,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Lambda
    Lambda {
        /// Parameters
        params: Vec<Expr>,
        /// Body
        body: Box<Expr>,
    },
    /// Sequence of expressions, the value of the last one is the result
    Block(Vec<Expr>),
    /// A node that must pass the full runtime assertion before it is evaluated
    Guarded {
        /// Guarded access
        site: AccessSite,
        /// Original node with guarded children
        inner: Box<Expr>,
    },
}

impl Expr {
    /// Performs the runtime assertion of a guarded node.
    ///
    /// Unguarded nodes always pass. `receiver` is the runtime type of the instance for virtual
    /// sites.
    ///
    /// # Errors
    /// Returns [`crate::Error::PolicyViolation`] if `caller` may not perform the access.
    pub fn check(&self, caller: &str, decision: &dyn SiteDecision, receiver: Option<TypeHandle>) -> Result<()> {
        match self {
            Expr::Guarded { site, .. } => decision.assert_allowed(caller, site, receiver),
            _ => Ok(()),
        }
    }

    /// Collects the sites of all guarded nodes, outermost first
    #[must_use]
    pub fn guarded_sites(&self) -> Vec<&AccessSite> {
        let mut sites = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Guarded { site, .. } = expr {
                sites.push(site);
            }
        });
        sites
    }

    fn walk<'e>(&'e self, visit: &mut impl FnMut(&'e Expr)) {
        visit(self);
        match self {
            Expr::Constant { .. } | Expr::Parameter { .. } => {}
            Expr::Field { target, .. } => {
                if let Some(target) = target {
                    target.walk(visit);
                }
            }
            Expr::Assign { target, value } => {
                target.walk(visit);
                value.walk(visit);
            }
            Expr::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    receiver.walk(visit);
                }
                args.iter().for_each(|arg| arg.walk(visit));
            }
            Expr::New { args, .. } | Expr::Dynamic { args, .. } | Expr::Block(args) => {
                args.iter().for_each(|arg| arg.walk(visit));
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Index { target, args, .. } => {
                target.walk(visit);
                args.iter().for_each(|arg| arg.walk(visit));
            }
            Expr::ListInit { new, elements, .. } => {
                new.walk(visit);
                elements.iter().flatten().for_each(|arg| arg.walk(visit));
            }
            Expr::Lambda { params, body } => {
                params.iter().for_each(|param| param.walk(visit));
                body.walk(visit);
            }
            Expr::Guarded { inner, .. } => inner.walk(visit),
        }
    }
}

/// The runtime decision surface, as seen by guards that are not bytecode.
pub trait SiteDecision {
    /// Returns true if `caller` may always perform `site`, so no check is needed
    ///
    /// # Errors
    /// Returns an error if the target cannot be resolved or `caller` has no policy.
    fn is_always_allowed(&self, caller: &str, site: &AccessSite) -> Result<bool>;

    /// Performs the full assertion for `site`, with late binding against `receiver`
    ///
    /// # Errors
    /// Returns [`crate::Error::PolicyViolation`] if the access is denied.
    fn assert_allowed(&self, caller: &str, site: &AccessSite, receiver: Option<TypeHandle>) -> Result<()>;
}

/// Rewrites an expression tree so that every cross-module access is checked.
pub struct GuardExpressionVisitor<'d> {
    caller: String,
    decision: &'d dyn SiteDecision,
}

impl<'d> GuardExpressionVisitor<'d> {
    /// Creates a visitor for trees compiled by module `caller`
    pub fn new(caller: impl Into<String>, decision: &'d dyn SiteDecision) -> Self {
        GuardExpressionVisitor {
            caller: caller.into(),
            decision,
        }
    }

    /// Rewrites `expr`
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] for late-bound nodes and constructor-less `new`
    /// nodes, which cannot be checked.
    pub fn visit(&self, expr: Expr) -> Result<Expr> {
        match expr {
            Expr::Constant { .. } | Expr::Parameter { .. } => Ok(expr),
            Expr::Field { target, field } => {
                let site = AccessSite::Field {
                    field: field.clone(),
                    kind: GuardKind::Read,
                };
                let target = self.visit_opt(target)?;
                self.guard(site, Expr::Field { target, field })
            }
            Expr::Assign { target, value } => {
                let value = Box::new(self.visit(*value)?);
                match *target {
                    Expr::Field { target: instance, field } => {
                        let site = AccessSite::Field {
                            field: field.clone(),
                            kind: GuardKind::Write,
                        };
                        let instance = self.visit_opt(instance)?;
                        let target = Box::new(Expr::Field { target: instance, field });
                        self.guard(site, Expr::Assign { target, value })
                    }
                    other => Ok(Expr::Assign {
                        target: Box::new(self.visit(other)?),
                        value,
                    }),
                }
            }
            Expr::Call { receiver, method, args } => {
                let site = call_site(&method, receiver.is_some());
                let receiver = self.visit_opt(receiver)?;
                let args = self.visit_all(args)?;
                self.guard(site, Expr::Call { receiver, method, args })
            }
            Expr::New { constructor, args } => {
                let Some(constructor) = constructor else {
                    return Err(rewrite_error!(
                        "{}: constructing an expression without a constructor cannot be guarded",
                        self.caller
                    ));
                };
                let site = AccessSite::Call {
                    method: constructor.clone(),
                };
                let args = self.visit_all(args)?;
                self.guard(
                    site,
                    Expr::New {
                        constructor: Some(constructor),
                        args,
                    },
                )
            }
            Expr::Unary { op, operand, method } => {
                let operand = Box::new(self.visit(*operand)?);
                let node = Expr::Unary {
                    op,
                    operand,
                    method: method.clone(),
                };
                match method {
                    Some(method) => self.guard(AccessSite::Call { method }, node),
                    None => Ok(node),
                }
            }
            Expr::Binary { op, left, right, method } => {
                let left = Box::new(self.visit(*left)?);
                let right = Box::new(self.visit(*right)?);
                let node = Expr::Binary {
                    op,
                    left,
                    right,
                    method: method.clone(),
                };
                match method {
                    Some(method) => self.guard(AccessSite::Call { method }, node),
                    None => Ok(node),
                }
            }
            Expr::Index { target, indexer, args } => {
                let target = Box::new(self.visit(*target)?);
                let args = self.visit_all(args)?;
                let node = Expr::Index {
                    target,
                    indexer: indexer.clone(),
                    args,
                };
                match indexer {
                    Some(indexer) => self.guard(call_site(&indexer, true), node),
                    None => Ok(node),
                }
            }
            Expr::ListInit { new, add_method, elements } => {
                let new = Box::new(self.visit(*new)?);
                let elements = elements
                    .into_iter()
                    .map(|args| self.visit_all(args))
                    .collect::<Result<Vec<_>>>()?;
                self.guard(
                    call_site(&add_method, true),
                    Expr::ListInit {
                        new,
                        add_method,
                        elements,
                    },
                )
            }
            Expr::Dynamic { binder, .. } => Err(rewrite_error!(
                "{}: late-bound expression {} cannot be guarded",
                self.caller,
                binder
            )),
            Expr::Lambda { params, body } => Ok(Expr::Lambda {
                params,
                body: Box::new(self.visit(*body)?),
            }),
            Expr::Block(exprs) => Ok(Expr::Block(self.visit_all(exprs)?)),
            Expr::Guarded { site, inner } => Ok(Expr::Guarded {
                site,
                inner: Box::new(self.visit(*inner)?),
            }),
        }
    }

    fn visit_opt(&self, expr: Option<Box<Expr>>) -> Result<Option<Box<Expr>>> {
        expr.map(|expr| self.visit(*expr).map(Box::new)).transpose()
    }

    fn visit_all(&self, exprs: Vec<Expr>) -> Result<Vec<Expr>> {
        exprs.into_iter().map(|expr| self.visit(expr)).collect()
    }

    fn guard(&self, site: AccessSite, node: Expr) -> Result<Expr> {
        if site.is_exempt(&self.caller) || self.decision.is_always_allowed(&self.caller, &site)? {
            return Ok(node);
        }
        Ok(Expr::Guarded {
            site,
            inner: Box::new(node),
        })
    }
}

fn call_site(method: &MethodRef, has_receiver: bool) -> AccessSite {
    if has_receiver && method.sig.has_this {
        AccessSite::VirtualCall {
            method: method.clone(),
            constrained: None,
        }
    } else {
        AccessSite::Call {
            method: method.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{members::MethodSig, typesig::TypeRef},
        Error,
    };

    /// Allows every member whose name starts with "Allowed"
    struct NamePrefixDecision;

    fn member_name(site: &AccessSite) -> &str {
        match site {
            AccessSite::Field { field, .. } => &field.name,
            _ => site.method().map_or("", |m| m.name.as_str()),
        }
    }

    impl SiteDecision for NamePrefixDecision {
        fn is_always_allowed(&self, _caller: &str, site: &AccessSite) -> Result<bool> {
            Ok(!site.is_virtual() && member_name(site).starts_with("Allowed"))
        }

        fn assert_allowed(&self, caller: &str, site: &AccessSite, _receiver: Option<TypeHandle>) -> Result<()> {
            if member_name(site).starts_with("Allowed") {
                Ok(())
            } else {
                Err(Error::PolicyViolation {
                    caller: caller.to_string(),
                    member: member_name(site).to_string(),
                    declaring_type: String::new(),
                })
            }
        }
    }

    fn shared() -> TypeSig {
        TypeSig::of(TypeRef::new("Shared", "Shared", "SharedClass"))
    }

    fn static_field(name: &str) -> Expr {
        Expr::Field {
            target: None,
            field: FieldRef::new(shared(), name, TypeSig::I4),
        }
    }

    #[test]
    fn test_denied_field_is_wrapped() {
        let visitor = GuardExpressionVisitor::new("Sandboxed", &NamePrefixDecision);
        let tree = Expr::Binary {
            op: Operator::Add,
            left: Box::new(static_field("AllowedStaticField")),
            right: Box::new(static_field("DeniedStaticField")),
            method: None,
        };

        let guarded = visitor.visit(tree).unwrap();
        let sites = guarded.guarded_sites();
        assert_eq!(sites.len(), 1);
        assert!(matches!(sites[0], AccessSite::Field { field, .. } if field.name == "DeniedStaticField"));

        let Expr::Binary { right, .. } = &guarded else {
            panic!("shape changed");
        };
        let err = right.check("Sandboxed", &NamePrefixDecision, None).unwrap_err();
        assert!(err.is_security_error());
    }

    #[test]
    fn test_assignment_is_a_write() {
        let visitor = GuardExpressionVisitor::new("Sandboxed", &NamePrefixDecision);
        let tree = Expr::Assign {
            target: Box::new(static_field("DeniedStaticField")),
            value: Box::new(Expr::Constant {
                value_type: TypeSig::I4,
                value: "7".into(),
            }),
        };
        match visitor.visit(tree).unwrap() {
            Expr::Guarded {
                site: AccessSite::Field { kind, .. },
                inner,
            } => {
                assert_eq!(kind, GuardKind::Write);
                assert!(matches!(*inner, Expr::Assign { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_instance_call_is_virtual() {
        let visitor = GuardExpressionVisitor::new("Sandboxed", &NamePrefixDecision);
        let speak = MethodRef::new(shared(), "AllowedSpeak", MethodSig::new_instance(TypeSig::String, vec![]));
        let tree = Expr::Call {
            receiver: Some(Box::new(Expr::Parameter {
                name: "x".into(),
                param_type: shared(),
            })),
            method: speak,
            args: vec![],
        };
        // virtual sites are never always-allowed, the receiver decides
        let guarded = visitor.visit(tree).unwrap();
        assert!(matches!(guarded, Expr::Guarded { site: AccessSite::VirtualCall { .. }, .. }));
        assert!(guarded.check("Sandboxed", &NamePrefixDecision, None).is_ok());
    }

    #[test]
    fn test_own_members_are_not_wrapped() {
        let visitor = GuardExpressionVisitor::new("Shared", &NamePrefixDecision);
        let tree = static_field("DeniedStaticField");
        assert_eq!(visitor.visit(tree.clone()).unwrap(), tree);
    }

    #[test]
    fn test_unguardable_nodes_fail() {
        let visitor = GuardExpressionVisitor::new("Sandboxed", &NamePrefixDecision);
        let dynamic = Expr::Dynamic {
            binder: "InvokeMember".into(),
            args: vec![],
        };
        assert!(matches!(visitor.visit(dynamic), Err(Error::RewriteFailure { .. })));

        let lambda = Expr::Lambda {
            params: vec![],
            body: Box::new(Expr::New {
                constructor: None,
                args: vec![],
            }),
        };
        assert!(matches!(visitor.visit(lambda), Err(Error::RewriteFailure { .. })));
    }
}
