//! Insertion of guards in front of cross-module operations.
//!
//! Every guarded site follows the same two-tier shape: load the module's cached guard flag,
//! skip the check if it is set, otherwise call the full runtime assertion with handles for the
//! member and its declaring type. The original instruction follows unchanged.
//!
//! ```text
//! ldsfld     bool Cas.Guard.<CasGuard>::.Member.N
//! brtrue     skip
//! [ldnull]                          // calls and function pointers: no receiver
//! ldtoken    member
//! ldtoken    declaring type
//! call       void Cas.CasRuntime::Assert...
//! skip: nop
//! <original instruction>
//! ```
//!
//! Virtual calls keep the receiver instead: arguments above it are spilled to temporaries, the
//! receiver is duplicated for the assertion, and the arguments are reloaded.

use crate::{
    assembly::{Instruction, OpCode, Operand},
    config::InstrumentConfig,
    instrument::{
        guard::{is_guard_field, GuardWriter},
        references::RuntimeReferences,
        rewriter::MethodBodyRewriter,
        shims::ShimTable,
        site::{AccessSite, GuardKind},
        InstrumentReport,
    },
    metadata::{
        members::{FieldRef, MethodRef, TokenRef},
        method::MethodBody,
        module::MethodDef,
        typesig::TypeSig,
    },
    Result,
};

/// Patches the methods of one consumer module.
pub struct Patcher<'a> {
    /// Name of the module being instrumented
    pub scope: &'a str,
    /// Rewrite settings
    pub config: &'a InstrumentConfig,
    /// Runtime guard surface
    pub references: &'a RuntimeReferences,
    /// Replacement table
    pub shims: &'a ShimTable,
}

impl Patcher<'_> {
    /// Instruments one method in place. Methods without a body are left alone.
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] if the body cannot be instrumented.
    pub fn patch_method(
        &self,
        method: &mut MethodDef,
        guards: &mut GuardWriter<'_>,
        report: &mut InstrumentReport,
    ) -> Result<()> {
        let Some(body) = method.body.as_mut() else {
            return Ok(());
        };

        let prologue = self.config.skip_verification_prologue && has_verification_prologue(body);
        let mut rewriter = MethodBodyRewriter::start(body);
        if prologue {
            rewriter.advance(true);
            rewriter.advance(true);
        }

        let guarded_before = report.guarded_sites + report.shimmed_calls + report.denied_pointer_loads;
        while let Some(instruction) = rewriter.instruction() {
            match AccessSite::classify(instruction, rewriter.prefixes()) {
                Some(site) => self.patch_site(&mut rewriter, guards, site, report)?,
                None => rewriter.advance(true),
            }
        }
        rewriter.finish(self.config.optimize_macros)?;

        report.methods_rewritten += 1;
        let guarded = report.guarded_sites + report.shimmed_calls + report.denied_pointer_loads - guarded_before;
        if guarded > 0 {
            log::trace!("{}: {} guarded site(s) in {}", self.scope, guarded, method.name);
        }
        Ok(())
    }

    fn patch_site(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        guards: &mut GuardWriter<'_>,
        site: AccessSite,
        report: &mut InstrumentReport,
    ) -> Result<()> {
        if let AccessSite::Field { field, kind } = &site {
            if *kind != GuardKind::Read && is_guard_field(field) {
                return Err(rewrite_error!("write to guard flag {} in {}", field, self.scope));
            }
        }

        if site.is_exempt(self.scope) {
            report.skipped_sites += 1;
            rewriter.advance(true);
            if matches!(site, AccessSite::StaticDelegate { .. } | AccessSite::VirtualDelegate { .. }) {
                self.pass_delegate_constructor(rewriter);
            }
            return Ok(());
        }

        match site {
            AccessSite::Field { field, kind } => {
                self.guard_field(rewriter, guards, &field, kind)?;
                rewriter.advance(true);
                report.guarded_sites += 1;
            }
            AccessSite::Call { method } => {
                if self.replace_with_shim(rewriter, &method, false)? {
                    report.shimmed_calls += 1;
                    return Ok(());
                }
                self.guard_static_call(rewriter, guards, &method)?;
                rewriter.advance(true);
                report.guarded_sites += 1;
            }
            AccessSite::VirtualCall { method, constrained } => {
                if self.replace_with_shim(rewriter, &method, constrained.is_some())? {
                    report.shimmed_calls += 1;
                    return Ok(());
                }
                self.guard_virtual_call(rewriter, guards, &method, constrained)?;
                rewriter.advance(true);
                report.guarded_sites += 1;
            }
            AccessSite::StaticDelegate { method } => {
                if self.shims.contains(&method) {
                    self.deny_shim_pointer(rewriter, &method)?;
                    report.denied_pointer_loads += 1;
                } else {
                    self.guard_static_call(rewriter, guards, &method)?;
                    report.guarded_sites += 1;
                }
                rewriter.advance(true);
                self.pass_delegate_constructor(rewriter);
            }
            AccessSite::VirtualDelegate { method } => {
                if self.shims.contains(&method) {
                    self.deny_shim_pointer(rewriter, &method)?;
                    report.denied_pointer_loads += 1;
                } else {
                    self.guard_virtual_pointer(rewriter, guards, &method)?;
                    report.guarded_sites += 1;
                }
                rewriter.advance(true);
                self.pass_delegate_constructor(rewriter);
            }
        }
        Ok(())
    }

    /// `ldsfld flag; brtrue skip` and the skip target to insert after the check
    fn begin_guard(&self, rewriter: &mut MethodBodyRewriter<'_>, flag: FieldRef) -> Result<Instruction> {
        rewriter.emit(OpCode::Ldsfld, Operand::Field(flag))?;
        let skip = rewriter.create(OpCode::Nop, Operand::None)?;
        rewriter.emit(OpCode::Brtrue, Operand::Target(skip.id))?;
        Ok(skip)
    }

    fn emit_handles(&self, rewriter: &mut MethodBodyRewriter<'_>, member: TokenRef, declaring_type: &TypeSig) -> Result<()> {
        rewriter.emit(OpCode::Ldtoken, Operand::Token(member))?;
        rewriter.emit(OpCode::Ldtoken, Operand::Token(TokenRef::Type(declaring_type.clone())))?;
        Ok(())
    }

    fn guard_field(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        guards: &mut GuardWriter<'_>,
        field: &FieldRef,
        kind: GuardKind,
    ) -> Result<()> {
        let flag = guards.field_flag(kind, field)?;
        let skip = self.begin_guard(rewriter, flag)?;

        let assertions: &[&MethodRef] = match kind {
            GuardKind::Read => &[&self.references.assert_can_read_field],
            GuardKind::Write => &[&self.references.assert_can_write_field],
            GuardKind::ReadWrite | GuardKind::Call => &[
                &self.references.assert_can_read_field,
                &self.references.assert_can_write_field,
            ],
        };
        for assertion in assertions {
            self.emit_handles(rewriter, TokenRef::Field(field.clone()), &field.declaring_type)?;
            rewriter.emit(OpCode::Call, Operand::Method((*assertion).clone()))?;
        }

        rewriter.insert(skip);
        rewriter.reserve_stack(2);
        Ok(())
    }

    fn guard_static_call(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        guards: &mut GuardWriter<'_>,
        method: &MethodRef,
    ) -> Result<()> {
        let flag = guards.call_flag(method)?;
        let skip = self.begin_guard(rewriter, flag)?;
        rewriter.emit(OpCode::Ldnull, Operand::None)?;
        self.emit_handles(rewriter, TokenRef::Method(method.clone()), &method.declaring_type)?;
        rewriter.emit(OpCode::Call, Operand::Method(self.references.assert_can_call.clone()))?;
        rewriter.insert(skip);
        rewriter.reserve_stack(3);
        Ok(())
    }

    fn guard_virtual_call(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        guards: &mut GuardWriter<'_>,
        method: &MethodRef,
        constrained: Option<TypeSig>,
    ) -> Result<()> {
        let context = method.generic_context();
        let local_types = method
            .sig
            .params
            .iter()
            .map(|param| {
                context.substitute(param).ok_or_else(|| {
                    rewrite_error!("cannot resolve generic parameter {} of {}", param, method)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        rewriter.set_init_locals();
        let flag = guards.call_flag(method)?;
        let skip = self.begin_guard(rewriter, flag)?;

        let locals: Vec<u16> = local_types
            .into_iter()
            .map(|local_type| rewriter.add_local(local_type))
            .collect();
        for local in locals.iter().rev() {
            rewriter.emit(OpCode::Stloc, Operand::Local(*local))?;
        }

        rewriter.emit(OpCode::Dup, Operand::None)?;
        self.emit_handles(rewriter, TokenRef::Method(method.clone()), &method.declaring_type)?;
        let assertion = match constrained {
            Some(constraint) => self.references.assert_can_call_constrained_for(constraint),
            None => self.references.assert_can_call.clone(),
        };
        rewriter.emit(OpCode::Call, Operand::Method(assertion))?;

        for local in &locals {
            rewriter.emit(OpCode::Ldloc, Operand::Local(*local))?;
        }
        rewriter.insert(skip);
        rewriter.reserve_stack(3);
        Ok(())
    }

    fn guard_virtual_pointer(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        guards: &mut GuardWriter<'_>,
        method: &MethodRef,
    ) -> Result<()> {
        let flag = guards.call_flag(method)?;
        let skip = self.begin_guard(rewriter, flag)?;
        rewriter.emit(OpCode::Dup, Operand::None)?;
        self.emit_handles(rewriter, TokenRef::Method(method.clone()), &method.declaring_type)?;
        rewriter.emit(OpCode::Call, Operand::Method(self.references.assert_can_call.clone()))?;
        rewriter.insert(skip);
        rewriter.reserve_stack(3);
        Ok(())
    }

    fn deny_shim_pointer(&self, rewriter: &mut MethodBodyRewriter<'_>, method: &MethodRef) -> Result<()> {
        self.emit_handles(rewriter, TokenRef::Method(method.clone()), &method.declaring_type)?;
        rewriter.emit(
            OpCode::Call,
            Operand::Method(self.references.deny_shim_invocation.clone()),
        )?;
        rewriter.reserve_stack(2);
        Ok(())
    }

    /// Replaces a shimmed call, returning false if `method` is not shimmed
    fn replace_with_shim(
        &self,
        rewriter: &mut MethodBodyRewriter<'_>,
        method: &MethodRef,
        constrained: bool,
    ) -> Result<bool> {
        let Some(replacement) = self.shims.replacement(method) else {
            return Ok(false);
        };
        if constrained {
            return Err(rewrite_error!("constrained call to shimmed method {}", method));
        }

        log::trace!("{}: redirecting {} to {}", self.scope, method, replacement);
        rewriter.emit(OpCode::Call, Operand::Method(replacement))?;
        rewriter.advance(false);
        Ok(true)
    }

    /// Keeps a delegate constructor that consumes a just-checked function pointer unguarded
    fn pass_delegate_constructor(&self, rewriter: &mut MethodBodyRewriter<'_>) {
        if self.config.guard_delegate_constructors {
            return;
        }
        let is_delegate_constructor = rewriter.instruction().is_some_and(|next| {
            next.opcode == OpCode::Newobj
                && next
                    .method()
                    .is_some_and(|ctor| ctor.is_constructor() && ctor.sig.params == [TypeSig::Object, TypeSig::I])
        });
        if is_delegate_constructor {
            rewriter.advance(true);
        }
    }
}

/// Returns true if the body starts with the verifier's `ldsfld; pop` prologue
#[must_use]
pub fn has_verification_prologue(body: &MethodBody) -> bool {
    matches!(
        body.instructions.as_slice(),
        [first, second, ..] if first.opcode == OpCode::Ldsfld && second.opcode == OpCode::Pop
    )
}
