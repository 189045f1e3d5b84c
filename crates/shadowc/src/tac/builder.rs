//! AST to TAC lowering.
//!
//! The builder walks a resolved compilation unit and produces one
//! [`TacModule`] per class or interface, with one [`TacMethod`] per declared
//! method plus the generated ones (field initializer, default create,
//! destroy, copy).
//!
//! Loops push a block carrying `break`/`continue` labels; `try` pushes a
//! block carrying a catch switch and, when a `finally` is present, the
//! cleanup triple. Every normal path out of a protected region routes
//! through each enclosing cleanup innermost-first: the visitor adds its
//! return-address label to the cleanup phi, branches to the cleanup label,
//! and resumes at its return address once the cleanup's indirect branch
//! dispatches back.
//!
//! Reference counting is store-centric: storing into an owned slot (local
//! or field) increments the incoming value and decrements the replaced one;
//! borrowed temporaries carry no counts. Reference parameters are
//! incremented on entry and every initialized reference local is
//! decremented on each return path, so counts balance per invocation.

use crate::tac::method::TacMethod;
use crate::tac::nodes::{
    BlockId, BranchKind, CallFunction, LocalId, NodeId, RuntimeFn, TacKind,
};
use crate::tac::{TacConstant, TacModule};
use crate::typecheck::resolve::SYNTHESIZED;
use crate::typecheck::{ModifiedType, Primitive, SigId, TypeArena, TypeId, TypeKind};
use shadow_ast::{
    BinaryOp, BlockStmt, CompilationUnit, Expr, ExprKind, Literal, Span, Stmt, TypeDecl,
};
use std::collections::HashSet;

pub struct TacBuilder<'a> {
    arena: &'a mut TypeArena,
    method: TacMethod,
    current_block: BlockId,
    /// Label of the straight-line run currently receiving nodes; phi
    /// predecessors record it.
    last_label: NodeId,
    /// Set once a terminator is emitted; cleared when a label is placed.
    terminated: bool,
    scopes: Vec<Vec<(String, LocalId)>>,
    initialized: HashSet<LocalId>,
    this_type: TypeId,
}

impl<'a> TacBuilder<'a> {
    pub fn build(arena: &'a mut TypeArena, unit: &CompilationUnit, root: TypeId) -> TacModule {
        let mut builder = TacBuilder {
            method: TacMethod::new(None, unit.span.clone()),
            arena,
            current_block: BlockId(0),
            last_label: NodeId(0),
            terminated: false,
            scopes: Vec::new(),
            initialized: HashSet::new(),
            this_type: root,
        };
        builder.build_decl(&unit.declaration, root)
    }

    fn build_decl(&mut self, decl: &TypeDecl, id: TypeId) -> TacModule {
        let mut module = TacModule::new(self.arena, id);

        for field in &self.arena.entry(id).fields {
            if let Some(value) = &field.const_value {
                module.constants.push(TacConstant {
                    name: field.name.clone(),
                    ty: field.ty,
                    value: value.clone(),
                });
            }
        }

        if self.arena.is_class(id) {
            module.methods.push(self.build_field_init(decl, id));

            let sigs: Vec<SigId> = self.arena.entry(id).methods.clone();
            for sig_id in sigs {
                let signature = self.arena.signature(sig_id).clone();
                if signature.is_import {
                    continue;
                }
                let built = if signature.decl_index == SYNTHESIZED {
                    if signature.is_create() {
                        Some(self.build_default_create(decl, id, sig_id))
                    } else if signature.is_destroy() {
                        Some(self.build_destroy(decl, id, sig_id))
                    } else if signature.is_copy() {
                        Some(self.build_copy(decl, id, sig_id))
                    } else {
                        None
                    }
                } else {
                    decl.methods
                        .get(signature.decl_index)
                        .and_then(|m| m.body.as_ref().map(|b| (m, b)))
                        .map(|(m, body)| self.build_method(id, sig_id, m.span.clone(), body))
                };
                if let Some(method) = built {
                    module.methods.push(method);
                }
            }
        }

        for inner_decl in &decl.inner {
            let inner_id = self
                .arena
                .entry(id)
                .inner
                .iter()
                .find(|(name, _)| *name == inner_decl.name)
                .map(|(_, t)| *t)
                .expect("inner type bound by the resolver");
            module.inner.push(self.build_decl(inner_decl, inner_id));
        }
        module
    }

    // ----- per-method scaffolding -----

    fn start_method(&mut self, signature: Option<SigId>, this: TypeId, span: Span) {
        self.method = TacMethod::new(signature, span);
        self.current_block = self.method.root_block();
        self.last_label = self.method.entry;
        self.terminated = false;
        self.scopes = vec![Vec::new()];
        self.initialized = HashSet::new();
        self.this_type = this;

        let this_local = self
            .method
            .add_parameter("this", ModifiedType::new(this));
        self.scopes[0].push(("this".to_string(), this_local));
        self.initialized.insert(this_local);

        if let Some(sig_id) = signature {
            let sig = self.arena.signature(sig_id).clone();
            for (name, ty) in sig.param_names.iter().zip(&sig.params) {
                let local = self.method.add_parameter(name.clone(), *ty);
                self.scopes[0].push((name.clone(), local));
                self.initialized.insert(local);
            }
        }

        // Entering a method borrows its reference arguments for the whole
        // activation.
        for index in 0..self.method.parameter_count {
            let local = LocalId(index as u32);
            let ty = self.method.local(local).ty;
            if self.arena.is_reference(ty.ty) {
                let value = self.load_local(local, 0..0);
                self.runtime_call(RuntimeFn::IncrementRef, vec![value], 0..0);
            }
        }
    }

    fn finish_method(&mut self) -> TacMethod {
        if !self.terminated {
            self.return_epilogue(Vec::new(), 0..0);
        }
        std::mem::replace(&mut self.method, TacMethod::new(None, 0..0))
    }

    fn build_method(
        &mut self,
        this: TypeId,
        sig_id: SigId,
        span: Span,
        body: &BlockStmt,
    ) -> TacMethod {
        self.start_method(Some(sig_id), this, span);
        let signature = self.arena.signature(sig_id).clone();
        if signature.is_create() {
            self.call_field_init();
        }
        for stmt in &body.stmts {
            self.build_stmt(stmt);
        }
        if !self.terminated && signature.is_create() {
            // A create falls off its end by returning the object.
            let this_value = self.load_local(LocalId(0), 0..0);
            self.return_epilogue(vec![this_value], 0..0);
        }
        self.finish_method()
    }

    /// The `_fields` initializer: defaults first, declared initializers in
    /// declaration order. Called at the top of every create.
    fn build_field_init(&mut self, decl: &TypeDecl, id: TypeId) -> TacMethod {
        self.start_method(None, id, decl.span.clone());
        self.method.special_name = Some("_fields".to_string());

        let fields = self.arena.entry(id).fields.clone();
        for field in &fields {
            if field.ty.modifiers.is_constant() {
                continue;
            }
            let default = self.default_literal(field.ty);
            if let Some(default) = default {
                let value = self.append(
                    TacKind::Literal(default),
                    field.ty,
                    field.span.clone(),
                );
                self.store_field(id, &field.name, value, field.ty, field.span.clone());
            }
        }
        for ast_field in &decl.fields {
            if ast_field
                .modifiers
                .contains(&shadow_ast::Modifier::Constant)
            {
                continue;
            }
            if let Some(init) = &ast_field.init {
                let value = self.build_expr(init);
                let Some(field) = fields.iter().find(|f| f.name == ast_field.name) else {
                    continue;
                };
                if self.arena.is_reference(field.ty.ty) {
                    self.runtime_call(
                        RuntimeFn::IncrementRef,
                        vec![value],
                        ast_field.span.clone(),
                    );
                }
                self.store_field(id, &ast_field.name, value, field.ty, ast_field.span.clone());
            }
        }
        self.finish_method()
    }

    fn build_default_create(&mut self, decl: &TypeDecl, id: TypeId, sig_id: SigId) -> TacMethod {
        self.start_method(Some(sig_id), id, decl.span.clone());
        self.call_field_init();
        let this_value = self.load_local(LocalId(0), decl.span.clone());
        self.return_epilogue(vec![this_value], decl.span.clone());
        self.finish_method()
    }

    fn build_destroy(&mut self, decl: &TypeDecl, id: TypeId, sig_id: SigId) -> TacMethod {
        self.start_method(Some(sig_id), id, decl.span.clone());
        let fields = self.arena.order_all_fields(id);
        for (owner, field) in fields {
            if self.arena.is_reference(field.ty.ty) {
                let this_value = self.load_local(LocalId(0), decl.span.clone());
                let reference = self.append(
                    TacKind::FieldRef {
                        object: this_value,
                        class: owner,
                        field: field.name.clone(),
                    },
                    field.ty,
                    decl.span.clone(),
                );
                let value = self.append(
                    TacKind::Load { reference },
                    field.ty,
                    decl.span.clone(),
                );
                self.runtime_call(RuntimeFn::DecrementRef, vec![value], decl.span.clone());
            }
        }
        self.finish_method()
    }

    fn build_copy(&mut self, decl: &TypeDecl, id: TypeId, sig_id: SigId) -> TacMethod {
        self.start_method(Some(sig_id), id, decl.span.clone());
        let span = decl.span.clone();
        let copy = self.append(
            TacKind::NewObject { class: id },
            ModifiedType::new(id),
            span.clone(),
        );
        let fields = self.arena.order_all_fields(id);
        for (owner, field) in fields {
            let this_value = self.load_local(LocalId(0), span.clone());
            let source = self.append(
                TacKind::FieldRef {
                    object: this_value,
                    class: owner,
                    field: field.name.clone(),
                },
                field.ty,
                span.clone(),
            );
            let value = self.append(TacKind::Load { reference: source }, field.ty, span.clone());
            if self.arena.is_reference(field.ty.ty) {
                self.runtime_call(RuntimeFn::IncrementRef, vec![value], span.clone());
            }
            let target = self.append(
                TacKind::FieldRef {
                    object: copy,
                    class: owner,
                    field: field.name.clone(),
                },
                field.ty,
                span.clone(),
            );
            self.append(
                TacKind::Store {
                    reference: target,
                    value,
                },
                field.ty,
                span.clone(),
            );
        }
        self.return_epilogue(vec![copy], span);
        self.finish_method()
    }

    fn call_field_init(&mut self) {
        let this_value = self.load_local(LocalId(0), 0..0);
        let void = ModifiedType::new(self.arena.well_known.void);
        self.append(
            TacKind::Call {
                function: CallFunction::FieldInit(self.this_type),
                args: vec![this_value],
                landing: None,
            },
            void,
            0..0,
        );
    }

    // ----- helpers -----

    fn append(&mut self, kind: TacKind, ty: ModifiedType, span: Span) -> NodeId {
        let id = self
            .method
            .create_node(kind, ty, self.current_block, span);
        self.method.place(id);
        id
    }

    fn place_label(&mut self, label: NodeId) {
        self.method.place(label);
        self.last_label = label;
        self.terminated = false;
    }

    fn create_label(&mut self, span: Span) -> NodeId {
        let void = ModifiedType::new(self.arena.well_known.void);
        self.method
            .create_node(TacKind::Label, void, self.current_block, span)
    }

    fn branch_to(&mut self, label: NodeId, span: Span) {
        if !self.terminated {
            let void = ModifiedType::new(self.arena.well_known.void);
            self.append(TacKind::Branch(BranchKind::Direct(label)), void, span);
            self.terminated = true;
        }
    }

    fn runtime_call(&mut self, function: RuntimeFn, args: Vec<NodeId>, span: Span) -> NodeId {
        let void = ModifiedType::new(self.arena.well_known.void);
        self.append(
            TacKind::Call {
                function: CallFunction::Runtime(function),
                args,
                landing: None,
            },
            void,
            span,
        )
    }

    fn lookup_local(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|(n, _)| n == name).map(|(_, l)| *l))
    }

    fn load_local(&mut self, local: LocalId, span: Span) -> NodeId {
        let ty = self.method.local(local).ty;
        let reference = self.append(TacKind::VariableRef(local), ty, span.clone());
        self.append(TacKind::Load { reference }, ty, span)
    }

    fn store_field(
        &mut self,
        class: TypeId,
        field: &str,
        value: NodeId,
        ty: ModifiedType,
        span: Span,
    ) {
        let this_value = self.load_local(LocalId(0), span.clone());
        let reference = self.append(
            TacKind::FieldRef {
                object: this_value,
                class,
                field: field.to_string(),
            },
            ty,
            span.clone(),
        );
        self.append(TacKind::Store { reference, value }, ty, span);
    }

    fn default_literal(&self, ty: ModifiedType) -> Option<Literal> {
        match self.arena.kind(ty.ty) {
            TypeKind::Primitive(p) => Some(match p {
                Primitive::Boolean => Literal::Boolean(false),
                Primitive::Byte => Literal::Byte(0),
                Primitive::UByte => Literal::UByte(0),
                Primitive::Short => Literal::Short(0),
                Primitive::UShort => Literal::UShort(0),
                Primitive::Int => Literal::Int(0),
                Primitive::UInt => Literal::UInt(0),
                Primitive::Long => Literal::Long(0),
                Primitive::ULong => Literal::ULong(0),
                Primitive::Code => Literal::Code('\0'),
                Primitive::Float => Literal::Float(0.0),
                Primitive::Double => Literal::Double(0.0),
            }),
            _ if ty.modifiers.is_nullable() => Some(Literal::Null),
            TypeKind::Array { nullable: true, .. } => Some(Literal::Null),
            _ => None,
        }
    }

    fn expr_type(&self, expr: &Expr) -> ModifiedType {
        expr.ty
            .map(|r| self.arena.resolve_ref(r))
            .unwrap_or(ModifiedType::new(self.arena.well_known.unknown))
    }

    /// Routes control through every enclosing cleanup, innermost first,
    /// stopping before `stop`. Each visit parks a return-address label in
    /// the cleanup phi, branches to the shared cleanup code, and resumes at
    /// the parked label.
    fn visit_cleanups_to(&mut self, stop: Option<BlockId>, span: Span) {
        let blocks = self.method.blocks_up_to(self.current_block, stop);
        for block in blocks {
            let (Some(cleanup), Some(phi)) = (
                self.method.block(block).cleanup_label,
                self.method.block(block).cleanup_phi,
            ) else {
                continue;
            };
            let resume_here = self.create_label(span.clone());
            if let TacKind::Phi { entries } = &mut self.method.node_mut(phi).kind {
                entries.push((resume_here, self.last_label));
            }
            self.branch_to(cleanup, span.clone());
            self.place_label(resume_here);
        }
    }

    /// Reference-count epilogue and `Return`; finallys run first.
    fn return_epilogue(&mut self, values: Vec<NodeId>, span: Span) {
        self.visit_cleanups_to(None, span.clone());

        // The caller takes ownership of returned references.
        for value in &values {
            let ty = self.method.node(*value).ty;
            if self.arena.is_reference(ty.ty) {
                self.runtime_call(RuntimeFn::IncrementRef, vec![*value], span.clone());
            }
        }
        let locals: Vec<LocalId> = (0..self.method.locals.len() as u32)
            .map(LocalId)
            .filter(|l| {
                self.initialized.contains(l)
                    && self.arena.is_reference(self.method.local(*l).ty.ty)
            })
            .collect();
        for local in locals {
            let value = self.load_local(local, span.clone());
            self.runtime_call(RuntimeFn::DecrementRef, vec![value], span.clone());
        }

        let void = ModifiedType::new(self.arena.well_known.void);
        self.append(TacKind::Return { values }, void, span);
        self.terminated = true;
    }

    // ----- statements -----

    fn build_stmt(&mut self, stmt: &Stmt) {
        if self.terminated {
            // Dead statements still lower; the control-flow analysis is
            // what reports them.
            let label = self.create_label(stmt_span(stmt));
            self.place_label(label);
        }
        match stmt {
            Stmt::Expr(s) => {
                self.build_expr(&s.expr);
            }
            Stmt::LocalDecl(s) => {
                let declared = s
                    .ty_ref
                    .map(|r| self.arena.resolve_ref(r))
                    .unwrap_or(ModifiedType::new(self.arena.well_known.unknown));
                let local = self.method.add_local(s.name.clone(), declared);
                self.scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .push((s.name.clone(), local));
                if let Some(init) = &s.init {
                    let value = self.build_expr(init);
                    self.store_local(local, value, s.span.clone());
                }
            }
            Stmt::Block(block) => {
                let outer = self.current_block;
                self.current_block = self.method.new_block(outer);
                self.scopes.push(Vec::new());
                for stmt in &block.stmts {
                    self.build_stmt(stmt);
                }
                self.scopes.pop();
                self.current_block = outer;
            }
            Stmt::If(s) => {
                let condition = self.build_expr(&s.cond);
                let then_label = self.create_label(s.span.clone());
                let end_label = self.create_label(s.span.clone());
                let else_label = if s.else_branch.is_some() {
                    self.create_label(s.span.clone())
                } else {
                    end_label
                };
                let void = ModifiedType::new(self.arena.well_known.void);
                self.append(
                    TacKind::Branch(BranchKind::Conditional {
                        condition,
                        true_target: then_label,
                        false_target: else_label,
                    }),
                    void,
                    s.span.clone(),
                );
                self.terminated = true;
                self.place_label(then_label);
                self.build_stmt(&s.then_branch);
                self.branch_to(end_label, s.span.clone());
                if let Some(else_branch) = &s.else_branch {
                    self.place_label(else_label);
                    self.build_stmt(else_branch);
                    self.branch_to(end_label, s.span.clone());
                }
                self.place_label(end_label);
            }
            Stmt::While(s) => {
                let outer = self.current_block;
                let loop_block = self.method.new_block(outer);
                self.current_block = loop_block;
                // The continue label doubles as the condition re-entry.
                let cond_label = self.method.add_continue(loop_block, s.span.clone());
                let break_label = self.method.add_break(loop_block, s.span.clone());
                let body_label = self.create_label(s.span.clone());

                self.branch_to(cond_label, s.span.clone());
                self.place_label(cond_label);
                let condition = self.build_expr(&s.cond);
                let void = ModifiedType::new(self.arena.well_known.void);
                self.append(
                    TacKind::Branch(BranchKind::Conditional {
                        condition,
                        true_target: body_label,
                        false_target: break_label,
                    }),
                    void,
                    s.span.clone(),
                );
                self.terminated = true;
                self.place_label(body_label);
                self.scopes.push(Vec::new());
                self.build_stmt(&s.body);
                self.scopes.pop();
                self.branch_to(cond_label, s.span.clone());
                self.place_label(break_label);
                self.current_block = outer;
            }
            Stmt::For(s) => {
                let outer = self.current_block;
                let loop_block = self.method.new_block(outer);
                self.current_block = loop_block;
                self.scopes.push(Vec::new());
                if let Some(init) = &s.init {
                    self.build_stmt(init);
                }
                let cond_label = self.create_label(s.span.clone());
                let update_label = self.method.add_continue(loop_block, s.span.clone());
                let break_label = self.method.add_break(loop_block, s.span.clone());
                let body_label = self.create_label(s.span.clone());

                self.branch_to(cond_label, s.span.clone());
                self.place_label(cond_label);
                match &s.cond {
                    Some(cond) => {
                        let condition = self.build_expr(cond);
                        let void = ModifiedType::new(self.arena.well_known.void);
                        self.append(
                            TacKind::Branch(BranchKind::Conditional {
                                condition,
                                true_target: body_label,
                                false_target: break_label,
                            }),
                            void,
                            s.span.clone(),
                        );
                        self.terminated = true;
                    }
                    None => self.branch_to(body_label, s.span.clone()),
                }
                self.place_label(body_label);
                self.build_stmt(&s.body);
                self.branch_to(update_label, s.span.clone());
                self.place_label(update_label);
                if let Some(update) = &s.update {
                    self.build_expr(update);
                }
                self.branch_to(cond_label, s.span.clone());
                self.place_label(break_label);
                self.scopes.pop();
                self.current_block = outer;
            }
            Stmt::Return(s) => {
                let values: Vec<NodeId> = s.values.iter().map(|v| self.build_expr(v)).collect();
                self.return_epilogue(values, s.span.clone());
            }
            Stmt::Break(s) => {
                let Some(target) = self.method.get_break(self.current_block) else {
                    return;
                };
                let target_block = self.owning_block(|b| b.break_label == Some(target));
                self.visit_cleanups_to(target_block, s.span.clone());
                self.branch_to(target, s.span.clone());
            }
            Stmt::Continue(s) => {
                let Some(target) = self.method.get_continue(self.current_block) else {
                    return;
                };
                let target_block = self.owning_block(|b| b.continue_label == Some(target));
                self.visit_cleanups_to(target_block, s.span.clone());
                self.branch_to(target, s.span.clone());
            }
            Stmt::Throw(s) => {
                let value = self.build_expr(&s.value);
                self.method.add_unwind_source(self.current_block);
                let unwind = self.method.get_unwind(self.current_block);
                let void = ModifiedType::new(self.arena.well_known.void);
                self.append(TacKind::Throw { value, unwind }, void, s.span.clone());
                self.terminated = true;
            }
            Stmt::Try(s) => self.build_try(s),
        }
    }

    fn owning_block(
        &self,
        mut predicate: impl FnMut(&crate::tac::method::BlockData) -> bool,
    ) -> Option<BlockId> {
        let mut current = Some(self.current_block);
        while let Some(id) = current {
            if predicate(self.method.block(id)) {
                return Some(id);
            }
            current = self.method.block(id).parent;
        }
        None
    }

    fn build_try(&mut self, s: &shadow_ast::TryStmt) {
        let span = s.span.clone();
        let outer = self.current_block;

        // A catch switch or a cleanup resume can continue unwinding into
        // the enclosing handlers, so enclosing finallys need their unwind
        // paths.
        if !s.catches.is_empty() || s.finally.is_some() {
            self.method.add_unwind_source(outer);
        }

        // The outer block owns done/recover and the cleanup triple; the
        // switch block owns the catch switch so that catch bodies (children
        // of the outer block) unwind past it, not into it.
        let protect = self.method.new_block(outer);
        if s.finally.is_some() {
            let phi_ty = ModifiedType::new(self.arena.well_known.object);
            self.method.add_cleanup(protect, phi_ty, span.clone());
        }
        let done_label = self.method.add_done(protect, span.clone());
        if s.recover.is_some() {
            self.method.add_recover(protect, span.clone());
        }

        let switch_block = self.method.new_block(protect);
        if !s.catches.is_empty() {
            self.method.add_catch_switch(switch_block, span.clone());
        }

        // Body.
        self.current_block = self.method.new_block(switch_block);
        self.scopes.push(Vec::new());
        for stmt in &s.block.stmts {
            self.build_stmt(stmt);
        }
        self.scopes.pop();
        if !self.terminated {
            self.current_block = protect;
            self.visit_cleanups_to(self.method.block(protect).parent, span.clone());
            self.branch_to(done_label, span.clone());
        }

        // Catch switch and pads.
        if !s.catches.is_empty() {
            let switch_label = self
                .method
                .block(switch_block)
                .catch_switch_label
                .expect("added above");
            self.current_block = switch_block;
            self.place_label(switch_label);
            let pad_labels: Vec<NodeId> = s
                .catches
                .iter()
                .map(|c| self.create_label(c.span.clone()))
                .collect();
            let unwind = self
                .method
                .block(protect)
                .cleanup_unwind_label
                .or_else(|| self.method.get_unwind(outer));
            let void = ModifiedType::new(self.arena.well_known.void);
            let switch_node = self.append(
                TacKind::CatchSwitch {
                    pads: pad_labels.clone(),
                    unwind,
                },
                void,
                span.clone(),
            );
            self.terminated = true;

            for (catch, pad_label) in s.catches.iter().zip(pad_labels) {
                self.current_block = self.method.new_block(protect);
                self.place_label(pad_label);
                let caught_ty = catch
                    .ty_ref
                    .map(|r| self.arena.resolve_ref(r))
                    .unwrap_or(ModifiedType::new(self.arena.well_known.exception));
                let pad = self.append(
                    TacKind::CatchPad {
                        exception: caught_ty.ty,
                        switch: switch_node,
                    },
                    caught_ty,
                    catch.span.clone(),
                );
                let exception = self.append(
                    TacKind::Call {
                        function: CallFunction::Runtime(RuntimeFn::Catch),
                        args: vec![pad],
                        landing: None,
                    },
                    caught_ty,
                    catch.span.clone(),
                );
                let local = self.method.add_local(catch.name.clone(), caught_ty);
                self.scopes.push(vec![(catch.name.clone(), local)]);
                self.store_local(local, exception, catch.span.clone());
                for stmt in &catch.block.stmts {
                    self.build_stmt(stmt);
                }
                self.scopes.pop();
                if !self.terminated {
                    self.visit_cleanups_to(self.method.block(protect).parent, span.clone());
                    self.branch_to(done_label, span.clone());
                }
            }
        }

        // Recover.
        if let Some(recover) = &s.recover {
            let recover_label = self
                .method
                .block(protect)
                .recover_label
                .expect("added above");
            self.current_block = self.method.new_block(protect);
            self.place_label(recover_label);
            self.scopes.push(Vec::new());
            for stmt in &recover.stmts {
                self.build_stmt(stmt);
            }
            self.scopes.pop();
            if !self.terminated {
                self.visit_cleanups_to(self.method.block(protect).parent, span.clone());
                self.branch_to(done_label, span.clone());
            }
        }

        // Shared cleanup code, then the unwind-path entry that borrows it.
        if let Some(finally) = &s.finally {
            let cleanup_label = self.method.block(protect).cleanup_label.expect("added");
            let phi = self.method.block(protect).cleanup_phi.expect("added");
            let unwind_label = self
                .method
                .block(protect)
                .cleanup_unwind_label
                .expect("added");

            self.current_block = self.method.new_block(protect);
            self.method.set_cleanup_target(self.current_block);
            self.place_label(cleanup_label);
            self.method.place(phi);
            self.scopes.push(Vec::new());
            for stmt in &finally.stmts {
                self.build_stmt(stmt);
            }
            self.scopes.pop();
            let void = ModifiedType::new(self.arena.well_known.void);
            if !self.terminated {
                self.append(TacKind::Branch(BranchKind::Indirect(phi)), void, span.clone());
                self.terminated = true;
            }

            // Unwinding enters here, runs the same cleanup code, and
            // resumes the in-flight exception. Catch pads unwind here too,
            // so the path exists whenever there are catches.
            if self.method.block(protect).unwind_target || !s.catches.is_empty() {
                self.current_block = self.method.new_block(protect);
                self.method.set_cleanup_target(self.current_block);
                self.place_label(unwind_label);
                let pad = self.append(
                    TacKind::CleanupPad,
                    ModifiedType::new(self.arena.well_known.object),
                    span.clone(),
                );
                let resume_label = self.create_label(span.clone());
                if let TacKind::Phi { entries } = &mut self.method.node_mut(phi).kind {
                    entries.push((resume_label, unwind_label));
                }
                self.branch_to(cleanup_label, span.clone());
                self.place_label(resume_label);
                // The exception keeps unwinding to the next handler outside
                // this try.
                let outer_unwind = self.method.get_unwind(outer);
                self.append(
                    TacKind::Resume {
                        pad,
                        unwind: outer_unwind,
                    },
                    void,
                    span.clone(),
                );
                self.terminated = true;
            }
        }

        self.current_block = protect;
        self.place_label(done_label);
        self.current_block = outer;
    }

    // ----- expressions -----

    fn build_expr(&mut self, expr: &Expr) -> NodeId {
        let ty = self.expr_type(expr);
        let span = expr.span.clone();
        match &expr.kind {
            ExprKind::Literal(literal) => {
                self.append(TacKind::Literal(literal.clone()), ty, span)
            }
            ExprKind::This => self.load_local(LocalId(0), span),
            ExprKind::Name(name) => {
                if let Some(local) = self.lookup_local(name) {
                    return self.load_local(local, span);
                }
                if let Some((owner, field)) = self.arena.find_field(self.this_type, name) {
                    let this_value = self.load_local(LocalId(0), span.clone());
                    let reference = self.append(
                        TacKind::FieldRef {
                            object: this_value,
                            class: owner,
                            field: name.clone(),
                        },
                        field.ty,
                        span.clone(),
                    );
                    return self.append(TacKind::Load { reference }, field.ty, span);
                }
                // A bare type name: the singleton instance of that type.
                self.append(TacKind::SingletonRef { class: ty.ty }, ty, span)
            }
            ExprKind::Field { object, name } => {
                let object_value = self.build_expr(object);
                let class = self.method.node(object_value).ty.ty;
                let reference = self.append(
                    TacKind::FieldRef {
                        object: object_value,
                        class,
                        field: name.clone(),
                    },
                    ty,
                    span.clone(),
                );
                self.append(TacKind::Load { reference }, ty, span)
            }
            ExprKind::Call { object, args, .. } => {
                let Some(sig) = expr.method.map(|m| SigId(m.0)) else {
                    return self.append(TacKind::NoOp, ty, span);
                };
                let receiver = match object {
                    Some(o) => self.build_expr(o),
                    None => self.load_local(LocalId(0), span.clone()),
                };
                let mut call_args = vec![receiver];
                for arg in args {
                    call_args.push(self.build_expr(arg));
                }
                self.emit_call(sig, Some(receiver), call_args, ty, span)
            }
            ExprKind::Create { args, .. } => {
                let Some(sig) = expr.method.map(|m| SigId(m.0)) else {
                    return self.append(TacKind::NoOp, ty, span);
                };
                let object = self.append(
                    TacKind::NewObject { class: ty.ty },
                    ty,
                    span.clone(),
                );
                let mut call_args = vec![object];
                for arg in args {
                    call_args.push(self.build_expr(arg));
                }
                self.emit_call(sig, Some(object), call_args, ty, span)
            }
            ExprKind::NewArray { sizes, .. } => {
                let dims: Vec<NodeId> = sizes.iter().map(|s| self.build_expr(s)).collect();
                self.append(
                    TacKind::NewArray {
                        array: ty.ty,
                        dims,
                    },
                    ty,
                    span,
                )
            }
            ExprKind::Index { array, indices } => {
                let array_value = self.build_expr(array);
                let index_values: Vec<NodeId> =
                    indices.iter().map(|i| self.build_expr(i)).collect();
                let reference = self.append(
                    TacKind::ElementRef {
                        array: array_value,
                        indices: index_values,
                    },
                    ty,
                    span.clone(),
                );
                self.append(TacKind::Load { reference }, ty, span)
            }
            ExprKind::Binary {
                op: op @ (BinaryOp::CondAnd | BinaryOp::CondOr),
                lhs,
                rhs,
            } => self.build_short_circuit(*op, lhs, rhs, ty, span),
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.build_expr(lhs);
                let right = self.build_expr(rhs);
                self.append(
                    TacKind::Binary {
                        op: *op,
                        left,
                        right,
                    },
                    ty,
                    span,
                )
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.build_expr(operand);
                self.append(TacKind::Unary { op: *op, operand }, ty, span)
            }
            ExprKind::Cast { expr: inner, .. } => {
                let value = self.build_expr(inner);
                self.append(TacKind::Cast { value }, ty, span)
            }
            ExprKind::Assign { target, value } => {
                let value_node = self.build_expr(value);
                self.build_store(target, value_node, span);
                value_node
            }
        }
    }

    fn emit_call(
        &mut self,
        sig: SigId,
        receiver: Option<NodeId>,
        args: Vec<NodeId>,
        ty: ModifiedType,
        span: Span,
    ) -> NodeId {
        let reference = self.append(
            TacKind::MethodRef {
                object: receiver,
                signature: sig,
            },
            ModifiedType::new(self.arena.well_known.object),
            span.clone(),
        );
        self.method.add_unwind_source(self.current_block);
        let landing = self.method.get_unwind(self.current_block).map(|unwind| {
            let normal = self.create_label(span.clone());
            (normal, unwind)
        });
        let call = self.append(
            TacKind::Call {
                function: CallFunction::Ref(reference),
                args,
                landing,
            },
            ty,
            span,
        );
        if let Some((normal, _)) = landing {
            self.place_label(normal);
        }
        call
    }

    fn build_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: ModifiedType,
        span: Span,
    ) -> NodeId {
        let condition = self.build_expr(lhs);
        let rhs_label = self.create_label(span.clone());
        let short_label = self.create_label(span.clone());
        let merge_label = self.create_label(span.clone());
        let void = ModifiedType::new(self.arena.well_known.void);
        let (true_target, false_target) = match op {
            BinaryOp::CondAnd => (rhs_label, short_label),
            _ => (short_label, rhs_label),
        };
        self.append(
            TacKind::Branch(BranchKind::Conditional {
                condition,
                true_target,
                false_target,
            }),
            void,
            span.clone(),
        );
        self.terminated = true;

        self.place_label(rhs_label);
        let rhs_value = self.build_expr(rhs);
        let rhs_end = self.last_label;
        self.branch_to(merge_label, span.clone());

        self.place_label(short_label);
        let short_value = self.append(
            TacKind::Literal(Literal::Boolean(op == BinaryOp::CondOr)),
            ty,
            span.clone(),
        );
        self.branch_to(merge_label, span.clone());

        self.place_label(merge_label);
        self.append(
            TacKind::Phi {
                entries: vec![(rhs_value, rhs_end), (short_value, short_label)],
            },
            ty,
            span,
        )
    }

    fn store_local(&mut self, local: LocalId, value: NodeId, span: Span) {
        let ty = self.method.local(local).ty;
        let is_reference = self.arena.is_reference(ty.ty);
        let was_initialized = self.initialized.contains(&local);
        if is_reference {
            self.runtime_call(RuntimeFn::IncrementRef, vec![value], span.clone());
        }
        let reference = self.append(TacKind::VariableRef(local), ty, span.clone());
        if is_reference && was_initialized {
            let old = self.append(TacKind::Load { reference }, ty, span.clone());
            let fresh_reference = self.append(TacKind::VariableRef(local), ty, span.clone());
            self.append(
                TacKind::Store {
                    reference: fresh_reference,
                    value,
                },
                ty,
                span.clone(),
            );
            self.runtime_call(RuntimeFn::DecrementRef, vec![old], span);
        } else {
            self.append(TacKind::Store { reference, value }, ty, span);
        }
        self.initialized.insert(local);
    }

    fn build_store(&mut self, target: &Expr, value: NodeId, span: Span) {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.lookup_local(name) {
                    self.store_local(local, value, span);
                    return;
                }
                if let Some((owner, field)) = self.arena.find_field(self.this_type, name) {
                    if self.arena.is_reference(field.ty.ty) {
                        self.runtime_call(RuntimeFn::IncrementRef, vec![value], span.clone());
                        let this_value = self.load_local(LocalId(0), span.clone());
                        let reference = self.append(
                            TacKind::FieldRef {
                                object: this_value,
                                class: owner,
                                field: name.clone(),
                            },
                            field.ty,
                            span.clone(),
                        );
                        let old =
                            self.append(TacKind::Load { reference }, field.ty, span.clone());
                        self.store_field(owner, name, value, field.ty, span.clone());
                        self.runtime_call(RuntimeFn::DecrementRef, vec![old], span);
                    } else {
                        self.store_field(owner, name, value, field.ty, span);
                    }
                }
            }
            ExprKind::Field { object, name } => {
                let object_value = self.build_expr(object);
                let class = self.method.node(object_value).ty.ty;
                let field_ty = self.expr_type(target);
                if self.arena.is_reference(field_ty.ty) {
                    self.runtime_call(RuntimeFn::IncrementRef, vec![value], span.clone());
                }
                let reference = self.append(
                    TacKind::FieldRef {
                        object: object_value,
                        class,
                        field: name.clone(),
                    },
                    field_ty,
                    span.clone(),
                );
                if self.arena.is_reference(field_ty.ty) {
                    let old = self.append(TacKind::Load { reference }, field_ty, span.clone());
                    let fresh = self.append(
                        TacKind::FieldRef {
                            object: object_value,
                            class,
                            field: name.clone(),
                        },
                        field_ty,
                        span.clone(),
                    );
                    self.append(
                        TacKind::Store {
                            reference: fresh,
                            value,
                        },
                        field_ty,
                        span.clone(),
                    );
                    self.runtime_call(RuntimeFn::DecrementRef, vec![old], span);
                } else {
                    self.append(TacKind::Store { reference, value }, field_ty, span);
                }
            }
            ExprKind::Index { array, indices } => {
                let array_value = self.build_expr(array);
                let index_values: Vec<NodeId> =
                    indices.iter().map(|i| self.build_expr(i)).collect();
                let element_ty = self.expr_type(target);
                if self.arena.is_reference(element_ty.ty) {
                    self.runtime_call(RuntimeFn::IncrementRef, vec![value], span.clone());
                }
                let reference = self.append(
                    TacKind::ElementRef {
                        array: array_value,
                        indices: index_values,
                    },
                    element_ty,
                    span.clone(),
                );
                self.append(
                    TacKind::Store { reference, value },
                    element_ty,
                    span,
                );
            }
            _ => {}
        }
    }
}

fn stmt_span(stmt: &Stmt) -> Span {
    match stmt {
        Stmt::Expr(s) => s.span.clone(),
        Stmt::LocalDecl(s) => s.span.clone(),
        Stmt::Block(s) => s.span.clone(),
        Stmt::If(s) => s.span.clone(),
        Stmt::While(s) => s.span.clone(),
        Stmt::For(s) => s.span.clone(),
        Stmt::Return(s) => s.span.clone(),
        Stmt::Break(s) => s.span.clone(),
        Stmt::Continue(s) => s.span.clone(),
        Stmt::Throw(s) => s.span.clone(),
        Stmt::Try(s) => s.span.clone(),
    }
}
