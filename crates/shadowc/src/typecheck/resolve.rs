//! Declaration binding and expression annotation.
//!
//! The resolver runs in three passes over the compilation units of a
//! program:
//!
//! 1. declare every outer and inner type so names resolve regardless of
//!    declaration order,
//! 2. bind extends/implements clauses, fields, and method signatures,
//! 3. annotate method bodies: every expression receives its resolved
//!    (type, modifiers) handle and every call its target signature.
//!
//! Errors accumulate in the [`ErrorReporter`]; the resolver keeps going
//! after an error by annotating the offending expression with the unknown
//! type, so one mistake does not cascade into a wall of follow-on messages.

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::typecheck::types::{
    FieldEntry, MethodLookupError, MethodSignature, ModifiedType, Modifiers, Primitive, TypeArena,
    TypeId, TypeKind,
};
use shadow_ast::{
    BinaryOp, CompilationUnit, Expr, ExprKind, Literal, MethodDecl, MethodRef, Stmt, TypeAnn,
    TypeDecl, TypeDeclKind, UnaryOp,
};
use std::collections::HashMap;

/// Sentinel declaration index for signatures with no AST counterpart.
pub const SYNTHESIZED: usize = usize::MAX;

pub struct Resolver<'a> {
    pub arena: &'a mut TypeArena,
    pub reporter: &'a mut ErrorReporter,
    /// Simple name -> declared type, for the whole program.
    names: HashMap<String, TypeId>,
}

struct BodyScope {
    /// Lexical scopes, innermost last; locals and parameters.
    locals: Vec<HashMap<String, ModifiedType>>,
    this_type: TypeId,
}

impl BodyScope {
    fn lookup(&self, name: &str) -> Option<ModifiedType> {
        self.locals.iter().rev().find_map(|s| s.get(name).copied())
    }
}

impl<'a> Resolver<'a> {
    pub fn new(arena: &'a mut TypeArena, reporter: &'a mut ErrorReporter) -> Self {
        let mut names = HashMap::new();
        for wk in [
            arena.well_known.object,
            arena.well_known.class,
            arena.well_known.generic_class,
            arena.well_known.exception,
            arena.well_known.string,
            arena.well_known.console,
            arena.well_known.array,
            arena.well_known.array_nullable,
        ] {
            names.insert(arena.name(wk).to_string(), wk);
        }
        Resolver {
            arena,
            reporter,
            names,
        }
    }

    /// Runs all three passes over the units, mutating the ASTs in place.
    /// Returns the declared outermost type of each unit, in input order.
    pub fn run(&mut self, units: &mut [CompilationUnit]) -> Vec<TypeId> {
        let mut roots = Vec::with_capacity(units.len());
        for unit in units.iter() {
            let id = self.declare_decl(&unit.declaration, unit.package.clone(), None);
            roots.push(id);
        }
        for (unit, id) in units.iter().zip(&roots) {
            self.bind_decl(&unit.declaration, *id);
        }
        for (unit, id) in units.iter_mut().zip(&roots) {
            self.annotate_decl(&mut unit.declaration, *id);
        }
        roots
    }

    // ----- pass 1: declaration -----

    fn declare_decl(
        &mut self,
        decl: &TypeDecl,
        package: Vec<String>,
        outer: Option<TypeId>,
    ) -> TypeId {
        if let Some(existing) = self.names.get(&decl.name) {
            let existing = *existing;
            if outer.is_none() {
                self.reporter.add_error(
                    ErrorKind::DuplicateDeclaration,
                    format!("type {} is already declared", decl.name),
                    Some(decl.span.clone()),
                );
                return existing;
            }
        }
        let kind = match decl.kind {
            TypeDeclKind::Class => TypeKind::Class {
                extends: Some(self.arena.well_known.object),
            },
            TypeDeclKind::Interface => TypeKind::Interface,
            TypeDeclKind::Attribute => TypeKind::Attribute,
        };
        let modifiers = Modifiers::from_ast(&decl.modifiers);
        let id = self
            .arena
            .declare(&decl.name, package.clone(), modifiers, kind, outer);
        self.names.insert(decl.name.clone(), id);

        for param in &decl.type_params {
            let param_id = self.arena.declare(
                &param.name,
                Vec::new(),
                Modifiers::default(),
                TypeKind::TypeParameter { bounds: Vec::new() },
                Some(id),
            );
            self.arena
                .entry_mut(id)
                .type_params
                .push(ModifiedType::new(param_id));
        }

        for inner in &decl.inner {
            let inner_id = self.declare_decl(inner, package.clone(), Some(id));
            self.arena
                .entry_mut(id)
                .inner
                .push((inner.name.clone(), inner_id));
        }
        id
    }

    // ----- pass 2: binding -----

    fn bind_decl(&mut self, decl: &TypeDecl, id: TypeId) {
        // Type parameter bounds.
        let params = self.arena.entry(id).type_params.clone();
        for (ast_param, param) in decl.type_params.iter().zip(params) {
            let bounds: Vec<TypeId> = ast_param
                .bounds
                .iter()
                .map(|b| self.resolve_ann(b, id).ty)
                .collect();
            if let TypeKind::TypeParameter { bounds: slot } =
                &mut self.arena.entry_mut(param.ty).kind
            {
                *slot = bounds;
            }
        }

        if let Some(extends) = &decl.extends {
            let parent = self.resolve_ann(extends, id);
            if self.arena.is_class(parent.ty) {
                self.arena.entry_mut(id).kind = TypeKind::Class {
                    extends: Some(parent.ty),
                };
            } else {
                self.reporter.add_error(
                    ErrorKind::NotASubtype,
                    format!("{} cannot extend a non-class type", decl.name),
                    Some(extends.span.clone()),
                );
            }
        }

        for implemented in &decl.implements {
            let interface = self.resolve_ann(implemented, id);
            if self.arena.is_interface(interface.ty) {
                self.arena.entry_mut(id).interfaces.push(interface.ty);
            } else {
                self.reporter.add_error(
                    ErrorKind::NotASubtype,
                    format!("{} is not an interface", self.arena.qualified_name(interface.ty)),
                    Some(implemented.span.clone()),
                );
            }
        }

        for field in &decl.fields {
            let mut ty = self.resolve_ann(&field.ty, id);
            ty.modifiers = ty.modifiers.with(Modifiers::from_ast(&field.modifiers));
            if decl.kind == TypeDeclKind::Interface && !ty.modifiers.is_constant() {
                self.reporter.add_error(
                    ErrorKind::DuplicateDeclaration,
                    format!("interface field {} must be constant", field.name),
                    Some(field.span.clone()),
                );
            }
            if self
                .arena
                .entry(id)
                .fields
                .iter()
                .any(|f| f.name == field.name)
            {
                self.reporter.add_error(
                    ErrorKind::DuplicateDeclaration,
                    format!("field {} is already declared", field.name),
                    Some(field.span.clone()),
                );
                continue;
            }
            self.arena.entry_mut(id).fields.push(FieldEntry {
                name: field.name.clone(),
                ty,
                span: field.span.clone(),
                unused: field.unused,
                has_init: field.init.is_some(),
                const_value: None,
            });
            self.arena.entry_mut(id).referenced.push(ty.ty);
        }

        for (decl_index, method) in decl.methods.iter().enumerate() {
            self.bind_method(method, id, decl_index);
        }

        // Classes without a declared create get the default one.
        if decl.kind == TypeDeclKind::Class
            && !self
                .arena
                .entry(id)
                .methods
                .iter()
                .any(|s| self.arena.signature(*s).is_create())
        {
            self.arena.add_signature(MethodSignature {
                name: "create".to_string(),
                outer: id,
                modifiers: Modifiers::PUBLIC,
                param_names: Vec::new(),
                params: Vec::new(),
                returns: vec![ModifiedType::new(id)],
                span: decl.span.clone(),
                decl_index: SYNTHESIZED,
                is_import: false,
                is_export: false,
                unused: false,
            });
        }

        // Destroy and copy are synthesized for every class that does not
        // declare them; their bodies are generated during TAC build.
        if decl.kind == TypeDeclKind::Class {
            for (name, returns) in [
                ("destroy", Vec::new()),
                ("copy", vec![ModifiedType::new(id)]),
            ] {
                let declared = self
                    .arena
                    .entry(id)
                    .methods
                    .iter()
                    .any(|s| self.arena.signature(*s).name == name);
                if !declared {
                    self.arena.add_signature(MethodSignature {
                        name: name.to_string(),
                        outer: id,
                        modifiers: Modifiers::PUBLIC,
                        param_names: Vec::new(),
                        params: Vec::new(),
                        returns,
                        span: decl.span.clone(),
                        decl_index: SYNTHESIZED,
                        is_import: false,
                        is_export: false,
                        unused: false,
                    });
                }
            }
        }

        for inner in &decl.inner {
            let inner_id = self
                .arena
                .entry(id)
                .inner
                .iter()
                .find(|(name, _)| *name == inner.name)
                .map(|(_, t)| *t)
                .expect("inner type declared in pass 1");
            self.bind_decl(inner, inner_id);
        }
    }

    fn bind_method(&mut self, method: &MethodDecl, id: TypeId, decl_index: usize) {
        let mut param_names = Vec::with_capacity(method.params.len());
        let mut params = Vec::with_capacity(method.params.len());
        for p in &method.params {
            param_names.push(p.name.clone());
            let mut ty = self.resolve_ann(&p.ty, id);
            ty.modifiers = ty.modifiers.with(Modifiers::from_ast(&p.modifiers));
            params.push(ty);
            self.arena.entry_mut(id).referenced.push(ty.ty);
        }
        let returns: Vec<ModifiedType> = method
            .returns
            .iter()
            .map(|r| {
                let ty = self.resolve_ann(r, id);
                self.arena.entry_mut(id).referenced.push(ty.ty);
                ty
            })
            .collect();

        let duplicate = self.arena.entry(id).methods.iter().any(|s| {
            let sig = self.arena.signature(*s);
            sig.name == method.name
                && sig.params.len() == params.len()
                && sig.params.iter().zip(&params).all(|(a, b)| a.ty == b.ty)
        });
        if duplicate {
            self.reporter.add_error(
                ErrorKind::DuplicateDeclaration,
                format!("method {} is already declared with these parameters", method.name),
                Some(method.span.clone()),
            );
            return;
        }

        let returns = if method.name == "create" && returns.is_empty() {
            vec![ModifiedType::new(id)]
        } else {
            returns
        };

        self.arena.add_signature(MethodSignature {
            name: method.name.clone(),
            outer: id,
            modifiers: Modifiers::from_ast(&method.modifiers),
            param_names,
            params,
            returns,
            span: method.span.clone(),
            decl_index,
            is_import: method.is_import,
            is_export: method.is_export,
            unused: method.unused,
        });
    }

    // ----- pass 3: body annotation -----

    fn annotate_decl(&mut self, decl: &mut TypeDecl, id: TypeId) {
        // Constant fields fold to literals; other initializers are
        // annotated for the field-initializer method. Lookup is by name,
        // since duplicate declarations were dropped during binding.
        for field in decl.fields.iter_mut() {
            if let Some(init) = &mut field.init {
                let mut scope = BodyScope {
                    locals: vec![HashMap::new()],
                    this_type: id,
                };
                let value = self.annotate_expr(init, &mut scope);
                let Some(declared) = self
                    .arena
                    .entry(id)
                    .fields
                    .iter()
                    .find(|f| f.name == field.name)
                    .map(|f| f.ty)
                else {
                    continue;
                };
                if !self.arena.is_assignable(value, declared) {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        format!(
                            "initializer of field {} is not a subtype of its declared type",
                            field.name
                        ),
                        Some(field.span.clone()),
                    );
                }
                if declared.modifiers.is_constant() {
                    if let Some(value) = fold_constant(init) {
                        if let Some(slot) = self
                            .arena
                            .entry_mut(id)
                            .fields
                            .iter_mut()
                            .find(|f| f.name == field.name)
                        {
                            slot.const_value = Some(value);
                        }
                    }
                }
            }
        }

        let method_count = decl.methods.len();
        for decl_index in 0..method_count {
            let sig_id = self.arena.entry(id).methods.iter().copied().find(|s| {
                self.arena.signature(*s).decl_index == decl_index
            });
            let Some(sig_id) = sig_id else { continue };
            let signature = self.arena.signature(sig_id).clone();
            let method = &mut decl.methods[decl_index];
            if let Some(body) = &mut method.body {
                let mut scope = BodyScope {
                    locals: vec![HashMap::new()],
                    this_type: id,
                };
                for (name, ty) in signature.param_names.iter().zip(&signature.params) {
                    scope.locals[0].insert(name.clone(), *ty);
                }
                let mut stmts = std::mem::take(&mut body.stmts);
                for stmt in &mut stmts {
                    self.annotate_stmt(stmt, &mut scope, &signature);
                }
                body.stmts = stmts;
            }
        }

        for inner in &mut decl.inner {
            let inner_id = self
                .names
                .get(&inner.name)
                .copied()
                .expect("inner type declared in pass 1");
            self.annotate_decl(inner, inner_id);
        }
    }

    fn annotate_stmt(
        &mut self,
        stmt: &mut Stmt,
        scope: &mut BodyScope,
        signature: &MethodSignature,
    ) {
        match stmt {
            Stmt::Expr(s) => {
                self.annotate_expr(&mut s.expr, scope);
            }
            Stmt::LocalDecl(s) => {
                let mut declared = self.resolve_ann(&s.ty, scope.this_type);
                declared.modifiers = declared.modifiers.with(Modifiers::from_ast(&s.modifiers));
                s.ty_ref = Some(self.arena.type_ref(declared));
                self.arena
                    .entry_mut(scope.this_type)
                    .referenced
                    .push(declared.ty);
                if let Some(init) = &mut s.init {
                    let value = self.annotate_expr(init, scope);
                    if !self.arena.is_assignable(value, declared) {
                        self.reporter.add_error(
                            ErrorKind::NotASubtype,
                            format!("initializer of {} is not a subtype of its declared type", s.name),
                            Some(s.span.clone()),
                        );
                    }
                }
                scope
                    .locals
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(s.name.clone(), declared);
            }
            Stmt::Block(block) => {
                scope.locals.push(HashMap::new());
                for stmt in &mut block.stmts {
                    self.annotate_stmt(stmt, scope, signature);
                }
                scope.locals.pop();
            }
            Stmt::If(s) => {
                let cond = self.annotate_expr(&mut s.cond, scope);
                self.require_boolean(cond, &s.span);
                self.annotate_stmt(&mut s.then_branch, scope, signature);
                if let Some(else_branch) = &mut s.else_branch {
                    self.annotate_stmt(else_branch, scope, signature);
                }
            }
            Stmt::While(s) => {
                let cond = self.annotate_expr(&mut s.cond, scope);
                self.require_boolean(cond, &s.span);
                self.annotate_stmt(&mut s.body, scope, signature);
            }
            Stmt::For(s) => {
                scope.locals.push(HashMap::new());
                if let Some(init) = &mut s.init {
                    self.annotate_stmt(init, scope, signature);
                }
                if let Some(cond) = &mut s.cond {
                    let ty = self.annotate_expr(cond, scope);
                    self.require_boolean(ty, &s.span);
                }
                if let Some(update) = &mut s.update {
                    self.annotate_expr(update, scope);
                }
                self.annotate_stmt(&mut s.body, scope, signature);
                scope.locals.pop();
            }
            Stmt::Return(s) => {
                let values: Vec<ModifiedType> = s
                    .values
                    .iter_mut()
                    .map(|v| self.annotate_expr(v, scope))
                    .collect();
                if values.len() != signature.returns.len()
                    || values
                        .iter()
                        .zip(&signature.returns)
                        .any(|(v, r)| !self.arena.is_assignable(*v, *r))
                {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        format!(
                            "return values do not match the declared return types of {}",
                            signature.name
                        ),
                        Some(s.span.clone()),
                    );
                }
            }
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Throw(s) => {
                let value = self.annotate_expr(&mut s.value, scope);
                if !self.arena.is_subtype(value.ty, self.arena.well_known.exception) {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        "thrown value is not an Exception".to_string(),
                        Some(s.span.clone()),
                    );
                }
            }
            Stmt::Try(s) => {
                scope.locals.push(HashMap::new());
                for stmt in &mut s.block.stmts {
                    self.annotate_stmt(stmt, scope, signature);
                }
                scope.locals.pop();
                for catch in &mut s.catches {
                    let caught = self.resolve_ann(&catch.ty, scope.this_type);
                    catch.ty_ref = Some(self.arena.type_ref(caught));
                    if !self
                        .arena
                        .is_subtype(caught.ty, self.arena.well_known.exception)
                    {
                        self.reporter.add_error(
                            ErrorKind::NotASubtype,
                            "catch type is not an Exception".to_string(),
                            Some(catch.span.clone()),
                        );
                    }
                    scope.locals.push(HashMap::new());
                    scope
                        .locals
                        .last_mut()
                        .expect("scope stack is never empty")
                        .insert(catch.name.clone(), caught);
                    for stmt in &mut catch.block.stmts {
                        self.annotate_stmt(stmt, scope, signature);
                    }
                    scope.locals.pop();
                }
                if let Some(recover) = &mut s.recover {
                    scope.locals.push(HashMap::new());
                    for stmt in &mut recover.stmts {
                        self.annotate_stmt(stmt, scope, signature);
                    }
                    scope.locals.pop();
                }
                if let Some(finally) = &mut s.finally {
                    scope.locals.push(HashMap::new());
                    for stmt in &mut finally.stmts {
                        self.annotate_stmt(stmt, scope, signature);
                    }
                    scope.locals.pop();
                }
            }
        }
    }

    fn annotate_expr(&mut self, expr: &mut Expr, scope: &mut BodyScope) -> ModifiedType {
        let result = self.annotate_expr_inner(expr, scope);
        expr.ty = Some(self.arena.type_ref(result));
        // Anything a body mentions is a reference of the enclosing type;
        // the module's closure dedupes.
        self.arena
            .entry_mut(scope.this_type)
            .referenced
            .push(result.ty);
        result
    }

    fn annotate_expr_inner(&mut self, expr: &mut Expr, scope: &mut BodyScope) -> ModifiedType {
        let unknown = ModifiedType::new(self.arena.well_known.unknown);
        let span = expr.span.clone();
        match &mut expr.kind {
            ExprKind::Literal(literal) => ModifiedType::new(self.literal_type(literal)),
            ExprKind::This => ModifiedType::new(scope.this_type),
            ExprKind::Name(name) => {
                if let Some(local) = scope.lookup(name) {
                    return local;
                }
                if let Some((_, field)) = self.arena.find_field(scope.this_type, name) {
                    return field.ty;
                }
                // A bare type name (receiver of a static-style call).
                if let Some(ty) = self.names.get(name.as_str()) {
                    return ModifiedType::new(*ty);
                }
                self.reporter.add_error(
                    ErrorKind::UnresolvedName,
                    format!("{} cannot be resolved", name),
                    Some(span),
                );
                unknown
            }
            ExprKind::Field { object, name } => {
                let object_ty = self.annotate_expr(object, scope);
                match self.arena.find_field(object_ty.ty, name) {
                    Some((_, field)) => field.ty,
                    None => {
                        self.reporter.add_error(
                            ErrorKind::UnresolvedName,
                            format!(
                                "{} has no field {}",
                                self.arena.qualified_name(object_ty.ty),
                                name
                            ),
                            Some(span),
                        );
                        unknown
                    }
                }
            }
            ExprKind::Call {
                object,
                method,
                type_args,
                args,
            } => {
                let receiver = match object {
                    Some(o) => self.annotate_expr(o, scope),
                    None => ModifiedType::new(scope.this_type),
                };
                let arg_types: Vec<ModifiedType> = args
                    .iter_mut()
                    .map(|a| self.annotate_expr(a, scope))
                    .collect();
                if !type_args.is_empty() {
                    // Method-level generics ride on class instantiation.
                    self.reporter.add_error(
                        ErrorKind::BadGenericArity,
                        format!("method {} does not take type arguments", method),
                        Some(span.clone()),
                    );
                }
                match self
                    .arena
                    .get_matching_method(receiver.ty, method, &arg_types)
                {
                    Ok(sig) => {
                        expr.method = Some(MethodRef(sig.0));
                        self.sequence_result(self.arena.signature(sig).returns.clone())
                    }
                    Err(MethodLookupError::Ambiguous) => {
                        self.reporter.add_error(
                            ErrorKind::AmbiguousOverload,
                            format!(
                                "call to {} on {} is ambiguous",
                                method,
                                self.arena.qualified_name(receiver.ty)
                            ),
                            Some(span),
                        );
                        unknown
                    }
                    Err(MethodLookupError::NotFound) => {
                        self.reporter.add_error(
                            ErrorKind::NoMatchingMethod,
                            format!(
                                "no matching method {} on {}",
                                method,
                                self.arena.qualified_name(receiver.ty)
                            ),
                            Some(span),
                        );
                        unknown
                    }
                }
            }
            ExprKind::Create { ty, args } => {
                let ty = ty.clone();
                let created = self.resolve_ann(&ty, scope.this_type);
                let arg_types: Vec<ModifiedType> = args
                    .iter_mut()
                    .map(|a| self.annotate_expr(a, scope))
                    .collect();
                match self
                    .arena
                    .get_matching_method(created.ty, "create", &arg_types)
                {
                    Ok(sig) => {
                        expr.method = Some(MethodRef(sig.0));
                        ModifiedType::new(created.ty)
                    }
                    Err(error) => {
                        let kind = match error {
                            MethodLookupError::Ambiguous => ErrorKind::AmbiguousOverload,
                            MethodLookupError::NotFound => ErrorKind::NoMatchingMethod,
                        };
                        self.reporter.add_error(
                            kind,
                            format!(
                                "no matching create on {}",
                                self.arena.qualified_name(created.ty)
                            ),
                            Some(span),
                        );
                        unknown
                    }
                }
            }
            ExprKind::NewArray {
                element,
                sizes,
                nullable,
            } => {
                let element = element.clone();
                let nullable = *nullable;
                let base = self.resolve_ann(&element, scope.this_type);
                let int = self.arena.primitive(Primitive::Int);
                for size in sizes.iter_mut() {
                    let ty = self.annotate_expr(size, scope);
                    if !self.arena.is_subtype(ty.ty, int) {
                        self.reporter.add_error(
                            ErrorKind::NotASubtype,
                            "array dimension is not an int".to_string(),
                            Some(span.clone()),
                        );
                    }
                }
                let dims = sizes.len().max(1);
                ModifiedType::new(self.arena.array_with_dims(base.ty, dims, nullable))
            }
            ExprKind::Index { array, indices } => {
                let array_ty = self.annotate_expr(array, scope);
                for index in indices.iter_mut() {
                    self.annotate_expr(index, scope);
                }
                match self.arena.kind(array_ty.ty) {
                    TypeKind::Array { base, nullable } => {
                        let (base, nullable) = (*base, *nullable);
                        let mut result = ModifiedType::new(base);
                        if nullable {
                            result.modifiers = result.modifiers.with(Modifiers::NULLABLE);
                        }
                        result
                    }
                    _ => {
                        self.reporter.add_error(
                            ErrorKind::NoMatchingMethod,
                            format!(
                                "{} cannot be indexed",
                                self.arena.qualified_name(array_ty.ty)
                            ),
                            Some(span),
                        );
                        unknown
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let left = self.annotate_expr(lhs, scope);
                let right = self.annotate_expr(rhs, scope);
                self.binary_type(op, left, right, &span)
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let ty = self.annotate_expr(operand, scope);
                match (op, self.arena.kind(ty.ty)) {
                    (UnaryOp::Not, TypeKind::Primitive(Primitive::Boolean)) => ty,
                    (UnaryOp::Negate, TypeKind::Primitive(p))
                        if p.is_signed() || p.is_floating() =>
                    {
                        ty
                    }
                    (UnaryOp::Complement, TypeKind::Primitive(p)) if p.is_integer() => ty,
                    _ => {
                        self.reporter.add_error(
                            ErrorKind::NoMatchingMethod,
                            format!("operator cannot be applied to {}", self.arena.qualified_name(ty.ty)),
                            Some(span),
                        );
                        unknown
                    }
                }
            }
            ExprKind::Cast { ty, expr: inner } => {
                let ty = ty.clone();
                let target = self.resolve_ann(&ty, scope.this_type);
                let source = self.annotate_expr(inner, scope);
                let both_primitive =
                    self.arena.is_primitive(source.ty) && self.arena.is_primitive(target.ty);
                let related = self.arena.is_subtype(source.ty, target.ty)
                    || self.arena.is_subtype(target.ty, source.ty);
                if !both_primitive && !related && self.arena.kind(source.ty) != &TypeKind::Unknown {
                    self.reporter.add_error(
                        ErrorKind::IllegalCast,
                        format!(
                            "cannot cast {} to {}",
                            self.arena.qualified_name(source.ty),
                            self.arena.qualified_name(target.ty)
                        ),
                        Some(span),
                    );
                }
                target
            }
            ExprKind::Assign { target, value } => {
                let target_ty = self.annotate_expr(target, scope);
                let value_ty = self.annotate_expr(value, scope);
                if !self.arena.is_assignable(value_ty, target_ty) {
                    self.reporter.add_error(
                        ErrorKind::IllegalAssignment,
                        "assigned value is not a subtype of the target".to_string(),
                        Some(span),
                    );
                }
                target_ty
            }
        }
    }

    fn binary_type(
        &mut self,
        op: BinaryOp,
        left: ModifiedType,
        right: ModifiedType,
        span: &shadow_ast::Span,
    ) -> ModifiedType {
        let boolean = ModifiedType::new(self.arena.primitive(Primitive::Boolean));
        let unknown = ModifiedType::new(self.arena.well_known.unknown);
        use BinaryOp::*;
        match op {
            Add | Subtract | Multiply | Divide | Remainder | BitAnd | BitOr | BitXor
            | ShiftLeft | ShiftRight => {
                // No implicit numeric widening: both sides must agree.
                if left.ty == right.ty && self.arena.is_primitive(left.ty) {
                    left
                } else {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        format!(
                            "operands {} and {} do not match; an explicit cast is required",
                            self.arena.qualified_name(left.ty),
                            self.arena.qualified_name(right.ty)
                        ),
                        Some(span.clone()),
                    );
                    unknown
                }
            }
            LessThan | LessOrEqual | GreaterThan | GreaterOrEqual => {
                if left.ty == right.ty && self.arena.is_primitive(left.ty) {
                    boolean
                } else {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        "comparison operands do not match".to_string(),
                        Some(span.clone()),
                    );
                    unknown
                }
            }
            Equal | NotEqual => {
                if self.arena.is_subtype(left.ty, right.ty)
                    || self.arena.is_subtype(right.ty, left.ty)
                    || left.ty == self.arena.well_known.null
                    || right.ty == self.arena.well_known.null
                {
                    boolean
                } else {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        "equality operands are unrelated types".to_string(),
                        Some(span.clone()),
                    );
                    unknown
                }
            }
            CondAnd | CondOr => {
                let b = self.arena.primitive(Primitive::Boolean);
                if left.ty == b && right.ty == b {
                    boolean
                } else {
                    self.reporter.add_error(
                        ErrorKind::NotASubtype,
                        "logical operands must be boolean".to_string(),
                        Some(span.clone()),
                    );
                    unknown
                }
            }
        }
    }

    fn require_boolean(&mut self, ty: ModifiedType, span: &shadow_ast::Span) {
        let boolean = self.arena.primitive(Primitive::Boolean);
        if ty.ty != boolean && self.arena.kind(ty.ty) != &TypeKind::Unknown {
            self.reporter.add_error(
                ErrorKind::NotASubtype,
                "condition is not a boolean".to_string(),
                Some(span.clone()),
            );
        }
    }

    fn literal_type(&self, literal: &Literal) -> TypeId {
        match literal {
            Literal::Boolean(_) => self.arena.primitive(Primitive::Boolean),
            Literal::Byte(_) => self.arena.primitive(Primitive::Byte),
            Literal::UByte(_) => self.arena.primitive(Primitive::UByte),
            Literal::Short(_) => self.arena.primitive(Primitive::Short),
            Literal::UShort(_) => self.arena.primitive(Primitive::UShort),
            Literal::Int(_) => self.arena.primitive(Primitive::Int),
            Literal::UInt(_) => self.arena.primitive(Primitive::UInt),
            Literal::Long(_) => self.arena.primitive(Primitive::Long),
            Literal::ULong(_) => self.arena.primitive(Primitive::ULong),
            Literal::Code(_) => self.arena.primitive(Primitive::Code),
            Literal::Float(_) => self.arena.primitive(Primitive::Float),
            Literal::Double(_) => self.arena.primitive(Primitive::Double),
            Literal::String(_) => self.arena.well_known.string,
            Literal::Null => self.arena.well_known.null,
        }
    }

    fn sequence_result(&mut self, returns: Vec<ModifiedType>) -> ModifiedType {
        match returns.len() {
            0 => ModifiedType::new(self.arena.well_known.void),
            1 => returns[0],
            _ => ModifiedType::new(self.arena.sequence(returns)),
        }
    }

    /// Resolves a syntactic annotation in the scope of `context` (whose type
    /// parameters are visible).
    pub fn resolve_ann(&mut self, ann: &TypeAnn, context: TypeId) -> ModifiedType {
        let name = ann.segments.last().map(String::as_str).unwrap_or("");

        let mut base = if let Some(p) = Primitive::from_name(name) {
            Some(self.arena.primitive(p))
        } else {
            self.arena
                .entry(context)
                .type_params
                .iter()
                .find(|p| self.arena.name(p.ty) == name)
                .map(|p| p.ty)
                .or_else(|| self.names.get(name).copied())
        };

        // Inner types of the context are visible unqualified.
        if base.is_none() {
            base = self
                .arena
                .entry(context)
                .inner
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| *t);
        }

        let Some(mut ty) = base else {
            self.reporter.add_error(
                ErrorKind::UnresolvedName,
                format!("type {} cannot be resolved", name),
                Some(ann.span.clone()),
            );
            return ModifiedType::new(self.arena.well_known.unknown);
        };

        if !ann.type_args.is_empty() {
            let args: Vec<ModifiedType> = ann
                .type_args
                .iter()
                .map(|a| self.resolve_ann(a, context))
                .collect();
            let expected = self.arena.entry(ty).type_params.len();
            if expected != args.len() {
                self.reporter.add_error(
                    ErrorKind::BadGenericArity,
                    format!(
                        "{} expects {} type arguments, got {}",
                        name,
                        expected,
                        args.len()
                    ),
                    Some(ann.span.clone()),
                );
                return ModifiedType::new(self.arena.well_known.unknown);
            }
            ty = self
                .arena
                .instantiate(ty, &args)
                .expect("arity checked above");
        } else if !self.arena.entry(ty).type_params.is_empty()
            && !matches!(self.arena.kind(ty), TypeKind::TypeParameter { .. })
        {
            self.reporter.add_error(
                ErrorKind::BadGenericArity,
                format!("{} requires type arguments", name),
                Some(ann.span.clone()),
            );
        }

        if ann.dims > 0 {
            ty = self.arena.array_with_dims(ty, ann.dims, ann.nullable);
        }

        let mut modifiers = Modifiers::default();
        if ann.nullable && ann.dims == 0 {
            modifiers = modifiers.with(Modifiers::NULLABLE);
        }
        ModifiedType { ty, modifiers }
    }
}

/// Folds an annotated initializer to a literal when it is compile-time
/// constant: literals themselves and integer/boolean binary operations over
/// folded operands.
pub fn fold_constant(expr: &Expr) -> Option<Literal> {
    match &expr.kind {
        ExprKind::Literal(literal) => Some(literal.clone()),
        ExprKind::Unary { op, operand } => {
            let value = fold_constant(operand)?;
            match (op, value) {
                (UnaryOp::Negate, Literal::Int(v)) => Some(Literal::Int(v.wrapping_neg())),
                (UnaryOp::Negate, Literal::Long(v)) => Some(Literal::Long(v.wrapping_neg())),
                (UnaryOp::Negate, Literal::Double(v)) => Some(Literal::Double(-v)),
                (UnaryOp::Not, Literal::Boolean(v)) => Some(Literal::Boolean(!v)),
                (UnaryOp::Complement, Literal::Int(v)) => Some(Literal::Int(!v)),
                (UnaryOp::Complement, Literal::Long(v)) => Some(Literal::Long(!v)),
                _ => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let left = fold_constant(lhs)?;
            let right = fold_constant(rhs)?;
            match (left, right) {
                (Literal::Int(a), Literal::Int(b)) => {
                    let v = match op {
                        BinaryOp::Add => a.wrapping_add(b),
                        BinaryOp::Subtract => a.wrapping_sub(b),
                        BinaryOp::Multiply => a.wrapping_mul(b),
                        BinaryOp::Divide => a.checked_div(b)?,
                        BinaryOp::Remainder => a.checked_rem(b)?,
                        BinaryOp::BitAnd => a & b,
                        BinaryOp::BitOr => a | b,
                        BinaryOp::BitXor => a ^ b,
                        BinaryOp::ShiftLeft => a.wrapping_shl(b as u32),
                        BinaryOp::ShiftRight => a.wrapping_shr(b as u32),
                        _ => return None,
                    };
                    Some(Literal::Int(v))
                }
                (Literal::Boolean(a), Literal::Boolean(b)) => {
                    let v = match op {
                        BinaryOp::BitAnd | BinaryOp::CondAnd => a && b,
                        BinaryOp::BitOr | BinaryOp::CondOr => a || b,
                        BinaryOp::BitXor => a != b,
                        BinaryOp::Equal => a == b,
                        BinaryOp::NotEqual => a != b,
                        _ => return None,
                    };
                    Some(Literal::Boolean(v))
                }
                _ => None,
            }
        }
        _ => None,
    }
}
