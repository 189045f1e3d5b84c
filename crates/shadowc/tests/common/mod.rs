//! Shared helpers for the integration tests: AST construction shorthands
//! (standing in for the external front end) and a small harness that runs
//! the full resolve/build/analyze/emit pipeline in process.

#![allow(dead_code)]

use shadow_ast::*;
use shadowc::analysis;
use shadowc::diagnostics::ErrorReporter;
use shadowc::emit;
use shadowc::tac::{TacBuilder, TacModule};
use shadowc::typecheck::{Resolver, TypeArena, TypeId};

/// A distinct non-empty span per call, so synthesized nodes (empty spans)
/// stay distinguishable from "source" nodes.
pub fn span() -> Span {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    let at = NEXT.fetch_add(4, Ordering::Relaxed);
    at..at + 3
}

pub fn ann(name: &str) -> TypeAnn {
    TypeAnn::simple(name, span())
}

pub fn array_ann(name: &str) -> TypeAnn {
    TypeAnn {
        dims: 1,
        ..TypeAnn::simple(name, span())
    }
}

pub fn generic_ann(name: &str, args: Vec<TypeAnn>) -> TypeAnn {
    TypeAnn {
        type_args: args,
        ..TypeAnn::simple(name, span())
    }
}

pub fn unit(declaration: TypeDecl) -> CompilationUnit {
    CompilationUnit {
        package: vec!["shadow".to_string(), "test".to_string()],
        imports: Vec::new(),
        declaration,
        span: span(),
    }
}

pub fn class_decl(name: &str) -> TypeDecl {
    TypeDecl {
        kind: TypeDeclKind::Class,
        name: name.to_string(),
        modifiers: vec![Modifier::Public],
        type_params: Vec::new(),
        extends: None,
        implements: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        inner: Vec::new(),
        span: span(),
    }
}

pub fn interface_decl(name: &str) -> TypeDecl {
    TypeDecl {
        kind: TypeDeclKind::Interface,
        ..class_decl(name)
    }
}

pub fn field(name: &str, ty: TypeAnn) -> FieldDecl {
    FieldDecl {
        modifiers: Vec::new(),
        ty,
        name: name.to_string(),
        init: None,
        unused: false,
        span: span(),
    }
}

pub fn method(name: &str, params: Vec<(&str, TypeAnn)>, returns: Vec<TypeAnn>) -> MethodDecl {
    MethodDecl {
        modifiers: vec![Modifier::Public],
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(n, ty)| Param {
                modifiers: Vec::new(),
                ty,
                name: n.to_string(),
                span: span(),
            })
            .collect(),
        returns,
        body: Some(BlockStmt {
            stmts: Vec::new(),
            span: span(),
        }),
        unused: false,
        is_import: false,
        is_export: false,
        span: span(),
    }
}

pub fn body(method: &mut MethodDecl, stmts: Vec<Stmt>) {
    method.body = Some(BlockStmt {
        stmts,
        span: span(),
    });
}

// ----- expressions -----

pub fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, span())
}

pub fn int(value: i32) -> Expr {
    expr(ExprKind::Literal(Literal::Int(value)))
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Literal(Literal::Boolean(value)))
}

pub fn string(value: &str) -> Expr {
    expr(ExprKind::Literal(Literal::String(value.to_string())))
}

pub fn name(text: &str) -> Expr {
    expr(ExprKind::Name(text.to_string()))
}

pub fn call_on(object: Expr, method: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        object: Some(Box::new(object)),
        method: method.to_string(),
        type_args: Vec::new(),
        args,
    })
}

pub fn call_this(method: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        object: None,
        method: method.to_string(),
        type_args: Vec::new(),
        args,
    })
}

pub fn create(ty: TypeAnn, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Create { ty, args })
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    expr(ExprKind::Assign {
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn new_array(element: TypeAnn, sizes: Vec<Expr>) -> Expr {
    expr(ExprKind::NewArray {
        element,
        sizes,
        nullable: false,
    })
}

pub fn index(array: Expr, indices: Vec<Expr>) -> Expr {
    expr(ExprKind::Index {
        array: Box::new(array),
        indices,
    })
}

// ----- statements -----

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        expr: e,
        span: span(),
    })
}

pub fn local(name: &str, ty: TypeAnn, init: Option<Expr>) -> Stmt {
    Stmt::LocalDecl(LocalDeclStmt {
        modifiers: Vec::new(),
        ty,
        name: name.to_string(),
        init,
        ty_ref: None,
        span: span(),
    })
}

pub fn ret(values: Vec<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt {
        values,
        span: span(),
    })
}

pub fn break_stmt() -> Stmt {
    Stmt::Break(BreakStmt { span: span() })
}

pub fn throw(value: Expr) -> Stmt {
    Stmt::Throw(ThrowStmt {
        value,
        span: span(),
    })
}

pub fn if_stmt(cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    Stmt::If(IfStmt {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
        span: span(),
    })
}

pub fn while_stmt(cond: Expr, stmts: Vec<Stmt>) -> Stmt {
    Stmt::While(WhileStmt {
        cond,
        body: Box::new(block(stmts)),
        span: span(),
    })
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(BlockStmt {
        stmts,
        span: span(),
    })
}

pub fn try_stmt(
    stmts: Vec<Stmt>,
    catches: Vec<(TypeAnn, &str, Vec<Stmt>)>,
    finally: Option<Vec<Stmt>>,
) -> Stmt {
    Stmt::Try(Box::new(TryStmt {
        block: BlockStmt {
            stmts,
            span: span(),
        },
        catches: catches
            .into_iter()
            .map(|(ty, name, stmts)| CatchClause {
                ty,
                name: name.to_string(),
                block: BlockStmt {
                    stmts,
                    span: span(),
                },
                ty_ref: None,
                span: span(),
            })
            .collect(),
        recover: None,
        finally: finally.map(|stmts| BlockStmt {
            stmts,
            span: span(),
        }),
        span: span(),
    }))
}

// ----- pipeline harness -----

pub struct Compiled {
    pub arena: TypeArena,
    pub roots: Vec<TypeId>,
    pub modules: Vec<TacModule>,
    pub reporter: ErrorReporter,
    pub ir: Vec<String>,
}

/// Resolves, builds, analyzes, and emits a whole program.
pub fn compile_program(mut units: Vec<CompilationUnit>) -> anyhow::Result<Compiled> {
    let _guard = shadowc::diagnostics::suppress();
    let mut arena = TypeArena::new();
    let mut reporter = ErrorReporter::new();
    let roots = Resolver::new(&mut arena, &mut reporter).run(&mut units);

    let mut modules = Vec::new();
    for (unit, root) in units.iter().zip(&roots) {
        modules.push(TacBuilder::build(&mut arena, unit, *root));
    }
    for module in &modules {
        analysis::optimize_module(&arena, module, &mut reporter);
    }
    let mut ir = Vec::new();
    for module in &modules {
        ir.push(emit::emit_module(&arena, module)?);
    }
    Ok(Compiled {
        arena,
        roots,
        modules,
        reporter,
        ir,
    })
}

/// Convenience wrapper for single-unit programs.
pub fn compile_one(declaration: TypeDecl) -> anyhow::Result<Compiled> {
    compile_program(vec![unit(declaration)])
}
