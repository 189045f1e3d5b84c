//! Resolver-level checks: the errors the binding layer accumulates and the
//! annotations it leaves behind.

mod common;

use anyhow::Result;
use common::*;
use shadow_ast::Literal;
use shadowc::diagnostics::ErrorKind;

#[test]
fn unresolved_names_are_reported() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![expr_stmt(name("nowhere"))]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::UnresolvedName));
    Ok(())
}

#[test]
fn null_needs_a_nullable_target() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![local(
            "s",
            ann("String"),
            Some(expr(shadow_ast::ExprKind::Literal(Literal::Null))),
        )],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::NotASubtype));
    Ok(())
}

#[test]
fn nullable_locals_accept_null() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    let mut nullable = ann("String");
    nullable.nullable = true;
    body(
        &mut run,
        vec![local(
            "s",
            nullable,
            Some(expr(shadow_ast::ExprKind::Literal(Literal::Null))),
        )],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);
    Ok(())
}

#[test]
fn mismatched_operands_require_an_explicit_cast() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method(
        "run",
        vec![("a", ann("int")), ("b", ann("long"))],
        vec![],
    );
    body(
        &mut run,
        vec![expr_stmt(binary(
            shadow_ast::BinaryOp::Add,
            name("a"),
            name("b"),
        ))],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::NotASubtype));
    Ok(())
}

#[test]
fn generic_arity_is_enforced() -> Result<()> {
    let mut boxed = class_decl("Box");
    boxed.type_params.push(shadow_ast::TypeParam {
        name: "T".to_string(),
        bounds: Vec::new(),
        span: span(),
    });
    let mut user = class_decl("User");
    user.fields.push(field(
        "value",
        generic_ann("Box", vec![ann("int"), ann("int")]),
    ));

    let compiled = compile_program(vec![unit(boxed), unit(user)])?;
    assert!(compiled.reporter.has_kind(ErrorKind::BadGenericArity));
    Ok(())
}

#[test]
fn unknown_methods_are_distinguished_from_ambiguity() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![expr_stmt(call_this("gone", vec![]))]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::NoMatchingMethod));
    assert!(!compiled.reporter.has_kind(ErrorKind::AmbiguousOverload));
    Ok(())
}

#[test]
fn duplicate_methods_are_rejected() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut first = method("run", vec![("x", ann("int"))], vec![]);
    body(&mut first, vec![ret(vec![])]);
    decl.methods.push(first);
    let mut second = method("run", vec![("y", ann("int"))], vec![]);
    body(&mut second, vec![ret(vec![])]);
    decl.methods.push(second);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::DuplicateDeclaration));
    Ok(())
}

#[test]
fn expressions_are_annotated_with_their_types() -> Result<()> {
    let mut decl = class_decl("Test");
    decl.fields.push(field("count", ann("int")));
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![expr_stmt(assign(name("count"), int(3)))],
    );
    decl.methods.push(run);

    let mut units = vec![unit(decl)];
    let compiled = {
        // Annotate without building so the AST can be inspected.
        let mut arena = shadowc::typecheck::TypeArena::new();
        let mut reporter = shadowc::diagnostics::ErrorReporter::new();
        let _guard = shadowc::diagnostics::suppress();
        shadowc::typecheck::Resolver::new(&mut arena, &mut reporter).run(&mut units);
        (arena, reporter)
    };
    let (arena, reporter) = compiled;
    assert_eq!(reporter.error_count(), 0);

    let run_body = units[0].declaration.methods[0].body.as_ref().unwrap();
    let shadow_ast::Stmt::Expr(stmt) = &run_body.stmts[0] else {
        panic!("expression statement expected");
    };
    let annotated = stmt.expr.ty.expect("assignment is annotated");
    let resolved = arena.resolve_ref(annotated);
    assert_eq!(resolved.ty, arena.primitive(shadowc::typecheck::Primitive::Int));
    Ok(())
}
