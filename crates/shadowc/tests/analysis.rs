//! Control-flow and data-flow analysis checks over whole programs.

mod common;

use anyhow::Result;
use common::*;
use shadow_ast::{BinaryOp, Modifier};
use shadowc::diagnostics::ErrorKind;

#[test]
fn unused_private_methods_warn_without_failing() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut helper = method("helper", vec![], vec![]);
    helper.modifiers = vec![Modifier::Private];
    body(&mut helper, vec![ret(vec![])]);
    decl.methods.push(helper);
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![ret(vec![])]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);
    assert!(compiled.reporter.has_kind(ErrorKind::UnusedMethod));
    Ok(())
}

#[test]
fn called_private_methods_do_not_warn() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut helper = method("helper", vec![], vec![]);
    helper.modifiers = vec![Modifier::Private];
    body(&mut helper, vec![ret(vec![])]);
    decl.methods.push(helper);
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![expr_stmt(call_this("helper", vec![]))]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(!compiled.reporter.has_kind(ErrorKind::UnusedMethod));
    Ok(())
}

#[test]
fn unread_fields_warn() -> Result<()> {
    let mut decl = class_decl("Test");
    decl.fields.push(field("forgotten", ann("int")));
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![ret(vec![])]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::UnusedField));
    Ok(())
}

#[test]
fn statements_after_a_return_are_dead_code() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![
            local("x", ann("int"), Some(int(0))),
            ret(vec![]),
            expr_stmt(assign(name("x"), int(1))),
        ],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::DeadCode));
    assert_eq!(compiled.reporter.error_count(), 0);
    Ok(())
}

#[test]
fn non_void_methods_must_return_on_every_path() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut partial = method("pick", vec![], vec![ann("int")]);
    body(
        &mut partial,
        vec![if_stmt(boolean(true), ret(vec![int(5)]), None)],
    );
    decl.methods.push(partial);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::MissingReturn));
    Ok(())
}

#[test]
fn full_return_coverage_passes() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut total = method("pick", vec![], vec![ann("int")]);
    body(
        &mut total,
        vec![if_stmt(
            boolean(true),
            ret(vec![int(5)]),
            Some(ret(vec![int(6)])),
        )],
    );
    decl.methods.push(total);

    let compiled = compile_one(decl)?;
    assert!(!compiled.reporter.has_kind(ErrorKind::MissingReturn));
    assert!(!compiled.reporter.has_kind(ErrorKind::DeadCode));
    assert_eq!(compiled.reporter.error_count(), 0);
    Ok(())
}

#[test]
fn constructors_must_initialize_reference_fields() -> Result<()> {
    let mut decl = class_decl("Bad");
    decl.fields.push(field("name", ann("String")));
    let mut create = method("create", vec![], vec![]);
    body(&mut create, vec![]);
    decl.methods.push(create);

    let compiled = compile_one(decl)?;
    assert!(compiled.reporter.has_kind(ErrorKind::FieldNotInitialized));
    Ok(())
}

#[test]
fn assigning_the_field_satisfies_the_initializer_analysis() -> Result<()> {
    let mut decl = class_decl("Good");
    decl.fields.push(field("name", ann("String")));
    let mut create = method("create", vec![], vec![]);
    body(
        &mut create,
        vec![expr_stmt(assign(name("name"), string("ready")))],
    );
    decl.methods.push(create);

    let compiled = compile_one(decl)?;
    assert!(!compiled.reporter.has_kind(ErrorKind::FieldNotInitialized));
    assert_eq!(compiled.reporter.error_count(), 0);
    Ok(())
}

#[test]
fn nullable_and_primitive_fields_need_no_explicit_assignment() -> Result<()> {
    let mut decl = class_decl("Defaults");
    decl.fields.push(field("count", ann("int")));
    let mut nullable_field = field("label", ann("String"));
    nullable_field.modifiers.push(Modifier::Nullable);
    nullable_field.ty.nullable = true;
    decl.fields.push(nullable_field);
    let mut create = method("create", vec![], vec![]);
    body(
        &mut create,
        vec![expr_stmt(assign(
            name("count"),
            binary(BinaryOp::Add, int(1), int(1)),
        ))],
    );
    decl.methods.push(create);

    let compiled = compile_one(decl)?;
    assert!(!compiled.reporter.has_kind(ErrorKind::FieldNotInitialized));
    assert_eq!(compiled.reporter.error_count(), 0);
    Ok(())
}
