//! End-to-end IR emission checks: known programs compile to LLVM text
//! containing the expected definitions, dispatch sequences, and runtime
//! calls.

mod common;

use anyhow::Result;
use common::*;

#[test]
fn hello_world_emits_main_and_print_dispatch() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut main = method("main", vec![("args", array_ann("String"))], vec![]);
    body(
        &mut main,
        vec![expr_stmt(call_on(
            name("Console"),
            "printLine",
            vec![string("hi")],
        ))],
    );
    decl.methods.push(main);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let ir = &compiled.ir[0];
    assert!(ir.contains(
        "define void @\"shadow.test..Test_Mmain_shadow.standard..String_A\""
    ));
    // The literal becomes a private global lifted into a String object.
    assert!(ir.contains("c\"hi\\00\""));
    assert!(ir.contains("@__createString"));
    // Console is reached through its singleton and its method table.
    assert!(ir.contains("shadow.standard..Console.singleton"));
    assert!(ir.contains("%\"shadow.standard..Console.methods\""));
    Ok(())
}

#[test]
fn reference_counts_balance_on_the_normal_exit() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![
            local("other", ann("Test"), Some(create(ann("Test"), vec![]))),
            ret(vec![]),
        ],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let ir = &compiled.ir[0];
    let run_ir = function_body(ir, "shadow.test..Test_Mrun");
    let increments = run_ir.matches("@__incrementRef").count();
    let decrements = run_ir.matches("@__decrementRef").count();
    assert!(increments > 0);
    assert_eq!(increments, decrements);
    Ok(())
}

#[test]
fn throw_lowers_to_the_runtime_throw_helper() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut main = method("main", vec![("args", array_ann("String"))], vec![]);
    body(
        &mut main,
        vec![throw(create(ann("Exception"), vec![string("boom")]))],
    );
    decl.methods.push(main);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let ir = &compiled.ir[0];
    assert!(ir.contains("@__allocate("));
    assert!(ir.contains("shadow.standard..Exception.class"));
    assert!(ir.contains("call void @__shadow_throw"));
    assert!(ir.contains("unreachable"));
    Ok(())
}

#[test]
fn interface_calls_dispatch_through_the_interface_table() -> Result<()> {
    let mut interface = interface_decl("Speaker");
    let mut speak = method("speak", vec![], vec![]);
    speak.body = None;
    interface.methods.push(speak);

    let mut class = class_decl("Dog");
    class.implements.push(ann("Speaker"));
    let mut implementation = method("speak", vec![], vec![]);
    body(&mut implementation, vec![ret(vec![])]);
    class.methods.push(implementation);

    let mut user = class_decl("Kennel");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![
            local("s", ann("Speaker"), Some(create(ann("Dog"), vec![]))),
            expr_stmt(call_on(name("s"), "speak", vec![])),
        ],
    );
    user.methods.push(run);

    let compiled = compile_program(vec![unit(interface), unit(class), unit(user)])?;
    assert_eq!(compiled.reporter.error_count(), 0);

    // Dog's module carries the itable binding its implementation to the
    // interface's slots.
    let dog_ir = &compiled.ir[1];
    assert!(dog_ir.contains("@\"shadow.test..Dog.itable.shadow.test..Speaker\""));
    assert!(dog_ir.contains("define void @\"shadow.test..Dog_Mspeak\""));

    // The call site unpacks the pair and loads the slot.
    let kennel_ir = &compiled.ir[2];
    assert!(kennel_ir.contains("extractvalue { i8*, i8* }"));
    assert!(kennel_ir.contains("[1 x i8*]"));
    Ok(())
}

#[test]
fn distinct_generic_instantiations_land_in_the_generic_set() -> Result<()> {
    let mut boxed = class_decl("Box");
    boxed.type_params.push(shadow_ast::TypeParam {
        name: "T".to_string(),
        bounds: Vec::new(),
        span: span(),
    });

    let mut holder = class_decl("Holder");
    holder
        .fields
        .push(field("a", generic_ann("Box", vec![ann("int")])));
    holder
        .fields
        .push(field("b", generic_ann("Box", vec![ann("String")])));
    let mut create_method = method("create", vec![], vec![]);
    body(
        &mut create_method,
        vec![
            expr_stmt(assign(name("a"), create(generic_ann("Box", vec![ann("int")]), vec![]))),
            expr_stmt(assign(
                name("b"),
                create(generic_ann("Box", vec![ann("String")]), vec![]),
            )),
        ],
    );
    holder.methods.push(create_method);

    let mut compiled = compile_program(vec![unit(boxed), unit(holder)])?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let holder_ir = &compiled.ir[1];
    assert!(holder_ir.contains("@\"shadow.test..Box_Lint_R.class\""));
    assert!(holder_ir.contains("@\"shadow.test..Box_Lshadow.standard..String_R.class\""));
    assert!(holder_ir.contains("@_genericSize = constant i32 2"));

    // Instantiation identity: asking again returns the cached type.
    let box_ty = compiled.roots[0];
    let holder_ty = compiled.roots[1];
    let int = compiled
        .arena
        .primitive(shadowc::typecheck::Primitive::Int);
    let again = compiled
        .arena
        .instantiate(box_ty, &[shadowc::typecheck::ModifiedType::new(int)])?;
    assert_eq!(
        again,
        compiled.arena.entry(holder_ty).fields[0].ty.ty
    );
    Ok(())
}

#[test]
fn arrays_allocate_and_index_through_the_runtime() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![
            local("data", array_ann("int"), Some(new_array(ann("int"), vec![int(10)]))),
            expr_stmt(assign(index(name("data"), vec![int(0)]), int(5))),
            local("x", ann("int"), Some(index(name("data"), vec![int(0)]))),
            ret(vec![]),
        ],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let ir = &compiled.ir[0];
    // Allocation goes through the runtime with the element descriptor and
    // the array travels by value with its dimension.
    assert!(ir.contains("call i8* @__allocateArray("));
    assert!(ir.contains("@\"int.class\""));
    assert!(ir.contains("insertvalue { i8*, [1 x i32] }"));
    // Element access is a typed pointer into the data.
    assert!(ir.contains("getelementptr i32, i32*"));
    // The distinct array instantiation lands in the array set.
    assert!(ir.contains("@_arraySize = constant i32 1"));
    Ok(())
}

/// Extracts one function's definition from the module text.
fn function_body<'a>(ir: &'a str, symbol: &str) -> &'a str {
    let segment = ir
        .split("\ndefine ")
        .skip(1)
        .find(|segment| segment.split('(').next().unwrap_or("").contains(symbol))
        .unwrap_or_else(|| panic!("{} is not defined in the module", symbol));
    let end = segment.find("\n}").unwrap_or(segment.len());
    &segment[..end]
}
