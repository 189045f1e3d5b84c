//! TAC construction checks: generated methods, cleanup routing, and
//! short-circuit lowering.

mod common;

use anyhow::Result;
use common::*;
use shadow_ast::BinaryOp;
use shadowc::tac::{TacKind, TacMethod};

#[test]
fn classes_get_generated_methods_alongside_declared_ones() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(&mut run, vec![ret(vec![])]);
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    let module = &compiled.modules[0];

    // Field initializer, run, default create, destroy, copy.
    assert_eq!(module.methods.len(), 5);
    assert_eq!(module.methods[0].special_name.as_deref(), Some("_fields"));
    let names: Vec<String> = module
        .methods
        .iter()
        .filter_map(|m| m.signature)
        .map(|s| compiled.arena.signature(s).name.clone())
        .collect();
    assert_eq!(names, vec!["run", "create", "destroy", "copy"]);
    Ok(())
}

#[test]
fn finally_is_visited_once_per_exit_path() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![
            local("count", ann("int"), Some(int(0))),
            while_stmt(
                boolean(true),
                vec![try_stmt(
                    vec![if_stmt(boolean(true), break_stmt(), None)],
                    vec![],
                    Some(vec![expr_stmt(assign(
                        name("count"),
                        binary(BinaryOp::Add, name("count"), int(1)),
                    ))]),
                )],
            ),
            ret(vec![]),
        ],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let run_method = find_method(&compiled, "run");
    let phi = cleanup_phi(run_method).expect("the finally has a cleanup phi");
    // One entry for the break, one for the normal fall-through exit, and
    // each entry's value is the label control resumes at.
    assert_eq!(phi.len(), 2);
    for (value, from) in &phi {
        assert!(matches!(run_method.node(*value).kind, TacKind::Label));
        assert!(matches!(run_method.node(*from).kind, TacKind::Label));
    }
    let (first, second) = (phi[0].0, phi[1].0);
    assert_ne!(first, second);

    // The shared cleanup code dispatches back through an indirect branch
    // over block addresses.
    let ir = &compiled.ir[0];
    assert!(ir.contains("indirectbr i8*"));
    assert_eq!(ir.matches("blockaddress(").count(), 2);
    Ok(())
}

#[test]
fn unwinding_calls_mark_enclosing_finallys() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut poke = method("poke", vec![], vec![]);
    body(&mut poke, vec![ret(vec![])]);
    decl.methods.push(poke);
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![try_stmt(
            vec![expr_stmt(call_this("poke", vec![]))],
            vec![],
            Some(vec![expr_stmt(call_this("poke", vec![]))]),
        )],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let run_method = find_method(&compiled, "run");
    // The call inside the protected region makes the finally an unwind
    // target, so the unwind path gets its cleanup pad and resume.
    assert!(run_method
        .iter()
        .any(|n| matches!(run_method.node(n).kind, TacKind::CleanupPad)));
    assert!(run_method
        .iter()
        .any(|n| matches!(run_method.node(n).kind, TacKind::Resume { .. })));
    // And the protected call itself becomes an invoke.
    assert!(run_method.iter().any(|n| matches!(
        run_method.node(n).kind,
        TacKind::Call {
            landing: Some(_),
            ..
        }
    )));
    let ir = &compiled.ir[0];
    assert!(ir.contains("invoke"));
    assert!(ir.contains("cleanuppad"));
    assert!(ir.contains("cleanupret"));
    assert!(ir.contains("__shadow_personality_v0"));
    Ok(())
}

#[test]
fn catches_filter_by_exception_class() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![], vec![]);
    body(
        &mut run,
        vec![try_stmt(
            vec![throw(create(ann("Exception"), vec![string("boom")]))],
            vec![(ann("Exception"), "e", vec![ret(vec![])])],
            None,
        )],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);

    let run_method = find_method(&compiled, "run");
    let switch = run_method
        .iter()
        .find(|n| matches!(run_method.node(*n).kind, TacKind::CatchSwitch { .. }))
        .expect("try with catches lowers to a catch switch");
    if let TacKind::CatchSwitch { pads, unwind } = &run_method.node(switch).kind {
        assert_eq!(pads.len(), 1);
        assert!(unwind.is_none());
    }
    let ir = &compiled.ir[0];
    assert!(ir.contains("catchswitch within none"));
    assert!(ir.contains("catchpad within"));
    assert!(ir.contains("@__shadow_catch"));
    Ok(())
}

#[test]
fn short_circuit_operators_lower_to_branches_and_a_phi() -> Result<()> {
    let mut decl = class_decl("Test");
    let mut run = method("run", vec![("a", ann("boolean")), ("b", ann("boolean"))], vec![]);
    body(
        &mut run,
        vec![if_stmt(
            binary(BinaryOp::CondAnd, name("a"), name("b")),
            ret(vec![]),
            None,
        )],
    );
    decl.methods.push(run);

    let compiled = compile_one(decl)?;
    assert_eq!(compiled.reporter.error_count(), 0);
    let ir = &compiled.ir[0];
    assert!(ir.contains("phi i1"));
    // The right-hand side is evaluated only on its own branch.
    assert!(!ir.contains("and i1"));
    Ok(())
}

fn find_method<'a>(compiled: &'a Compiled, name: &str) -> &'a TacMethod {
    compiled.modules[0]
        .methods
        .iter()
        .find(|m| {
            m.signature
                .map(|s| compiled.arena.signature(s).name == name)
                .unwrap_or(false)
        })
        .expect("method was built")
}

fn cleanup_phi(method: &TacMethod) -> Option<Vec<(shadowc::tac::NodeId, shadowc::tac::NodeId)>> {
    method.iter().find_map(|n| match &method.node(n).kind {
        TacKind::Phi { entries }
            if entries
                .iter()
                .all(|(v, _)| matches!(method.node(*v).kind, TacKind::Label)) =>
        {
            Some(entries.clone())
        }
        _ => None,
    })
}
