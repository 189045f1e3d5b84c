//! Control-flow and data-flow analyses over TAC.
//!
//! Runs after TAC construction and before emission, in place: nothing is
//! rewritten, but dead code, missing returns, uninitialized fields, and
//! unused declarations are reported through the [`ErrorReporter`].

pub mod cfg;

pub use cfg::ControlFlowGraph;

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::tac::nodes::{CallFunction, LocalId, NodeId, TacKind};
use crate::tac::{TacMethod, TacModule};
use crate::typecheck::{TypeArena, TypeId, TypeKind};
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Key identifying a method independently of generic instantiation.
type MethodKey = (TypeId, String, usize);

/// Runs every analysis over a module and its inner modules.
pub fn optimize_module(arena: &TypeArena, module: &TacModule, reporter: &mut ErrorReporter) {
    if arena.is_interface(module.ty) {
        return;
    }

    let modules = module.all_modules();
    let mut used_fields: HashMap<TypeId, HashSet<String>> = HashMap::new();
    let mut used_private_methods: HashSet<MethodKey> = HashSet::new();

    for class_module in &modules {
        for method in &class_module.methods {
            let graph = ControlFlowGraph::build(method);
            check_dead_code(method, &graph, reporter);
            check_return_coverage(arena, method, &graph, reporter);
            if method
                .signature
                .map(|s| arena.signature(s).is_create())
                .unwrap_or(false)
            {
                check_field_initialization(arena, class_module.ty, method, &graph, reporter);
            }

            // Copy, destroy, and the generated field initializer are
            // synthesized and exhaustive; counting them would mask every
            // unused declaration.
            let excluded = match method.signature {
                Some(sig) => {
                    let signature = arena.signature(sig);
                    signature.is_copy() || signature.is_destroy()
                }
                None => true,
            };
            if !excluded {
                collect_uses(arena, method, &mut used_fields, &mut used_private_methods);
            }
        }
    }

    for class_module in &modules {
        if matches!(arena.kind(class_module.ty), TypeKind::Attribute) {
            continue;
        }
        report_unused_fields(arena, class_module.ty, &used_fields, reporter);
        report_unused_methods(arena, class_module.ty, &used_private_methods, reporter);
    }
}

/// A run is worth a dead-code warning when it is unreachable, contains an
/// operation that came from source (synthesized nodes carry empty spans),
/// and is not cleanup code.
fn check_dead_code(method: &TacMethod, graph: &ControlFlowGraph, reporter: &mut ErrorReporter) {
    let reachable = graph.reachable();
    for index in graph.graph.node_indices() {
        if reachable.contains(&index) {
            continue;
        }
        let run = &graph.graph[index];
        let Some(first_real) = run.nodes.iter().find(|id| {
            let node = method.node(**id);
            !matches!(
                node.kind,
                TacKind::Label | TacKind::NoOp | TacKind::Branch(_) | TacKind::Phi { .. }
            ) && node.span.start != node.span.end
        }) else {
            continue;
        };
        let node = method.node(*first_real);
        if method.is_inside_cleanup(node.block) {
            continue;
        }
        reporter.add_warning(
            ErrorKind::DeadCode,
            "statement is unreachable".to_string(),
            Some(node.span.clone()),
        );
    }
}

/// Every reachable return of a non-void method must carry the declared
/// number of values; the builder lowers a fall-off-the-end exit to an empty
/// return, which this rejects.
fn check_return_coverage(
    arena: &TypeArena,
    method: &TacMethod,
    graph: &ControlFlowGraph,
    reporter: &mut ErrorReporter,
) {
    let Some(sig_id) = method.signature else {
        return;
    };
    let expected = arena.signature(sig_id).returns.len();
    if expected == 0 {
        return;
    }
    let reachable = graph.reachable();
    for index in &reachable {
        for node_id in &graph.graph[*index].nodes {
            if let TacKind::Return { values } = &method.node(*node_id).kind {
                if values.len() != expected {
                    reporter.add_error(
                        ErrorKind::MissingReturn,
                        format!(
                            "not all paths of {} return a value",
                            arena.signature(sig_id).name
                        ),
                        Some(method.node(*node_id).span.clone()),
                    );
                    return;
                }
            }
        }
    }
}

/// True when `node` is a load of the method's `this` parameter.
fn is_this_value(method: &TacMethod, node: NodeId) -> bool {
    match &method.node(node).kind {
        TacKind::Load { reference } => {
            matches!(method.node(*reference).kind, TacKind::VariableRef(LocalId(0)))
        }
        _ => false,
    }
}

/// Forward must-initialize dataflow (join = intersection) over a create:
/// every non-nullable reference field must be definitely assigned before
/// `this` escapes or the create returns.
fn check_field_initialization(
    arena: &TypeArena,
    class: TypeId,
    method: &TacMethod,
    graph: &ControlFlowGraph,
    reporter: &mut ErrorReporter,
) {
    let required: HashSet<String> = arena
        .entry(class)
        .fields
        .iter()
        .filter(|f| {
            !f.ty.modifiers.is_constant()
                && !f.ty.modifiers.is_nullable()
                && arena.is_reference(f.ty.ty)
                && !matches!(arena.kind(f.ty.ty), TypeKind::Array { nullable: true, .. })
        })
        .map(|f| f.name.clone())
        .collect();
    if required.is_empty() {
        return;
    }

    // The generated field initializer definitely assigns every field that
    // has a declared initializer or a primitive/null default.
    let init_assigns: HashSet<String> = arena
        .entry(class)
        .fields
        .iter()
        .filter(|f| {
            !f.ty.modifiers.is_constant()
                && (f.has_init
                    || !arena.is_reference(f.ty.ty)
                    || f.ty.modifiers.is_nullable())
        })
        .map(|f| f.name.clone())
        .collect();

    let gen_of = |node_id: NodeId, state: &mut HashSet<String>| match &method.node(node_id).kind {
        TacKind::Store { reference, .. } => {
            if let TacKind::FieldRef { object, field, .. } = &method.node(*reference).kind {
                if is_this_value(method, *object) {
                    state.insert(field.clone());
                }
            }
        }
        TacKind::Call {
            function: CallFunction::FieldInit(_),
            ..
        } => {
            state.extend(init_assigns.iter().cloned());
        }
        _ => {}
    };

    // Worklist iteration to a fixed point.
    let indices: Vec<NodeIndex> = graph.graph.node_indices().collect();
    let mut out_states: HashMap<NodeIndex, HashSet<String>> = HashMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for index in &indices {
            let mut state: Option<HashSet<String>> = None;
            for pred in graph.graph.neighbors_directed(*index, Direction::Incoming) {
                let pred_out = out_states.get(&pred).cloned().unwrap_or_default();
                state = Some(match state {
                    None => pred_out,
                    Some(s) => s.intersection(&pred_out).cloned().collect(),
                });
            }
            let mut state = state.unwrap_or_default();
            for node_id in &graph.graph[*index].nodes {
                gen_of(*node_id, &mut state);
            }
            if out_states.get(index) != Some(&state) {
                out_states.insert(*index, state);
                changed = true;
            }
        }
    }

    // Second pass: report at the first escape or return that sees an
    // incomplete state.
    let reachable = graph.reachable();
    let mut missing: HashSet<String> = HashSet::new();
    for index in &indices {
        if !reachable.contains(index) {
            continue;
        }
        let mut state: Option<HashSet<String>> = None;
        for pred in graph.graph.neighbors_directed(*index, Direction::Incoming) {
            let pred_out = out_states.get(&pred).cloned().unwrap_or_default();
            state = Some(match state {
                None => pred_out,
                Some(s) => s.intersection(&pred_out).cloned().collect(),
            });
        }
        let mut state = state.unwrap_or_default();
        for node_id in &graph.graph[*index].nodes {
            let escapes = match &method.node(*node_id).kind {
                TacKind::Return { .. } => true,
                TacKind::Call {
                    function: CallFunction::Ref(reference),
                    ..
                } => match &method.node(*reference).kind {
                    TacKind::MethodRef {
                        object: Some(object),
                        ..
                    } => is_this_value(method, *object),
                    _ => false,
                },
                TacKind::Store { value, .. } => is_this_value(method, *value),
                _ => false,
            };
            if escapes {
                for field in &required {
                    if !state.contains(field) {
                        missing.insert(field.clone());
                    }
                }
            }
            gen_of(*node_id, &mut state);
        }
    }

    let mut missing: Vec<String> = missing.into_iter().collect();
    missing.sort();
    for field in missing {
        let span = arena
            .entry(class)
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.span.clone());
        reporter.add_error(
            ErrorKind::FieldNotInitialized,
            format!("field {} may not be initialized before use", field),
            span,
        );
    }
}

fn collect_uses(
    arena: &TypeArena,
    method: &TacMethod,
    used_fields: &mut HashMap<TypeId, HashSet<String>>,
    used_private_methods: &mut HashSet<MethodKey>,
) {
    for node_id in method.iter() {
        match &method.node(node_id).kind {
            TacKind::Load { reference } | TacKind::Store { reference, .. } => {
                if let TacKind::FieldRef { class, field, .. } = &method.node(*reference).kind {
                    let declared_on = arena.entry(*class).without_args;
                    used_fields
                        .entry(declared_on)
                        .or_default()
                        .insert(field.clone());
                }
            }
            TacKind::MethodRef { signature, .. } => {
                let sig = arena.signature(*signature);
                used_private_methods.insert((
                    arena.entry(sig.outer).without_args,
                    sig.name.clone(),
                    sig.decl_index,
                ));
            }
            _ => {}
        }
    }
}

fn report_unused_fields(
    arena: &TypeArena,
    class: TypeId,
    used_fields: &HashMap<TypeId, HashSet<String>>,
    reporter: &mut ErrorReporter,
) {
    let used = used_fields.get(&class);
    for field in &arena.entry(class).fields {
        if field.ty.modifiers.is_constant() || field.unused {
            continue;
        }
        if used.map(|u| u.contains(&field.name)).unwrap_or(false) {
            continue;
        }
        reporter.add_warning(
            ErrorKind::UnusedField,
            format!("field {} is never used", field.name),
            Some(field.span.clone()),
        );
    }
}

fn report_unused_methods(
    arena: &TypeArena,
    class: TypeId,
    used_private_methods: &HashSet<MethodKey>,
    reporter: &mut ErrorReporter,
) {
    for sig_id in &arena.entry(class).methods {
        let signature = arena.signature(*sig_id);
        if !signature.modifiers.is_private()
            || signature.unused
            || signature.is_import
            || signature.is_export
            || signature.is_destroy()
        {
            continue;
        }
        let key = (
            arena.entry(class).without_args,
            signature.name.clone(),
            signature.decl_index,
        );
        if used_private_methods.contains(&key) {
            continue;
        }
        reporter.add_warning(
            ErrorKind::UnusedMethod,
            format!("private method {} is never used", signature.name),
            Some(signature.span.clone()),
        );
    }
}
