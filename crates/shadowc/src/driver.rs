//! Compilation driver.
//!
//! The driver loads the serialized ASTs the front end leaves beside each
//! `.shadow` source, resolves and analyzes them in dependency order, emits
//! LLVM text per unit, compiles it through the external `llc`, and hands
//! the collected object files to the linker. Object files newer than their
//! sources are reused unless a recompile is forced; a failed `llc` run
//! removes its partial output.

use crate::analysis;
use crate::config::Config;
use crate::diagnostics::{CompilerError, ErrorReporter};
use crate::emit::{self, main_shim};
use crate::tac::{TacBuilder, TacModule};
use crate::typecheck::{ModifiedType, Resolver, SigId, TypeArena, TypeId};
use anyhow::Context;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use shadow_ast::CompilationUnit;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One compilation request.
#[derive(Debug, Clone)]
pub struct Job {
    pub main_file: PathBuf,
    pub check_only: bool,
    pub compile_only: bool,
    pub no_link: bool,
    pub force_recompile: bool,
    pub human_readable: bool,
}

/// A loaded unit and its on-disk locations; the AST itself lives in a
/// parallel vector so the resolver can take the whole batch as a slice.
struct Unit {
    source: PathBuf,
    ty: TypeId,
}

pub fn run(job: &Job, config: &Config) -> Result<(), CompilerError> {
    if !job.main_file.exists() {
        return Err(CompilerError::FileNotFound(
            job.main_file.display().to_string(),
        ));
    }

    let is_compile = !job.check_only && !job.no_link;
    if is_compile {
        config.check_llvm_version()?;
    }

    let (mut units, mut asts) = load_units(&job.main_file, config)?;
    let mut arena = TypeArena::new();
    let mut reporter = ErrorReporter::new();

    let roots = Resolver::new(&mut arena, &mut reporter).run(&mut asts);
    for (unit, root) in units.iter_mut().zip(&roots) {
        unit.ty = *root;
    }
    reporter.print_and_report_errors()?;

    let order = dependency_order(&arena, &units);

    let mut objects: Vec<PathBuf> = Vec::new();
    for index in order {
        let unit = &units[index];
        log::info!("Generating code for {}", unit.source.display());
        let module = TacBuilder::build(&mut arena, &asts[index], unit.ty);
        analysis::optimize_module(&arena, &module, &mut reporter);
        reporter.print_and_report_errors()?;

        if job.check_only {
            continue;
        }
        let object = compile_unit(job, config, &arena, unit, &module)?;
        objects.push(object);

        // Hand-written runtime glue beside the source is linked as-is.
        let native_ll = unit.source.with_extension("native.ll");
        let native_object = unit.source.with_extension("native.o");
        if native_object.exists() {
            objects.push(native_object);
        } else if native_ll.exists() {
            let target = native_ll.with_extension("o");
            compile_llvm_file(config, &native_ll, &target)?;
            objects.push(target);
        }
    }

    if job.check_only || job.compile_only || job.no_link {
        return Ok(());
    }

    // The main shim: find the entry class and its main method.
    let main_unit = units
        .iter()
        .find(|u| u.source == job.main_file)
        .ok_or_else(|| CompilerError::Compile("main unit missing".to_string()))?;
    let (create_sig, main_sig) = find_main(&mut arena, main_unit.ty).ok_or_else(|| {
        CompilerError::Compile(format!(
            "{} does not contain an appropriate main() method",
            job.main_file.display()
        ))
    })?;
    let shim = main_shim::main_shim(&arena, main_unit.ty, create_sig, main_sig);
    let shim_object = job.main_file.with_extension("main.o");
    compile_llvm_text(config, &shim, &shim_object)?;
    objects.push(shim_object.clone());

    log::info!("Linking object files...");
    let mut link = Command::new(&config.link_command[0]);
    link.args(&config.link_command[1..]);
    link.args(&objects);
    link.arg("-o");
    link.arg(job.main_file.with_extension(""));
    let status = link
        .status()
        .map_err(|e| CompilerError::Compile(format!("FAILED TO LINK: {}", e)))?;
    let _ = std::fs::remove_file(&shim_object);
    if !status.success() {
        return Err(CompilerError::Compile("FAILED TO LINK".to_string()));
    }
    log::info!("SUCCESS");
    Ok(())
}

/// Loads the main unit and, transitively, every imported unit reachable
/// through the import search paths.
fn load_units(
    main_file: &Path,
    config: &Config,
) -> Result<(Vec<Unit>, Vec<CompilationUnit>), CompilerError> {
    let mut units: Vec<Unit> = Vec::new();
    let mut asts: Vec<CompilationUnit> = Vec::new();
    let mut queue = vec![main_file.to_path_buf()];
    let mut seen = vec![main_file.to_path_buf()];

    while let Some(source) = queue.pop() {
        let ast = load_ast(&source)?;
        for import in &ast.imports {
            let Some(name) = import.last() else { continue };
            let candidates =
                std::iter::once(source.parent().unwrap_or(Path::new(".")).to_path_buf())
                    .chain(config.imports.iter().cloned())
                    .chain(std::iter::once(config.system.clone()));
            for directory in candidates {
                let candidate = directory.join(format!("{}.shadow", name));
                if candidate.exists() && !seen.contains(&candidate) {
                    seen.push(candidate.clone());
                    queue.push(candidate);
                    break;
                }
            }
        }
        units.push(Unit {
            source,
            ty: TypeId(0),
        });
        asts.push(ast);
    }
    Ok((units, asts))
}

/// Reads `Name.shadow`'s serialized AST (`Name.shadow.ast.json`, or
/// `Name.ast.json` beside it).
fn load_ast(source: &Path) -> Result<CompilationUnit, CompilerError> {
    let sibling = source.with_extension("ast.json");
    let stacked = PathBuf::from(format!("{}.ast.json", source.display()));
    let path = if stacked.exists() {
        stacked
    } else if sibling.exists() {
        sibling
    } else {
        return Err(CompilerError::FileNotFound(format!(
            "no parsed AST found for {}",
            source.display()
        )));
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CompilerError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| CompilerError::Parse(format!("{}: {}", path.display(), e)))
}

/// Topological order over the units' type-reference edges, so a unit is
/// emitted after everything it depends on. Cycles fall back to input order.
fn dependency_order(arena: &TypeArena, units: &[Unit]) -> Vec<usize> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut by_type: HashMap<TypeId, petgraph::graph::NodeIndex> = HashMap::new();
    for (index, unit) in units.iter().enumerate() {
        let node = graph.add_node(index);
        by_type.insert(unit.ty, node);
    }
    for unit in units {
        let from = by_type[&unit.ty];
        for referenced in arena.reference_closure(&[unit.ty]) {
            let root = arena.entry(referenced).without_args;
            if let Some(to) = by_type.get(&root) {
                if *to != from {
                    graph.update_edge(*to, from, ());
                }
            }
        }
    }
    match toposort(&graph, None) {
        Ok(sorted) => sorted.into_iter().map(|n| graph[n]).collect(),
        Err(_) => (0..units.len()).collect(),
    }
}

fn compile_unit(
    job: &Job,
    config: &Config,
    arena: &TypeArena,
    unit: &Unit,
    module: &TacModule,
) -> Result<PathBuf, CompilerError> {
    let object = unit.source.with_extension("o");

    if !job.force_recompile && is_up_to_date(&object, &unit.source) {
        log::info!("Using pre-existing code for {}", unit.source.display());
        return Ok(object);
    }

    let text = emit::emit_module(arena, module)
        .map_err(|e| CompilerError::Compile(e.to_string()))?;

    if job.human_readable {
        let ll_path = unit.source.with_extension("ll");
        std::fs::write(&ll_path, &text)
            .map_err(|e| CompilerError::Compile(format!("{}: {}", ll_path.display(), e)))?;
    }

    compile_llvm_text(config, &text, &object)?;
    Ok(object)
}

fn is_up_to_date(object: &Path, source: &Path) -> bool {
    let (Ok(object_meta), Ok(source_meta)) = (object.metadata(), source.metadata()) else {
        return false;
    };
    match (object_meta.modified(), source_meta.modified()) {
        (Ok(object_time), Ok(source_time)) => object_time >= source_time,
        _ => false,
    }
}

/// Pipes LLVM text into `llc`; on failure the partial object is removed.
fn compile_llvm_text(config: &Config, text: &str, object: &Path) -> Result<(), CompilerError> {
    let result = (|| -> anyhow::Result<bool> {
        let mut command = Command::new(&config.llc);
        if !config.target.is_empty() {
            command.arg("-mtriple").arg(&config.target);
        }
        let mut child = command
            .arg(&config.llvm_opt_level)
            .arg("--filetype=obj")
            .arg("-o")
            .arg(object)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("running {}", config.llc))?;
        child
            .stdin
            .as_mut()
            .context("llc stdin closed")?
            .write_all(text.as_bytes())?;
        Ok(child.wait()?.success())
    })();

    match result {
        Ok(true) => Ok(()),
        _ => {
            let _ = std::fs::remove_file(object);
            Err(CompilerError::Compile(format!(
                "FAILED TO COMPILE {}",
                object.display()
            )))
        }
    }
}

fn compile_llvm_file(config: &Config, ll: &Path, object: &Path) -> Result<(), CompilerError> {
    let text = std::fs::read_to_string(ll)
        .map_err(|e| CompilerError::Compile(format!("{}: {}", ll.display(), e)))?;
    compile_llvm_text(config, &text, object)
}

/// Locates the entry points: a no-argument create and a `main` taking
/// `String[]` or nothing.
pub fn find_main(arena: &mut TypeArena, main_type: TypeId) -> Option<(SigId, SigId)> {
    let create = arena.get_matching_method(main_type, "create", &[]).ok()?;
    let string = arena.well_known.string;
    let string_array = arena.array_of(string, false);
    let with_args = arena
        .get_matching_method(main_type, "main", &[ModifiedType::new(string_array)])
        .ok();
    let main = match with_args {
        Some(sig) => sig,
        None => arena.get_matching_method(main_type, "main", &[]).ok()?,
    };
    Some((create, main))
}
