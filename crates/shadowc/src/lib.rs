//! The Shadow compiler.
//!
//! The pipeline: the external front end parses `.shadow` sources into
//! [`shadow_ast`] trees; the resolver binds declarations into the type
//! arena and annotates expressions; the TAC builder lowers each class to
//! three-address code; the control-flow analyses check reachability,
//! field initialization, and return coverage; the LLVM emitter renders
//! textual IR that an external `llc` turns into objects.

pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod emit;
pub mod tac;
pub mod typecheck;

use std::path::PathBuf;

/// Compilation options, separated from CLI argument parsing so the
/// compiler can be driven programmatically.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// The `.shadow` source containing the main class.
    pub main_file: PathBuf,
    /// Explicit configuration file (otherwise environment/built-in).
    pub config_file: Option<PathBuf>,
    /// Type-check only; no TAC or LLVM output.
    pub check_only: bool,
    /// Emit objects but do not link.
    pub compile_only: bool,
    pub no_link: bool,
    pub force_recompile: bool,
    /// Also write the `.ll` text beside the object.
    pub human_readable: bool,
}

impl CompileOptions {
    pub fn new(main_file: impl Into<PathBuf>) -> Self {
        CompileOptions {
            main_file: main_file.into(),
            config_file: None,
            check_only: false,
            compile_only: false,
            no_link: false,
            force_recompile: false,
            human_readable: false,
        }
    }
}

/// Runs a full compilation with the given options.
pub fn compile(options: &CompileOptions) -> Result<(), diagnostics::CompilerError> {
    let config = config::Config::build(options.config_file.as_deref())?;
    let job = driver::Job {
        main_file: options.main_file.clone(),
        check_only: options.check_only,
        compile_only: options.compile_only,
        no_link: options.no_link,
        force_recompile: options.force_recompile,
        human_readable: options.human_readable,
    };
    driver::run(&job, &config)
}
