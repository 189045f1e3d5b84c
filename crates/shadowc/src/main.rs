//! Command-line entry point for the Shadow compiler.

use clap::Parser;
use shadowc::diagnostics::CompilerError;
use shadowc::{compile, CompileOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shadowc",
    about = "Compiler for the Shadow language",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// The .shadow source file containing the main class
    source: Option<PathBuf>,

    /// Configuration file (default is shadow_config.xml resolution)
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Parse and type-check only; no code generation
    #[arg(long = "check")]
    check: bool,

    /// Compile to object files without linking an executable
    #[arg(long = "compile")]
    compile: bool,

    /// Skip the final link step
    #[arg(long = "no-link")]
    no_link: bool,

    /// Recompile even when existing outputs are newer than their sources
    #[arg(long = "force-recompile")]
    force_recompile: bool,

    /// Write human-readable .ll files beside the objects
    #[arg(long = "human-readable")]
    human_readable: bool,

    /// Print toolchain and configuration information
    #[arg(long = "information")]
    information: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.information {
        print_information(cli.config.as_deref());
        return;
    }

    let Some(source) = cli.source else {
        eprintln!("COMMAND LINE ERROR: no source file specified");
        std::process::exit(shadowc::diagnostics::COMMAND_LINE_ERROR);
    };

    let mut options = CompileOptions::new(source);
    options.config_file = cli.config;
    options.check_only = cli.check;
    options.compile_only = cli.compile;
    options.no_link = cli.no_link;
    options.force_recompile = cli.force_recompile;
    options.human_readable = cli.human_readable;

    if let Err(error) = compile(&options) {
        match &error {
            // Accumulated diagnostics were already printed in order.
            CompilerError::TypeCheck => {}
            other => eprintln!("{}", other),
        }
        std::process::exit(error.exit_code());
    }
}

fn print_information(config_file: Option<&std::path::Path>) {
    println!("shadowc {}", env!("CARGO_PKG_VERSION"));
    match shadowc::config::Config::build(config_file) {
        Ok(config) => {
            println!("  os:           {}", config.os);
            println!("  architecture: {}", config.architecture);
            println!("  llc:          {}", config.llc);
            println!("  target:       {}", config.target);
            println!("  system:       {}", config.system.display());
        }
        Err(error) => println!("  {}", error),
    }
}
