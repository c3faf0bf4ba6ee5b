//! emberc - compile and run an Ember source file.

use clap::Parser as ClapParser;
use ember_runtime::{InterpretResult, VmConfig};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "emberc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ember compiler and bytecode interpreter", long_about = None)]
struct Cli {
    /// Ember source file to run
    path: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("emberc=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = match std::fs::read(&cli.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.path.display(), e);
            process::exit(74);
        }
    };

    let result = emberc::run(&source, VmConfig::default());
    report(&result);
    process::exit(result.exit_code());
}

fn report(result: &InterpretResult) {
    match result {
        InterpretResult::Ok | InterpretResult::Exit(_) => {}
        InterpretResult::CompileError(errors) => {
            for error in errors {
                eprintln!("{error}");
            }
        }
        InterpretResult::RuntimeError(err) => {
            eprint!("{err}");
        }
    }
}
