//! Command-line entry point: run a command script against a binary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use braze::script::Executor;

const COMMANDS: &str = "\
Script commands, one per line, comma-separated (# starts a comment):
  LOAD,ELF,<path>
  SAVE,<path>,OVERWRITE|KEEP
  PRINT,<section_name>
  RENAME_SYMBOL,<old>,<new>,STATIC|DYNAMIC|BOTH,STRICT|PERMISSIVE
  SET_SYMBOL_VERSION,<name>,<version>,PERMISSIVE|STRICT
  MOVE_SECTION,<name>,<align_hex>
  MAKE_SEGMENT,PT_LOAD,<flags>,<align_hex>,<start_sect>,<end_sect>
  MOVE_SEGMENT,<idx>,<start_sect>,<end_sect>
  MAKE_DYN_TAG,<DT_NAME>,<string_value>";

#[derive(Debug, Parser)]
#[command(
    name = "braze",
    about = "braze - carving objects out of binaries",
    after_help = COMMANDS
)]
struct Cli {
    /// Log all the things
    #[arg(short, long)]
    verbose: bool,

    /// Write log data to a file
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Script path from which to read commands
    script: PathBuf,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    braze::init().context("loading record schemas")?;

    let mut executor = Executor::new();
    let code = executor
        .execute(&cli.script)
        .with_context(|| format!("running script {}", cli.script.display()))?;
    Ok(ExitCode::from(code as u8))
}
