//! Process-boundary glue: configuration, reading the source, writing the
//! Jasmin file and handing it to the external assembler.

use crate::codegen::Program;
use crate::error::{CompileError, CompileResult, OutputSnafu, SourceReadSnafu};
use crate::{jasmin, parser};
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const JASMIN_JAR_VAR: &str = "JASMIN_JAR";
pub const TRACE_PARSER_VAR: &str = "AMPLC_TRACE_PARSER";
pub const TRACE_CODEGEN_VAR: &str = "AMPLC_TRACE_CODEGEN";

/// Everything one invocation of the compiler needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub source_path: PathBuf,
  /// Where the `.j` and `.class` files go; defaults to the source's directory.
  pub output_dir: Option<PathBuf>,
  pub jasmin_jar: Option<PathBuf>,
  /// Stop after producing assembly text.
  pub emit_only: bool,
  pub trace_parser: bool,
  pub trace_codegen: bool,
}

impl Config {
  /// Configuration for `source_path`, with the assembler and tracing taken
  /// from the environment.
  pub fn from_env(source_path: impl Into<PathBuf>) -> Self {
    Self {
      source_path: source_path.into(),
      output_dir: None,
      jasmin_jar: std::env::var_os(JASMIN_JAR_VAR).map(PathBuf::from),
      emit_only: false,
      trace_parser: trace_enabled(TRACE_PARSER_VAR),
      trace_codegen: trace_enabled(TRACE_CODEGEN_VAR),
    }
  }

  /// Name used as the prefix of positioned diagnostics.
  pub fn source_name(&self) -> String {
    self.source_path.display().to_string()
  }

  pub fn output_dir(&self) -> PathBuf {
    if let Some(dir) = &self.output_dir {
      return dir.clone();
    }
    match self.source_path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    }
  }
}

pub fn trace_enabled(var: &str) -> bool {
  std::env::var(var)
    .ok()
    .as_deref()
    .map(|v| v == "1")
    .unwrap_or(false)
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Jasmin text, when only assembly was requested.
  Assembly(String),
  Assembled { class_file: PathBuf },
}

/// Read, compile and emit the program named by `config`.
pub fn run(config: &Config) -> CompileResult<Outcome> {
  check_environment(config)?;
  let source = read_source(config)?;
  build(config, &source)
}

/// The assembler jar must be known before any work is done, unless only
/// assembly text was requested.
pub fn check_environment(config: &Config) -> CompileResult<()> {
  if !config.emit_only && config.jasmin_jar.is_none() {
    return Err(missing_jar());
  }
  Ok(())
}

fn missing_jar() -> CompileError {
  CompileError::environment(format!("{JASMIN_JAR_VAR} environment variable not set"))
}

/// Compile `source` and emit the result.
pub fn build(config: &Config, source: &str) -> CompileResult<Outcome> {
  let program = compile_source(config, source)?;
  emit(config, &program)
}

pub fn read_source(config: &Config) -> CompileResult<String> {
  fs::read_to_string(&config.source_path).context(SourceReadSnafu {
    path: &config.source_path,
  })
}

pub fn compile_source(config: &Config, source: &str) -> CompileResult<Program> {
  let program = parser::Parser::new(source)?
    .with_trace(config.trace_parser)
    .compile()?;
  if config.trace_codegen {
    eprintln!("{}", jasmin::render(&program));
  }
  Ok(program)
}

/// Render `program` and, unless only assembly was requested, write the `.j`
/// file and assemble it.
pub fn emit(config: &Config, program: &Program) -> CompileResult<Outcome> {
  let asm = jasmin::render(program);
  if config.emit_only {
    return Ok(Outcome::Assembly(asm));
  }

  let jar = config.jasmin_jar.as_deref().ok_or_else(missing_jar)?;

  let out_dir = config.output_dir();
  let j_file = out_dir.join(format!("{}.j", program.class_name));
  fs::write(&j_file, asm).context(OutputSnafu { path: &j_file })?;

  assemble(jar, &out_dir, &j_file)?;
  Ok(Outcome::Assembled {
    class_file: out_dir.join(format!("{}.class", program.class_name)),
  })
}

fn assemble(jar: &Path, out_dir: &Path, j_file: &Path) -> CompileResult<()> {
  let exe = Command::new("java")
    .arg("-jar")
    .arg(jar)
    .arg("-d")
    .arg(out_dir)
    .arg(j_file)
    .output()
    .map_err(|err| CompileError::Assembler {
      message: format!("could not run java: {err}"),
    })?;

  if exe.status.success() {
    Ok(())
  } else {
    Err(CompileError::Assembler {
      message: format!(
        "jasmin exited with {}\n{}",
        exe.status,
        String::from_utf8_lossy(&exe.stderr).trim()
      ),
    })
  }
}
