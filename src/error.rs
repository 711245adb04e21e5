//! Shared error utilities used across the compilation pipeline.
//!
//! Every error is fatal: the first diagnostic stops compilation. Positioned
//! errors are rendered as `name:line:col: message` followed by the source line
//! and a caret under the offending column.

use crate::token::SourcePos;
use crate::valtype::ValType;
use snafu::Snafu;
use std::fmt;
use std::path::PathBuf;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{message}"))]
  Lexical { pos: SourcePos, message: String },

  #[snafu(display("expected {expected}, but found {found}"))]
  Syntax {
    pos: SourcePos,
    expected: String,
    found: String,
  },

  #[snafu(display("{kind}"))]
  Semantic { pos: SourcePos, kind: SemanticKind },

  #[snafu(display("{message}"))]
  Environment { message: String },

  #[snafu(display("file '{}' could not be opened: {source}", path.display()))]
  SourceRead {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("could not write '{}': {source}", path.display()))]
  Output {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("assembler failed: {message}"))]
  Assembler { message: String },

  #[snafu(display("could not allocate {what}"))]
  Allocation { pos: SourcePos, what: String },
}

/// Semantic failures detected while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticKind {
  UnknownIdentifier(String),
  MultipleDefinition(String),
  NotAnArray(String),
  NotAFunction(String),
  NotAProcedure(String),
  NotAVariable(String),
  TooFewArguments(String),
  TooManyArguments(String),
  IncompatibleTypes {
    expected: ValType,
    found: ValType,
    context: String,
  },
  ExpectedScalar(String),
  IllegalArrayOperation(String),
  MissingReturnValue,
  UnexpectedReturnValue,
}

impl fmt::Display for SemanticKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SemanticKind::UnknownIdentifier(id) => write!(f, "unknown identifier '{id}'"),
      SemanticKind::MultipleDefinition(id) => write!(f, "multiple definition of '{id}'"),
      SemanticKind::NotAnArray(id) => write!(f, "'{id}' is not an array"),
      SemanticKind::NotAFunction(id) => write!(f, "'{id}' is not a function"),
      SemanticKind::NotAProcedure(id) => write!(f, "'{id}' is not a procedure"),
      SemanticKind::NotAVariable(id) => write!(f, "'{id}' is not a variable"),
      SemanticKind::TooFewArguments(id) => write!(f, "too few arguments for call to '{id}'"),
      SemanticKind::TooManyArguments(id) => write!(f, "too many arguments for call to '{id}'"),
      SemanticKind::IncompatibleTypes {
        expected,
        found,
        context,
      } => write!(
        f,
        "incompatible types (expected {expected}, found {found}) {context}"
      ),
      SemanticKind::ExpectedScalar(id) => {
        write!(f, "expected scalar variable instead of '{id}'")
      }
      SemanticKind::IllegalArrayOperation(op) => write!(f, "{op} is an illegal array operation"),
      SemanticKind::MissingReturnValue => f.write_str("missing return expression for a function"),
      SemanticKind::UnexpectedReturnValue => {
        f.write_str("a return expression is not allowed for a procedure")
      }
    }
  }
}

impl CompileError {
  pub fn lexical(pos: SourcePos, message: impl Into<String>) -> Self {
    Self::Lexical {
      pos,
      message: message.into(),
    }
  }

  pub fn syntax(pos: SourcePos, expected: impl Into<String>, found: impl Into<String>) -> Self {
    Self::Syntax {
      pos,
      expected: expected.into(),
      found: found.into(),
    }
  }

  pub fn semantic(pos: SourcePos, kind: SemanticKind) -> Self {
    Self::Semantic { pos, kind }
  }

  pub fn environment(message: impl Into<String>) -> Self {
    Self::Environment {
      message: message.into(),
    }
  }

  pub fn position(&self) -> Option<SourcePos> {
    match self {
      Self::Lexical { pos, .. }
      | Self::Syntax { pos, .. }
      | Self::Semantic { pos, .. }
      | Self::Allocation { pos, .. } => Some(*pos),
      _ => None,
    }
  }

  /// Format the error for the terminal, pointing at the offending column when
  /// the error carries a position inside `source`.
  pub fn render(&self, source_name: &str, source: &str) -> String {
    let Some(pos) = self.position() else {
      return self.to_string();
    };

    let mut out = format!("{source_name}:{pos}: {self}");
    if let Some(line) = source.lines().nth(pos.line.saturating_sub(1)) {
      let safe_col = pos.col.saturating_sub(1).min(line.chars().count());
      let marker = format!("{}^", " ".repeat(safe_col));
      out.push('\n');
      out.push_str(line);
      out.push('\n');
      out.push_str(&marker);
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn render_points_at_the_column() {
    let source = "program P:\nmain:\n  let y = 1\n";
    let err = CompileError::semantic(
      SourcePos::new(3, 7),
      SemanticKind::UnknownIdentifier("y".into()),
    );

    assert_eq!(
      err.render("test.ampl", source),
      "test.ampl:3:7: unknown identifier 'y'\n  let y = 1\n      ^"
    );
  }

  #[test]
  fn unpositioned_errors_render_bare() {
    let err = CompileError::environment("JASMIN_JAR environment variable not set");
    assert_eq!(err.position(), None);
    assert_eq!(
      err.render("x.ampl", ""),
      "JASMIN_JAR environment variable not set"
    );
  }

  #[test]
  fn syntax_errors_name_both_tokens() {
    let err = CompileError::syntax(SourcePos::new(1, 1), "'program'", "identifier");
    assert_eq!(err.to_string(), "expected 'program', but found identifier");
  }
}
