//! Code generation: instruction buffers filled by the parser as it goes.
//!
//! The target is a stack machine modelled on the JVM: every expression leaves
//! a single value on the operand stack, locals live in numbered frame slots,
//! and control flow is expressed with labels and branches. The parser emits
//! into the buffer of the subroutine being compiled; when the program has
//! been parsed the buffers are collected into a [`Program`].

use crate::symbols::IdProps;
use crate::valtype::ValType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "L{}", self.0)
  }
}

/// Integer comparisons understood by `IfICmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl Cmp {
  pub fn holds(self, lhs: i32, rhs: i32) -> bool {
    match self {
      Cmp::Eq => lhs == rhs,
      Cmp::Ne => lhs != rhs,
      Cmp::Lt => lhs < rhs,
      Cmp::Le => lhs <= rhs,
      Cmp::Gt => lhs > rhs,
      Cmp::Ge => lhs >= rhs,
    }
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      Cmp::Eq => "eq",
      Cmp::Ne => "ne",
      Cmp::Lt => "lt",
      Cmp::Le => "le",
      Cmp::Gt => "gt",
      Cmp::Ge => "ge",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
  Int,
  Bool,
}

impl ElemType {
  pub fn of(ty: ValType) -> Self {
    if ty.is_boolean_type() {
      ElemType::Bool
    } else {
      ElemType::Int
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
  Ldc(i32),
  ILoad(usize),
  IStore(usize),
  ALoad(usize),
  AStore(usize),
  AConstNull,
  IALoad,
  IAStore,
  BALoad,
  BAStore,
  IAdd,
  ISub,
  IMul,
  IDiv,
  IRem,
  INeg,
  IAnd,
  IOr,
  IXor,
  IfEq(Label),
  IfICmp(Cmp, Label),
  Goto(Label),
  Label(Label),
  NewArray(ElemType),
  Invoke {
    name: String,
    params: Vec<ValType>,
    returns: ValType,
  },
  Return,
  IReturn,
  AReturn,
  Read(ValType),
  Print(ValType),
  PrintString(String),
}

impl Instr {
  /// Element load for an array whose elements have type `elem`.
  pub fn element_load(elem: ValType) -> Self {
    match ElemType::of(elem) {
      ElemType::Bool => Instr::BALoad,
      ElemType::Int => Instr::IALoad,
    }
  }

  pub fn element_store(elem: ValType) -> Self {
    match ElemType::of(elem) {
      ElemType::Bool => Instr::BAStore,
      ElemType::Int => Instr::IAStore,
    }
  }

  pub fn is_return(&self) -> bool {
    matches!(self, Instr::Return | Instr::IReturn | Instr::AReturn)
  }
}

/// Compiled code and frame layout of one subroutine (or main).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subroutine {
  pub name: String,
  pub params: Vec<ValType>,
  /// `ValType::NONE` for procedures and main.
  pub returns: ValType,
  pub frame_width: usize,
  pub code: Vec<Instr>,
}

impl Subroutine {
  pub fn is_main(&self) -> bool {
    self.name == MAIN
  }

  /// Labels placed in this subroutine, in emission order.
  pub fn labels(&self) -> Vec<Label> {
    self
      .code
      .iter()
      .filter_map(|instr| match instr {
        Instr::Label(label) => Some(*label),
        _ => None,
      })
      .collect()
  }
}

pub const MAIN: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
  pub class_name: String,
  pub subroutines: Vec<Subroutine>,
}

impl Program {
  pub fn subroutine(&self, name: &str) -> Option<&Subroutine> {
    self.subroutines.iter().find(|sub| sub.name == name)
  }

  pub fn main(&self) -> Option<&Subroutine> {
    self.subroutine(MAIN)
  }

  pub fn uses_input(&self) -> bool {
    self
      .subroutines
      .iter()
      .flat_map(|sub| &sub.code)
      .any(|instr| matches!(instr, Instr::Read(_)))
  }
}

/// Emission state for one compilation run.
#[derive(Debug, Default)]
pub struct CodeGen {
  next_label: u32,
  current: Option<Subroutine>,
  finished: Vec<Subroutine>,
}

impl CodeGen {
  pub fn new() -> Self {
    Self::default()
  }

  /// A label no other construct in this run has been given.
  pub fn new_label(&mut self) -> Label {
    let label = Label(self.next_label);
    self.next_label += 1;
    label
  }

  /// Start emitting into a fresh buffer for the subroutine described by `props`.
  pub fn open_subroutine(&mut self, name: &str, props: &IdProps) {
    debug_assert!(self.current.is_none(), "subroutines do not nest");
    self.current = Some(Subroutine {
      name: name.to_string(),
      params: props.params.clone(),
      returns: props.ty.return_type(),
      frame_width: 0,
      code: Vec::new(),
    });
  }

  pub fn emit(&mut self, instr: Instr) {
    debug_assert!(self.current.is_some(), "emitting outside a subroutine");
    if let Some(sub) = self.current.as_mut() {
      sub.code.push(instr);
    }
  }

  pub fn place(&mut self, label: Label) {
    self.emit(Instr::Label(label));
  }

  /// Compare the two integers on top of the stack and leave 1 or 0 behind.
  pub fn emit_cmp(&mut self, cmp: Cmp) {
    let yes = self.new_label();
    let done = self.new_label();
    self.emit(Instr::IfICmp(cmp, yes));
    self.emit(Instr::Ldc(0));
    self.emit(Instr::Goto(done));
    self.place(yes);
    self.emit(Instr::Ldc(1));
    self.place(done);
  }

  /// Seal the current buffer. Code that can fall off the end gets a trailing
  /// return; a function falling off the end returns its type's zero value.
  pub fn close_subroutine(&mut self, frame_width: usize) {
    let Some(mut sub) = self.current.take() else {
      return;
    };

    if !sub.code.last().is_some_and(Instr::is_return) {
      if sub.returns.is_none() {
        sub.code.push(Instr::Return);
      } else if sub.returns.is_array_type() {
        sub.code.push(Instr::AConstNull);
        sub.code.push(Instr::AReturn);
      } else {
        sub.code.push(Instr::Ldc(0));
        sub.code.push(Instr::IReturn);
      }
    }

    sub.frame_width = frame_width.max(sub.params.len());
    self.finished.push(sub);
  }

  pub fn finish(self, class_name: String) -> Program {
    Program {
      class_name,
      subroutines: self.finished,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn labels_are_unique_per_run() {
    let mut code = CodeGen::new();
    let labels: Vec<Label> = (0..5).map(|_| code.new_label()).collect();
    assert_eq!(labels, (0..5).map(Label).collect::<Vec<_>>());
  }

  #[test]
  fn comparison_pushes_a_boolean() {
    let mut code = CodeGen::new();
    code.open_subroutine(MAIN, &IdProps::callable(ValType::NONE, vec![]));
    code.emit_cmp(Cmp::Lt);
    code.close_subroutine(1);
    let program = code.finish("P".into());

    assert_eq!(
      program.main().expect("main").code,
      vec![
        Instr::IfICmp(Cmp::Lt, Label(0)),
        Instr::Ldc(0),
        Instr::Goto(Label(1)),
        Instr::Label(Label(0)),
        Instr::Ldc(1),
        Instr::Label(Label(1)),
        Instr::Return,
      ]
    );
  }

  #[test]
  fn functions_get_a_fallback_return() {
    let mut code = CodeGen::new();
    code.open_subroutine(
      "f",
      &IdProps::callable(ValType::INTEGER, vec![ValType::INTEGER]),
    );
    code.emit(Instr::ILoad(0));
    code.emit(Instr::IReturn);
    code.close_subroutine(0);

    code.open_subroutine(
      "g",
      &IdProps::callable(ValType::BOOLEAN.as_array(), vec![ValType::INTEGER]),
    );
    code.close_subroutine(1);
    let program = code.finish("P".into());

    let f = program.subroutine("f").expect("f");
    assert_eq!(f.code, vec![Instr::ILoad(0), Instr::IReturn]);
    assert_eq!(f.frame_width, 1);

    let g = program.subroutine("g").expect("g");
    assert_eq!(g.code, vec![Instr::AConstNull, Instr::AReturn]);
    assert_eq!(g.returns, ValType::BOOLEAN.as_array());
  }
}
