//! A small interpreter for compiled programs.
//!
//! It executes the same instruction buffers the Jasmin renderer consumes, with
//! JVM semantics for arithmetic (wrapping, truncating division), arrays and
//! calls. Input tokens are supplied up front and consumed the way a whitespace
//! delimited `Scanner` would; printed text is collected into a string.

use crate::codegen::{Instr, Label, Program, Subroutine};
use crate::valtype::ValType;
use snafu::{OptionExt, Snafu, ensure};
use std::collections::{HashMap, VecDeque};

/// Nested calls allowed before execution is abandoned.
pub const MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
  Int(i32),
  /// Index into the execution's heap.
  Array(usize),
  Null,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum VmError {
  #[snafu(display("program has no main subroutine"))]
  MissingMain,

  #[snafu(display("call to unknown subroutine '{name}'"))]
  UnknownSubroutine { name: String },

  #[snafu(display("division by zero in '{subroutine}'"))]
  DivisionByZero { subroutine: String },

  #[snafu(display("index {index} out of bounds for length {len} in '{subroutine}'"))]
  IndexOutOfBounds {
    subroutine: String,
    index: i32,
    len: usize,
  },

  #[snafu(display("negative array size {size} in '{subroutine}'"))]
  NegativeArraySize { subroutine: String, size: i32 },

  #[snafu(display("null array reference in '{subroutine}'"))]
  NullReference { subroutine: String },

  #[snafu(display("operand stack underflow in '{subroutine}'"))]
  StackUnderflow { subroutine: String },

  #[snafu(display("expected {expected} on the stack or in a local in '{subroutine}'"))]
  TypeMismatch {
    subroutine: String,
    expected: &'static str,
  },

  #[snafu(display("input exhausted"))]
  InputExhausted,

  #[snafu(display("cannot read '{token}' as {expected}"))]
  InvalidInput { token: String, expected: ValType },

  #[snafu(display("call depth exceeds {MAX_CALL_DEPTH}"))]
  CallDepth,
}

type VmResult<T> = Result<T, VmError>;

/// What a finished run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
  pub output: String,
  /// Main's frame at the moment it returned.
  pub locals: Vec<Value>,
  pub heap: Vec<Vec<i32>>,
}

impl Execution {
  pub fn int(&self, slot: usize) -> Option<i32> {
    match self.locals.get(slot) {
      Some(Value::Int(value)) => Some(*value),
      _ => None,
    }
  }

  pub fn array(&self, slot: usize) -> Option<&[i32]> {
    match self.locals.get(slot) {
      Some(Value::Array(index)) => self.heap.get(*index).map(Vec::as_slice),
      _ => None,
    }
  }
}

pub struct Vm<'p> {
  program: &'p Program,
  /// Instruction index of every label, per subroutine.
  targets: HashMap<&'p str, HashMap<Label, usize>>,
  input: VecDeque<String>,
  output: String,
  heap: Vec<Vec<i32>>,
}

/// What the interpreter loop does after one instruction.
enum Step<'p> {
  Next,
  Call(&'p Subroutine, Vec<Value>),
  Return(Option<Value>),
}

impl<'p> Vm<'p> {
  pub fn new(program: &'p Program) -> Self {
    let targets = program
      .subroutines
      .iter()
      .map(|sub| (sub.name.as_str(), label_targets(sub)))
      .collect();
    Self {
      program,
      targets,
      input: VecDeque::new(),
      output: String::new(),
      heap: Vec::new(),
    }
  }

  /// Queue input; each string is split on whitespace into separate tokens.
  pub fn with_input<I, S>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for value in values {
      self
        .input
        .extend(value.as_ref().split_whitespace().map(str::to_string));
    }
    self
  }

  /// Run main to completion. Calls push activations onto a call stack owned
  /// by this loop, so nesting is bounded by [`MAX_CALL_DEPTH`] alone.
  pub fn run(mut self) -> VmResult<Execution> {
    let program = self.program;
    let main = program.main().context(MissingMainSnafu)?;
    // Slot 0 of main holds the argument array, which is never set.
    let mut current = Activation::new(main, vec![Value::Null]);
    let mut callers: Vec<Activation<'p>> = Vec::new();

    loop {
      match self.step(&mut current)? {
        Step::Next => {}
        Step::Call(sub, args) => {
          ensure!(callers.len() + 1 < MAX_CALL_DEPTH, CallDepthSnafu);
          callers.push(std::mem::replace(&mut current, Activation::new(sub, args)));
        }
        Step::Return(result) => {
          let Some(caller) = callers.pop() else {
            break;
          };
          current = caller;
          if let Some(value) = result {
            current.stack.push(value);
          }
        }
      }
    }

    Ok(Execution {
      output: self.output,
      locals: current.locals,
      heap: self.heap,
    })
  }

  /// Execute the instruction at the activation's program counter.
  fn step(&mut self, act: &mut Activation<'p>) -> VmResult<Step<'p>> {
    let sub = act.sub;
    let Some(instr) = sub.code.get(act.pc) else {
      return Ok(Step::Return(None));
    };
    act.pc += 1;

    match instr {
      Instr::Label(_) => {}
      Instr::Ldc(value) => act.push_int(*value),
      Instr::ILoad(slot) => {
        let value = act.local(*slot)?;
        act.expect_int(value)?;
        act.stack.push(value);
      }
      Instr::IStore(slot) => {
        let value = act.pop_int()?;
        *act.local_mut(*slot)? = Value::Int(value);
      }
      Instr::ALoad(slot) => {
        let value = act.local(*slot)?;
        act.stack.push(value);
      }
      Instr::AStore(slot) => {
        let value = act.pop()?;
        *act.local_mut(*slot)? = value;
      }
      Instr::AConstNull => act.stack.push(Value::Null),
      Instr::IALoad | Instr::BALoad => {
        let index = act.pop_int()?;
        let array = act.pop_array()?;
        let value = *act.element(&mut self.heap, array, index)?;
        act.push_int(value);
      }
      Instr::IAStore | Instr::BAStore => {
        let mut value = act.pop_int()?;
        if matches!(instr, Instr::BAStore) {
          value = i32::from(value as i8);
        }
        let index = act.pop_int()?;
        let array = act.pop_array()?;
        *act.element(&mut self.heap, array, index)? = value;
      }
      Instr::IAdd => act.binary(i32::wrapping_add)?,
      Instr::ISub => act.binary(i32::wrapping_sub)?,
      Instr::IMul => act.binary(i32::wrapping_mul)?,
      Instr::IAnd => act.binary(|lhs, rhs| lhs & rhs)?,
      Instr::IOr => act.binary(|lhs, rhs| lhs | rhs)?,
      Instr::IXor => act.binary(|lhs, rhs| lhs ^ rhs)?,
      Instr::IDiv | Instr::IRem => {
        let rhs = act.pop_int()?;
        let lhs = act.pop_int()?;
        ensure!(
          rhs != 0,
          DivisionByZeroSnafu {
            subroutine: act.name()
          }
        );
        let value = if matches!(instr, Instr::IDiv) {
          lhs.wrapping_div(rhs)
        } else {
          lhs.wrapping_rem(rhs)
        };
        act.push_int(value);
      }
      Instr::INeg => {
        let value = act.pop_int()?;
        act.push_int(value.wrapping_neg());
      }
      Instr::IfEq(label) => {
        if act.pop_int()? == 0 {
          act.pc = self.jump(sub, *label);
        }
      }
      Instr::IfICmp(cmp, label) => {
        let rhs = act.pop_int()?;
        let lhs = act.pop_int()?;
        if cmp.holds(lhs, rhs) {
          act.pc = self.jump(sub, *label);
        }
      }
      Instr::Goto(label) => act.pc = self.jump(sub, *label),
      Instr::NewArray(_) => {
        let size = act.pop_int()?;
        ensure!(
          size >= 0,
          NegativeArraySizeSnafu {
            subroutine: act.name(),
            size
          }
        );
        act.stack.push(Value::Array(self.heap.len()));
        self.heap.push(vec![0; size as usize]);
      }
      Instr::Invoke { name, params, .. } => {
        let program = self.program;
        let callee = program
          .subroutine(name)
          .context(UnknownSubroutineSnafu { name })?;
        let split = act
          .stack
          .len()
          .checked_sub(params.len())
          .context(StackUnderflowSnafu {
            subroutine: act.name(),
          })?;
        let args = act.stack.split_off(split);
        return Ok(Step::Call(callee, args));
      }
      Instr::Return => return Ok(Step::Return(None)),
      Instr::IReturn | Instr::AReturn => return act.pop().map(|value| Step::Return(Some(value))),
      Instr::Read(ty) => {
        let value = self.read(*ty)?;
        act.push_int(value);
      }
      Instr::Print(ty) => {
        let value = act.pop_int()?;
        if ty.is_boolean_type() {
          self.output.push_str(if value != 0 { "true" } else { "false" });
        } else {
          self.output.push_str(&value.to_string());
        }
      }
      Instr::PrintString(text) => self.output.push_str(text),
    }

    Ok(Step::Next)
  }

  /// Instruction index of `label` in `sub`; labels always exist in the buffer
  /// that branches to them, so a miss runs off the end and returns.
  fn jump(&self, sub: &Subroutine, label: Label) -> usize {
    self
      .targets
      .get(sub.name.as_str())
      .and_then(|targets| targets.get(&label))
      .copied()
      .unwrap_or(usize::MAX)
  }

  fn read(&mut self, ty: ValType) -> VmResult<i32> {
    let token = self.input.pop_front().context(InputExhaustedSnafu)?;
    let parsed = if ty.is_boolean_type() {
      match token.to_ascii_lowercase().as_str() {
        "true" => Some(1),
        "false" => Some(0),
        _ => None,
      }
    } else {
      token.parse::<i32>().ok()
    };
    parsed.context(InvalidInputSnafu {
      token,
      expected: ty,
    })
  }
}

fn label_targets(sub: &Subroutine) -> HashMap<Label, usize> {
  sub
    .code
    .iter()
    .enumerate()
    .filter_map(|(pc, instr)| match instr {
      Instr::Label(label) => Some((*label, pc)),
      _ => None,
    })
    .collect()
}

/// One subroutine invocation: its frame, operand stack and program counter.
struct Activation<'p> {
  sub: &'p Subroutine,
  locals: Vec<Value>,
  stack: Vec<Value>,
  pc: usize,
}

impl<'p> Activation<'p> {
  /// Arguments occupy the first slots; the rest of the frame starts out null.
  fn new(sub: &'p Subroutine, mut locals: Vec<Value>) -> Self {
    locals.resize(sub.frame_width.max(locals.len()), Value::Null);
    Self {
      sub,
      locals,
      stack: Vec::new(),
      pc: 0,
    }
  }

  fn name(&self) -> &'p str {
    &self.sub.name
  }

  fn push_int(&mut self, value: i32) {
    self.stack.push(Value::Int(value));
  }

  fn pop(&mut self) -> VmResult<Value> {
    self.stack.pop().context(StackUnderflowSnafu {
      subroutine: self.name(),
    })
  }

  fn pop_int(&mut self) -> VmResult<i32> {
    let value = self.pop()?;
    self.expect_int(value)
  }

  fn pop_array(&mut self) -> VmResult<usize> {
    match self.pop()? {
      Value::Array(index) => Ok(index),
      Value::Null => NullReferenceSnafu {
        subroutine: self.name(),
      }
      .fail(),
      Value::Int(_) => TypeMismatchSnafu {
        subroutine: self.name(),
        expected: "an array",
      }
      .fail(),
    }
  }

  fn expect_int(&self, value: Value) -> VmResult<i32> {
    match value {
      Value::Int(value) => Ok(value),
      _ => TypeMismatchSnafu {
        subroutine: self.name(),
        expected: "an integer",
      }
      .fail(),
    }
  }

  fn binary(&mut self, op: impl FnOnce(i32, i32) -> i32) -> VmResult<()> {
    let rhs = self.pop_int()?;
    let lhs = self.pop_int()?;
    self.push_int(op(lhs, rhs));
    Ok(())
  }

  fn local(&self, slot: usize) -> VmResult<Value> {
    self.locals.get(slot).copied().context(TypeMismatchSnafu {
      subroutine: self.name(),
      expected: "a local slot",
    })
  }

  fn local_mut(&mut self, slot: usize) -> VmResult<&mut Value> {
    let subroutine = self.name();
    self.locals.get_mut(slot).context(TypeMismatchSnafu {
      subroutine,
      expected: "a local slot",
    })
  }

  fn element<'h>(
    &self,
    heap: &'h mut [Vec<i32>],
    array: usize,
    index: i32,
  ) -> VmResult<&'h mut i32> {
    let data = heap.get_mut(array).context(NullReferenceSnafu {
      subroutine: self.name(),
    })?;
    let len = data.len();
    usize::try_from(index)
      .ok()
      .and_then(|at| data.get_mut(at))
      .context(IndexOutOfBoundsSnafu {
        subroutine: self.name(),
        index,
        len,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use pretty_assertions::assert_eq;

  fn run(source: &str, input: &[&str]) -> VmResult<Execution> {
    let program = parse(source).expect("program compiles");
    Vm::new(&program).with_input(input).run()
  }

  #[test]
  fn stores_land_in_frame_slots() {
    let exec = run("program P: main: int x, y; let x = 3 + 4; let y = x * x", &[])
      .expect("runs");
    assert_eq!(exec.int(1), Some(7));
    assert_eq!(exec.int(2), Some(49));
  }

  #[test]
  fn booleans_print_as_words() {
    let exec = run(
      "program P: main: output(1 < 2 .. \" \" .. not true .. \" \" .. -7 / 2 .. \" \" .. -7 rem 2)",
      &[],
    )
    .expect("runs");
    assert_eq!(exec.output, "true false -3 -1");
  }

  #[test]
  fn arrays_are_heap_allocated() {
    let exec = run(
      "program P: main: int array a; int i; let a = array 4; let i = 0; \
       while i < 4: let a[i] = i * i; let i = i + 1 end",
      &[],
    )
    .expect("runs");
    assert_eq!(exec.array(1), Some(&[0, 1, 4, 9][..]));
  }

  #[test]
  fn input_tokens_are_whitespace_separated() {
    let exec = run(
      "program P: main: int a, b; bool c; input(a); input(b); input(c); output(a + b .. c)",
      &["20 22", "TRUE"],
    )
    .expect("runs");
    assert_eq!(exec.output, "42true");
  }

  #[test]
  fn runtime_failures() {
    assert_eq!(
      run("program P: main: int x; let x = 1 / 0", &[]),
      Err(VmError::DivisionByZero {
        subroutine: "main".into()
      })
    );
    assert_eq!(
      run("program P: main: int array a; let a = array 2; let a[2] = 1", &[]),
      Err(VmError::IndexOutOfBounds {
        subroutine: "main".into(),
        index: 2,
        len: 2,
      })
    );
    assert_eq!(
      run("program P: main: int array a; let a = array -1", &[]),
      Err(VmError::NegativeArraySize {
        subroutine: "main".into(),
        size: -1,
      })
    );
    assert_eq!(
      run("program P: main: int x; input(x)", &[]),
      Err(VmError::InputExhausted)
    );
    assert_eq!(
      run("program P: main: int x; input(x)", &["seven"]),
      Err(VmError::InvalidInput {
        token: "seven".into(),
        expected: ValType::INTEGER,
      })
    );
  }

  #[test]
  fn runaway_recursion_is_stopped() {
    assert_eq!(
      run("program P: f(int n): f(n) main: f(1)", &[]),
      Err(VmError::CallDepth)
    );
  }

  const SUM: &str = "
    program Sum:
      sum(int n) -> int:
        if n = 0: return 0 end;
        return n + sum(n - 1)
    main:
      int n;
      input(n);
      output(sum(n))
  ";

  #[test]
  fn deep_recursion_completes() {
    assert_eq!(run(SUM, &["500"]).expect("runs").output, "125250");
  }

  #[test]
  fn call_depth_limit_is_exact() {
    // main is depth 0, so sum(n) bottoms out at depth n + 1.
    let deepest = (MAX_CALL_DEPTH - 2).to_string();
    let expected = ((MAX_CALL_DEPTH - 2) * (MAX_CALL_DEPTH - 1) / 2).to_string();
    assert_eq!(run(SUM, &[deepest.as_str()]).expect("runs").output, expected);

    let too_deep = (MAX_CALL_DEPTH - 1).to_string();
    assert_eq!(run(SUM, &[too_deep.as_str()]), Err(VmError::CallDepth));
  }
}
