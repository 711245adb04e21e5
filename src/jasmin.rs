//! Render a compiled [`Program`] as Jasmin assembly for the JVM.
//!
//! Every subroutine becomes a `public static` method of a class named after
//! the program. Input goes through a single `java.util.Scanner` kept in a
//! static field, which is only declared when the program reads anything.

use crate::codegen::{ElemType, Instr, Program, Subroutine};
use crate::valtype::ValType;
use std::collections::HashMap;

const SCANNER_FIELD: &str = "_scanner";
const SCANNER_TYPE: &str = "Ljava/util/Scanner;";
const PRINT_STREAM: &str = "java/io/PrintStream";

/// Emit the complete `.j` source for `program`.
pub fn render(program: &Program) -> String {
  let class = &program.class_name;
  let mut asm = String::new();

  asm.push_str(&format!(".source {class}.j\n"));
  asm.push_str(&format!(".class public {class}\n"));
  asm.push_str(".super java/lang/Object\n");
  if program.uses_input() {
    asm.push_str(&format!(
      ".field private static {SCANNER_FIELD} {SCANNER_TYPE}\n"
    ));
  }

  asm.push_str("\n.method public <init>()V\n");
  asm.push_str("  aload_0\n");
  asm.push_str("  invokespecial java/lang/Object/<init>()V\n");
  asm.push_str("  return\n");
  asm.push_str(".end method\n");

  if program.uses_input() {
    asm.push_str("\n.method static <clinit>()V\n");
    asm.push_str("  .limit stack 3\n");
    asm.push_str("  .limit locals 0\n");
    asm.push_str("  new java/util/Scanner\n");
    asm.push_str("  dup\n");
    asm.push_str("  getstatic java/lang/System/in Ljava/io/InputStream;\n");
    asm.push_str("  invokespecial java/util/Scanner/<init>(Ljava/io/InputStream;)V\n");
    asm.push_str(&format!(
      "  putstatic {class}/{SCANNER_FIELD} {SCANNER_TYPE}\n"
    ));
    asm.push_str("  return\n");
    asm.push_str(".end method\n");
  }

  for sub in &program.subroutines {
    emit_method(class, sub, &mut asm);
  }

  asm
}

fn emit_method(class: &str, sub: &Subroutine, asm: &mut String) {
  let descriptor = if sub.is_main() {
    "([Ljava/lang/String;)V".to_string()
  } else {
    method_descriptor(&sub.params, sub.returns)
  };

  asm.push_str(&format!(
    "\n.method public static {}{descriptor}\n",
    sub.name
  ));
  asm.push_str(&format!("  .limit stack {}\n", max_stack(&sub.code)));
  asm.push_str(&format!("  .limit locals {}\n", sub.frame_width));
  for instr in &sub.code {
    emit_instr(class, instr, asm);
  }
  asm.push_str(".end method\n");
}

fn emit_instr(class: &str, instr: &Instr, asm: &mut String) {
  let line = match instr {
    Instr::Label(label) => {
      asm.push_str(&format!("{label}:\n"));
      return;
    }
    Instr::Ldc(value) => push_constant(*value),
    Instr::ILoad(slot) => format!("iload {slot}"),
    Instr::IStore(slot) => format!("istore {slot}"),
    Instr::ALoad(slot) => format!("aload {slot}"),
    Instr::AStore(slot) => format!("astore {slot}"),
    Instr::AConstNull => "aconst_null".into(),
    Instr::IALoad => "iaload".into(),
    Instr::IAStore => "iastore".into(),
    Instr::BALoad => "baload".into(),
    Instr::BAStore => "bastore".into(),
    Instr::IAdd => "iadd".into(),
    Instr::ISub => "isub".into(),
    Instr::IMul => "imul".into(),
    Instr::IDiv => "idiv".into(),
    Instr::IRem => "irem".into(),
    Instr::INeg => "ineg".into(),
    Instr::IAnd => "iand".into(),
    Instr::IOr => "ior".into(),
    Instr::IXor => "ixor".into(),
    Instr::IfEq(label) => format!("ifeq {label}"),
    Instr::IfICmp(cmp, label) => format!("if_icmp{} {label}", cmp.mnemonic()),
    Instr::Goto(label) => format!("goto {label}"),
    Instr::NewArray(ElemType::Int) => "newarray int".into(),
    Instr::NewArray(ElemType::Bool) => "newarray boolean".into(),
    Instr::Invoke {
      name,
      params,
      returns,
    } => format!(
      "invokestatic {class}/{name}{}",
      method_descriptor(params, *returns)
    ),
    Instr::Return => "return".into(),
    Instr::IReturn => "ireturn".into(),
    Instr::AReturn => "areturn".into(),
    Instr::Read(ty) => {
      let (method, desc) = if ty.is_boolean_type() {
        ("nextBoolean", "Z")
      } else {
        ("nextInt", "I")
      };
      format!(
        "getstatic {class}/{SCANNER_FIELD} {SCANNER_TYPE}\n  \
         invokevirtual java/util/Scanner/{method}(){desc}"
      )
    }
    Instr::Print(ty) => format!(
      "getstatic java/lang/System/out L{PRINT_STREAM};\n  swap\n  \
       invokevirtual {PRINT_STREAM}/print({})V",
      type_descriptor(*ty)
    ),
    Instr::PrintString(text) => format!(
      "getstatic java/lang/System/out L{PRINT_STREAM};\n  ldc \"{}\"\n  \
       invokevirtual {PRINT_STREAM}/print(Ljava/lang/String;)V",
      escape(text)
    ),
  };
  asm.push_str("  ");
  asm.push_str(&line);
  asm.push('\n');
}

/// Smallest instruction that pushes `value`.
fn push_constant(value: i32) -> String {
  match value {
    -1 => "iconst_m1".into(),
    0..=5 => format!("iconst_{value}"),
    -128..=127 => format!("bipush {value}"),
    -32768..=32767 => format!("sipush {value}"),
    _ => format!("ldc {value}"),
  }
}

pub fn type_descriptor(ty: ValType) -> &'static str {
  match (ty.is_array_type(), ty.is_boolean_type(), ty.is_integer_type()) {
    (true, true, _) => "[Z",
    (true, _, _) => "[I",
    (false, true, _) => "Z",
    (false, _, true) => "I",
    _ => "V",
  }
}

pub fn method_descriptor(params: &[ValType], returns: ValType) -> String {
  let params: String = params.iter().map(|ty| type_descriptor(*ty)).collect();
  format!("({params}){}", type_descriptor(returns))
}

fn escape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      _ => out.push(c),
    }
  }
  out
}

/// Deepest operand stack any path through `code` reaches, counting the
/// receivers pushed while printing and reading.
pub fn max_stack(code: &[Instr]) -> usize {
  let mut depth: isize = 0;
  let mut peak: isize = 0;
  let mut at_label = HashMap::new();

  for instr in code {
    if let Instr::Label(label) = instr
      && let Some(&recorded) = at_label.get(label)
    {
      depth = recorded;
    }

    let (transient, net) = stack_effect(instr);
    peak = peak.max(depth + transient);
    depth += net;
    peak = peak.max(depth);

    match instr {
      Instr::IfEq(label) | Instr::IfICmp(_, label) | Instr::Goto(label) => {
        at_label.entry(*label).or_insert(depth);
      }
      _ => {}
    }
  }

  usize::try_from(peak).unwrap_or(0)
}

/// (extra depth reached mid-instruction, net change) for one instruction.
fn stack_effect(instr: &Instr) -> (isize, isize) {
  match instr {
    Instr::Ldc(_) | Instr::ILoad(_) | Instr::ALoad(_) | Instr::AConstNull => (0, 1),
    Instr::IStore(_) | Instr::AStore(_) => (0, -1),
    Instr::IALoad | Instr::BALoad => (0, -1),
    Instr::IAStore | Instr::BAStore => (0, -3),
    Instr::IAdd
    | Instr::ISub
    | Instr::IMul
    | Instr::IDiv
    | Instr::IRem
    | Instr::IAnd
    | Instr::IOr
    | Instr::IXor => (0, -1),
    Instr::INeg | Instr::Goto(_) | Instr::Label(_) | Instr::NewArray(_) | Instr::Return => (0, 0),
    Instr::IfEq(_) => (0, -1),
    Instr::IfICmp(..) => (0, -2),
    Instr::Invoke {
      params, returns, ..
    } => {
      let pushed = isize::from(!returns.is_none());
      (0, pushed - params.len() as isize)
    }
    Instr::IReturn | Instr::AReturn => (0, -1),
    Instr::Read(_) => (1, 1),
    Instr::Print(_) => (1, -1),
    Instr::PrintString(_) => (2, 0),
  }
}
