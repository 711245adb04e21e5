//! Recursive-descent parser that type checks and emits code as it goes.
//!
//! One procedure per grammar rule, driven by a single token of lookahead and
//! no backtracking. Expression rules return the type they synthesised; every
//! rule emits its instructions the moment the construct is recognised, so
//! there is no tree and no second pass.
//!
//! ```text
//! program    = "program" id ":" { subdef } "main" ":" body [ "end" ] .
//! subdef     = id "(" type id { "," type id } ")" [ "->" type ] ":" body .
//! body       = { vardef } statements .
//! type       = ( "bool" | "int" ) [ "array" ] .
//! vardef     = type id { "," id } ";" .
//! statements = "chillax" | statement { ";" statement } .
//! statement  = assign | call | if | input | output | return | while .
//! assign     = "let" id [ index ] "=" ( expr | "array" simple ) .
//! call       = id arglist .
//! if         = "if" expr ":" statements { "elif" expr ":" statements }
//!              [ "else" ":" statements ] "end" .
//! input      = "input" "(" id [ index ] ")" .
//! output     = "output" "(" ( string | expr ) { ".." ( string | expr ) } ")" .
//! return     = "return" [ expr ] .
//! while      = "while" expr ":" statements "end" .
//! arglist    = "(" expr { "," expr } ")" .
//! index      = "[" simple "]" .
//! expr       = simple [ relop simple ] .
//! simple     = [ "-" ] term { addop term } .
//! term       = factor { mulop factor } .
//! factor     = id [ index | arglist ] | num | "(" expr ")"
//!            | "not" factor | "true" | "false" .
//! ```

use crate::codegen::{CodeGen, Cmp, ElemType, Instr, Label, MAIN, Program};
use crate::error::{CompileError, CompileResult, SemanticKind};
use crate::hashtable::TableError;
use crate::lexer::Lexer;
use crate::symbols::{IdProps, SymbolTable};
use crate::token::{SourcePos, Token, TokenKind};
use crate::valtype::ValType;

/// Compile a complete source text.
pub fn parse(source: &str) -> CompileResult<Program> {
  Parser::new(source)?.compile()
}

/// All state of one compilation run: lookahead, scopes, and code buffers.
pub struct Parser<'a> {
  lexer: Lexer<'a>,
  token: Token,
  symbols: SymbolTable,
  code: CodeGen,
  /// Return type of the subroutine being compiled; `NONE` for procedures and main.
  return_type: ValType,
  trace: Trace,
}

impl<'a> Parser<'a> {
  /// Set up the symbol table and prime the lookahead token.
  pub fn new(source: &'a str) -> CompileResult<Self> {
    let mut lexer = Lexer::new(source);
    let token = lexer.next_token()?;
    let symbols = SymbolTable::new().map_err(|err| allocation(token.pos, err))?;
    Ok(Self {
      lexer,
      token,
      symbols,
      code: CodeGen::new(),
      return_type: ValType::NONE,
      trace: Trace::default(),
    })
  }

  /// Print an indented rule-by-rule trace to stderr while parsing.
  pub fn with_trace(mut self, enabled: bool) -> Self {
    self.trace.enabled = enabled;
    self
  }

  /// Parse the whole program, then release the symbol table.
  pub fn compile(mut self) -> CompileResult<Program> {
    let class_name = self.parse_program()?;
    self.symbols.teardown();
    Ok(self.code.finish(class_name))
  }

  // --- grammar rules ------------------------------------------------------

  fn parse_program(&mut self) -> CompileResult<String> {
    self.trace.start("program", self.token.pos);

    self.expect(TokenKind::Program)?;
    let (class_name, _) = self.expect_id()?;
    self.expect(TokenKind::Colon)?;

    while self.token.kind == TokenKind::Id {
      self.parse_subdef()?;
    }

    self.expect(TokenKind::Main)?;
    self.expect(TokenKind::Colon)?;

    self
      .code
      .open_subroutine(MAIN, &IdProps::callable(ValType::NONE, Vec::new()));
    self.return_type = ValType::NONE;
    self.parse_body()?;
    self.code.close_subroutine(self.symbols.frame_width());

    if self.token.kind == TokenKind::End {
      self.advance()?;
    }
    self.expect(TokenKind::Eof)?;

    self.trace.end("program", self.token.pos);
    Ok(class_name)
  }

  fn parse_subdef(&mut self) -> CompileResult<()> {
    self.trace.start("subdef", self.token.pos);

    let (name, name_pos) = self.expect_id()?;
    self.expect(TokenKind::LParen)?;

    let mut params = Vec::new();
    loop {
      let ty = self.parse_type()?;
      let (id, pos) = self.expect_id()?;
      params.push((id, ty, pos));
      if self.token.kind != TokenKind::Comma {
        break;
      }
      self.advance()?;
    }
    self.expect(TokenKind::RParen)?;

    let return_type = if self.token.kind == TokenKind::Arrow {
      self.advance()?;
      self.parse_type()?
    } else {
      ValType::NONE
    };
    self.expect(TokenKind::Colon)?;

    let props = IdProps::callable(return_type, params.iter().map(|(_, ty, _)| *ty).collect());
    self
      .symbols
      .open_subroutine(&name, props.clone())
      .map_err(|err| self.declare_error(err, &name, name_pos))?;
    for (id, ty, pos) in params {
      self.declare(&id, IdProps::variable(ty), pos)?;
    }

    self.code.open_subroutine(&name, &props);
    self.return_type = return_type;
    self.parse_body()?;
    self.code.close_subroutine(self.symbols.frame_width());
    self.symbols.close_subroutine();
    self.return_type = ValType::NONE;

    self.trace.end("subdef", self.token.pos);
    Ok(())
  }

  fn parse_body(&mut self) -> CompileResult<()> {
    self.trace.start("body", self.token.pos);
    while self.token.kind.is_type() {
      self.parse_vardef()?;
    }
    self.parse_statements()?;
    self.trace.end("body", self.token.pos);
    Ok(())
  }

  fn parse_type(&mut self) -> CompileResult<ValType> {
    self.trace.start("type", self.token.pos);
    let mut ty = match self.token.kind {
      TokenKind::Int => ValType::INTEGER,
      TokenKind::Bool => ValType::BOOLEAN,
      _ => return Err(self.unexpected("type specifier")),
    };
    self.advance()?;

    if self.token.kind == TokenKind::Array {
      ty = ty.as_array();
      self.advance()?;
    }
    self.trace.end("type", self.token.pos);
    Ok(ty)
  }

  fn parse_vardef(&mut self) -> CompileResult<()> {
    self.trace.start("vardef", self.token.pos);
    let ty = self.parse_type()?;
    loop {
      let (id, pos) = self.expect_id()?;
      self.declare(&id, IdProps::variable(ty), pos)?;
      if self.token.kind != TokenKind::Comma {
        break;
      }
      self.advance()?;
    }
    self.expect(TokenKind::Semicolon)?;
    self.trace.end("vardef", self.token.pos);
    Ok(())
  }

  fn parse_statements(&mut self) -> CompileResult<()> {
    self.trace.start("statements", self.token.pos);
    if self.token.kind == TokenKind::Chillax {
      self.advance()?;
    } else {
      self.parse_statement()?;
      while self.token.kind == TokenKind::Semicolon {
        self.advance()?;
        self.parse_statement()?;
      }
    }
    self.trace.end("statements", self.token.pos);
    Ok(())
  }

  fn parse_statement(&mut self) -> CompileResult<()> {
    match self.token.kind {
      TokenKind::Let => self.parse_assign(),
      TokenKind::Id => self.parse_call(),
      TokenKind::If => self.parse_if(),
      TokenKind::Input => self.parse_input(),
      TokenKind::Output => self.parse_output(),
      TokenKind::Return => self.parse_return(),
      TokenKind::While => self.parse_while(),
      _ => Err(self.unexpected("statement")),
    }
  }

  fn parse_assign(&mut self) -> CompileResult<()> {
    self.trace.start("assign", self.token.pos);
    self.expect(TokenKind::Let)?;
    let (id, pos) = self.expect_id()?;
    let props = self.resolve_variable(&id, pos)?;

    let indexed = self.token.kind == TokenKind::LBrack;
    let mut target = props.ty;
    if indexed {
      if !target.is_array() {
        return Err(semantic(pos, SemanticKind::NotAnArray(id)));
      }
      self.code.emit(Instr::ALoad(props.offset));
      self.parse_index(&id)?;
      target = target.base_type();
    }

    self.expect(TokenKind::Eq)?;

    if self.token.kind.starts_expr() {
      let expr_pos = self.token.pos;
      let ty = self.parse_expr()?;
      check_types(ty, target, expr_pos, || format!("for assignment to '{id}'"))?;
      if indexed {
        self.code.emit(Instr::element_store(target));
      } else if target.is_array_type() {
        self.code.emit(Instr::AStore(props.offset));
      } else {
        self.code.emit(Instr::IStore(props.offset));
      }
    } else if self.token.kind == TokenKind::Array {
      let array_pos = self.token.pos;
      if indexed {
        return Err(semantic(
          array_pos,
          SemanticKind::IllegalArrayOperation("array allocation into an element".into()),
        ));
      }
      if !target.is_array() {
        return Err(semantic(pos, SemanticKind::NotAnArray(id)));
      }
      self.advance()?;
      let size_pos = self.token.pos;
      let ty = self.parse_simple()?;
      check_types(ty, ValType::INTEGER, size_pos, || {
        format!("for array size of '{id}'")
      })?;
      self.code.emit(Instr::NewArray(ElemType::of(target)));
      self.code.emit(Instr::AStore(props.offset));
    } else {
      return Err(self.unexpected("expression or array allocation"));
    }

    self.trace.end("assign", self.token.pos);
    Ok(())
  }

  fn parse_call(&mut self) -> CompileResult<()> {
    self.trace.start("call", self.token.pos);
    let (id, pos) = self.expect_id()?;
    let props = self.resolve(&id, pos)?;
    if !props.ty.is_procedure() {
      return Err(semantic(pos, SemanticKind::NotAProcedure(id)));
    }
    self.parse_arglist(&id, &props)?;
    self.emit_invoke(&id, props);
    self.trace.end("call", self.token.pos);
    Ok(())
  }

  fn parse_if(&mut self) -> CompileResult<()> {
    self.trace.start("if", self.token.pos);
    self.expect(TokenKind::If)?;
    let end = self.code.new_label();

    let first = self.code.new_label();
    let mut clause = self.parse_guarded_clause("if", first, end)?;
    while self.token.kind == TokenKind::Elif {
      self.trace.info("elif", self.token.pos);
      self.advance()?;
      clause = self.parse_guarded_clause("elif", clause, end)?;
    }

    self.code.place(clause);
    if self.token.kind == TokenKind::Else {
      self.trace.info("else", self.token.pos);
      self.advance()?;
      self.expect(TokenKind::Colon)?;
      self.parse_statements()?;
    }

    self.code.place(end);
    self.expect(TokenKind::End)?;
    self.trace.end("if", self.token.pos);
    Ok(())
  }

  /// `expr ":" statements` for an `if` or `elif` starting at `clause`. A false
  /// guard skips to the returned label, which starts the next clause; a
  /// finished body jumps to the shared end label.
  fn parse_guarded_clause(
    &mut self,
    keyword: &str,
    clause: Label,
    end: Label,
  ) -> CompileResult<Label> {
    self.code.place(clause);
    let guard_pos = self.token.pos;
    let ty = self.parse_expr()?;
    check_types(ty, ValType::BOOLEAN, guard_pos, || {
      format!("for '{keyword}' guard")
    })?;
    self.expect(TokenKind::Colon)?;

    let next = self.code.new_label();
    self.code.emit(Instr::IfEq(next));
    self.parse_statements()?;
    self.code.emit(Instr::Goto(end));
    Ok(next)
  }

  fn parse_input(&mut self) -> CompileResult<()> {
    self.trace.start("input", self.token.pos);
    self.expect(TokenKind::Input)?;
    self.expect(TokenKind::LParen)?;
    let (id, pos) = self.expect_id()?;
    let props = self.resolve_variable(&id, pos)?;

    if self.token.kind == TokenKind::LBrack {
      if !props.ty.is_array() {
        return Err(semantic(pos, SemanticKind::NotAnArray(id)));
      }
      let elem = props.ty.base_type();
      self.code.emit(Instr::ALoad(props.offset));
      self.parse_index(&id)?;
      self.code.emit(Instr::Read(elem));
      self.code.emit(Instr::element_store(elem));
    } else {
      if !props.ty.is_scalar() {
        return Err(semantic(pos, SemanticKind::ExpectedScalar(id)));
      }
      self.code.emit(Instr::Read(props.ty));
      self.code.emit(Instr::IStore(props.offset));
    }

    self.expect(TokenKind::RParen)?;
    self.trace.end("input", self.token.pos);
    Ok(())
  }

  fn parse_output(&mut self) -> CompileResult<()> {
    self.trace.start("output", self.token.pos);
    self.expect(TokenKind::Output)?;
    self.expect(TokenKind::LParen)?;

    loop {
      if self.token.kind == TokenKind::Str {
        let string = self.token.string.take().unwrap_or_default();
        self.code.emit(Instr::PrintString(string));
        self.advance()?;
      } else if self.token.kind.starts_expr() {
        let pos = self.token.pos;
        let ty = self.parse_expr()?;
        if ty.is_array_type() {
          return Err(semantic(
            pos,
            SemanticKind::IllegalArrayOperation(TokenKind::Output.describe().into()),
          ));
        }
        self.code.emit(Instr::Print(ty));
      } else {
        return Err(self.unexpected("expression or string"));
      }

      if self.token.kind != TokenKind::DotDot {
        break;
      }
      self.advance()?;
    }

    self.expect(TokenKind::RParen)?;
    self.trace.end("output", self.token.pos);
    Ok(())
  }

  fn parse_return(&mut self) -> CompileResult<()> {
    self.trace.start("return", self.token.pos);
    let pos = self.token.pos;
    self.expect(TokenKind::Return)?;

    if self.token.kind.starts_expr() {
      if self.return_type.is_none() {
        return Err(semantic(self.token.pos, SemanticKind::UnexpectedReturnValue));
      }
      let expr_pos = self.token.pos;
      let ty = self.parse_expr()?;
      let expected = self.return_type;
      check_types(ty, expected, expr_pos, || "for 'return' statement".into())?;
      if expected.is_array_type() {
        self.code.emit(Instr::AReturn);
      } else {
        self.code.emit(Instr::IReturn);
      }
    } else {
      if !self.return_type.is_none() {
        return Err(semantic(pos, SemanticKind::MissingReturnValue));
      }
      self.code.emit(Instr::Return);
    }

    self.trace.end("return", self.token.pos);
    Ok(())
  }

  fn parse_while(&mut self) -> CompileResult<()> {
    self.trace.start("while", self.token.pos);
    let top = self.code.new_label();
    let bottom = self.code.new_label();

    self.code.place(top);
    self.expect(TokenKind::While)?;
    let guard_pos = self.token.pos;
    let ty = self.parse_expr()?;
    check_types(ty, ValType::BOOLEAN, guard_pos, || "for 'while' guard".into())?;
    self.code.emit(Instr::IfEq(bottom));
    self.expect(TokenKind::Colon)?;
    self.parse_statements()?;
    self.code.emit(Instr::Goto(top));
    self.code.place(bottom);
    self.expect(TokenKind::End)?;

    self.trace.end("while", self.token.pos);
    Ok(())
  }

  /// Parse and check the arguments of a call to `id` against its signature.
  fn parse_arglist(&mut self, id: &str, props: &IdProps) -> CompileResult<()> {
    self.trace.start("arglist", self.token.pos);
    self.expect(TokenKind::LParen)?;

    let mut count = 0;
    loop {
      let arg_pos = self.token.pos;
      let ty = self.parse_expr()?;
      let Some(&expected) = props.params.get(count) else {
        return Err(semantic(arg_pos, SemanticKind::TooManyArguments(id.into())));
      };
      count += 1;
      check_types(ty, expected, arg_pos, || {
        format!("for parameter {count} of call to '{id}'")
      })?;
      if self.token.kind != TokenKind::Comma {
        break;
      }
      self.advance()?;
    }

    if count < props.nparams() {
      return Err(semantic(
        self.token.pos,
        SemanticKind::TooFewArguments(id.into()),
      ));
    }
    self.expect(TokenKind::RParen)?;
    self.trace.end("arglist", self.token.pos);
    Ok(())
  }

  fn parse_index(&mut self, id: &str) -> CompileResult<()> {
    self.trace.start("index", self.token.pos);
    self.expect(TokenKind::LBrack)?;
    let pos = self.token.pos;
    let ty = self.parse_simple()?;
    check_types(ty, ValType::INTEGER, pos, || {
      format!("for array index of '{id}'")
    })?;
    self.expect(TokenKind::RBrack)?;
    self.trace.end("index", self.token.pos);
    Ok(())
  }

  fn parse_expr(&mut self) -> CompileResult<ValType> {
    self.trace.start("expr", self.token.pos);
    let lhs_pos = self.token.pos;
    let mut ty = self.parse_simple()?;

    if self.token.kind.is_relop() {
      let op = self.token.kind;
      self.advance()?;
      let rhs_pos = self.token.pos;
      let rhs = self.parse_simple()?;

      if op.is_ordop() {
        check_operand(ty, ValType::INTEGER, lhs_pos, op)?;
        check_operand(rhs, ValType::INTEGER, rhs_pos, op)?;
      } else {
        if ty.is_array_type() {
          return Err(semantic(
            lhs_pos,
            SemanticKind::IllegalArrayOperation(op.describe().into()),
          ));
        }
        check_operand(rhs, ty, rhs_pos, op)?;
      }

      self.code.emit_cmp(comparison(op));
      ty = ValType::BOOLEAN;
    }

    self.trace.end("expr", self.token.pos);
    Ok(ty)
  }

  fn parse_simple(&mut self) -> CompileResult<ValType> {
    self.trace.start("simple", self.token.pos);
    let lhs_pos = self.token.pos;
    let ty = if self.token.kind == TokenKind::Minus {
      self.advance()?;
      let pos = self.token.pos;
      let ty = self.parse_term()?;
      check_operand(ty, ValType::INTEGER, pos, TokenKind::Minus)?;
      self.code.emit(Instr::INeg);
      ty
    } else {
      self.parse_term()?
    };

    while self.token.kind.is_addop() {
      let op = self.token.kind;
      let (operand, instr) = match op {
        TokenKind::Or => (ValType::BOOLEAN, Instr::IOr),
        TokenKind::Plus => (ValType::INTEGER, Instr::IAdd),
        _ => (ValType::INTEGER, Instr::ISub),
      };
      check_operand(ty, operand, lhs_pos, op)?;
      self.advance()?;
      let rhs_pos = self.token.pos;
      let rhs = self.parse_term()?;
      check_operand(rhs, operand, rhs_pos, op)?;
      self.code.emit(instr);
    }

    self.trace.end("simple", self.token.pos);
    Ok(ty)
  }

  fn parse_term(&mut self) -> CompileResult<ValType> {
    self.trace.start("term", self.token.pos);
    let lhs_pos = self.token.pos;
    let ty = self.parse_factor()?;

    while self.token.kind.is_mulop() {
      let op = self.token.kind;
      let (operand, instr) = match op {
        TokenKind::And => (ValType::BOOLEAN, Instr::IAnd),
        TokenKind::Div => (ValType::INTEGER, Instr::IDiv),
        TokenKind::Rem => (ValType::INTEGER, Instr::IRem),
        _ => (ValType::INTEGER, Instr::IMul),
      };
      check_operand(ty, operand, lhs_pos, op)?;
      self.advance()?;
      let rhs_pos = self.token.pos;
      let rhs = self.parse_factor()?;
      check_operand(rhs, operand, rhs_pos, op)?;
      self.code.emit(instr);
    }

    self.trace.end("term", self.token.pos);
    Ok(ty)
  }

  fn parse_factor(&mut self) -> CompileResult<ValType> {
    self.trace.start("factor", self.token.pos);
    let ty = match self.token.kind {
      TokenKind::Id => {
        let (id, pos) = self.expect_id()?;
        let props = self.resolve(&id, pos)?;

        match self.token.kind {
          TokenKind::LBrack => {
            if !props.ty.is_array() {
              return Err(semantic(pos, SemanticKind::NotAnArray(id)));
            }
            let elem = props.ty.base_type();
            self.code.emit(Instr::ALoad(props.offset));
            self.parse_index(&id)?;
            self.code.emit(Instr::element_load(elem));
            elem
          }
          TokenKind::LParen => {
            if !props.ty.is_function() {
              return Err(semantic(pos, SemanticKind::NotAFunction(id)));
            }
            self.parse_arglist(&id, &props)?;
            let returns = props.ty.return_type();
            self.emit_invoke(&id, props);
            returns
          }
          _ => {
            if props.ty.is_callable() {
              return Err(semantic(pos, SemanticKind::NotAVariable(id)));
            }
            if props.ty.is_array_type() {
              self.code.emit(Instr::ALoad(props.offset));
            } else {
              self.code.emit(Instr::ILoad(props.offset));
            }
            props.ty
          }
        }
      }
      TokenKind::Num => {
        self.code.emit(Instr::Ldc(self.token.value.unwrap_or_default()));
        self.advance()?;
        ValType::INTEGER
      }
      TokenKind::LParen => {
        self.advance()?;
        let ty = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        ty
      }
      TokenKind::Not => {
        self.advance()?;
        let pos = self.token.pos;
        let ty = self.parse_factor()?;
        check_operand(ty, ValType::BOOLEAN, pos, TokenKind::Not)?;
        self.code.emit(Instr::Ldc(1));
        self.code.emit(Instr::IXor);
        ty
      }
      TokenKind::True => {
        self.code.emit(Instr::Ldc(1));
        self.advance()?;
        ValType::BOOLEAN
      }
      TokenKind::False => {
        self.code.emit(Instr::Ldc(0));
        self.advance()?;
        ValType::BOOLEAN
      }
      _ => return Err(self.unexpected("factor")),
    };
    self.trace.end("factor", self.token.pos);
    Ok(ty)
  }

  // --- helpers ------------------------------------------------------------

  fn advance(&mut self) -> CompileResult<()> {
    self.token = self.lexer.next_token()?;
    Ok(())
  }

  fn expect(&mut self, kind: TokenKind) -> CompileResult<()> {
    if self.token.kind == kind {
      self.advance()
    } else {
      Err(self.unexpected(kind.describe()))
    }
  }

  fn expect_id(&mut self) -> CompileResult<(String, SourcePos)> {
    if self.token.kind != TokenKind::Id {
      return Err(self.unexpected(TokenKind::Id.describe()));
    }
    let pos = self.token.pos;
    let id = self.token.lexeme.take().unwrap_or_default();
    self.advance()?;
    Ok((id, pos))
  }

  /// Syntax error naming what was expected and the lookahead actually found.
  fn unexpected(&self, expected: &str) -> CompileError {
    CompileError::syntax(self.token.pos, expected, self.token.kind.describe())
  }

  fn resolve(&self, id: &str, pos: SourcePos) -> CompileResult<IdProps> {
    self
      .symbols
      .resolve(id)
      .cloned()
      .ok_or_else(|| semantic(pos, SemanticKind::UnknownIdentifier(id.into())))
  }

  fn resolve_variable(&self, id: &str, pos: SourcePos) -> CompileResult<IdProps> {
    let props = self.resolve(id, pos)?;
    if props.ty.is_callable() {
      return Err(semantic(pos, SemanticKind::NotAVariable(id.into())));
    }
    Ok(props)
  }

  fn declare(&mut self, id: &str, props: IdProps, pos: SourcePos) -> CompileResult<()> {
    self
      .symbols
      .declare(id, props)
      .map(|_| ())
      .map_err(|err| self.declare_error(err, id, pos))
  }

  fn declare_error(&self, err: TableError, id: &str, pos: SourcePos) -> CompileError {
    match err {
      TableError::DuplicateKey => semantic(pos, SemanticKind::MultipleDefinition(id.into())),
      TableError::AllocationFailure { .. } => allocation(pos, err),
    }
  }

  fn emit_invoke(&mut self, id: &str, props: IdProps) {
    self.code.emit(Instr::Invoke {
      name: id.to_string(),
      returns: props.ty.return_type(),
      params: props.params,
    });
  }
}

fn semantic(pos: SourcePos, kind: SemanticKind) -> CompileError {
  CompileError::semantic(pos, kind)
}

fn allocation(pos: SourcePos, err: TableError) -> CompileError {
  CompileError::Allocation {
    pos,
    what: err.to_string(),
  }
}

fn check_types(
  found: ValType,
  expected: ValType,
  pos: SourcePos,
  context: impl FnOnce() -> String,
) -> CompileResult<()> {
  if found == expected {
    return Ok(());
  }
  Err(semantic(
    pos,
    SemanticKind::IncompatibleTypes {
      expected,
      found,
      context: context(),
    },
  ))
}

fn check_operand(
  found: ValType,
  expected: ValType,
  pos: SourcePos,
  op: TokenKind,
) -> CompileResult<()> {
  check_types(found, expected, pos, || format!("for operator {op}"))
}

fn comparison(op: TokenKind) -> Cmp {
  match op {
    TokenKind::Eq => Cmp::Eq,
    TokenKind::Ge => Cmp::Ge,
    TokenKind::Gt => Cmp::Gt,
    TokenKind::Le => Cmp::Le,
    TokenKind::Lt => Cmp::Lt,
    _ => Cmp::Ne,
  }
}

/// Rule-by-rule parse trace, printed to stderr when enabled.
#[derive(Debug, Default)]
struct Trace {
  enabled: bool,
  depth: usize,
}

impl Trace {
  fn start(&mut self, rule: &str, pos: SourcePos) {
    self.info(&format!("<{rule}>"), pos);
    self.depth += 1;
  }

  fn end(&mut self, rule: &str, pos: SourcePos) {
    self.depth = self.depth.saturating_sub(1);
    self.info(&format!("</{rule}>"), pos);
  }

  fn info(&self, what: &str, pos: SourcePos) {
    if self.enabled {
      eprintln!("{}", self.line(what, pos));
    }
  }

  /// One trace line, indented two spaces per open rule.
  fn line(&self, what: &str, pos: SourcePos) -> String {
    format!("{:indent$}{what} at {pos}.", "", indent = self.depth * 2)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn main_code(source: &str) -> Vec<Instr> {
    let program = parse(source).expect("program compiles");
    program.main().expect("main present").code.clone()
  }

  fn semantic_kind(source: &str) -> SemanticKind {
    match parse(source) {
      Err(CompileError::Semantic { kind, .. }) => kind,
      other => panic!("expected a semantic error, got {other:?}"),
    }
  }

  #[test]
  fn assignment_emits_in_program_order() {
    let code = main_code("program P: main: int x; let x = 3 + 4");
    assert_eq!(
      code,
      vec![
        Instr::Ldc(3),
        Instr::Ldc(4),
        Instr::IAdd,
        Instr::IStore(1),
        Instr::Return,
      ]
    );
  }

  #[test]
  fn precedence_follows_the_grammar() {
    let code = main_code("program P: main: int x; let x = -1 + 2 * 3 rem 4");
    assert_eq!(
      code,
      vec![
        Instr::Ldc(1),
        Instr::INeg,
        Instr::Ldc(2),
        Instr::Ldc(3),
        Instr::IMul,
        Instr::Ldc(4),
        Instr::IRem,
        Instr::IAdd,
        Instr::IStore(1),
        Instr::Return,
      ]
    );
  }

  #[test]
  fn while_loop_protocol() {
    let code = main_code("program P: main: bool b; while b: let b = false end");
    assert_eq!(
      code,
      vec![
        Instr::Label(Label(0)),
        Instr::ILoad(1),
        Instr::IfEq(Label(1)),
        Instr::Ldc(0),
        Instr::IStore(1),
        Instr::Goto(Label(0)),
        Instr::Label(Label(1)),
        Instr::Return,
      ]
    );
  }

  #[test]
  fn array_allocation_and_element_store() {
    let code = main_code(
      "program P: main: int array a; bool array f; \
       let a = array 5; let a[2] = 9; let f = array 1; let f[0] = true",
    );
    assert_eq!(
      code,
      vec![
        Instr::Ldc(5),
        Instr::NewArray(ElemType::Int),
        Instr::AStore(1),
        Instr::ALoad(1),
        Instr::Ldc(2),
        Instr::Ldc(9),
        Instr::IAStore,
        Instr::Ldc(1),
        Instr::NewArray(ElemType::Bool),
        Instr::AStore(2),
        Instr::ALoad(2),
        Instr::Ldc(0),
        Instr::Ldc(1),
        Instr::BAStore,
        Instr::Return,
      ]
    );
  }

  #[test]
  fn parameters_are_addressed_by_frame_offset() {
    let program = parse(
      "program P: add(int a, int b) -> int: int t; let t = a + b; return t main: output(add(1, 2))",
    )
    .expect("program compiles");

    let add = program.subroutine("add").expect("add");
    assert_eq!(add.params, vec![ValType::INTEGER, ValType::INTEGER]);
    assert_eq!(add.returns, ValType::INTEGER);
    assert_eq!(add.frame_width, 3);
    assert_eq!(
      add.code,
      vec![
        Instr::ILoad(0),
        Instr::ILoad(1),
        Instr::IAdd,
        Instr::IStore(2),
        Instr::ILoad(2),
        Instr::IReturn,
      ]
    );
  }

  #[test]
  fn output_mixes_strings_and_expressions() {
    let code = main_code(r#"program P: main: output("n = " .. 4 .. "\n")"#);
    assert_eq!(
      code,
      vec![
        Instr::PrintString("n = ".into()),
        Instr::Ldc(4),
        Instr::Print(ValType::INTEGER),
        Instr::PrintString("\n".into()),
        Instr::Return,
      ]
    );
  }

  #[test]
  fn chillax_is_an_empty_body() {
    assert_eq!(main_code("program P: main: chillax"), vec![Instr::Return]);
  }

  #[test]
  fn trailing_end_after_main_is_accepted() {
    assert_eq!(main_code("program P: main: chillax end"), vec![Instr::Return]);
  }

  #[test]
  fn syntax_errors_name_expected_and_found() {
    match parse("program P main: chillax") {
      Err(CompileError::Syntax {
        pos,
        expected,
        found,
      }) => {
        assert_eq!(pos, SourcePos::new(1, 11));
        assert_eq!(expected, "':'");
        assert_eq!(found, "'main'");
      }
      other => panic!("expected a syntax error, got {other:?}"),
    }
  }

  #[test]
  fn unknown_identifier() {
    assert_eq!(
      semantic_kind("program P: main: let y = 1"),
      SemanticKind::UnknownIdentifier("y".into())
    );
  }

  #[test]
  fn duplicate_definitions() {
    assert_eq!(
      semantic_kind("program P: main: int x; bool x; chillax"),
      SemanticKind::MultipleDefinition("x".into())
    );
    assert_eq!(
      semantic_kind("program P: f(int a, int a): chillax main: chillax"),
      SemanticKind::MultipleDefinition("a".into())
    );
    assert_eq!(
      semantic_kind("program P: f(int a): chillax f(int b): chillax main: chillax"),
      SemanticKind::MultipleDefinition("f".into())
    );
  }

  #[test]
  fn calls_are_checked_against_the_signature() {
    let prelude = "program P: p(int a, bool b): chillax f(int a) -> int: return a main: int x; ";
    assert_eq!(
      semantic_kind(&format!("{prelude}p(1)")),
      SemanticKind::TooFewArguments("p".into())
    );
    assert_eq!(
      semantic_kind(&format!("{prelude}p(1, true, 3)")),
      SemanticKind::TooManyArguments("p".into())
    );
    assert!(matches!(
      semantic_kind(&format!("{prelude}p(true, true)")),
      SemanticKind::IncompatibleTypes { expected, found, .. }
        if expected == ValType::INTEGER && found == ValType::BOOLEAN
    ));
    assert_eq!(
      semantic_kind(&format!("{prelude}f(1)")),
      SemanticKind::NotAProcedure("f".into())
    );
    assert_eq!(
      semantic_kind(&format!("{prelude}let x = p(1, true)")),
      SemanticKind::NotAFunction("p".into())
    );
    assert_eq!(
      semantic_kind(&format!("{prelude}let x = x(1)")),
      SemanticKind::NotAFunction("x".into())
    );
    assert_eq!(
      semantic_kind(&format!("{prelude}let x = f")),
      SemanticKind::NotAVariable("f".into())
    );
  }

  #[test]
  fn indexing_requires_an_array() {
    assert_eq!(
      semantic_kind("program P: main: int x; let x[0] = 1"),
      SemanticKind::NotAnArray("x".into())
    );
    assert_eq!(
      semantic_kind("program P: main: int x, y; let y = x[0]"),
      SemanticKind::NotAnArray("x".into())
    );
    assert_eq!(
      semantic_kind("program P: main: int x; let x = array 3"),
      SemanticKind::NotAnArray("x".into())
    );
  }

  #[test]
  fn operator_type_errors() {
    assert!(matches!(
      semantic_kind("program P: main: int x; let x = 1 + true"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for operator '+'"
    ));
    assert!(matches!(
      semantic_kind("program P: main: bool b; let b = 1 < false"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for operator '<'"
    ));
    assert!(matches!(
      semantic_kind("program P: main: bool b; let b = not 3"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for operator 'not'"
    ));
    assert!(matches!(
      semantic_kind("program P: main: int x; let x = true"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for assignment to 'x'"
    ));
    assert!(matches!(
      semantic_kind("program P: main: int x; while x: chillax end"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for 'while' guard"
    ));
  }

  #[test]
  fn guards_sizes_and_indices_must_be_typed() {
    assert!(matches!(
      semantic_kind("program P: main: if 1: chillax end"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for 'if' guard"
    ));
    assert!(matches!(
      semantic_kind("program P: main: if true: chillax elif 2: chillax end"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for 'elif' guard"
    ));
    assert!(matches!(
      semantic_kind("program P: main: int array a; let a = array true"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for array size of 'a'"
    ));
    assert!(matches!(
      semantic_kind("program P: main: int array a; int x; let a = array 2; let x = a[false]"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for array index of 'a'"
    ));
  }

  #[test]
  fn arrays_reject_scalar_only_operations() {
    assert_eq!(
      semantic_kind("program P: main: int array a; let a[0] = array 3"),
      SemanticKind::IllegalArrayOperation("array allocation into an element".into())
    );
    assert_eq!(
      semantic_kind("program P: main: int array a; let a = array 1; output(a)"),
      SemanticKind::IllegalArrayOperation("'output'".into())
    );
    assert_eq!(
      semantic_kind("program P: main: int array a, b; bool c; let c = a = b"),
      SemanticKind::IllegalArrayOperation("'='".into())
    );
    assert_eq!(
      semantic_kind("program P: main: int array a, b; bool c; let c = a /= b"),
      SemanticKind::IllegalArrayOperation("'/='".into())
    );
  }

  #[test]
  fn trace_lines_indent_per_open_rule() {
    let at = |line, col| SourcePos { line, col };
    let mut trace = Trace {
      enabled: false,
      depth: 0,
    };
    assert_eq!(trace.line("<program>", at(1, 1)), "<program> at 1:1.");

    trace.start("program", at(1, 1));
    trace.start("vardef", at(1, 18));
    assert_eq!(trace.line("<type>", at(1, 18)), "    <type> at 1:18.");

    trace.end("vardef", at(1, 24));
    assert_eq!(trace.line("</vardef>", at(1, 24)), "  </vardef> at 1:24.");
    trace.end("program", at(2, 1));
    trace.end("program", at(2, 1));
    assert_eq!(trace.depth, 0);
  }

  #[test]
  fn return_must_match_the_subroutine_kind() {
    assert_eq!(
      semantic_kind("program P: p(int a): return a main: chillax"),
      SemanticKind::UnexpectedReturnValue
    );
    assert_eq!(
      semantic_kind("program P: f(int a) -> bool: return main: chillax"),
      SemanticKind::MissingReturnValue
    );
    assert!(matches!(
      semantic_kind("program P: f(int a) -> bool: return a main: chillax"),
      SemanticKind::IncompatibleTypes { context, .. } if context == "for 'return' statement"
    ));
  }

  #[test]
  fn subroutines_cannot_see_main_variables() {
    assert_eq!(
      semantic_kind("program P: f(int a): let g = a main: int g; chillax"),
      SemanticKind::UnknownIdentifier("g".into())
    );
  }

  #[test]
  fn recursion_resolves_the_enclosing_subroutine() {
    let program = parse(
      "program P: fact(int n) -> int: if n <= 1: return 1 end; return n * fact(n - 1) \
       main: output(fact(5))",
    )
    .expect("program compiles");
    let fact = program.subroutine("fact").expect("fact");
    assert!(fact.code.iter().any(|instr| matches!(
      instr,
      Instr::Invoke { name, .. } if name == "fact"
    )));
  }

  #[test]
  fn input_targets_scalars_and_elements() {
    let code = main_code("program P: main: int x; bool array b; input(x); input(b[x])");
    assert_eq!(
      code,
      vec![
        Instr::Read(ValType::INTEGER),
        Instr::IStore(1),
        Instr::ALoad(2),
        Instr::ILoad(1),
        Instr::Read(ValType::BOOLEAN),
        Instr::BAStore,
        Instr::Return,
      ]
    );
    assert_eq!(
      semantic_kind("program P: main: int array a; input(a)"),
      SemanticKind::ExpectedScalar("a".into())
    );
  }

  #[test]
  fn statement_level_diagnostics() {
    match parse("program P: main: 5") {
      Err(CompileError::Syntax {
        expected, found, ..
      }) => {
        assert_eq!(expected, "statement");
        assert_eq!(found, "numeric literal");
      }
      other => panic!("expected a syntax error, got {other:?}"),
    }
    match parse("program P: main: int x; let x = ;") {
      Err(CompileError::Syntax { expected, .. }) => {
        assert_eq!(expected, "expression or array allocation");
      }
      other => panic!("expected a syntax error, got {other:?}"),
    }
  }
}
