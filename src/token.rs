//! Tokens produced by the lexer and consumed one at a time by the parser.

use std::fmt;

/// Line and column of the first character of a token, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
  pub line: usize,
  pub col: usize,
}

impl SourcePos {
  pub fn new(line: usize, col: usize) -> Self {
    Self { line, col }
  }
}

impl fmt::Display for SourcePos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Eof,
  Id,
  Num,
  Str,

  // keywords
  Array,
  Bool,
  Chillax,
  Elif,
  Else,
  End,
  If,
  Input,
  Int,
  Let,
  Main,
  Output,
  Program,
  Return,
  While,
  False,
  True,
  Not,

  // operators and punctuation
  Eq,
  Ge,
  Gt,
  Le,
  Lt,
  Ne,
  Minus,
  Or,
  Plus,
  And,
  Div,
  Mul,
  Rem,
  Arrow,
  Colon,
  Comma,
  DotDot,
  LBrack,
  LParen,
  RBrack,
  RParen,
  Semicolon,
}

impl TokenKind {
  /// Name used in "expected X, but found Y" diagnostics.
  pub fn describe(self) -> &'static str {
    match self {
      TokenKind::Eof => "end-of-file",
      TokenKind::Id => "identifier",
      TokenKind::Num => "numeric literal",
      TokenKind::Str => "string literal",
      TokenKind::Array => "'array'",
      TokenKind::Bool => "'bool'",
      TokenKind::Chillax => "'chillax'",
      TokenKind::Elif => "'elif'",
      TokenKind::Else => "'else'",
      TokenKind::End => "'end'",
      TokenKind::If => "'if'",
      TokenKind::Input => "'input'",
      TokenKind::Int => "'int'",
      TokenKind::Let => "'let'",
      TokenKind::Main => "'main'",
      TokenKind::Output => "'output'",
      TokenKind::Program => "'program'",
      TokenKind::Return => "'return'",
      TokenKind::While => "'while'",
      TokenKind::False => "'false'",
      TokenKind::True => "'true'",
      TokenKind::Not => "'not'",
      TokenKind::Eq => "'='",
      TokenKind::Ge => "'>='",
      TokenKind::Gt => "'>'",
      TokenKind::Le => "'<='",
      TokenKind::Lt => "'<'",
      TokenKind::Ne => "'/='",
      TokenKind::Minus => "'-'",
      TokenKind::Or => "'or'",
      TokenKind::Plus => "'+'",
      TokenKind::And => "'and'",
      TokenKind::Div => "'/'",
      TokenKind::Mul => "'*'",
      TokenKind::Rem => "'rem'",
      TokenKind::Arrow => "'->'",
      TokenKind::Colon => "':'",
      TokenKind::Comma => "','",
      TokenKind::DotDot => "'..'",
      TokenKind::LBrack => "'['",
      TokenKind::LParen => "'('",
      TokenKind::RBrack => "']'",
      TokenKind::RParen => "')'",
      TokenKind::Semicolon => "';'",
    }
  }

  pub fn starts_factor(self) -> bool {
    matches!(
      self,
      TokenKind::Id
        | TokenKind::Num
        | TokenKind::LParen
        | TokenKind::Not
        | TokenKind::True
        | TokenKind::False
    )
  }

  pub fn starts_expr(self) -> bool {
    self == TokenKind::Minus || self.starts_factor()
  }

  pub fn is_addop(self) -> bool {
    matches!(self, TokenKind::Minus | TokenKind::Or | TokenKind::Plus)
  }

  pub fn is_mulop(self) -> bool {
    matches!(
      self,
      TokenKind::And | TokenKind::Div | TokenKind::Mul | TokenKind::Rem
    )
  }

  /// Ordering comparisons; these only apply to integers.
  pub fn is_ordop(self) -> bool {
    matches!(
      self,
      TokenKind::Ge | TokenKind::Gt | TokenKind::Le | TokenKind::Lt
    )
  }

  pub fn is_relop(self) -> bool {
    self.is_ordop() || matches!(self, TokenKind::Eq | TokenKind::Ne)
  }

  pub fn is_type(self) -> bool {
    matches!(self, TokenKind::Bool | TokenKind::Int)
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.describe())
  }
}

/// The lookahead unit. Only identifiers carry a lexeme, only numeric literals
/// a value and only string literals a (decoded) string payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub lexeme: Option<String>,
  pub value: Option<i32>,
  pub string: Option<String>,
  pub pos: SourcePos,
}

impl Token {
  pub fn new(kind: TokenKind, pos: SourcePos) -> Self {
    Self {
      kind,
      lexeme: None,
      value: None,
      string: None,
      pos,
    }
  }

  pub fn ident(lexeme: String, pos: SourcePos) -> Self {
    Self {
      lexeme: Some(lexeme),
      ..Self::new(TokenKind::Id, pos)
    }
  }

  pub fn number(value: i32, pos: SourcePos) -> Self {
    Self {
      value: Some(value),
      ..Self::new(TokenKind::Num, pos)
    }
  }

  pub fn string(string: String, pos: SourcePos) -> Self {
    Self {
      string: Some(string),
      ..Self::new(TokenKind::Str, pos)
    }
  }
}
