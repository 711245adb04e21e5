//! Lexical analysis: turns the source text into tokens, one per request.
//!
//! The lexer keeps a single character of lookahead plus the line and column
//! of that character. Brace comments nest. Every lexical error is fatal and
//! carries the position it was detected at.

use crate::error::{CompileError, CompileResult};
use crate::token::{SourcePos, Token, TokenKind};
use std::str::Chars;

/// Longest identifier the language accepts.
pub const MAX_ID_LEN: usize = 32;

const INITIAL_STRING_CAPACITY: usize = 1024;

/// Reserved words, sorted so they can be binary searched.
const RESERVED: [(&str, TokenKind); 21] = [
  ("and", TokenKind::And),
  ("array", TokenKind::Array),
  ("bool", TokenKind::Bool),
  ("chillax", TokenKind::Chillax),
  ("elif", TokenKind::Elif),
  ("else", TokenKind::Else),
  ("end", TokenKind::End),
  ("false", TokenKind::False),
  ("if", TokenKind::If),
  ("input", TokenKind::Input),
  ("int", TokenKind::Int),
  ("let", TokenKind::Let),
  ("main", TokenKind::Main),
  ("not", TokenKind::Not),
  ("or", TokenKind::Or),
  ("output", TokenKind::Output),
  ("program", TokenKind::Program),
  ("rem", TokenKind::Rem),
  ("return", TokenKind::Return),
  ("true", TokenKind::True),
  ("while", TokenKind::While),
];

pub struct Lexer<'a> {
  chars: Chars<'a>,
  ch: Option<char>,
  last: Option<char>,
  line: usize,
  col: usize,
}

impl<'a> Lexer<'a> {
  /// Prime the lexer with the first character of `source`.
  pub fn new(source: &'a str) -> Self {
    let mut lexer = Self {
      chars: source.chars(),
      ch: None,
      last: None,
      line: 1,
      col: 0,
    };
    lexer.next_char();
    lexer
  }

  fn pos(&self) -> SourcePos {
    SourcePos::new(self.line, self.col)
  }

  fn next_char(&mut self) {
    self.last = self.ch;
    self.ch = self.chars.next();
    if self.ch.is_none() {
      self.col += 1;
      return;
    }

    if self.last == Some('\n') {
      self.line += 1;
      self.col = 1;
    } else {
      self.col += 1;
    }
  }

  /// Scan the next token, skipping whitespace and comments first.
  pub fn next_token(&mut self) -> CompileResult<Token> {
    loop {
      match self.ch {
        Some(c) if c.is_whitespace() => self.next_char(),
        Some('{') => {
          self.skip_comment()?;
          self.next_char();
        }
        _ => break,
      }
    }

    let start = self.pos();
    let Some(c) = self.ch else {
      return Ok(Token::new(TokenKind::Eof, start));
    };

    if c.is_ascii_alphabetic() || c == '_' {
      return self.process_word(start);
    }
    if c.is_ascii_digit() {
      return self.process_number(start);
    }
    if c == '"' {
      self.next_char();
      return self.process_string(start);
    }

    self.next_char();
    let kind = match c {
      '=' => TokenKind::Eq,
      '>' => self.pick('=', TokenKind::Ge, TokenKind::Gt),
      '<' => self.pick('=', TokenKind::Le, TokenKind::Lt),
      '/' => self.pick('=', TokenKind::Ne, TokenKind::Div),
      '-' => self.pick('>', TokenKind::Arrow, TokenKind::Minus),
      '|' => self.doubled('|', TokenKind::Or, start)?,
      '&' => self.doubled('&', TokenKind::And, start)?,
      '.' => self.doubled('.', TokenKind::DotDot, start)?,
      '+' => TokenKind::Plus,
      '*' => TokenKind::Mul,
      '%' => TokenKind::Rem,
      ':' => TokenKind::Colon,
      ',' => TokenKind::Comma,
      '[' => TokenKind::LBrack,
      '(' => TokenKind::LParen,
      ']' => TokenKind::RBrack,
      ')' => TokenKind::RParen,
      ';' => TokenKind::Semicolon,
      other => return Err(illegal_character(other, start)),
    };
    Ok(Token::new(kind, start))
  }

  /// Resolve a one-or-two character operator on the character after the first.
  fn pick(&mut self, second: char, double: TokenKind, single: TokenKind) -> TokenKind {
    if self.ch == Some(second) {
      self.next_char();
      double
    } else {
      single
    }
  }

  /// Operators that are only legal when the character is doubled.
  fn doubled(&mut self, c: char, kind: TokenKind, start: SourcePos) -> CompileResult<TokenKind> {
    if self.ch == Some(c) {
      self.next_char();
      Ok(kind)
    } else {
      Err(illegal_character(c, start))
    }
  }

  fn process_word(&mut self, start: SourcePos) -> CompileResult<Token> {
    let mut lexeme = String::new();
    while let Some(c) = self.ch
      && (c.is_ascii_alphanumeric() || c == '_')
    {
      if lexeme.len() == MAX_ID_LEN {
        return Err(CompileError::lexical(start, "identifier too long"));
      }
      lexeme.push(c);
      self.next_char();
    }

    match RESERVED.binary_search_by(|(word, _)| (*word).cmp(lexeme.as_str())) {
      Ok(index) => Ok(Token::new(RESERVED[index].1, start)),
      Err(_) => Ok(Token::ident(lexeme, start)),
    }
  }

  fn process_number(&mut self, start: SourcePos) -> CompileResult<Token> {
    let mut value: i32 = 0;
    while let Some(digit) = self.ch.and_then(|c| c.to_digit(10)) {
      let digit = digit as i32;
      if value > (i32::MAX - digit) / 10 {
        return Err(CompileError::lexical(start, "number too large"));
      }
      value = value * 10 + digit;
      self.next_char();
    }
    Ok(Token::number(value, start))
  }

  /// Scan a string literal whose opening quote has been consumed.
  fn process_string(&mut self, start: SourcePos) -> CompileResult<Token> {
    let mut string = String::with_capacity(INITIAL_STRING_CAPACITY);
    loop {
      let Some(c) = self.ch else {
        return Err(CompileError::lexical(start, "string not closed"));
      };
      if c == '"' {
        break;
      }
      if !is_printable(c) {
        return Err(CompileError::lexical(
          self.pos(),
          format!("non-printable character (ASCII #{}) in string", c as u32),
        ));
      }

      if c == '\\' {
        let escape_pos = self.pos();
        self.next_char();
        let decoded = match self.ch {
          Some('n') => '\n',
          Some('t') => '\t',
          Some('"') => '"',
          Some('\\') => '\\',
          Some(other) => {
            return Err(CompileError::lexical(
              escape_pos,
              format!("illegal escape code '\\{other}' in string"),
            ));
          }
          None => return Err(CompileError::lexical(start, "string not closed")),
        };
        string.push(decoded);
      } else {
        string.push(c);
      }
      self.next_char();
    }
    self.next_char();
    Ok(Token::string(string, start))
  }

  /// Skip a comment starting at the current `{`, leaving the lexer on its
  /// closing `}`. Nested comments are skipped recursively.
  fn skip_comment(&mut self) -> CompileResult<()> {
    let start = self.pos();
    self.next_char();
    loop {
      match self.ch {
        None => return Err(CompileError::lexical(start, "comment not closed")),
        Some('}') => return Ok(()),
        Some('{') => self.skip_comment()?,
        Some(_) => {}
      }
      self.next_char();
    }
  }
}

impl Iterator for Lexer<'_> {
  type Item = CompileResult<Token>;

  /// Tokens up to, but not including, end-of-file.
  fn next(&mut self) -> Option<Self::Item> {
    match self.next_token() {
      Ok(token) if token.kind == TokenKind::Eof => None,
      other => Some(other),
    }
  }
}

/// Lex the whole input into a vector of tokens terminated by an `Eof` marker.
pub fn tokenize(source: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer::new(source);
  let mut tokens = Vec::new();
  loop {
    let token = lexer.next_token()?;
    let eof = token.kind == TokenKind::Eof;
    tokens.push(token);
    if eof {
      return Ok(tokens);
    }
  }
}

fn is_printable(c: char) -> bool {
  c == ' ' || c.is_ascii_graphic()
}

fn illegal_character(c: char, pos: SourcePos) -> CompileError {
  CompileError::lexical(pos, format!("illegal character '{c}' (ASCII #{})", c as u32))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
      .expect("source lexes")
      .into_iter()
      .map(|token| token.kind)
      .collect()
  }

  fn lex_error(source: &str) -> (SourcePos, String) {
    match tokenize(source) {
      Err(CompileError::Lexical { pos, message }) => (pos, message),
      other => panic!("expected a lexical error, got {other:?}"),
    }
  }

  #[test]
  fn reserved_table_is_sorted() {
    assert!(RESERVED.windows(2).all(|pair| pair[0].0 < pair[1].0));
  }

  #[test]
  fn keywords_and_identifiers() {
    let tokens = tokenize("program Demo while whilst _x1").expect("source lexes");
    let kinds: Vec<TokenKind> = tokens.iter().map(|token| token.kind).collect();
    assert_eq!(
      kinds,
      vec![
        TokenKind::Program,
        TokenKind::Id,
        TokenKind::While,
        TokenKind::Id,
        TokenKind::Id,
        TokenKind::Eof,
      ]
    );
    assert_eq!(tokens[0].lexeme, None);
    assert_eq!(tokens[1].lexeme.as_deref(), Some("Demo"));
    assert_eq!(tokens[3].lexeme.as_deref(), Some("whilst"));
  }

  #[test]
  fn operators_use_one_character_of_lookahead() {
    assert_eq!(
      kinds("> >= < <= / /= - -> .. = + * % && || : , [ ] ( ) ;"),
      vec![
        TokenKind::Gt,
        TokenKind::Ge,
        TokenKind::Lt,
        TokenKind::Le,
        TokenKind::Div,
        TokenKind::Ne,
        TokenKind::Minus,
        TokenKind::Arrow,
        TokenKind::DotDot,
        TokenKind::Eq,
        TokenKind::Plus,
        TokenKind::Mul,
        TokenKind::Rem,
        TokenKind::And,
        TokenKind::Or,
        TokenKind::Colon,
        TokenKind::Comma,
        TokenKind::LBrack,
        TokenKind::RBrack,
        TokenKind::LParen,
        TokenKind::RParen,
        TokenKind::Semicolon,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn positions_track_lines_and_columns() {
    let tokens = tokenize("let x\n  = 42").expect("source lexes");
    let positions: Vec<SourcePos> = tokens.iter().map(|token| token.pos).collect();
    assert_eq!(
      positions[..4].to_vec(),
      vec![
        SourcePos::new(1, 1),
        SourcePos::new(1, 5),
        SourcePos::new(2, 3),
        SourcePos::new(2, 5),
      ]
    );
    assert_eq!(tokens[3].value, Some(42));
  }

  #[test]
  fn nested_comments_are_skipped() {
    assert_eq!(
      kinds("{ outer { inner } still outer } chillax"),
      vec![TokenKind::Chillax, TokenKind::Eof]
    );
  }

  #[test]
  fn unterminated_comment_reports_its_start() {
    let (pos, message) = lex_error("chillax\n  { open { nested }");
    assert_eq!(message, "comment not closed");
    assert_eq!(pos, SourcePos::new(2, 3));
  }

  #[test]
  fn string_escapes_are_decoded() {
    let tokens = tokenize(r#"output("a\tb\n\"q\" \\")"#).expect("source lexes");
    assert_eq!(tokens[2].kind, TokenKind::Str);
    assert_eq!(tokens[2].string.as_deref(), Some("a\tb\n\"q\" \\"));
    assert_eq!(tokens[2].pos, SourcePos::new(1, 8));
  }

  #[test]
  fn bad_strings_are_fatal() {
    assert_eq!(lex_error(r#""abc"#).1, "string not closed");
    assert_eq!(lex_error(r#""a\qb""#).1, "illegal escape code '\\q' in string");
    assert_eq!(
      lex_error("\"tab\there\"").1,
      "non-printable character (ASCII #9) in string"
    );
  }

  #[test]
  fn long_strings_grow() {
    let body = "x".repeat(3000);
    let tokens = tokenize(&format!("\"{body}\"")).expect("source lexes");
    assert_eq!(tokens[0].string.as_deref(), Some(body.as_str()));
  }

  #[test]
  fn number_limits() {
    let tokens = tokenize("2147483647").expect("source lexes");
    assert_eq!(tokens[0].value, Some(i32::MAX));
    assert_eq!(lex_error("2147483648").1, "number too large");
  }

  #[test]
  fn identifier_length_limit() {
    let ok = "a".repeat(MAX_ID_LEN);
    assert!(tokenize(&ok).is_ok());
    let (pos, message) = lex_error(&format!("  {ok}b"));
    assert_eq!(message, "identifier too long");
    assert_eq!(pos, SourcePos::new(1, 3));
  }

  #[test]
  fn illegal_characters() {
    let (pos, message) = lex_error("let x = 1 # 2");
    assert_eq!(message, "illegal character '#' (ASCII #35)");
    assert_eq!(pos, SourcePos::new(1, 11));
    assert_eq!(lex_error("a & b").1, "illegal character '&' (ASCII #38)");
    assert_eq!(lex_error("a . b").1, "illegal character '.' (ASCII #46)");
  }

  #[test]
  fn iterator_stops_before_eof() {
    let collected: Vec<TokenKind> = Lexer::new("true false")
      .map(|token| token.expect("lexes").kind)
      .collect();
    assert_eq!(collected, vec![TokenKind::True, TokenKind::False]);
  }
}
