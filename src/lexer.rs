//! Hand-rolled, pull-based, indentation-sensitive tokenizer.
//!
//! `Lexer::next_token` returns one [`Token`] per call, ending in a stream
//! of `Eof`. Significant whitespace is folded into synthetic `Indent` /
//! `Dedent` / `Newline` tokens by an indent-width stack so the compiler
//! never has to look at raw columns.

use span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  LeftParen,
  RightParen,
  LeftBrace,
  RightBrace,
  LeftBracket,
  RightBracket,
  Comma,
  Dot,
  Minus,
  Plus,
  Semicolon,
  Colon,
  At,
  Slash,
  SlashSlash,
  Star,
  StarStar,
  Percent,

  Bang,
  BangEqual,
  Equal,
  EqualEqual,
  Greater,
  GreaterEqual,
  Less,
  LessEqual,

  Identifier,
  String,
  FString,
  Number,

  And,
  As,
  Assert,
  Break,
  Case,
  Class,
  Continue,
  Def,
  Del,
  Elif,
  Else,
  Except,
  False,
  Finally,
  For,
  From,
  If,
  Import,
  In,
  Is,
  Match,
  Nil,
  Not,
  Or,
  Pass,
  Raise,
  Return,
  Try,
  True,
  Var,
  While,
  With,

  Indent,
  Dedent,
  Newline,

  Error,
  Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
  pub kind: TokenKind,
  pub lexeme: &'src str,
  pub span: Span,
  pub line: u32,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
  ("and", TokenKind::And),
  ("as", TokenKind::As),
  ("assert", TokenKind::Assert),
  ("break", TokenKind::Break),
  ("case", TokenKind::Case),
  ("class", TokenKind::Class),
  ("continue", TokenKind::Continue),
  ("def", TokenKind::Def),
  ("del", TokenKind::Del),
  ("elif", TokenKind::Elif),
  ("else", TokenKind::Else),
  ("except", TokenKind::Except),
  ("False", TokenKind::False),
  ("finally", TokenKind::Finally),
  ("for", TokenKind::For),
  ("from", TokenKind::From),
  ("if", TokenKind::If),
  ("import", TokenKind::Import),
  ("in", TokenKind::In),
  ("is", TokenKind::Is),
  ("match", TokenKind::Match),
  ("nil", TokenKind::Nil),
  ("None", TokenKind::Nil),
  ("not", TokenKind::Not),
  ("or", TokenKind::Or),
  ("pass", TokenKind::Pass),
  ("raise", TokenKind::Raise),
  ("return", TokenKind::Return),
  ("try", TokenKind::Try),
  ("True", TokenKind::True),
  ("var", TokenKind::Var),
  ("while", TokenKind::While),
  ("with", TokenKind::With),
];

fn keyword_lookup(text: &str) -> Option<TokenKind> {
  KEYWORDS.iter().find(|(k, _)| *k == text).map(|(_, t)| *t)
}

fn is_alpha(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_digit(c: u8) -> bool {
  c.is_ascii_digit()
}

/// Maximum nested indentation levels; matches the fixed-size stack the
/// original tokenizer this language is modeled on uses.
const MAX_INDENT_DEPTH: usize = 32;

pub struct Lexer<'src> {
  src: &'src str,
  bytes: &'src [u8],
  start: usize,
  current: usize,
  line: u32,
  indent_stack: Vec<u32>,
  pending_dedents: u32,
  at_line_start: bool,
}

impl<'src> Lexer<'src> {
  pub fn new(src: &'src str) -> Lexer<'src> {
    Lexer {
      src,
      bytes: src.as_bytes(),
      start: 0,
      current: 0,
      line: 1,
      indent_stack: vec![0],
      pending_dedents: 0,
      at_line_start: true,
    }
  }

  fn is_at_end(&self) -> bool {
    self.current >= self.bytes.len()
  }

  fn peek(&self) -> u8 {
    if self.is_at_end() {
      0
    } else {
      self.bytes[self.current]
    }
  }

  fn peek_next(&self) -> u8 {
    if self.current + 1 >= self.bytes.len() {
      0
    } else {
      self.bytes[self.current + 1]
    }
  }

  fn advance(&mut self) -> u8 {
    let c = self.bytes[self.current];
    self.current += 1;
    c
  }

  fn matches(&mut self, expected: u8) -> bool {
    if self.is_at_end() || self.bytes[self.current] != expected {
      return false;
    }
    self.current += 1;
    true
  }

  fn lexeme(&self) -> &'src str {
    &self.src[self.start..self.current]
  }

  fn span(&self) -> Span {
    Span::from(self.start..self.current)
  }

  fn make(&self, kind: TokenKind) -> Token<'src> {
    Token {
      kind,
      lexeme: self.lexeme(),
      span: self.span(),
      line: self.line,
    }
  }

  fn error(&self, message: &'static str) -> Token<'src> {
    Token {
      kind: TokenKind::Error,
      lexeme: message,
      span: self.span(),
      line: self.line,
    }
  }

  /// Skips spaces, tabs, carriage returns, and `#` comments that are not
  /// at the start of a line (those are handled by `handle_line_start`).
  fn skip_whitespace(&mut self) {
    loop {
      match self.peek() {
        b' ' | b'\t' | b'\r' => {
          self.advance();
        }
        b'#' => {
          while self.peek() != b'\n' && !self.is_at_end() {
            self.advance();
          }
        }
        _ => break,
      }
    }
  }

  /// Consumes leading indentation on a fresh line, skipping blank and
  /// comment-only lines, and returns an `Indent`/`Dedent`/`Error` token
  /// if the indentation changed, or `None` if it stayed the same (in
  /// which case normal tokenization should continue on this line).
  fn handle_line_start(&mut self) -> Option<Token<'src>> {
    self.at_line_start = false;
    loop {
      let mut indent: u32 = 0;
      loop {
        match self.peek() {
          b' ' => {
            indent += 1;
            self.advance();
          }
          b'\t' => {
            indent += 4;
            self.advance();
          }
          _ => break,
        }
      }
      self.start = self.current;

      if self.peek() == b'\n' {
        self.advance();
        self.line += 1;
        continue;
      }
      if self.peek() == b'#' {
        while self.peek() != b'\n' && !self.is_at_end() {
          self.advance();
        }
        if self.peek() == b'\n' {
          self.advance();
          self.line += 1;
          continue;
        }
      }
      if self.is_at_end() {
        if self.indent_stack.len() > 1 {
          self.indent_stack.pop();
          self.pending_dedents = (self.indent_stack.len() - 1) as u32;
          return Some(self.make(TokenKind::Dedent));
        }
        return Some(self.make(TokenKind::Eof));
      }

      let top = *self.indent_stack.last().unwrap();
      if indent > top {
        if self.indent_stack.len() >= MAX_INDENT_DEPTH {
          return Some(self.error("indentation nested too deeply"));
        }
        self.indent_stack.push(indent);
        return Some(self.make(TokenKind::Indent));
      } else if indent < top {
        while self.indent_stack.len() > 1 && *self.indent_stack.last().unwrap() > indent {
          self.indent_stack.pop();
          self.pending_dedents += 1;
        }
        if *self.indent_stack.last().unwrap() != indent {
          return Some(self.error("inconsistent indentation"));
        }
        if self.pending_dedents > 0 {
          self.pending_dedents -= 1;
          return Some(self.make(TokenKind::Dedent));
        }
      }
      return None;
    }
  }

  pub fn next_token(&mut self) -> Token<'src> {
    if self.pending_dedents > 0 {
      self.pending_dedents -= 1;
      self.start = self.current;
      return self.make(TokenKind::Dedent);
    }

    if self.at_line_start {
      if let Some(tok) = self.handle_line_start() {
        return tok;
      }
    }

    self.skip_whitespace();
    self.start = self.current;

    if self.is_at_end() {
      if self.indent_stack.len() > 1 {
        self.indent_stack.pop();
        return self.make(TokenKind::Dedent);
      }
      return self.make(TokenKind::Eof);
    }

    let c = self.advance();

    if is_alpha(c) {
      return self.identifier();
    }
    if is_digit(c) {
      return self.number();
    }

    match c {
      b'(' => self.make(TokenKind::LeftParen),
      b')' => self.make(TokenKind::RightParen),
      b'{' => self.make(TokenKind::LeftBrace),
      b'}' => self.make(TokenKind::RightBrace),
      b'[' => self.make(TokenKind::LeftBracket),
      b']' => self.make(TokenKind::RightBracket),
      b',' => self.make(TokenKind::Comma),
      b'.' => self.make(TokenKind::Dot),
      b'-' => self.make(TokenKind::Minus),
      b'+' => self.make(TokenKind::Plus),
      b';' => self.make(TokenKind::Semicolon),
      b':' => self.make(TokenKind::Colon),
      b'@' => self.make(TokenKind::At),
      b'/' => {
        if self.matches(b'/') {
          self.make(TokenKind::SlashSlash)
        } else {
          self.make(TokenKind::Slash)
        }
      }
      b'*' => {
        if self.matches(b'*') {
          self.make(TokenKind::StarStar)
        } else {
          self.make(TokenKind::Star)
        }
      }
      b'%' => self.make(TokenKind::Percent),
      b'!' => {
        if self.matches(b'=') {
          self.make(TokenKind::BangEqual)
        } else {
          self.make(TokenKind::Bang)
        }
      }
      b'=' => {
        if self.matches(b'=') {
          self.make(TokenKind::EqualEqual)
        } else {
          self.make(TokenKind::Equal)
        }
      }
      b'<' => {
        if self.matches(b'=') {
          self.make(TokenKind::LessEqual)
        } else {
          self.make(TokenKind::Less)
        }
      }
      b'>' => {
        if self.matches(b'=') {
          self.make(TokenKind::GreaterEqual)
        } else {
          self.make(TokenKind::Greater)
        }
      }
      b'"' | b'\'' => self.string(c),
      b'\n' => {
        self.line += 1;
        self.at_line_start = true;
        self.make(TokenKind::Newline)
      }
      _ => self.error("unexpected character"),
    }
  }

  fn identifier(&mut self) -> Token<'src> {
    while is_alpha(self.peek()) || is_digit(self.peek()) {
      self.advance();
    }

    // f"..." / F'...' is a single FSTRING token; detected only when the
    // identifier scanned so far is exactly `f`/`F` and a quote follows.
    if self.current - self.start == 1 && matches!(self.bytes[self.start], b'f' | b'F') {
      let quote = self.peek();
      if quote == b'"' || quote == b'\'' {
        self.advance();
        while self.peek() != quote && !self.is_at_end() {
          if self.peek() == b'\n' {
            self.line += 1;
          }
          self.advance();
        }
        if self.is_at_end() {
          return self.error("unterminated f-string");
        }
        self.advance();
        return self.make(TokenKind::FString);
      }
    }

    match keyword_lookup(self.lexeme()) {
      Some(kind) => self.make(kind),
      None => self.make(TokenKind::Identifier),
    }
  }

  fn number(&mut self) -> Token<'src> {
    while is_digit(self.peek()) {
      self.advance();
    }
    if self.peek() == b'.' && is_digit(self.peek_next()) {
      self.advance();
      while is_digit(self.peek()) {
        self.advance();
      }
    }
    self.make(TokenKind::Number)
  }

  fn string(&mut self, quote: u8) -> Token<'src> {
    // `"""..."""`: only recognized when the opening quote is immediately
    // followed by two more of the same quote character.
    let triple = quote == b'"'
      && self.peek() == b'"'
      && self.peek_next() == b'"'
      && self.current + 1 < self.bytes.len();
    if triple {
      self.advance();
      self.advance();
      loop {
        if self.is_at_end() {
          return self.error("unterminated string");
        }
        if self.peek() == b'"' && self.peek_next() == b'"' {
          let save = self.current;
          self.advance();
          self.advance();
          if self.peek() == b'"' {
            self.advance();
            return self.make(TokenKind::String);
          }
          self.current = save;
        }
        if self.peek() == b'\n' {
          self.line += 1;
        }
        self.advance();
      }
    }

    while self.peek() != quote && !self.is_at_end() {
      if self.peek() == b'\n' {
        self.line += 1;
      }
      self.advance();
    }
    if self.is_at_end() {
      return self.error("unterminated string");
    }
    self.advance();
    self.make(TokenKind::String)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(src: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
      let tok = lexer.next_token();
      let done = tok.kind == TokenKind::Eof;
      out.push(tok.kind);
      if done {
        break;
      }
    }
    out
  }

  #[test]
  fn simple_tokens() {
    let ks = kinds("x = 1 + 2\n");
    assert_eq!(
      ks,
      vec![
        TokenKind::Identifier,
        TokenKind::Equal,
        TokenKind::Number,
        TokenKind::Plus,
        TokenKind::Number,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn indent_and_dedent_are_balanced() {
    let src = "if x:\n    y\n    z\nw\n";
    let ks = kinds(src);
    let indents = ks.iter().filter(|k| **k == TokenKind::Indent).count();
    let dedents = ks.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(indents, dedents);
    assert_eq!(indents, 1);
  }

  #[test]
  fn inconsistent_indentation_errors() {
    let src = "if x:\n  y\n   z\n";
    let ks = kinds(src);
    assert!(ks.contains(&TokenKind::Error));
  }

  #[test]
  fn keywords_are_recognized() {
    let ks = kinds("def class match case assert del try except raise finally\n");
    assert_eq!(
      ks,
      vec![
        TokenKind::Def,
        TokenKind::Class,
        TokenKind::Match,
        TokenKind::Case,
        TokenKind::Assert,
        TokenKind::Del,
        TokenKind::Try,
        TokenKind::Except,
        TokenKind::Raise,
        TokenKind::Finally,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn fstring_is_single_token() {
    let ks = kinds("f\"hello {name}\"\n");
    assert_eq!(ks, vec![TokenKind::FString, TokenKind::Newline, TokenKind::Eof]);
  }

  #[test]
  fn floor_divide_and_power_operators() {
    let ks = kinds("a // b ** c\n");
    assert_eq!(
      ks,
      vec![
        TokenKind::Identifier,
        TokenKind::SlashSlash,
        TokenKind::Identifier,
        TokenKind::StarStar,
        TokenKind::Identifier,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn comment_to_end_of_line_is_skipped() {
    let ks = kinds("x = 1 # comment\n");
    assert_eq!(
      ks,
      vec![
        TokenKind::Identifier,
        TokenKind::Equal,
        TokenKind::Number,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn eof_flushes_remaining_dedents() {
    let src = "if x:\n    if y:\n        z\n";
    let mut lexer = Lexer::new(src);
    let mut dedents_at_end = 0;
    let mut last_was_eof = false;
    loop {
      let tok = lexer.next_token();
      if tok.kind == TokenKind::Eof {
        last_was_eof = true;
        break;
      }
      if tok.kind == TokenKind::Dedent {
        dedents_at_end += 1;
      }
    }
    assert!(last_was_eof);
    assert_eq!(dedents_at_end, 2);
  }
}
