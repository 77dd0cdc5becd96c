//! Condition evaluation.

use thiserror::Error;

use crate::util::path::resolve_against;

use super::EvalContext;
use super::expand::expand_string;

/// Errors that can occur while evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
  #[error("invalid condition \"{condition}\": {message}")]
  Syntax { condition: String, message: String },

  #[error("condition \"{condition}\" evaluated to \"{value}\" instead of a boolean")]
  NotBoolean { condition: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  /// Quoted string or bare `$(..)`/`@(..)` reference, unexpanded.
  Str(String),
  Word(String),
  Eq,
  Ne,
  Not,
  LParen,
  RParen,
}

fn tokenize(condition: &str) -> Result<Vec<Token>, String> {
  let chars: Vec<char> = condition.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;
  while i < chars.len() {
    let c = chars[i];
    match c {
      _ if c.is_whitespace() => i += 1,
      '\'' => {
        let start = i + 1;
        let end = chars[start..]
          .iter()
          .position(|&ch| ch == '\'')
          .ok_or_else(|| "unterminated string".to_string())?;
        tokens.push(Token::Str(chars[start..start + end].iter().collect()));
        i = start + end + 1;
      }
      '$' | '@' if chars.get(i + 1) == Some(&'(') => {
        let mut depth = 0;
        let mut end = None;
        for (j, &ch) in chars.iter().enumerate().skip(i + 1) {
          match ch {
            '(' => depth += 1,
            ')' => {
              depth -= 1;
              if depth == 0 {
                end = Some(j);
                break;
              }
            }
            _ => {}
          }
        }
        let end = end.ok_or_else(|| "unterminated reference".to_string())?;
        tokens.push(Token::Str(chars[i..=end].iter().collect()));
        i = end + 1;
      }
      '=' if chars.get(i + 1) == Some(&'=') => {
        tokens.push(Token::Eq);
        i += 2;
      }
      '!' if chars.get(i + 1) == Some(&'=') => {
        tokens.push(Token::Ne);
        i += 2;
      }
      '!' => {
        tokens.push(Token::Not);
        i += 1;
      }
      '(' => {
        tokens.push(Token::LParen);
        i += 1;
      }
      ')' => {
        tokens.push(Token::RParen);
        i += 1;
      }
      _ if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' => {
        let start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-')) {
          i += 1;
        }
        tokens.push(Token::Word(chars[start..i].iter().collect()));
      }
      _ => return Err(format!("unexpected character '{}'", c)),
    }
  }
  Ok(tokens)
}

struct Parser<'a> {
  tokens: Vec<Token>,
  pos: usize,
  ctx: &'a dyn EvalContext,
  condition: &'a str,
}

impl Parser<'_> {
  fn syntax(&self, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
      condition: self.condition.to_string(),
      message: message.into(),
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn peek_keyword(&self, keyword: &str) -> bool {
    matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
  }

  fn or_expr(&mut self) -> Result<bool, ConditionError> {
    let mut value = self.and_expr()?;
    while self.peek_keyword("or") {
      self.pos += 1;
      let rhs = self.and_expr()?;
      value = value || rhs;
    }
    Ok(value)
  }

  fn and_expr(&mut self) -> Result<bool, ConditionError> {
    let mut value = self.unary()?;
    while self.peek_keyword("and") {
      self.pos += 1;
      let rhs = self.unary()?;
      value = value && rhs;
    }
    Ok(value)
  }

  fn unary(&mut self) -> Result<bool, ConditionError> {
    if self.peek() == Some(&Token::Not) {
      self.pos += 1;
      return Ok(!self.unary()?);
    }
    self.primary()
  }

  fn primary(&mut self) -> Result<bool, ConditionError> {
    match self.next() {
      Some(Token::LParen) => {
        let value = self.or_expr()?;
        match self.next() {
          Some(Token::RParen) => Ok(value),
          _ => Err(self.syntax("expected ')'")),
        }
      }
      Some(Token::Word(w)) if w.eq_ignore_ascii_case("exists") => {
        if self.next() != Some(Token::LParen) {
          return Err(self.syntax("expected '(' after Exists"));
        }
        let arg = match self.next() {
          Some(Token::Str(s)) => s,
          _ => return Err(self.syntax("Exists expects a quoted path")),
        };
        if self.next() != Some(Token::RParen) {
          return Err(self.syntax("expected ')' after Exists argument"));
        }
        let path = expand_string(&arg, self.ctx);
        let path = path.trim();
        Ok(!path.is_empty() && resolve_against(self.ctx.base_dir(), path).exists())
      }
      Some(Token::Str(s)) | Some(Token::Word(s)) => {
        let lhs = expand_string(&s, self.ctx);
        match self.peek() {
          Some(Token::Eq) | Some(Token::Ne) => {
            let equal = self.next() == Some(Token::Eq);
            let rhs = match self.next() {
              Some(Token::Str(r)) | Some(Token::Word(r)) => expand_string(&r, self.ctx),
              _ => return Err(self.syntax("expected operand after comparison")),
            };
            Ok(lhs.eq_ignore_ascii_case(&rhs) == equal)
          }
          _ => self.as_bool(lhs),
        }
      }
      Some(token) => Err(self.syntax(format!("unexpected token {:?}", token))),
      None => Err(self.syntax("unexpected end of condition")),
    }
  }

  fn as_bool(&self, value: String) -> Result<bool, ConditionError> {
    if value.eq_ignore_ascii_case("true") {
      Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
      Ok(false)
    } else {
      Err(ConditionError::NotBoolean {
        condition: self.condition.to_string(),
        value,
      })
    }
  }
}

/// Evaluate a condition. An empty condition is true.
///
/// String comparisons are ASCII case-insensitive.
pub fn evaluate_condition(condition: &str, ctx: &dyn EvalContext) -> Result<bool, ConditionError> {
  if condition.trim().is_empty() {
    return Ok(true);
  }

  let tokens = tokenize(condition).map_err(|message| ConditionError::Syntax {
    condition: condition.to_string(),
    message,
  })?;

  let mut parser = Parser {
    tokens,
    pos: 0,
    ctx,
    condition,
  };
  let value = parser.or_expr()?;
  if parser.pos < parser.tokens.len() {
    return Err(parser.syntax("trailing tokens"));
  }
  Ok(value)
}
