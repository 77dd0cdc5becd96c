//! Property and item expansion.

use crate::project::Item;

use super::EvalContext;

/// One `;`-separated part of an item list expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListPart {
  /// `@(Type)` or `@(Type->'template')`.
  Items {
    item_type: String,
    transform: Option<String>,
  },
  /// Anything else; expanded and split into items by spec.
  Literal(String),
}

/// Find the `)` matching the `(` that precedes `start`, honoring nesting and quotes.
fn find_close(s: &str, start: usize) -> Option<usize> {
  let mut depth = 1usize;
  let mut quoted = false;
  for (i, c) in s[start..].char_indices() {
    match c {
      '\'' => quoted = !quoted,
      '(' if !quoted => depth += 1,
      ')' if !quoted => {
        depth -= 1;
        if depth == 0 {
          return Some(start + i);
        }
      }
      _ => {}
    }
  }
  None
}

/// Split on `;` outside of `$(..)`, `@(..)` and quotes.
fn split_top_level(expr: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut depth = 0usize;
  let mut quoted = false;
  let mut begin = 0;
  for (i, c) in expr.char_indices() {
    match c {
      '\'' => quoted = !quoted,
      '(' if !quoted => depth += 1,
      ')' if !quoted => depth = depth.saturating_sub(1),
      ';' if !quoted && depth == 0 => {
        parts.push(&expr[begin..i]);
        begin = i + 1;
      }
      _ => {}
    }
  }
  parts.push(&expr[begin..]);
  parts
}

fn is_name(s: &str) -> bool {
  !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Parse the inside of `@( ... )`.
fn parse_item_ref(inner: &str) -> Option<(String, Option<String>)> {
  let inner = inner.trim();
  match inner.split_once("->") {
    None => is_name(inner).then(|| (inner.to_string(), None)),
    Some((item_type, template)) => {
      let item_type = item_type.trim();
      let template = template.trim();
      let template = template.strip_prefix('\'')?.strip_suffix('\'')?;
      is_name(item_type).then(|| (item_type.to_string(), Some(template.to_string())))
    }
  }
}

/// Parse an item list expression into its parts.
pub fn parse_list(expr: &str) -> Vec<ListPart> {
  split_top_level(expr)
    .into_iter()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|segment| {
      if let Some(inner) = segment.strip_prefix("@(").and_then(|s| s.strip_suffix(')'))
        && find_close(segment, 2) == Some(segment.len() - 1)
        && let Some((item_type, transform)) = parse_item_ref(inner)
      {
        return ListPart::Items { item_type, transform };
      }
      ListPart::Literal(segment.to_string())
    })
    .collect()
}

/// Apply a transform template to one item.
///
/// Metadata the item does not have expands to the empty string.
pub fn transform_item(item: &Item, template: &str) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(pos) = rest.find("%(") {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 2..];
    match after.find(')') {
      Some(end) => {
        if let Some(value) = item.metadata(after[..end].trim()) {
          out.push_str(&value);
        }
        rest = &after[end + 1..];
      }
      None => {
        out.push_str(&rest[pos..]);
        rest = "";
      }
    }
  }
  out.push_str(rest);
  out
}

fn expand_part(part: &ListPart, ctx: &dyn EvalContext, out: &mut Vec<Item>) {
  match part {
    ListPart::Items {
      item_type,
      transform: None,
    } => out.extend(ctx.items(item_type)),
    ListPart::Items {
      item_type,
      transform: Some(template),
    } => {
      for item in ctx.items(item_type) {
        let spec = expand_string(&transform_item(&item, template), ctx);
        // An empty transform result is not an item.
        if spec.is_empty() {
          continue;
        }
        let mut transformed = item;
        transformed.spec = spec;
        out.push(transformed);
      }
    }
    ListPart::Literal(text) => {
      let expanded = expand_string(text, ctx);
      out.extend(
        expanded
          .split(';')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(Item::new),
      );
    }
  }
}

/// Expand an item list expression to items.
pub fn expand_items(expr: &str, ctx: &dyn EvalContext) -> Vec<Item> {
  let mut out = Vec::new();
  for part in parse_list(expr) {
    expand_part(&part, ctx, &mut out);
  }
  out
}

/// Expand property and item references inside a string.
///
/// Item references expand to their specs joined with `;`.
pub fn expand_string(text: &str, ctx: &dyn EvalContext) -> String {
  let mut out = String::with_capacity(text.len());
  let mut i = 0;
  while i < text.len() {
    let rest = &text[i..];
    let marker = if rest.starts_with("$(") {
      Some('$')
    } else if rest.starts_with("@(") {
      Some('@')
    } else {
      None
    };

    if let Some(marker) = marker
      && let Some(close) = find_close(text, i + 2)
    {
      let inner = &text[i + 2..close];
      match marker {
        '$' => {
          if let Some(value) = ctx.property(inner.trim()) {
            out.push_str(&value);
          }
        }
        _ => match parse_item_ref(inner) {
          Some((item_type, transform)) => {
            let mut items = Vec::new();
            expand_part(&ListPart::Items { item_type, transform }, ctx, &mut items);
            let joined: Vec<&str> = items.iter().map(|item| item.spec.as_str()).collect();
            out.push_str(&joined.join(";"));
          }
          None => out.push_str(&text[i..=close]),
        },
      }
      i = close + 1;
      continue;
    }

    let c = rest.chars().next().unwrap_or_default();
    out.push(c);
    i += c.len_utf8();
  }
  out
}
