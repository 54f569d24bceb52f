// src/recipe/parser.rs

//! Indentation-based parser for the recipe file grammar
//!
//! The accepted grammar is the subset recipes actually use: scalar
//! `key: value` pairs (optionally quoted), `|` and `>` block scalars,
//! sequences of scalars, sequences of maps, and one level of nested
//! mappings (dependencies, hooks). Violations report line and column.

use crate::error::{Error, Result};

/// A parsed recipe document node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Scalar content, if this node is a scalar
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            Value::Scalar(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Flatten a list of scalars; a lone scalar becomes a one-element list
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) if s.is_empty() => Vec::new(),
            Value::Scalar(s) => vec![s.clone()],
            Value::List(items) => items.iter().filter_map(Value::as_scalar).collect(),
            Value::Map(_) => Vec::new(),
        }
    }

    /// Lossy single-line rendering, used when preserving unknown keys
    pub fn to_flat_string(&self) -> String {
        match self {
            Value::Scalar(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_flat_string)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.to_flat_string()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Parse a whole recipe document (a top-level mapping)
pub fn parse_document(input: &str) -> Result<Value> {
    let lines: Vec<&str> = input.lines().collect();
    let mut parser = Parser { lines, pos: 0 };
    let entries = parser.parse_map(0)?;
    // anything left over is a grammar violation
    if let Some((line_no, indent, _)) = parser.peek() {
        return Err(parser.error(line_no, indent, "content outside the top-level mapping"));
    }
    Ok(Value::Map(entries))
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, line: usize, indent: usize, reason: &str) -> Error {
        Error::ParseError {
            line,
            column: indent + 1,
            reason: reason.to_string(),
        }
    }

    /// Next significant line as (1-based line number, indent, trimmed content)
    fn peek(&self) -> Option<(usize, usize, &'a str)> {
        let mut i = self.pos;
        while i < self.lines.len() {
            let raw = self.lines[i];
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                i += 1;
                continue;
            }
            return Some((i + 1, raw.len() - trimmed.len(), trimmed.trim_end()));
        }
        None
    }

    /// Advance past the line `peek` returned
    fn advance(&mut self) {
        while self.pos < self.lines.len() {
            let trimmed = self.lines[self.pos].trim_start();
            self.pos += 1;
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                return;
            }
        }
    }

    fn parse_map(&mut self, indent: usize) -> Result<Vec<(String, Value)>> {
        let mut entries = Vec::new();
        while let Some((line_no, line_indent, content)) = self.peek() {
            if line_indent < indent {
                break;
            }
            if line_indent > indent {
                return Err(self.error(line_no, line_indent, "unexpected indentation"));
            }
            if content.starts_with('-') {
                break;
            }
            let Some((key, rest)) = content.split_once(':') else {
                return Err(self.error(line_no, line_indent, "expected 'key: value'"));
            };
            let key = key.trim().to_string();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(self.error(line_no, line_indent, "invalid mapping key"));
            }
            self.advance();
            let rest = rest.trim();

            let value = match rest {
                "|" => Value::Scalar(self.collect_block(indent, '\n')),
                ">" => Value::Scalar(self.collect_block(indent, ' ')),
                "" => self.parse_nested(indent)?,
                scalar => Value::Scalar(unquote(scalar)),
            };
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Value of a `key:` with nothing after the colon: a nested list, a
    /// nested map, or the empty scalar.
    fn parse_nested(&mut self, parent_indent: usize) -> Result<Value> {
        match self.peek() {
            Some((_, child_indent, content)) if child_indent > parent_indent => {
                if content.starts_with('-') {
                    Ok(Value::List(self.parse_list(child_indent)?))
                } else {
                    Ok(Value::Map(self.parse_map(child_indent)?))
                }
            }
            _ => Ok(Value::Scalar(String::new())),
        }
    }

    fn parse_list(&mut self, indent: usize) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while let Some((line_no, line_indent, content)) = self.peek() {
            if line_indent != indent || !content.starts_with('-') {
                break;
            }
            let item = content[1..].trim_start();
            if item.is_empty() {
                return Err(self.error(line_no, line_indent, "empty sequence item"));
            }
            self.advance();

            if let Some((key, rest)) = map_item_pair(item) {
                // sequence-of-maps item: continuation keys align under the
                // first key's column
                let cont_indent = line_indent + (content.len() - item.len());
                let mut fields = vec![(key, Value::Scalar(unquote(rest)))];
                fields.extend(self.parse_map(cont_indent)?);
                items.push(Value::Map(fields));
            } else {
                items.push(Value::Scalar(unquote(item)));
            }
        }
        Ok(items)
    }

    /// Collect the lines of a block scalar introduced by `|` or `>`.
    /// `joiner` is newline for literal blocks, space for folded ones.
    fn collect_block(&mut self, key_indent: usize, joiner: char) -> String {
        let mut block_indent = None;
        let mut collected: Vec<String> = Vec::new();
        while self.pos < self.lines.len() {
            let raw = self.lines[self.pos];
            let trimmed = raw.trim_start();
            if trimmed.is_empty() {
                // blank lines inside the block are preserved for literal blocks
                if block_indent.is_some() {
                    collected.push(String::new());
                }
                self.pos += 1;
                continue;
            }
            let line_indent = raw.len() - trimmed.len();
            if line_indent <= key_indent {
                break;
            }
            let strip = *block_indent.get_or_insert(line_indent);
            collected.push(raw.get(strip..).unwrap_or(trimmed).trim_end().to_string());
            self.pos += 1;
        }
        // drop trailing blanks kept for interior blank lines
        while collected.last().is_some_and(String::is_empty) {
            collected.pop();
        }
        let mut out = String::new();
        for (i, line) in collected.iter().enumerate() {
            if i > 0 {
                out.push(joiner);
            }
            out.push_str(line);
        }
        out
    }
}

/// `- key: value` item detection: a map item iff the text before the first
/// colon is a bare key (no whitespace) and the colon is followed by a space
/// or end of line. Commands like `ldconfig -v` stay scalars.
fn map_item_pair(item: &str) -> Option<(String, &str)> {
    let (key, rest) = item.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((key.to_string(), rest.trim()))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
