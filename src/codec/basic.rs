//! Dependency-free reader and writer for the structured-text subset used by the tier files
//!
//! Values pass through `serde_json::Value`, so any serde model can be written and read back.
//! Supported: block mappings and sequences (two-space indentation, sequences either indented
//! under their key or at the key's own column), `- key: value` items, quoted and plain scalars,
//! `[]`/`{}` and simple inline flow collections, literal and folded block scalars, and `#`
//! comments. Anchors, tags and multi-document streams are not supported.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

const INDENT: usize = 2;

/// Serialize a value into structured text
pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let tree = serde_json::to_value(value)?;
    let mut out = String::new();
    match &tree {
        Value::Object(map) if !map.is_empty() => write_mapping(&mut out, map, 0),
        Value::Array(items) if !items.is_empty() => write_sequence(&mut out, items, 0),
        other => {
            out.push_str(&inline_value(other));
            out.push('\n');
        }
    }
    Ok(out)
}

/// Deserialize a value from structured text
pub fn from_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    let tree = parse(text)?;
    Ok(serde_json::from_value(tree)?)
}

/// Parse structured text into a JSON value tree
pub fn parse(text: &str) -> Result<Value> {
    Parser::new(text).parse_document()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

fn write_mapping(out: &mut String, map: &Map<String, Value>, indent: usize) {
    let pad = " ".repeat(indent);
    for (key, value) in map {
        let key = format_string(key);
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                out.push_str(&format!("{}{}:\n", pad, key));
                write_mapping(out, inner, indent + INDENT);
            }
            Value::Array(items) if !items.is_empty() => {
                out.push_str(&format!("{}{}:\n", pad, key));
                write_sequence(out, items, indent + INDENT);
            }
            other => {
                out.push_str(&format!("{}{}: {}\n", pad, key, inline_value(other)));
            }
        }
    }
}

fn write_sequence(out: &mut String, items: &[Value], indent: usize) {
    let pad = " ".repeat(indent);
    for item in items {
        match item {
            Value::Object(inner) if !inner.is_empty() => {
                // The first key shares the dash line; the rest align under it.
                let mut nested = String::new();
                write_mapping(&mut nested, inner, indent + INDENT);
                out.push_str(&pad);
                out.push_str("- ");
                out.push_str(&nested[indent + INDENT..]);
            }
            Value::Array(inner) if !inner.is_empty() => {
                out.push_str(&format!("{}-\n", pad));
                write_sequence(out, inner, indent + INDENT);
            }
            other => {
                out.push_str(&format!("{}- {}\n", pad, inline_value(other)));
            }
        }
    }
}

fn inline_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format_string(s),
        Value::Array(_) => "[]".to_string(),
        Value::Object(_) => "{}".to_string(),
    }
}

fn format_string(s: &str) -> String {
    if needs_quotes(s) {
        // JSON string escapes are a subset of double-quoted escapes
        serde_json::Value::String(s.to_string()).to_string()
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    let Some(first) = s.chars().next() else {
        return true;
    };
    if "-?:,[]{}#&*!|>'\"%@`~".contains(first) || first.is_whitespace() {
        return true;
    }
    if s.ends_with(char::is_whitespace) {
        return true;
    }
    if s.chars().any(|c| c == ':' || c == '#' || c.is_control()) {
        return true;
    }
    let lower = s.to_ascii_lowercase();
    if matches!(
        lower.as_str(),
        "null" | "true" | "false" | "yes" | "no" | "on" | "off" | "y" | "n"
    ) {
        return true;
    }
    s.parse::<f64>().is_ok() || s.starts_with(|c: char| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
    raw: String,
}

impl Line {
    fn is_insignificant(&self) -> bool {
        self.text.is_empty() || self.text.starts_with('#') || self.text == "---"
    }

    fn is_sequence_item(&self) -> bool {
        self.text == "-" || self.text.starts_with("- ")
    }
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, raw)| {
                let raw = raw.trim_end_matches('\r');
                let indent = raw.len() - raw.trim_start_matches(' ').len();
                Line {
                    number: i + 1,
                    indent,
                    text: raw.trim().to_string(),
                    raw: raw.to_string(),
                }
            })
            .collect();
        Self { lines, pos: 0 }
    }

    fn parse_document(mut self) -> Result<Value> {
        self.skip_insignificant();
        let Some(indent) = self.lines.get(self.pos).map(|line| line.indent) else {
            return Ok(Value::Null);
        };
        let value = self.parse_block(indent)?;
        self.skip_insignificant();
        if let Some(line) = self.lines.get(self.pos) {
            return Err(Error::codec(line.number, "unexpected content after document"));
        }
        Ok(value)
    }

    fn skip_insignificant(&mut self) {
        while self
            .lines
            .get(self.pos)
            .is_some_and(|line| line.is_insignificant())
        {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<&Line> {
        self.skip_insignificant();
        self.lines.get(self.pos)
    }

    fn parse_block(&mut self, indent: usize) -> Result<Value> {
        let Some(line) = self.peek().cloned() else {
            return Ok(Value::Null);
        };
        if line.is_sequence_item() {
            return self.parse_sequence(indent);
        }
        if split_key(&line.text, line.number)?.is_some() {
            return self.parse_mapping(indent);
        }
        self.pos += 1;
        parse_inline(&line.text, line.number)
    }

    fn parse_mapping(&mut self, indent: usize) -> Result<Value> {
        let mut map = Map::new();
        while let Some(line) = self.peek().cloned() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(Error::codec(line.number, "unexpected indentation"));
            }
            if line.is_sequence_item() {
                return Err(Error::codec(line.number, "sequence item inside mapping"));
            }
            let Some((key, rest)) = split_key(&line.text, line.number)? else {
                return Err(Error::codec(line.number, "expected a `key: value` entry"));
            };
            self.pos += 1;
            let value = self.parse_value_after_key(rest, indent, line.number)?;
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }

    fn parse_value_after_key(&mut self, rest: &str, indent: usize, number: usize) -> Result<Value> {
        if rest.is_empty() {
            let next = self.peek().map(|l| (l.indent, l.is_sequence_item()));
            return match next {
                Some((nested, _)) if nested > indent => self.parse_block(nested),
                Some((nested, true)) if nested == indent => self.parse_sequence(indent),
                _ => Ok(Value::Null),
            };
        }
        if rest.starts_with('|') || rest.starts_with('>') {
            return self.parse_block_scalar(rest, indent, number);
        }
        parse_inline(rest, number)
    }

    fn parse_sequence(&mut self, indent: usize) -> Result<Value> {
        let mut items = Vec::new();
        while let Some(line) = self.peek().cloned() {
            if line.indent < indent || !line.is_sequence_item() {
                break;
            }
            if line.indent > indent {
                return Err(Error::codec(line.number, "unexpected indentation"));
            }
            let rest = line.text[1..].trim_start();
            if rest.is_empty() {
                self.pos += 1;
                let value = match self.peek().map(|l| l.indent) {
                    Some(nested) if nested > indent => self.parse_block(nested)?,
                    _ => Value::Null,
                };
                items.push(value);
                continue;
            }

            let offset = line.indent + (line.text.len() - rest.len());
            let is_nested = rest == "-"
                || rest.starts_with("- ")
                || split_key(rest, line.number)?.is_some();
            if is_nested {
                // Re-read the remainder of the dash line as a block at its own column.
                let current = &mut self.lines[self.pos];
                current.indent = offset;
                current.text = rest.to_string();
                items.push(self.parse_block(offset)?);
            } else if rest.starts_with('|') || rest.starts_with('>') {
                self.pos += 1;
                items.push(self.parse_block_scalar(rest, indent, line.number)?);
            } else {
                self.pos += 1;
                items.push(parse_inline(rest, line.number)?);
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_block_scalar(&mut self, header: &str, parent: usize, number: usize) -> Result<Value> {
        let header = strip_comment(header);
        let folded = header.starts_with('>');
        let chomp = match &header[1..] {
            "" => Chomp::Clip,
            "-" => Chomp::Strip,
            "+" => Chomp::Keep,
            _ => return Err(Error::codec(number, "unsupported block scalar header")),
        };

        let mut block_indent = None;
        let mut content: Vec<String> = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            if line.text.is_empty() {
                content.push(String::new());
                self.pos += 1;
                continue;
            }
            let required = *block_indent.get_or_insert(line.indent);
            if line.indent <= parent || line.indent < required {
                break;
            }
            content.push(line.raw[required..].to_string());
            self.pos += 1;
        }

        let trailing = content.iter().rev().take_while(|l| l.is_empty()).count();
        content.truncate(content.len() - trailing);

        let mut text = if folded {
            content.join(" ")
        } else {
            content.join("\n")
        };
        if !content.is_empty() {
            match chomp {
                Chomp::Strip => {}
                Chomp::Clip => text.push('\n'),
                Chomp::Keep => text.push_str(&"\n".repeat(trailing + 1)),
            }
        }
        Ok(Value::String(text))
    }
}

enum Chomp {
    Clip,
    Strip,
    Keep,
}

/// Split `key: rest` into its parts; `None` if the text is not a mapping entry.
fn split_key(text: &str, number: usize) -> Result<Option<(String, &str)>> {
    if text.starts_with('"') || text.starts_with('\'') {
        let (key, rest) = take_quoted(text, number)?;
        let rest = rest.trim_start();
        return Ok(rest
            .strip_prefix(':')
            .filter(|after| after.is_empty() || after.starts_with(' '))
            .map(|after| (key, after.trim())));
    }
    if text.starts_with('[') || text.starts_with('{') {
        return Ok(None);
    }
    let found = text
        .find(": ")
        .or_else(|| text.strip_suffix(':').map(|k| k.len()));
    Ok(found.map(|i| (text[..i].trim().to_string(), text[i + 1..].trim())))
}

fn strip_comment(text: &str) -> &str {
    match text.find(" #") {
        Some(i) => text[..i].trim_end(),
        None => text,
    }
}

fn take_quoted(text: &str, number: usize) -> Result<(String, &str)> {
    let bytes = text.as_bytes();
    let quote = bytes[0];
    let mut i = 1;
    if quote == b'"' {
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => {
                    let parsed: String = serde_json::from_str(&text[..=i])
                        .map_err(|e| Error::codec(number, format!("bad quoted string: {}", e)))?;
                    return Ok((parsed, &text[i + 1..]));
                }
                _ => i += 1,
            }
        }
    } else {
        let mut out = String::new();
        let mut start = 1;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                out.push_str(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\'') {
                    out.push('\'');
                    i += 2;
                    start = i;
                    continue;
                }
                return Ok((out, &text[i + 1..]));
            }
            i += 1;
        }
    }
    Err(Error::codec(number, "unterminated quoted string"))
}

fn parse_inline(text: &str, number: usize) -> Result<Value> {
    let text = text.trim();
    if text.starts_with('"') || text.starts_with('\'') {
        let (value, rest) = take_quoted(text, number)?;
        let rest = rest.trim();
        if !rest.is_empty() && !rest.starts_with('#') {
            return Err(Error::codec(number, "unexpected text after quoted string"));
        }
        return Ok(Value::String(value));
    }

    if text.starts_with('#') {
        return Ok(Value::Null);
    }
    let text = strip_comment(text);
    if let Some(inner) = text.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| Error::codec(number, "unterminated flow sequence"))?;
        let items = split_flow(inner)
            .into_iter()
            .map(|item| parse_inline(item, number))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }
    if let Some(inner) = text.strip_prefix('{') {
        let inner = inner
            .strip_suffix('}')
            .ok_or_else(|| Error::codec(number, "unterminated flow mapping"))?;
        let mut map = Map::new();
        for entry in split_flow(inner) {
            let Some((key, rest)) = split_key(entry, number)? else {
                return Err(Error::codec(number, "expected `key: value` in flow mapping"));
            };
            map.insert(key, parse_inline(rest, number)?);
        }
        return Ok(Value::Object(map));
    }
    Ok(plain_scalar(text))
}

fn split_flow(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q == '"' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

fn plain_scalar(text: &str) -> Value {
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(u) = text.parse::<u64>() {
        return Value::Number(u.into());
    }
    let numeric = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if numeric {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Value) {
        let text = to_string(&value).unwrap();
        let back = parse(&text).unwrap();
        assert_eq!(back, value, "document was:\n{}", text);
    }

    #[test]
    fn round_trips_nested_structures() {
        round_trip(json!({
            "version": "2.0",
            "count": 3,
            "ratio": 0.25,
            "flag": true,
            "missing": null,
            "empty_list": [],
            "empty_map": {},
            "nested": {"inner": {"deep": "value"}},
            "tags": ["api", "async"],
            "records": [
                {"id": "a", "tags": ["x", "y"], "meta": {"k": 1}},
                {"id": "b", "tags": []}
            ],
            "matrix": [[1, 2], [3]]
        }));
    }

    #[test]
    fn quotes_ambiguous_strings() {
        round_trip(json!({
            "colon": "key: value",
            "hash": "a # b",
            "number_like": "42",
            "float_like": "1.5",
            "bool_like": "true",
            "null_like": "null",
            "empty": "",
            "leading_dash": "- item",
            "multiline": "line one\nline two\n",
            "padded": " padded ",
            "timestamp": "2026-10-16T08:30:00Z",
            "date": "2026-10-16",
            "unicode": "café ✓"
        }));
    }

    #[test]
    fn reads_sequences_at_key_column() {
        let text = "\
decisions:
- id: d1
  context: use async sessions
  tags:
  - api
  - db
- id: d2
  context: other
workflows_completed: 4
";
        let value = parse(text).unwrap();
        assert_eq!(value["decisions"][0]["tags"], json!(["api", "db"]));
        assert_eq!(value["decisions"][1]["id"], "d2");
        assert_eq!(value["workflows_completed"], 4);
    }

    #[test]
    fn reads_comments_quotes_and_flows() {
        let text = "\
# registry
matching:
  keyword_weight: 0.6   # weight
  fallback_domain: 'backend'
agents:
  api:
    keywords: [rest, \"graphql\", endpoint]
    empty: {}
    inline: {a: 1, b: two}
";
        let value = parse(text).unwrap();
        assert_eq!(value["matching"]["keyword_weight"], 0.6);
        assert_eq!(value["matching"]["fallback_domain"], "backend");
        assert_eq!(value["agents"]["api"]["keywords"], json!(["rest", "graphql", "endpoint"]));
        assert_eq!(value["agents"]["api"]["empty"], json!({}));
        assert_eq!(value["agents"]["api"]["inline"], json!({"a": 1, "b": "two"}));
    }

    #[test]
    fn reads_block_scalars() {
        let text = "\
notes: |
  first line
  second line

literal_strip: |-
  kept
folded: >
  joined
  words
after: done
";
        let value = parse(text).unwrap();
        assert_eq!(value["notes"], "first line\nsecond line\n");
        assert_eq!(value["literal_strip"], "kept");
        assert_eq!(value["folded"], "joined words\n");
        assert_eq!(value["after"], "done");
    }

    #[test]
    fn rejects_bad_indentation() {
        let err = parse("a: 1\n    b: 2\n").unwrap_err();
        assert!(matches!(err, Error::Codec { line: 2, .. }));
    }

    #[test]
    fn empty_document_is_null() {
        assert_eq!(parse("# nothing\n\n").unwrap(), Value::Null);
    }
}
