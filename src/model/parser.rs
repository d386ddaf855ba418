//! Parser for the restricted easyconfig key/value grammar (§4.4).
//!
//! Easyconfigs are not TOML — the upstream format (see
//! `original_source/easybuild/framework/easyconfig`) is a sequence of
//! Python assignments evaluated in a sandboxed namespace. This crate does
//! not embed a Python interpreter (see DESIGN NOTES §9's "cyclic
//! Python-in-Python config proxy" flag, which this port explicitly avoids);
//! instead it implements a small recursive-descent parser over the subset
//! of Python literal syntax easyconfigs actually use: strings, lists,
//! tuples, dicts, ints, bools and bare constant identifiers
//! (`SYSTEM`, `EXTERNAL_MODULE`, `SOURCE_TAR_GZ`, ...).
//!
//! The output is one [`RawEasyconfig`] per `[Block]` section (or a single
//! one for a file with no sections), each holding the shared preamble
//! merged with that block's own assignments — templating and typed
//! decoding into [`crate::model::Easyconfig`] happen later, in
//! [`crate::model::template`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<RawValue>),
    Tuple(Vec<RawValue>),
    Dict(BTreeMap<String, RawValue>),
    /// A bare identifier such as `SYSTEM` or `SOURCE_TAR_GZ`, resolved
    /// against the constant table during template expansion.
    Constant(String),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RawValue]> {
        match self {
            RawValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, RawValue>> {
        match self {
            RawValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawEasyconfig {
    pub block_name: Option<String>,
    /// The `block = "<name>"` inter-block dependency declaration, if any.
    pub depends_on_block: Option<String>,
    pub fields: BTreeMap<String, RawValue>,
    pub source_path: Option<PathBuf>,
}

impl RawEasyconfig {
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }
}

/// Parse the full text of an `.eb` file into one `RawEasyconfig` per block.
/// A file with no `[Name]` sections yields exactly one result.
pub fn parse(text: &str, source_path: Option<&Path>) -> Result<Vec<RawEasyconfig>> {
    let statements = split_statements(text)?;

    let mut preamble: BTreeMap<String, RawValue> = BTreeMap::new();
    let mut blocks: Vec<(String, BTreeMap<String, RawValue>)> = Vec::new();
    let mut current_block: Option<String> = None;
    let mut seen_block_names = std::collections::HashSet::new();

    for statement in statements {
        if let Some(name) = parse_section_header(&statement) {
            if !seen_block_names.insert(name.clone()) {
                bail!("duplicate easyconfig block name '{name}'");
            }
            blocks.push((name.clone(), BTreeMap::new()));
            current_block = Some(name);
            continue;
        }

        let (key, value) = parse_assignment(&statement)
            .with_context(|| format!("failed to parse statement: {statement}"))?;

        match &current_block {
            Some(_) => {
                blocks.last_mut().expect("block just pushed").1.insert(key, value);
            }
            None => {
                preamble.insert(key, value);
            }
        }
    }

    if blocks.is_empty() {
        return Ok(vec![RawEasyconfig {
            block_name: None,
            depends_on_block: None,
            fields: preamble,
            source_path: source_path.map(|p| p.to_path_buf()),
        }]);
    }

    Ok(blocks
        .into_iter()
        .map(|(name, mut fields)| {
            for (k, v) in &preamble {
                fields.entry(k.clone()).or_insert_with(|| v.clone());
            }
            let depends_on_block = fields.get("block").and_then(|v| v.as_str()).map(|s| s.to_string());
            RawEasyconfig {
                block_name: Some(name),
                depends_on_block,
                fields,
                source_path: source_path.map(|p| p.to_path_buf()),
            }
        })
        .collect())
}

fn parse_section_header(statement: &str) -> Option<String> {
    let trimmed = statement.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        Some(trimmed[1..trimmed.len() - 1].trim().to_string())
    } else {
        None
    }
}

fn parse_assignment(statement: &str) -> Result<(String, RawValue)> {
    let eq_pos = find_top_level_char(statement, '=').ok_or_else(|| anyhow!("expected 'key = value'"))?;
    let key = statement[..eq_pos].trim().to_string();
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        bail!("invalid parameter name '{key}'");
    }
    let value_str = statement[eq_pos + 1..].trim();
    let mut p = ValueParser::new(value_str);
    let value = p.parse_value()?;
    p.skip_ws();
    if !p.at_end() {
        bail!("trailing characters after value: {}", &value_str[p.pos..]);
    }
    Ok((key, value))
}

/// Find the first occurrence of `needle` outside of any string literal and
/// outside of any bracket nesting.
fn find_top_level_char(s: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = in_str {
            if c == '\\' {
                chars.next();
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_str = Some(c),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            _ if c == needle && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split the file into logical statements: one per top-level assignment or
/// section header, joining continuation lines while bracket depth is open.
fn split_statements(text: &str) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;

    for raw_line in text.lines() {
        let line = if in_str.is_none() && depth == 0 { strip_comment(raw_line) } else { raw_line.to_string() };

        if line.trim().is_empty() && depth == 0 && in_str.is_none() && current.trim().is_empty() {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if let Some(q) = in_str {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    in_str = None;
                }
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => in_str = Some(c),
                '[' | '(' | '{' => depth += 1,
                ']' | ')' | '}' => depth -= 1,
                _ => {}
            }
        }

        if depth == 0 && in_str.is_none() {
            if !current.trim().is_empty() {
                statements.push(current.trim().to_string());
            }
            current.clear();
        }
    }

    if depth != 0 {
        bail!("unbalanced brackets in easyconfig (depth={depth})");
    }
    if in_str.is_some() {
        bail!("unterminated string literal in easyconfig");
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }

    Ok(statements)
}

fn strip_comment(line: &str) -> String {
    let mut in_str: Option<char> = None;
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = in_str {
            if c == '\\' {
                chars.next();
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_str = Some(c),
            '#' => return line[..i].to_string(),
            _ => {}
        }
    }
    line.to_string()
}

struct ValueParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> ValueParser<'a> {
    fn new(src: &'a str) -> Self {
        ValueParser { src, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '\n' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            bail!("expected '{c}' at position {} in '{}'", self.pos, self.src)
        }
    }

    fn parse_value(&mut self) -> Result<RawValue> {
        self.skip_ws();
        match self.peek() {
            Some('\'') | Some('"') => self.parse_string(),
            Some('[') => self.parse_seq('[', ']').map(RawValue::List),
            Some('(') => self.parse_seq('(', ')').map(RawValue::Tuple),
            Some('{') => self.parse_dict(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(_) => self.parse_identifier_value(),
            None => bail!("unexpected end of value"),
        }
    }

    fn parse_string(&mut self) -> Result<RawValue> {
        let quote = self.bump().expect("caller checked");
        let mut s = String::new();
        loop {
            match self.bump() {
                None => bail!("unterminated string literal"),
                Some('\\') => {
                    if let Some(escaped) = self.bump() {
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                }
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        // Adjacent string literal concatenation, e.g. 'a' 'b' -> 'ab'.
        let save = self.pos;
        self.skip_ws();
        if matches!(self.peek(), Some('\'') | Some('"')) {
            if let RawValue::Str(rest) = self.parse_string()? {
                s.push_str(&rest);
                return Ok(RawValue::Str(s));
            }
        }
        self.pos = save;
        Ok(RawValue::Str(s))
    }

    fn parse_seq(&mut self, open: char, close: char) -> Result<Vec<RawValue>> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                break;
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {
                    self.bump();
                    break;
                }
                _ => bail!("expected ',' or '{close}'"),
            }
        }
        Ok(items)
    }

    fn parse_dict(&mut self) -> Result<RawValue> {
        self.expect('{')?;
        let mut map = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                break;
            }
            let key = match self.parse_value()? {
                RawValue::Str(s) => s,
                other => bail!("dict keys must be string literals, got {other:?}"),
            };
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                _ => bail!("expected ',' or '}}' in dict"),
            }
        }
        Ok(RawValue::Dict(map))
    }

    fn parse_number(&mut self) -> Result<RawValue> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos]
            .parse::<i64>()
            .map(RawValue::Int)
            .map_err(|e| anyhow!("invalid integer literal: {e}"))
    }

    fn parse_identifier_value(&mut self) -> Result<RawValue> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let ident = &self.src[start..self.pos];
        if ident.is_empty() {
            bail!("unexpected character '{:?}' while parsing value", self.peek());
        }
        Ok(match ident {
            "True" => RawValue::Bool(true),
            "False" => RawValue::Bool(false),
            other => RawValue::Constant(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_scalars() {
        let blocks = parse(
            "name = 'toy'\nversion = '0.0'\ntoolchain = SYSTEM\nhomepage = 'https://example.org'\n",
            None,
        )
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].get("name").unwrap().as_str(), Some("toy"));
        assert_eq!(blocks[0].get("toolchain").unwrap(), &RawValue::Constant("SYSTEM".to_string()));
    }

    #[test]
    fn parses_lists_and_dicts() {
        let blocks = parse(
            "sources = ['toy-0.0.tar.gz']\npatches = [{'name': 'toy-fix.patch', 'level': 1}]\n",
            None,
        )
        .unwrap();
        let sources = blocks[0].get("sources").unwrap().as_list().unwrap();
        assert_eq!(sources[0].as_str(), Some("toy-0.0.tar.gz"));
        let patches = blocks[0].get("patches").unwrap().as_list().unwrap();
        let patch_dict = patches[0].as_dict().unwrap();
        assert_eq!(patch_dict.get("name").unwrap().as_str(), Some("toy-fix.patch"));
    }

    #[test]
    fn handles_multiline_lists_and_comments() {
        let text = "# comment\nsources = [\n    'a.tar.gz',  # first\n    'b.tar.gz',\n]\n";
        let blocks = parse(text, None).unwrap();
        let sources = blocks[0].get("sources").unwrap().as_list().unwrap();
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn parses_sectioned_blocks_with_shared_preamble() {
        let text = "easyblock = 'ConfigureMake'\n\n[FIRST]\nname = 'first'\n\n[SECOND]\nname = 'second'\nblock = 'FIRST'\n";
        let blocks = parse(text, None).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block_name.as_deref(), Some("FIRST"));
        assert_eq!(blocks[0].get("easyblock").unwrap().as_str(), Some("ConfigureMake"));
        assert_eq!(blocks[1].depends_on_block.as_deref(), Some("FIRST"));
    }

    #[test]
    fn rejects_duplicate_block_names() {
        let text = "[A]\nname = 'x'\n[A]\nname = 'y'\n";
        assert!(parse(text, None).is_err());
    }
}
