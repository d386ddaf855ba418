//! The modules-tool wire mini-language (§6 "Module tool wire protocol").
//!
//! A modules backend invoked with `python`-output mode prints a sequence of
//! directives that, evaluated, mutate the environment: `os.environ[k]=v`
//! assignments, deletions, and path-list manipulations. This crate never
//! `exec`s that output — [`parse_directives`] only recognises the small set
//! of sanctioned forms and turns them into [`Directive`] values the caller
//! applies to an [`crate::env::Env`] itself.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    SetEnv { key: String, value: String },
    UnsetEnv { key: String },
    PrependPath { key: String, value: String },
    AppendPath { key: String, value: String },
}

lazy_static! {
    static ref SETENV_RE: Regex =
        Regex::new(r#"^os\.environ\['(?P<key>[^']+)'\]\s*=\s*'(?P<value>.*)'$"#).unwrap();
    static ref UNSETENV_RE: Regex =
        Regex::new(r#"^del\s+os\.environ\['(?P<key>[^']+)'\]$"#).unwrap();
    static ref PREPEND_RE: Regex = Regex::new(
        r#"^os\.environ\['(?P<key>[^']+)'\]\s*=\s*'(?P<value>[^']*)'\s*\+\s*os\.pathsep\s*\+\s*os\.environ\.get\('[^']+',\s*''\)$"#
    )
    .unwrap();
    static ref APPEND_RE: Regex = Regex::new(
        r#"^os\.environ\['(?P<key>[^']+)'\]\s*=\s*os\.environ\.get\('[^']+',\s*''\)\s*\+\s*os\.pathsep\s*\+\s*'(?P<value>[^']*)'$"#
    )
    .unwrap();
    static ref ERROR_LINE_RE: Regex = Regex::new(r"^\S+:(?P<level>\w+):(?P<code>\d+):\s+(?P<msg>.*)$").unwrap();
    static ref AVAILABLE_ENTRY_RE: Regex =
        Regex::new(r"^(?P<mod>[^\s(]*[^:/])(?:\((?P<def>default)\))?\s*$").unwrap();
    static ref MODULESCRIPT_EXEC_RE: Regex = Regex::new(r"^exec\s+'/tmp/modulescript_\d+'$").unwrap();
}

/// Parse one line of backend stdout, skipping the spurious `source ...`
/// preamble lines some Tcl backends emit and returning `None` for anything
/// not recognised as a sanctioned directive (rather than failing the whole
/// batch on backend chatter).
pub fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("source ") || line.starts_with('#') {
        return None;
    }

    if let Some(caps) = PREPEND_RE.captures(line) {
        return Some(Directive::PrependPath {
            key: caps["key"].to_string(),
            value: caps["value"].to_string(),
        });
    }
    if let Some(caps) = APPEND_RE.captures(line) {
        return Some(Directive::AppendPath {
            key: caps["key"].to_string(),
            value: caps["value"].to_string(),
        });
    }
    if let Some(caps) = SETENV_RE.captures(line) {
        return Some(Directive::SetEnv { key: caps["key"].to_string(), value: caps["value"].to_string() });
    }
    if let Some(caps) = UNSETENV_RE.captures(line) {
        return Some(Directive::UnsetEnv { key: caps["key"].to_string() });
    }
    None
}

/// Parse the backend's full stdout, rewriting a bare `exec
/// '/tmp/modulescript_NNNN'` line (the legacy Tcl form) into nothing —
/// that form names a script this adapter never sources, so it is simply
/// dropped rather than interpreted.
pub fn parse_directives(stdout: &str) -> Vec<Directive> {
    stdout
        .lines()
        .filter(|line| !MODULESCRIPT_EXEC_RE.is_match(line.trim()))
        .filter_map(parse_line)
        .collect()
}

/// stderr error-line classifier: `^\S+:(level):(code):\s+(msg)$`, with
/// codes 57 and 64 downgraded to warnings regardless of the reported level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleToolMessage {
    pub level: String,
    pub code: u32,
    pub message: String,
    pub is_warning: bool,
}

pub fn parse_stderr_messages(stderr: &str) -> Vec<ModuleToolMessage> {
    stderr
        .lines()
        .filter_map(|line| {
            let caps = ERROR_LINE_RE.captures(line.trim())?;
            let code: u32 = caps["code"].parse().ok()?;
            Some(ModuleToolMessage {
                level: caps["level"].to_string(),
                code,
                message: caps["msg"].to_string(),
                is_warning: matches!(code, 57 | 64) || caps["level"].eq_ignore_ascii_case("warning"),
            })
        })
        .collect()
}

pub fn parse_available_entries(stderr: &str) -> Vec<(String, bool)> {
    stderr
        .split_whitespace()
        .filter(|tok| !tok.starts_with("---") && !tok.is_empty())
        .filter_map(|tok| {
            let caps = AVAILABLE_ENTRY_RE.captures(tok)?;
            let name = caps["mod"].to_string();
            if name.is_empty() {
                return None;
            }
            let is_default = caps.name("def").is_some();
            Some((name, is_default))
        })
        .collect()
}
