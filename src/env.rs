//! Environment manager (component C2).
//!
//! Grounded on `original_source/easybuild/tools/environment.py`, which
//! tracks changes in a global `_contextes` dict and monkey-patches
//! `os.environ` to read through it. DESIGN NOTES §9 flags that hook as
//! something to redesign: this port keeps the same context-stack shape —
//! push a context, record `set`/`unset` deltas, apply them to produce a
//! concrete environment — but the deltas are carried in an explicit [`Env`]
//! value threaded through function calls instead of a hidden global. The
//! only place process environment is actually mutated is the subprocess
//! boundary in [`crate::pipeline`], via [`Env::as_command_deltas`].

use std::collections::BTreeMap;
use std::env as std_env;
use std::ffi::OsString;

/// `None` means "explicitly unset"; `Some(v)` means "set to v". Matches the
/// original's use of `None` as a tombstone in its context dict.
type Delta = BTreeMap<String, Option<String>>;

/// One frame of tracked environment changes, plus the ones below it. A
/// build step sandbox pushes a frame, makes its changes, then either keeps
/// or discards them without touching frames above it.
#[derive(Debug, Clone)]
pub struct Env {
    /// Snapshot of the real process environment taken once at startup;
    /// never mutated directly so it always reflects "what the EasyBuild
    /// process itself was launched with".
    base: BTreeMap<String, String>,
    stack: Vec<Delta>,
}

impl Env {
    /// Capture the current process environment as the base snapshot.
    pub fn from_process() -> Self {
        Env { base: std_env::vars().collect(), stack: vec![Delta::new()] }
    }

    #[cfg(test)]
    fn with_base(base: BTreeMap<String, String>) -> Self {
        Env { base, stack: vec![Delta::new()] }
    }

    /// Push a fresh, empty context frame; changes made until [`Env::pop_context`]
    /// are isolated to this frame and visible on top of everything below it.
    pub fn push_context(&mut self) {
        self.stack.push(Delta::new());
    }

    /// Pop the top context frame, discarding its changes.
    pub fn pop_context(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    pub fn setvar(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.top_mut().insert(key.into(), Some(value.into()));
    }

    pub fn unsetvar(&mut self, key: impl Into<String>) {
        self.top_mut().insert(key.into(), None);
    }

    fn top_mut(&mut self) -> &mut Delta {
        self.stack.last_mut().expect("stack always has a base frame")
    }

    /// Look up `key`, walking frames top-down, falling back to the base
    /// snapshot; a tombstone in any frame shadows the base value.
    pub fn getvar(&self, key: &str) -> Option<&str> {
        for frame in self.stack.iter().rev() {
            if let Some(value) = frame.get(key) {
                return value.as_deref();
            }
        }
        self.base.get(key).map(|s| s.as_str())
    }

    /// Materialize the full effective environment: base snapshot with every
    /// frame's deltas folded in, bottom to top.
    pub fn apply(&self) -> BTreeMap<String, String> {
        let mut result = self.base.clone();
        for frame in &self.stack {
            for (key, value) in frame {
                match value {
                    Some(v) => {
                        result.insert(key.clone(), v.clone());
                    }
                    None => {
                        result.remove(key);
                    }
                }
            }
        }
        result
    }

    /// The deltas tracked across all frames, flattened — set/unset keys
    /// only, suitable for handing straight to
    /// [`eb_util::process::CommandSpec::env`]/`env_remove`.
    pub fn as_command_deltas(&self) -> BTreeMap<String, Option<OsString>> {
        let mut flattened: Delta = Delta::new();
        for frame in &self.stack {
            for (key, value) in frame {
                flattened.insert(key.clone(), value.clone());
            }
        }
        flattened.into_iter().map(|(k, v)| (k, v.map(OsString::from))).collect()
    }

    /// Diff `self` against `other`, returning the set of changes needed to
    /// turn `other`'s effective environment into `self`'s — mirrors
    /// `modify_env(old, new)` from the original, but as a pure function
    /// instead of one that mutates `os.environ` as a side effect.
    pub fn diff(&self, other: &Env) -> BTreeMap<String, Option<String>> {
        let mine = self.apply();
        let theirs = other.apply();
        let mut changes = BTreeMap::new();

        for (key, value) in &mine {
            match theirs.get(key) {
                Some(old) if old == value => {}
                _ => {
                    changes.insert(key.clone(), Some(value.clone()));
                }
            }
        }
        for key in theirs.keys() {
            if !mine.contains_key(key) {
                changes.insert(key.clone(), None);
            }
        }
        changes
    }

    /// Write tracked changes as a sourceable shell script (`export KEY=VAL`
    /// / `unset KEY`), the `write_changes` counterpart.
    pub fn write_changes_script(&self) -> String {
        let mut script = String::new();
        let mut flattened: Delta = Delta::new();
        for frame in &self.stack {
            for (key, value) in frame {
                flattened.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in flattened {
            match value {
                Some(v) => {
                    script.push_str("export ");
                    script.push_str(&key);
                    script.push('=');
                    script.push_str(&shell_escape::unix::escape(v.into()));
                    script.push('\n');
                }
                None => {
                    script.push_str("unset ");
                    script.push_str(&key);
                    script.push('\n');
                }
            }
        }
        script
    }

    /// Filter empty entries out of `$PATH`-like variables and unset every
    /// `$PYTHON*` variable, matching `sanitize_env`'s rationale: stray
    /// empty path entries break tool lookups, and a build/install
    /// procedure inheriting the orchestrator's own Python environment can
    /// pick up the wrong interpreter or site-packages.
    pub fn sanitize(&mut self) {
        const PATH_LIKE: &[&str] = &["CPATH", "LD_LIBRARY_PATH", "LIBRARY_PATH", "LD_PRELOAD", "PATH"];
        for key in PATH_LIKE {
            if let Some(value) = self.getvar(key).map(|s| s.to_string()) {
                let entries: Vec<&str> = value.split(':').filter(|s| !s.is_empty()).collect();
                if entries.is_empty() {
                    self.unsetvar(*key);
                } else {
                    self.setvar(*key, entries.join(":"));
                }
            }
        }

        let python_keys: Vec<String> =
            self.apply().keys().filter(|k| k.starts_with("PYTHON")).cloned().collect();
        for key in python_keys {
            self.unsetvar(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> BTreeMap<String, String> {
        let mut base = BTreeMap::new();
        base.insert("HOME".to_string(), "/home/user".to_string());
        base.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        base
    }

    #[test]
    fn setvar_shadows_base_without_mutating_it() {
        let mut env = Env::with_base(base_env());
        env.setvar("PATH", "/opt/foo/bin:/usr/bin:/bin");
        assert_eq!(env.getvar("PATH"), Some("/opt/foo/bin:/usr/bin:/bin"));
        assert_eq!(env.base.get("PATH").unwrap(), "/usr/bin:/bin");
    }

    #[test]
    fn pop_context_discards_nested_changes() {
        let mut env = Env::with_base(base_env());
        env.setvar("OUTER", "1");
        env.push_context();
        env.setvar("INNER", "2");
        assert_eq!(env.getvar("INNER"), Some("2"));
        env.pop_context();
        assert_eq!(env.getvar("INNER"), None);
        assert_eq!(env.getvar("OUTER"), Some("1"));
    }

    #[test]
    fn unsetvar_shadows_base_value() {
        let mut env = Env::with_base(base_env());
        env.unsetvar("HOME");
        assert_eq!(env.getvar("HOME"), None);
        assert_eq!(env.apply().get("HOME"), None);
    }

    #[test]
    fn sanitize_strips_empty_path_entries_and_python_vars() {
        let mut base = base_env();
        base.insert("PATH".to_string(), "/usr/bin::/bin:".to_string());
        base.insert("PYTHONPATH".to_string(), "/foo".to_string());
        let mut env = Env::with_base(base);
        env.sanitize();
        assert_eq!(env.getvar("PATH"), Some("/usr/bin:/bin"));
        assert_eq!(env.getvar("PYTHONPATH"), None);
    }

    #[test]
    fn diff_reports_sets_and_unsets() {
        let mut a = Env::with_base(base_env());
        a.setvar("FOO", "bar");
        a.unsetvar("HOME");
        let b = Env::with_base(base_env());
        let changes = a.diff(&b);
        assert_eq!(changes.get("FOO"), Some(&Some("bar".to_string())));
        assert_eq!(changes.get("HOME"), Some(&None));
    }
}
