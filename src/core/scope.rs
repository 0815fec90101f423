//! Variable scope
//!
//! Two namespaces merged at lookup: built-ins maintained by the
//! interpreter (`$NAME`, `$VERSION`, `$FILE`, ...) and user variables
//! introduced by `SET`. `SET` can never target a built-in; the definition
//! validator rejects that before anything runs.

use std::collections::BTreeMap;

use crate::error::DefinitionError;

/// Built-in variable names
pub const RESERVED: &[&str] = &[
    "NAME",
    "VERSION",
    "REPO",
    "DOMAIN",
    "DEST",
    "FILE",
    "PKG",
    "TAP_FILE",
    "CHOCO_FILE",
    "AUTHORIZATION",
    "DIR",
    "STEM",
    "MGR",
];

/// Built-ins a `SET` value may reference
const SET_VISIBLE: &[&str] = &["NAME", "VERSION"];

/// Name to value mapping used for `$KEY` substitution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableScope {
    builtins: BTreeMap<String, String>,
    user: BTreeMap<String, String>,
}

impl VariableScope {
    /// Empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a built-in
    ///
    /// Panics in debug builds when `key` is not a built-in name.
    pub fn set_builtin(&mut self, key: &str, value: impl Into<String>) {
        debug_assert!(RESERVED.contains(&key), "{key} is not a built-in");
        self.builtins.insert(key.to_string(), value.into());
    }

    /// Look a variable up; `DEST` is derived from `NAME` and `VERSION`
    pub fn get(&self, key: &str) -> Option<String> {
        if key == "DEST" {
            return self.dest();
        }
        self.builtins
            .get(key)
            .or_else(|| self.user.get(key))
            .cloned()
    }

    /// `name-version`, once both are known
    pub fn dest(&self) -> Option<String> {
        let name = self.builtins.get("NAME")?;
        let version = self.builtins.get("VERSION")?;
        Some(format!("{name}-{version}"))
    }

    /// Apply a `SET` line
    ///
    /// The value may use `$NAME`, `$VERSION` and earlier user variables;
    /// anything that still looks like a variable afterwards is rejected.
    pub fn apply_set(&mut self, key: &str, value: &str) -> Result<(), DefinitionError> {
        if RESERVED.contains(&key) {
            return Err(DefinitionError::ReservedVariable {
                key: key.to_string(),
            });
        }

        let mut visible = self.user.clone();
        for name in SET_VISIBLE {
            if let Some(v) = self.builtins.get(*name) {
                visible.insert((*name).to_string(), v.clone());
            }
        }
        let resolved = substitute_with(value, &visible);
        if resolved.contains('$') {
            return Err(DefinitionError::InvalidVariable {
                value: value.to_string(),
                error: "only $NAME, $VERSION and earlier SET variables may be used".to_string(),
            });
        }
        self.user.insert(key.to_string(), resolved);
        Ok(())
    }

    /// Replace every known `$KEY` in `text`; unknown tokens stay as written
    pub fn substitute(&self, text: &str) -> String {
        let mut all = self.user.clone();
        all.extend(self.builtins.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(dest) = self.dest() {
            all.insert("DEST".to_string(), dest);
        }
        substitute_with(text, &all)
    }
}

/// Substitute at each `$`, preferring the longest matching key
fn substitute_with(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        match keys.iter().find(|k| after.starts_with(k.as_str())) {
            Some(key) => {
                out.push_str(&vars[key.as_str()]);
                rest = &after[key.len()..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
