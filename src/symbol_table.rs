//! Scoped label and equation registry.
//!
//! A label name maps to a slot via `(name, file_scope, section_scope)`:
//! names starting with `@@` are local to the current *section* (a scoping
//! counter bumped by global labels and certain directives), names starting
//! with a single `@` are local to the current *file*, and everything else
//! is process-global.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::token::Token;

pub type Address = i64;

/// One label: a name bound to an address, with THUMB/data-region metadata
/// the ARM backend and symbol-file writers consult.
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub original_case_name: String,
    pub value: Address,
    pub defined: bool,
    pub is_data: bool,
    /// ARM backend's THUMB-bit-0 bookkeeping and similar per-label flags.
    pub info: i32,
    pub update_info: bool,
    pub section: u32,
}

impl Label {
    fn new(name: &str, section: u32) -> Self {
        Label {
            name: name.to_string(),
            original_case_name: name.to_string(),
            value: 0,
            defined: false,
            is_data: false,
            info: 0,
            update_info: true,
            section,
        }
    }
}

/// Scope an identifier resolves against, derived purely from its spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeClass {
    Global,
    FileStatic,
    Local,
}

fn classify(name: &str) -> ScopeClass {
    if name.starts_with("@@") {
        ScopeClass::Local
    } else if name.starts_with('@') {
        ScopeClass::FileStatic
    } else {
        ScopeClass::Global
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeKey {
    Global(String),
    FileStatic(String, u32),
    Local(String, u32),
}

fn scope_key(name: &str, file: u32, section: u32) -> ScopeKey {
    match classify(name) {
        ScopeClass::Global => ScopeKey::Global(name.to_ascii_lowercase()),
        ScopeClass::FileStatic => ScopeKey::FileStatic(name.to_ascii_lowercase(), file),
        ScopeClass::Local => ScopeKey::Local(name.to_ascii_lowercase(), section),
    }
}

/// Validates a symbol name: one or two leading `@`, then `[A-Za-z_.]`, then
/// `[A-Za-z0-9_.]*`, with the first non-`@` character never a digit.
pub fn is_valid_symbol_name(name: &str) -> bool {
    let at_count = name.chars().take_while(|&c| c == '@').count();
    if at_count > 2 {
        return false;
    }
    let stripped = &name[at_count..];
    let mut chars = stripped.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_' || first == '.') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Scoped label and equation registry for one translation unit.
#[derive(Default)]
pub struct SymbolTable {
    labels: Vec<Label>,
    label_index: HashMap<ScopeKey, usize>,
    equations: HashMap<String, Vec<Token>>,
    minted_names: HashSet<String>,
    unique_counter: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the label slot if absent ("`getLabel` creates-on-demand").
    pub fn get_label(&mut self, name: &str, file: u32, section: u32) -> Result<usize> {
        if !is_valid_symbol_name(name) {
            return Err(Error::InvalidSymbolName { name: name.to_string() });
        }
        let key = scope_key(name, file, section);
        if let Some(&idx) = self.label_index.get(&key) {
            return Ok(idx);
        }
        let idx = self.labels.len();
        self.labels.push(Label::new(name, section));
        self.label_index.insert(key, idx);
        Ok(idx)
    }

    /// Looks a label up without creating it (`symbolExists`).
    pub fn symbol_exists(&self, name: &str, file: u32, section: u32) -> bool {
        let key = scope_key(name, file, section);
        self.label_index.contains_key(&key)
    }

    /// Reads a label's value without creating a slot, honoring the same
    /// scoping rule as [`SymbolTable::get_label`].
    pub fn find_label_value(&self, name: &str, file: u32, section: u32) -> Option<i64> {
        let key = scope_key(name, file, section);
        self.label_index.get(&key).map(|&idx| self.labels[idx].value)
    }

    pub fn label(&self, idx: usize) -> &Label {
        &self.labels[idx]
    }

    pub fn label_mut(&mut self, idx: usize) -> &mut Label {
        &mut self.labels[idx]
    }

    pub fn all_labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_minted(&self, name: &str) -> bool {
        self.minted_names.contains(name)
    }

    /// Mints a fresh, collision-free label name for macro-internal use.
    pub fn mint_unique_label_name(&mut self, local: bool) -> String {
        self.unique_counter += 1;
        let prefix = if local { "@@__unique_" } else { "__unique_" };
        let name = format!("{prefix}{:08}", self.unique_counter);
        self.minted_names.insert(name.clone());
        name
    }

    /// Registers an `equ` definition. Rejected if the body mentions the
    /// same name (direct self-reference).
    pub fn define_equation(&mut self, name: &str, value: Vec<Token>) -> Result<()> {
        if !is_valid_symbol_name(name) {
            return Err(Error::InvalidSymbolName { name: name.to_string() });
        }
        let mentions_self = value.iter().any(|t| t.identifier_text().map(|s| s.eq_ignore_ascii_case(name)).unwrap_or(false));
        if mentions_self {
            return Err(Error::SelfReferentialEquation { name: name.to_string() });
        }
        self.equations.insert(name.to_ascii_lowercase(), value);
        Ok(())
    }

    pub fn equations(&self) -> &HashMap<String, Vec<Token>> {
        &self.equations
    }

    pub fn has_equation(&self, name: &str) -> bool {
        self.equations.contains_key(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_labels_ignore_file_and_section() {
        let mut table = SymbolTable::new();
        let a = table.get_label("foo", 0, 1).unwrap();
        let b = table.get_label("foo", 1, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn local_labels_are_scoped_by_section_not_file() {
        let mut table = SymbolTable::new();
        let a = table.get_label("@@loop", 0, 1).unwrap();
        let b = table.get_label("@@loop", 5, 1).unwrap();
        let c = table.get_label("@@loop", 0, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn file_static_labels_are_scoped_by_file_not_section() {
        let mut table = SymbolTable::new();
        let a = table.get_label("@local", 0, 1).unwrap();
        let b = table.get_label("@local", 0, 5).unwrap();
        let c = table.get_label("@local", 1, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn self_referential_equ_is_rejected() {
        let mut table = SymbolTable::new();
        let tokens = crate::lexer::Lexer::tokenize("FOO + 1").unwrap();
        assert!(table.define_equation("FOO", tokens).is_err());
    }

    #[test]
    fn invalid_symbol_names_are_rejected() {
        let mut table = SymbolTable::new();
        assert!(table.get_label("1bad", 0, 0).is_err());
        assert!(table.get_label("@@@toomany", 0, 0).is_err());
    }
}
