//! `.macro`/`.endmacro` body storage. A macro's body is captured verbatim
//! at definition time (see `directives::parse_macro_def`) rather than parsed
//! then; the same token span is re-parsed once per call, after each
//! parameter name is bound to that call's argument tokens via
//! `TokenStream::bind_local`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::token::Token;

#[derive(Clone)]
pub struct MacroDef {
    pub params: Vec<String>,
    pub body: Vec<Token>,
}

/// Registry of `.macro` definitions for one translation unit.
#[derive(Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
    /// How many times each macro has been called so far, used to mint a
    /// call-unique suffix for the global labels its body defines.
    call_counts: HashMap<String, u32>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<MacroDef> {
        self.macros.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn define(&mut self, name: &str, params: Vec<String>, body: Vec<Token>) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.macros.contains_key(&key) {
            return Err(Error::DuplicateMacro { name: name.to_string() });
        }
        self.macros.insert(key, MacroDef { params, body });
        Ok(())
    }

    /// Returns this call's index for `name` (0, 1, 2, ...) and bumps the
    /// counter for next time.
    pub fn next_call_index(&mut self, name: &str) -> u32 {
        let key = name.to_ascii_lowercase();
        let counter = self.call_counts.entry(key).or_insert(0);
        let idx = *counter;
        *counter += 1;
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut table = MacroTable::new();
        let body = Lexer::tokenize("nop").unwrap();
        table.define("push2", vec!["a".to_string(), "b".to_string()], body.clone()).unwrap();
        assert!(table.define("PUSH2", vec![], body).is_err());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut table = MacroTable::new();
        let body = Lexer::tokenize("nop").unwrap();
        table.define("Foo", vec![], body).unwrap();
        assert!(table.lookup("foo").is_some());
        assert!(table.lookup("FOO").is_some());
    }
}
