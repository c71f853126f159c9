//! Lexical scopes.
//!
//! A stack of frames, each mapping a symbol to the innermost declaration
//! bound under that name. Inner frames shadow outer ones; re-binding a
//! symbol within one frame is a duplicate the checker diagnoses. Frames
//! use insertion-ordered maps so that any iteration over visible bindings
//! is deterministic.

use impalac_util::{DefId, Symbol};
use indexmap::IndexMap;

#[derive(Debug, Default)]
struct Frame {
    bindings: IndexMap<Symbol, DefId>,
}

/// The scope stack. Always holds at least the root frame.
#[derive(Debug)]
pub struct ScopeTable {
    frames: Vec<Frame>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Current nesting depth; 1 is the root frame.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Pop the innermost frame. The root frame is never popped.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.frames.len() > 1, "pop_scope on the root frame");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bind `symbol` in the innermost frame. On a duplicate binding the
    /// frame is left unchanged and the previous declaration is returned.
    pub fn insert(&mut self, symbol: Symbol, decl: DefId) -> Result<(), DefId> {
        let top = self.frames.len() - 1;
        let bindings = &mut self.frames[top].bindings;
        if let Some(&prev) = bindings.get(&symbol) {
            return Err(prev);
        }
        bindings.insert(symbol, decl);
        Ok(())
    }

    /// The innermost declaration bound under `symbol`, if any.
    pub fn lookup(&self, symbol: Symbol) -> Option<DefId> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.bindings.get(&symbol).copied())
    }

    /// Every visible binding, innermost frame first, insertion order within
    /// a frame. Shadowed bindings are included after their shadowers.
    pub fn visible_bindings(&self) -> impl Iterator<Item = (Symbol, DefId)> + '_ {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.bindings.iter().map(|(&s, &d)| (s, d)))
    }

    /// Run `f` inside a fresh frame; the frame is released on every exit
    /// path out of `f`.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.push_scope();
        let result = f(self);
        self.pop_scope();
        result
    }
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    #[test]
    fn lookup_finds_innermost() {
        let mut scopes = ScopeTable::new();
        scopes.insert(sym("x"), DefId(0)).unwrap();
        scopes.push_scope();
        scopes.insert(sym("x"), DefId(1)).unwrap();
        assert_eq!(scopes.lookup(sym("x")), Some(DefId(1)));
        scopes.pop_scope();
        assert_eq!(scopes.lookup(sym("x")), Some(DefId(0)));
    }

    #[test]
    fn pop_removes_frame_bindings() {
        let mut scopes = ScopeTable::new();
        scopes.push_scope();
        scopes.insert(sym("local"), DefId(5)).unwrap();
        assert_eq!(scopes.lookup(sym("local")), Some(DefId(5)));
        scopes.pop_scope();
        assert_eq!(scopes.lookup(sym("local")), None);
    }

    #[test]
    fn duplicate_in_same_frame_is_an_error() {
        let mut scopes = ScopeTable::new();
        scopes.insert(sym("x"), DefId(0)).unwrap();
        assert_eq!(scopes.insert(sym("x"), DefId(1)), Err(DefId(0)));
        // The original binding survives.
        assert_eq!(scopes.lookup(sym("x")), Some(DefId(0)));
    }

    #[test]
    fn shadowing_across_frames_is_fine() {
        let mut scopes = ScopeTable::new();
        scopes.insert(sym("x"), DefId(0)).unwrap();
        scopes.push_scope();
        assert!(scopes.insert(sym("x"), DefId(1)).is_ok());
    }

    #[test]
    fn scoped_releases_on_exit() {
        let mut scopes = ScopeTable::new();
        let depth = scopes.depth();
        let result = scopes.scoped(|inner| {
            inner.insert(sym("tmp"), DefId(9)).unwrap();
            inner.depth()
        });
        assert_eq!(result, depth + 1);
        assert_eq!(scopes.depth(), depth);
        assert_eq!(scopes.lookup(sym("tmp")), None);
    }

    #[test]
    fn visible_bindings_are_innermost_first() {
        let mut scopes = ScopeTable::new();
        scopes.insert(sym("a"), DefId(0)).unwrap();
        scopes.push_scope();
        scopes.insert(sym("b"), DefId(1)).unwrap();
        scopes.insert(sym("c"), DefId(2)).unwrap();

        let all: Vec<_> = scopes.visible_bindings().collect();
        assert_eq!(
            all,
            vec![
                (sym("b"), DefId(1)),
                (sym("c"), DefId(2)),
                (sym("a"), DefId(0)),
            ]
        );
    }
}
