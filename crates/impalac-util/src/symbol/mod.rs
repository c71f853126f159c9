//! String interning.
//!
//! A [`Symbol`] is a 4-byte handle to a string in a global, thread-safe
//! table. Interning the same string twice yields the same symbol, so
//! identifier comparison is an integer comparison, and symbols are `Copy`
//! keys for scope frames and declaration tables.
//!
//! Impala keywords and primitive type names are pre-interned at table
//! initialization so that they have stable indices; see the `KW_*` and
//! `TY_*` constants.
//!
//! # Examples
//!
//! ```
//! use impalac_util::symbol::{Symbol, KW_FN};
//!
//! let a = Symbol::intern("swap");
//! let b = Symbol::intern("swap");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "swap");
//! assert_eq!(Symbol::intern("fn"), KW_FN);
//! ```

mod interner;

pub use interner::STRING_TABLE;

/// An interned string.
///
/// Interned strings live for the program duration; `as_str` hands out
/// `'static` references. The table is lock-free for lookups (`dashmap`), so
/// symbols may be interned from any thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    pub(crate) index: u32,
}

// Known symbols, in the order the interner seeds them. Indices below
// `KNOWN_SYMBOLS_END` always refer to these.

pub const KW_FN: Symbol = Symbol { index: 0 };
pub const KW_LET: Symbol = Symbol { index: 1 };
pub const KW_MUT: Symbol = Symbol { index: 2 };
pub const KW_IF: Symbol = Symbol { index: 3 };
pub const KW_ELSE: Symbol = Symbol { index: 4 };
pub const KW_FOR: Symbol = Symbol { index: 5 };
pub const KW_IN: Symbol = Symbol { index: 6 };
pub const KW_WHILE: Symbol = Symbol { index: 7 };
pub const KW_DO: Symbol = Symbol { index: 8 };
pub const KW_ENUM: Symbol = Symbol { index: 9 };
pub const KW_STRUCT: Symbol = Symbol { index: 10 };
pub const KW_TRAIT: Symbol = Symbol { index: 11 };
pub const KW_IMPL: Symbol = Symbol { index: 12 };
pub const KW_MOD: Symbol = Symbol { index: 13 };
pub const KW_STATIC: Symbol = Symbol { index: 14 };
pub const KW_TYPEDEF: Symbol = Symbol { index: 15 };
pub const KW_EXTERN: Symbol = Symbol { index: 16 };
pub const KW_AS: Symbol = Symbol { index: 17 };
pub const KW_SIMD: Symbol = Symbol { index: 18 };
pub const KW_TRUE: Symbol = Symbol { index: 19 };
pub const KW_FALSE: Symbol = Symbol { index: 20 };
pub const KW_RETURN: Symbol = Symbol { index: 21 };
pub const KW_SELF: Symbol = Symbol { index: 22 };
pub const KW_SUPER: Symbol = Symbol { index: 23 };

pub const TY_I8: Symbol = Symbol { index: 24 };
pub const TY_I16: Symbol = Symbol { index: 25 };
pub const TY_I32: Symbol = Symbol { index: 26 };
pub const TY_I64: Symbol = Symbol { index: 27 };
pub const TY_U8: Symbol = Symbol { index: 28 };
pub const TY_U16: Symbol = Symbol { index: 29 };
pub const TY_U32: Symbol = Symbol { index: 30 };
pub const TY_U64: Symbol = Symbol { index: 31 };
pub const TY_F16: Symbol = Symbol { index: 32 };
pub const TY_F32: Symbol = Symbol { index: 33 };
pub const TY_F64: Symbol = Symbol { index: 34 };
pub const TY_BOOL: Symbol = Symbol { index: 35 };

/// First index handed out to dynamically interned strings.
pub(crate) const KNOWN_SYMBOLS_END: u32 = 36;

impl Symbol {
    /// Intern a string, returning its canonical symbol.
    #[inline]
    pub fn intern(string: &str) -> Self {
        STRING_TABLE.intern(string)
    }

    /// Intern a string, taking the fast path for known keywords.
    pub fn intern_known(string: &str) -> Self {
        match string {
            "fn" => KW_FN,
            "let" => KW_LET,
            "mut" => KW_MUT,
            "if" => KW_IF,
            "else" => KW_ELSE,
            "for" => KW_FOR,
            "in" => KW_IN,
            "while" => KW_WHILE,
            "do" => KW_DO,
            "enum" => KW_ENUM,
            "struct" => KW_STRUCT,
            "trait" => KW_TRAIT,
            "impl" => KW_IMPL,
            "mod" => KW_MOD,
            "static" => KW_STATIC,
            "typedef" => KW_TYPEDEF,
            "extern" => KW_EXTERN,
            "as" => KW_AS,
            "simd" => KW_SIMD,
            "true" => KW_TRUE,
            "false" => KW_FALSE,
            "return" => KW_RETURN,
            "self" => KW_SELF,
            "super" => KW_SUPER,
            "i8" => TY_I8,
            "i16" => TY_I16,
            "i32" => TY_I32,
            "i64" => TY_I64,
            "u8" => TY_U8,
            "u16" => TY_U16,
            "u32" => TY_U32,
            "u64" => TY_U64,
            "f16" => TY_F16,
            "f32" => TY_F32,
            "f64" => TY_F64,
            "bool" => TY_BOOL,
            _ => Self::intern(string),
        }
    }

    /// The interned string.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        STRING_TABLE.get(*self).unwrap_or("")
    }

    /// Compare against a plain string without interning it.
    #[inline]
    pub fn eq_str(&self, other: &str) -> bool {
        self.as_str() == other
    }

    /// True for pre-interned keywords and primitive type names.
    #[inline]
    pub fn is_known(&self) -> bool {
        self.index < KNOWN_SYMBOLS_END
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static_assertions::assert_impl_all!(Symbol: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn intern_is_canonical() {
        let a = Symbol::intern("canonical_test");
        let b = Symbol::intern("canonical_test");
        let c = Symbol::intern("something_else");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "canonical_test");
    }

    #[test]
    fn known_symbols_match_their_strings() {
        assert_eq!(KW_FN.as_str(), "fn");
        assert_eq!(KW_TRAIT.as_str(), "trait");
        assert_eq!(KW_RETURN.as_str(), "return");
        assert_eq!(TY_I32.as_str(), "i32");
        assert_eq!(TY_F64.as_str(), "f64");
        assert_eq!(TY_BOOL.as_str(), "bool");
    }

    #[test]
    fn intern_known_fast_path_agrees_with_table() {
        assert_eq!(Symbol::intern_known("fn"), KW_FN);
        assert_eq!(Symbol::intern_known("i32"), TY_I32);
        assert_eq!(Symbol::intern_known("fn"), Symbol::intern("fn"));
        assert_eq!(Symbol::intern_known("bool"), Symbol::intern("bool"));

        let plain = Symbol::intern_known("not_a_keyword");
        assert!(!plain.is_known());
        assert_eq!(plain.as_str(), "not_a_keyword");
    }

    #[test]
    fn is_known_boundary() {
        assert!(KW_FN.is_known());
        assert!(TY_BOOL.is_known());
        assert!(!Symbol::intern("user_identifier").is_known());
    }

    #[test]
    fn display_and_debug() {
        let s = Symbol::intern("shown");
        assert_eq!(format!("{}", s), "shown");
        assert_eq!(format!("{:?}", s), "Symbol(shown)");
    }

    #[test]
    fn empty_and_unicode() {
        assert_eq!(Symbol::intern("").as_str(), "");
        assert_eq!(Symbol::intern("λx.x").as_str(), "λx.x");
    }

    #[test]
    fn concurrent_interning_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| Symbol::intern("race_me")))
            .collect();
        let symbols: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &symbols[1..] {
            assert_eq!(symbols[0], *s);
        }
    }

    #[test]
    fn concurrent_distinct_strings_stay_distinct() {
        let handles: Vec<_> = (0..8)
            .map(|i| thread::spawn(move || Symbol::intern(&format!("distinct_{i}"))))
            .collect();
        let symbols: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                assert_ne!(symbols[i], symbols[j]);
            }
        }
    }
}
