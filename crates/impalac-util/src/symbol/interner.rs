//! The global string table behind [`Symbol`].
//!
//! Lookups go through a `DashMap` keyed by the string itself, so concurrent
//! interning never blocks readers. Index-to-string resolution is O(1) via an
//! append-only side vector. Strings are leaked to obtain the `'static`
//! lifetime; the set of distinct identifiers in a compilation unit is
//! bounded, so this is a deliberate trade against lifetime bookkeeping.

use std::sync::{LazyLock, RwLock};

use dashmap::DashMap;

use super::{Symbol, KNOWN_SYMBOLS_END};

/// The strings seeded at indices `0..KNOWN_SYMBOLS_END`, in constant order
/// (see the `KW_*`/`TY_*` constants in the parent module).
const KNOWN_SYMBOLS: &[&str] = &[
    "fn", "let", "mut", "if", "else", "for", "in", "while", "do", "enum", "struct", "trait",
    "impl", "mod", "static", "typedef", "extern", "as", "simd", "true", "false", "return", "self",
    "super", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f16", "f32", "f64", "bool",
];

/// The global interner, seeded with the known symbols on first use.
pub static STRING_TABLE: LazyLock<StringTable> = LazyLock::new(|| {
    let table = StringTable::new();
    for s in KNOWN_SYMBOLS {
        table.intern(s);
    }
    debug_assert_eq!(table.len(), KNOWN_SYMBOLS_END as usize);
    table
});

/// Thread-safe string table.
pub struct StringTable {
    /// string -> index; lock-free concurrent lookups.
    map: DashMap<&'static str, u32, ahash::RandomState>,
    /// index -> string; appended under the write lock only.
    strings: RwLock<Vec<&'static str>>,
}

impl StringTable {
    fn new() -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(256, ahash::RandomState::new()),
            strings: RwLock::new(Vec::with_capacity(256)),
        }
    }

    /// Intern a string, returning its canonical symbol.
    pub fn intern(&self, string: &str) -> Symbol {
        if let Some(index) = self.map.get(string) {
            return Symbol { index: *index };
        }

        let mut strings = match self.strings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Re-check under the write lock: another thread may have interned
        // the same string between the lookup above and acquiring the lock.
        if let Some(index) = self.map.get(string) {
            return Symbol { index: *index };
        }

        let leaked: &'static str = Box::leak(string.to_string().into_boxed_str());
        let index = strings.len() as u32;
        strings.push(leaked);
        self.map.insert(leaked, index);
        Symbol { index }
    }

    /// Resolve a symbol back to its string.
    pub fn get(&self, symbol: Symbol) -> Option<&'static str> {
        let strings = match self.strings.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        strings.get(symbol.index as usize).copied()
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
