//! Stable codes identifying diagnostic kinds.
//!
//! Codes follow `{prefix}{number:04}`: `E` for errors, `W` for warnings.
//! The `E33xx` block is the semantic-analysis taxonomy.

use std::fmt;

/// A diagnostic code such as `E3303`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticCode {
    pub prefix: &'static str,
    pub number: u32,
}

impl DiagnosticCode {
    #[inline]
    pub const fn new(prefix: &'static str, number: u32) -> Self {
        Self { prefix, number }
    }

    pub fn as_str(&self) -> String {
        format!("{}{:04}", self.prefix, self.number)
    }

    // Semantic analysis (E33xx)

    /// Symbol not found in any visible scope.
    pub const E_SEMA_UNDECLARED: Self = Self::new("E", 3301);
    /// Symbol bound twice in the same scope frame.
    pub const E_SEMA_DUPLICATE_BINDING: Self = Self::new("E", 3302);
    /// Expected and found types are not in the subtype relation.
    pub const E_SEMA_TYPE_MISMATCH: Self = Self::new("E", 3303);
    /// Call, tuple, or trait instantiation with the wrong element count.
    pub const E_SEMA_ARITY_MISMATCH: Self = Self::new("E", 3304);
    /// Trait used where a type is required, or a type where a trait is.
    pub const E_SEMA_MISPLACED_TRAIT: Self = Self::new("E", 3305);
    /// Type argument does not satisfy its parameter's trait bounds.
    pub const E_SEMA_BOUND_VIOLATION: Self = Self::new("E", 3306);
    /// Function declared as returning never produces its declared value.
    pub const E_SEMA_NON_RETURNING: Self = Self::new("E", 3307);
    /// Construction of a malformed type.
    pub const E_SEMA_ILLEGAL_TYPE: Self = Self::new("E", 3308);
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04}", self.prefix, self.number)
    }
}

impl fmt::Debug for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiagnosticCode({}{:04})", self.prefix, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_formatting() {
        assert_eq!(DiagnosticCode::new("E", 1).as_str(), "E0001");
        assert_eq!(DiagnosticCode::E_SEMA_UNDECLARED.as_str(), "E3301");
        assert_eq!(DiagnosticCode::E_SEMA_ILLEGAL_TYPE.to_string(), "E3308");
    }

    #[test]
    fn taxonomy_codes_are_distinct() {
        let all = [
            DiagnosticCode::E_SEMA_UNDECLARED,
            DiagnosticCode::E_SEMA_DUPLICATE_BINDING,
            DiagnosticCode::E_SEMA_TYPE_MISMATCH,
            DiagnosticCode::E_SEMA_ARITY_MISMATCH,
            DiagnosticCode::E_SEMA_MISPLACED_TRAIT,
            DiagnosticCode::E_SEMA_BOUND_VIOLATION,
            DiagnosticCode::E_SEMA_NON_RETURNING,
            DiagnosticCode::E_SEMA_ILLEGAL_TYPE,
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }
}
