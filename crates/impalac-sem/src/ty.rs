//! The type universe and its hash-consing table.
//!
//! Structural types are interned: constructing the same shape twice yields
//! the same [`TypeId`], so handle equality is type equality. Nominal types
//! (structs and enums) are canonical per declaration site and carry operand
//! slots that are filled once during checking, which is what lets recursive
//! definitions tie the knot. Fresh [`TypeKind::Unknown`] placeholders are
//! never deduplicated.
//!
//! Generic items are type-level [`TypeKind::Lambda`]s; instantiation is
//! [`TypeTable::app`], which eagerly beta-reduces under a de Bruijn
//! discipline ([`TypeKind::Var`]`(0)` is bound by the innermost lambda) and
//! caches the reduction on the interned application node.

use std::fmt;

use impalac_util::{DefId, FxHashMap, FxHashSet, IndexVec, Symbol, TypeId};

pub use impalac_ast::{AddrSpace, PrimTy};

/// The shape of one type term. Children are [`TypeId`] handles into the
/// owning [`TypeTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Prim(PrimTy),
    /// The empty tuple is `unit`.
    Tuple(Vec<TypeId>),
    /// A function takes a single parameter, conventionally a tuple whose
    /// last element is the return continuation.
    Fn(TypeId),
    /// Nominal; identity is the declaration, not the field list.
    Struct {
        decl: DefId,
        name: Symbol,
        fields: Vec<TypeId>,
    },
    /// Nominal; one operand per variant payload.
    Enum {
        decl: DefId,
        name: Symbol,
        variants: Vec<TypeId>,
    },
    DefiniteArray {
        elem: TypeId,
        dim: u64,
    },
    IndefiniteArray(TypeId),
    Simd {
        elem: TypeId,
        dim: u64,
    },
    /// Shared reference `&T` / `&mut T`.
    BorrowedPtr {
        pointee: TypeId,
        mutable: bool,
        addr_space: AddrSpace,
    },
    /// Unique reference `~T`.
    OwnedPtr {
        pointee: TypeId,
        addr_space: AddrSpace,
    },
    /// L-value type of a storage cell; never written in source.
    Ref {
        pointee: TypeId,
        mutable: bool,
        addr_space: AddrSpace,
    },
    /// De Bruijn variable; 0 is bound by the innermost enclosing lambda.
    Var(u32),
    /// Type-level abstraction for generic items.
    Lambda {
        body: TypeId,
        name: Symbol,
    },
    /// Type-level application; reduced eagerly when the callee is a lambda.
    App {
        callee: TypeId,
        arg: TypeId,
    },
    /// Unification placeholder with identity-based equality.
    Unknown(u32),
    /// Records a failed unification for diagnostics; absorbs like `Error`.
    InferError {
        dst: TypeId,
        src: TypeId,
    },
    /// Result type of non-returning functions.
    NoRet,
    /// Absorbing element for malformed types.
    Error,
}

/// Hash-consing interner of type terms.
pub struct TypeTable {
    types: IndexVec<TypeId, TypeKind>,
    /// Structural terms only; nominals and unknowns are never merged.
    interned: FxHashMap<TypeKind, TypeId>,
    /// Canonical nominal per declaration site.
    nominals: FxHashMap<DefId, TypeId>,
    /// Reduction cache, keyed by the interned `App` node.
    app_cache: FxHashMap<TypeId, TypeId>,
    next_unknown: u32,
    unit: TypeId,
    noret: TypeId,
    error: TypeId,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self {
            types: IndexVec::new(),
            interned: FxHashMap::default(),
            nominals: FxHashMap::default(),
            app_cache: FxHashMap::default(),
            next_unknown: 0,
            unit: TypeId::DUMMY,
            noret: TypeId::DUMMY,
            error: TypeId::DUMMY,
        };
        table.unit = table.unify(TypeKind::Tuple(Vec::new()));
        table.noret = table.unify(TypeKind::NoRet);
        table.error = table.unify(TypeKind::Error);
        table
    }

    fn unify(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&t) = self.interned.get(&kind) {
            return t;
        }
        let t = self.types.push(kind.clone());
        self.interned.insert(kind, t);
        t
    }

    pub fn kind(&self, t: TypeId) -> &TypeKind {
        &self.types[t]
    }

    /// Number of live terms, interned or nominal.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn prim_type(&mut self, tag: PrimTy) -> TypeId {
        self.unify(TypeKind::Prim(tag))
    }

    pub fn unit(&self) -> TypeId {
        self.unit
    }

    pub fn type_noret(&self) -> TypeId {
        self.noret
    }

    pub fn type_error(&self) -> TypeId {
        self.error
    }

    pub fn tuple_type(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.unify(TypeKind::Tuple(elems))
    }

    pub fn fn_type(&mut self, param: TypeId) -> TypeId {
        self.unify(TypeKind::Fn(param))
    }

    /// Function type over an element list, wrapping it in a tuple.
    pub fn fn_type_args(&mut self, elems: Vec<TypeId>) -> TypeId {
        let param = self.tuple_type(elems);
        self.fn_type(param)
    }

    pub fn definite_array_type(&mut self, elem: TypeId, dim: u64) -> TypeId {
        self.unify(TypeKind::DefiniteArray { elem, dim })
    }

    pub fn indefinite_array_type(&mut self, elem: TypeId) -> TypeId {
        self.unify(TypeKind::IndefiniteArray(elem))
    }

    pub fn simd_type(&mut self, elem: TypeId, dim: u64) -> TypeId {
        self.unify(TypeKind::Simd { elem, dim })
    }

    pub fn borrowed_ptr_type(
        &mut self,
        pointee: TypeId,
        mutable: bool,
        addr_space: AddrSpace,
    ) -> TypeId {
        self.unify(TypeKind::BorrowedPtr {
            pointee,
            mutable,
            addr_space,
        })
    }

    pub fn owned_ptr_type(&mut self, pointee: TypeId, addr_space: AddrSpace) -> TypeId {
        self.unify(TypeKind::OwnedPtr {
            pointee,
            addr_space,
        })
    }

    pub fn ref_type(&mut self, pointee: TypeId, mutable: bool, addr_space: AddrSpace) -> TypeId {
        self.unify(TypeKind::Ref {
            pointee,
            mutable,
            addr_space,
        })
    }

    pub fn var(&mut self, depth: u32) -> TypeId {
        self.unify(TypeKind::Var(depth))
    }

    pub fn lambda(&mut self, body: TypeId, name: Symbol) -> TypeId {
        self.unify(TypeKind::Lambda { body, name })
    }

    /// A fresh placeholder; never deduplicated.
    pub fn unknown_type(&mut self) -> TypeId {
        let n = self.next_unknown;
        self.next_unknown += 1;
        self.types.push(TypeKind::Unknown(n))
    }

    /// Record a failed unification of `dst := src`. Re-reporting the same
    /// pair (in either orientation) returns the existing marker.
    pub fn infer_error(&mut self, dst: TypeId, src: TypeId) -> TypeId {
        if let TypeKind::InferError { src: s, .. } = self.kind(dst) {
            if *s == src {
                return dst;
            }
        }
        if let TypeKind::InferError { dst: d, .. } = self.kind(src) {
            if *d == dst {
                return src;
            }
        }
        self.unify(TypeKind::InferError { dst, src })
    }

    /// Canonical struct type for `decl`, allocating it with `num_fields`
    /// unfilled slots on first request.
    pub fn struct_type(&mut self, decl: DefId, name: Symbol, num_fields: usize) -> TypeId {
        if let Some(&t) = self.nominals.get(&decl) {
            return t;
        }
        let t = self.types.push(TypeKind::Struct {
            decl,
            name,
            fields: vec![TypeId::DUMMY; num_fields],
        });
        self.nominals.insert(decl, t);
        t
    }

    /// Canonical enum type for `decl`; see [`TypeTable::struct_type`].
    pub fn enum_type(&mut self, decl: DefId, name: Symbol, num_variants: usize) -> TypeId {
        if let Some(&t) = self.nominals.get(&decl) {
            return t;
        }
        let t = self.types.push(TypeKind::Enum {
            decl,
            name,
            variants: vec![TypeId::DUMMY; num_variants],
        });
        self.nominals.insert(decl, t);
        t
    }

    /// A nominal copy that is NOT registered as the canonical type of its
    /// declaration; reduction uses this for instantiated generics.
    fn fresh_nominal(&mut self, kind: TypeKind) -> TypeId {
        debug_assert!(matches!(
            kind,
            TypeKind::Struct { .. } | TypeKind::Enum { .. }
        ));
        self.types.push(kind)
    }

    /// Fill operand slot `i` of a nominal type. Each slot is set once.
    pub fn set_nominal_op(&mut self, t: TypeId, i: usize, op: TypeId) {
        match &mut self.types[t] {
            TypeKind::Struct { fields, .. } => {
                debug_assert!(fields[i].is_dummy(), "struct operand set twice");
                fields[i] = op;
            }
            TypeKind::Enum { variants, .. } => {
                debug_assert!(variants[i].is_dummy(), "enum operand set twice");
                variants[i] = op;
            }
            other => unreachable!("set_nominal_op on non-nominal type {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Predicates and accessors
    // ------------------------------------------------------------------

    pub fn is_error(&self, t: TypeId) -> bool {
        matches!(
            self.kind(t),
            TypeKind::Error | TypeKind::InferError { .. }
        )
    }

    pub fn is_noret(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::NoRet)
    }

    pub fn is_unit(&self, t: TypeId) -> bool {
        t == self.unit
    }

    pub fn is_unknown(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Unknown(_))
    }

    pub fn is_int(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Prim(p) if p.is_int())
    }

    pub fn is_float(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Prim(p) if p.is_float())
    }

    pub fn is_bool(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Prim(PrimTy::Bool))
    }

    pub fn is_numeric(&self, t: TypeId) -> bool {
        self.is_int(t) || self.is_float(t)
    }

    /// Loose equality used for impl-argument matching: handle equality with
    /// errors and unknowns acting as wildcards.
    pub fn matches(&self, a: TypeId, b: TypeId) -> bool {
        a == b || self.is_error(a) || self.is_error(b) || self.is_unknown(a) || self.is_unknown(b)
    }

    /// The immediate children of a term, in operand order.
    pub fn ops(&self, t: TypeId) -> Vec<TypeId> {
        match self.kind(t) {
            TypeKind::Tuple(ts) => ts.clone(),
            TypeKind::Fn(p) => vec![*p],
            TypeKind::Struct { fields, .. } => fields.clone(),
            TypeKind::Enum { variants, .. } => variants.clone(),
            TypeKind::DefiniteArray { elem, .. } | TypeKind::Simd { elem, .. } => vec![*elem],
            TypeKind::IndefiniteArray(e) => vec![*e],
            TypeKind::BorrowedPtr { pointee, .. }
            | TypeKind::OwnedPtr { pointee, .. }
            | TypeKind::Ref { pointee, .. } => vec![*pointee],
            TypeKind::Lambda { body, .. } => vec![*body],
            TypeKind::App { callee, arg } => vec![*callee, *arg],
            TypeKind::InferError { dst, src } => vec![*dst, *src],
            TypeKind::Prim(_)
            | TypeKind::Var(_)
            | TypeKind::Unknown(_)
            | TypeKind::NoRet
            | TypeKind::Error => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Function types (continuation-passing convention)
    // ------------------------------------------------------------------

    /// The single parameter of a function type.
    pub fn fn_param(&self, f: TypeId) -> TypeId {
        match self.kind(f) {
            TypeKind::Fn(p) => *p,
            other => unreachable!("fn_param on {other:?}"),
        }
    }

    /// Number of parameter-tuple elements (1 for a non-tuple parameter).
    pub fn num_params(&self, f: TypeId) -> usize {
        match self.kind(self.fn_param(f)) {
            TypeKind::Tuple(ts) => ts.len(),
            _ => 1,
        }
    }

    pub fn param_at(&self, f: TypeId, i: usize) -> TypeId {
        let p = self.fn_param(f);
        match self.kind(p) {
            TypeKind::Tuple(ts) => ts[i],
            _ => {
                debug_assert_eq!(i, 0);
                p
            }
        }
    }

    pub fn last_param(&self, f: TypeId) -> Option<TypeId> {
        let p = self.fn_param(f);
        match self.kind(p) {
            TypeKind::Tuple(ts) => ts.last().copied(),
            _ => Some(p),
        }
    }

    /// A function type is returning iff the last element of its parameter
    /// tuple is a function type that is itself non-returning (the return
    /// continuation).
    pub fn is_returning(&self, f: TypeId) -> bool {
        match self.last_param(f) {
            Some(last) => {
                matches!(self.kind(last), TypeKind::Fn(_)) && !self.is_returning(last)
            }
            None => false,
        }
    }

    /// The call-result type encoded by the return continuation: unit for a
    /// nullary continuation, the single element for arity one, the tuple
    /// itself otherwise; `NoRet` when there is no continuation.
    pub fn return_type(&self, f: TypeId) -> TypeId {
        let param = self.fn_param(f);
        let last = match self.kind(param) {
            TypeKind::Tuple(ts) => match ts.last() {
                Some(&last) => last,
                None => return self.noret,
            },
            _ => param,
        };
        match self.kind(last) {
            TypeKind::Fn(inner) => match self.kind(*inner) {
                TypeKind::Tuple(ts) if ts.is_empty() => self.unit,
                TypeKind::Tuple(ts) if ts.len() == 1 => ts[0],
                _ => *inner,
            },
            _ => self.noret,
        }
    }

    // ------------------------------------------------------------------
    // Subtyping
    // ------------------------------------------------------------------

    /// `dst ⊒ src`: a value of type `src` may flow where `dst` is expected.
    ///
    /// Reflexive; nominal types relate only to themselves. Borrowed
    /// references accept owned references and may drop mutability; an
    /// indefinite array accepts any definite array over a compatible
    /// element. Function types are contravariant in their parameter and
    /// covariant in their result.
    pub fn is_subtype(&self, dst: TypeId, src: TypeId) -> bool {
        if dst == src {
            return true;
        }
        // Unfilled nominal slots exist while a declaration is still under
        // construction; they relate to nothing.
        if dst.is_dummy() || src.is_dummy() {
            return false;
        }

        let (dk, sk) = (self.kind(dst), self.kind(src));

        // Structs and enums are the only nominal types.
        if matches!(dk, TypeKind::Struct { .. } | TypeKind::Enum { .. }) {
            return false;
        }

        match (dk, sk) {
            (
                TypeKind::BorrowedPtr {
                    pointee: dp,
                    addr_space: da,
                    ..
                },
                TypeKind::OwnedPtr {
                    pointee: sp,
                    addr_space: sa,
                },
            ) => {
                return da == sa && self.is_subtype(*dp, *sp);
            }
            (
                TypeKind::BorrowedPtr {
                    pointee: dp,
                    mutable: dm,
                    addr_space: da,
                },
                TypeKind::BorrowedPtr {
                    pointee: sp,
                    mutable: sm,
                    addr_space: sa,
                },
            ) => {
                // A mutable reference narrows to either mutability.
                return da == sa && (*sm || !*dm) && self.is_subtype(*dp, *sp);
            }
            (TypeKind::IndefiniteArray(de), TypeKind::DefiniteArray { elem: se, .. }) => {
                return self.is_subtype(*de, *se);
            }
            _ => {}
        }

        if !self.same_shape(dk, sk) {
            return false;
        }

        if let (TypeKind::Fn(dp), TypeKind::Fn(sp)) = (dk, sk) {
            let ret = self.return_type(dst);
            if !self.is_noret(ret) && !self.is_subtype(ret, self.return_type(src)) {
                return false;
            }
            // Contravariant in the parameter.
            return self.is_subtype(*sp, *dp);
        }

        self.ops(dst)
            .iter()
            .zip(self.ops(src))
            .all(|(&d, s)| self.is_subtype(d, s))
    }

    pub fn is_strict_subtype(&self, dst: TypeId, src: TypeId) -> bool {
        dst != src && self.is_subtype(dst, src)
    }

    /// Same variant, same arity, same non-operand attributes.
    fn same_shape(&self, a: &TypeKind, b: &TypeKind) -> bool {
        match (a, b) {
            (TypeKind::Prim(x), TypeKind::Prim(y)) => x == y,
            (TypeKind::Tuple(x), TypeKind::Tuple(y)) => x.len() == y.len(),
            (TypeKind::Fn(_), TypeKind::Fn(_)) => true,
            (TypeKind::DefiniteArray { dim: x, .. }, TypeKind::DefiniteArray { dim: y, .. }) => {
                x == y
            }
            (TypeKind::IndefiniteArray(_), TypeKind::IndefiniteArray(_)) => true,
            (TypeKind::Simd { dim: x, .. }, TypeKind::Simd { dim: y, .. }) => x == y,
            (
                TypeKind::BorrowedPtr {
                    mutable: mx,
                    addr_space: ax,
                    ..
                },
                TypeKind::BorrowedPtr {
                    mutable: my,
                    addr_space: ay,
                    ..
                },
            )
            | (
                TypeKind::Ref {
                    mutable: mx,
                    addr_space: ax,
                    ..
                },
                TypeKind::Ref {
                    mutable: my,
                    addr_space: ay,
                    ..
                },
            ) => mx == my && ax == ay,
            (TypeKind::OwnedPtr { addr_space: x, .. }, TypeKind::OwnedPtr { addr_space: y, .. }) => {
                x == y
            }
            (TypeKind::Var(x), TypeKind::Var(y)) => x == y,
            (TypeKind::Lambda { .. }, TypeKind::Lambda { .. }) => true,
            (TypeKind::App { .. }, TypeKind::App { .. }) => true,
            (TypeKind::InferError { .. }, TypeKind::InferError { .. }) => true,
            // Unknowns, absorbing elements, and nominals: identity only.
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Reduction and rebuilding
    // ------------------------------------------------------------------

    /// Type-level application. When the callee is a lambda the result is
    /// the beta-reduced body; either way the result is cached on the
    /// interned application node.
    pub fn app(&mut self, callee: TypeId, arg: TypeId) -> TypeId {
        let app = self.unify(TypeKind::App { callee, arg });
        if let Some(&cached) = self.app_cache.get(&app) {
            return cached;
        }
        let result = match self.kind(callee) {
            TypeKind::Lambda { body, .. } => {
                let body = *body;
                let mut memo = FxHashMap::default();
                self.reduce(body, 0, arg, &mut memo)
            }
            _ => app,
        };
        self.app_cache.insert(app, result);
        result
    }

    /// Substitute `repl` for `Var(depth)` in `t`, decrementing deeper free
    /// variables. `memo` carries in-progress nominal copies so that cycles
    /// through recursive struct/enum operands terminate and sharing is
    /// preserved.
    pub fn reduce(
        &mut self,
        t: TypeId,
        depth: u32,
        repl: TypeId,
        memo: &mut FxHashMap<TypeId, TypeId>,
    ) -> TypeId {
        if t.is_dummy() {
            return t;
        }
        if let Some(&done) = memo.get(&t) {
            return done;
        }
        match self.kind(t).clone() {
            TypeKind::Var(d) => {
                if d == depth {
                    repl
                } else if d > depth {
                    // Free variable: one binder was eliminated below it.
                    self.var(d - 1)
                } else {
                    t
                }
            }
            TypeKind::Lambda { body, name } => {
                let body = self.reduce(body, depth + 1, repl, memo);
                self.lambda(body, name)
            }
            TypeKind::Struct { decl, name, fields } => {
                let copy = self.fresh_nominal(TypeKind::Struct {
                    decl,
                    name,
                    fields: vec![TypeId::DUMMY; fields.len()],
                });
                memo.insert(t, copy);
                for (i, &f) in fields.iter().enumerate() {
                    let r = self.reduce(f, depth, repl, memo);
                    self.set_nominal_op(copy, i, r);
                }
                copy
            }
            TypeKind::Enum {
                decl,
                name,
                variants,
            } => {
                let copy = self.fresh_nominal(TypeKind::Enum {
                    decl,
                    name,
                    variants: vec![TypeId::DUMMY; variants.len()],
                });
                memo.insert(t, copy);
                for (i, &v) in variants.iter().enumerate() {
                    let r = self.reduce(v, depth, repl, memo);
                    self.set_nominal_op(copy, i, r);
                }
                copy
            }
            kind => {
                let ops = self.ops(t);
                if ops.is_empty() {
                    return t;
                }
                let new: Vec<TypeId> = ops
                    .iter()
                    .map(|&o| self.reduce(o, depth, repl, memo))
                    .collect();
                if new == ops {
                    t
                } else {
                    self.rebuild_with(&kind, &new)
                }
            }
        }
    }

    /// Reconstruct a node of the given shape over new operands.
    fn rebuild_with(&mut self, kind: &TypeKind, ops: &[TypeId]) -> TypeId {
        match kind {
            TypeKind::Prim(tag) => self.prim_type(*tag),
            TypeKind::Tuple(_) => self.tuple_type(ops.to_vec()),
            TypeKind::Fn(_) => self.fn_type(ops[0]),
            TypeKind::DefiniteArray { dim, .. } => self.definite_array_type(ops[0], *dim),
            TypeKind::IndefiniteArray(_) => self.indefinite_array_type(ops[0]),
            TypeKind::Simd { dim, .. } => self.simd_type(ops[0], *dim),
            TypeKind::BorrowedPtr {
                mutable,
                addr_space,
                ..
            } => self.borrowed_ptr_type(ops[0], *mutable, *addr_space),
            TypeKind::OwnedPtr { addr_space, .. } => self.owned_ptr_type(ops[0], *addr_space),
            TypeKind::Ref {
                mutable,
                addr_space,
                ..
            } => self.ref_type(ops[0], *mutable, *addr_space),
            TypeKind::Var(d) => self.var(*d),
            TypeKind::Lambda { name, .. } => self.lambda(ops[0], *name),
            TypeKind::App { .. } => self.app(ops[0], ops[1]),
            TypeKind::InferError { .. } => self.infer_error(ops[0], ops[1]),
            TypeKind::Struct { .. }
            | TypeKind::Enum { .. }
            | TypeKind::Unknown(_)
            | TypeKind::NoRet
            | TypeKind::Error => unreachable!("rebuild_with on {kind:?}"),
        }
    }

    /// Rebuild a term of another table into this one. Nominals re-intern by
    /// declaration (keeping whatever operands this table already has for
    /// them); unknowns are re-allocated fresh; absorbing elements map to
    /// this table's singletons.
    pub fn import(&mut self, from: &TypeTable, t: TypeId) -> TypeId {
        let mut memo = FxHashMap::default();
        self.import_rec(from, t, &mut memo)
    }

    fn import_rec(
        &mut self,
        from: &TypeTable,
        t: TypeId,
        memo: &mut FxHashMap<TypeId, TypeId>,
    ) -> TypeId {
        if t.is_dummy() {
            return t;
        }
        if let Some(&done) = memo.get(&t) {
            return done;
        }
        let result = match from.kind(t).clone() {
            TypeKind::Struct { decl, name, fields } => {
                let known = self.nominals.contains_key(&decl);
                let copy = self.struct_type(decl, name, fields.len());
                memo.insert(t, copy);
                if !known {
                    for (i, &f) in fields.iter().enumerate() {
                        let r = self.import_rec(from, f, memo);
                        self.set_nominal_op(copy, i, r);
                    }
                }
                copy
            }
            TypeKind::Enum {
                decl,
                name,
                variants,
            } => {
                let known = self.nominals.contains_key(&decl);
                let copy = self.enum_type(decl, name, variants.len());
                memo.insert(t, copy);
                if !known {
                    for (i, &v) in variants.iter().enumerate() {
                        let r = self.import_rec(from, v, memo);
                        self.set_nominal_op(copy, i, r);
                    }
                }
                copy
            }
            TypeKind::Unknown(_) => self.unknown_type(),
            TypeKind::NoRet => self.noret,
            TypeKind::Error => self.error,
            kind => {
                let new: Vec<TypeId> = from
                    .ops(t)
                    .iter()
                    .map(|&o| self.import_rec(from, o, memo))
                    .collect();
                match kind {
                    TypeKind::Prim(tag) => self.prim_type(tag),
                    TypeKind::Var(d) => self.var(d),
                    _ => self.rebuild_with(&kind, &new),
                }
            }
        };
        memo.insert(t, result);
        result
    }

    /// Smallest number of enclosing binders under which `t` has no free
    /// variables; 0 means `t` is closed.
    pub fn free_var_bound(&self, t: TypeId) -> u32 {
        let mut visiting = FxHashSet::default();
        self.free_depth(t, 0, &mut visiting)
    }

    fn free_depth(&self, t: TypeId, binders: u32, visiting: &mut FxHashSet<TypeId>) -> u32 {
        if t.is_dummy() {
            return 0;
        }
        match self.kind(t) {
            TypeKind::Var(d) => {
                if *d >= binders {
                    d - binders + 1
                } else {
                    0
                }
            }
            TypeKind::Lambda { body, .. } => self.free_depth(*body, binders + 1, visiting),
            TypeKind::Struct { .. } | TypeKind::Enum { .. } => {
                if !visiting.insert(t) {
                    return 0;
                }
                self.ops(t)
                    .iter()
                    .map(|&o| self.free_depth(o, binders, visiting))
                    .max()
                    .unwrap_or(0)
            }
            _ => self
                .ops(t)
                .iter()
                .map(|&o| self.free_depth(o, binders, visiting))
                .max()
                .unwrap_or(0),
        }
    }

    /// Render `t` for diagnostics.
    pub fn display(&self, t: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, ty: t }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed display adapter; see [`TypeTable::display`].
pub struct TypeDisplay<'a> {
    table: &'a TypeTable,
    ty: TypeId,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.table;
        if self.ty.is_dummy() {
            return write!(f, "<unset>");
        }
        match t.kind(self.ty) {
            TypeKind::Prim(tag) => write!(f, "{}", tag.name()),
            TypeKind::Tuple(ts) => {
                write!(f, "(")?;
                for (i, &e) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t.display(e))?;
                }
                write!(f, ")")
            }
            TypeKind::Fn(_) => {
                let n = t.num_params(self.ty);
                let returning = t.is_returning(self.ty);
                let shown = if returning { n - 1 } else { n };
                write!(f, "fn(")?;
                for i in 0..shown {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t.display(t.param_at(self.ty, i)))?;
                }
                write!(f, ")")?;
                let ret = t.return_type(self.ty);
                if !t.is_noret(ret) {
                    write!(f, " -> {}", t.display(ret))?;
                }
                Ok(())
            }
            TypeKind::Struct { name, .. } | TypeKind::Enum { name, .. } => write!(f, "{name}"),
            TypeKind::DefiniteArray { elem, dim } => {
                write!(f, "[{} * {dim}]", t.display(*elem))
            }
            TypeKind::IndefiniteArray(elem) => write!(f, "[{}]", t.display(*elem)),
            TypeKind::Simd { elem, dim } => write!(f, "simd[{} * {dim}]", t.display(*elem)),
            TypeKind::BorrowedPtr {
                pointee,
                mutable,
                addr_space,
            } => {
                write!(f, "&")?;
                if *addr_space != 0 {
                    write!(f, "[{addr_space}]")?;
                }
                if *mutable {
                    write!(f, "mut ")?;
                }
                write!(f, "{}", t.display(*pointee))
            }
            TypeKind::OwnedPtr {
                pointee,
                addr_space,
            } => {
                write!(f, "~")?;
                if *addr_space != 0 {
                    write!(f, "[{addr_space}]")?;
                }
                write!(f, "{}", t.display(*pointee))
            }
            TypeKind::Ref {
                pointee, mutable, ..
            } => {
                write!(f, "ref ")?;
                if *mutable {
                    write!(f, "mut ")?;
                }
                write!(f, "{}", t.display(*pointee))
            }
            TypeKind::Var(d) => write!(f, "<{d}>"),
            TypeKind::Lambda { body, name } => write!(f, "[{name}].{}", t.display(*body)),
            TypeKind::App { callee, arg } => {
                write!(f, "{}[{}]", t.display(*callee), t.display(*arg))
            }
            TypeKind::Unknown(n) => write!(f, "?{n}"),
            TypeKind::InferError { dst, src } => {
                write!(f, "<infer error: {}, {}>", t.display(*dst), t.display(*src))
            }
            TypeKind::NoRet => write!(f, "<no-return>"),
            TypeKind::Error => write!(f, "<type error>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn tag(n: u8) -> PrimTy {
        match n % 12 {
            0 => PrimTy::I8,
            1 => PrimTy::I16,
            2 => PrimTy::I32,
            3 => PrimTy::I64,
            4 => PrimTy::U8,
            5 => PrimTy::U16,
            6 => PrimTy::U32,
            7 => PrimTy::U64,
            8 => PrimTy::F16,
            9 => PrimTy::F32,
            10 => PrimTy::F64,
            _ => PrimTy::Bool,
        }
    }

    #[test]
    fn prim_types_are_canonical() {
        let mut t = TypeTable::new();
        assert_eq!(t.prim_type(PrimTy::I32), t.prim_type(PrimTy::I32));
        assert_ne!(t.prim_type(PrimTy::I32), t.prim_type(PrimTy::U32));
    }

    #[test]
    fn structural_interning_is_canonical() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let boolt = t.prim_type(PrimTy::Bool);
        let a = t.tuple_type(vec![i32t, boolt]);
        let b = t.tuple_type(vec![i32t, boolt]);
        let c = t.tuple_type(vec![boolt, i32t]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let fa = t.fn_type(a);
        let fb = t.fn_type(b);
        assert_eq!(fa, fb);
    }

    #[quickcheck]
    fn interned_tuples_are_canonical(tags: Vec<u8>) -> bool {
        let mut t = TypeTable::new();
        let elems: Vec<TypeId> = tags.iter().map(|&n| t.prim_type(tag(n))).collect();
        t.tuple_type(elems.clone()) == t.tuple_type(elems)
    }

    #[quickcheck]
    fn subtype_is_reflexive_on_prims_and_tuples(tags: Vec<u8>) -> bool {
        let mut t = TypeTable::new();
        let elems: Vec<TypeId> = tags.iter().map(|&n| t.prim_type(tag(n))).collect();
        let tup = t.tuple_type(elems);
        t.is_subtype(tup, tup)
    }

    #[test]
    fn unit_is_the_empty_tuple() {
        let mut t = TypeTable::new();
        assert_eq!(t.tuple_type(vec![]), t.unit());
        assert!(t.is_unit(t.unit()));
    }

    #[test]
    fn unknowns_are_never_merged() {
        let mut t = TypeTable::new();
        let a = t.unknown_type();
        let b = t.unknown_type();
        assert_ne!(a, b);
        assert!(t.is_unknown(a));
        assert!(!t.is_subtype(a, b));
        assert!(t.is_subtype(a, a));
    }

    #[test]
    fn infer_error_reuses_existing_marker() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let boolt = t.prim_type(PrimTy::Bool);
        let e = t.infer_error(i32t, boolt);
        assert_eq!(t.infer_error(e, boolt), e);
        assert_eq!(t.infer_error(i32t, e), e);
        assert!(t.is_error(e));
    }

    #[test]
    fn nominal_identity_is_per_declaration() {
        let mut t = TypeTable::new();
        let name = Symbol::intern("Pair");
        let s1 = t.struct_type(DefId(1), name, 2);
        let s1_again = t.struct_type(DefId(1), name, 2);
        let s2 = t.struct_type(DefId(2), name, 2);
        assert_eq!(s1, s1_again);
        assert_ne!(s1, s2);

        let i32t = t.prim_type(PrimTy::I32);
        t.set_nominal_op(s1, 0, i32t);
        t.set_nominal_op(s1, 1, i32t);
        t.set_nominal_op(s2, 0, i32t);
        t.set_nominal_op(s2, 1, i32t);
        // Same field types, still different declarations.
        assert_ne!(s1, s2);
        assert!(!t.is_subtype(s1, s2));
        assert!(t.is_subtype(s1, s1));
    }

    #[test]
    fn app_on_lambda_beta_reduces() {
        let mut t = TypeTable::new();
        let v0 = t.var(0);
        let i32t = t.prim_type(PrimTy::I32);
        // [T].fn((T, fn(T)))
        let cont = t.fn_type(v0);
        let param = t.tuple_type(vec![v0, cont]);
        let fnty = t.fn_type(param);
        let poly = t.lambda(fnty, Symbol::intern("T"));

        let inst = t.app(poly, i32t);
        let cont_i32 = t.fn_type(i32t);
        let param_i32 = t.tuple_type(vec![i32t, cont_i32]);
        let expected = t.fn_type(param_i32);
        assert_eq!(inst, expected);

        // The reduction is cached on the interned application node.
        assert_eq!(t.app(poly, i32t), inst);
    }

    #[test]
    fn app_reduction_matches_manual_substitution() {
        let mut t = TypeTable::new();
        let v0 = t.var(0);
        let body = t.tuple_type(vec![v0, v0]);
        let lam = t.lambda(body, Symbol::intern("T"));
        let boolt = t.prim_type(PrimTy::Bool);

        let via_app = t.app(lam, boolt);
        let mut memo = FxHashMap::default();
        let via_reduce = t.reduce(body, 0, boolt, &mut memo);
        assert_eq!(via_app, via_reduce);

        // Reducing an already closed term changes nothing.
        let mut memo = FxHashMap::default();
        assert_eq!(t.reduce(via_app, 0, boolt, &mut memo), via_app);
    }

    #[test]
    fn reduce_decrements_free_variables() {
        let mut t = TypeTable::new();
        let v1 = t.var(1);
        let i32t = t.prim_type(PrimTy::I32);
        let mut memo = FxHashMap::default();
        let reduced = t.reduce(v1, 0, i32t, &mut memo);
        assert_eq!(reduced, t.var(0));

        // Bound under an inner lambda, the same variable is untouched.
        let v0 = t.var(0);
        let lam = t.lambda(v0, Symbol::intern("U"));
        let mut memo = FxHashMap::default();
        assert_eq!(t.reduce(lam, 0, i32t, &mut memo), lam);
    }

    #[test]
    fn nested_lambdas_substitute_outermost_first() {
        let mut t = TypeTable::new();
        // [T].[U].(T, U) with T = Var(1), U = Var(0) inside the body.
        let v0 = t.var(0);
        let v1 = t.var(1);
        let body = t.tuple_type(vec![v1, v0]);
        let inner = t.lambda(body, Symbol::intern("U"));
        let poly = t.lambda(inner, Symbol::intern("T"));

        let i32t = t.prim_type(PrimTy::I32);
        let boolt = t.prim_type(PrimTy::Bool);
        let step1 = t.app(poly, i32t);
        let step2 = t.app(step1, boolt);
        assert_eq!(step2, t.tuple_type(vec![i32t, boolt]));
    }

    #[test]
    fn reduce_through_recursive_struct_terminates() {
        let mut t = TypeTable::new();
        // struct List[T] { head: T, tail: List[T] }
        let decl = DefId(7);
        let name = Symbol::intern("List");
        let list = t.struct_type(decl, name, 2);
        let v0 = t.var(0);
        t.set_nominal_op(list, 0, v0);
        t.set_nominal_op(list, 1, list);

        let i32t = t.prim_type(PrimTy::I32);
        let mut memo = FxHashMap::default();
        let mono = t.reduce(list, 0, i32t, &mut memo);

        assert_ne!(mono, list);
        let TypeKind::Struct { decl: d, fields, .. } = t.kind(mono) else {
            panic!("expected struct, got {:?}", t.kind(mono));
        };
        assert_eq!(*d, decl);
        assert_eq!(fields[0], i32t);
        // The recursive operand points back at the copy, not the original.
        assert_eq!(fields[1], mono);
    }

    #[test]
    fn indefinite_array_accepts_definite_array() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let def = t.definite_array_type(i32t, 4);
        let indef = t.indefinite_array_type(i32t);
        assert!(t.is_subtype(indef, def));
        assert!(!t.is_subtype(def, indef));

        let def8 = t.definite_array_type(i32t, 8);
        assert!(!t.is_subtype(def, def8));
    }

    #[test]
    fn borrowed_ptr_narrowing() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let sh = t.borrowed_ptr_type(i32t, false, 0);
        let mu = t.borrowed_ptr_type(i32t, true, 0);
        // &mut flows where & is expected, never the reverse.
        assert!(t.is_subtype(sh, mu));
        assert!(!t.is_subtype(mu, sh));

        let owned = t.owned_ptr_type(i32t, 0);
        assert!(t.is_subtype(sh, owned));
        assert!(t.is_subtype(mu, owned));

        let other_space = t.borrowed_ptr_type(i32t, true, 1);
        assert!(!t.is_subtype(sh, other_space));
    }

    #[test]
    fn fn_subtyping_is_contravariant_in_params() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let sh = t.borrowed_ptr_type(i32t, false, 0);
        let mu = t.borrowed_ptr_type(i32t, true, 0);

        // Continuations (non-returning): fn(&i32) accepts fn(&mut i32)?
        // Parameter contravariance: dst=fn(&mut), src=fn(&) - the source
        // accepts more, so it can stand in.
        let fn_sh = t.fn_type(sh);
        let fn_mu = t.fn_type(mu);
        assert!(t.is_subtype(fn_mu, fn_sh));
        assert!(!t.is_subtype(fn_sh, fn_mu));
    }

    #[test]
    fn subtype_transitivity_sample() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let mu = t.borrowed_ptr_type(i32t, true, 0);
        let sh = t.borrowed_ptr_type(i32t, false, 0);
        let owned = t.owned_ptr_type(i32t, 0);
        // sh ⊒ mu and mu-accepting positions accept owned as well.
        assert!(t.is_subtype(sh, mu));
        assert!(t.is_subtype(mu, owned));
        assert!(t.is_subtype(sh, owned));
    }

    #[test]
    fn return_type_arity_rules() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let boolt = t.prim_type(PrimTy::Bool);

        // fn(i32) with no continuation: non-returning.
        let param = t.tuple_type(vec![i32t]);
        let f = t.fn_type(param);
        assert!(!t.is_returning(f));
        assert!(t.is_noret(t.return_type(f)));

        // Continuation of arity 0 -> unit.
        let cont0 = t.fn_type_args(vec![]);
        let p0 = t.tuple_type(vec![i32t, cont0]);
        let f0 = t.fn_type(p0);
        assert!(t.is_returning(f0));
        assert!(t.is_unit(t.return_type(f0)));

        // Continuation parameter that is a single type -> that type.
        let cont1 = t.fn_type(boolt);
        let p1 = t.tuple_type(vec![i32t, cont1]);
        let f1 = t.fn_type(p1);
        assert!(t.is_returning(f1));
        assert_eq!(t.return_type(f1), boolt);

        // Continuation over a pair -> the tuple.
        let pair = t.tuple_type(vec![i32t, boolt]);
        let cont2 = t.fn_type(pair);
        let p2 = t.tuple_type(vec![i32t, cont2]);
        let f2 = t.fn_type(p2);
        assert_eq!(t.return_type(f2), pair);
    }

    #[test]
    fn free_var_bound_sees_through_lambdas() {
        let mut t = TypeTable::new();
        let v0 = t.var(0);
        let v2 = t.var(2);
        assert_eq!(t.free_var_bound(v0), 1);
        assert_eq!(t.free_var_bound(v2), 3);

        let lam = t.lambda(v0, Symbol::intern("T"));
        assert_eq!(t.free_var_bound(lam), 0);

        let i32t = t.prim_type(PrimTy::I32);
        assert_eq!(t.free_var_bound(i32t), 0);

        let tup = t.tuple_type(vec![v0, i32t]);
        assert_eq!(t.free_var_bound(tup), 1);
    }

    #[test]
    fn import_rebuilds_into_another_table() {
        let mut a = TypeTable::new();
        let i32t = a.prim_type(PrimTy::I32);
        let arr = a.definite_array_type(i32t, 3);
        let tup = a.tuple_type(vec![arr, i32t]);
        let f = a.fn_type(tup);

        let mut b = TypeTable::new();
        let imported = b.import(&a, f);
        let i32b = b.prim_type(PrimTy::I32);
        let arrb = b.definite_array_type(i32b, 3);
        let tupb = b.tuple_type(vec![arrb, i32b]);
        assert_eq!(imported, b.fn_type(tupb));
    }

    #[test]
    fn import_preserves_recursive_nominals() {
        let mut a = TypeTable::new();
        let decl = DefId(3);
        let name = Symbol::intern("Node");
        let node = a.struct_type(decl, name, 1);
        a.set_nominal_op(node, 0, node);

        let mut b = TypeTable::new();
        let imported = b.import(&a, node);
        let TypeKind::Struct { decl: d, fields, .. } = b.kind(imported) else {
            panic!("expected struct");
        };
        assert_eq!(*d, decl);
        assert_eq!(fields[0], imported);
        // Importing again hits the canonical nominal.
        assert_eq!(b.import(&a, node), imported);
    }

    #[test]
    fn display_formats() {
        let mut t = TypeTable::new();
        let i32t = t.prim_type(PrimTy::I32);
        let boolt = t.prim_type(PrimTy::Bool);
        assert_eq!(t.display(i32t).to_string(), "i32");
        assert_eq!(t.display(t.unit()).to_string(), "()");
        assert_eq!(t.display(t.type_noret()).to_string(), "<no-return>");
        assert_eq!(t.display(t.type_error()).to_string(), "<type error>");

        let mu = t.borrowed_ptr_type(i32t, true, 0);
        assert_eq!(t.display(mu).to_string(), "&mut i32");

        let arr = t.definite_array_type(i32t, 4);
        assert_eq!(t.display(arr).to_string(), "[i32 * 4]");

        let cont = t.fn_type(boolt);
        let param = t.tuple_type(vec![i32t, cont]);
        let f = t.fn_type(param);
        assert_eq!(t.display(f).to_string(), "fn(i32) -> bool");

        let noret_fn = t.fn_type_args(vec![i32t]);
        assert_eq!(t.display(noret_fn).to_string(), "fn(i32)");
    }
}
