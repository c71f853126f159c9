//! Trait declarations, instances, and recorded implementations.
//!
//! A trait binds type variables, references super-traits, and carries
//! method signatures whose receiver is operand 0. A [`TraitInstanceId`]
//! pairs a trait with a concrete argument vector of matching arity and is
//! canonical per component-wise-equal pair. Bound satisfaction is a
//! presence check over the recorded impls; coherence is not this layer's
//! concern.

use impalac_util::{define_idx, DefId, FxHashMap, IndexVec, Symbol, TypeId};
use indexmap::IndexMap;
use thiserror::Error;

use crate::ty::TypeTable;

define_idx!(TraitId);
define_idx!(TraitInstanceId);

/// Misuse of the registry surfaced to the checker as diagnostics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraitError {
    /// Method signatures must be closed under the trait's bound variables.
    #[error("method `{0}` must have a closed signature")]
    OpenMethodSignature(Symbol),
    #[error("trait `{name}` expects {expected} type argument(s), found {found}")]
    InstanceArity {
        name: Symbol,
        expected: usize,
        found: usize,
    },
    /// Bound variables are fixed once the trait has been instantiated.
    #[error("cannot bind a type variable on `{0}` after it has been instantiated")]
    LateBoundVar(Symbol),
}

/// A method signature; `fn_type`'s operand 0 is the receiver.
#[derive(Debug, Clone, Copy)]
pub struct TraitMethod {
    pub name: Symbol,
    pub fn_type: TypeId,
    pub def: DefId,
}

#[derive(Debug)]
struct TraitDef {
    decl: DefId,
    name: Symbol,
    supers: Vec<TraitId>,
    bound_vars: Vec<TypeId>,
    methods: Vec<TraitMethod>,
    instantiated: bool,
}

#[derive(Debug)]
struct TraitInstance {
    trait_id: TraitId,
    args: Vec<TypeId>,
}

/// The registry of traits for one compilation unit.
pub struct TraitRegistry {
    traits: IndexVec<TraitId, TraitDef>,
    instances: IndexVec<TraitInstanceId, TraitInstance>,
    instance_map: FxHashMap<(TraitId, Vec<TypeId>), TraitInstanceId>,
    /// Recorded impls: argument vectors per trait, in declaration order.
    impls: IndexMap<TraitId, Vec<Vec<TypeId>>>,
    error_instance: TraitInstanceId,
}

impl TraitRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            traits: IndexVec::new(),
            instances: IndexVec::new(),
            instance_map: FxHashMap::default(),
            impls: IndexMap::new(),
            error_instance: TraitInstanceId(0),
        };
        // The distinguished error instance backing failed conversions.
        let err = registry.declare(DefId::DUMMY, Symbol::intern("<error trait>"), Vec::new());
        registry.error_instance = match registry.instantiate(err, Vec::new()) {
            Ok(inst) => inst,
            Err(_) => unreachable!("error trait takes no arguments"),
        };
        registry
    }

    /// Register a trait for its declaration site.
    pub fn declare(&mut self, decl: DefId, name: Symbol, supers: Vec<TraitId>) -> TraitId {
        self.traits.push(TraitDef {
            decl,
            name,
            supers,
            bound_vars: Vec::new(),
            methods: Vec::new(),
            instantiated: false,
        })
    }

    pub fn name(&self, t: TraitId) -> Symbol {
        self.traits[t].name
    }

    pub fn decl(&self, t: TraitId) -> DefId {
        self.traits[t].decl
    }

    pub fn supers(&self, t: TraitId) -> &[TraitId] {
        &self.traits[t].supers
    }

    pub fn set_supers(&mut self, t: TraitId, supers: Vec<TraitId>) {
        self.traits[t].supers = supers;
    }

    pub fn num_bound_vars(&self, t: TraitId) -> usize {
        self.traits[t].bound_vars.len()
    }

    /// Register the next bound type variable, in declaration order.
    pub fn add_bound_var(&mut self, t: TraitId, var: TypeId) -> Result<(), TraitError> {
        let def = &mut self.traits[t];
        if def.instantiated {
            return Err(TraitError::LateBoundVar(def.name));
        }
        def.bound_vars.push(var);
        Ok(())
    }

    /// Attach a method signature. The signature must be closed: its only
    /// free variables are the trait's bound variables.
    pub fn add_method(
        &mut self,
        t: TraitId,
        name: Symbol,
        fn_type: TypeId,
        def: DefId,
        types: &TypeTable,
    ) -> Result<(), TraitError> {
        let binders = self.traits[t].bound_vars.len() as u32;
        if types.free_var_bound(fn_type) > binders {
            return Err(TraitError::OpenMethodSignature(name));
        }
        self.traits[t].methods.push(TraitMethod { name, fn_type, def });
        Ok(())
    }

    pub fn methods(&self, t: TraitId) -> &[TraitMethod] {
        &self.traits[t].methods
    }

    pub fn find_method(&self, t: TraitId, name: Symbol) -> Option<&TraitMethod> {
        self.traits[t].methods.iter().find(|m| m.name == name)
    }

    /// The canonical instance of `t` over `args`.
    pub fn instantiate(
        &mut self,
        t: TraitId,
        args: Vec<TypeId>,
    ) -> Result<TraitInstanceId, TraitError> {
        let def = &mut self.traits[t];
        if args.len() != def.bound_vars.len() {
            return Err(TraitError::InstanceArity {
                name: def.name,
                expected: def.bound_vars.len(),
                found: args.len(),
            });
        }
        def.instantiated = true;
        if let Some(&inst) = self.instance_map.get(&(t, args.clone())) {
            return Ok(inst);
        }
        let inst = self.instances.push(TraitInstance {
            trait_id: t,
            args: args.clone(),
        });
        self.instance_map.insert((t, args), inst);
        Ok(inst)
    }

    /// The distinguished instance standing in for failed conversions.
    pub fn error_instance(&self) -> TraitInstanceId {
        self.error_instance
    }

    pub fn is_error_instance(&self, inst: TraitInstanceId) -> bool {
        inst == self.error_instance
    }

    pub fn instance_trait(&self, inst: TraitInstanceId) -> TraitId {
        self.instances[inst].trait_id
    }

    pub fn instance_args(&self, inst: TraitInstanceId) -> &[TypeId] {
        &self.instances[inst].args
    }

    /// Record an `impl Trait[Args]`.
    pub fn record_impl(&mut self, t: TraitId, args: Vec<TypeId>) {
        self.impls.entry(t).or_default().push(args);
    }

    /// Bound satisfaction: some recorded impl of the instance's trait has
    /// argument types that unify with the instance's.
    pub fn has_impl(&self, inst: TraitInstanceId, types: &TypeTable) -> bool {
        let instance = &self.instances[inst];
        let Some(recorded) = self.impls.get(&instance.trait_id) else {
            return false;
        };
        recorded.iter().any(|args| {
            args.len() == instance.args.len()
                && args
                    .iter()
                    .zip(&instance.args)
                    .all(|(&a, &b)| types.matches(a, b))
        })
    }

    /// A method signature of the instance's trait with the instance's
    /// arguments substituted for the trait's bound variables.
    pub fn method_type(
        &self,
        inst: TraitInstanceId,
        name: Symbol,
        types: &mut TypeTable,
    ) -> Option<TypeId> {
        let instance = &self.instances[inst];
        let def = &self.traits[instance.trait_id];
        let method = def.methods.iter().find(|m| m.name == name)?;
        let k = def.bound_vars.len();
        let args = instance.args.clone();
        let mut ty = method.fn_type;
        // Parameter i is Var(k-1-i); substitute deepest-first so the
        // remaining variables keep their depths.
        for (i, &arg) in args.iter().enumerate() {
            let mut memo = FxHashMap::default();
            ty = types.reduce(ty, (k - 1 - i) as u32, arg, &mut memo);
        }
        Some(ty)
    }
}

impl Default for TraitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::PrimTy;

    fn setup() -> (TypeTable, TraitRegistry) {
        (TypeTable::new(), TraitRegistry::new())
    }

    #[test]
    fn declare_and_instantiate() {
        let (mut types, mut traits) = setup();
        let eq = traits.declare(DefId(1), Symbol::intern("Eq"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(eq, v0).unwrap();

        let i32t = types.prim_type(PrimTy::I32);
        let a = traits.instantiate(eq, vec![i32t]).unwrap();
        let b = traits.instantiate(eq, vec![i32t]).unwrap();
        assert_eq!(a, b);

        let boolt = types.prim_type(PrimTy::Bool);
        let c = traits.instantiate(eq, vec![boolt]).unwrap();
        assert_ne!(a, c);
        assert_eq!(traits.instance_trait(a), eq);
        assert_eq!(traits.instance_args(a), &[i32t]);
    }

    #[test]
    fn instantiate_arity_mismatch() {
        let (mut types, mut traits) = setup();
        let ord = traits.declare(DefId(2), Symbol::intern("Ord"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(ord, v0).unwrap();

        let i32t = types.prim_type(PrimTy::I32);
        let err = traits.instantiate(ord, vec![i32t, i32t]);
        assert_eq!(
            err,
            Err(TraitError::InstanceArity {
                name: Symbol::intern("Ord"),
                expected: 1,
                found: 2,
            })
        );
    }

    #[test]
    fn bound_vars_frozen_after_instantiation() {
        let (mut types, mut traits) = setup();
        let tr = traits.declare(DefId(3), Symbol::intern("Frozen"), Vec::new());
        traits.instantiate(tr, vec![]).unwrap();
        let v0 = types.var(0);
        assert_eq!(
            traits.add_bound_var(tr, v0),
            Err(TraitError::LateBoundVar(Symbol::intern("Frozen")))
        );
    }

    #[test]
    fn open_method_signatures_are_rejected() {
        let (mut types, mut traits) = setup();
        let tr = traits.declare(DefId(4), Symbol::intern("Show"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(tr, v0).unwrap();

        // fn(T): closed under one bound variable.
        let ok_sig = types.fn_type_args(vec![v0]);
        assert!(traits
            .add_method(tr, Symbol::intern("show"), ok_sig, DefId(40), &types)
            .is_ok());

        // fn(<1>): escapes the trait's single binder.
        let v1 = types.var(1);
        let bad_sig = types.fn_type_args(vec![v1]);
        assert_eq!(
            traits.add_method(tr, Symbol::intern("leak"), bad_sig, DefId(41), &types),
            Err(TraitError::OpenMethodSignature(Symbol::intern("leak")))
        );

        assert!(traits.find_method(tr, Symbol::intern("show")).is_some());
        assert!(traits.find_method(tr, Symbol::intern("leak")).is_none());
    }

    #[test]
    fn impl_presence_check() {
        let (mut types, mut traits) = setup();
        let eq = traits.declare(DefId(5), Symbol::intern("Eq"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(eq, v0).unwrap();

        let i32t = types.prim_type(PrimTy::I32);
        let boolt = types.prim_type(PrimTy::Bool);
        let want_i32 = traits.instantiate(eq, vec![i32t]).unwrap();
        let want_bool = traits.instantiate(eq, vec![boolt]).unwrap();

        assert!(!traits.has_impl(want_i32, &types));
        traits.record_impl(eq, vec![i32t]);
        assert!(traits.has_impl(want_i32, &types));
        assert!(!traits.has_impl(want_bool, &types));
    }

    #[test]
    fn error_args_satisfy_any_impl() {
        let (mut types, mut traits) = setup();
        let eq = traits.declare(DefId(6), Symbol::intern("Eq"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(eq, v0).unwrap();

        let i32t = types.prim_type(PrimTy::I32);
        traits.record_impl(eq, vec![i32t]);

        let err = types.type_error();
        let want = traits.instantiate(eq, vec![err]).unwrap();
        assert!(traits.has_impl(want, &types));
    }

    #[test]
    fn method_type_substitutes_instance_args() {
        let (mut types, mut traits) = setup();
        let eq = traits.declare(DefId(7), Symbol::intern("Eq"), Vec::new());
        let v0 = types.var(0);
        traits.add_bound_var(eq, v0).unwrap();

        // fn(T, T, fn(bool)) - eq's signature with an explicit continuation.
        let boolt = types.prim_type(PrimTy::Bool);
        let cont = types.fn_type(boolt);
        let sig = types.fn_type_args(vec![v0, v0, cont]);
        traits
            .add_method(eq, Symbol::intern("eq"), sig, DefId(70), &types)
            .unwrap();

        let i32t = types.prim_type(PrimTy::I32);
        let inst = traits.instantiate(eq, vec![i32t]).unwrap();
        let got = traits
            .method_type(inst, Symbol::intern("eq"), &mut types)
            .unwrap();
        let expected = types.fn_type_args(vec![i32t, i32t, cont]);
        assert_eq!(got, expected);

        assert!(traits
            .method_type(inst, Symbol::intern("missing"), &mut types)
            .is_none());
    }

    #[test]
    fn error_instance_is_distinguished() {
        let (_, traits) = setup();
        let err = traits.error_instance();
        assert!(traits.is_error_instance(err));
    }
}
