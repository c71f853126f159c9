//! The type-checking walker.
//!
//! Checking runs over a module in phases: a head pass inserts every item
//! name (and creates nominal shells for structs and enums), a signature
//! pass computes item types, and a body pass checks function bodies. That
//! split is what lets items reference each other without forward
//! declarations.
//!
//! The checker owns the [`TypeTable`] and [`TraitRegistry`] for one
//! compilation unit, resolves names through a [`ScopeTable`], and records
//! every recoverable problem in the diagnostic [`Handler`] instead of
//! bailing out: malformed nodes get the error type, which absorbs through
//! every rule, so one mistake produces one diagnostic.
//!
//! Functions follow the continuation-passing convention: `fn f(p: T) -> R`
//! has parameter tuple `(T, fn(R))`, the trailing element being the return
//! continuation. `return` is an ordinary binding of the continuation's
//! type, so `return(x)` checks as a call of non-returning type.

use impalac_ast as ast;
use impalac_util::{
    DefId, DiagnosticBuilder, DiagnosticCode, FxHashMap, Handler, IndexVec, Span, Symbol,
};

use crate::scope::ScopeTable;
use crate::traits::{TraitId, TraitInstanceId, TraitRegistry};
use crate::ty::{PrimTy, TypeKind, TypeTable};
use impalac_util::TypeId;

/// What a declaration site declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Mod,
    ForeignMod,
    Struct,
    Enum,
    Typedef,
    Static,
    Fn,
    Trait,
    Impl,
    TypeParam,
    Param,
    Local,
}

/// Everything the checker records about a declaration.
#[derive(Debug)]
pub struct DefInfo {
    pub symbol: Symbol,
    pub span: Span,
    pub kind: DefKind,
    /// Value type for value declarations, the (possibly lambda-wrapped)
    /// nominal or alias type for type declarations.
    pub ty: Option<TypeId>,
    pub mutable: bool,
    /// For trait declarations.
    pub trait_id: Option<TraitId>,
    /// For impl blocks implementing a trait.
    pub impl_trait: Option<TraitInstanceId>,
    /// For type parameters: the attached trait bounds.
    pub bounds: Vec<TraitInstanceId>,
    /// For generic items: the type-parameter declarations in order.
    pub type_params: Vec<DefId>,
    /// For structs and enums: field/variant names in operand order.
    pub members: Vec<Symbol>,
}

impl DefInfo {
    fn new(symbol: Symbol, span: Span, kind: DefKind) -> Self {
        Self {
            symbol,
            span,
            kind,
            ty: None,
            mutable: false,
            trait_id: None,
            impl_trait: None,
            bounds: Vec::new(),
            type_params: Vec::new(),
            members: Vec::new(),
        }
    }
}

/// Check a module against a fresh type table and trait registry.
///
/// Returns `true` iff no error was recorded in `handler`.
pub fn check_module(module: &ast::Module, handler: &Handler) -> bool {
    let mut check = TypeCheck::new(handler);
    check.run(module)
}

/// The checker state for one compilation unit.
pub struct TypeCheck<'a> {
    pub types: TypeTable,
    pub traits: TraitRegistry,
    scopes: ScopeTable,
    defs: IndexVec<DefId, DefInfo>,
    handler: &'a Handler,
}

impl<'a> TypeCheck<'a> {
    pub fn new(handler: &'a Handler) -> Self {
        Self {
            types: TypeTable::new(),
            traits: TraitRegistry::new(),
            scopes: ScopeTable::new(),
            defs: IndexVec::new(),
            handler,
        }
    }

    /// Check `module`; `true` iff the unit is clean.
    pub fn run(&mut self, module: &ast::Module) -> bool {
        self.check_mod_contents(&module.contents);
        !self.handler.has_errors()
    }

    pub fn def(&self, id: DefId) -> &DefInfo {
        &self.defs[id]
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn error(&self, span: Span, code: DiagnosticCode, message: impl Into<String>) {
        DiagnosticBuilder::error(message)
            .code(code)
            .span(span)
            .emit(self.handler);
    }

    /// Report a mismatch and return the marker type for the offending node.
    fn type_mismatch(&mut self, span: Span, expected: TypeId, found: TypeId) -> TypeId {
        let msg = format!(
            "type mismatch: expected `{}`, found `{}`",
            self.types.display(expected),
            self.types.display(found)
        );
        self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
        self.types.infer_error(expected, found)
    }

    /// `found` may flow where `expected` is wanted; errors and unknowns
    /// absorb so one mistake is reported once.
    fn compatible(&self, expected: TypeId, found: TypeId) -> bool {
        self.types.is_error(expected)
            || self.types.is_error(found)
            || self.types.is_unknown(expected)
            || self.types.is_unknown(found)
            || self.types.is_subtype(expected, found)
    }

    fn alloc_def(&mut self, symbol: Symbol, span: Span, kind: DefKind) -> DefId {
        self.defs.push(DefInfo::new(symbol, span, kind))
    }

    fn in_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scopes.push_scope();
        let result = f(self);
        self.scopes.pop_scope();
        result
    }

    fn insert_decl(&mut self, name: Symbol, decl: DefId, span: Span) {
        if self.scopes.insert(name, decl).is_err() {
            let msg = format!("`{name}` is bound more than once in this scope");
            self.error(span, DiagnosticCode::E_SEMA_DUPLICATE_BINDING, msg);
        }
    }

    fn lookup_or_error(&mut self, span: Span, name: Symbol) -> Option<DefId> {
        match self.scopes.lookup(name) {
            Some(decl) => Some(decl),
            None => {
                let msg = format!("`{name}` is not declared in this scope");
                self.error(span, DiagnosticCode::E_SEMA_UNDECLARED, msg);
                None
            }
        }
    }

    /// Strip the l-value layer when a value is consumed.
    fn decay(&self, t: TypeId) -> TypeId {
        match self.types.kind(t) {
            TypeKind::Ref { pointee, .. } => *pointee,
            _ => t,
        }
    }

    fn wrap_lambdas(&mut self, ty: TypeId, params: &[ast::TypeParam]) -> TypeId {
        let mut ty = ty;
        for tp in params.iter().rev() {
            ty = self.types.lambda(ty, tp.name);
        }
        ty
    }

    fn strip_lambdas(&self, mut ty: TypeId) -> TypeId {
        while let TypeKind::Lambda { body, .. } = self.types.kind(ty) {
            ty = *body;
        }
        ty
    }

    /// Substitute `args` for the item's bound variables: parameter `i` of
    /// `k` is `Var(k-1-i)`, substituted deepest-first.
    fn substitute_args(&mut self, t: TypeId, k: usize, args: &[TypeId]) -> TypeId {
        let mut ty = t;
        for (i, &arg) in args.iter().enumerate() {
            let mut memo = FxHashMap::default();
            ty = self.types.reduce(ty, (k - 1 - i) as u32, arg, &mut memo);
        }
        ty
    }

    fn describe_instance(&self, inst: TraitInstanceId) -> String {
        let trait_id = self.traits.instance_trait(inst);
        let args = self.traits.instance_args(inst);
        let mut out = self.traits.name(trait_id).to_string();
        if !args.is_empty() {
            out.push('[');
            for (i, &a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&self.types.display(a).to_string());
            }
            out.push(']');
        }
        out
    }

    // ------------------------------------------------------------------
    // Type parameters and type expressions
    // ------------------------------------------------------------------

    /// Bind the type parameters of a generic item in the current scope.
    ///
    /// Two runs: every parameter gets its variable and scope entry first,
    /// then the bounds are converted, so bounds like `[A: T[B], B: T[A]]`
    /// resolve.
    fn check_type_params(&mut self, params: &[ast::TypeParam]) -> Vec<DefId> {
        let k = params.len();
        let mut out = Vec::with_capacity(k);
        for (i, tp) in params.iter().enumerate() {
            let var = self.types.var((k - 1 - i) as u32);
            let d = self.alloc_def(tp.name, tp.span, DefKind::TypeParam);
            self.defs[d].ty = Some(var);
            tp.def.set(Some(d));
            self.insert_decl(tp.name, d, tp.span);
            out.push(d);
        }
        for (tp, &d) in params.iter().zip(&out) {
            for bound in &tp.bounds {
                let inst = self.to_trait_instance(bound);
                self.defs[d].bounds.push(inst);
            }
        }
        out
    }

    /// Convert a type expression used as a trait bound. The error path
    /// yields the registry's distinguished error instance.
    fn to_trait_instance(&mut self, bound: &ast::AstType) -> TraitInstanceId {
        match &bound.kind {
            ast::AstTypeKind::App(app) => {
                let Some(decl) = self.lookup_or_error(bound.span, app.name) else {
                    return self.traits.error_instance();
                };
                app.decl.set(Some(decl));
                match (self.defs[decl].kind, self.defs[decl].trait_id) {
                    (DefKind::Trait, Some(trait_id)) => {
                        let args: Vec<TypeId> =
                            app.args.iter().map(|a| self.to_type(a)).collect();
                        match self.traits.instantiate(trait_id, args) {
                            Ok(inst) => inst,
                            Err(err) => {
                                self.error(
                                    bound.span,
                                    DiagnosticCode::E_SEMA_ARITY_MISMATCH,
                                    err.to_string(),
                                );
                                self.traits.error_instance()
                            }
                        }
                    }
                    _ => {
                        let msg = format!("`{}` is not a trait", app.name);
                        self.error(bound.span, DiagnosticCode::E_SEMA_MISPLACED_TRAIT, msg);
                        self.traits.error_instance()
                    }
                }
            }
            ast::AstTypeKind::Err => self.traits.error_instance(),
            _ => {
                self.error(
                    bound.span,
                    DiagnosticCode::E_SEMA_MISPLACED_TRAIT,
                    "bounds must be trait instances, not types",
                );
                self.traits.error_instance()
            }
        }
    }

    /// Convert a type expression to a semantic type, caching the result on
    /// the node.
    fn to_type(&mut self, ast_ty: &ast::AstType) -> TypeId {
        if let Some(t) = ast_ty.ty.get() {
            return t;
        }
        let t = self.to_type_uncached(ast_ty);
        ast_ty.ty.set(Some(t));
        t
    }

    fn to_type_uncached(&mut self, ast_ty: &ast::AstType) -> TypeId {
        match &ast_ty.kind {
            ast::AstTypeKind::Prim(tag) => self.types.prim_type(*tag),
            ast::AstTypeKind::Tuple(elems) => {
                let ts: Vec<TypeId> = elems.iter().map(|e| self.to_type(e)).collect();
                self.types.tuple_type(ts)
            }
            ast::AstTypeKind::Fn(f) => self.fn_ast_type(f),
            ast::AstTypeKind::BorrowedPtr {
                mutable,
                addr_space,
                pointee,
            } => {
                let p = self.to_type(pointee);
                self.types.borrowed_ptr_type(p, *mutable, *addr_space)
            }
            ast::AstTypeKind::OwnedPtr {
                addr_space,
                pointee,
            } => {
                let p = self.to_type(pointee);
                self.types.owned_ptr_type(p, *addr_space)
            }
            ast::AstTypeKind::DefiniteArray { elem, dim } => {
                let e = self.to_type(elem);
                self.types.definite_array_type(e, *dim)
            }
            ast::AstTypeKind::IndefiniteArray(elem) => {
                let e = self.to_type(elem);
                self.types.indefinite_array_type(e)
            }
            ast::AstTypeKind::Simd { elem, dim } => {
                let e = self.to_type(elem);
                self.types.simd_type(e, *dim)
            }
            ast::AstTypeKind::App(app) => self.type_app(ast_ty.span, app),
            ast::AstTypeKind::Err => self.types.type_error(),
        }
    }

    /// A function type written in type position. Without `-> R` it denotes
    /// a continuation and gets no return continuation element.
    fn fn_ast_type(&mut self, f: &ast::FnAstType) -> TypeId {
        self.in_scope(|this| {
            this.check_type_params(&f.type_params);
            let mut elems: Vec<TypeId> = f.params.iter().map(|p| this.to_type(p)).collect();
            if let Some(ret) = &f.ret {
                let r = this.to_type(ret);
                let cont = this.types.fn_type(r);
                elems.push(cont);
            }
            let fn_ty = this.types.fn_type_args(elems);
            this.wrap_lambdas(fn_ty, &f.type_params)
        })
    }

    fn type_app(&mut self, span: Span, app: &ast::AstTypeApp) -> TypeId {
        let Some(decl) = self.lookup_or_error(span, app.name) else {
            return self.types.type_error();
        };
        app.decl.set(Some(decl));
        match self.defs[decl].kind {
            DefKind::TypeParam => {
                if !app.args.is_empty() {
                    let msg = format!("type parameter `{}` takes no arguments", app.name);
                    self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
                }
                match self.defs[decl].ty {
                    Some(t) => t,
                    None => self.types.type_error(),
                }
            }
            DefKind::Struct | DefKind::Enum | DefKind::Typedef => {
                let Some(stored) = self.defs[decl].ty else {
                    let msg = format!("`{}` is used before its definition", app.name);
                    self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
                    return self.types.type_error();
                };
                let args: Vec<TypeId> = app.args.iter().map(|a| self.to_type(a)).collect();
                self.apply_type_args(span, decl, stored, &args, app.name)
            }
            DefKind::Trait => {
                let msg = format!("trait `{}` cannot be used as a type", app.name);
                self.error(span, DiagnosticCode::E_SEMA_MISPLACED_TRAIT, msg);
                self.types.type_error()
            }
            _ => {
                let msg = format!("`{}` is not a type", app.name);
                self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
                self.types.type_error()
            }
        }
    }

    /// Apply explicit type arguments to a declaration's stored type,
    /// checking arity and bounds. Generic items store lambdas, so
    /// application beta-reduces; a bare nominal with arguments is the
    /// recursive occurrence inside its own definition.
    fn apply_type_args(
        &mut self,
        span: Span,
        decl: DefId,
        stored: TypeId,
        args: &[TypeId],
        name: Symbol,
    ) -> TypeId {
        let tps = self.defs[decl].type_params.clone();
        if args.len() != tps.len() {
            let msg = format!(
                "wrong number of type arguments for `{}`: expected {}, found {}",
                name,
                tps.len(),
                args.len()
            );
            self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
            return self.types.type_error();
        }
        if args.is_empty() {
            return stored;
        }
        if matches!(self.types.kind(stored), TypeKind::Lambda { .. }) {
            self.check_bounds(span, &tps, args);
            let mut ty = stored;
            for &a in args {
                ty = self.types.app(ty, a);
            }
            ty
        } else {
            let err = self.types.type_error();
            let vars: Vec<TypeId> = tps.iter().map(|&d| self.defs[d].ty.unwrap_or(err)).collect();
            if args == vars.as_slice() {
                stored
            } else {
                let msg = format!("recursive use of `{name}` must repeat its type parameters");
                self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
                err
            }
        }
    }

    /// Every type argument must satisfy its parameter's bounds; violations
    /// are reported at the instantiation site.
    fn check_bounds(&mut self, span: Span, tps: &[DefId], args: &[TypeId]) {
        let k = args.len();
        for &tp in tps {
            let bounds = self.defs[tp].bounds.clone();
            for bound in bounds {
                if self.traits.is_error_instance(bound) {
                    continue;
                }
                let trait_id = self.traits.instance_trait(bound);
                let raw = self.traits.instance_args(bound).to_vec();
                let inst_args: Vec<TypeId> = raw
                    .iter()
                    .map(|&b| self.substitute_args(b, k, args))
                    .collect();
                match self.traits.instantiate(trait_id, inst_args) {
                    Ok(required) => {
                        if !self.traits.has_impl(required, &self.types) {
                            let msg = format!(
                                "bound `{}` is not satisfied",
                                self.describe_instance(required)
                            );
                            self.error(span, DiagnosticCode::E_SEMA_BOUND_VIOLATION, msg);
                        }
                    }
                    Err(err) => {
                        self.error(
                            span,
                            DiagnosticCode::E_SEMA_ARITY_MISMATCH,
                            err.to_string(),
                        );
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    fn check_mod_contents(&mut self, contents: &ast::ModContents) {
        for item in &contents.items {
            self.check_item_head(item);
        }
        // Traits first so bounds elsewhere can instantiate them, then the
        // remaining type-level items, then value signatures.
        for item in &contents.items {
            if matches!(item, ast::Item::Trait(_)) {
                self.check_item_sig(item);
            }
        }
        for item in &contents.items {
            if matches!(
                item,
                ast::Item::Enum(_) | ast::Item::Struct(_) | ast::Item::Typedef(_)
            ) {
                self.check_item_sig(item);
            }
        }
        for item in &contents.items {
            if !matches!(
                item,
                ast::Item::Trait(_)
                    | ast::Item::Enum(_)
                    | ast::Item::Struct(_)
                    | ast::Item::Typedef(_)
            ) {
                self.check_item_sig(item);
            }
        }
        for item in &contents.items {
            self.check_item_body(item);
        }
    }

    /// Insert the item's name; for nominals, also create the type shell so
    /// later signatures can reference it.
    fn check_item_head(&mut self, item: &ast::Item) {
        match item {
            ast::Item::Mod(m) => {
                let d = self.alloc_def(m.name, m.span, DefKind::Mod);
                m.def.set(Some(d));
                self.insert_decl(m.name, d, m.span);
            }
            ast::Item::ForeignMod(fm) => {
                let d = self.alloc_def(fm.name, fm.span, DefKind::ForeignMod);
                fm.def.set(Some(d));
                self.insert_decl(fm.name, d, fm.span);
                // Foreign functions are callable from the enclosing module.
                for f in &fm.fns {
                    let fd = self.alloc_def(f.name, f.span, DefKind::Fn);
                    f.def.set(Some(fd));
                    self.insert_decl(f.name, fd, f.span);
                }
            }
            ast::Item::Enum(e) => {
                let d = self.alloc_def(e.name, e.span, DefKind::Enum);
                e.def.set(Some(d));
                self.insert_decl(e.name, d, e.span);
                let ty = self.types.enum_type(d, e.name, e.variants.len());
                self.defs[d].ty = Some(ty);
                self.defs[d].members = e.variants.iter().map(|v| v.name).collect();
            }
            ast::Item::Struct(s) => {
                let d = self.alloc_def(s.name, s.span, DefKind::Struct);
                s.def.set(Some(d));
                self.insert_decl(s.name, d, s.span);
                let ty = self.types.struct_type(d, s.name, s.fields.len());
                self.defs[d].ty = Some(ty);
                self.defs[d].members = s.fields.iter().map(|f| f.name).collect();
            }
            ast::Item::Typedef(t) => {
                let d = self.alloc_def(t.name, t.span, DefKind::Typedef);
                t.def.set(Some(d));
                self.insert_decl(t.name, d, t.span);
            }
            ast::Item::Static(s) => {
                let d = self.alloc_def(s.name, s.span, DefKind::Static);
                self.defs[d].mutable = s.mutable;
                s.def.set(Some(d));
                self.insert_decl(s.name, d, s.span);
            }
            ast::Item::Fn(f) => {
                let d = self.alloc_def(f.name, f.span, DefKind::Fn);
                f.def.set(Some(d));
                self.insert_decl(f.name, d, f.span);
            }
            ast::Item::Trait(t) => {
                let d = self.alloc_def(t.name, t.span, DefKind::Trait);
                t.def.set(Some(d));
                self.insert_decl(t.name, d, t.span);
                let trait_id = self.traits.declare(d, t.name, Vec::new());
                self.defs[d].trait_id = Some(trait_id);
            }
            ast::Item::Impl(i) => {
                // Impls are anonymous; allocate for bookkeeping only.
                let d = self.alloc_def(Symbol::intern("<impl>"), i.span, DefKind::Impl);
                i.def.set(Some(d));
            }
        }
    }

    fn check_item_sig(&mut self, item: &ast::Item) {
        match item {
            ast::Item::Mod(_) => {}
            ast::Item::ForeignMod(fm) => {
                for f in &fm.fns {
                    self.check_fn_sig(f);
                }
            }
            ast::Item::Enum(e) => self.check_enum_sig(e),
            ast::Item::Struct(s) => self.check_struct_sig(s),
            ast::Item::Typedef(t) => self.check_typedef_sig(t),
            ast::Item::Static(s) => self.check_static_sig(s),
            ast::Item::Fn(f) => self.check_fn_sig(f),
            ast::Item::Trait(t) => self.check_trait_sig(t),
            ast::Item::Impl(i) => self.check_impl_sig(i),
        }
    }

    fn check_item_body(&mut self, item: &ast::Item) {
        match item {
            ast::Item::Mod(m) => {
                if let Some(contents) = &m.contents {
                    self.in_scope(|this| this.check_mod_contents(contents));
                }
            }
            ast::Item::Static(s) => {
                if let Some(init) = &s.init {
                    let found = self.check_expr_value(init);
                    let Some(def) = s.def.get() else { return };
                    let declared = match self.defs[def].ty {
                        Some(t) => t,
                        None => return,
                    };
                    if !self.compatible(declared, found) {
                        self.type_mismatch(init.span, declared, found);
                    }
                }
            }
            ast::Item::Fn(f) => self.check_fn_body(f),
            ast::Item::Impl(i) => self.check_impl_body(i),
            ast::Item::ForeignMod(_)
            | ast::Item::Enum(_)
            | ast::Item::Struct(_)
            | ast::Item::Typedef(_)
            | ast::Item::Trait(_) => {}
        }
    }

    fn check_struct_sig(&mut self, s: &ast::StructDecl) {
        let Some(def) = s.def.get() else { return };
        self.in_scope(|this| {
            let tps = this.check_type_params(&s.type_params);
            this.defs[def].type_params = tps;
            let Some(nominal) = this.defs[def].ty else {
                return;
            };
            for (i, field) in s.fields.iter().enumerate() {
                if s.fields[..i].iter().any(|prev| prev.name == field.name) {
                    let msg =
                        format!("field `{}` is declared twice in `{}`", field.name, s.name);
                    this.error(field.span, DiagnosticCode::E_SEMA_DUPLICATE_BINDING, msg);
                }
                let ty = this.to_type(&field.ty);
                this.types.set_nominal_op(nominal, i, ty);
            }
            let wrapped = this.wrap_lambdas(nominal, &s.type_params);
            this.defs[def].ty = Some(wrapped);
        });
    }

    fn check_enum_sig(&mut self, e: &ast::EnumDecl) {
        let Some(def) = e.def.get() else { return };
        self.in_scope(|this| {
            let tps = this.check_type_params(&e.type_params);
            this.defs[def].type_params = tps;
            let Some(nominal) = this.defs[def].ty else {
                return;
            };
            for (i, variant) in e.variants.iter().enumerate() {
                if e.variants[..i].iter().any(|prev| prev.name == variant.name) {
                    let msg = format!(
                        "variant `{}` is declared twice in `{}`",
                        variant.name, e.name
                    );
                    this.error(variant.span, DiagnosticCode::E_SEMA_DUPLICATE_BINDING, msg);
                }
                let args: Vec<TypeId> = variant.args.iter().map(|a| this.to_type(a)).collect();
                let payload = this.types.tuple_type(args);
                this.types.set_nominal_op(nominal, i, payload);
            }
            let wrapped = this.wrap_lambdas(nominal, &e.type_params);
            this.defs[def].ty = Some(wrapped);
        });
    }

    fn check_typedef_sig(&mut self, t: &ast::Typedef) {
        let Some(def) = t.def.get() else { return };
        self.in_scope(|this| {
            let tps = this.check_type_params(&t.type_params);
            this.defs[def].type_params = tps;
            let ty = this.to_type(&t.ty);
            let wrapped = this.wrap_lambdas(ty, &t.type_params);
            this.defs[def].ty = Some(wrapped);
        });
    }

    fn check_static_sig(&mut self, s: &ast::StaticItem) {
        let Some(def) = s.def.get() else { return };
        let ty = self.to_type(&s.ty);
        self.defs[def].ty = Some(ty);
    }

    /// Compute a function's type: parameter tuple plus the trailing return
    /// continuation (`-> ()` when no return type is written), wrapped in
    /// one lambda per type parameter.
    fn check_fn_sig(&mut self, f: &ast::FnDecl) {
        let def = match f.def.get() {
            Some(d) => d,
            None => {
                // Trait and impl methods are not head-inserted.
                let d = self.alloc_def(f.name, f.span, DefKind::Fn);
                f.def.set(Some(d));
                d
            }
        };
        self.in_scope(|this| {
            let tps = this.check_type_params(&f.type_params);
            this.defs[def].type_params = tps;
            let mut elems = Vec::with_capacity(f.params.len() + 1);
            for p in &f.params {
                let ty = this.to_type(&p.ty);
                let pd = this.alloc_def(p.name, p.span, DefKind::Param);
                this.defs[pd].ty = Some(ty);
                p.def.set(Some(pd));
                elems.push(ty);
            }
            let ret = match &f.ret {
                Some(r) => this.to_type(r),
                None => this.types.unit(),
            };
            let cont = this.types.fn_type(ret);
            elems.push(cont);
            let fn_ty = this.types.fn_type_args(elems);
            let wrapped = this.wrap_lambdas(fn_ty, &f.type_params);
            this.defs[def].ty = Some(wrapped);
        });
    }

    fn check_fn_body(&mut self, f: &ast::FnDecl) {
        let Some(body) = &f.body else { return };
        let Some(def) = f.def.get() else { return };
        let stored = match self.defs[def].ty {
            Some(t) => t,
            None => return,
        };
        let fn_ty = self.strip_lambdas(stored);
        if !matches!(self.types.kind(fn_ty), TypeKind::Fn(_)) {
            return;
        }
        self.in_scope(|this| {
            for tp in &f.type_params {
                if let Some(d) = tp.def.get() {
                    this.insert_decl(tp.name, d, tp.span);
                }
            }
            for p in &f.params {
                if let Some(d) = p.def.get() {
                    this.insert_decl(p.name, d, p.span);
                }
            }
            // `return` is the continuation parameter, an ordinary binding.
            if let Some(cont) = this.types.last_param(fn_ty) {
                if matches!(this.types.kind(cont), TypeKind::Fn(_)) {
                    let ret_sym = impalac_util::symbol::KW_RETURN;
                    let d = this.alloc_def(ret_sym, f.span, DefKind::Local);
                    this.defs[d].ty = Some(cont);
                    this.insert_decl(ret_sym, d, f.span);
                }
            }

            let ret_ty = this.types.return_type(fn_ty);
            let body_ty = this.check_expr(body);

            if !this.types.is_noret(ret_ty)
                && !this.types.is_noret(body_ty)
                && !this.compatible(ret_ty, body_ty)
            {
                let tail_span = match &body.kind {
                    ast::ExprKind::Block(b) => {
                        b.tail.as_ref().map(|t| t.span).unwrap_or(body.span)
                    }
                    _ => body.span,
                };
                if this.types.is_unit(body_ty) && !this.types.is_unit(ret_ty) {
                    let msg = format!(
                        "function `{}` declares return type `{}` but its body never produces a value",
                        f.name,
                        this.types.display(ret_ty)
                    );
                    this.error(tail_span, DiagnosticCode::E_SEMA_NON_RETURNING, msg);
                } else {
                    let marker = this.type_mismatch(tail_span, ret_ty, body_ty);
                    body.ty.set(Some(marker));
                }
            }
        });
    }

    fn check_trait_sig(&mut self, t: &ast::TraitDecl) {
        let Some(def) = t.def.get() else { return };
        let Some(trait_id) = self.defs[def].trait_id else {
            return;
        };
        self.in_scope(|this| {
            let tps = this.check_type_params(&t.type_params);
            this.defs[def].type_params = tps.clone();
            for &tp in &tps {
                let Some(var) = this.defs[tp].ty else { continue };
                if let Err(err) = this.traits.add_bound_var(trait_id, var) {
                    this.error(t.span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, err.to_string());
                }
            }
            let mut supers = Vec::new();
            for sup in &t.supers {
                let inst = this.to_trait_instance(sup);
                if !this.traits.is_error_instance(inst) {
                    supers.push(this.traits.instance_trait(inst));
                }
            }
            this.traits.set_supers(trait_id, supers);
            for m in &t.methods {
                this.check_fn_sig(m);
                let Some(mdef) = m.def.get() else { continue };
                let Some(sig) = this.defs[mdef].ty else { continue };
                if let Err(err) = this.traits.add_method(trait_id, m.name, sig, mdef, &this.types)
                {
                    this.error(m.span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, err.to_string());
                }
            }
        });
    }

    fn check_impl_sig(&mut self, i: &ast::ImplBlock) {
        let Some(def) = i.def.get() else { return };
        self.in_scope(|this| {
            let tps = this.check_type_params(&i.type_params);
            this.defs[def].type_params = tps;
            if let Some(self_ty) = &i.self_ty {
                let ty = this.to_type(self_ty);
                this.defs[def].ty = Some(ty);
            }
            let mut impl_inst = None;
            if let Some(trait_ref) = &i.trait_ref {
                let inst = this.to_trait_instance(trait_ref);
                if !this.traits.is_error_instance(inst) {
                    let trait_id = this.traits.instance_trait(inst);
                    let args = this.traits.instance_args(inst).to_vec();
                    this.traits.record_impl(trait_id, args);
                    impl_inst = Some(inst);
                }
            }
            this.defs[def].impl_trait = impl_inst;

            for m in &i.methods {
                this.check_fn_sig(m);
            }

            // A trait impl must provide exactly the trait's methods, at
            // signatures refining the trait's (after substituting the
            // instance's arguments).
            if let Some(inst) = impl_inst {
                let trait_id = this.traits.instance_trait(inst);
                for m in &i.methods {
                    let Some(mdef) = m.def.get() else { continue };
                    let Some(got) = this.defs[mdef].ty else { continue };
                    match this.traits.method_type(inst, m.name, &mut this.types) {
                        Some(expected) => {
                            if !this.compatible(expected, got) {
                                let got_s = this.types.display(got).to_string();
                                let expected_s = this.types.display(expected).to_string();
                                let msg = format!(
                                    "method `{}` has type `{got_s}`, but its trait declares `{expected_s}`",
                                    m.name
                                );
                                this.error(m.span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                            }
                        }
                        None => {
                            let msg = format!(
                                "method `{}` is not a member of trait `{}`",
                                m.name,
                                this.traits.name(trait_id)
                            );
                            this.error(m.span, DiagnosticCode::E_SEMA_UNDECLARED, msg);
                        }
                    }
                }
                let missing: Vec<Symbol> = this
                    .traits
                    .methods(trait_id)
                    .iter()
                    .map(|tm| tm.name)
                    .filter(|name| !i.methods.iter().any(|m| m.name == *name))
                    .collect();
                for name in missing {
                    let msg = format!(
                        "impl of trait `{}` is missing method `{name}`",
                        this.traits.name(trait_id)
                    );
                    this.error(i.span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
                }
            }
        });
    }

    fn check_impl_body(&mut self, i: &ast::ImplBlock) {
        self.in_scope(|this| {
            for tp in &i.type_params {
                if let Some(d) = tp.def.get() {
                    this.insert_decl(tp.name, d, tp.span);
                }
            }
            for m in &i.methods {
                this.check_fn_body(m);
            }
        });
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn check_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::Expr(e) => {
                self.check_expr(&e.expr);
            }
            ast::Stmt::Let(l) => self.check_let(l),
            ast::Stmt::Item(item) => self.check_item_body(item),
        }
    }

    fn check_let(&mut self, l: &ast::LetStmt) {
        let declared = l.local.ty.as_ref().map(|t| self.to_type(t));
        let init_ty = l.init.as_ref().map(|e| self.check_expr_value(e));
        let ty = match (declared, init_ty) {
            (Some(d), Some(found)) => {
                if !self.compatible(d, found) {
                    if let Some(init) = &l.init {
                        self.type_mismatch(init.span, d, found);
                    }
                }
                d
            }
            (Some(d), None) => d,
            (None, Some(found)) => found,
            (None, None) => self.types.unknown_type(),
        };
        let d = self.alloc_def(l.local.name, l.local.span, DefKind::Local);
        self.defs[d].ty = Some(ty);
        self.defs[d].mutable = l.local.mutable;
        l.local.def.set(Some(d));
        self.insert_decl(l.local.name, d, l.local.span);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn check_expr(&mut self, expr: &ast::Expr) -> TypeId {
        let ty = match &expr.kind {
            ast::ExprKind::Literal(lit) => self.check_literal(lit),
            ast::ExprKind::Path(path) => self.check_path(expr.span, path),
            ast::ExprKind::Prefix(p) => self.check_prefix(expr.span, p),
            ast::ExprKind::Infix(i) => self.check_infix(expr.span, i),
            ast::ExprKind::Postfix(p) => self.check_mutating_op(expr.span, &p.lhs),
            ast::ExprKind::Block(b) => self.check_block(b),
            ast::ExprKind::If(i) => self.check_if(expr.span, i),
            ast::ExprKind::For(f) => self.check_for(f),
            ast::ExprKind::Field(f) => self.check_field(expr.span, f),
            ast::ExprKind::Cast(c) => self.check_cast(expr.span, c),
            ast::ExprKind::Tuple(elems) => self.check_tuple(elems),
            ast::ExprKind::DefiniteArray(elems) => self.check_definite_array(elems),
            ast::ExprKind::RepeatedArray(r) => self.check_repeated_array(r),
            ast::ExprKind::IndefiniteArray(a) => self.check_indefinite_array(a),
            ast::ExprKind::Struct(s) => self.check_struct_expr(expr.span, s),
            ast::ExprKind::Map(m) => self.check_map(expr.span, m),
        };
        expr.ty.set(Some(ty));
        ty
    }

    /// Check and decay: the expression used as a consumed value.
    fn check_expr_value(&mut self, expr: &ast::Expr) -> TypeId {
        let t = self.check_expr(expr);
        self.decay(t)
    }

    fn check_literal(&mut self, lit: &ast::Lit) -> TypeId {
        match lit {
            ast::Lit::Int(_, tag) | ast::Lit::Float(_, tag) => self.types.prim_type(*tag),
            ast::Lit::Bool(_) => self.types.prim_type(PrimTy::Bool),
        }
    }

    fn check_path(&mut self, span: Span, path: &ast::PathExpr) -> TypeId {
        let Some(decl) = self.scopes.lookup(path.name) else {
            // A name with no binding may still be a method of an in-scope
            // type parameter's bound.
            if let Some((mdef, ty)) = self.resolve_bound_method(path.name) {
                path.decl.set(Some(mdef));
                return ty;
            }
            let msg = format!("`{}` is not declared in this scope", path.name);
            self.error(span, DiagnosticCode::E_SEMA_UNDECLARED, msg);
            return self.types.type_error();
        };
        path.decl.set(Some(decl));
        let kind = self.defs[decl].kind;
        match kind {
            DefKind::Fn | DefKind::Static | DefKind::Local | DefKind::Param => {
                let stored = match self.defs[decl].ty {
                    Some(t) => t,
                    None => self.types.unknown_type(),
                };
                let ty = if path.type_args.is_empty() {
                    stored
                } else {
                    let args: Vec<TypeId> =
                        path.type_args.iter().map(|a| self.to_type(a)).collect();
                    self.apply_type_args(span, decl, stored, &args, path.name)
                };
                // Storage declarations are l-values; mutability comes from
                // the declaration.
                match kind {
                    DefKind::Local | DefKind::Param | DefKind::Static => {
                        let mutable = self.defs[decl].mutable;
                        self.types.ref_type(ty, mutable, 0)
                    }
                    _ => ty,
                }
            }
            DefKind::TypeParam => {
                let msg = format!("type parameter `{}` is not a value", path.name);
                self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
                self.types.type_error()
            }
            _ => {
                let msg = format!("`{}` is not a value", path.name);
                self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
                self.types.type_error()
            }
        }
    }

    /// Search the bounds of in-scope type parameters for a trait method,
    /// innermost scope first. The returned signature has the bound's
    /// arguments substituted in.
    fn resolve_bound_method(&mut self, name: Symbol) -> Option<(DefId, TypeId)> {
        let mut hit: Option<(DefId, TraitInstanceId)> = None;
        'search: for (_, def) in self.scopes.visible_bindings() {
            if self.defs[def].kind != DefKind::TypeParam {
                continue;
            }
            for &bound in &self.defs[def].bounds {
                if self.traits.is_error_instance(bound) {
                    continue;
                }
                let trait_id = self.traits.instance_trait(bound);
                if let Some(method) = self.traits.find_method(trait_id, name) {
                    hit = Some((method.def, bound));
                    break 'search;
                }
            }
        }
        let (mdef, inst) = hit?;
        let ty = self.traits.method_type(inst, name, &mut self.types)?;
        Some((mdef, ty))
    }

    fn check_prefix(&mut self, span: Span, p: &ast::PrefixExpr) -> TypeId {
        match p.op {
            ast::PrefixOp::Neg => {
                let t = self.check_expr_value(&p.rhs);
                if self.types.is_numeric(t) || self.types.is_error(t) {
                    t
                } else {
                    let msg = format!("cannot negate a value of type `{}`", self.types.display(t));
                    self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                    self.types.type_error()
                }
            }
            ast::PrefixOp::Not => {
                let t = self.check_expr_value(&p.rhs);
                if self.types.is_bool(t) || self.types.is_int(t) || self.types.is_error(t) {
                    t
                } else {
                    let msg = format!(
                        "operator `!` expects a boolean or integer, found `{}`",
                        self.types.display(t)
                    );
                    self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                    self.types.type_error()
                }
            }
            ast::PrefixOp::Deref => {
                let t = self.check_expr_value(&p.rhs);
                match self.types.kind(t).clone() {
                    TypeKind::BorrowedPtr {
                        pointee,
                        mutable,
                        addr_space,
                    } => self.types.ref_type(pointee, mutable, addr_space),
                    TypeKind::OwnedPtr {
                        pointee,
                        addr_space,
                    } => self.types.ref_type(pointee, true, addr_space),
                    TypeKind::Error | TypeKind::InferError { .. } => self.types.type_error(),
                    _ => {
                        let msg = format!(
                            "type `{}` cannot be dereferenced",
                            self.types.display(t)
                        );
                        self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                        self.types.type_error()
                    }
                }
            }
            ast::PrefixOp::Borrow { mutable } => {
                let t = self.check_expr(&p.rhs);
                match self.types.kind(t).clone() {
                    TypeKind::Ref {
                        pointee,
                        mutable: is_mut,
                        addr_space,
                    } => {
                        if mutable && !is_mut {
                            let msg = format!(
                                "cannot borrow immutable `{}` as mutable",
                                self.types.display(pointee)
                            );
                            self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                        }
                        self.types.borrowed_ptr_type(pointee, mutable, addr_space)
                    }
                    // Borrow of an rvalue promotes a temporary.
                    _ => self.types.borrowed_ptr_type(t, mutable, 0),
                }
            }
            ast::PrefixOp::Inc | ast::PrefixOp::Dec => self.check_mutating_op(span, &p.rhs),
        }
    }

    /// `++`/`--`, prefix or postfix: the operand must be mutable numeric
    /// storage; the result is the stored value.
    fn check_mutating_op(&mut self, span: Span, operand: &ast::Expr) -> TypeId {
        let t = self.check_expr(operand);
        match self.types.kind(t).clone() {
            TypeKind::Ref {
                pointee,
                mutable: true,
                ..
            } => {
                if self.types.is_numeric(pointee) || self.types.is_error(pointee) {
                    pointee
                } else {
                    let msg = format!(
                        "cannot increment or decrement a value of type `{}`",
                        self.types.display(pointee)
                    );
                    self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                    self.types.type_error()
                }
            }
            TypeKind::Ref { .. } => {
                self.error(
                    span,
                    DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                    "cannot modify an immutable l-value",
                );
                self.types.type_error()
            }
            TypeKind::Error | TypeKind::InferError { .. } => self.types.type_error(),
            _ => {
                self.error(
                    span,
                    DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                    "expression is not addressable",
                );
                self.types.type_error()
            }
        }
    }

    fn check_infix(&mut self, span: Span, i: &ast::InfixExpr) -> TypeId {
        if i.op.is_assign() {
            return self.check_assign(span, i);
        }
        let lt = self.check_expr_value(&i.lhs);
        let rt = self.check_expr_value(&i.rhs);
        match i.op {
            ast::InfixOp::Add
            | ast::InfixOp::Sub
            | ast::InfixOp::Mul
            | ast::InfixOp::Div
            | ast::InfixOp::Rem
            | ast::InfixOp::Shl
            | ast::InfixOp::Shr
            | ast::InfixOp::BitAnd
            | ast::InfixOp::BitOr
            | ast::InfixOp::BitXor => self.check_arith(span, i.op, lt, rt),
            ast::InfixOp::Eq
            | ast::InfixOp::Ne
            | ast::InfixOp::Lt
            | ast::InfixOp::Le
            | ast::InfixOp::Gt
            | ast::InfixOp::Ge => {
                let boolt = self.types.prim_type(PrimTy::Bool);
                if !self.types.is_error(lt) && !self.types.is_error(rt) {
                    if lt != rt {
                        self.type_mismatch(i.rhs.span, lt, rt);
                    } else if !matches!(
                        self.types.kind(lt),
                        TypeKind::Prim(_)
                            | TypeKind::BorrowedPtr { .. }
                            | TypeKind::OwnedPtr { .. }
                    ) {
                        let msg = format!(
                            "values of type `{}` cannot be compared",
                            self.types.display(lt)
                        );
                        self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                    }
                }
                boolt
            }
            ast::InfixOp::AndAnd | ast::InfixOp::OrOr => {
                let boolt = self.types.prim_type(PrimTy::Bool);
                if !self.compatible(boolt, lt) {
                    self.type_mismatch(i.lhs.span, boolt, lt);
                }
                if !self.compatible(boolt, rt) {
                    self.type_mismatch(i.rhs.span, boolt, rt);
                }
                boolt
            }
            _ => unreachable!("assignment operators are handled above"),
        }
    }

    fn check_arith(&mut self, span: Span, op: ast::InfixOp, lt: TypeId, rt: TypeId) -> TypeId {
        if self.types.is_error(lt) || self.types.is_error(rt) {
            return self.types.type_error();
        }
        let ok = match op {
            ast::InfixOp::Add
            | ast::InfixOp::Sub
            | ast::InfixOp::Mul
            | ast::InfixOp::Div
            | ast::InfixOp::Rem => self.types.is_numeric(lt) && self.types.is_numeric(rt),
            ast::InfixOp::Shl | ast::InfixOp::Shr => {
                self.types.is_int(lt) && self.types.is_int(rt)
            }
            ast::InfixOp::BitAnd | ast::InfixOp::BitOr | ast::InfixOp::BitXor => {
                (self.types.is_int(lt) && self.types.is_int(rt))
                    || (self.types.is_bool(lt) && self.types.is_bool(rt))
            }
            _ => unreachable!("not an arithmetic operator: {op:?}"),
        };
        if !ok {
            let msg = format!(
                "operator `{}` cannot be applied to `{}` and `{}`",
                op.as_str(),
                self.types.display(lt),
                self.types.display(rt)
            );
            self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
            return self.types.type_error();
        }
        if lt != rt {
            return self.type_mismatch(span, lt, rt);
        }
        lt
    }

    fn check_assign(&mut self, span: Span, i: &ast::InfixExpr) -> TypeId {
        let lt = self.check_expr(&i.lhs);
        let rt = self.check_expr_value(&i.rhs);
        let unit = self.types.unit();
        match self.types.kind(lt).clone() {
            TypeKind::Ref {
                pointee,
                mutable: true,
                ..
            } => {
                if let Some(base) = i.op.base() {
                    self.check_arith(span, base, pointee, rt);
                } else if !self.compatible(pointee, rt) {
                    self.type_mismatch(i.rhs.span, pointee, rt);
                }
                unit
            }
            TypeKind::Ref { .. } => {
                self.error(
                    span,
                    DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                    "left-hand side of assignment is immutable",
                );
                unit
            }
            TypeKind::Error | TypeKind::InferError { .. } => unit,
            _ => {
                self.error(
                    span,
                    DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                    "left-hand side of assignment is not addressable",
                );
                unit
            }
        }
    }

    fn check_block(&mut self, b: &ast::BlockExpr) -> TypeId {
        self.in_scope(|this| {
            // Item heads and signatures first so statements may reference
            // items declared later in the block.
            for stmt in &b.stmts {
                if let ast::Stmt::Item(item) = stmt {
                    this.check_item_head(item);
                }
            }
            for stmt in &b.stmts {
                if let ast::Stmt::Item(item) = stmt {
                    this.check_item_sig(item);
                }
            }
            for stmt in &b.stmts {
                this.check_stmt(stmt);
            }
            match &b.tail {
                Some(tail) => this.check_expr_value(tail),
                None => this.types.unit(),
            }
        })
    }

    fn check_if(&mut self, span: Span, i: &ast::IfExpr) -> TypeId {
        let boolt = self.types.prim_type(PrimTy::Bool);
        let cond = self.check_expr_value(&i.cond);
        if !self.compatible(boolt, cond) {
            self.type_mismatch(i.cond.span, boolt, cond);
        }
        let then_ty = self.check_expr_value(&i.then_blk);
        match &i.else_blk {
            Some(else_blk) => {
                let else_ty = self.check_expr_value(else_blk);
                if self.types.is_noret(then_ty) {
                    else_ty
                } else if self.types.is_noret(else_ty) || self.compatible(then_ty, else_ty) {
                    then_ty
                } else if self.compatible(else_ty, then_ty) {
                    else_ty
                } else {
                    self.type_mismatch(else_blk.span, then_ty, else_ty)
                }
            }
            None => {
                if !self.types.is_unit(then_ty)
                    && !self.types.is_noret(then_ty)
                    && !self.types.is_error(then_ty)
                {
                    let msg = format!(
                        "`if` without `else` has unit type, found `{}`",
                        self.types.display(then_ty)
                    );
                    self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                }
                self.types.unit()
            }
        }
    }

    /// `for` is sugar over a call of a higher-order generator; this layer
    /// checks the pieces and leaves the desugaring to emission.
    fn check_for(&mut self, f: &ast::ForExpr) -> TypeId {
        let gen_ty = self.check_expr_value(&f.generator);
        if !matches!(self.types.kind(gen_ty), TypeKind::Fn(_)) && !self.types.is_error(gen_ty) {
            let msg = format!(
                "`for` expects a function-typed generator, found `{}`",
                self.types.display(gen_ty)
            );
            self.error(
                f.generator.span,
                DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                msg,
            );
        }
        self.in_scope(|this| {
            for p in &f.params {
                let ty = this.to_type(&p.ty);
                let d = this.alloc_def(p.name, p.span, DefKind::Param);
                this.defs[d].ty = Some(ty);
                p.def.set(Some(d));
                this.insert_decl(p.name, d, p.span);
            }
            this.check_expr(&f.body);
        });
        self.types.unit()
    }

    fn check_field(&mut self, span: Span, f: &ast::FieldExpr) -> TypeId {
        let lhs = self.check_expr(&f.lhs);
        // Peel the l-value layer, then one pointer indirection; field
        // access through storage stays an l-value.
        let mut lvalue: Option<(bool, u32)> = None;
        let mut base = lhs;
        if let TypeKind::Ref {
            pointee,
            mutable,
            addr_space,
        } = self.types.kind(base).clone()
        {
            lvalue = Some((mutable, addr_space));
            base = pointee;
        }
        match self.types.kind(base).clone() {
            TypeKind::BorrowedPtr {
                pointee,
                mutable,
                addr_space,
            } => {
                lvalue = Some((mutable, addr_space));
                base = pointee;
            }
            TypeKind::OwnedPtr {
                pointee,
                addr_space,
            } => {
                lvalue = Some((true, addr_space));
                base = pointee;
            }
            _ => {}
        }
        match self.types.kind(base).clone() {
            TypeKind::Struct { decl, fields, .. } => {
                let members = self.defs[decl].members.clone();
                match members.iter().position(|&m| m == f.name) {
                    Some(i) => {
                        let ty = match fields.get(i) {
                            Some(&t) => t,
                            None => self.types.type_error(),
                        };
                        match lvalue {
                            Some((mutable, addr_space)) => {
                                self.types.ref_type(ty, mutable, addr_space)
                            }
                            None => ty,
                        }
                    }
                    None => {
                        let msg = format!(
                            "no field `{}` on `{}`",
                            f.name,
                            self.types.display(base)
                        );
                        self.error(span, DiagnosticCode::E_SEMA_UNDECLARED, msg);
                        self.types.type_error()
                    }
                }
            }
            TypeKind::Error | TypeKind::InferError { .. } => self.types.type_error(),
            _ => {
                let msg = format!("type `{}` has no fields", self.types.display(base));
                self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                self.types.type_error()
            }
        }
    }

    fn check_cast(&mut self, span: Span, c: &ast::CastExpr) -> TypeId {
        let src = self.check_expr_value(&c.lhs);
        let target = self.to_type(&c.target);
        let ptr_like = |this: &Self, t: TypeId| {
            matches!(
                this.types.kind(t),
                TypeKind::BorrowedPtr { .. } | TypeKind::OwnedPtr { .. }
            )
        };
        let ok = self.types.is_error(src)
            || self.types.is_error(target)
            || (matches!(self.types.kind(src), TypeKind::Prim(_))
                && matches!(self.types.kind(target), TypeKind::Prim(_)))
            || (ptr_like(self, src) && ptr_like(self, target));
        if !ok {
            let msg = format!(
                "invalid cast from `{}` to `{}`",
                self.types.display(src),
                self.types.display(target)
            );
            self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
        }
        target
    }

    fn check_tuple(&mut self, elems: &[ast::Expr]) -> TypeId {
        let ts: Vec<TypeId> = elems.iter().map(|e| self.check_expr_value(e)).collect();
        self.types.tuple_type(ts)
    }

    fn check_definite_array(&mut self, elems: &[ast::Expr]) -> TypeId {
        let Some(first) = elems.first() else {
            let elem = self.types.unknown_type();
            return self.types.definite_array_type(elem, 0);
        };
        let elem_ty = self.check_expr_value(first);
        for e in &elems[1..] {
            let t = self.check_expr_value(e);
            if !self.compatible(elem_ty, t) {
                self.type_mismatch(e.span, elem_ty, t);
            }
        }
        self.types.definite_array_type(elem_ty, elems.len() as u64)
    }

    fn check_repeated_array(&mut self, r: &ast::RepeatedArrayExpr) -> TypeId {
        let elem_ty = self.check_expr_value(&r.value);
        self.types.definite_array_type(elem_ty, r.count)
    }

    fn check_indefinite_array(&mut self, a: &ast::IndefiniteArrayExpr) -> TypeId {
        let size_ty = self.check_expr_value(&a.size);
        if !self.types.is_int(size_ty) && !self.types.is_error(size_ty) {
            let msg = format!(
                "array size must be an integer, found `{}`",
                self.types.display(size_ty)
            );
            self.error(a.size.span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
        }
        let elem = self.to_type(&a.elem);
        self.types.indefinite_array_type(elem)
    }

    fn check_struct_expr(&mut self, span: Span, s: &ast::StructExpr) -> TypeId {
        let Some(decl) = self.lookup_or_error(span, s.path.name) else {
            for field in &s.fields {
                self.check_expr_value(&field.expr);
            }
            return self.types.type_error();
        };
        s.path.decl.set(Some(decl));
        if self.defs[decl].kind != DefKind::Struct {
            for field in &s.fields {
                self.check_expr_value(&field.expr);
            }
            let msg = format!("`{}` is not a struct", s.path.name);
            self.error(span, DiagnosticCode::E_SEMA_ILLEGAL_TYPE, msg);
            return self.types.type_error();
        }
        let Some(stored) = self.defs[decl].ty else {
            return self.types.type_error();
        };
        let args: Vec<TypeId> = s.path.type_args.iter().map(|a| self.to_type(a)).collect();
        let result = self.apply_type_args(span, decl, stored, &args, s.path.name);
        let field_types: Vec<TypeId> = match self.types.kind(result) {
            TypeKind::Struct { fields, .. } => fields.clone(),
            _ => Vec::new(),
        };
        let members = self.defs[decl].members.clone();
        let err = self.types.type_error();
        for (i, field) in s.fields.iter().enumerate() {
            if s.fields[..i].iter().any(|prev| prev.name == field.name) {
                let msg = format!("field `{}` is given twice", field.name);
                self.error(field.span, DiagnosticCode::E_SEMA_DUPLICATE_BINDING, msg);
            }
            let found = self.check_expr_value(&field.expr);
            match members.iter().position(|&m| m == field.name) {
                Some(idx) => {
                    let expected = field_types.get(idx).copied().unwrap_or(err);
                    if !self.compatible(expected, found) {
                        self.type_mismatch(field.expr.span, expected, found);
                    }
                }
                None => {
                    let msg = format!(
                        "struct `{}` has no field `{}`",
                        s.path.name, field.name
                    );
                    self.error(field.span, DiagnosticCode::E_SEMA_UNDECLARED, msg);
                }
            }
        }
        let missing: Vec<Symbol> = members
            .iter()
            .copied()
            .filter(|m| !s.fields.iter().any(|f| f.name == *m))
            .collect();
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(|m| format!("`{m}`"))
                .collect::<Vec<_>>()
                .join(", ");
            let msg = format!("missing field(s) {names} in initializer of `{}`", s.path.name);
            self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
        }
        result
    }

    /// A map expression is a call when the callee is a function, an index
    /// when it is an array or tuple.
    fn check_map(&mut self, span: Span, m: &ast::MapExpr) -> TypeId {
        let callee_raw = self.check_expr(&m.lhs);
        let lvalue = match self.types.kind(callee_raw) {
            TypeKind::Ref {
                mutable,
                addr_space,
                ..
            } => Some((*mutable, *addr_space)),
            _ => None,
        };
        let callee = self.decay(callee_raw);
        match self.types.kind(callee).clone() {
            TypeKind::Fn(_) => self.check_call(span, m, callee),
            TypeKind::DefiniteArray { elem, .. }
            | TypeKind::IndefiniteArray(elem)
            | TypeKind::Simd { elem, .. } => {
                if m.args.len() != 1 {
                    for a in &m.args {
                        self.check_expr_value(a);
                    }
                    let msg = format!(
                        "indexing takes exactly one argument, found {}",
                        m.args.len()
                    );
                    self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
                    return self.types.type_error();
                }
                let idx = self.check_expr_value(&m.args[0]);
                if !self.types.is_int(idx) && !self.types.is_error(idx) {
                    let msg = format!(
                        "array index must be an integer, found `{}`",
                        self.types.display(idx)
                    );
                    self.error(m.args[0].span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                }
                match lvalue {
                    Some((mutable, addr_space)) => self.types.ref_type(elem, mutable, addr_space),
                    None => elem,
                }
            }
            TypeKind::Tuple(ts) => {
                if m.args.len() != 1 {
                    for a in &m.args {
                        self.check_expr_value(a);
                    }
                    let msg = format!(
                        "tuple indexing takes exactly one argument, found {}",
                        m.args.len()
                    );
                    self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
                    return self.types.type_error();
                }
                self.check_expr(&m.args[0]);
                match &m.args[0].kind {
                    ast::ExprKind::Literal(ast::Lit::Int(n, _)) => {
                        let n = *n;
                        if n < 0 || n as usize >= ts.len() {
                            let msg = format!(
                                "tuple index {n} out of bounds for `{}`",
                                self.types.display(callee)
                            );
                            self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                            self.types.type_error()
                        } else {
                            ts[n as usize]
                        }
                    }
                    _ => {
                        self.error(
                            m.args[0].span,
                            DiagnosticCode::E_SEMA_TYPE_MISMATCH,
                            "tuple index must be an integer literal",
                        );
                        self.types.type_error()
                    }
                }
            }
            TypeKind::Lambda { .. } => {
                for a in &m.args {
                    self.check_expr_value(a);
                }
                self.error(
                    span,
                    DiagnosticCode::E_SEMA_ILLEGAL_TYPE,
                    "generic value must be instantiated with type arguments before use",
                );
                self.types.type_error()
            }
            TypeKind::Error | TypeKind::InferError { .. } => {
                for a in &m.args {
                    self.check_expr_value(a);
                }
                self.types.type_error()
            }
            _ => {
                for a in &m.args {
                    self.check_expr_value(a);
                }
                let msg = format!(
                    "expression of type `{}` cannot be called or indexed",
                    self.types.display(callee)
                );
                self.error(span, DiagnosticCode::E_SEMA_TYPE_MISMATCH, msg);
                self.types.type_error()
            }
        }
    }

    /// A call of a returning function takes its declared arguments (the
    /// continuation stays implicit and the call has the continuation's
    /// result type), or all parameter-tuple elements when the final
    /// argument is itself a function (an explicit continuation; the call
    /// then never returns). Continuation calls take every element.
    fn check_call(&mut self, span: Span, m: &ast::MapExpr, callee: TypeId) -> TypeId {
        let n = self.types.num_params(callee);
        let returning = self.types.is_returning(callee);
        let args: Vec<TypeId> = m.args.iter().map(|a| self.check_expr_value(a)).collect();

        let expected_args = if returning { n - 1 } else { n };
        let explicit_cont = returning
            && args.len() == n
            && args
                .last()
                .is_some_and(|&t| matches!(self.types.kind(t), TypeKind::Fn(_)));
        if args.len() != expected_args && !explicit_cont {
            let callee_s = self.types.display(callee).to_string();
            let msg = format!(
                "`{callee_s}` expects {expected_args} argument(s), found {}",
                args.len()
            );
            self.error(span, DiagnosticCode::E_SEMA_ARITY_MISMATCH, msg);
            return self.types.type_error();
        }

        let mut ok = true;
        for (i, (&found, arg)) in args.iter().zip(&m.args).enumerate() {
            let expected = self.types.param_at(callee, i);
            if !self.compatible(expected, found) {
                let marker = self.type_mismatch(arg.span, expected, found);
                arg.ty.set(Some(marker));
                ok = false;
            }
        }
        if !ok {
            return self.types.type_error();
        }
        if returning && !explicit_cont {
            self.types.return_type(callee)
        } else {
            // Continuation calls and explicitly continued calls never
            // return to this point.
            self.types.type_noret()
        }
    }
}
