//! Three-address-code intermediate representation.
//!
//! One [`TacModule`] per top-level or inner class/interface; each holds the
//! module's transitive type references, its ordered fields, its constants,
//! and one [`TacMethod`] per method. Nodes and blocks live in per-method
//! arenas and are discarded with the method.

pub mod builder;
pub mod method;
pub mod nodes;

pub use builder::TacBuilder;
pub use method::{BlockData, Local, TacMethod};
pub use nodes::{
    BlockId, BranchKind, CallFunction, LocalId, NodeId, RuntimeFn, TacKind, TacNode,
};

use crate::typecheck::{ModifiedType, TypeArena, TypeId};
use shadow_ast::Literal;

/// A compile-time constant of the module: a `constant` field folded to a
/// literal, emitted as a constant global.
#[derive(Debug, Clone)]
pub struct TacConstant {
    pub name: String,
    pub ty: ModifiedType,
    pub value: Literal,
}

/// An entire class or interface in TAC.
#[derive(Debug)]
pub struct TacModule {
    pub ty: TypeId,
    /// Transitive reference closure; the primitive set and the runtime
    /// descriptor types are always present so their descriptors get
    /// emitted.
    pub references: Vec<TypeId>,
    /// Instance fields in layout order (inherited first, widest first).
    pub fields: Vec<(String, ModifiedType)>,
    pub constants: Vec<TacConstant>,
    pub methods: Vec<TacMethod>,
    pub inner: Vec<TacModule>,
}

impl TacModule {
    pub fn new(arena: &TypeArena, ty: TypeId) -> Self {
        let wk = arena.well_known;
        let mut roots = vec![
            ty,
            wk.object,
            wk.array,
            wk.exception,
            wk.generic_class,
            wk.class,
            wk.string,
            wk.console,
        ];
        roots.extend(wk.primitives);
        let references = arena.reference_closure(&roots);

        let fields = if arena.is_class(ty) {
            arena
                .order_all_fields(ty)
                .into_iter()
                .map(|(_, f)| (f.name, f.ty))
                .collect()
        } else {
            Vec::new()
        };

        TacModule {
            ty,
            references,
            fields,
            constants: Vec::new(),
            methods: Vec::new(),
            inner: Vec::new(),
        }
    }

    pub fn is_class(&self, arena: &TypeArena) -> bool {
        arena.is_class(self.ty)
    }

    pub fn is_interface(&self, arena: &TypeArena) -> bool {
        arena.is_interface(self.ty)
    }

    /// This module and all inner modules, depth first.
    pub fn all_modules(&self) -> Vec<&TacModule> {
        let mut out = vec![self];
        for inner in &self.inner {
            out.extend(inner.all_modules());
        }
        out
    }
}
