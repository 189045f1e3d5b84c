//! The Shadow type model and the resolver that populates it from ASTs.
//!
//! Types live in a [`types::TypeArena`]; a type is a [`types::TypeId`] and
//! every relationship (extends, implements, outer, fields, signatures) is an
//! id edge. Instantiations of generic types are cached in the arena so that
//! repeated requests for the same substitution return the same id, which in
//! turn makes type equality a plain id comparison.

pub mod resolve;
pub mod types;

pub use resolve::Resolver;
pub use types::{
    MethodLookupError, MethodSignature, ModifiedType, Modifiers, Primitive, SigId, TypeArena,
    TypeId, TypeKind,
};
