//! The arena-backed Shadow type model.
//!
//! All types are interned: primitives and the well-known reference types are
//! seeded at construction, arrays and sequences are deduplicated on demand,
//! and generic instantiations are cached under their substitution so that
//! two requests for `List<int>` yield the same [`TypeId`]. Equality is
//! therefore id equality everywhere, including type arguments.

use shadow_ast::{Literal, Span, TypeRef};
use std::collections::HashMap;
use std::fmt;

/// Handle to an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Handle to a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigId(pub u32);

/// Modifier bitset; mirrors the source-level modifier keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(pub u32);

impl Modifiers {
    pub const PUBLIC: Modifiers = Modifiers(1 << 0);
    pub const PRIVATE: Modifiers = Modifiers(1 << 1);
    pub const IMMUTABLE: Modifiers = Modifiers(1 << 2);
    pub const NULLABLE: Modifiers = Modifiers(1 << 3);
    pub const READONLY: Modifiers = Modifiers(1 << 4);
    pub const CONSTANT: Modifiers = Modifiers(1 << 5);
    pub const GET: Modifiers = Modifiers(1 << 6);
    pub const SET: Modifiers = Modifiers(1 << 7);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 | other.0)
    }

    pub fn without(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 & !other.0)
    }

    pub fn is_public(self) -> bool {
        self.contains(Modifiers::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Modifiers::PRIVATE)
    }

    pub fn is_nullable(self) -> bool {
        self.contains(Modifiers::NULLABLE)
    }

    pub fn is_constant(self) -> bool {
        self.contains(Modifiers::CONSTANT)
    }

    pub fn from_ast(list: &[shadow_ast::Modifier]) -> Modifiers {
        let mut modifiers = Modifiers::default();
        for m in list {
            modifiers = modifiers.with(match m {
                shadow_ast::Modifier::Public => Modifiers::PUBLIC,
                shadow_ast::Modifier::Private => Modifiers::PRIVATE,
                shadow_ast::Modifier::Immutable => Modifiers::IMMUTABLE,
                shadow_ast::Modifier::Nullable => Modifiers::NULLABLE,
                shadow_ast::Modifier::Readonly => Modifiers::READONLY,
                shadow_ast::Modifier::Constant => Modifiers::CONSTANT,
                shadow_ast::Modifier::Get => Modifiers::GET,
                shadow_ast::Modifier::Set => Modifiers::SET,
            });
        }
        modifiers
    }
}

/// A type together with the modifiers of the position using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModifiedType {
    pub ty: TypeId,
    pub modifiers: Modifiers,
}

impl ModifiedType {
    pub fn new(ty: TypeId) -> Self {
        ModifiedType {
            ty,
            modifiers: Modifiers::default(),
        }
    }

    pub fn nullable(ty: TypeId) -> Self {
        ModifiedType {
            ty,
            modifiers: Modifiers::NULLABLE,
        }
    }
}

/// The enumerated primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Code,
    Long,
    ULong,
    Float,
    Double,
}

impl Primitive {
    pub const ALL: [Primitive; 12] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::UByte,
        Primitive::Short,
        Primitive::UShort,
        Primitive::Int,
        Primitive::UInt,
        Primitive::Code,
        Primitive::Long,
        Primitive::ULong,
        Primitive::Float,
        Primitive::Double,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::UByte => "ubyte",
            Primitive::Short => "short",
            Primitive::UShort => "ushort",
            Primitive::Int => "int",
            Primitive::UInt => "uint",
            Primitive::Code => "code",
            Primitive::Long => "long",
            Primitive::ULong => "ulong",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    /// Width in bytes; also the field-ordering key.
    pub fn width(self) -> u32 {
        match self {
            Primitive::Boolean | Primitive::Byte | Primitive::UByte => 1,
            Primitive::Short | Primitive::UShort => 2,
            Primitive::Int | Primitive::UInt | Primitive::Code | Primitive::Float => 4,
            Primitive::Long | Primitive::ULong | Primitive::Double => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Primitive::Float | Primitive::Double | Primitive::Boolean)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Primitive::Float | Primitive::Double)
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Primitive::ALL.iter().copied().find(|p| p.name() == name)
    }
}

/// The closed set of type variants.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Primitive(Primitive),
    Class { extends: Option<TypeId> },
    Interface,
    Attribute,
    Array { base: TypeId, nullable: bool },
    Sequence(Vec<ModifiedType>),
    Method { params: TypeId, returns: TypeId },
    TypeParameter { bounds: Vec<TypeId> },
    Unknown,
    Null,
}

/// A declared or inherited field.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    pub name: String,
    pub ty: ModifiedType,
    pub span: Span,
    pub unused: bool,
    pub has_init: bool,
    /// Compile-time value for `constant` fields, once folded.
    pub const_value: Option<Literal>,
}

/// A method signature; overloads of one name are separate entries.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: String,
    pub outer: TypeId,
    pub modifiers: Modifiers,
    pub param_names: Vec<String>,
    pub params: Vec<ModifiedType>,
    pub returns: Vec<ModifiedType>,
    pub span: Span,
    /// Index into the declaring type's method list, in declaration order.
    pub decl_index: usize,
    pub is_import: bool,
    pub is_export: bool,
    pub unused: bool,
}

impl MethodSignature {
    pub fn is_create(&self) -> bool {
        self.name == "create"
    }

    pub fn is_destroy(&self) -> bool {
        self.name == "destroy"
    }

    pub fn is_copy(&self) -> bool {
        self.name == "copy"
    }
}

/// One interned type.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub name: String,
    pub package: Vec<String>,
    pub modifiers: Modifiers,
    pub kind: TypeKind,
    pub outer: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub type_params: Vec<ModifiedType>,
    pub type_args: Vec<ModifiedType>,
    pub inner: Vec<(String, TypeId)>,
    pub fields: Vec<FieldEntry>,
    pub methods: Vec<SigId>,
    pub referenced: Vec<TypeId>,
    /// The uninstantiated generic this entry was produced from; self for
    /// uninstantiated types.
    pub without_args: TypeId,
}

/// Overload resolution failure, distinguishing the two reportable cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodLookupError {
    NotFound,
    Ambiguous,
}

impl fmt::Display for MethodLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodLookupError::NotFound => write!(f, "no matching method"),
            MethodLookupError::Ambiguous => write!(f, "ambiguous method call"),
        }
    }
}

/// Ids of the types every compilation depends on.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub object: TypeId,
    pub class: TypeId,
    pub generic_class: TypeId,
    pub array: TypeId,
    pub array_nullable: TypeId,
    pub exception: TypeId,
    pub string: TypeId,
    pub console: TypeId,
    pub unknown: TypeId,
    pub null: TypeId,
    pub void: TypeId,
    pub primitives: [TypeId; 12],
}

/// Per-compilation type storage.
pub struct TypeArena {
    entries: Vec<TypeEntry>,
    signatures: Vec<MethodSignature>,
    arrays: HashMap<(TypeId, bool), TypeId>,
    sequences: HashMap<Vec<ModifiedType>, TypeId>,
    instantiations: HashMap<(TypeId, Vec<ModifiedType>), TypeId>,
    /// Table backing the AST's opaque `TypeRef` annotations.
    modified: Vec<ModifiedType>,
    modified_lookup: HashMap<ModifiedType, TypeRef>,
    pub well_known: WellKnown,
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeArena {
    pub fn new() -> Self {
        let mut arena = TypeArena {
            entries: Vec::new(),
            signatures: Vec::new(),
            arrays: HashMap::new(),
            sequences: HashMap::new(),
            instantiations: HashMap::new(),
            modified: Vec::new(),
            modified_lookup: HashMap::new(),
            // Placeholder; replaced below once the seeds exist.
            well_known: WellKnown {
                object: TypeId(0),
                class: TypeId(0),
                generic_class: TypeId(0),
                array: TypeId(0),
                array_nullable: TypeId(0),
                exception: TypeId(0),
                string: TypeId(0),
                console: TypeId(0),
                unknown: TypeId(0),
                null: TypeId(0),
                void: TypeId(0),
                primitives: [TypeId(0); 12],
            },
        };
        arena.seed();
        arena
    }

    fn seed(&mut self) {
        let std_package = vec!["shadow".to_string(), "standard".to_string()];

        let object = self.push_named(
            "Object",
            std_package.clone(),
            TypeKind::Class { extends: None },
        );
        let class = self.push_extending("Class", std_package.clone(), object);
        let generic_class = self.push_extending("GenericClass", std_package.clone(), class);
        let exception = self.push_extending("Exception", std_package.clone(), object);
        let string = self.push_extending("String", std_package.clone(), object);
        let console = self.push_extending("Console", std_package.clone(), object);

        // The generic Array/ArrayNullable classes each carry one parameter.
        let array = self.push_extending("Array", std_package.clone(), object);
        let array_param = self.push_named(
            "T",
            Vec::new(),
            TypeKind::TypeParameter { bounds: Vec::new() },
        );
        self.entries[array.0 as usize].type_params = vec![ModifiedType::new(array_param)];
        let array_nullable = self.push_extending("ArrayNullable", std_package.clone(), object);
        let nullable_param = self.push_named(
            "T",
            Vec::new(),
            TypeKind::TypeParameter { bounds: Vec::new() },
        );
        self.entries[array_nullable.0 as usize].type_params =
            vec![ModifiedType::new(nullable_param)];

        let unknown = self.push_named("Unknown", Vec::new(), TypeKind::Unknown);
        let null = self.push_named("null", Vec::new(), TypeKind::Null);
        let void = self.push_named("void", Vec::new(), TypeKind::Sequence(Vec::new()));
        self.sequences.insert(Vec::new(), void);

        let mut primitives = [TypeId(0); 12];
        for (i, p) in Primitive::ALL.iter().enumerate() {
            primitives[i] = self.push_named(p.name(), Vec::new(), TypeKind::Primitive(*p));
        }

        self.well_known = WellKnown {
            object,
            class,
            generic_class,
            array,
            array_nullable,
            exception,
            string,
            console,
            unknown,
            null,
            void,
            primitives,
        };

        // String:create(), Exception:create(String) and Console.printLine
        // exist in every compilation so the resolver and the main shim can
        // target them without the standard library's sources.
        let string_mt = ModifiedType::new(string);
        self.add_signature(MethodSignature {
            name: "create".to_string(),
            outer: exception,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["message".to_string()],
            params: vec![string_mt],
            returns: vec![ModifiedType::new(exception)],
            span: 0..0,
            decl_index: 0,
            is_import: true,
            is_export: false,
            unused: false,
        });
        self.add_signature(MethodSignature {
            name: "printLine".to_string(),
            outer: console,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["value".to_string()],
            params: vec![string_mt],
            returns: vec![ModifiedType::new(console)],
            span: 0..0,
            decl_index: 0,
            is_import: true,
            is_export: false,
            unused: false,
        });
        self.add_signature(MethodSignature {
            name: "printError".to_string(),
            outer: console,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["value".to_string()],
            params: vec![string_mt],
            returns: vec![ModifiedType::new(console)],
            span: 0..0,
            decl_index: 1,
            is_import: true,
            is_export: false,
            unused: false,
        });
    }

    fn push_named(&mut self, name: &str, package: Vec<String>, kind: TypeKind) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            name: name.to_string(),
            package,
            modifiers: Modifiers::PUBLIC,
            kind,
            outer: None,
            interfaces: Vec::new(),
            type_params: Vec::new(),
            type_args: Vec::new(),
            inner: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            referenced: Vec::new(),
            without_args: id,
        });
        id
    }

    fn push_extending(&mut self, name: &str, package: Vec<String>, parent: TypeId) -> TypeId {
        self.push_named(
            name,
            package,
            TypeKind::Class {
                extends: Some(parent),
            },
        )
    }

    /// Registers a user-declared type. The resolver fills in members later.
    pub fn declare(
        &mut self,
        name: &str,
        package: Vec<String>,
        modifiers: Modifiers,
        kind: TypeKind,
        outer: Option<TypeId>,
    ) -> TypeId {
        let id = self.push_named(name, package, kind);
        self.entries[id.0 as usize].modifiers = modifiers;
        self.entries[id.0 as usize].outer = outer;
        id
    }

    pub fn entry(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.0 as usize]
    }

    pub fn entry_mut(&mut self, id: TypeId) -> &mut TypeEntry {
        &mut self.entries[id.0 as usize]
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.entries[id.0 as usize].kind
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.entries[id.0 as usize].name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.entries.len() as u32).map(TypeId)
    }

    /// Package-qualified display name, `shadow:standard@Object` style, with
    /// inner types separated from their outer type by `:`.
    pub fn qualified_name(&self, id: TypeId) -> String {
        let entry = self.entry(id);
        let mut name = if let Some(outer) = entry.outer {
            format!("{}:{}", self.qualified_name(outer), entry.name)
        } else if entry.package.is_empty() {
            entry.name.clone()
        } else {
            format!("{}@{}", entry.package.join(":"), entry.name)
        };
        if !entry.type_args.is_empty() {
            let args: Vec<String> = entry
                .type_args
                .iter()
                .map(|a| self.qualified_name(a.ty))
                .collect();
            name.push('<');
            name.push_str(&args.join(","));
            name.push('>');
        }
        name
    }

    pub fn add_signature(&mut self, signature: MethodSignature) -> SigId {
        let outer = signature.outer;
        let id = SigId(self.signatures.len() as u32);
        self.signatures.push(signature);
        self.entries[outer.0 as usize].methods.push(id);
        id
    }

    pub fn signature(&self, id: SigId) -> &MethodSignature {
        &self.signatures[id.0 as usize]
    }

    pub fn signature_mut(&mut self, id: SigId) -> &mut MethodSignature {
        &mut self.signatures[id.0 as usize]
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Interns a (type, modifiers) pair for AST annotation.
    pub fn type_ref(&mut self, modified: ModifiedType) -> TypeRef {
        if let Some(existing) = self.modified_lookup.get(&modified) {
            return *existing;
        }
        let r = TypeRef(self.modified.len() as u32);
        self.modified.push(modified);
        self.modified_lookup.insert(modified, r);
        r
    }

    pub fn resolve_ref(&self, r: TypeRef) -> ModifiedType {
        self.modified[r.0 as usize]
    }

    // ----- interning of composite types -----

    pub fn primitive(&self, p: Primitive) -> TypeId {
        self.well_known.primitives[Primitive::ALL.iter().position(|q| *q == p).unwrap()]
    }

    /// Interned array type over `base`; multi-dimensional arrays nest.
    pub fn array_of(&mut self, base: TypeId, nullable: bool) -> TypeId {
        if let Some(existing) = self.arrays.get(&(base, nullable)) {
            return *existing;
        }
        let extends = if nullable {
            self.well_known.array_nullable
        } else {
            self.well_known.array
        };
        let name = format!("{}[]", self.entry(base).name);
        let id = self.push_named(&name, Vec::new(), TypeKind::Array { base, nullable });
        self.entries[id.0 as usize].interfaces = Vec::new();
        self.entries[id.0 as usize].referenced = vec![extends, base];
        self.arrays.insert((base, nullable), id);
        id
    }

    pub fn array_with_dims(&mut self, base: TypeId, dims: usize, nullable: bool) -> TypeId {
        let mut ty = base;
        for _ in 0..dims {
            ty = self.array_of(ty, nullable);
        }
        ty
    }

    /// Interned sequence type. A size-0 sequence is `void`; a size-1
    /// sequence does not unwrap here, callers unwrap where transparency
    /// is required.
    pub fn sequence(&mut self, elements: Vec<ModifiedType>) -> TypeId {
        if let Some(existing) = self.sequences.get(&elements) {
            return *existing;
        }
        let name = format!("({})", elements.len());
        let id = self.push_named(&name, Vec::new(), TypeKind::Sequence(elements.clone()));
        self.sequences.insert(elements, id);
        id
    }

    pub fn method_type(&mut self, params: TypeId, returns: TypeId) -> TypeId {
        let id = self.push_named("method", Vec::new(), TypeKind::Method { params, returns });
        id
    }

    // ----- predicates -----

    pub fn is_primitive(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Primitive(_))
    }

    pub fn is_reference(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Class { .. }
                | TypeKind::Interface
                | TypeKind::Array { .. }
                | TypeKind::TypeParameter { .. }
        )
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Interface)
    }

    pub fn is_class(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Class { .. })
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        id == self.well_known.void
    }

    /// Field-ordering and override-compatibility width. References are 6,
    /// arrays the sentinel 5, interfaces twice the reference width.
    pub fn width(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Primitive(p) => p.width(),
            TypeKind::Array { .. } => 5,
            TypeKind::Interface => 12,
            _ => 6,
        }
    }

    pub fn extends_of(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Class { extends } => *extends,
            TypeKind::Array { nullable, .. } => Some(if *nullable {
                self.well_known.array_nullable
            } else {
                self.well_known.array
            }),
            _ => None,
        }
    }

    /// True when the type transitively mentions no free type parameter.
    pub fn is_fully_instantiated(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::TypeParameter { .. } => false,
            TypeKind::Array { base, .. } => self.is_fully_instantiated(*base),
            TypeKind::Sequence(elements) => {
                elements.iter().all(|e| self.is_fully_instantiated(e.ty))
            }
            _ => {
                let entry = self.entry(id);
                if entry.type_args.is_empty() {
                    entry.type_params.is_empty()
                } else {
                    entry
                        .type_args
                        .iter()
                        .all(|a| self.is_fully_instantiated(a.ty))
                }
            }
        }
    }

    /// True when the type is a generic definition with no arguments applied.
    pub fn is_uninstantiated(&self, id: TypeId) -> bool {
        let entry = self.entry(id);
        !entry.type_params.is_empty() && entry.type_args.is_empty()
    }

    pub fn is_recursively_parameterized(&self, id: TypeId) -> bool {
        let entry = self.entry(id);
        if !entry.type_params.is_empty() {
            return true;
        }
        match self.kind(id) {
            TypeKind::Array { base, .. } => self.is_recursively_parameterized(*base),
            TypeKind::TypeParameter { .. } => true,
            _ => {
                if let Some(parent) = self.extends_of(id) {
                    if self.is_recursively_parameterized(parent) {
                        return true;
                    }
                }
                entry
                    .interfaces
                    .iter()
                    .chain(entry.inner.iter().map(|(_, id)| id))
                    .any(|t| self.is_recursively_parameterized(*t))
            }
        }
    }

    // ----- equality and subtyping -----

    /// Nominal equality including type arguments. Interning makes this id
    /// equality; it is reflexive and symmetric by construction.
    pub fn equals(&self, a: TypeId, b: TypeId) -> bool {
        a == b
    }

    /// Transitive interface closure, including self for interfaces,
    /// deduplicated by type equality (ids, hence including type arguments).
    pub fn get_all_interfaces(&self, id: TypeId) -> Vec<TypeId> {
        let mut out = Vec::new();
        self.collect_interfaces(id, &mut out);
        if self.is_interface(id) && !out.contains(&id) {
            out.push(id);
        }
        out
    }

    fn collect_interfaces(&self, id: TypeId, out: &mut Vec<TypeId>) {
        for interface in &self.entry(id).interfaces {
            if !out.contains(interface) {
                out.push(*interface);
                self.collect_interfaces(*interface, out);
            }
        }
        if let Some(parent) = self.extends_of(id) {
            self.collect_interfaces(parent, out);
        }
    }

    pub fn has_interface(&self, id: TypeId, interface: TypeId) -> bool {
        self.get_all_interfaces(id).contains(&interface)
    }

    /// The subtype relation. Reflexive; `Object` is a supertype of every
    /// reference and primitive type; numeric types are disjoint; arrays are
    /// invariant over base type and nullability.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if self.kind(sub) == &TypeKind::Unknown || self.kind(sup) == &TypeKind::Unknown {
            return false;
        }
        if sub == sup {
            return true;
        }
        if sup == self.well_known.object {
            // Everything that can live in an object reference, primitives
            // included; sequences and the unknown type cannot.
            return !matches!(self.kind(sub), TypeKind::Sequence(_) | TypeKind::Unknown);
        }
        match self.kind(sub) {
            TypeKind::Null => self.is_reference(sup),
            TypeKind::Primitive(_) => false,
            // Arrays are invariant over base type and nullability, and ids
            // are interned, so any distinct array id is not a subtype.
            TypeKind::Array { .. } => false,
            TypeKind::Sequence(sub_elements) => match self.kind(sup) {
                TypeKind::Sequence(sup_elements) => {
                    sub_elements.len() == sup_elements.len()
                        && sub_elements
                            .iter()
                            .zip(sup_elements)
                            .all(|(a, b)| self.is_subtype(a.ty, b.ty))
                }
                _ => false,
            },
            TypeKind::TypeParameter { bounds } => {
                bounds.iter().any(|b| self.is_subtype(*b, sup))
            }
            TypeKind::Interface => {
                self.is_interface(sup) && self.get_all_interfaces(sub).contains(&sup)
            }
            TypeKind::Class { .. } => {
                if self.is_interface(sup) {
                    return self.get_all_interfaces(sub).contains(&sup);
                }
                let mut current = self.extends_of(sub);
                while let Some(parent) = current {
                    if parent == sup {
                        return true;
                    }
                    current = self.extends_of(parent);
                }
                false
            }
            TypeKind::Method { .. } | TypeKind::Attribute | TypeKind::Unknown => false,
        }
    }

    /// Assignment compatibility of modified types: the value type must be a
    /// subtype, and `null` (or a nullable source) requires a nullable target.
    pub fn is_assignable(&self, value: ModifiedType, target: ModifiedType) -> bool {
        if value.ty == self.well_known.null {
            return target.modifiers.is_nullable()
                || matches!(self.kind(target.ty), TypeKind::Array { nullable: true, .. });
        }
        if value.modifiers.is_nullable() && !target.modifiers.is_nullable() {
            return false;
        }
        self.is_subtype(value.ty, target.ty)
    }

    // ----- generic instantiation -----

    /// Substitutes `formals` with `actuals` throughout the type, caching the
    /// result on the uninstantiated generic so identity holds: repeated
    /// requests for the same substitution return the same id.
    pub fn replace(
        &mut self,
        id: TypeId,
        formals: &[TypeId],
        actuals: &[ModifiedType],
    ) -> anyhow::Result<TypeId> {
        anyhow::ensure!(
            formals.len() == actuals.len(),
            "substitution arity mismatch: {} formals, {} actuals",
            formals.len(),
            actuals.len()
        );
        Ok(self.replace_inner(id, formals, actuals))
    }

    fn replace_inner(&mut self, id: TypeId, formals: &[TypeId], actuals: &[ModifiedType]) -> TypeId {
        if let Some(position) = formals.iter().position(|f| *f == id) {
            return actuals[position].ty;
        }

        match self.kind(id).clone() {
            TypeKind::Primitive(_) | TypeKind::Unknown | TypeKind::Null | TypeKind::Attribute => id,
            TypeKind::TypeParameter { .. } => id,
            TypeKind::Array { base, nullable } => {
                let replaced = self.replace_inner(base, formals, actuals);
                if replaced == base {
                    id
                } else {
                    self.array_of(replaced, nullable)
                }
            }
            TypeKind::Sequence(elements) => {
                let replaced: Vec<ModifiedType> = elements
                    .iter()
                    .map(|e| ModifiedType {
                        ty: self.replace_inner(e.ty, formals, actuals),
                        modifiers: e.modifiers,
                    })
                    .collect();
                if replaced == elements {
                    id
                } else {
                    self.sequence(replaced)
                }
            }
            TypeKind::Method { params, returns } => {
                let p = self.replace_inner(params, formals, actuals);
                let r = self.replace_inner(returns, formals, actuals);
                if p == params && r == returns {
                    id
                } else {
                    self.method_type(p, r)
                }
            }
            TypeKind::Class { .. } | TypeKind::Interface => {
                if !self.is_recursively_parameterized(id) {
                    return id;
                }
                let without_args = self.entry(id).without_args;
                let key = (without_args, actuals.to_vec());
                if let Some(cached) = self.instantiations.get(&key) {
                    return *cached;
                }

                // Insert the skeleton before recursing so cyclic references
                // (a class mentioning itself through a field or interface)
                // resolve to the instantiation under construction.
                let source = self.entry(id).clone();
                let new_id = TypeId(self.entries.len() as u32);
                let mut skeleton = source.clone();
                skeleton.interfaces = Vec::new();
                skeleton.fields = Vec::new();
                skeleton.methods = Vec::new();
                skeleton.inner = Vec::new();
                skeleton.referenced = Vec::new();
                skeleton.type_args = actuals.to_vec();
                skeleton.without_args = without_args;
                self.entries.push(skeleton);
                self.instantiations.insert(key, new_id);

                let kind = match source.kind {
                    TypeKind::Class { extends } => TypeKind::Class {
                        extends: extends.map(|e| self.replace_inner(e, formals, actuals)),
                    },
                    other => other,
                };
                let interfaces: Vec<TypeId> = source
                    .interfaces
                    .iter()
                    .map(|i| self.replace_inner(*i, formals, actuals))
                    .collect();
                let fields: Vec<FieldEntry> = source
                    .fields
                    .iter()
                    .map(|f| FieldEntry {
                        ty: ModifiedType {
                            ty: self.replace_inner(f.ty.ty, formals, actuals),
                            modifiers: f.ty.modifiers,
                        },
                        ..f.clone()
                    })
                    .collect();
                let mut methods = Vec::new();
                for sig_id in &source.methods {
                    let sig = self.signature(*sig_id).clone();
                    let params: Vec<ModifiedType> = sig
                        .params
                        .iter()
                        .map(|p| ModifiedType {
                            ty: self.replace_inner(p.ty, formals, actuals),
                            modifiers: p.modifiers,
                        })
                        .collect();
                    let returns: Vec<ModifiedType> = sig
                        .returns
                        .iter()
                        .map(|r| ModifiedType {
                            ty: self.replace_inner(r.ty, formals, actuals),
                            modifiers: r.modifiers,
                        })
                        .collect();
                    let new_sig = SigId(self.signatures.len() as u32);
                    self.signatures.push(MethodSignature {
                        outer: new_id,
                        params,
                        returns,
                        ..sig
                    });
                    methods.push(new_sig);
                }

                let entry = &mut self.entries[new_id.0 as usize];
                entry.kind = kind;
                entry.interfaces = interfaces;
                entry.fields = fields;
                entry.methods = methods;
                new_id
            }
        }
    }

    /// Instantiates a generic type with the given arguments.
    pub fn instantiate(&mut self, generic: TypeId, args: &[ModifiedType]) -> anyhow::Result<TypeId> {
        let formals: Vec<TypeId> = self
            .entry(generic)
            .type_params
            .iter()
            .map(|p| p.ty)
            .collect();
        anyhow::ensure!(
            formals.len() == args.len(),
            "type {} expects {} type arguments, got {}",
            self.qualified_name(generic),
            formals.len(),
            args.len()
        );
        self.replace(generic, &formals, args)
    }

    /// The generic `Array<T>`/`ArrayNullable<T>` view of an array type.
    pub fn convert_to_generic(&mut self, array: TypeId) -> TypeId {
        match self.kind(array) {
            TypeKind::Array { base, nullable } => {
                let (base, nullable) = (*base, *nullable);
                let generic = if nullable {
                    self.well_known.array_nullable
                } else {
                    self.well_known.array
                };
                self.instantiate(generic, &[ModifiedType::new(base)])
                    .expect("array classes take one parameter")
            }
            _ => array,
        }
    }

    // ----- fields and methods -----

    /// All fields including inherited ones, parent layout first, each
    /// type's own fields ordered widest-first (stable within equal widths).
    pub fn order_all_fields(&self, id: TypeId) -> Vec<(TypeId, FieldEntry)> {
        let mut out = Vec::new();
        if let Some(parent) = self.extends_of(id) {
            out.extend(self.order_all_fields(parent));
        }
        let mut own: Vec<(TypeId, FieldEntry)> = self
            .entry(id)
            .fields
            .iter()
            .filter(|f| !f.ty.modifiers.is_constant())
            .map(|f| (id, f.clone()))
            .collect();
        own.sort_by_key(|(_, f)| std::cmp::Reverse(self.width(f.ty.ty)));
        out.extend(own);
        out
    }

    pub fn find_field(&self, id: TypeId, name: &str) -> Option<(TypeId, FieldEntry)> {
        let mut current = Some(id);
        while let Some(ty) = current {
            if let Some(field) = self.entry(ty).fields.iter().find(|f| f.name == name) {
                return Some((ty, field.clone()));
            }
            current = self.extends_of(ty);
        }
        None
    }

    /// All signatures visible on `id` with the given name, own declarations
    /// first, then inherited (extends chain, interfaces, Object).
    fn visible_signatures(&self, id: TypeId, name: &str) -> Vec<(SigId, bool)> {
        let mut out: Vec<(SigId, bool)> = Vec::new();
        let mut seen_types = Vec::new();
        let mut stack = vec![(id, true)];
        while let Some((ty, declared_here)) = stack.pop() {
            if seen_types.contains(&ty) {
                continue;
            }
            seen_types.push(ty);
            for sig_id in &self.entry(ty).methods {
                if self.signature(*sig_id).name == name {
                    out.push((*sig_id, declared_here));
                }
            }
            if let Some(parent) = self.extends_of(ty) {
                stack.push((parent, false));
            }
            for interface in &self.entry(ty).interfaces {
                stack.push((*interface, false));
            }
        }
        // Interfaces never reach Object through an extends chain, but its
        // methods are still callable on them.
        if !seen_types.contains(&self.well_known.object) {
            for sig_id in &self.entry(self.well_known.object).methods {
                if self.signature(*sig_id).name == name {
                    out.push((*sig_id, false));
                }
            }
        }
        out
    }

    /// Overload resolution: filter by name, arity, and argument
    /// compatibility, then keep the most-specific applicable candidates.
    /// Tie-breaks prefer declarations on the receiver type over inherited
    /// ones, then first declaration order. Incomparable survivors are an
    /// ambiguity.
    pub fn get_matching_method(
        &self,
        id: TypeId,
        name: &str,
        args: &[ModifiedType],
    ) -> Result<SigId, MethodLookupError> {
        let target = match self.kind(id) {
            TypeKind::Array { .. } => self.entry(id).referenced[0],
            _ => id,
        };

        let candidates: Vec<(SigId, bool)> = self
            .visible_signatures(target, name)
            .into_iter()
            .filter(|(sig_id, _)| {
                let sig = self.signature(*sig_id);
                sig.params.len() == args.len()
                    && args
                        .iter()
                        .zip(&sig.params)
                        .all(|(a, p)| self.is_assignable(*a, *p))
            })
            .collect();

        if candidates.is_empty() {
            return Err(MethodLookupError::NotFound);
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].0);
        }

        let more_specific = |a: SigId, b: SigId| -> bool {
            let sa = self.signature(a);
            let sb = self.signature(b);
            sa.params
                .iter()
                .zip(&sb.params)
                .all(|(x, y)| self.is_subtype(x.ty, y.ty))
        };

        let mut best: Vec<(SigId, bool)> = candidates
            .iter()
            .copied()
            .filter(|(a, _)| {
                !candidates
                    .iter()
                    .any(|(b, _)| b != a && more_specific(*b, *a) && !more_specific(*a, *b))
            })
            .collect();

        if best.iter().any(|(_, here)| *here) {
            best.retain(|(_, here)| *here);
        }
        if best.len() > 1 {
            // Equal-parameter survivors collapse to declaration order;
            // incomparable ones are a genuine ambiguity.
            let comparable = best.iter().all(|(a, _)| {
                best.iter()
                    .all(|(b, _)| more_specific(*a, *b) && more_specific(*b, *a))
            });
            if !comparable {
                return Err(MethodLookupError::Ambiguous);
            }
            best.sort_by_key(|(sig, _)| self.signature(*sig).decl_index);
        }
        Ok(best[0].0)
    }

    /// Method-table layout: the parent's (or parent interfaces') slots
    /// first, overrides replacing in place, new methods appended. Creates
    /// and private methods are dispatched directly and take no slot.
    pub fn order_all_methods(&self, id: TypeId) -> Vec<SigId> {
        let mut list: Vec<SigId> = Vec::new();
        match self.kind(id) {
            TypeKind::Interface => {
                for parent in self.entry(id).interfaces.clone() {
                    for sig in self.order_all_methods(parent) {
                        merge_slot(self, &mut list, sig);
                    }
                }
            }
            _ => {
                if let Some(parent) = self.extends_of(id) {
                    list = self.order_all_methods(parent);
                }
            }
        }
        for sig_id in &self.entry(id).methods {
            let sig = self.signature(*sig_id);
            if sig.is_create() || sig.modifiers.is_private() {
                continue;
            }
            merge_slot(self, &mut list, *sig_id);
        }
        list
    }

    /// The slot a method occupies in its receiver's table.
    pub fn method_index(&self, receiver: TypeId, sig: SigId) -> Option<usize> {
        let target = self.signature(sig);
        self.order_all_methods(receiver).iter().position(|s| {
            let candidate = self.signature(*s);
            candidate.name == target.name && candidate.params.len() == target.params.len()
        })
    }

    /// The transitive reference closure used when a module is built: extend,
    /// interfaces, inner, outer, and referenced types, restricted to types
    /// that are fully instantiated or uninstantiated definitions.
    pub fn reference_closure(&self, roots: &[TypeId]) -> Vec<TypeId> {
        let mut out: Vec<TypeId> = Vec::new();
        let mut stack: Vec<TypeId> = roots.to_vec();
        while let Some(ty) = stack.pop() {
            if out.contains(&ty) {
                continue;
            }
            if !(self.is_fully_instantiated(ty) || self.is_uninstantiated(ty)) {
                continue;
            }
            out.push(ty);
            let entry = self.entry(ty);
            if let Some(parent) = self.extends_of(ty) {
                stack.push(parent);
            }
            stack.extend(entry.interfaces.iter().copied());
            stack.extend(entry.inner.iter().map(|(_, id)| *id));
            if let Some(outer) = entry.outer {
                stack.push(outer);
            }
            stack.extend(entry.referenced.iter().copied());
            stack.extend(entry.type_args.iter().map(|a| a.ty));
        }
        out.sort();
        out
    }
}

/// Replaces an override's slot or appends a new one; overrides match by
/// name and arity.
fn merge_slot(arena: &TypeArena, list: &mut Vec<SigId>, sig_id: SigId) {
    let sig = arena.signature(sig_id);
    match list.iter().position(|s| {
        let existing = arena.signature(*s);
        existing.name == sig.name && existing.params.len() == sig.params.len()
    }) {
        Some(slot) => list[slot] = sig_id,
        None => list.push(sig_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(arena: &mut TypeArena, name: &str) -> TypeId {
        let object = arena.well_known.object;
        arena.declare(
            name,
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class {
                extends: Some(object),
            },
            None,
        )
    }

    #[test]
    fn every_class_is_a_subtype_of_object_and_itself() {
        let mut arena = TypeArena::new();
        let c = class(&mut arena, "C");
        assert!(arena.is_subtype(c, arena.well_known.object));
        assert!(arena.is_subtype(c, c));
        assert!(!arena.is_subtype(arena.well_known.object, c));
    }

    #[test]
    fn interfaces_contain_themselves_in_their_closure() {
        let mut arena = TypeArena::new();
        let i = arena.declare(
            "I",
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Interface,
            None,
        );
        assert!(arena.is_subtype(i, arena.well_known.object));
        assert!(arena.get_all_interfaces(i).contains(&i));
    }

    #[test]
    fn numeric_types_are_disjoint() {
        let arena = TypeArena::new();
        let int = arena.primitive(Primitive::Int);
        let long = arena.primitive(Primitive::Long);
        assert!(!arena.is_subtype(int, long));
        assert!(!arena.is_subtype(long, int));
        assert!(arena.is_subtype(int, arena.well_known.object));
    }

    #[test]
    fn array_subtyping_is_invariant() {
        let mut arena = TypeArena::new();
        let c = class(&mut arena, "C");
        let d = arena.declare(
            "D",
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class { extends: Some(c) },
            None,
        );
        let c_array = arena.array_of(c, false);
        let d_array = arena.array_of(d, false);
        let c_nullable = arena.array_of(c, true);
        assert!(arena.is_subtype(d, c));
        assert!(!arena.is_subtype(d_array, c_array));
        assert!(!arena.is_subtype(c_nullable, c_array));
        assert!(arena.is_subtype(c_array, arena.well_known.object));
    }

    #[test]
    fn instantiation_is_cached_for_identity() {
        let mut arena = TypeArena::new();
        let param = arena.declare(
            "T",
            Vec::new(),
            Modifiers::default(),
            TypeKind::TypeParameter { bounds: Vec::new() },
            None,
        );
        let object = arena.well_known.object;
        let list = arena.declare(
            "List",
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class {
                extends: Some(object),
            },
            None,
        );
        arena.entry_mut(list).type_params = vec![ModifiedType::new(param)];

        let int = arena.primitive(Primitive::Int);
        let string = arena.well_known.string;
        let list_int_a = arena.instantiate(list, &[ModifiedType::new(int)]).unwrap();
        let list_int_b = arena.instantiate(list, &[ModifiedType::new(int)]).unwrap();
        let list_string = arena
            .instantiate(list, &[ModifiedType::new(string)])
            .unwrap();
        assert_eq!(list_int_a, list_int_b);
        assert_ne!(list_int_a, list_string);
        assert_eq!(arena.entry(list_int_a).without_args, list);
    }

    #[test]
    fn replace_substitutes_field_and_method_types() {
        let mut arena = TypeArena::new();
        let param = arena.declare(
            "T",
            Vec::new(),
            Modifiers::default(),
            TypeKind::TypeParameter { bounds: Vec::new() },
            None,
        );
        let object = arena.well_known.object;
        let boxy = arena.declare(
            "Box",
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class {
                extends: Some(object),
            },
            None,
        );
        arena.entry_mut(boxy).type_params = vec![ModifiedType::new(param)];
        arena.entry_mut(boxy).fields.push(FieldEntry {
            name: "value".to_string(),
            ty: ModifiedType::new(param),
            span: 0..0,
            unused: false,
            has_init: false,
            const_value: None,
        });
        arena.add_signature(MethodSignature {
            name: "get".to_string(),
            outer: boxy,
            modifiers: Modifiers::PUBLIC,
            param_names: Vec::new(),
            params: Vec::new(),
            returns: vec![ModifiedType::new(param)],
            span: 0..0,
            decl_index: 0,
            is_import: false,
            is_export: false,
            unused: false,
        });

        let int = arena.primitive(Primitive::Int);
        let box_int = arena.instantiate(boxy, &[ModifiedType::new(int)]).unwrap();
        assert_eq!(arena.entry(box_int).fields[0].ty.ty, int);
        let get = arena.entry(box_int).methods[0];
        assert_eq!(arena.signature(get).returns[0].ty, int);
    }

    #[test]
    fn null_requires_a_nullable_target() {
        let mut arena = TypeArena::new();
        let c = class(&mut arena, "C");
        let null = arena.well_known.null;
        assert!(!arena.is_assignable(ModifiedType::new(null), ModifiedType::new(c)));
        assert!(arena.is_assignable(ModifiedType::new(null), ModifiedType::nullable(c)));
    }

    #[test]
    fn overload_resolution_prefers_most_specific() {
        let mut arena = TypeArena::new();
        let c = class(&mut arena, "C");
        let d = arena.declare(
            "D",
            vec!["test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class { extends: Some(c) },
            None,
        );
        let holder = class(&mut arena, "Holder");
        let wide = arena.add_signature(MethodSignature {
            name: "take".to_string(),
            outer: holder,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["x".to_string()],
            params: vec![ModifiedType::new(c)],
            returns: Vec::new(),
            span: 0..0,
            decl_index: 0,
            is_import: false,
            is_export: false,
            unused: false,
        });
        let narrow = arena.add_signature(MethodSignature {
            name: "take".to_string(),
            outer: holder,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["x".to_string()],
            params: vec![ModifiedType::new(d)],
            returns: Vec::new(),
            span: 0..0,
            decl_index: 1,
            is_import: false,
            is_export: false,
            unused: false,
        });

        let got = arena
            .get_matching_method(holder, "take", &[ModifiedType::new(d)])
            .unwrap();
        assert_eq!(got, narrow);
        let got = arena
            .get_matching_method(holder, "take", &[ModifiedType::new(c)])
            .unwrap();
        assert_eq!(got, wide);
        assert_eq!(
            arena.get_matching_method(holder, "gone", &[]),
            Err(MethodLookupError::NotFound)
        );
    }
}
