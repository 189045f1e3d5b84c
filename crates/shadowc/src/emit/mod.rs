//! LLVM IR text emission.
//!
//! One call to [`emit_module`] produces the complete `.ll` text for a
//! top-level module and its inner classes: named struct types for every
//! referenced class, external declarations for the runtime helpers, class
//! descriptor and method-table constants, one function definition per TAC
//! method, and the generic-/array-set globals whose sizes are patched in
//! once all instantiations have been seen.
//!
//! Emission is algebraic: each TAC variant renders through one textual
//! template, with operands substituted by the SSA name each node was given
//! when it was emitted. Temporaries count up from `parameters + 1`; labels
//! get monotonically increasing ids per method.

pub mod main_shim;
pub mod mangle;

use crate::tac::nodes::{BranchKind, CallFunction, LocalId, NodeId, RuntimeFn, TacKind};
use crate::tac::{TacMethod, TacModule};
use crate::typecheck::{MethodSignature, Primitive, SigId, TypeArena, TypeId, TypeKind};
use anyhow::{bail, Result};
use shadow_ast::{BinaryOp, Literal, UnaryOp};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

const CLASS_TYPE: &str = "%\"shadow.standard..Class\"";
const OBJECT_TYPE: &str = "%\"shadow.standard..Object\"*";

pub struct LlvmEmitter<'a> {
    arena: &'a TypeArena,
    /// Function definitions.
    body: String,
    /// String literal and singleton globals.
    globals: String,
    /// Per-method state.
    lines: Vec<String>,
    names: HashMap<NodeId, String>,
    label_ids: HashMap<NodeId, u32>,
    next_temp: u32,
    next_label: u32,
    current_fn: String,
    /// Module-wide collections.
    strings: Vec<String>,
    singletons: Vec<TypeId>,
    defined: HashSet<String>,
    externs: HashMap<String, String>,
    /// Effective signature each `MethodRef` dispatches through: the table
    /// slot for virtual calls, the declared signature otherwise.
    ref_sigs: HashMap<NodeId, (SigId, bool)>,
    next_synthetic: u32,
}

/// Emits the full LLVM module text for `module`.
pub fn emit_module(arena: &TypeArena, module: &TacModule) -> Result<String> {
    let mut emitter = LlvmEmitter {
        arena,
        body: String::new(),
        globals: String::new(),
        lines: Vec::new(),
        names: HashMap::new(),
        label_ids: HashMap::new(),
        next_temp: 0,
        next_label: 0,
        current_fn: String::new(),
        strings: Vec::new(),
        singletons: Vec::new(),
        defined: HashSet::new(),
        externs: HashMap::new(),
        ref_sigs: HashMap::new(),
        next_synthetic: 0,
    };
    emitter.run(module)
}

impl<'a> LlvmEmitter<'a> {
    fn run(&mut self, module: &TacModule) -> Result<String> {
        let modules = module.all_modules();

        // Everything defined in this translation unit, so declares are
        // only produced for the genuinely external.
        for class_module in &modules {
            for method in &class_module.methods {
                self.defined.insert(self.method_symbol(method));
            }
            if self.arena.is_class(class_module.ty) {
                let mangled = mangle::mangle(self.arena, class_module.ty);
                for interface in self.arena.get_all_interfaces(class_module.ty) {
                    self.defined.insert(format!(
                        "{}.itable.{}",
                        mangled,
                        mangle::mangle(self.arena, interface)
                    ));
                }
            }
        }
        for class_module in &modules {
            for method in &class_module.methods {
                self.emit_method(class_module.ty, method)?;
            }
        }

        // Descriptors and sets render into buffers first; both may add
        // external declarations that must precede them in the output.
        let mut descriptors = String::new();
        for class_module in &modules {
            self.emit_descriptors(&mut descriptors, class_module)?;
        }
        let mut sets = String::new();
        self.emit_sets(&mut sets, &module.references)?;

        let mut out = String::new();
        writeln!(
            out,
            "; ModuleID = '{}'",
            self.arena.qualified_name(module.ty)
        )?;
        writeln!(out)?;

        self.emit_types(&mut out, &module.references)?;
        self.emit_runtime_declarations(&mut out)?;
        for declaration in self.externs.values() {
            writeln!(out, "{}", declaration)?;
        }
        if !self.externs.is_empty() {
            writeln!(out)?;
        }

        // Descriptors of types compiled elsewhere are external constants;
        // instantiations and arrays get local linkonce copies below.
        let local: HashSet<TypeId> = modules.iter().map(|m| m.ty).collect();
        for ty in &module.references {
            if local.contains(ty)
                || !self.arena.entry(*ty).type_args.is_empty()
                || matches!(self.arena.kind(*ty), TypeKind::Array { .. })
            {
                continue;
            }
            if self.arena.is_class(*ty) || self.arena.is_interface(*ty) || self.arena.is_primitive(*ty)
            {
                writeln!(
                    out,
                    "@\"{}.class\" = external constant {}",
                    mangle::mangle(self.arena, *ty),
                    CLASS_TYPE
                )?;
            }
        }
        writeln!(out)?;

        out.push_str(&self.globals);
        out.push_str(&descriptors);
        out.push_str(&sets);
        out.push_str(&self.body);
        Ok(out)
    }

    // ----- types -----

    fn llvm_type(&self, ty: TypeId) -> String {
        match self.arena.kind(ty) {
            TypeKind::Primitive(p) => primitive_type(*p).to_string(),
            TypeKind::Array { .. } => {
                let (_, dims) = self.flatten_array(ty);
                format!("{{ i8*, [{} x i32] }}", dims)
            }
            TypeKind::Interface => "{ i8*, i8* }".to_string(),
            TypeKind::Class { .. } | TypeKind::Attribute => {
                format!("%\"{}\"*", mangle::mangle(self.arena, ty))
            }
            TypeKind::Sequence(elements) => {
                if elements.is_empty() {
                    "void".to_string()
                } else {
                    let inner: Vec<String> =
                        elements.iter().map(|e| self.llvm_type(e.ty)).collect();
                    format!("{{ {} }}", inner.join(", "))
                }
            }
            TypeKind::TypeParameter { .. } => OBJECT_TYPE.to_string(),
            TypeKind::Method { .. } | TypeKind::Unknown | TypeKind::Null => "i8*".to_string(),
        }
    }

    /// Innermost element type and total dimension count of an array type.
    fn flatten_array(&self, ty: TypeId) -> (TypeId, usize) {
        match self.arena.kind(ty) {
            TypeKind::Array { base, .. } => {
                let (element, dims) = self.flatten_array(*base);
                (element, dims + 1)
            }
            _ => (ty, 0),
        }
    }

    fn return_type(&self, signature: &MethodSignature) -> String {
        match signature.returns.len() {
            0 => "void".to_string(),
            1 => self.llvm_type(signature.returns[0].ty),
            _ => {
                let inner: Vec<String> = signature
                    .returns
                    .iter()
                    .map(|r| self.llvm_type(r.ty))
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
        }
    }

    /// The receiver slot of an interface method is a plain object pointer;
    /// a class method takes its own class pointer, matching its definition.
    fn this_type(&self, signature: &MethodSignature) -> String {
        if self.arena.is_interface(signature.outer) {
            OBJECT_TYPE.to_string()
        } else {
            self.llvm_type(signature.outer)
        }
    }

    fn function_type(&self, signature: &MethodSignature) -> String {
        let mut params = vec![self.this_type(signature)];
        params.extend(signature.params.iter().map(|p| self.llvm_type(p.ty)));
        format!("{} ({})*", self.return_type(signature), params.join(", "))
    }

    fn emit_types(&self, out: &mut String, references: &[TypeId]) -> Result<()> {
        for ty in references {
            let mangled = mangle::mangle(self.arena, *ty);
            match self.arena.kind(*ty) {
                TypeKind::Class { .. } => {
                    if *ty == self.arena.well_known.class {
                        // The descriptor layout the runtime reads: header,
                        // then name, parent, method table, interfaces,
                        // flags, size.
                        writeln!(
                            out,
                            "%\"{}\" = type {{ i64, {}*, i8*, i8*, {}*, i8*, i8*, i32, i32 }}",
                            mangled, CLASS_TYPE, CLASS_TYPE
                        )?;
                        continue;
                    }
                    if *ty == self.arena.well_known.generic_class {
                        writeln!(
                            out,
                            "%\"{}\" = type {{ i64, {}*, i8*, i8*, {}*, i8*, i8*, i32, i32, i8*, i8* }}",
                            mangled, CLASS_TYPE, CLASS_TYPE
                        )?;
                        continue;
                    }
                    let mut fields = vec![
                        "i64".to_string(),
                        format!("{}*", CLASS_TYPE),
                        format!("%\"{}.methods\"*", mangled),
                    ];
                    for (_, field) in self.arena.order_all_fields(*ty) {
                        fields.push(self.llvm_type(field.ty.ty));
                    }
                    writeln!(out, "%\"{}\" = type {{ {} }}", mangled, fields.join(", "))?;
                    let table: Vec<String> = self
                        .arena
                        .order_all_methods(*ty)
                        .iter()
                        .map(|s| self.function_type(self.arena.signature(*s)))
                        .collect();
                    if table.is_empty() {
                        writeln!(out, "%\"{}.methods\" = type {{ i8* }}", mangled)?;
                    } else {
                        writeln!(
                            out,
                            "%\"{}.methods\" = type {{ {} }}",
                            mangled,
                            table.join(", ")
                        )?;
                    }
                }
                TypeKind::Interface => {
                    let slots = self.arena.order_all_methods(*ty).len().max(1);
                    writeln!(
                        out,
                        "%\"{}.methods\" = type [{} x i8*]",
                        mangled, slots
                    )?;
                }
                _ => {}
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn emit_runtime_declarations(&self, out: &mut String) -> Result<()> {
        writeln!(out, "declare i8* @__allocate({}*)", CLASS_TYPE)?;
        writeln!(out, "declare i8* @__allocateArray({}*, i64)", CLASS_TYPE)?;
        writeln!(out, "declare void @__incrementRef({})", OBJECT_TYPE)?;
        writeln!(out, "declare void @__decrementRef({})", OBJECT_TYPE)?;
        writeln!(out, "declare i8* @__shadow_catch(i8*)")?;
        writeln!(out, "declare void @__shadow_throw(i8*)")?;
        writeln!(out, "declare i32 @__shadow_personality_v0(...)")?;
        writeln!(
            out,
            "declare %\"shadow.standard..String\"* @__createString(i8*, i64)"
        )?;
        writeln!(out)?;
        Ok(())
    }

    // ----- descriptors -----

    fn emit_descriptors(&mut self, out: &mut String, module: &TacModule) -> Result<()> {
        let ty = module.ty;
        let mangled = mangle::mangle(self.arena, ty);
        let qualified = self.arena.qualified_name(ty);

        writeln!(
            out,
            "@\"{}.name\" = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            mangled,
            qualified.len() + 1,
            escape(&qualified)
        )?;

        // Method table.
        let table = self.arena.order_all_methods(ty);
        if self.arena.is_class(ty) {
            let entries: Vec<String> = table
                .iter()
                .map(|sig_id| {
                    let symbol = mangle::mangle_method(self.arena, *sig_id);
                    self.require_extern(*sig_id, &symbol);
                    format!(
                        "{} @\"{}\"",
                        self.function_type(self.arena.signature(*sig_id)),
                        symbol
                    )
                })
                .collect();
            if entries.is_empty() {
                writeln!(
                    out,
                    "@\"{}.methods\" = constant %\"{}.methods\" {{ i8* null }}",
                    mangled, mangled
                )?;
            } else {
                writeln!(
                    out,
                    "@\"{}.methods\" = constant %\"{}.methods\" {{ {} }}",
                    mangled,
                    mangled,
                    entries.join(", ")
                )?;
            }
        }

        // Interface tables: one per implemented interface, holding this
        // class's implementation for each interface slot. Interfaces
        // themselves have no implementations to bind.
        let interfaces = if self.arena.is_class(ty) {
            self.arena.get_all_interfaces(ty)
        } else {
            Vec::new()
        };
        for interface in &interfaces {
            let interface_mangled = mangle::mangle(self.arena, *interface);
            let slots = self.arena.order_all_methods(*interface);
            let entries: Vec<String> = slots
                .iter()
                .map(|slot| {
                    let target = self.arena.signature(*slot);
                    let implementation = self
                        .arena
                        .order_all_methods(ty)
                        .into_iter()
                        .find(|s| {
                            let candidate = self.arena.signature(*s);
                            candidate.name == target.name
                                && candidate.params.len() == target.params.len()
                        });
                    match implementation {
                        Some(sig_id) => {
                            let symbol = mangle::mangle_method(self.arena, sig_id);
                            self.require_extern(sig_id, &symbol);
                            format!(
                                "i8* bitcast ({} @\"{}\" to i8*)",
                                self.function_type(self.arena.signature(sig_id)),
                                symbol
                            )
                        }
                        None => "i8* null".to_string(),
                    }
                })
                .collect();
            writeln!(
                out,
                "@\"{}.itable.{}\" = constant [{} x i8*] [{}]",
                mangled,
                interface_mangled,
                entries.len().max(1),
                if entries.is_empty() {
                    "i8* null".to_string()
                } else {
                    entries.join(", ")
                }
            )?;
        }

        let interface_list: Vec<String> = interfaces
            .iter()
            .map(|i| {
                format!(
                    "i8* bitcast ([{} x i8*]* @\"{}.itable.{}\" to i8*)",
                    self.arena.order_all_methods(*i).len().max(1),
                    mangled,
                    mangle::mangle(self.arena, *i)
                )
            })
            .collect();
        writeln!(
            out,
            "@\"{}.interfaces\" = constant [{} x i8*] [{}]",
            mangled,
            interfaces.len().max(1),
            if interface_list.is_empty() {
                "i8* null".to_string()
            } else {
                interface_list.join(", ")
            }
        )?;

        // The descriptor itself.
        let parent = match self.arena.extends_of(ty) {
            Some(parent) => self.class_descriptor(parent),
            None => format!("{}* null", CLASS_TYPE),
        };
        let methods_ref = if self.arena.is_class(ty) {
            format!(
                "i8* bitcast (%\"{}.methods\"* @\"{}.methods\" to i8*)",
                mangled, mangled
            )
        } else {
            "i8* null".to_string()
        };
        let mut flags = 0;
        if self.arena.is_interface(ty) {
            flags |= 1;
        }
        if self.arena.is_primitive(ty) {
            flags |= 2;
        }
        if !self.arena.entry(ty).type_params.is_empty()
            || !self.arena.entry(ty).type_args.is_empty()
        {
            flags |= 4;
        }
        if matches!(self.arena.kind(ty), TypeKind::Array { .. }) {
            flags |= 8;
        }
        let size = if self.arena.is_class(ty) {
            format!(
                "i32 ptrtoint (%\"{}\"* getelementptr (%\"{}\", %\"{}\"* null, i32 1) to i32)",
                mangled, mangled, mangled
            )
        } else {
            "i32 0".to_string()
        };
        writeln!(
            out,
            "@\"{}.class\" = constant {} {{ i64 1, {}* @\"shadow.standard..Class.class\", i8* null, i8* getelementptr inbounds ([{} x i8], [{} x i8]* @\"{}.name\", i32 0, i32 0), {}, {}, i8* bitcast ([{} x i8*]* @\"{}.interfaces\" to i8*), i32 {}, {} }}",
            mangled,
            CLASS_TYPE,
            CLASS_TYPE,
            qualified.len() + 1,
            qualified.len() + 1,
            mangled,
            parent,
            methods_ref,
            interfaces.len().max(1),
            mangled,
            flags,
            size
        )?;
        writeln!(out)?;
        Ok(())
    }

    /// Generic-class and array descriptor sets; every distinct
    /// instantiation referenced by the module lands in the set, and the
    /// sizes are written out once the sets are complete.
    fn emit_sets(&mut self, out: &mut String, references: &[TypeId]) -> Result<()> {
        let generics: Vec<TypeId> = references
            .iter()
            .copied()
            .filter(|t| !self.arena.entry(*t).type_args.is_empty())
            .collect();
        let arrays: Vec<TypeId> = references
            .iter()
            .copied()
            .filter(|t| matches!(self.arena.kind(*t), TypeKind::Array { .. }))
            .collect();

        let generic_entries: Vec<String> = generics
            .iter()
            .map(|t| {
                format!(
                    "i8* bitcast (%\"shadow.standard..GenericClass\"* @\"{}.class\" to i8*)",
                    mangle::mangle(self.arena, *t)
                )
            })
            .collect();
        writeln!(
            out,
            "@_genericSet = constant [{} x i8*] [{}]",
            generics.len().max(1),
            if generic_entries.is_empty() {
                "i8* null".to_string()
            } else {
                generic_entries.join(", ")
            }
        )?;
        writeln!(out, "@_genericSize = constant i32 {}", generics.len())?;

        let array_entries: Vec<String> = arrays
            .iter()
            .map(|t| {
                format!(
                    "i8* bitcast ({}* @\"{}.class\" to i8*)",
                    CLASS_TYPE,
                    mangle::mangle(self.arena, *t)
                )
            })
            .collect();
        writeln!(
            out,
            "@_arraySet = constant [{} x i8*] [{}]",
            arrays.len().max(1),
            if array_entries.is_empty() {
                "i8* null".to_string()
            } else {
                array_entries.join(", ")
            }
        )?;
        writeln!(out, "@_arraySize = constant i32 {}", arrays.len())?;

        // Descriptors for the instantiations themselves. A generic class
        // descriptor appends the type-parameter class and method-table
        // arrays the runtime walks during dynamic instantiation.
        for ty in generics {
            let mangled = mangle::mangle(self.arena, ty);
            let qualified = self.arena.qualified_name(ty);
            let args = self.arena.entry(ty).type_args.clone();
            let parameter_classes: Vec<String> = args
                .iter()
                .map(|a| format!("i8* bitcast ({} to i8*)", self.class_descriptor(a.ty)))
                .collect();
            writeln!(
                out,
                "@\"{}.name\" = linkonce_odr unnamed_addr constant [{} x i8] c\"{}\\00\"",
                mangled,
                qualified.len() + 1,
                escape(&qualified)
            )?;
            writeln!(
                out,
                "@\"{}.parameters\" = linkonce_odr constant [{} x i8*] [{}]",
                mangled,
                args.len().max(1),
                if parameter_classes.is_empty() {
                    "i8* null".to_string()
                } else {
                    parameter_classes.join(", ")
                }
            )?;
            writeln!(
                out,
                "@\"{}.class\" = linkonce_odr constant %\"shadow.standard..GenericClass\" {{ i64 1, {}* @\"shadow.standard..Class.class\", i8* null, i8* getelementptr inbounds ([{} x i8], [{} x i8]* @\"{}.name\", i32 0, i32 0), {}* null, i8* null, i8* null, i32 4, i32 0, i8* bitcast ([{} x i8*]* @\"{}.parameters\" to i8*), i8* null }}",
                mangled,
                CLASS_TYPE,
                qualified.len() + 1,
                qualified.len() + 1,
                mangled,
                CLASS_TYPE,
                args.len().max(1),
                mangled
            )?;
        }
        for ty in arrays {
            let mangled = mangle::mangle(self.arena, ty);
            let qualified = self.arena.qualified_name(ty);
            writeln!(
                out,
                "@\"{}.name\" = linkonce_odr unnamed_addr constant [{} x i8] c\"{}\\00\"",
                mangled,
                qualified.len() + 1,
                escape(&qualified)
            )?;
            writeln!(
                out,
                "@\"{}.class\" = linkonce_odr constant {} {{ i64 1, {}* @\"shadow.standard..Class.class\", i8* null, i8* getelementptr inbounds ([{} x i8], [{} x i8]* @\"{}.name\", i32 0, i32 0), {}* null, i8* null, i8* null, i32 8, i32 0 }}",
                mangled,
                CLASS_TYPE,
                CLASS_TYPE,
                qualified.len() + 1,
                qualified.len() + 1,
                mangled,
                CLASS_TYPE
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    // ----- functions -----

    fn method_symbol(&self, method: &TacMethod) -> String {
        match method.signature {
            Some(sig) => mangle::mangle_method(self.arena, sig),
            None => {
                let this = method.local(LocalId(0)).ty.ty;
                mangle::mangle_field_init(self.arena, this)
            }
        }
    }

    fn require_extern(&mut self, sig_id: SigId, symbol: &str) {
        if self.defined.contains(symbol) || self.externs.contains_key(symbol) {
            return;
        }
        let signature = self.arena.signature(sig_id).clone();
        let mut params = vec![self.this_type(&signature)];
        params.extend(signature.params.iter().map(|p| self.llvm_type(p.ty)));
        let declaration = format!(
            "declare {} @\"{}\"({})",
            self.return_type(&signature),
            symbol,
            params.join(", ")
        );
        self.externs.insert(symbol.to_string(), declaration);
    }

    fn emit_method(&mut self, module_ty: TypeId, method: &TacMethod) -> Result<()> {
        self.lines.clear();
        self.names.clear();
        self.label_ids.clear();
        self.next_label = 0;
        self.next_temp = method.parameter_count as u32 + 1;
        self.current_fn = self.method_symbol(method);

        // Pre-assign label ids in placement order.
        for node_id in method.iter() {
            if matches!(method.node(node_id).kind, TacKind::Label) {
                let id = self.next_label;
                self.next_label += 1;
                self.label_ids.insert(node_id, id);
            }
        }

        let (ret, param_list) = match method.signature {
            Some(sig) => {
                let signature = self.arena.signature(sig).clone();
                let mut params = vec![format!("{} %p0", self.llvm_type(module_ty))];
                for (i, p) in signature.params.iter().enumerate() {
                    params.push(format!("{} %p{}", self.llvm_type(p.ty), i + 1));
                }
                (self.return_type(&signature), params.join(", "))
            }
            None => (
                "void".to_string(),
                format!("{} %p0", self.llvm_type(module_ty)),
            ),
        };

        let needs_personality = method.iter().any(|n| {
            matches!(
                method.node(n).kind,
                TacKind::CatchSwitch { .. }
                    | TacKind::CatchPad { .. }
                    | TacKind::CleanupPad
                    | TacKind::LandingPad
                    | TacKind::Call {
                        landing: Some(_),
                        ..
                    }
                    | TacKind::Throw { unwind: Some(_), .. }
            )
        });
        let personality = if needs_personality {
            " personality i32 (...)* @__shadow_personality_v0"
        } else {
            ""
        };

        for node_id in method.iter() {
            self.emit_node(method, node_id)?;
            if node_id == method.entry {
                self.emit_prologue(method);
            }
        }

        writeln!(
            self.body,
            "define {} @\"{}\"({}){} {{",
            ret, self.current_fn, param_list, personality
        )?;
        for line in &self.lines {
            writeln!(self.body, "{}", line)?;
        }
        writeln!(self.body, "}}")?;
        writeln!(self.body)?;
        Ok(())
    }

    /// Allocas for every local and stores of the incoming parameters.
    fn emit_prologue(&mut self, method: &TacMethod) {
        for (index, local) in method.locals.iter().enumerate() {
            let ty = self.llvm_type(local.ty.ty);
            self.lines.push(format!("  %l{} = alloca {}", index, ty));
        }
        for index in 0..method.parameter_count {
            let ty = self.llvm_type(method.local(LocalId(index as u32)).ty.ty);
            self.lines.push(format!(
                "  store {} %p{}, {}* %l{}",
                ty, index, ty, index
            ));
        }
    }

    fn temp(&mut self) -> String {
        let name = format!("%v{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    fn label_name(&self, label: NodeId) -> String {
        format!("label{}", self.label_ids[&label])
    }

    fn name_of(&self, node: NodeId) -> String {
        self.names
            .get(&node)
            .cloned()
            .unwrap_or_else(|| "undef".to_string())
    }

    /// Adapts `node`'s value to the plain object pointer the runtime
    /// helpers take.
    fn as_object(&mut self, method: &TacMethod, node: NodeId) -> String {
        let ty = method.node(node).ty.ty;
        let name = self.name_of(node);
        self.convert_value(ty, self.arena.well_known.object, name)
    }

    /// Converts a value between Shadow types at a use site: pointer
    /// bitcasts between related classes, interface pair packing and
    /// unpacking, array-to-object decay, and primitive conversions. The
    /// identity cases cost nothing.
    fn convert_value(&mut self, from: TypeId, to: TypeId, name: String) -> String {
        if from == to || name == "undef" {
            return name;
        }
        let from_ll = self.llvm_type(from);
        let to_ll = self.llvm_type(to);
        if from_ll == to_ll {
            return name;
        }
        if name == "null" {
            return if self.arena.is_interface(to) {
                "zeroinitializer".to_string()
            } else {
                name
            };
        }

        // Packing a class reference into an interface pair.
        if self.arena.is_interface(to) && self.arena.is_class(from) {
            let slots = self.arena.order_all_methods(to).len().max(1);
            let symbol = format!(
                "{}.itable.{}",
                mangle::mangle(self.arena, from),
                mangle::mangle(self.arena, to)
            );
            if !self.defined.contains(&symbol) && !self.externs.contains_key(&symbol) {
                self.externs.insert(
                    symbol.clone(),
                    format!("@\"{}\" = external constant [{} x i8*]", symbol, slots),
                );
            }
            let itable = format!("bitcast ([{} x i8*]* @\"{}\" to i8*)", slots, symbol);
            let with_table = self.temp();
            self.lines.push(format!(
                "  {} = insertvalue {{ i8*, i8* }} undef, i8* {}, 0",
                with_table, itable
            ));
            let raw = self.temp();
            self.lines
                .push(format!("  {} = bitcast {} {} to i8*", raw, from_ll, name));
            let packed = self.temp();
            self.lines.push(format!(
                "  {} = insertvalue {{ i8*, i8* }} {}, i8* {}, 1",
                packed, with_table, raw
            ));
            return packed;
        }

        // Unpacking the object half of an interface pair.
        if self.arena.is_interface(from) && !self.arena.is_interface(to) {
            let raw = self.temp();
            self.lines.push(format!(
                "  {} = extractvalue {{ i8*, i8* }} {}, 1",
                raw, name
            ));
            let cast = self.temp();
            self.lines
                .push(format!("  {} = bitcast i8* {} to {}", cast, raw, to_ll));
            return cast;
        }

        // An array decays to its backing object.
        if matches!(self.arena.kind(from), TypeKind::Array { .. }) && to_ll.ends_with('*') {
            let (_, dims) = self.flatten_array(from);
            let raw = self.temp();
            self.lines.push(format!(
                "  {} = extractvalue {{ i8*, [{} x i32] }} {}, 0",
                raw, dims, name
            ));
            let cast = self.temp();
            self.lines
                .push(format!("  {} = bitcast i8* {} to {}", cast, raw, to_ll));
            return cast;
        }

        if self.arena.is_primitive(from) && self.arena.is_primitive(to) {
            let instruction = primitive_cast(self.arena, from, to);
            let converted = self.temp();
            self.lines.push(format!(
                "  {} = {} {} {} to {}",
                converted, instruction, from_ll, name, to_ll
            ));
            return converted;
        }

        if from_ll.ends_with('*') && to_ll.ends_with('*') {
            let cast = self.temp();
            self.lines
                .push(format!("  {} = bitcast {} {} to {}", cast, from_ll, name, to_ll));
            return cast;
        }
        name
    }

    fn field_index(&self, class: TypeId, field: &str) -> Option<usize> {
        self.arena
            .order_all_fields(class)
            .iter()
            .position(|(_, f)| f.name == field)
            .map(|i| i + 3)
    }

    /// The typed descriptor operand for a class. Instantiated generics
    /// carry the extended descriptor, viewed here through the plain class
    /// pointer.
    fn class_descriptor(&self, ty: TypeId) -> String {
        let mangled = mangle::mangle(self.arena, ty);
        if self.arena.entry(ty).type_args.is_empty() {
            format!("{}* @\"{}.class\"", CLASS_TYPE, mangled)
        } else {
            format!(
                "{}* bitcast (%\"shadow.standard..GenericClass\"* @\"{}.class\" to {}*)",
                CLASS_TYPE, mangled, CLASS_TYPE
            )
        }
    }

    fn emit_node(&mut self, method: &TacMethod, node_id: NodeId) -> Result<()> {
        let node = method.node(node_id).clone();
        match &node.kind {
            TacKind::Label => {
                self.lines.push(format!("{}:", self.label_name(node_id)));
            }
            TacKind::NoOp => {}
            TacKind::Literal(literal) => {
                let name = self.emit_literal(literal)?;
                self.names.insert(node_id, name);
            }
            TacKind::VariableRef(local) => {
                self.names.insert(node_id, format!("%l{}", local.0));
            }
            TacKind::FieldRef {
                object, field, ..
            } => {
                let class = method.node(*object).ty.ty;
                let Some(index) = self.field_index(class, field) else {
                    bail!("field {} not found during emission", field);
                };
                let mangled = mangle::mangle(self.arena, class);
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = getelementptr inbounds %\"{}\", %\"{}\"* {}, i32 0, i32 {}",
                    name,
                    mangled,
                    mangled,
                    self.name_of(*object),
                    index
                ));
                self.names.insert(node_id, name);
            }
            TacKind::ElementRef { array, indices } => {
                let array_ty = method.node(*array).ty.ty;
                let (element, dims) = self.flatten_array(array_ty);
                let element_ll = self.llvm_type(element);
                let struct_ty = format!("{{ i8*, [{} x i32] }}", dims);
                let array_name = self.name_of(*array);

                let data = self.temp();
                self.lines.push(format!(
                    "  {} = extractvalue {} {}, 0",
                    data, struct_ty, array_name
                ));
                let typed_data = self.temp();
                self.lines.push(format!(
                    "  {} = bitcast i8* {} to {}*",
                    typed_data, data, element_ll
                ));

                // Row-major linearization over the stored dimensions.
                let mut linear = self.name_of(indices[0]);
                for (position, index) in indices.iter().enumerate().skip(1) {
                    let dim = self.temp();
                    self.lines.push(format!(
                        "  {} = extractvalue {} {}, 1, {}",
                        dim, struct_ty, array_name, position
                    ));
                    let scaled = self.temp();
                    self.lines
                        .push(format!("  {} = mul i32 {}, {}", scaled, linear, dim));
                    let sum = self.temp();
                    self.lines.push(format!(
                        "  {} = add i32 {}, {}",
                        sum,
                        scaled,
                        self.name_of(*index)
                    ));
                    linear = sum;
                }

                let name = self.temp();
                self.lines.push(format!(
                    "  {} = getelementptr {}, {}* {}, i32 {}",
                    name, element_ll, element_ll, typed_data, linear
                ));
                self.names.insert(node_id, name);
            }
            TacKind::Load { reference } => {
                let slot = method.node(*reference).ty.ty;
                let slot_ty = self.llvm_type(slot);
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = load {}, {}* {}",
                    name,
                    slot_ty,
                    slot_ty,
                    self.name_of(*reference)
                ));
                let name = self.convert_value(slot, node.ty.ty, name);
                self.names.insert(node_id, name);
            }
            TacKind::Store { reference, value } => {
                let slot = method.node(*reference).ty.ty;
                let slot_ty = self.llvm_type(slot);
                let value_name = self.name_of(*value);
                let value_name =
                    self.convert_value(method.node(*value).ty.ty, slot, value_name);
                self.lines.push(format!(
                    "  store {} {}, {}* {}",
                    slot_ty,
                    value_name,
                    slot_ty,
                    self.name_of(*reference)
                ));
            }
            TacKind::SingletonRef { class } => {
                let mangled = mangle::mangle(self.arena, *class);
                if !self.singletons.contains(class) {
                    self.singletons.push(*class);
                    let _ = writeln!(
                        self.globals,
                        "@\"{}.singleton\" = linkonce_odr global %\"{}\"* null",
                        mangled, mangled
                    );
                }
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = load %\"{}\"*, %\"{}\"** @\"{}.singleton\"",
                    name, mangled, mangled, mangled
                ));
                self.names.insert(node_id, name);
            }
            TacKind::MethodRef { object, signature } => {
                self.emit_method_ref(method, node_id, *object, *signature)?;
            }
            TacKind::Call {
                function,
                args,
                landing,
            } => {
                self.emit_call(method, node_id, function, args, landing)?;
            }
            TacKind::Return { values } => {
                let sig = method.signature.map(|s| self.arena.signature(s).clone());
                match (values.len(), &sig) {
                    (0, _) => self.lines.push("  ret void".to_string()),
                    (1, Some(signature)) => {
                        let expected = signature.returns[0].ty;
                        let name = self.name_of(values[0]);
                        let name =
                            self.convert_value(method.node(values[0]).ty.ty, expected, name);
                        self.lines
                            .push(format!("  ret {} {}", self.llvm_type(expected), name));
                    }
                    (_, Some(signature)) => {
                        let struct_ty = self.return_type(signature);
                        let mut current = "undef".to_string();
                        for (i, value) in values.iter().enumerate() {
                            let expected = signature.returns[i].ty;
                            let name = self.name_of(*value);
                            let name =
                                self.convert_value(method.node(*value).ty.ty, expected, name);
                            let next = self.temp();
                            self.lines.push(format!(
                                "  {} = insertvalue {} {}, {} {}, {}",
                                next,
                                struct_ty,
                                current,
                                self.llvm_type(expected),
                                name,
                                i
                            ));
                            current = next;
                        }
                        self.lines
                            .push(format!("  ret {} {}", struct_ty, current));
                    }
                    _ => self.lines.push("  ret void".to_string()),
                }
            }
            TacKind::Branch(BranchKind::Direct(target)) => {
                self.lines
                    .push(format!("  br label %{}", self.label_name(*target)));
            }
            TacKind::Branch(BranchKind::Conditional {
                condition,
                true_target,
                false_target,
            }) => {
                self.lines.push(format!(
                    "  br i1 {}, label %{}, label %{}",
                    self.name_of(*condition),
                    self.label_name(*true_target),
                    self.label_name(*false_target)
                ));
            }
            TacKind::Branch(BranchKind::Indirect(phi)) => {
                let destinations = match &method.node(*phi).kind {
                    TacKind::Phi { entries } => entries
                        .iter()
                        .map(|(value, _)| format!("label %{}", self.label_name(*value)))
                        .collect::<Vec<_>>()
                        .join(", "),
                    _ => String::new(),
                };
                self.lines.push(format!(
                    "  indirectbr i8* {}, [{}]",
                    self.name_of(*phi),
                    destinations
                ));
            }
            TacKind::Phi { entries } => {
                let ty = self.llvm_type(node.ty.ty);
                let incoming: Vec<String> = entries
                    .iter()
                    .map(|(value, from)| {
                        let rendered = match method.node(*value).kind {
                            TacKind::Label => format!(
                                "blockaddress(@\"{}\", %{})",
                                self.current_fn,
                                self.label_name(*value)
                            ),
                            _ => self.name_of(*value),
                        };
                        format!("[ {}, %{} ]", rendered, self.label_name(*from))
                    })
                    .collect();
                let ty = if entries
                    .iter()
                    .any(|(v, _)| matches!(method.node(*v).kind, TacKind::Label))
                {
                    "i8*".to_string()
                } else {
                    ty
                };
                let name = self.temp();
                self.lines
                    .push(format!("  {} = phi {} {}", name, ty, incoming.join(", ")));
                self.names.insert(node_id, name);
            }
            TacKind::Binary { op, left, right } => {
                self.emit_binary(method, node_id, *op, *left, *right)?;
            }
            TacKind::Unary { op, operand } => {
                let ty = self.llvm_type(node.ty.ty);
                let operand_name = self.name_of(*operand);
                let name = self.temp();
                let line = match op {
                    UnaryOp::Negate if ty == "float" || ty == "double" => {
                        format!("  {} = fneg {} {}", name, ty, operand_name)
                    }
                    UnaryOp::Negate => format!("  {} = sub {} 0, {}", name, ty, operand_name),
                    UnaryOp::Not => format!("  {} = xor i1 {}, true", name, operand_name),
                    UnaryOp::Complement => {
                        format!("  {} = xor {} {}, -1", name, ty, operand_name)
                    }
                };
                self.lines.push(line);
                self.names.insert(node_id, name);
            }
            TacKind::Cast { value } => {
                self.emit_cast(method, node_id, *value)?;
            }
            TacKind::NewObject { class } => {
                let raw = self.temp();
                self.lines.push(format!(
                    "  {} = call i8* @__allocate({})",
                    raw,
                    self.class_descriptor(*class)
                ));
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = bitcast i8* {} to {}",
                    name,
                    raw,
                    self.llvm_type(*class)
                ));
                self.names.insert(node_id, name);
            }
            TacKind::NewArray { array, dims } => {
                let (element, dim_count) = self.flatten_array(*array);
                let struct_ty = format!("{{ i8*, [{} x i32] }}", dim_count);

                // Total element count in i64.
                let mut count = {
                    let widened = self.temp();
                    self.lines.push(format!(
                        "  {} = zext i32 {} to i64",
                        widened,
                        self.name_of(dims[0])
                    ));
                    widened
                };
                for dim in dims.iter().skip(1) {
                    let widened = self.temp();
                    self.lines.push(format!(
                        "  {} = zext i32 {} to i64",
                        widened,
                        self.name_of(*dim)
                    ));
                    let product = self.temp();
                    self.lines
                        .push(format!("  {} = mul i64 {}, {}", product, count, widened));
                    count = product;
                }

                let raw = self.temp();
                self.lines.push(format!(
                    "  {} = call i8* @__allocateArray({}, i64 {})",
                    raw,
                    self.class_descriptor(element),
                    count
                ));
                let mut value = self.temp();
                self.lines.push(format!(
                    "  {} = insertvalue {} undef, i8* {}, 0",
                    value, struct_ty, raw
                ));
                for (i, dim) in dims.iter().enumerate() {
                    let next = self.temp();
                    self.lines.push(format!(
                        "  {} = insertvalue {} {}, i32 {}, 1, {}",
                        next,
                        struct_ty,
                        value,
                        self.name_of(*dim),
                        i
                    ));
                    value = next;
                }
                self.names.insert(node_id, value);
            }
            TacKind::Throw { value, unwind } => {
                let object = self.as_object(method, *value);
                let raw = self.temp();
                self.lines.push(format!(
                    "  {} = bitcast {} {} to i8*",
                    raw, OBJECT_TYPE, object
                ));
                match unwind {
                    Some(unwind) => {
                        let cont = format!("thrown{}", self.next_synthetic);
                        self.next_synthetic += 1;
                        self.lines.push(format!(
                            "  invoke void @__shadow_throw(i8* {}) to label %{} unwind label %{}",
                            raw,
                            cont,
                            self.label_name(*unwind)
                        ));
                        self.lines.push(format!("{}:", cont));
                        self.lines.push("  unreachable".to_string());
                    }
                    None => {
                        self.lines
                            .push(format!("  call void @__shadow_throw(i8* {})", raw));
                        self.lines.push("  unreachable".to_string());
                    }
                }
            }
            TacKind::CatchSwitch { pads, unwind } => {
                let name = self.temp();
                let pad_list: Vec<String> = pads
                    .iter()
                    .map(|p| format!("label %{}", self.label_name(*p)))
                    .collect();
                let unwind_clause = match unwind {
                    Some(unwind) => format!("unwind label %{}", self.label_name(*unwind)),
                    None => "unwind to caller".to_string(),
                };
                self.lines.push(format!(
                    "  {} = catchswitch within none [{}] {}",
                    name,
                    pad_list.join(", "),
                    unwind_clause
                ));
                self.names.insert(node_id, name);
            }
            TacKind::CatchPad { exception, switch } => {
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = catchpad within {} [i8* bitcast ({} to i8*)]",
                    name,
                    self.name_of(*switch),
                    self.class_descriptor(*exception)
                ));
                let body = format!("caught{}", self.next_synthetic);
                self.next_synthetic += 1;
                self.lines
                    .push(format!("  catchret from {} to label %{}", name, body));
                self.lines.push(format!("{}:", body));
                self.names.insert(node_id, name);
            }
            TacKind::CleanupPad => {
                let name = self.temp();
                self.lines
                    .push(format!("  {} = cleanuppad within none []", name));
                self.names.insert(node_id, name);
            }
            TacKind::Resume { pad, unwind } => {
                let clause = match unwind {
                    Some(unwind) => format!("unwind label %{}", self.label_name(*unwind)),
                    None => "unwind to caller".to_string(),
                };
                self.lines.push(format!(
                    "  cleanupret from {} {}",
                    self.name_of(*pad),
                    clause
                ));
            }
            TacKind::LandingPad => {
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = landingpad {{ i8*, i32 }} cleanup",
                    name
                ));
                self.names.insert(node_id, name);
            }
        }
        Ok(())
    }

    fn emit_method_ref(
        &mut self,
        method: &TacMethod,
        node_id: NodeId,
        object: Option<NodeId>,
        sig_id: SigId,
    ) -> Result<()> {
        let signature = self.arena.signature(sig_id).clone();
        let symbol = mangle::mangle_method(self.arena, sig_id);
        let fn_ty = self.function_type(&signature);

        let receiver_ty = object.map(|o| method.node(o).ty.ty);
        let virtual_dispatch = receiver_ty
            .map(|ty| {
                !signature.is_create()
                    && !signature.modifiers.is_private()
                    && (self.arena.is_interface(ty)
                        || self.arena.method_index(ty, sig_id).is_some())
            })
            .unwrap_or(false);

        if !virtual_dispatch {
            self.require_extern(sig_id, &symbol);
            self.ref_sigs.insert(node_id, (sig_id, false));
            self.names.insert(node_id, format!("@\"{}\"", symbol));
            return Ok(());
        }

        let receiver = receiver_ty.expect("virtual dispatch has a receiver");
        let index = self
            .arena
            .method_index(receiver, sig_id)
            .expect("method present in its receiver's table");
        let slot_sig = self.arena.order_all_methods(receiver)[index];
        let fn_ty = if self.arena.is_interface(receiver) {
            fn_ty
        } else {
            self.function_type(self.arena.signature(slot_sig))
        };

        if self.arena.is_interface(receiver) {
            self.ref_sigs.insert(node_id, (sig_id, true));
            let object = object.expect("interface call has a receiver");
            let itable_raw = self.temp();
            self.lines.push(format!(
                "  {} = extractvalue {{ i8*, i8* }} {}, 0",
                itable_raw,
                self.name_of(object)
            ));
            let slots = self.arena.order_all_methods(receiver).len().max(1);
            let itable = self.temp();
            self.lines.push(format!(
                "  {} = bitcast i8* {} to [{} x i8*]*",
                itable, itable_raw, slots
            ));
            let slot = self.temp();
            self.lines.push(format!(
                "  {} = getelementptr [{} x i8*], [{} x i8*]* {}, i32 0, i32 {}",
                slot, slots, slots, itable, index
            ));
            let raw = self.temp();
            self.lines
                .push(format!("  {} = load i8*, i8** {}", raw, slot));
            let name = self.temp();
            self.lines.push(format!(
                "  {} = bitcast i8* {} to {}",
                name, raw, fn_ty
            ));
            self.names.insert(node_id, name);
        } else {
            self.ref_sigs.insert(node_id, (slot_sig, false));
            let object = object.expect("virtual call has a receiver");
            let mangled = mangle::mangle(self.arena, receiver);
            let table_ptr = self.temp();
            self.lines.push(format!(
                "  {} = getelementptr inbounds %\"{}\", %\"{}\"* {}, i32 0, i32 2",
                table_ptr,
                mangled,
                mangled,
                self.name_of(object)
            ));
            let table = self.temp();
            self.lines.push(format!(
                "  {} = load %\"{}.methods\"*, %\"{}.methods\"** {}",
                table, mangled, mangled, table_ptr
            ));
            let slot = self.temp();
            self.lines.push(format!(
                "  {} = getelementptr inbounds %\"{}.methods\", %\"{}.methods\"* {}, i32 0, i32 {}",
                slot, mangled, mangled, table, index
            ));
            let name = self.temp();
            self.lines.push(format!(
                "  {} = load {}, {}* {}",
                name, fn_ty, fn_ty, slot
            ));
            self.names.insert(node_id, name);
        }
        Ok(())
    }

    fn emit_call(
        &mut self,
        method: &TacMethod,
        node_id: NodeId,
        function: &CallFunction,
        args: &[NodeId],
        landing: &Option<(NodeId, NodeId)>,
    ) -> Result<()> {
        let (callee, ret_ty, param_tys): (String, String, Vec<TypeId>) = match function {
            CallFunction::Runtime(RuntimeFn::IncrementRef | RuntimeFn::DecrementRef) => {
                let symbol = match function {
                    CallFunction::Runtime(f) => f.symbol(),
                    _ => unreachable!(),
                };
                let object = self.as_object(method, args[0]);
                self.lines.push(format!(
                    "  call void @{}({} {})",
                    symbol, OBJECT_TYPE, object
                ));
                return Ok(());
            }
            CallFunction::Runtime(RuntimeFn::Catch) => {
                let exception_ty = method.node(node_id).ty.ty;
                let raw = self.temp();
                self.lines.push(format!(
                    "  {} = call i8* @__shadow_catch(i8* bitcast ({} to i8*))",
                    raw,
                    self.class_descriptor(exception_ty)
                ));
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = bitcast i8* {} to {}",
                    name,
                    raw,
                    self.llvm_type(exception_ty)
                ));
                self.names.insert(node_id, name);
                return Ok(());
            }
            CallFunction::Runtime(f) => {
                (format!("@{}", f.symbol()), "i8*".to_string(), Vec::new())
            }
            CallFunction::FieldInit(class) => {
                let symbol = mangle::mangle_field_init(self.arena, *class);
                if !self.defined.contains(&symbol) && !self.externs.contains_key(&symbol) {
                    let declaration =
                        format!("declare void @\"{}\"({})", symbol, self.llvm_type(*class));
                    self.externs.insert(symbol.clone(), declaration);
                }
                (
                    format!("@\"{}\"", symbol),
                    "void".to_string(),
                    vec![*class],
                )
            }
            CallFunction::Ref(reference) => {
                let (sig_id, interface_dispatch) = match self.ref_sigs.get(reference) {
                    Some(entry) => *entry,
                    None => match &method.node(*reference).kind {
                        TacKind::MethodRef { signature, .. } => (*signature, false),
                        _ => bail!("call through a non-method reference"),
                    },
                };
                let signature = self.arena.signature(sig_id).clone();
                let receiver = if interface_dispatch || self.arena.is_interface(signature.outer)
                {
                    self.arena.well_known.object
                } else {
                    signature.outer
                };
                let mut params = vec![receiver];
                params.extend(signature.params.iter().map(|p| p.ty));
                (
                    self.name_of(*reference),
                    self.return_type(&signature),
                    params,
                )
            }
        };

        let mut rendered = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let actual = method.node(*arg).ty.ty;
            let expected = param_tys.get(i).copied().unwrap_or(actual);
            let name = self.name_of(*arg);
            let name = self.convert_value(actual, expected, name);
            rendered.push(format!("{} {}", self.llvm_type(expected), name));
        }

        let result = if ret_ty == "void" {
            String::new()
        } else {
            let name = self.temp();
            self.names.insert(node_id, name.clone());
            format!("{} = ", name)
        };

        match landing {
            Some((normal, unwind)) => {
                self.lines.push(format!(
                    "  {}invoke {} {}({}) to label %{} unwind label %{}",
                    result,
                    ret_ty,
                    callee,
                    rendered.join(", "),
                    self.label_name(*normal),
                    self.label_name(*unwind)
                ));
            }
            None => {
                self.lines.push(format!(
                    "  {}call {} {}({})",
                    result,
                    ret_ty,
                    callee,
                    rendered.join(", ")
                ));
            }
        }
        Ok(())
    }

    fn emit_binary(
        &mut self,
        method: &TacMethod,
        node_id: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<()> {
        let operand_ty = method.node(left).ty.ty;
        let ll_ty = self.llvm_type(operand_ty);
        let (signed, floating) = match self.arena.kind(operand_ty) {
            TypeKind::Primitive(p) => (p.is_signed(), p.is_floating()),
            _ => (false, false),
        };

        use BinaryOp::*;
        let instruction = match (op, floating) {
            (Add, false) => "add",
            (Add, true) => "fadd",
            (Subtract, false) => "sub",
            (Subtract, true) => "fsub",
            (Multiply, false) => "mul",
            (Multiply, true) => "fmul",
            (Divide, true) => "fdiv",
            (Divide, false) if signed => "sdiv",
            (Divide, false) => "udiv",
            (Remainder, true) => "frem",
            (Remainder, false) if signed => "srem",
            (Remainder, false) => "urem",
            (BitAnd, _) | (CondAnd, _) => "and",
            (BitOr, _) | (CondOr, _) => "or",
            (BitXor, _) => "xor",
            (ShiftLeft, _) => "shl",
            (ShiftRight, _) if signed => "ashr",
            (ShiftRight, _) => "lshr",
            (Equal | NotEqual | LessThan | LessOrEqual | GreaterThan | GreaterOrEqual, _) => {
                let predicate = comparison_predicate(op, signed, floating);
                let compare = if floating { "fcmp" } else { "icmp" };
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = {} {} {} {}, {}",
                    name,
                    compare,
                    predicate,
                    ll_ty,
                    self.name_of(left),
                    self.name_of(right)
                ));
                self.names.insert(node_id, name);
                return Ok(());
            }
        };
        let name = self.temp();
        self.lines.push(format!(
            "  {} = {} {} {}, {}",
            name,
            instruction,
            ll_ty,
            self.name_of(left),
            self.name_of(right)
        ));
        self.names.insert(node_id, name);
        Ok(())
    }

    fn emit_cast(&mut self, method: &TacMethod, node_id: NodeId, value: NodeId) -> Result<()> {
        let from = method.node(value).ty.ty;
        let to = method.node(node_id).ty.ty;
        let name = self.name_of(value);
        let name = self.convert_value(from, to, name);
        self.names.insert(node_id, name);
        Ok(())
    }

    fn emit_literal(&mut self, literal: &Literal) -> Result<String> {
        Ok(match literal {
            Literal::Boolean(v) => v.to_string(),
            Literal::Byte(v) => v.to_string(),
            Literal::UByte(v) => v.to_string(),
            Literal::Short(v) => v.to_string(),
            Literal::UShort(v) => v.to_string(),
            Literal::Int(v) => v.to_string(),
            Literal::UInt(v) => v.to_string(),
            Literal::Long(v) => v.to_string(),
            Literal::ULong(v) => v.to_string(),
            Literal::Code(v) => (*v as u32).to_string(),
            Literal::Float(v) => double_bits(*v as f64),
            Literal::Double(v) => double_bits(*v),
            Literal::Null => "null".to_string(),
            Literal::String(text) => {
                let index = match self.strings.iter().position(|s| s == text) {
                    Some(index) => index,
                    None => {
                        self.strings.push(text.clone());
                        let index = self.strings.len() - 1;
                        let _ = writeln!(
                            self.globals,
                            "@.str.{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
                            index,
                            text.len() + 1,
                            escape(text)
                        );
                        index
                    }
                };
                let name = self.temp();
                self.lines.push(format!(
                    "  {} = call %\"shadow.standard..String\"* @__createString(i8* getelementptr inbounds ([{} x i8], [{} x i8]* @.str.{}, i32 0, i32 0), i64 {})",
                    name,
                    text.len() + 1,
                    text.len() + 1,
                    index,
                    text.len()
                ));
                name
            }
        })
    }
}

fn primitive_type(p: Primitive) -> &'static str {
    match p {
        Primitive::Boolean => "i1",
        Primitive::Byte | Primitive::UByte => "i8",
        Primitive::Short | Primitive::UShort => "i16",
        Primitive::Int | Primitive::UInt | Primitive::Code => "i32",
        Primitive::Long | Primitive::ULong => "i64",
        Primitive::Float => "float",
        Primitive::Double => "double",
    }
}

fn comparison_predicate(op: BinaryOp, signed: bool, floating: bool) -> &'static str {
    use BinaryOp::*;
    if floating {
        match op {
            Equal => "oeq",
            NotEqual => "one",
            LessThan => "olt",
            LessOrEqual => "ole",
            GreaterThan => "ogt",
            _ => "oge",
        }
    } else if signed {
        match op {
            Equal => "eq",
            NotEqual => "ne",
            LessThan => "slt",
            LessOrEqual => "sle",
            GreaterThan => "sgt",
            _ => "sge",
        }
    } else {
        match op {
            Equal => "eq",
            NotEqual => "ne",
            LessThan => "ult",
            LessOrEqual => "ule",
            GreaterThan => "ugt",
            _ => "uge",
        }
    }
}

fn primitive_cast(arena: &TypeArena, from: TypeId, to: TypeId) -> &'static str {
    let (from_p, to_p) = match (arena.kind(from), arena.kind(to)) {
        (TypeKind::Primitive(a), TypeKind::Primitive(b)) => (*a, *b),
        _ => return "bitcast",
    };
    match (from_p.is_floating(), to_p.is_floating()) {
        (true, true) => {
            if from_p.width() < to_p.width() {
                "fpext"
            } else {
                "fptrunc"
            }
        }
        (true, false) => {
            if to_p.is_signed() {
                "fptosi"
            } else {
                "fptoui"
            }
        }
        (false, true) => {
            if from_p.is_signed() {
                "sitofp"
            } else {
                "uitofp"
            }
        }
        (false, false) => {
            if from_p.width() < to_p.width() {
                if from_p.is_signed() {
                    "sext"
                } else {
                    "zext"
                }
            } else if from_p.width() > to_p.width() {
                "trunc"
            } else {
                "bitcast"
            }
        }
    }
}

/// Doubles render as bit-exact hexadecimal constants.
fn double_bits(value: f64) -> String {
    format!("0x{:016X}", value.to_bits())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' | b'\\' => {
                out.push_str(&format!("\\{:02X}", byte));
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_render_as_bit_patterns() {
        assert_eq!(double_bits(1.0), "0x3FF0000000000000");
        assert_eq!(double_bits(0.0), "0x0000000000000000");
    }

    #[test]
    fn strings_escape_non_printable_bytes() {
        assert_eq!(escape("hi"), "hi");
        assert_eq!(escape("a\"b"), "a\\22b");
        assert_eq!(escape("line\n"), "line\\0A");
    }
}
