//! Symbol name mangling.
//!
//! Types mangle to dotted qualified names (`shadow.standard..Object`, the
//! double dot separating package from type path). Arrays append `_A`
//! (`_NA` when nullable), generic instantiations wrap their arguments in
//! `_L` ... `_R` with `_C` between them. A method symbol is
//! `Type_MName_ParamType1_ParamType2...`.
//!
//! `parse` inverts `mangle` on its own output; the resolver keeps marker
//! sequences out of user identifiers, so the grammar stays unambiguous.

use crate::typecheck::{Primitive, TypeArena, TypeId, TypeKind};

/// The mangled name of a type.
pub fn mangle(arena: &TypeArena, id: TypeId) -> String {
    match arena.kind(id) {
        TypeKind::Primitive(p) => p.name().to_string(),
        TypeKind::Array { base, nullable } => {
            let suffix = if *nullable { "_NA" } else { "_A" };
            format!("{}{}", mangle(arena, *base), suffix)
        }
        _ => {
            let entry = arena.entry(id);
            let mut path = entry.name.clone();
            let mut outer = entry.outer;
            while let Some(o) = outer {
                path = format!("{}.{}", arena.entry(o).name, path);
                outer = arena.entry(o).outer;
            }
            let mut out = if entry.package.is_empty() {
                path
            } else {
                format!("{}..{}", entry.package.join("."), path)
            };
            if !entry.type_args.is_empty() {
                out.push_str("_L");
                for (i, arg) in entry.type_args.iter().enumerate() {
                    if i > 0 {
                        out.push_str("_C");
                    }
                    out.push_str(&mangle(arena, arg.ty));
                }
                out.push_str("_R");
            }
            out
        }
    }
}

/// The mangled symbol of a method: receiver type, `_M`, name, then each
/// parameter type.
pub fn mangle_method(arena: &TypeArena, sig: crate::typecheck::SigId) -> String {
    let signature = arena.signature(sig);
    let mut out = format!("{}_M{}", mangle(arena, signature.outer), signature.name);
    for param in &signature.params {
        out.push('_');
        out.push_str(&mangle(arena, param.ty));
    }
    out
}

/// The symbol of a class's generated field initializer.
pub fn mangle_field_init(arena: &TypeArena, id: TypeId) -> String {
    format!("{}.._fields", mangle(arena, id))
}

/// A structural description of a parsed mangled type, sufficient to
/// re-mangle it without an arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMangle {
    Primitive(&'static str),
    Named {
        qualified: String,
        args: Vec<ParsedMangle>,
    },
    Array {
        base: Box<ParsedMangle>,
        nullable: bool,
    },
}

impl ParsedMangle {
    /// Re-mangles the parsed structure.
    pub fn mangled(&self) -> String {
        match self {
            ParsedMangle::Primitive(name) => (*name).to_string(),
            ParsedMangle::Named { qualified, args } => {
                let mut out = qualified.clone();
                if !args.is_empty() {
                    out.push_str("_L");
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str("_C");
                        }
                        out.push_str(&arg.mangled());
                    }
                    out.push_str("_R");
                }
                out
            }
            ParsedMangle::Array { base, nullable } => {
                format!("{}{}", base.mangled(), if *nullable { "_NA" } else { "_A" })
            }
        }
    }
}

/// Parses a mangled type name produced by [`mangle`].
pub fn parse(text: &str) -> Option<ParsedMangle> {
    let mut cursor = Cursor { text, pos: 0 };
    let parsed = cursor.parse_type()?;
    (cursor.pos == text.len()).then_some(parsed)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn eat(&mut self, marker: &str) -> bool {
        if self.rest().starts_with(marker) {
            self.pos += marker.len();
            true
        } else {
            false
        }
    }

    fn parse_type(&mut self) -> Option<ParsedMangle> {
        let mut base = self.parse_base()?;
        loop {
            // `_NA` is checked before `_A`; array markers bind tighter
            // than the argument separators the caller handles.
            if self.eat("_NA") {
                base = ParsedMangle::Array {
                    base: Box::new(base),
                    nullable: true,
                };
            } else if self.eat("_A") {
                base = ParsedMangle::Array {
                    base: Box::new(base),
                    nullable: false,
                };
            } else {
                break;
            }
        }
        Some(base)
    }

    fn parse_base(&mut self) -> Option<ParsedMangle> {
        let name_end = self.scan_name_end();
        let name = &self.text[self.pos..name_end];
        if name.is_empty() {
            return None;
        }
        self.pos = name_end;

        if let Some(p) = Primitive::from_name(name) {
            return Some(ParsedMangle::Primitive(p.name()));
        }

        let mut args = Vec::new();
        if self.eat("_L") {
            loop {
                args.push(self.parse_type()?);
                if self.eat("_C") {
                    continue;
                }
                if self.eat("_R") {
                    break;
                }
                return None;
            }
        }
        Some(ParsedMangle::Named {
            qualified: name.to_string(),
            args,
        })
    }

    /// A name runs until the next marker (`_A`, `_NA`, `_L`, `_C`, `_R`)
    /// or the end of input.
    fn scan_name_end(&self) -> usize {
        let bytes = self.text.as_bytes();
        let mut i = self.pos;
        while i < bytes.len() {
            if bytes[i] == b'_' && i + 1 < bytes.len() {
                match bytes[i + 1] {
                    b'A' | b'L' | b'C' | b'R' => return i,
                    b'N' if self.text[i + 1..].starts_with("NA") => return i,
                    _ => {}
                }
            }
            i += 1;
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typecheck::{ModifiedType, Modifiers, TypeArena, TypeKind};

    #[test]
    fn mangles_well_known_types() {
        let arena = TypeArena::new();
        assert_eq!(
            mangle(&arena, arena.well_known.object),
            "shadow.standard..Object"
        );
        assert_eq!(mangle(&arena, arena.primitive(Primitive::Int)), "int");
    }

    #[test]
    fn arrays_append_their_suffix() {
        let mut arena = TypeArena::new();
        let int = arena.primitive(Primitive::Int);
        let ints = arena.array_of(int, false);
        let ints_nullable = arena.array_of(int, true);
        let matrix = arena.array_of(ints, false);
        assert_eq!(mangle(&arena, ints), "int_A");
        assert_eq!(mangle(&arena, ints_nullable), "int_NA");
        assert_eq!(mangle(&arena, matrix), "int_A_A");
    }

    #[test]
    fn round_trips_through_parse() {
        let mut arena = TypeArena::new();
        let object = arena.well_known.object;
        let param = arena.declare(
            "T",
            Vec::new(),
            Modifiers::default(),
            TypeKind::TypeParameter { bounds: Vec::new() },
            None,
        );
        let list = arena.declare(
            "List",
            vec!["shadow".to_string(), "utility".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class {
                extends: Some(object),
            },
            None,
        );
        arena.entry_mut(list).type_params = vec![ModifiedType::new(param)];
        let int = arena.primitive(Primitive::Int);
        let string = arena.well_known.string;
        let list_int = arena.instantiate(list, &[ModifiedType::new(int)]).unwrap();
        let string_array = arena.array_of(string, false);

        for ty in [object, int, list_int, string_array] {
            let mangled = mangle(&arena, ty);
            let parsed = parse(&mangled).expect("own output parses");
            assert_eq!(parsed.mangled(), mangled);
        }
    }

    #[test]
    fn method_symbols_list_parameter_types() {
        let mut arena = TypeArena::new();
        let string = arena.well_known.string;
        let string_array = arena.array_of(string, false);
        let object = arena.well_known.object;
        let test = arena.declare(
            "Test",
            vec!["shadow".to_string(), "test".to_string()],
            Modifiers::PUBLIC,
            TypeKind::Class {
                extends: Some(object),
            },
            None,
        );
        let sig = arena.add_signature(crate::typecheck::MethodSignature {
            name: "main".to_string(),
            outer: test,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["args".to_string()],
            params: vec![ModifiedType::new(string_array)],
            returns: Vec::new(),
            span: 0..0,
            decl_index: 0,
            is_import: false,
            is_export: false,
            unused: false,
        });
        assert_eq!(
            mangle_method(&arena, sig),
            "shadow.test..Test_Mmain_shadow.standard..String_A"
        );
    }
}
