//! The synthesized C `main`.
//!
//! A small self-contained LLVM module: it constructs the console singleton,
//! lifts `argv` into a Shadow `String[]`, allocates the user's main class,
//! invokes its `main` (with or without arguments, matching the declared
//! signature), and catches any escaped `Exception`, printing it and
//! returning 1; otherwise it returns 0.

use crate::emit::mangle;
use crate::typecheck::{SigId, TypeArena, TypeId};
use std::fmt::Write as _;

const CLASS_LAYOUT: &str =
    "{ i64, %\"shadow.standard..Class\"*, i8*, i8*, %\"shadow.standard..Class\"*, i8*, i8*, i32, i32 }";

/// Renders the main-shim module for `main_type`.
pub fn main_shim(
    arena: &TypeArena,
    main_type: TypeId,
    create_sig: SigId,
    main_sig: SigId,
) -> String {
    let main_mangled = mangle::mangle(arena, main_type);
    let console_mangled = mangle::mangle(arena, arena.well_known.console);
    let exception_mangled = mangle::mangle(arena, arena.well_known.exception);
    let create_symbol = mangle::mangle_method(arena, create_sig);
    let main_symbol = mangle::mangle_method(arena, main_sig);
    let has_args = !arena.signature(main_sig).params.is_empty();

    let mut out = String::new();
    let w = &mut out;
    let _ = writeln!(w, "; ModuleID = 'main'");
    let _ = writeln!(w);
    let _ = writeln!(w, "%\"shadow.standard..Class\" = type {}", CLASS_LAYOUT);
    let _ = writeln!(w, "%\"{}\" = type opaque", console_mangled);
    let _ = writeln!(w, "%\"{}\" = type opaque", main_mangled);
    let _ = writeln!(w);
    let _ = writeln!(w, "declare i8* @__allocate(%\"shadow.standard..Class\"*)");
    let _ = writeln!(w, "declare i8* @__shadow_catch(i8*)");
    let _ = writeln!(w, "declare i32 @__shadow_personality_v0(...)");
    let _ = writeln!(
        w,
        "declare {{ i8*, [1 x i32] }} @__createArguments(i32, i8**)"
    );
    let _ = writeln!(w, "declare void @__printException(i8*)");
    let _ = writeln!(w, "declare void @__initialize(i8*, i32, i8*, i32)");
    let _ = writeln!(w);

    if has_args {
        let _ = writeln!(
            w,
            "declare void @\"{}\"(%\"{}\"*, {{ i8*, [1 x i32] }})",
            main_symbol, main_mangled
        );
    } else {
        let _ = writeln!(
            w,
            "declare void @\"{}\"(%\"{}\"*)",
            main_symbol, main_mangled
        );
    }
    let _ = writeln!(
        w,
        "declare %\"{}\"* @\"{}\"(%\"{}\"*)",
        main_mangled, create_symbol, main_mangled
    );
    let _ = writeln!(w);
    let _ = writeln!(
        w,
        "@\"{}.class\" = external constant %\"shadow.standard..Class\"",
        console_mangled
    );
    let _ = writeln!(
        w,
        "@\"{}.class\" = external constant %\"shadow.standard..Class\"",
        main_mangled
    );
    let _ = writeln!(
        w,
        "@\"{}.class\" = external constant %\"shadow.standard..Class\"",
        exception_mangled
    );
    let _ = writeln!(
        w,
        "@\"{}.singleton\" = linkonce_odr global %\"{}\"* null",
        console_mangled, console_mangled
    );
    let _ = writeln!(w, "@_genericSet = external constant [0 x i8*]");
    let _ = writeln!(w, "@_genericSize = external constant i32");
    let _ = writeln!(w, "@_arraySet = external constant [0 x i8*]");
    let _ = writeln!(w, "@_arraySize = external constant i32");
    let _ = writeln!(w);

    let _ = writeln!(
        w,
        "define i32 @main(i32 %argc, i8** %argv) personality i32 (...)* @__shadow_personality_v0 {{"
    );
    let _ = writeln!(w, "entry:");
    let _ = writeln!(
        w,
        "  %gsize = load i32, i32* @_genericSize"
    );
    let _ = writeln!(w, "  %asize = load i32, i32* @_arraySize");
    let _ = writeln!(
        w,
        "  call void @__initialize(i8* bitcast ([0 x i8*]* @_genericSet to i8*), i32 %gsize, i8* bitcast ([0 x i8*]* @_arraySet to i8*), i32 %asize)"
    );
    let _ = writeln!(
        w,
        "  %console.raw = call i8* @__allocate(%\"shadow.standard..Class\"* @\"{}.class\")",
        console_mangled
    );
    let _ = writeln!(
        w,
        "  %console = bitcast i8* %console.raw to %\"{}\"*",
        console_mangled
    );
    let _ = writeln!(
        w,
        "  store %\"{}\"* %console, %\"{}\"** @\"{}.singleton\"",
        console_mangled, console_mangled, console_mangled
    );
    if has_args {
        let _ = writeln!(
            w,
            "  %args = call {{ i8*, [1 x i32] }} @__createArguments(i32 %argc, i8** %argv)"
        );
    }
    let _ = writeln!(
        w,
        "  %object.raw = call i8* @__allocate(%\"shadow.standard..Class\"* @\"{}.class\")",
        main_mangled
    );
    let _ = writeln!(
        w,
        "  %object = bitcast i8* %object.raw to %\"{}\"*",
        main_mangled
    );
    let _ = writeln!(
        w,
        "  %created = invoke %\"{}\"* @\"{}\"(%\"{}\"* %object) to label %run unwind label %handler",
        main_mangled, create_symbol, main_mangled
    );
    let _ = writeln!(w, "run:");
    if has_args {
        let _ = writeln!(
            w,
            "  invoke void @\"{}\"(%\"{}\"* %created, {{ i8*, [1 x i32] }} %args) to label %done unwind label %handler",
            main_symbol, main_mangled
        );
    } else {
        let _ = writeln!(
            w,
            "  invoke void @\"{}\"(%\"{}\"* %created) to label %done unwind label %handler",
            main_symbol, main_mangled
        );
    }
    let _ = writeln!(w, "done:");
    let _ = writeln!(w, "  ret i32 0");
    let _ = writeln!(w, "handler:");
    let _ = writeln!(
        w,
        "  %switch = catchswitch within none [label %catch] unwind to caller"
    );
    let _ = writeln!(w, "catch:");
    let _ = writeln!(
        w,
        "  %pad = catchpad within %switch [i8* bitcast (%\"shadow.standard..Class\"* @\"{}.class\" to i8*)]",
        exception_mangled
    );
    let _ = writeln!(w, "  catchret from %pad to label %report");
    let _ = writeln!(w, "report:");
    let _ = writeln!(
        w,
        "  %exception = call i8* @__shadow_catch(i8* bitcast (%\"shadow.standard..Class\"* @\"{}.class\" to i8*))",
        exception_mangled
    );
    let _ = writeln!(w, "  call void @__printException(i8* %exception)");
    let _ = writeln!(w, "  ret i32 1");
    let _ = writeln!(w, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typecheck::{MethodSignature, ModifiedType, Modifiers, TypeArena, TypeKind};

    #[test]
    fn shim_invokes_main_and_handles_escaped_exceptions() {
        let mut arena = TypeArena::new();
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
        let create = arena.add_signature(MethodSignature {
            name: "create".to_string(),
            outer: test,
            modifiers: Modifiers::PUBLIC,
            param_names: Vec::new(),
            params: Vec::new(),
            returns: vec![ModifiedType::new(test)],
            span: 0..0,
            decl_index: 0,
            is_import: false,
            is_export: false,
            unused: false,
        });
        let string = arena.well_known.string;
        let args = arena.array_of(string, false);
        let main = arena.add_signature(MethodSignature {
            name: "main".to_string(),
            outer: test,
            modifiers: Modifiers::PUBLIC,
            param_names: vec!["args".to_string()],
            params: vec![ModifiedType::new(args)],
            returns: Vec::new(),
            span: 0..0,
            decl_index: 1,
            is_import: false,
            is_export: false,
            unused: false,
        });

        let shim = main_shim(&arena, test, create, main);
        assert!(shim.contains("define i32 @main(i32 %argc, i8** %argv)"));
        assert!(shim.contains("@__createArguments"));
        assert!(shim.contains("shadow.test..Test_Mmain_shadow.standard..String_A"));
        assert!(shim.contains("ret i32 1"));
        assert!(shim.contains("ret i32 0"));
        assert!(shim.contains("__shadow_personality_v0"));
    }
}
