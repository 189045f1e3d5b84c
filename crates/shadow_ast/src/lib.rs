//! Shadow AST definitions
//!
//! This crate defines the abstract syntax tree (AST) for the Shadow language.
//! It serves as the contract between the front end (lexer/parser) and the
//! compiler core: the front end produces these nodes, optionally persisting
//! them as serialized `.ast.json` files next to the `.shadow` sources, and
//! the compiler core consumes them.
//!
//! Every node carries a byte-range [`Span`] into the original source. The
//! `ty` annotation slots on expressions are `None` as produced by the front
//! end and are filled in by the compiler's resolver before TAC construction.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Represents a source code span as a byte range.
pub type Span = Range<usize>;

/// Opaque handle to a resolved (type, modifiers) pair.
///
/// Assigned by the compiler's resolver; the front end always leaves
/// annotation slots empty. The handle indexes a table owned by the type
/// arena, so the AST crate stays independent of the type model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef(pub u32);

/// Opaque handle to a resolved method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef(pub u32);

/// One compilation unit: a single outermost class or interface declaration
/// together with its package and imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// Package path, outermost first (`shadow:standard` is `["shadow", "standard"]`).
    pub package: Vec<String>,
    /// Imported qualified names.
    pub imports: Vec<Vec<String>>,
    pub declaration: TypeDecl,
    pub span: Span,
}

/// Declaration-level modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Public,
    Private,
    Immutable,
    Nullable,
    Readonly,
    Constant,
    Get,
    Set,
}

/// The kind of a type declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDeclKind {
    Class,
    Interface,
    Attribute,
}

/// A class, interface, or attribute declaration, possibly with inner types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub kind: TypeDeclKind,
    pub name: String,
    pub modifiers: Vec<Modifier>,
    pub type_params: Vec<TypeParam>,
    /// `extends` clause; classes only.
    pub extends: Option<TypeAnn>,
    /// Implemented (class) or extended (interface) interfaces.
    pub implements: Vec<TypeAnn>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub inner: Vec<TypeDecl>,
    pub span: Span,
}

/// A declared type parameter with optional interface bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeParam {
    pub name: String,
    pub bounds: Vec<TypeAnn>,
    pub span: Span,
}

/// A syntactic type annotation, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAnn {
    /// Qualified name segments; a single segment for unqualified names and
    /// primitives (`int`, `boolean`, ...).
    pub segments: Vec<String>,
    pub type_args: Vec<TypeAnn>,
    /// Array dimensions; 0 for a non-array type.
    pub dims: usize,
    pub nullable: bool,
    pub span: Span,
}

impl TypeAnn {
    /// Convenience constructor for an unqualified, non-array annotation.
    pub fn simple(name: impl Into<String>, span: Span) -> Self {
        TypeAnn {
            segments: vec![name.into()],
            type_args: Vec::new(),
            dims: 0,
            nullable: false,
            span,
        }
    }
}

/// A field declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub modifiers: Vec<Modifier>,
    pub ty: TypeAnn,
    pub name: String,
    pub init: Option<Expr>,
    /// Set by the front end when the declaration carries an `@unused` tag.
    #[serde(default)]
    pub unused: bool,
    pub span: Span,
}

/// A method (or create/destroy) declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDecl {
    pub modifiers: Vec<Modifier>,
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<TypeAnn>,
    /// `None` for interface methods and imports.
    pub body: Option<BlockStmt>,
    #[serde(default)]
    pub unused: bool,
    /// Native import: implemented in runtime glue, no Shadow body.
    #[serde(default)]
    pub is_import: bool,
    /// Exported with an unmangled symbol for native callers.
    #[serde(default)]
    pub is_export: bool,
    pub span: Span,
}

/// A formal parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub modifiers: Vec<Modifier>,
    pub ty: TypeAnn,
    pub name: String,
    pub span: Span,
}

/// A brace-delimited statement block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// Statements in the AST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Expr(ExprStmt),
    LocalDecl(LocalDeclStmt),
    Block(BlockStmt),
    If(IfStmt),
    While(WhileStmt),
    For(Box<ForStmt>),
    Return(ReturnStmt),
    Break(BreakStmt),
    Continue(ContinueStmt),
    Throw(ThrowStmt),
    Try(Box<TryStmt>),
}

/// Expression statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// Local variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDeclStmt {
    pub modifiers: Vec<Modifier>,
    pub ty: TypeAnn,
    pub name: String,
    pub init: Option<Expr>,
    /// Resolved declared type; filled by the resolver.
    #[serde(default)]
    pub ty_ref: Option<TypeRef>,
    pub span: Span,
}

/// If statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_branch: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub span: Span,
}

/// While statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Box<Stmt>,
    pub span: Span,
}

/// For statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForStmt {
    pub init: Option<Stmt>,
    pub cond: Option<Expr>,
    pub update: Option<Expr>,
    pub body: Stmt,
    pub span: Span,
}

/// Return statement; multiple values return a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub values: Vec<Expr>,
    pub span: Span,
}

/// Break statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakStmt {
    pub span: Span,
}

/// Continue statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueStmt {
    pub span: Span,
}

/// Throw statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrowStmt {
    pub value: Expr,
    pub span: Span,
}

/// Try statement with catch clauses, an optional recover block, and an
/// optional finally block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryStmt {
    pub block: BlockStmt,
    pub catches: Vec<CatchClause>,
    pub recover: Option<BlockStmt>,
    pub finally: Option<BlockStmt>,
    pub span: Span,
}

/// A single catch clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub ty: TypeAnn,
    pub name: String,
    pub block: BlockStmt,
    /// Resolved caught type; filled by the resolver.
    #[serde(default)]
    pub ty_ref: Option<TypeRef>,
    pub span: Span,
}

/// An expression together with its span and resolver annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Resolved result type; filled by the resolver.
    #[serde(default)]
    pub ty: Option<TypeRef>,
    /// Resolved call/create target; filled by the resolver.
    #[serde(default)]
    pub method: Option<MethodRef>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            span,
            ty: None,
            method: None,
        }
    }
}

/// Expression variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    /// An unqualified name: a local, a parameter, or a field of `this`.
    Name(String),
    This,
    Field {
        object: Box<Expr>,
        name: String,
    },
    Call {
        /// Receiver; `None` for calls on `this`.
        object: Option<Box<Expr>>,
        method: String,
        type_args: Vec<TypeAnn>,
        args: Vec<Expr>,
    },
    /// `Type:create(args)`.
    Create {
        ty: TypeAnn,
        args: Vec<Expr>,
    },
    /// `Type:create[size, ...]`.
    NewArray {
        element: TypeAnn,
        sizes: Vec<Expr>,
        nullable: bool,
    },
    Index {
        array: Box<Expr>,
        indices: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Cast {
        ty: TypeAnn,
        expr: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

/// Literal values, discriminated by their Shadow primitive type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Boolean(bool),
    Byte(i8),
    UByte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Code(char),
    Float(f32),
    Double(f64),
    String(String),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    /// Short-circuit `and`; lowered to branches, never to a single instruction.
    CondAnd,
    /// Short-circuit `or`.
    CondOr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
    Complement,
}
