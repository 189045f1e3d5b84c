//! TAC node definitions.
//!
//! Each method's code is a doubly linked sequence of typed nodes stored in
//! an arena `Vec`; [`NodeId`] is the stable handle. A node that produces a
//! value IS that value: operands are node ids. Control edges are implicit by
//! fall-through except at terminators (`Branch`, `Return`, `Throw`,
//! `Resume`, `CatchSwitch`).

use crate::typecheck::{ModifiedType, SigId, TypeId};
use shadow_ast::{BinaryOp, Literal, Span, UnaryOp};

/// Handle to a node within its owning method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Handle to a block within its owning method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Handle to a local variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Runtime helpers the emitted code calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    Allocate,
    AllocateArray,
    IncrementRef,
    DecrementRef,
    Catch,
    Throw,
}

impl RuntimeFn {
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeFn::Allocate => "__allocate",
            RuntimeFn::AllocateArray => "__allocateArray",
            RuntimeFn::IncrementRef => "__incrementRef",
            RuntimeFn::DecrementRef => "__decrementRef",
            RuntimeFn::Catch => "__shadow_catch",
            RuntimeFn::Throw => "__shadow_throw",
        }
    }
}

/// What a `Call` dispatches to: a `MethodRef` node (direct or method-table
/// dispatch, decided at emission), a class's generated field initializer,
/// or a runtime helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFunction {
    Ref(NodeId),
    FieldInit(TypeId),
    Runtime(RuntimeFn),
}

/// The shape of a `Branch` terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchKind {
    /// Unconditional jump to a label.
    Direct(NodeId),
    /// Two-way conditional jump.
    Conditional {
        condition: NodeId,
        true_target: NodeId,
        false_target: NodeId,
    },
    /// Dispatch on a phi of block addresses; the possible destinations are
    /// the phi's incoming values. Used at the tail of cleanup code.
    Indirect(NodeId),
}

/// The closed set of TAC operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TacKind {
    Label,
    Branch(BranchKind),
    /// Incoming `(value, predecessor label)` pairs; sits immediately after
    /// its label. Cleanup phis carry labels as values (block addresses).
    Phi {
        entries: Vec<(NodeId, NodeId)>,
    },
    Literal(Literal),
    VariableRef(LocalId),
    FieldRef {
        object: NodeId,
        class: TypeId,
        field: String,
    },
    /// An array element reference: the addressable cell, like `FieldRef`.
    ElementRef {
        array: NodeId,
        indices: Vec<NodeId>,
    },
    MethodRef {
        object: Option<NodeId>,
        signature: SigId,
    },
    /// The process-wide instance of a singleton class (`Console`).
    SingletonRef {
        class: TypeId,
    },
    Load {
        reference: NodeId,
    },
    Store {
        reference: NodeId,
        value: NodeId,
    },
    Call {
        function: CallFunction,
        args: Vec<NodeId>,
        /// `(normal continuation, unwind label)` when the call sits inside
        /// a protected region and must be emitted as an `invoke`.
        landing: Option<(NodeId, NodeId)>,
    },
    Return {
        values: Vec<NodeId>,
    },
    Cast {
        value: NodeId,
    },
    NewObject {
        class: TypeId,
    },
    NewArray {
        array: TypeId,
        dims: Vec<NodeId>,
    },
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Throw {
        value: NodeId,
        /// Unwind label when thrown inside a protected region.
        unwind: Option<NodeId>,
    },
    CatchSwitch {
        /// Labels of the catch pads, in clause order.
        pads: Vec<NodeId>,
        /// Unwind destination past this switch; `None` unwinds to caller.
        unwind: Option<NodeId>,
    },
    CatchPad {
        exception: TypeId,
        switch: NodeId,
    },
    CleanupPad,
    /// Continue unwinding out of a cleanup pad; `None` resumes to caller.
    Resume {
        pad: NodeId,
        unwind: Option<NodeId>,
    },
    LandingPad,
    NoOp,
}

/// One TAC node: kind, result type, owning block, source location, and its
/// links in the method's node sequence.
#[derive(Debug, Clone)]
pub struct TacNode {
    pub kind: TacKind,
    pub ty: ModifiedType,
    pub block: BlockId,
    pub span: Span,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl TacNode {
    /// Ordered operand ids, for analyses that walk uses generically.
    pub fn operands(&self) -> Vec<NodeId> {
        match &self.kind {
            TacKind::Label
            | TacKind::Literal(_)
            | TacKind::VariableRef(_)
            | TacKind::SingletonRef { .. }
            | TacKind::NewObject { .. }
            | TacKind::CleanupPad
            | TacKind::LandingPad
            | TacKind::NoOp => Vec::new(),
            TacKind::Branch(BranchKind::Direct(_)) => Vec::new(),
            TacKind::Branch(BranchKind::Conditional { condition, .. }) => vec![*condition],
            TacKind::Branch(BranchKind::Indirect(phi)) => vec![*phi],
            TacKind::Phi { entries } => entries.iter().map(|(v, _)| *v).collect(),
            TacKind::FieldRef { object, .. } => vec![*object],
            TacKind::ElementRef { array, indices } => {
                let mut out = vec![*array];
                out.extend(indices);
                out
            }
            TacKind::MethodRef { object, .. } => object.iter().copied().collect(),
            TacKind::Load { reference } => vec![*reference],
            TacKind::Store { reference, value } => vec![*reference, *value],
            TacKind::Call { args, .. } => args.clone(),
            TacKind::Return { values } => values.clone(),
            TacKind::Cast { value } => vec![*value],
            TacKind::NewArray { dims, .. } => dims.clone(),
            TacKind::Binary { left, right, .. } => vec![*left, *right],
            TacKind::Unary { operand, .. } => vec![*operand],
            TacKind::Throw { value, .. } => vec![*value],
            TacKind::CatchSwitch { .. } => Vec::new(),
            TacKind::CatchPad { .. } => Vec::new(),
            TacKind::Resume { .. } => Vec::new(),
        }
    }

    /// True for nodes that end a straight-line run.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            TacKind::Branch(_)
                | TacKind::Return { .. }
                | TacKind::Throw { .. }
                | TacKind::Resume { .. }
                | TacKind::CatchSwitch { .. }
        )
    }
}
