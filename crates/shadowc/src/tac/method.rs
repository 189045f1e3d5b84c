//! TAC methods and their nested block structure.
//!
//! A [`TacMethod`] owns its node arena, its local slots (parameters are the
//! prefix), and its [`BlockData`] arena. Blocks mirror the brace structure
//! of the source and hold the labels control may transfer to; looking a
//! label role up walks the parent chain, adding one is one-shot per block.

use crate::tac::nodes::{BlockId, LocalId, NodeId, TacKind, TacNode};
use crate::typecheck::{ModifiedType, SigId};
use shadow_ast::Span;

/// A local variable slot; parameters come first, temporaries last.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub ty: ModifiedType,
    pub is_parameter: bool,
}

/// One lexical block with its label slots.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub parent: Option<BlockId>,
    pub break_label: Option<NodeId>,
    pub continue_label: Option<NodeId>,
    pub recover_label: Option<NodeId>,
    pub done_label: Option<NodeId>,
    pub catch_label: Option<NodeId>,
    pub catch_switch_label: Option<NodeId>,
    /// Label for the cleanup code itself, visited by every exit path.
    pub cleanup_label: Option<NodeId>,
    /// Phi carrying the address to return to after a normal-exit cleanup.
    pub cleanup_phi: Option<NodeId>,
    /// Label for the cleanup entered while unwinding.
    pub cleanup_unwind_label: Option<NodeId>,
    /// Reachable by unwinding; drives finally code generation.
    pub unwind_target: bool,
    /// Contains cleanup code; suppresses dead-code warnings inside it.
    pub cleanup_target: bool,
}

/// A method's TAC: locals, blocks, and the linked node sequence.
#[derive(Debug)]
pub struct TacMethod {
    /// Signature in the type arena; `None` for the synthesized field
    /// initializer, which has no source-visible signature.
    pub signature: Option<SigId>,
    /// Display/mangling name for signature-less methods.
    pub special_name: Option<String>,
    pub locals: Vec<Local>,
    pub parameter_count: usize,
    pub nodes: Vec<TacNode>,
    pub blocks: Vec<BlockData>,
    pub entry: NodeId,
    head: Option<NodeId>,
    tail: Option<NodeId>,
}

impl TacMethod {
    pub fn new(signature: Option<SigId>, span: Span) -> Self {
        let mut method = TacMethod {
            signature,
            special_name: None,
            locals: Vec::new(),
            parameter_count: 0,
            nodes: Vec::new(),
            blocks: vec![BlockData::default()],
            entry: NodeId(0),
            head: None,
            tail: None,
        };
        let entry = method.create_node(
            TacKind::Label,
            ModifiedType {
                ty: crate::typecheck::TypeId(0),
                modifiers: Default::default(),
            },
            BlockId(0),
            span,
        );
        method.place(entry);
        method.entry = entry;
        method
    }

    pub fn root_block(&self) -> BlockId {
        BlockId(0)
    }

    // ----- nodes -----

    pub fn node(&self, id: NodeId) -> &TacNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TacNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Creates a node without linking it into the sequence. Labels are
    /// created detached and placed where control flow settles.
    pub fn create_node(
        &mut self,
        kind: TacKind,
        ty: ModifiedType,
        block: BlockId,
        span: Span,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(TacNode {
            kind,
            ty,
            block,
            span,
            prev: None,
            next: None,
        });
        id
    }

    /// Links a detached node at the end of the sequence.
    pub fn place(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id.0 as usize].prev.is_none());
        match self.tail {
            Some(tail) => {
                self.nodes[tail.0 as usize].next = Some(id);
                self.nodes[id.0 as usize].prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// Nodes in sequence order.
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter {
            method: self,
            next: self.head,
        }
    }

    pub fn first(&self) -> Option<NodeId> {
        self.head
    }

    // ----- locals -----

    pub fn add_parameter(&mut self, name: impl Into<String>, ty: ModifiedType) -> LocalId {
        debug_assert_eq!(self.parameter_count, self.locals.len());
        self.parameter_count += 1;
        self.push_local(name.into(), ty, true)
    }

    pub fn add_local(&mut self, name: impl Into<String>, ty: ModifiedType) -> LocalId {
        self.push_local(name.into(), ty, false)
    }

    pub fn add_temp_local(&mut self, ty: ModifiedType) -> LocalId {
        let name = format!("_temp{}", self.locals.len());
        self.push_local(name, ty, false)
    }

    fn push_local(&mut self, name: String, ty: ModifiedType, is_parameter: bool) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(Local {
            name,
            ty,
            is_parameter,
        });
        id
    }

    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.0 as usize]
    }

    // ----- blocks -----

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0 as usize]
    }

    pub fn new_block(&mut self, parent: BlockId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            parent: Some(parent),
            ..BlockData::default()
        });
        id
    }

    fn fresh_label(&mut self, block: BlockId, span: Span) -> NodeId {
        self.create_node(
            TacKind::Label,
            ModifiedType {
                ty: crate::typecheck::TypeId(0),
                modifiers: Default::default(),
            },
            block,
            span,
        )
    }

    pub fn add_break(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).break_label.is_none(),
            "break label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).break_label = Some(label);
        label
    }

    pub fn add_continue(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).continue_label.is_none(),
            "continue label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).continue_label = Some(label);
        label
    }

    pub fn add_recover(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).recover_label.is_none(),
            "recover label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).recover_label = Some(label);
        label
    }

    pub fn add_done(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).done_label.is_none(),
            "done label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).done_label = Some(label);
        label
    }

    pub fn add_catch(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).catch_label.is_none(),
            "catch label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).catch_label = Some(label);
        label
    }

    pub fn add_catch_switch(&mut self, block: BlockId, span: Span) -> NodeId {
        assert!(
            self.block(block).catch_switch_label.is_none(),
            "catch switch label already added"
        );
        let label = self.fresh_label(block, span);
        self.block_mut(block).catch_switch_label = Some(label);
        label
    }

    /// Adds the cleanup triple: the shared cleanup label, the phi carrying
    /// the return address of each normal-exit visitor, and the unwind-path
    /// label.
    pub fn add_cleanup(&mut self, block: BlockId, phi_ty: ModifiedType, span: Span) -> NodeId {
        assert!(
            self.block(block).cleanup_label.is_none(),
            "cleanup label already added"
        );
        let label = self.fresh_label(block, span.clone());
        let phi = self.create_node(
            TacKind::Phi {
                entries: Vec::new(),
            },
            phi_ty,
            block,
            span.clone(),
        );
        let unwind = self.fresh_label(block, span);
        let data = self.block_mut(block);
        data.cleanup_label = Some(label);
        data.cleanup_phi = Some(phi);
        data.cleanup_unwind_label = Some(unwind);
        label
    }

    // ----- label lookups walking the parent chain -----

    fn walk_up<T>(&self, from: BlockId, mut f: impl FnMut(&BlockData) -> Option<T>) -> Option<T> {
        let mut current = Some(from);
        while let Some(id) = current {
            let data = self.block(id);
            if let Some(found) = f(data) {
                return Some(found);
            }
            current = data.parent;
        }
        None
    }

    pub fn get_break(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.break_label)
    }

    pub fn get_continue(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.continue_label)
    }

    pub fn get_recover(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.recover_label)
    }

    pub fn get_done(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.done_label)
    }

    pub fn get_catch_switch(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.catch_switch_label)
    }

    pub fn get_cleanup(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.cleanup_label)
    }

    pub fn get_cleanup_phi(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.cleanup_phi)
    }

    pub fn get_cleanup_unwind(&self, from: BlockId) -> Option<NodeId> {
        self.walk_up(from, |b| b.cleanup_unwind_label)
    }

    /// The innermost unwind destination: a catch switch or an unwinding
    /// cleanup, whichever is nearer. Cleanup code must not unwind into the
    /// handler that owns it, so the block above a cleanup-code block is
    /// passed over.
    pub fn get_unwind(&self, from: BlockId) -> Option<NodeId> {
        let mut current = Some(from);
        let mut skip_owner = false;
        while let Some(id) = current {
            let data = self.block(id);
            if skip_owner {
                skip_owner = false;
            } else if let Some(label) = data.catch_switch_label.or(data.cleanup_unwind_label) {
                return Some(label);
            }
            if data.cleanup_target {
                skip_owner = true;
            }
            current = data.parent;
        }
        None
    }

    /// Method calls and throws make unwinding possible; every enclosing
    /// finally becomes a potential unwind target.
    pub fn add_unwind_source(&mut self, from: BlockId) {
        let mut current = Some(from);
        while let Some(id) = current {
            if self.block(id).cleanup_label.is_some() {
                self.block_mut(id).unwind_target = true;
            }
            current = self.block(id).parent;
        }
    }

    pub fn set_cleanup_target(&mut self, block: BlockId) {
        self.block_mut(block).cleanup_target = true;
    }

    /// Dead code inside cleanup code is not reported.
    pub fn is_inside_cleanup(&self, from: BlockId) -> bool {
        self.walk_up(from, |b| if b.cleanup_target { Some(()) } else { None })
            .is_some()
    }

    /// Enclosing blocks of `from`, innermost first, stopping before
    /// `stop` (exclusive); `None` walks to the root.
    pub fn blocks_up_to(&self, from: BlockId, stop: Option<BlockId>) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            if Some(id) == stop {
                break;
            }
            out.push(id);
            current = self.block(id).parent;
        }
        out
    }
}

pub struct NodeIter<'a> {
    method: &'a TacMethod,
    next: Option<NodeId>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.method.node(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void_ty() -> ModifiedType {
        ModifiedType {
            ty: crate::typecheck::TypeId(0),
            modifiers: Default::default(),
        }
    }

    #[test]
    fn label_lookup_walks_the_parent_chain() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        let loop_block = method.new_block(root);
        let break_label = method.add_break(loop_block, 0..0);
        method.add_continue(loop_block, 0..0);
        let inner = method.new_block(loop_block);
        assert_eq!(method.get_break(inner), Some(break_label));
        assert_eq!(method.get_break(root), None);
    }

    #[test]
    #[should_panic(expected = "break label already added")]
    fn label_roles_are_one_shot() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        method.add_break(root, 0..0);
        method.add_break(root, 0..0);
    }

    #[test]
    fn unwind_prefers_the_innermost_handler() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        let outer_try = method.new_block(root);
        method.add_cleanup(outer_try, void_ty(), 0..0);
        let inner_try = method.new_block(outer_try);
        let switch = method.add_catch_switch(inner_try, 0..0);
        let body = method.new_block(inner_try);
        assert_eq!(method.get_unwind(body), Some(switch));
        assert_eq!(
            method.get_unwind(outer_try),
            method.block(outer_try).cleanup_unwind_label
        );
    }

    #[test]
    fn unwind_sources_mark_enclosing_finallys() {
        let mut method = TacMethod::new(None, 0..0);
        let root = method.root_block();
        let try_block = method.new_block(root);
        method.add_cleanup(try_block, void_ty(), 0..0);
        let body = method.new_block(try_block);
        assert!(!method.block(try_block).unwind_target);
        method.add_unwind_source(body);
        assert!(method.block(try_block).unwind_target);
        assert!(!method.block(root).unwind_target);
    }
}
