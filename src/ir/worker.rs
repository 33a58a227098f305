//! CFG worker: the cursor-based graph builder driven by the statement
//! walker.
//!
//! A worker tracks the graph fragment under construction (its entry and a
//! "current block" cursor) plus the next-outbound strategy: the edge label
//! to use on the next automatic connection. Growing resets the strategy to
//! `Any`. Since code is read linearly, the very first block a worker adds
//! is the entry node of its fragment.

use enumflags2::{bitflags, BitFlags};

use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::lexer::LineColumn;
use crate::ir::{
    BlockId, BlockKind, Cfg, EdgeKind, InstId, Instruction, Opcode, Reference,
};

/// Where `execute_with` places the instruction in the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecPlacement {
    /// push at the block tail
    #[default]
    Append,
    /// push at the block head, after any φ run
    Prepend,
}

#[derive(Debug, Default)]
pub struct CfgWorker {
    /// entry block of this worker's fragment
    pub entry: Option<BlockId>,
    /// cursor
    pub cur: Option<BlockId>,
    /// edge label for the next automatic connection
    pub strategy: EdgeKind,
    /// blocks created while inside a loop statement are flagged for the
    /// allocator's use-density heuristic
    pub loop_depth: usize,
}

impl CfgWorker {
    pub fn new() -> Self {
        CfgWorker::default()
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.cur
    }

    pub fn set_strategy(&mut self, kind: EdgeKind) {
        self.strategy = kind;
    }

    pub fn current_block_empty(&self, cfg: &Cfg) -> bool {
        match self.cur {
            Some(block) => cfg.block(block).inst_first.is_none(),
            None => true,
        }
    }

    /// Appends a new block linked from the current one by the pending
    /// strategy; the strategy resets to `Any`.
    pub fn grow(&mut self, cfg: &mut Cfg) -> BlockId {
        let block = cfg.new_block(self.loop_depth > 0);

        if let Some(cur) = self.cur {
            cfg.new_edge(cur, block, self.strategy);
        } else {
            self.entry = Some(block);
        }

        self.cur = Some(block);
        self.strategy = EdgeKind::Any;

        block
    }

    /// Optionally emits an edge from the cursor to `to` (labeled with the
    /// pending strategy) and/or moves the cursor.
    pub fn jump(
        &mut self,
        cfg: &mut Cfg,
        to: BlockId,
        change_cur: bool,
        make_edge: bool,
    ) {
        if make_edge {
            let from = self.cur.expect("jump edge requires a cursor");
            cfg.new_edge(from, to, self.strategy);
            self.strategy = EdgeKind::Any;
        }

        if change_cur {
            self.cur = Some(to);
        }
    }

    /// Splices another worker's fragment onto the cursor: connect, then
    /// adopt the source cursor and pending strategy.
    pub fn grow_with_graph(&mut self, cfg: &mut Cfg, src: &CfgWorker) {
        let Some(src_entry) = src.entry else {
            return;
        };

        match self.cur {
            Some(cur) => {
                cfg.new_edge(cur, src_entry, self.strategy);
            }
            None => {
                self.entry = Some(src_entry);
            }
        }

        self.cur = src.cur;
        self.strategy = src.strategy;
    }

    pub fn set_current_block_kind(&mut self, cfg: &mut Cfg, kind: BlockKind) {
        if let Some(cur) = self.cur {
            cfg.block_mut(cur).kind = kind;
        }
    }

    /// Pushes an instruction into the current block (growing one if the
    /// fragment is empty) and updates the worker state the opcode demands:
    /// `Return` retags the block as an exit and grows, `Test` tags the
    /// block and leaves graph growth to the caller.
    pub fn execute(
        &mut self,
        cfg: &mut Cfg,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
        op: Opcode,
        lvalue: Reference,
        operand1: Reference,
        operand2: Reference,
    ) -> InstId {
        self.execute_with(
            cfg,
            log,
            at,
            op,
            lvalue,
            operand1,
            operand2,
            ExecPlacement::Append,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute_with(
        &mut self,
        cfg: &mut Cfg,
        log: &mut DiagnosticLog,
        at: (LineColumn, LineColumn),
        op: Opcode,
        lvalue: Reference,
        operand1: Reference,
        operand2: Reference,
        placement: ExecPlacement,
    ) -> InstId {
        let block = match self.cur {
            Some(block) => block,
            None => self.grow(cfg),
        };

        if matches!(lvalue, Reference::Literal(_)) {
            log.log(DiagnosticCode::ExpressionLiteralLvalue, at.0, at.1, &[]);
        }

        let mut inst = Instruction::new(op);
        inst.lvalue = lvalue;
        inst.operand1 = operand1;
        inst.operand2 = operand2;

        let id = match placement {
            ExecPlacement::Append => cfg.push_back(block, inst),
            ExecPlacement::Prepend => {
                // skip the φ run: φ instructions stay at the block head
                let mut prev = None;
                let mut cursor = cfg.block(block).inst_first;
                while let Some(cur) = cursor {
                    if !cfg.inst(cur).is_phi() {
                        break;
                    }
                    prev = Some(cur);
                    cursor = cfg.inst(cur).next;
                }
                cfg.insert_inst(block, prev, inst)
            }
        };

        match op {
            Opcode::Return => {
                cfg.block_mut(block).kind = BlockKind::Exit;
                self.grow(cfg);
            }
            Opcode::Test => {
                cfg.block_mut(block).kind = BlockKind::Test;
            }
            _ => {}
        }

        id
    }
}

/// Statement context classification, queried as a bit mask.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementContextKind {
    Loop = 1,
    Switch = 2,
}

/// Frame giving `break`/`continue` their jump targets.
///
/// The frame is populated before the loop body is walked so nested
/// statements can see the outer targets. `test` tracks the tail block of
/// the condition expression, which may differ from its start block once
/// logical expansion runs.
#[derive(Debug)]
pub struct StatementContext {
    pub kind: StatementContextKind,
    pub continue_block: Option<BlockId>,
    pub break_block: Option<BlockId>,
    pub test_block: Option<BlockId>,
}

#[derive(Debug, Default)]
pub struct StatementContextStack {
    stack: Vec<StatementContext>,
}

impl StatementContextStack {
    pub fn push(&mut self, kind: StatementContextKind) {
        self.stack.push(StatementContext {
            kind,
            continue_block: None,
            break_block: None,
            test_block: None,
        });
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn top_mut(&mut self) -> &mut StatementContext {
        self.stack.last_mut().expect("statement context active")
    }

    /// Topmost frame whose kind matches the query mask.
    pub fn get(
        &self,
        query: BitFlags<StatementContextKind>,
    ) -> Option<&StatementContext> {
        self.stack
            .iter()
            .rev()
            .find(|frame| query.contains(frame.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::DiagnosticLog;

    fn at() -> (LineColumn, LineColumn) {
        (LineColumn::default(), LineColumn::default())
    }

    #[test]
    fn first_grow_becomes_entry() {
        let mut cfg = Cfg::new();
        let mut worker = CfgWorker::new();

        let b0 = worker.grow(&mut cfg);
        assert_eq!(worker.entry, Some(b0));
        assert_eq!(worker.cur, Some(b0));

        worker.set_strategy(EdgeKind::True);
        let b1 = worker.grow(&mut cfg);

        assert_eq!(cfg.block(b1).in_edges.len(), 1);
        assert_eq!(
            cfg.edge(cfg.block(b1).in_edges[0]).kind,
            EdgeKind::True
        );
        // strategy resets after the connection
        assert_eq!(worker.strategy, EdgeKind::Any);
    }

    #[test]
    fn jump_emits_edge_with_pending_strategy() {
        let mut cfg = Cfg::new();
        let mut worker = CfgWorker::new();

        let b0 = worker.grow(&mut cfg);
        let b1 = worker.grow(&mut cfg);

        worker.jump(&mut cfg, b0, false, false);
        assert_eq!(worker.cur, Some(b1));

        worker.set_strategy(EdgeKind::Jump);
        worker.jump(&mut cfg, b0, true, true);

        assert_eq!(worker.cur, Some(b0));
        let back = cfg.block(b0).in_edges.last().copied().unwrap();
        assert_eq!(cfg.edge(back).kind, EdgeKind::Jump);
        assert_eq!(cfg.edge(back).from, b1);
    }

    #[test]
    fn splice_adopts_source_cursor() {
        let mut cfg = Cfg::new();
        let mut outer = CfgWorker::new();
        let mut inner = CfgWorker::new();

        let o0 = outer.grow(&mut cfg);
        let i0 = inner.grow(&mut cfg);
        let i1 = inner.grow(&mut cfg);

        outer.grow_with_graph(&mut cfg, &inner);

        assert_eq!(outer.cur, Some(i1));
        assert_eq!(cfg.successors(o0).collect::<Vec<_>>(), vec![i0]);
    }

    #[test]
    fn execute_return_marks_exit_and_grows() {
        let mut cfg = Cfg::new();
        let mut log = DiagnosticLog::new();
        let mut worker = CfgWorker::new();

        worker.execute(
            &mut cfg,
            &mut log,
            at(),
            Opcode::Return,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );

        let entry = worker.entry.unwrap();
        assert_eq!(cfg.block(entry).kind, BlockKind::Exit);
        // a fresh successor block is the new cursor
        assert_ne!(worker.cur, Some(entry));
    }

    #[test]
    fn execute_test_marks_block_without_growing() {
        let mut cfg = Cfg::new();
        let mut log = DiagnosticLog::new();
        let mut worker = CfgWorker::new();

        worker.execute(
            &mut cfg,
            &mut log,
            at(),
            Opcode::Test,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
        );

        let entry = worker.entry.unwrap();
        assert_eq!(cfg.block(entry).kind, BlockKind::Test);
        assert_eq!(worker.cur, Some(entry));
    }

    #[test]
    fn literal_lvalue_is_rejected() {
        let mut cfg = Cfg::new();
        let mut log = DiagnosticLog::new();
        let mut worker = CfgWorker::new();

        // fabricate a literal reference; the def arena is not needed for
        // the validation path
        let literal =
            Reference::Literal(crate::compiler::scope::DefId::from_index(0));

        worker.execute(
            &mut cfg,
            &mut log,
            at(),
            Opcode::Assign,
            literal,
            Reference::Undefined,
            Reference::Undefined,
        );

        assert!(log.has_errors());
    }

    #[test]
    fn prepend_placement_lands_after_phi_run() {
        let mut cfg = Cfg::new();
        let mut log = DiagnosticLog::new();
        let mut worker = CfgWorker::new();

        let block = worker.grow(&mut cfg);
        cfg.push_back(block, Instruction::new(Opcode::Phi));
        let tail = cfg.push_back(block, Instruction::new(Opcode::Noop));

        let prepended = worker.execute_with(
            &mut cfg,
            &mut log,
            at(),
            Opcode::Store,
            Reference::Undefined,
            Reference::Undefined,
            Reference::Undefined,
            ExecPlacement::Prepend,
        );

        let order: Vec<_> = cfg
            .block_insts(block)
            .map(|i| cfg.inst(i).op)
            .collect();
        assert_eq!(order, vec![Opcode::Phi, Opcode::Store, Opcode::Noop]);
        assert_eq!(cfg.inst(prepended).next, Some(tail));
    }

    #[test]
    fn context_stack_query() {
        let mut stack = StatementContextStack::default();

        stack.push(StatementContextKind::Loop);
        stack.push(StatementContextKind::Switch);

        // break binds to the innermost loop-or-switch, continue skips the
        // switch frame
        let both = StatementContextKind::Loop | StatementContextKind::Switch;
        assert_eq!(
            stack.get(both).unwrap().kind,
            StatementContextKind::Switch
        );
        assert_eq!(
            stack
                .get(StatementContextKind::Loop.into())
                .unwrap()
                .kind,
            StatementContextKind::Loop
        );

        stack.pop();
        stack.pop();
        assert!(stack.get(both).is_none());
    }
}
