//! Graph-coloring register allocator (George coalescing, optimistic
//! spill).
//!
//! State machine: Build → Simplify → Coalesce → Freeze → Spill → Select →
//! Done. The interference graph is an N×N byte matrix over local
//! variables where every cell holds up to four planes: the mutable working
//! graph, the immutable full graph, move-related edges and the coalesce
//! graph (which starts as the identity). Spilling injects `Read`/`Write`
//! code, extends the local universe with fresh temporaries and restarts
//! from Build on the mutated CFG until allocation converges.

use log::{debug, trace};

use crate::compiler::scope::{
    Allocation, AllocationKind, DefId, Definition, VariableDef, VariableKind,
};
use crate::ir::{InstId, Instruction, Opcode, Reference};
use crate::optimizer::{defuse, liveness, Optimizer, OptimizerProfile};

const PLANE_MUTABLE: u8 = 0x01;
const PLANE_FULL: u8 = 0x02;
const PLANE_MOVE: u8 = 0x04;
const PLANE_COALESCE: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Build,
    Simplify,
    Coalesce,
    Freeze,
    Spill,
    Select,
    Done,
}

struct ColorState {
    available: usize,
    colors: Vec<bool>,
}

/// Bit-plane interference graph over the local variable ids.
struct InterferenceGraph {
    dim: usize,
    matrix: Vec<u8>,
    deg_graph: Vec<usize>,
    deg_move: Vec<usize>,
    /// degree 0 does not imply absence, so presence is tracked explicitly
    mutable_nodes: Vec<bool>,
    color_state: Vec<ColorState>,
}

impl InterferenceGraph {
    fn new(dim: usize, num_registers: usize) -> Self {
        let mut ig = InterferenceGraph {
            dim,
            matrix: vec![0; dim * dim],
            deg_graph: vec![0; dim],
            deg_move: vec![0; dim],
            mutable_nodes: vec![false; dim],
            color_state: (0..dim)
                .map(|_| ColorState {
                    available: num_registers,
                    colors: vec![false; num_registers],
                })
                .collect(),
        };

        // the coalesce plane starts as the identity: every node coalesces
        // with nothing but itself
        for i in 0..dim {
            ig.matrix[i * dim + i] |= PLANE_COALESCE;
        }

        ig
    }

    fn cell(&self, planes: u8, row: usize, col: usize) -> u8 {
        self.matrix[row * self.dim + col] & planes
    }

    fn cell_set(&mut self, planes: u8, row: usize, col: usize) {
        self.matrix[row * self.dim + col] |= planes;
    }

    fn cell_reset(&mut self, planes: u8, row: usize, col: usize) {
        self.matrix[row * self.dim + col] &= !planes;
    }

    fn add_mutable(&mut self, n: usize) {
        self.mutable_nodes[n] = true;
    }

    fn is_empty(&self) -> bool {
        !self.mutable_nodes.iter().any(|m| *m)
    }

    fn connect(&mut self, planes: u8, row: usize, col: usize) {
        let cell = self.cell(PLANE_MUTABLE | PLANE_MOVE, row, col);

        if planes & PLANE_MUTABLE != 0 && cell & PLANE_MUTABLE == 0 {
            self.deg_graph[row] += 1;
            self.deg_graph[col] += 1;
            self.add_mutable(row);
            self.add_mutable(col);
        }
        if planes & PLANE_MOVE != 0 && cell & PLANE_MOVE == 0 {
            self.deg_move[row] += 1;
            self.deg_move[col] += 1;
        }

        self.cell_set(planes, row, col);
        self.cell_set(planes, col, row);
    }

    fn disconnect(&mut self, planes: u8, row: usize, col: usize) {
        let cell = self.cell(PLANE_MUTABLE | PLANE_MOVE, row, col);

        if planes & PLANE_MUTABLE != 0 && cell & PLANE_MUTABLE != 0 {
            self.deg_graph[row] = self.deg_graph[row].saturating_sub(1);
            self.deg_graph[col] = self.deg_graph[col].saturating_sub(1);
        }
        if planes & PLANE_MOVE != 0 && cell & PLANE_MOVE != 0 {
            self.deg_move[row] = self.deg_move[row].saturating_sub(1);
            self.deg_move[col] = self.deg_move[col].saturating_sub(1);
        }

        self.cell_reset(planes, row, col);
        self.cell_reset(planes, col, row);
    }

    fn node_remove(&mut self, planes: u8, n: usize) {
        for i in 0..self.dim {
            self.disconnect(planes, n, i);
        }

        if planes & PLANE_MUTABLE != 0 {
            self.mutable_nodes[n] = false;
        }
    }

    /// Redirects to the node that actually holds a coalesced group.
    fn coalesce_site(&self, mut n: usize) -> usize {
        while self.cell(PLANE_COALESCE, n, n) == 0 {
            let mut moved = false;
            for i in 0..self.dim {
                if self.cell(PLANE_MUTABLE, n, i) != 0 {
                    n = i;
                    moved = true;
                    break;
                }
            }
            if !moved {
                break;
            }
        }

        n
    }

    /// Coalesces `src` into `dest`: `src` leaves every plane except the
    /// coalesce graph, `dest` adopts its edges.
    fn coalesce(&mut self, dest: usize, src: usize) -> usize {
        if dest == src {
            return dest;
        }

        let dest = self.coalesce_site(dest);

        self.cell_reset(PLANE_COALESCE, src, src);
        self.connect(PLANE_COALESCE, dest, src);

        for i in 0..self.dim {
            let cell = self.cell(PLANE_MUTABLE | PLANE_MOVE, src, i);

            if cell & PLANE_MUTABLE != 0 {
                self.connect(PLANE_MUTABLE, dest, i);
            }
            if cell & PLANE_MOVE != 0 {
                self.connect(PLANE_MOVE, dest, i);
            }
        }

        self.node_remove(PLANE_MUTABLE | PLANE_MOVE, src);

        dest
    }
}

struct ColorFrame {
    node: usize,
    spill: bool,
}

struct HeuristicAllocator<'o, 'a> {
    om: &'o mut Optimizer<'a>,
    profile: OptimizerProfile,
    ig: InterferenceGraph,
    state: State,
    num_registers: usize,
    color_stack: Vec<ColorFrame>,
}

impl<'o, 'a> HeuristicAllocator<'o, 'a> {
    fn new(
        om: &'o mut Optimizer<'a>,
        profile: OptimizerProfile,
        num_registers: usize,
    ) -> Self {
        HeuristicAllocator {
            om,
            profile,
            ig: InterferenceGraph::new(0, num_registers),
            state: State::Build,
            num_registers,
            color_stack: Vec::new(),
        }
    }

    fn push_color_node(&mut self, n: usize, spill: bool) {
        self.color_stack.push(ColorFrame { node: n, spill });
        self.ig.node_remove(PLANE_MUTABLE, n);
    }

    /// Spill priority: lower is better. Dense use inside loops makes a
    /// node expensive; high degree makes it attractive. Temporaries
    /// injected by earlier spill rounds must not be re-spilled (their
    /// ranges are already minimal), so they carry maximal cost.
    fn spill_cost(&self, n: usize) -> f32 {
        let def = self.om.local_defs[n];
        if self
            .om
            .defs
            .get(def)
            .as_variable()
            .map(|v| v.kind == VariableKind::Temporary)
            .unwrap_or(false)
        {
            return f32::MAX;
        }

        let mut p = 0.0f32;

        for i in 0..self.ig.dim {
            if self.ig.cell(PLANE_COALESCE, n, i) != 0 {
                let item =
                    &self.om.variables[self.om.varmap_lid_to_index(i)];
                p += (item.ud_loop_outside + item.ud_loop_inside * 10) as f32;
            }
        }

        p / self.ig.deg_graph[n].max(1) as f32
    }

    /// Flushes one live set into the graph: all contained locals
    /// pairwise interfere.
    fn connect_live_set(&mut self, indices: &[usize]) {
        for (i, a) in indices.iter().enumerate() {
            if self.om.varmap_is_member(*a) {
                continue;
            }
            let a = self.om.varmap_index_to_lid(*a);
            self.ig.add_mutable(a);

            for b in indices.iter().skip(i + 1) {
                if self.om.varmap_is_member(*b) {
                    continue;
                }
                let b = self.om.varmap_index_to_lid(*b);
                if a != b {
                    self.ig.connect(PLANE_MUTABLE | PLANE_FULL, a, b);
                }
            }
        }
    }

    fn build(&mut self) {
        self.ig =
            InterferenceGraph::new(self.profile.num_locals, self.num_registers);

        for index in 0..self.om.instructions.len() {
            let live_in: Vec<usize> =
                self.om.instructions[index].live_in.iter().collect();
            let live_out: Vec<usize> =
                self.om.instructions[index].live_out.iter().collect();

            self.connect_live_set(&live_in);
            self.connect_live_set(&live_out);
        }

        // move-related pairs: `a := b` over two distinct, non-neighboring
        // local definitions
        for index in 0..self.om.instructions.len() {
            let inst = self.om.cfg.inst(self.om.instructions[index].inst);

            if inst.op != Opcode::Assign {
                continue;
            }
            let (Some(v1), Some(v2)) = (
                inst.lvalue.as_var_def(self.om.defs),
                inst.operand1.as_var_def(self.om.defs),
            ) else {
                continue;
            };

            let i1 = self.om.varmap_index(v1);
            let i2 = self.om.varmap_index(v2);
            if self.om.varmap_is_member(i1) || self.om.varmap_is_member(i2) {
                continue;
            }

            let l1 = self.om.varmap_index_to_lid(i1);
            let l2 = self.om.varmap_index_to_lid(i2);
            if l1 != l2 && self.ig.cell(PLANE_FULL, l1, l2) == 0 {
                self.ig.connect(PLANE_MOVE, l1, l2);
            }
        }

        self.state = State::Simplify;
    }

    /// Repeatedly removes non-move-related nodes with degree < K.
    fn simplify(&mut self) {
        let mut run = true;

        while run {
            run = false;

            for i in 0..self.ig.dim {
                if self.ig.mutable_nodes[i]
                    && self.ig.deg_move[i] == 0
                    && self.ig.deg_graph[i] < self.num_registers
                {
                    self.push_color_node(i, false);
                    run = true;
                    break;
                }
            }
        }

        self.state = State::Coalesce;
    }

    /// George's heuristic: coalesce move pair (x, y) iff every neighbor t
    /// of x interferes with y or has degree < K. A successful coalesce
    /// mutates the graph, so the machine goes back to Simplify.
    fn coalesce(&mut self) {
        self.state = State::Freeze;

        for x in 0..self.ig.dim {
            if !self.ig.mutable_nodes[x] || self.ig.deg_move[x] == 0 {
                continue;
            }

            for y in 0..self.ig.dim {
                if x == y
                    || !self.ig.mutable_nodes[y]
                    || self.ig.cell(PLANE_MOVE, x, y) == 0
                {
                    continue;
                }

                let mut safe = true;
                for t in 0..self.ig.dim {
                    if self.ig.cell(PLANE_MUTABLE, x, t) == 0 {
                        continue;
                    }
                    safe = safe
                        && (self.ig.cell(PLANE_MUTABLE, t, y) != 0
                            || self.ig.deg_graph[t] < self.num_registers);
                    if !safe {
                        break;
                    }
                }

                if safe {
                    trace!("coalesce {x} <- {y}");
                    self.ig.disconnect(PLANE_MOVE, x, y);
                    self.ig.coalesce(x, y);
                    self.state = State::Simplify;
                    return;
                }
            }
        }
    }

    /// Demotes one low-degree move-related node to non-move-related.
    fn freeze(&mut self) {
        self.state = State::Spill;

        for i in 0..self.ig.dim {
            if self.ig.mutable_nodes[i]
                && self.ig.deg_move[i] > 0
                && self.ig.deg_graph[i] < self.num_registers
            {
                self.ig.node_remove(PLANE_MOVE, i);
                self.state = State::Simplify;
                return;
            }
        }
    }

    /// Pushes the cheapest high-degree node as a potential spill.
    fn spill(&mut self) {
        let mut candidate: Option<(usize, f32)> = None;

        for i in 0..self.ig.dim {
            if !self.ig.mutable_nodes[i]
                || self.ig.deg_graph[i] < self.num_registers
            {
                continue;
            }

            let p = self.spill_cost(i);
            match candidate {
                Some((_, best)) if p >= best => {}
                _ => candidate = Some((i, p)),
            }
        }

        match candidate {
            Some((node, cost)) => {
                debug!("potential spill: local {node} (cost {cost})");
                self.push_color_node(node, true);
                self.state = State::Simplify;
            }
            None => self.state = State::Select,
        }
    }

    /// Colors a node and its coalesced partners; returns false when the
    /// palette is depleted.
    fn assign_color(&mut self, n: usize) -> bool {
        if self.ig.color_state[n].available == 0 {
            return false;
        }

        let color = (0..self.num_registers)
            .find(|c| !self.ig.color_state[n].colors[*c])
            .expect("availability implies a free color");

        for i in 0..self.ig.dim {
            if self.ig.cell(PLANE_COALESCE, n, i) == 0 {
                continue;
            }

            let def = self.om.local_defs[i];
            if let Some(var) = self.om.defs.get_mut(def).as_variable_mut() {
                var.allocation = Allocation {
                    kind: AllocationKind::Register,
                    location: color,
                };
            }

            // propagate occupancy to the full-graph neighbors
            for j in 0..self.ig.dim {
                if self.ig.cell(PLANE_FULL, i, j) != 0
                    && !self.ig.color_state[j].colors[color]
                {
                    self.ig.color_state[j].colors[color] = true;
                    self.ig.color_state[j].available -= 1;
                }
            }
        }

        true
    }

    /// Unwinds the color stack. A spill frame assigns a distinct stack
    /// slot, injects spill code and sends the machine back to Build.
    fn select(&mut self) {
        self.state = State::Done;

        let mut spill_frame = None;
        let frames: Vec<(usize, bool)> = self
            .color_stack
            .iter()
            .rev()
            .map(|f| (f.node, f.spill))
            .collect();

        for (node, spill) in frames {
            if spill {
                spill_frame = Some(node);
                self.state = State::Build;
                break;
            }

            if !self.assign_color(node) {
                // a non-spill node always has a register by construction
                debug_assert!(false, "palette depleted for colorable node");
            }
        }

        let Some(spilled) = spill_frame else {
            return;
        };

        // distinct slot across every rebuild round
        let slot = self.profile.num_var_on_stack;
        self.profile.num_var_on_stack += 1;

        let def = self.om.local_defs[spilled];
        if let Some(var) = self.om.defs.get_mut(def).as_variable_mut() {
            var.allocation = Allocation {
                kind: AllocationKind::Stack,
                location: slot,
            };
        }

        debug!("spill local {spilled} into slot {slot}");

        // mutate the CFG: bracket every read and write of the spilled
        // variable with slot traffic
        let blocks: Vec<_> = self.om.postorder.iter().rev().copied().collect();
        for block in blocks {
            let insts: Vec<InstId> =
                self.om.cfg.block_insts(block).collect();

            for target in insts {
                self.spill_code_read(target, def, slot);
                self.spill_code_write(target, def, slot);
            }
        }
    }

    /// `tmp ← READ[slot]` before an instruction reading the spilled
    /// variable; the read operands are rewritten to the temporary.
    fn spill_code_read(&mut self, target: InstId, var: DefId, slot: usize) {
        let (reads1, reads2) = {
            let inst = self.om.cfg.inst(target);
            (
                inst.operand1.as_def() == Some(var),
                inst.operand2.as_def() == Some(var),
            )
        };

        if !reads1 && !reads2 {
            return;
        }

        let lid = self.profile.num_locals;
        let (modifiers, type_name) = {
            let template = self
                .om
                .defs
                .get(var)
                .as_variable()
                .expect("spilled definition is a variable");
            (template.modifiers, template.type_name.clone())
        };
        let temp = self.om.defs.alloc(Definition::Variable(VariableDef {
            modifiers,
            type_name,
            kind: VariableKind::Temporary,
            ordinal: lid,
            name: format!("spill{lid}"),
            allocation: Allocation::default(),
        }));
        self.om.local_defs.push(temp);

        let block = self.om.cfg.inst(target).block.expect("linked");
        let prev = self.om.cfg.inst(target).prev;

        let mut read = Instruction::new(Opcode::Read);
        read.lvalue = Reference::def(temp);
        read.rw_stack_loc = Some(slot);
        self.om.cfg.insert_inst(block, prev, read);

        let inst = self.om.cfg.inst_mut(target);
        if reads1 {
            inst.operand1 = Reference::def(temp);
        }
        if reads2 {
            inst.operand2 = Reference::def(temp);
        }

        self.profile.num_instructions += 1;
        self.profile.num_locals += 1;
        self.profile.num_variables += 1;
    }

    /// `WRITE[slot] ← var` after an instruction writing the spilled
    /// variable.
    fn spill_code_write(&mut self, target: InstId, var: DefId, slot: usize) {
        let writes = {
            let inst = self.om.cfg.inst(target);
            inst.lvalue.as_def() == Some(var)
        };

        if !writes {
            return;
        }

        let block = self.om.cfg.inst(target).block.expect("linked");
        let lvalue = self.om.cfg.inst(target).lvalue;

        let mut write = Instruction::new(Opcode::Write);
        write.operand1 = lvalue;
        write.rw_stack_loc = Some(slot);
        self.om.cfg.insert_inst(block, Some(target), write);

        self.profile.num_instructions += 1;
    }

    /// Runs the machine to completion; false means spill code was
    /// injected and the caller must rebuild facts and start over.
    fn run(&mut self) -> bool {
        loop {
            match self.state {
                State::Build => self.build(),
                State::Simplify => self.simplify(),
                State::Coalesce => self.coalesce(),
                State::Freeze => self.freeze(),
                State::Spill => self.spill(),
                State::Select => {
                    self.select();

                    if self.state == State::Build {
                        return false;
                    }
                }
                State::Done => {
                    debug_assert!(self.ig.is_empty() || self.ig.dim == 0);
                    return true;
                }
            }
        }
    }
}

/// Graph-coloring entry point; loops build/allocate rounds until no spill
/// remains, then persists the final profile.
pub fn allocate(om: &mut Optimizer, num_registers: usize) {
    let mut profile = om.profile.clone();
    profile.reg_count = num_registers;

    loop {
        // repopulate facts on the (possibly mutated) graph
        om.apply_profile(&profile);
        defuse::analyze(om);
        liveness::analyze(om);

        let mut allocator =
            HeuristicAllocator::new(om, profile.clone(), num_registers);
        let converged = allocator.run();
        profile = allocator.profile.clone();

        if converged {
            break;
        }
    }

    om.apply_profile(&profile);
}
