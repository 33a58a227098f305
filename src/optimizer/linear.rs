//! Greedy linear-scan register allocator.
//!
//! Live intervals come straight from the liveness sets: `start`/`end` are
//! the smallest and largest program points where the variable is live.
//! Intervals are walked in increasing start order against an active set
//! ordered by increasing end; when the register file is full, the active
//! interval reaching farthest is the spill victim. Member variables are
//! never allocated here.

use itertools::Itertools;
use log::debug;

use crate::compiler::error::{DiagnosticCode, DiagnosticLog};
use crate::compiler::lexer::LineColumn;
use crate::compiler::scope::{Allocation, AllocationKind, VariableKind};
use crate::optimizer::{defuse, liveness, Optimizer};
use crate::utils::IndexSet;

#[derive(Debug, Clone, Copy)]
struct LiveInterval {
    start: usize,
    end: usize,
    spilled: bool,
    location: usize,
    active_order: usize,
}

struct LinearScanAllocator {
    num_registers: usize,
    register_occupied: Vec<bool>,
    num_on_stack: usize,
    /// indexed by lid
    intervals: Vec<LiveInterval>,
    /// interval indices in increasing start order
    scan_order: Vec<usize>,
    /// interval indices in increasing end order
    active_order: Vec<usize>,
    active: Vec<bool>,
    active_count: usize,
}

impl LinearScanAllocator {
    fn new(om: &Optimizer, num_registers: usize) -> Self {
        let num_intervals = om.profile.num_locals;

        let mut intervals = vec![
            LiveInterval {
                // max start marks an uninitialized range
                start: om.profile.num_instructions,
                end: 0,
                spilled: false,
                location: 0,
                active_order: 0,
            };
            num_intervals
        ];

        // derive ranges from the live sets at every program point
        for (point, item) in om.instructions.iter().enumerate() {
            extend_intervals(om, &mut intervals, &item.live_in, point);
            extend_intervals(om, &mut intervals, &item.live_out, point);
        }

        let scan_order: Vec<usize> = (0..num_intervals)
            .sorted_by_key(|i| intervals[*i].start)
            .collect();
        let active_order: Vec<usize> = (0..num_intervals)
            .sorted_by_key(|i| intervals[*i].end)
            .collect();

        for (order, interval) in active_order.iter().enumerate() {
            intervals[*interval].active_order = order;
        }

        LinearScanAllocator {
            num_registers,
            register_occupied: vec![false; num_registers],
            num_on_stack: 0,
            intervals,
            scan_order,
            active_order,
            active: vec![false; num_intervals],
            active_count: 0,
        }
    }

    fn interval_valid(&self, interval: &LiveInterval, max: usize) -> bool {
        interval.start < max
    }

    fn register_allocate(&mut self) -> usize {
        let reg = self
            .register_occupied
            .iter()
            .position(|r| !*r)
            .expect("the scan keeps a register free");
        self.register_occupied[reg] = true;
        reg
    }

    fn stack_allocate(&mut self) -> usize {
        let slot = self.num_on_stack;
        self.num_on_stack += 1;
        slot
    }

    /// Retires every active interval ending before the current start.
    fn expire(&mut self, current: usize) {
        for order in 0..self.active_order.len() {
            let idx = self.active_order[order];
            if !self.active[order] {
                continue;
            }

            if self.intervals[idx].end >= self.intervals[current].start {
                return;
            }

            self.active[order] = false;
            self.active_count -= 1;
            self.register_occupied[self.intervals[idx].location] = false;
        }
    }

    /// Register file exhausted: spill the interval reaching farthest.
    fn spill_at(&mut self, current: usize) {
        if self.active_count == 0 {
            return;
        }

        let last_order = (0..self.active_order.len())
            .rev()
            .find(|order| self.active[*order])
            .expect("active set not empty");
        let victim = self.active_order[last_order];

        if self.intervals[victim].end > self.intervals[current].end {
            // steal the victim's register, push the victim to the stack
            let reg = self.intervals[victim].location;
            let slot = self.stack_allocate();

            self.intervals[current].location = reg;
            self.intervals[current].spilled = false;
            self.intervals[victim].location = slot;
            self.intervals[victim].spilled = true;

            self.active[last_order] = false;
            self.active_count -= 1;
            let current_order = self.intervals[current].active_order;
            self.active[current_order] = true;
            self.active_count += 1;
        } else {
            let slot = self.stack_allocate();
            self.intervals[current].location = slot;
            self.intervals[current].spilled = true;
        }
    }
}

fn extend_intervals(
    om: &Optimizer,
    intervals: &mut [LiveInterval],
    live: &IndexSet,
    point: usize,
) {
    for index in live.iter() {
        // member variables are not processed here
        if om.varmap_is_member(index) {
            continue;
        }

        let lid = om.varmap_index_to_lid(index);
        let interval = &mut intervals[lid];

        if interval.start > point {
            interval.start = point;
        }
        if interval.end < point {
            interval.end = point;
        }
    }
}

/// Linear-scan entry point. Leaves `(kind, location)` in the variable
/// table and warns about user-declared variables that never live.
pub fn allocate(
    om: &mut Optimizer,
    log: &mut DiagnosticLog,
    num_registers: usize,
) {
    if om.profile.num_instructions == 0 {
        return;
    }

    // facts needed; this allocator never mutates the CFG so whatever the
    // optimizer holds stays valid
    defuse::analyze(om);
    liveness::analyze(om);

    let mut allocator = LinearScanAllocator::new(om, num_registers);
    let max_point = om.profile.num_instructions;

    for i in 0..allocator.scan_order.len() {
        let current = allocator.scan_order[i];

        if !allocator.interval_valid(&allocator.intervals[current], max_point)
        {
            let def = om.local_defs[current];
            let var = om.defs.get(def).as_variable().expect("variable");

            if matches!(
                var.kind,
                VariableKind::Local | VariableKind::Parameter
            ) {
                let name = var.name.clone();
                log.log(
                    DiagnosticCode::UnusedVariable,
                    LineColumn::default(),
                    LineColumn::default(),
                    &[&name],
                );
            }

            continue;
        }

        allocator.expire(current);

        if allocator.active_count == allocator.num_registers {
            allocator.spill_at(current);
        } else {
            let reg = allocator.register_allocate();
            allocator.intervals[current].location = reg;
            allocator.intervals[current].spilled = false;

            let order = allocator.intervals[current].active_order;
            allocator.active[order] = true;
            allocator.active_count += 1;
        }
    }

    // flush results into the variable table
    om.profile.reg_count = num_registers;
    om.profile.num_var_on_stack = allocator.num_on_stack;

    for lid in 0..allocator.intervals.len() {
        let def = om.local_defs[lid];
        let interval = &allocator.intervals[lid];

        let allocation = if allocator.interval_valid(interval, max_point) {
            Allocation {
                kind: if interval.spilled {
                    AllocationKind::Stack
                } else {
                    AllocationKind::Register
                },
                location: interval.location,
            }
        } else {
            Allocation::default()
        };

        if let Some(var) = om.defs.get_mut(def).as_variable_mut() {
            var.allocation = allocation;
        }
    }

    debug!(
        "linear scan: {} locals, {} on stack",
        allocator.intervals.len(),
        allocator.num_on_stack,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn farthest_end_is_the_spill_victim() {
        // hand-built intervals: three overlapping, one register
        let mut allocator = LinearScanAllocator {
            num_registers: 1,
            register_occupied: vec![true],
            num_on_stack: 0,
            intervals: vec![
                LiveInterval {
                    start: 0,
                    end: 10,
                    spilled: false,
                    location: 0,
                    active_order: 1,
                },
                LiveInterval {
                    start: 2,
                    end: 5,
                    spilled: false,
                    location: 0,
                    active_order: 0,
                },
            ],
            scan_order: vec![0, 1],
            active_order: vec![1, 0],
            active: vec![false, true],
            active_count: 1,
        };

        // interval 1 starts while 0 (ending at 10) holds the register;
        // 0 reaches farther, so it is spilled and 1 steals the register
        allocator.spill_at(1);

        assert!(allocator.intervals[0].spilled);
        assert_eq!(allocator.intervals[0].location, 0); // slot 0
        assert!(!allocator.intervals[1].spilled);
        assert_eq!(allocator.intervals[1].location, 0); // register 0
    }

    #[test]
    fn expiry_frees_registers() {
        let mut allocator = LinearScanAllocator {
            num_registers: 1,
            register_occupied: vec![true],
            num_on_stack: 0,
            intervals: vec![
                LiveInterval {
                    start: 0,
                    end: 1,
                    spilled: false,
                    location: 0,
                    active_order: 0,
                },
                LiveInterval {
                    start: 5,
                    end: 6,
                    spilled: false,
                    location: 0,
                    active_order: 1,
                },
            ],
            scan_order: vec![0, 1],
            active_order: vec![0, 1],
            active: vec![true, false],
            active_count: 1,
        };

        allocator.expire(1);

        assert_eq!(allocator.active_count, 0);
        assert!(!allocator.register_occupied[0]);
    }
}
