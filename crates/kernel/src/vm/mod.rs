// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

pub mod activation;
pub mod moo_execute;
pub mod scatter_assign;
pub mod unwind;

pub use activation::Activation;
pub use moo_execute::Interpreter;
pub use unwind::{Exception, RaisedError};

use corral_var::Var;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::tasks::TaskId;
use corral_db::WorldState;

/// The shared handle to the store. Only one task executes at a time (the
/// scheduler guarantees it), so the mutex is uncontended; it exists so task
/// threads, the scheduler, and the checkpoint writer can all hold the same
/// reference safely.
pub type WorldHandle = Arc<Mutex<WorldState>>;

/// Why a task stopped without producing a value. Aborts are not catchable
/// by MOO code, and `finally` handlers do not run on them.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    OutOfTicks,
    OutOfSeconds,
    Killed,
}

/// The mutable execution state of one task's VM: the activation stack plus
/// the resource accounting.
pub struct VMExecState {
    pub task_id: TaskId,
    pub stack: Vec<Activation>,
    pub ticks_left: usize,
    pub slice_started: Instant,
    pub seconds_limit: Duration,
    /// The `task_local()` value; inherited by forks, untouched by resume.
    pub task_local: Var,
    pub is_background: bool,
    /// The player the task was submitted for; what `player` means before
    /// the first frame is pushed.
    pub base_player: corral_var::Obj,
}

/// Beyond this many activation frames, verb calls raise `E_MAXREC`.
pub const MAX_STACK_DEPTH: usize = 50;

impl VMExecState {
    pub fn new(
        task_id: TaskId,
        ticks: usize,
        seconds: u64,
        is_background: bool,
        base_player: corral_var::Obj,
    ) -> Self {
        Self {
            task_id,
            stack: Vec::new(),
            ticks_left: ticks,
            slice_started: Instant::now(),
            seconds_limit: Duration::from_secs(seconds),
            task_local: corral_var::v_empty_map(),
            is_background,
            base_player,
        }
    }

    pub fn top(&self) -> &Activation {
        self.stack.last().expect("no current activation")
    }

    pub fn top_mut(&mut self) -> &mut Activation {
        self.stack.last_mut().expect("no current activation")
    }

    /// The player of the current frame, or the submitting player outside
    /// any frame.
    pub fn player(&self) -> corral_var::Obj {
        self.stack
            .last()
            .map(|f| f.player)
            .unwrap_or(self.base_player)
    }

    /// The permissions the task is running with: the programmer of the
    /// current activation (the submitting player outside any frame).
    pub fn task_perms(&self) -> corral_var::Obj {
        self.stack
            .last()
            .map(|f| f.permissions)
            .unwrap_or(self.base_player)
    }

    /// The permissions of the calling frame; the player at top level.
    pub fn caller_perms(&self) -> corral_var::Obj {
        if self.stack.len() < 2 {
            return self.top().player;
        }
        self.stack[self.stack.len() - 2].permissions
    }

    /// Refresh tick/second budgets, as happens on every suspension return.
    pub fn reset_limits(&mut self, ticks: usize, seconds: u64) {
        self.ticks_left = ticks;
        self.slice_started = Instant::now();
        self.seconds_limit = Duration::from_secs(seconds);
    }
}
