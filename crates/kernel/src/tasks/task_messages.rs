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

use crate::tasks::{SuspendedTaskDesc, TaskId};
use crate::vm::unwind::Exception;
use crate::vm::AbortReason;
use corral_compiler::ast::Stmt;
use corral_compiler::{Name, Names, Program};
use corral_db::ObjectRef;
use corral_var::{Obj, Symbol, Var};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a task was asked to do. Serialize-able so queued work survives
/// checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskStart {
    /// Parse a command line and run whatever verb matches it.
    Command { player: Obj, command: String },
    /// Run a specific verb; server hooks come through here.
    Verb {
        player: Obj,
        vloc: ObjectRef,
        verb: Symbol,
        args: Vec<Var>,
        argstr: String,
    },
    /// Evaluate a compiled program (`;` lines, `eval()`).
    Eval { player: Obj, program: Program },
    /// A task forked off another task.
    Fork(ForkRequest),
}

impl TaskStart {
    pub fn player(&self) -> Obj {
        match self {
            TaskStart::Command { player, .. }
            | TaskStart::Verb { player, .. }
            | TaskStart::Eval { player, .. } => *player,
            TaskStart::Fork(fork) => fork.player,
        }
    }
}

/// Everything a `fork` statement captures for the child task: the body,
/// a copy-on-write snapshot of the parent's environment, and the parent's
/// call identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkRequest {
    pub player: Obj,
    pub perms: Obj,
    pub delay: Duration,
    pub stmts: Arc<Vec<Stmt>>,
    pub names: Names,
    pub env: Vec<Option<Var>>,
    pub task_local: Var,
    pub this: Var,
    pub caller: Var,
    pub verb_name: Symbol,
    pub verb_loc: ObjectRef,
    /// The fork's task-id variable; bound in the parent before it
    /// continues, and in the child at startup.
    pub fork_var: Option<Name>,
}

/// Scheduler-to-task control messages, received by the task thread between
/// slices (and inside `suspend()`/`read()`).
#[derive(Debug)]
pub enum TaskControlMsg {
    /// Begin execution.
    Run,
    /// Wake from suspension; the value is what `suspend()` returns.
    Resume(Var),
    /// Die. `finally` blocks are not run.
    Kill,
}

/// Task-to-scheduler messages. Slice-ending messages release the
/// single-writer baton; the rest are serviced while the task keeps running.
#[derive(Debug)]
pub enum SchedulerControlMsg {
    /// Everything executed; the task is done.
    TaskSuccess(Var),
    /// An exception escaped the root frame.
    TaskException(Exception),
    /// Tick/second budget exhausted.
    TaskAbortLimitsReached(AbortReason),
    /// The task was told to die and has unwound.
    TaskAbortCancelled,
    /// Suspend; `Some(instant)` for timed wake, `None` for indefinite.
    TaskSuspend(Option<Instant>, SuspendedTaskDesc),
    /// Suspend until a line of input arrives for this player's connection.
    TaskRequestInput(SuspendedTaskDesc),
    /// Create a forked sibling; reply with its task id before the parent
    /// proceeds.
    TaskRequestFork(ForkRequest, oneshot::Sender<TaskId>),
    /// `kill_task()` on another task.
    KillTask {
        victim: TaskId,
        perms: Obj,
        wizardly: bool,
        reply: oneshot::Sender<Var>,
    },
    /// `resume()` on a suspended task.
    ResumeTask {
        victim: TaskId,
        value: Var,
        perms: Obj,
        wizardly: bool,
        reply: oneshot::Sender<Var>,
    },
    /// Completion of an external operation (`exec`); wakes the task like
    /// resume, no permission check, result discarded if the task is gone.
    ExternalResume { victim: TaskId, value: Var },
    /// `queued_tasks()` / `task_stack()`.
    RequestQueuedTasks(oneshot::Sender<Vec<TaskDescription>>),
    /// `boot_player()`.
    BootPlayer { player: Obj },
    /// `dump_database()`: checkpoint asynchronously.
    Checkpoint,
    /// The background checkpoint writer finished (sent with task id 0).
    CheckpointFinished(bool),
    /// `shutdown()`.
    Shutdown(Option<String>),
}

/// The scheduler's external description of one queued/suspended task.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub task_id: TaskId,
    /// When the task will next run, if it is on the timer queue.
    pub start_time: Option<std::time::SystemTime>,
    pub player: Obj,
    pub programmer: Obj,
    pub frames: Vec<crate::tasks::FrameSnapshot>,
    pub bytes: usize,
}
