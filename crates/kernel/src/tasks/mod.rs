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

pub mod command_parse;
pub mod prepositions;
pub mod scheduler;
pub mod scheduler_client;
pub mod sessions;
pub mod task;
pub mod task_messages;

pub type TaskId = usize;

use corral_var::{Obj, Symbol, Var};
use serde::{Deserialize, Serialize};

/// A row of `queued_tasks()` / `task_stack()`: enough of a frame to
/// describe a task from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub this: Var,
    pub verb_name: Symbol,
    pub verb_loc: Var,
    pub programmer: Obj,
    pub line: usize,
    pub server_initiated: bool,
}

/// What a suspending task tells the scheduler about itself, so that
/// `queued_tasks()` and `task_stack()` can answer without poking a parked
/// thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedTaskDesc {
    pub frames: Vec<FrameSnapshot>,
    pub bytes: usize,
}
