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

//! The handle the connection side holds on the scheduler: task submission
//! and server control, over a channel.

use crate::tasks::TaskId;
use corral_compiler::Program;
use corral_db::ObjectRef;
use corral_var::{Obj, Symbol, Var};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is not running")]
    SchedulerGone,
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),
    #[error("Could not start task: {0}")]
    CouldNotStart(String),
}

/// The final outcome of a task, for submitters who subscribed to it.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Success(Var),
    Exception(Vec<String>),
    AbortLimits,
    AbortCancelled,
}

#[derive(Debug)]
pub enum SchedulerClientMsg {
    SubmitCommand {
        player: Obj,
        command: String,
        subscriber: Option<oneshot::Sender<TaskResult>>,
        reply: oneshot::Sender<Result<TaskId, SchedulerError>>,
    },
    SubmitVerb {
        player: Obj,
        vloc: ObjectRef,
        verb: Symbol,
        args: Vec<Var>,
        argstr: String,
        subscriber: Option<oneshot::Sender<TaskResult>>,
        reply: oneshot::Sender<Result<TaskId, SchedulerError>>,
    },
    SubmitEval {
        player: Obj,
        program: Program,
        subscriber: Option<oneshot::Sender<TaskResult>>,
        reply: oneshot::Sender<Result<TaskId, SchedulerError>>,
    },
    /// A disconnect: kill the player's foreground tasks (their background
    /// and forked work continues).
    DisconnectPlayer { player: Obj },
    Checkpoint,
    Shutdown(Option<String>),
}

#[derive(Clone)]
pub struct SchedulerClient {
    send: flume::Sender<SchedulerClientMsg>,
}

impl SchedulerClient {
    pub fn new(send: flume::Sender<SchedulerClientMsg>) -> Self {
        Self { send }
    }

    fn submit(
        &self,
        msg: SchedulerClientMsg,
        reply: oneshot::Receiver<Result<TaskId, SchedulerError>>,
    ) -> Result<TaskId, SchedulerError> {
        self.send
            .send(msg)
            .map_err(|_| SchedulerError::SchedulerGone)?;
        reply.recv().map_err(|_| SchedulerError::SchedulerGone)?
    }

    /// Submit one line of player input as a command task. The returned
    /// receiver (when subscribed) resolves with the task's final result.
    pub fn submit_command_task(
        &self,
        player: Obj,
        command: &str,
        subscribe: bool,
    ) -> Result<(TaskId, Option<oneshot::Receiver<TaskResult>>), SchedulerError> {
        let (sub_tx, sub_rx) = if subscribe {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (tx, rx) = oneshot::channel();
        let id = self.submit(
            SchedulerClientMsg::SubmitCommand {
                player,
                command: command.to_string(),
                subscriber: sub_tx,
                reply: tx,
            },
            rx,
        )?;
        Ok((id, sub_rx))
    }

    /// Submit a server-hook verb call (`do_login_command`,
    /// `user_connected`, ...), optionally watching for its result.
    pub fn submit_verb_task(
        &self,
        player: Obj,
        vloc: ObjectRef,
        verb: Symbol,
        args: Vec<Var>,
        argstr: &str,
        subscribe: bool,
    ) -> Result<(TaskId, Option<oneshot::Receiver<TaskResult>>), SchedulerError> {
        let (sub_tx, sub_rx) = if subscribe {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (tx, rx) = oneshot::channel();
        let id = self.submit(
            SchedulerClientMsg::SubmitVerb {
                player,
                vloc,
                verb,
                args,
                argstr: argstr.to_string(),
                subscriber: sub_tx,
                reply: tx,
            },
            rx,
        )?;
        Ok((id, sub_rx))
    }

    /// Submit a compiled program for evaluation (`;` lines).
    pub fn submit_eval_task(
        &self,
        player: Obj,
        program: Program,
    ) -> Result<(TaskId, oneshot::Receiver<TaskResult>), SchedulerError> {
        let (sub_tx, sub_rx) = oneshot::channel();
        let (tx, rx) = oneshot::channel();
        let id = self.submit(
            SchedulerClientMsg::SubmitEval {
                player,
                program,
                subscriber: Some(sub_tx),
                reply: tx,
            },
            rx,
        )?;
        Ok((id, sub_rx))
    }

    pub fn disconnect_player(&self, player: Obj) {
        let _ = self
            .send
            .send(SchedulerClientMsg::DisconnectPlayer { player });
    }

    pub fn checkpoint(&self) {
        let _ = self.send.send(SchedulerClientMsg::Checkpoint);
    }

    pub fn shutdown(&self, msg: Option<String>) {
        let _ = self.send.send(SchedulerClientMsg::Shutdown(msg));
    }
}
