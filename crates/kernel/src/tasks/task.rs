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

//! A task: one unit of MOO execution, with its own tick/second budget and
//! its own thread. The thread parks on its control channel between slices;
//! the scheduler guarantees at most one task is executing VM steps at any
//! moment.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, warn};

use crate::builtins::BuiltinRegistry;
use crate::config::server_options;
use crate::tasks::TaskId;
use crate::tasks::command_parse::{find_command_verb, match_object, parse_command, parse_into_words};
use crate::tasks::sessions::Session;
use crate::tasks::task_messages::{SchedulerControlMsg, TaskControlMsg, TaskStart};
use crate::vm::moo_execute::Interpreter;
use crate::vm::unwind::Exception;
use crate::vm::{VMExecState, WorldHandle};
use corral_var::{Obj, SYSTEM_OBJECT, Symbol, Var, v_int, v_obj, v_str};

pub struct Task {
    pub task_id: TaskId,
    pub task_start: Arc<TaskStart>,
    pub player: Obj,
    pub perms: Obj,
    pub is_background: bool,
}

/// Spawn the task's thread. It blocks until the scheduler dispatches it
/// with `Run`, executes to completion or suspension, and reports every
/// slice boundary through the scheduler channel.
pub fn spawn_task_thread(
    task: Task,
    world: WorldHandle,
    session: Arc<dyn Session>,
    builtins: Arc<BuiltinRegistry>,
    scheduler_send: flume::Sender<(TaskId, SchedulerControlMsg)>,
    control_recv: flume::Receiver<TaskControlMsg>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("moo-task-{}", task.task_id))
        .spawn(move || {
            run_task(task, world, session, builtins, scheduler_send, control_recv)
        })
}

fn run_task(
    task: Task,
    world: WorldHandle,
    session: Arc<dyn Session>,
    builtins: Arc<BuiltinRegistry>,
    scheduler_send: flume::Sender<(TaskId, SchedulerControlMsg)>,
    control_recv: flume::Receiver<TaskControlMsg>,
) {
    // Park until dispatched.
    match control_recv.recv() {
        Ok(TaskControlMsg::Run) => {}
        Ok(TaskControlMsg::Kill) | Err(_) => {
            let _ = scheduler_send.send((task.task_id, SchedulerControlMsg::TaskAbortCancelled));
            return;
        }
        Ok(TaskControlMsg::Resume(_)) => {
            warn!("task {} resumed before it ever ran", task.task_id);
        }
    }

    let options = server_options();
    let (ticks, seconds) = if task.is_background {
        (options.bg_ticks, options.bg_seconds)
    } else {
        (options.fg_ticks, options.fg_seconds)
    };
    let state = VMExecState::new(task.task_id, ticks, seconds, task.is_background, task.player);
    let mut exec = Interpreter::new(
        state,
        world,
        session.clone(),
        scheduler_send.clone(),
        control_recv,
        builtins,
    );

    let result = match &*task.task_start {
        TaskStart::Eval { player, program } => exec.run_eval(program, *player, task.perms),
        TaskStart::Fork(fork) => exec.run_fork(fork, task.task_id),
        TaskStart::Verb {
            player,
            vloc,
            verb,
            args,
            argstr: _,
        } => exec.call_verb(
            vloc.to_var(),
            verb.clone(),
            args.clone(),
            None,
            *player,
            false,
            true,
        ),
        TaskStart::Command { player, command } => {
            run_command(&mut exec, *player, command, &session)
        }
    };

    let msg = match result {
        Ok(value) => SchedulerControlMsg::TaskSuccess(value),
        Err(Exception::Abort(crate::vm::AbortReason::Killed)) => {
            SchedulerControlMsg::TaskAbortCancelled
        }
        Err(Exception::Abort(reason)) => SchedulerControlMsg::TaskAbortLimitsReached(reason),
        Err(exception) => SchedulerControlMsg::TaskException(exception),
    };
    if scheduler_send.send((task.task_id, msg)).is_err() {
        error!("scheduler gone before task {} could report", task.task_id);
    }
}

/// Command dispatch: the `$do_command` override, then the classic
/// player/location/dobj/iobj verb search, then the `huh` fallback.
fn run_command(
    exec: &mut Interpreter,
    player: Obj,
    command: &str,
    session: &Arc<dyn Session>,
) -> Result<Var, Exception> {
    let Some(mut pc) = parse_command(command) else {
        return Ok(v_int(0));
    };
    pc.dobj = match pc.dobjstr.is_empty() {
        true => None,
        false => Some(exec.with_world(|ws| match_object(ws, player, &pc.dobjstr))),
    };
    pc.iobj = match pc.iobjstr.is_empty() {
        true => None,
        false => Some(exec.with_world(|ws| match_object(ws, player, &pc.iobjstr))),
    };

    // $do_command gets first crack at the whole line.
    let words: Vec<Var> = parse_into_words(command).iter().map(|w| v_str(w)).collect();
    let intercepted = exec.call_verb_if_exists(v_obj(SYSTEM_OBJECT), "do_command", words)?;
    if let Some(result) = intercepted {
        if result.is_true() {
            return Ok(result);
        }
    }

    let found = exec.with_world(|ws| find_command_verb(ws, player, &pc));
    if let Some((target, definer, _index, verbdef)) = found {
        let verb_name = pc.verb.clone();
        let args = pc.args.clone();
        return exec.call_resolved_verb(
            v_obj(target),
            definer,
            &verbdef,
            verb_name,
            args,
            Some(&pc),
            player,
        );
    }

    // No verb matched; the room can supply `huh`, otherwise the server
    // shrugs.
    let location = exec.with_world(|ws| {
        ws.get(player.into())
            .map(|p| p.location)
            .unwrap_or(corral_var::NOTHING)
    });
    if location.is_positive() {
        let huhed = exec.call_verb_if_exists(
            v_obj(location),
            "huh",
            pc.args.clone(),
        )?;
        if let Some(result) = huhed {
            return Ok(result);
        }
    }
    let _ = session.send_system_msg(player, "I couldn't understand that.");
    Ok(v_int(0))
}

/// The symbol form of a verb name from a command word, exposed for tests.
pub fn command_verb_symbol(line: &str) -> Option<Symbol> {
    parse_command(line).map(|pc| pc.verb)
}
