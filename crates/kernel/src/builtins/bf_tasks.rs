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

use crate::builtins::{BfCallState, BfErr, BfRet, BuiltinFunction, e_invarg};
use crate::config::server_options;
use crate::tasks::task_messages::{SchedulerControlMsg, TaskDescription};
use crate::vm::unwind::Exception;
use corral_compiler::compile;
use corral_var::ErrorCode::{E_INTRPT, E_INVARG, E_PERM, E_QUOTA, E_TYPE};
use corral_var::{
    Symbol, Var, Variant, v_err, v_errcode, v_int, v_list, v_list_iter, v_obj, v_str,
};
use std::collections::HashMap;
use std::time::{Duration, Instant, UNIX_EPOCH};

fn bf_task_id(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_int(bf_args.exec.state.task_id as i64)))
}

fn bf_caller_perms(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_obj(bf_args.caller_perms())))
}

fn bf_set_task_perms(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let who = bf_args.obj_arg(0)?;
    if who != bf_args.task_perms_who() && !bf_args.exec.task_wizardly() {
        return Err(BfErr::Code(E_PERM));
    }
    bf_args.exec.state.top_mut().permissions = who;
    Ok(BfRet::Ret(v_int(0)))
}

/// The calling stack, topmost caller first, with frames the server pushed
/// itself filtered out.
fn bf_callers(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let with_lines = bf_args.args.first().map(|v| v.is_true()).unwrap_or(false);
    let stack = &bf_args.exec.state.stack;
    let mut rows = vec![];
    // Skip the current frame; report its callers.
    for frame in stack.iter().rev().skip(1) {
        if frame.server_initiated {
            continue;
        }
        let mut row = vec![
            frame.this.clone(),
            v_str(frame.verb_name.as_str()),
            v_obj(frame.permissions),
            frame.verb_definer_var(),
            v_obj(frame.player),
        ];
        if with_lines {
            row.push(v_int(frame.line_number as i64));
        }
        rows.push(v_list(&row));
    }
    Ok(BfRet::Ret(v_list_iter(rows)))
}

fn fetch_queued_tasks(bf_args: &BfCallState<'_>) -> Result<Vec<TaskDescription>, BfErr> {
    let (tx, rx) = oneshot::channel();
    bf_args
        .exec
        .send_scheduler(SchedulerControlMsg::RequestQueuedTasks(tx));
    rx.recv().map_err(|_| BfErr::Code(E_INVARG))
}

/// Per-task 10-element records: {id, start-time, clock-id, background
/// ticks, programmer, verb-loc, verb-name, line, this, bytes}.
fn bf_queued_tasks(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let tasks = fetch_queued_tasks(bf_args)?;
    let bg_ticks = server_options().bg_ticks as i64;
    let rows: Vec<Var> = tasks
        .iter()
        .map(|t| {
            let start = t
                .start_time
                .and_then(|st| st.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(-1);
            let top = t.frames.first();
            v_list(&[
                v_int(t.task_id as i64),
                v_int(start),
                v_int(0),
                v_int(bg_ticks),
                v_obj(t.programmer),
                top.map(|f| f.verb_loc.clone()).unwrap_or_else(|| v_obj(corral_var::NOTHING)),
                top.map(|f| v_str(f.verb_name.as_str())).unwrap_or_else(|| v_str("")),
                v_int(top.map(|f| f.line as i64).unwrap_or(0)),
                top.map(|f| f.this.clone()).unwrap_or_else(|| v_obj(corral_var::NOTHING)),
                v_int(t.bytes as i64),
            ])
        })
        .collect();
    Ok(BfRet::Ret(v_list_iter(rows)))
}

fn bf_task_stack(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let target = bf_args.int_arg(0)? as usize;
    let with_lines = bf_args.args.get(1).map(|v| v.is_true()).unwrap_or(false);
    let tasks = fetch_queued_tasks(bf_args)?;
    let Some(task) = tasks.iter().find(|t| t.task_id == target) else {
        return Err(BfErr::Code(E_INVARG));
    };
    let rows: Vec<Var> = task
        .frames
        .iter()
        .filter(|f| !f.server_initiated)
        .map(|f| {
            let mut row = vec![
                f.this.clone(),
                v_str(f.verb_name.as_str()),
                v_obj(f.programmer),
                f.verb_loc.clone(),
            ];
            if with_lines {
                row.push(v_int(f.line as i64));
            }
            v_list(&row)
        })
        .collect();
    Ok(BfRet::Ret(v_list_iter(rows)))
}

/// Killing yourself returns E_INTRPT (never E_NONE); killing another task
/// goes through the scheduler, owner-or-wizard only.
fn bf_kill_task(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let victim = bf_args.int_arg(0)?;
    if victim < 0 {
        return Err(BfErr::Code(E_INVARG));
    }
    if victim as usize == bf_args.exec.state.task_id {
        return Ok(BfRet::Ret(v_errcode(E_INTRPT)));
    }
    let (tx, rx) = oneshot::channel();
    bf_args.exec.send_scheduler(SchedulerControlMsg::KillTask {
        victim: victim as usize,
        perms: bf_args.task_perms_who(),
        wizardly: bf_args.exec.task_wizardly(),
        reply: tx,
    });
    let reply = rx.recv().map_err(|_| BfErr::Code(E_INVARG))?;
    if let Variant::Err(e) = reply.variant() {
        if *e == E_PERM {
            return Err(BfErr::Code(E_PERM));
        }
    }
    Ok(BfRet::Ret(reply))
}

fn bf_resume(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let victim = bf_args.int_arg(0)?;
    if victim < 0 {
        return Err(BfErr::Code(E_INVARG));
    }
    let value = bf_args.args.get(1).cloned().unwrap_or(v_int(0));
    let (tx, rx) = oneshot::channel();
    bf_args.exec.send_scheduler(SchedulerControlMsg::ResumeTask {
        victim: victim as usize,
        value,
        perms: bf_args.task_perms_who(),
        wizardly: bf_args.exec.task_wizardly(),
        reply: tx,
    });
    let reply = rx.recv().map_err(|_| BfErr::Code(E_INVARG))?;
    if let Variant::Err(e) = reply.variant() {
        return Err(BfErr::ErrValue(e.clone()));
    }
    Ok(BfRet::Ret(reply))
}

/// `suspend()` suspends until `resume()`; `suspend(n)` for at least n
/// seconds. The return value is 0 on timeout or whatever `resume()` sent;
/// the two are indistinguishable when the value is 0.
fn bf_suspend(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let wake_at = match bf_args.args.first() {
        None => None,
        Some(v) => {
            let seconds = match v.variant() {
                Variant::Int(i) if *i >= 0 => *i as f64,
                Variant::Float(f) if *f >= 0.0 => *f,
                _ => return Err(BfErr::Code(E_INVARG)),
            };
            Some(Instant::now() + Duration::from_secs_f64(seconds))
        }
    };
    let value = bf_args.exec.suspend(wake_at).map_err(BfErr::Raise)?;
    Ok(BfRet::Ret(value))
}

/// Suspend until the player's connection delivers a line of input.
fn bf_read(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    if let Some(arg) = bf_args.args.first() {
        // Reading another connection is wizard territory.
        let Variant::Obj(_) = arg.variant() else {
            return Err(BfErr::Code(E_TYPE));
        };
        bf_args.check_wizardly()?;
    }
    let value = bf_args.exec.suspend_for_input().map_err(BfErr::Raise)?;
    Ok(BfRet::Ret(value))
}

fn bf_ticks_left(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_int(bf_args.exec.state.ticks_left as i64)))
}

fn bf_seconds_left(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let elapsed = bf_args.exec.state.slice_started.elapsed();
    let left = bf_args
        .exec
        .state
        .seconds_limit
        .saturating_sub(elapsed)
        .as_secs() as i64;
    Ok(BfRet::Ret(v_int(left)))
}

fn bf_set_task_local(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    bf_args.check_wizardly()?;
    bf_args.exec.state.task_local = bf_args.args[0].clone();
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_task_local(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    Ok(BfRet::Ret(bf_args.exec.state.task_local.clone()))
}

/// `eval(str)`: {1, value} on success, {0, error-or-messages} on failure.
/// Resource exhaustion (E_QUOTA) passes through uncaught so callers cannot
/// mask it.
fn bf_eval(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let source = bf_args.str_arg(0)?;
    let perms = bf_args.task_perms_who();
    let is_programmer = bf_args.exec.with_world(|ws| {
        ws.get(corral_db::ObjectRef::Obj(perms))
            .map(|o| o.is_programmer() || o.is_wizard())
            .unwrap_or(false)
    });
    if !is_programmer && !bf_args.exec.task_wizardly() {
        return Err(BfErr::Code(E_PERM));
    }

    let program = match compile(&source) {
        Err(err) => {
            return Ok(BfRet::Ret(v_list(&[
                v_int(0),
                v_list(&[v_str(&err.to_string())]),
            ])));
        }
        Ok(program) => program,
    };

    let player = bf_args.exec.state.player();
    match bf_args.exec.run_eval(&program, player, perms) {
        Ok(value) => Ok(BfRet::Ret(v_list(&[v_int(1), value]))),
        Err(Exception::Error(raised)) => {
            let uncatchable =
                raised.error == E_QUOTA && !server_options().max_concat_catchable;
            if uncatchable {
                return Err(BfErr::Raise(Exception::Error(raised)));
            }
            Ok(BfRet::Ret(v_list(&[v_int(0), v_err(raised.error)])))
        }
        // Aborts (ticks, seconds, kill) unwind through eval untouched.
        Err(abort) => Err(BfErr::Raise(abort)),
    }
}

fn bf_function_info(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    match bf_args.args.first() {
        Some(v) => {
            let name = v.as_symbol().map_err(BfErr::ErrValue)?;
            if bf_args.exec.builtins.lookup(&name).is_none() {
                return Err(e_invarg(format!("unknown function {name}")));
            }
            Ok(BfRet::Ret(v_list(&[
                v_str(name.as_str()),
                v_int(0),
                v_int(-1),
                v_list(&[]),
            ])))
        }
        None => {
            let mut names: Vec<String> = bf_args
                .exec
                .builtins
                .names()
                .map(|s| s.to_string())
                .collect();
            names.sort();
            Ok(BfRet::Ret(v_list_iter(
                names.iter().map(|n| v_str(n)),
            )))
        }
    }
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "task_id" => bf_task_id,
        "caller_perms" => bf_caller_perms,
        "set_task_perms" => bf_set_task_perms,
        "callers" => bf_callers,
        "queued_tasks" => bf_queued_tasks,
        "task_stack" => bf_task_stack,
        "kill_task" => bf_kill_task,
        "resume" => bf_resume,
        "suspend" => bf_suspend,
        "read" => bf_read,
        "ticks_left" => bf_ticks_left,
        "seconds_left" => bf_seconds_left,
        "set_task_local" => bf_set_task_local,
        "task_local" => bf_task_local,
        "eval" => bf_eval,
        "function_info" => bf_function_info,
    );
}
