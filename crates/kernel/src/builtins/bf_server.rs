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

use crate::builtins::bf_strings::encode_binary_string;
use crate::builtins::{BfCallState, BfErr, BfRet, BuiltinFunction, e_invarg};
use crate::config::load_server_options;
use crate::tasks::task_messages::SchedulerControlMsg;
use corral_var::ErrorCode::{E_INVARG, E_PERM};
use corral_var::{
    Obj, Symbol, Var, Variant, v_bool_int, v_int, v_list, v_list_iter, v_map, v_obj, v_str,
    v_string,
};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

fn player_arg_own_or_wizard(bf_args: &BfCallState<'_>, i: usize) -> Result<Obj, BfErr> {
    let who = bf_args.obj_arg(i)?;
    if who != bf_args.exec.state.player()
        && who != bf_args.task_perms_who()
        && !bf_args.exec.task_wizardly()
    {
        return Err(BfErr::Code(E_PERM));
    }
    Ok(who)
}

/// `notify(player, line [, no_flush])`. Delivery failure is not an error;
/// the result says whether a connection took the line.
fn bf_notify(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let who = player_arg_own_or_wizard(bf_args, 0)?;
    let line = bf_args.str_arg(1)?;
    let no_flush = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let delivered = bf_args.exec.session.notify(who, &line, no_flush).is_ok();
    Ok(BfRet::Ret(v_bool_int(delivered)))
}

/// Logged-in players by default; unlogged (negative id) connections only
/// with `include_all`.
fn bf_connected_players(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let include_all = bf_args.args.first().map(|v| v.is_true()).unwrap_or(false);
    let players = bf_args
        .exec
        .session
        .connected_players(include_all)
        .unwrap_or_default();
    Ok(BfRet::Ret(v_list_iter(players.into_iter().map(v_obj))))
}

fn bf_connection_name(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let who = player_arg_own_or_wizard(bf_args, 0)?;
    let name = bf_args
        .exec
        .session
        .connection_name(who)
        .map_err(|_| BfErr::Code(E_INVARG))?;
    Ok(BfRet::Ret(v_string(name)))
}

fn bf_connected_seconds(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let who = bf_args.obj_arg(0)?;
    let seconds = bf_args
        .exec
        .session
        .connected_seconds(who)
        .map_err(|_| BfErr::Code(E_INVARG))?;
    Ok(BfRet::Ret(v_int(seconds as i64)))
}

fn bf_idle_seconds(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let who = bf_args.obj_arg(0)?;
    let seconds = bf_args
        .exec
        .session
        .idle_seconds(who)
        .map_err(|_| BfErr::Code(E_INVARG))?;
    Ok(BfRet::Ret(v_int(seconds as i64)))
}

fn bf_listeners(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let rows: Vec<Var> = bf_args
        .exec
        .session
        .listeners()
        .into_iter()
        .map(|(obj, port)| v_list(&[v_obj(obj), v_int(port as i64), v_int(1)]))
        .collect();
    Ok(BfRet::Ret(v_list_iter(rows)))
}

fn bf_boot_player(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let who = player_arg_own_or_wizard(bf_args, 0)?;
    bf_args
        .exec
        .send_scheduler(SchedulerControlMsg::BootPlayer { player: who });
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_server_version(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_str(env!("CARGO_PKG_VERSION"))))
}

fn bf_server_log(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    bf_args.check_wizardly()?;
    let msg = bf_args.str_arg(0)?;
    let is_error = bf_args.args.get(1).map(|v| v.is_true()).unwrap_or(false);
    let player = bf_args.exec.state.player();
    if is_error {
        error!("({player}) {msg}");
    } else {
        info!("({player}) {msg}");
    }
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_shutdown(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    bf_args.check_wizardly()?;
    let msg = match bf_args.args.first() {
        Some(_) => Some(bf_args.str_arg(0)?),
        None => None,
    };
    bf_args
        .exec
        .send_scheduler(SchedulerControlMsg::Shutdown(msg));
    Ok(BfRet::Ret(v_int(0)))
}

/// Ask the scheduler for an asynchronous checkpoint; returns immediately.
fn bf_dump_database(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    bf_args.exec.send_scheduler(SchedulerControlMsg::Checkpoint);
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_load_server_options(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    bf_args
        .exec
        .with_world(load_server_options)
        .map_err(BfErr::ErrValue)?;
    Ok(BfRet::Ret(v_int(0)))
}

fn gc_roots(bf_args: &BfCallState<'_>) -> Vec<Var> {
    let mut roots: Vec<Var> = bf_args
        .exec
        .state
        .stack
        .iter()
        .flat_map(|f| f.env.iter().flatten().cloned())
        .collect();
    roots.push(bf_args.exec.state.task_local.clone());
    roots
}

fn bf_run_gc(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    let roots = gc_roots(bf_args);
    let (live, collected) = bf_args
        .exec
        .with_world_mut(|ws| ws.collect_anonymous(&roots));
    info!("gc: {collected} anonymous objects collected, {live} live");
    Ok(BfRet::Ret(v_int(collected as i64)))
}

fn bf_gc_stats(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    let live = bf_args.exec.with_world(|ws| ws.anonymous_count());
    Ok(BfRet::Ret(v_map(&[(
        v_str("anonymous"),
        v_int(live as i64),
    )])))
}

/// Minimal HTTP reader over connection input: start line plus headers,
/// stopping at the blank line. Wizard-only, and strict about its enum.
fn bf_read_http(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    bf_args.check_wizardly()?;
    let kind = bf_args.str_arg(0)?;
    if kind != "request" && kind != "response" {
        return Err(e_invarg("read_http() wants \"request\" or \"response\""));
    }
    if let Some(conn) = bf_args.args.get(1) {
        let Variant::Obj(_) = conn.variant() else {
            return Err(BfErr::Code(corral_var::ErrorCode::E_TYPE));
        };
    }

    let start_line = bf_args
        .exec
        .suspend_for_input()
        .map_err(BfErr::Raise)?;
    let start_line = start_line.as_string().map_err(BfErr::ErrValue)?.to_string();
    let mut result: Vec<(Var, Var)> = vec![];
    let mut parts = start_line.split_whitespace();
    if kind == "request" {
        let method = parts.next().unwrap_or_default().to_string();
        let uri = parts.next().unwrap_or_default().to_string();
        result.push((v_str("method"), v_string(method)));
        result.push((v_str("uri"), v_string(uri)));
    } else {
        let _version = parts.next();
        let status = parts.next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
        result.push((v_str("status"), v_int(status)));
    }

    let mut headers: Vec<(Var, Var)> = vec![];
    loop {
        let line = bf_args.exec.suspend_for_input().map_err(BfErr::Raise)?;
        let line = line.as_string().map_err(BfErr::ErrValue)?.to_string();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(e_invarg("malformed header line"));
        };
        headers.push((v_str(name.trim()), v_str(value.trim())));
    }
    result.push((v_str("headers"), v_map(&headers)));
    Ok(BfRet::Ret(v_map(&result)))
}

/// `exec({program, @args} [, input])`: run a program out of the
/// `executables/` sandbox, suspending this task until it finishes (or the
/// 30-second deadline kills it). Returns {exit_status, stdout, stderr}.
fn bf_exec(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    bf_args.check_wizardly()?;
    let Variant::List(cmd) = bf_args.arg(0)?.variant() else {
        return Err(BfErr::Code(corral_var::ErrorCode::E_TYPE));
    };
    if cmd.is_empty() {
        return Err(e_invarg("exec() needs a program name"));
    }
    let mut words = vec![];
    for w in cmd.iter() {
        words.push(w.as_string().map_err(BfErr::ErrValue)?.to_string());
    }
    let program = words.remove(0);

    // The sandbox: a bare name under executables/, no traversal, no
    // absolute paths.
    if program.is_empty()
        || program.starts_with('/')
        || program.starts_with('.')
        || program.split('/').any(|part| part == ".." || part == "." || part.is_empty())
    {
        return Err(e_invarg("illegal program path"));
    }
    let path = Path::new("executables").join(&program);

    let input = match bf_args.args.get(1) {
        Some(_) => Some(bf_args.str_arg(1)?),
        None => None,
    };

    let scheduler_send = bf_args.exec.scheduler_send.clone();
    let task_id = bf_args.exec.state.task_id;
    std::thread::Builder::new()
        .name(format!("exec-worker-{task_id}"))
        .spawn(move || {
            let result = run_subprocess(&path, &words, input.as_deref());
            let value = match result {
                Ok(v) => v,
                Err(msg) => {
                    warn!("exec of {path:?} failed: {msg}");
                    corral_var::v_err(corral_var::ErrorCode::E_EXEC.msg(msg))
                }
            };
            let _ = scheduler_send.send((
                task_id,
                SchedulerControlMsg::ExternalResume {
                    victim: task_id,
                    value,
                },
            ));
        })
        .map_err(|_| e_invarg("cannot spawn exec worker"))?;

    let result = bf_args.exec.suspend(None).map_err(BfErr::Raise)?;
    if let Variant::Err(e) = result.variant() {
        return Err(BfErr::ErrValue(e.clone()));
    }
    Ok(BfRet::Ret(result))
}

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

fn run_subprocess(path: &Path, args: &[String], input: Option<&str>) -> Result<Var, String> {
    use std::process::{Command, Stdio};

    let mut child = Command::new(path)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("cannot execute: {e}"))?;

    if let Some(input) = input {
        use std::io::Write;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(input.as_bytes());
        }
    }

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let out_reader = std::thread::spawn(move || {
        let mut buf = vec![];
        if let Some(ref mut s) = stdout {
            let _ = s.read_to_end(&mut buf);
        }
        buf
    });
    let err_reader = std::thread::spawn(move || {
        let mut buf = vec![];
        if let Some(ref mut s) = stderr {
            let _ = s.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + EXEC_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err("timed out".to_string());
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(format!("wait failed: {e}")),
        }
    };

    let stdout = out_reader.join().unwrap_or_default();
    let stderr = err_reader.join().unwrap_or_default();
    Ok(v_list(&[
        v_int(status.code().unwrap_or(-1) as i64),
        v_string(encode_binary_string(&stdout)),
        v_string(encode_binary_string(&stderr)),
    ]))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "notify" => bf_notify,
        "connected_players" => bf_connected_players,
        "connection_name" => bf_connection_name,
        "connected_seconds" => bf_connected_seconds,
        "idle_seconds" => bf_idle_seconds,
        "listeners" => bf_listeners,
        "boot_player" => bf_boot_player,
        "server_version" => bf_server_version,
        "server_log" => bf_server_log,
        "shutdown" => bf_shutdown,
        "dump_database" => bf_dump_database,
        "load_server_options" => bf_load_server_options,
        "run_gc" => bf_run_gc,
        "gc_stats" => bf_gc_stats,
        "read_http" => bf_read_http,
        "exec" => bf_exec,
    );
}
