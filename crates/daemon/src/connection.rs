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

//! One task per TCP connection: line input, the login state machine, `;`
//! eval sugar, and the output writer with its drop-oldest overflow rule.

use crate::connections::{ConnectionOut, ConnectionRegistry};
use crate::telnet::LineCodec;
use corral_compiler::compile;
use corral_db::{ObjFlag, ObjectRef};
use corral_kernel::config::server_options;
use corral_kernel::tasks::command_parse::parse_into_words;
use corral_kernel::{SchedulerClient, TaskResult, WorldHandle, to_literal};
use corral_var::{Obj, SYSTEM_OBJECT, Symbol, Variant, v_obj, v_str};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub client: SchedulerClient,
    pub world: WorldHandle,
}

pub async fn serve_connection(
    ctx: Arc<ConnectionContext>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, outbound_recv) = unbounded_channel();
    let connection_id = ctx.registry.register(outbound, peer.to_string());
    info!("Connection from {peer} as {connection_id}");

    let writer = tokio::spawn(write_loop(write_half, outbound_recv));

    let mut lines = FramedRead::new(read_half, LineCodec);
    let mut current = connection_id;

    while let Some(line) = lines.next().await {
        let Ok(line) = line else {
            break;
        };
        ctx.registry.touch_activity(current);

        if let Some(expr) = line.strip_prefix(';') {
            handle_eval(&ctx, current, expr).await;
            continue;
        }

        if current.is_connection() {
            match try_login(&ctx, current, &line).await {
                Some(player) => current = player,
                None => {}
            }
            continue;
        }

        match ctx.client.submit_command_task(current, &line, false) {
            Ok(_) => {}
            Err(e) => {
                warn!("command submission for {current} failed: {e}");
                break;
            }
        }
    }

    info!("Disconnect: {current} ({peer})");
    let was_logged_in = ctx.registry.ever_logged_in(current);
    ctx.registry.remove(current);
    // Foreground tasks die with the connection; the hook only fires after
    // a completed login.
    ctx.client.disconnect_player(current);
    if was_logged_in {
        let _ = ctx.client.submit_verb_task(
            current,
            ObjectRef::Obj(SYSTEM_OBJECT),
            Symbol::mk("user_disconnected"),
            vec![v_obj(current)],
            "",
            false,
        );
    }
    writer.abort();
}

/// Drive `#0:do_login_command` for an unlogged line. A positive object in
/// the result means the connection is now that player.
async fn try_login(ctx: &Arc<ConnectionContext>, connection: Obj, line: &str) -> Option<Obj> {
    let words: Vec<corral_var::Var> =
        parse_into_words(line).iter().map(|w| v_str(w)).collect();
    let submission = ctx.client.submit_verb_task(
        connection,
        ObjectRef::Obj(SYSTEM_OBJECT),
        Symbol::mk("do_login_command"),
        words,
        line,
        true,
    );
    let (_task, subscription) = match submission {
        Ok(pair) => pair,
        Err(e) => {
            warn!("do_login_command submission failed: {e}");
            return None;
        }
    };
    let result = wait_result(subscription?).await?;
    let TaskResult::Success(value) = result else {
        return None;
    };
    let Variant::Obj(player) = value.variant() else {
        return None;
    };
    if !player.is_positive() {
        return None;
    }
    let player = *player;

    let prior = ctx.registry.login(connection, player);
    let reconnected = match prior {
        Some(prior) => {
            let _ = prior.outbound.send(ConnectionOut::Line(
                "*** Redirecting connection to new port ***".to_string(),
                true,
            ));
            let _ = prior.outbound.send(ConnectionOut::Disconnect);
            true
        }
        None => false,
    };

    let hook = if reconnected {
        "user_reconnected"
    } else {
        "user_connected"
    };
    let _ = ctx.client.submit_verb_task(
        player,
        ObjectRef::Obj(SYSTEM_OBJECT),
        Symbol::mk(hook),
        vec![v_obj(player)],
        "",
        false,
    );
    Some(player)
}

/// `;expr` from a logged-in programmer or wizard: evaluate and echo the
/// result as `=> literal`.
async fn handle_eval(ctx: &Arc<ConnectionContext>, current: Obj, expr: &str) {
    let allowed = current.is_positive() && {
        let world = ctx.world.lock().unwrap_or_else(|e| e.into_inner());
        world
            .get(ObjectRef::Obj(current))
            .map(|o| o.flags.contains(ObjFlag::Wizard) || o.flags.contains(ObjFlag::Programmer))
            .unwrap_or(false)
    };
    if !allowed {
        let _ = ctx
            .registry
            .send_system(current, "I don't understand that.");
        return;
    }

    // `;expr` evaluates an expression; `;;program` runs verbatim code.
    let source = match expr.strip_prefix(';') {
        Some(program) => program.to_string(),
        None => format!("return {expr};"),
    };
    let program = match compile(&source) {
        Ok(program) => program,
        Err(e) => {
            let _ = ctx.registry.send_system(current, &e.to_string());
            return;
        }
    };
    let Ok((_task, subscription)) = ctx.client.submit_eval_task(current, program) else {
        return;
    };
    match wait_result(subscription).await {
        Some(TaskResult::Success(value)) => {
            let _ = ctx
                .registry
                .send_system(current, &format!("=> {}", to_literal(&value)));
        }
        // Failures already delivered their tracebacks through the session.
        other => debug!("eval for {current} ended: {other:?}"),
    }
}

async fn wait_result(rx: oneshot::Receiver<TaskResult>) -> Option<TaskResult> {
    tokio::task::spawn_blocking(move || rx.recv().ok())
        .await
        .ok()
        .flatten()
}

impl ConnectionRegistry {
    fn send_system(&self, who: Obj, line: &str) -> Result<(), corral_kernel::SessionError> {
        use corral_kernel::Session;
        self.send_system_msg(who, line)
    }
}

/// The writer half: drain the channel, trim the backlog to
/// `max_queued_output` bytes (oldest lines dropped first), write.
async fn write_loop(
    mut write_half: WriteHalf<TcpStream>,
    mut recv: UnboundedReceiver<ConnectionOut>,
) {
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut pending_bytes = 0usize;

    while let Some(first) = recv.recv().await {
        let mut flush = false;
        let mut disconnect = false;
        let mut absorb = |msg: ConnectionOut,
                          pending: &mut VecDeque<String>,
                          pending_bytes: &mut usize,
                          flush: &mut bool,
                          disconnect: &mut bool| {
            match msg {
                ConnectionOut::Line(line, f) => {
                    *pending_bytes += line.len() + 2;
                    pending.push_back(line);
                    *flush |= f;
                }
                ConnectionOut::Disconnect => *disconnect = true,
            }
        };
        absorb(first, &mut pending, &mut pending_bytes, &mut flush, &mut disconnect);
        while let Ok(more) = recv.try_recv() {
            absorb(more, &mut pending, &mut pending_bytes, &mut flush, &mut disconnect);
        }

        let limit = server_options().max_queued_output;
        if limit > 0 {
            while pending_bytes as i64 > limit {
                let Some(dropped) = pending.pop_front() else {
                    break;
                };
                pending_bytes -= dropped.len() + 2;
            }
        }

        while let Some(line) = pending.pop_front() {
            pending_bytes -= line.len() + 2;
            if write_half.write_all(line.as_bytes()).await.is_err()
                || write_half.write_all(b"\r\n").await.is_err()
            {
                return;
            }
        }
        if flush && write_half.flush().await.is_err() {
            return;
        }
        if disconnect {
            let _ = write_half.shutdown().await;
            return;
        }
    }
}
