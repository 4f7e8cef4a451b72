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

//! The scheduler: owner of the ready queue, the timer heap, the suspended
//! map, and the single-writer invariant. Exactly one task executes VM
//! steps at a time; everything else routes control messages through here.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::builtins::BuiltinRegistry;
use crate::tasks::scheduler_client::{SchedulerClient, SchedulerClientMsg, TaskResult};
use crate::tasks::sessions::Session;
use crate::tasks::task::{Task, spawn_task_thread};
use crate::tasks::task_messages::{
    SchedulerControlMsg, TaskControlMsg, TaskDescription, TaskStart,
};
use crate::tasks::{SuspendedTaskDesc, TaskId};
use crate::vm::{AbortReason, WorldHandle};
use corral_var::ErrorCode::{E_INVARG, E_PERM};
use corral_var::{Obj, Var, v_errcode, v_int, v_str};

#[derive(Debug, Clone, Copy, PartialEq)]
enum TaskState {
    /// On the ready queue.
    Ready,
    /// Currently holding the execution baton.
    Running,
    /// On the timer heap.
    SuspendedTimed,
    /// Waiting for an explicit resume().
    SuspendedIndef,
    /// Waiting for connection input (read()).
    WaitingInput,
}

struct TaskControl {
    player: Obj,
    perms: Obj,
    state: TaskState,
    start: Arc<TaskStart>,
    is_background: bool,
    server_initiated: bool,
    control_send: flume::Sender<TaskControlMsg>,
    /// Held until the thread is actually spawned at first dispatch.
    control_recv: Option<flume::Receiver<TaskControlMsg>>,
    thread_spawned: bool,
    /// Set when the task is resumed, consumed at dispatch.
    wake_value: Option<Var>,
    /// When a timed task will fire, for queued_tasks().
    wake_time: Option<SystemTime>,
    /// Frame snapshot from the last suspension.
    desc: Option<SuspendedTaskDesc>,
    subscribers: Vec<oneshot::Sender<TaskResult>>,
}

/// What of a task survives a checkpoint: its start recipe and its wake
/// schedule. A task suspended mid-execution restarts from its recipe.
#[derive(Serialize, Deserialize)]
pub struct SavedTask {
    pub start: TaskStart,
    pub player: Obj,
    pub perms: Obj,
    pub is_background: bool,
    pub server_initiated: bool,
    pub wake_after_seconds: Option<f64>,
}

pub struct Scheduler {
    world: WorldHandle,
    session: Arc<dyn Session>,
    builtins: Arc<BuiltinRegistry>,

    control_send: flume::Sender<(TaskId, SchedulerControlMsg)>,
    control_recv: flume::Receiver<(TaskId, SchedulerControlMsg)>,
    client_send: flume::Sender<SchedulerClientMsg>,
    client_recv: flume::Receiver<SchedulerClientMsg>,

    tasks: HashMap<TaskId, TaskControl>,
    ready: VecDeque<TaskId>,
    timers: BinaryHeap<Reverse<(Instant, TaskId)>>,
    /// player -> FIFO of tasks blocked in read().
    input_wait: HashMap<Obj, VecDeque<TaskId>>,
    running: Option<TaskId>,
    next_task_id: TaskId,

    checkpoint_path: PathBuf,
    shutting_down: bool,
}

enum Event {
    Task((TaskId, SchedulerControlMsg)),
    Client(SchedulerClientMsg),
    Timeout,
}

impl Scheduler {
    pub fn new(
        world: WorldHandle,
        session: Arc<dyn Session>,
        builtins: Arc<BuiltinRegistry>,
        checkpoint_path: PathBuf,
    ) -> Self {
        let (control_send, control_recv) = flume::unbounded();
        let (client_send, client_recv) = flume::unbounded();
        Self {
            world,
            session,
            builtins,
            control_send,
            control_recv,
            client_send,
            client_recv,
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            input_wait: HashMap::new(),
            running: None,
            next_task_id: 1,
            checkpoint_path,
            shutting_down: false,
        }
    }

    pub fn client(&self) -> SchedulerClient {
        SchedulerClient::new(self.client_send.clone())
    }

    /// Re-enter queued work from a checkpoint.
    pub fn restore_tasks(&mut self, saved: Vec<SavedTask>) {
        for task in saved {
            let id = self.create_task(
                Arc::new(task.start),
                task.player,
                task.perms,
                task.is_background,
                task.server_initiated,
                None,
            );
            match task.wake_after_seconds {
                Some(seconds) => {
                    let tc = self.tasks.get_mut(&id).expect("just created");
                    tc.state = TaskState::SuspendedTimed;
                    tc.wake_time =
                        Some(SystemTime::now() + Duration::from_secs_f64(seconds));
                    self.timers.push(Reverse((
                        Instant::now() + Duration::from_secs_f64(seconds),
                        id,
                    )));
                }
                None => {
                    self.ready.push_back(id);
                }
            }
        }
        info!("Restored {} queued tasks from checkpoint", self.tasks.len());
    }

    /// The scheduler loop: dispatch, then wait for whichever of the task
    /// channel, the client channel, or the next timer fires first.
    pub fn run(mut self) {
        info!("Scheduler started");
        loop {
            self.drain_timers();
            self.maybe_dispatch();

            if self.shutting_down && self.running.is_none() {
                break;
            }

            let timeout = self.next_deadline();
            let event = flume::Selector::new()
                .recv(&self.control_recv, |m| match m {
                    Ok(m) => Event::Task(m),
                    Err(_) => Event::Timeout,
                })
                .recv(&self.client_recv, |m| match m {
                    Ok(m) => Event::Client(m),
                    Err(_) => Event::Timeout,
                })
                .wait_timeout(timeout)
                .unwrap_or(Event::Timeout);

            match event {
                Event::Task((task_id, msg)) => self.handle_task_control_msg(task_id, msg),
                Event::Client(msg) => self.handle_client_msg(msg),
                Event::Timeout => {}
            }
        }
        self.checkpoint_sync();
        info!("Scheduler stopped");
    }

    fn next_deadline(&self) -> Duration {
        let default = Duration::from_millis(1000);
        match self.timers.peek() {
            Some(Reverse((at, _))) => at.saturating_duration_since(Instant::now()).min(default),
            None => default,
        }
    }

    /// Move expired timed tasks to the ready queue, FIFO within the same
    /// instant. Entries whose task was resumed or killed in the meantime
    /// are stale and dropped.
    fn drain_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, task_id))) = self.timers.peek().copied() {
            if at > now {
                break;
            }
            self.timers.pop();
            let Some(tc) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            if tc.state != TaskState::SuspendedTimed {
                continue;
            }
            tc.state = TaskState::Ready;
            tc.wake_time = None;
            tc.wake_value.get_or_insert_with(|| v_int(0));
            self.ready.push_back(task_id);
        }
    }

    /// Hand the execution baton to the next ready task, if it is free.
    fn maybe_dispatch(&mut self) {
        if self.running.is_some() || self.shutting_down {
            return;
        }
        let Some(task_id) = self.ready.pop_front() else {
            return;
        };
        let Some(tc) = self.tasks.get_mut(&task_id) else {
            return;
        };

        if !tc.thread_spawned {
            let control_recv = tc.control_recv.take().expect("unspawned task has receiver");
            let task = Task {
                task_id,
                task_start: tc.start.clone(),
                player: tc.player,
                perms: tc.perms,
                is_background: tc.is_background,
            };
            match spawn_task_thread(
                task,
                self.world.clone(),
                self.session.clone(),
                self.builtins.clone(),
                self.control_send.clone(),
                control_recv,
            ) {
                Ok(_) => {
                    tc.thread_spawned = true;
                }
                Err(e) => {
                    error!("could not spawn thread for task {task_id}: {e}");
                    self.finish_task(task_id, TaskResult::AbortCancelled);
                    return;
                }
            }
            let _ = tc.control_send.send(TaskControlMsg::Run);
        } else {
            let value = tc.wake_value.take().unwrap_or(v_int(0));
            let _ = tc.control_send.send(TaskControlMsg::Resume(value));
        }
        tc.state = TaskState::Running;
        self.running = Some(task_id);
    }

    fn release_baton(&mut self, task_id: TaskId) {
        if self.running == Some(task_id) {
            self.running = None;
        }
    }

    fn finish_task(&mut self, task_id: TaskId, result: TaskResult) {
        self.release_baton(task_id);
        if let Some(tc) = self.tasks.remove(&task_id) {
            for sub in tc.subscribers {
                let _ = sub.send(result.clone());
            }
        }
        self.input_wait.retain(|_, q| {
            q.retain(|t| *t != task_id);
            !q.is_empty()
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn create_task(
        &mut self,
        start: Arc<TaskStart>,
        player: Obj,
        perms: Obj,
        is_background: bool,
        server_initiated: bool,
        subscriber: Option<oneshot::Sender<TaskResult>>,
    ) -> TaskId {
        let task_id = self.next_task_id;
        self.next_task_id += 1;
        let (control_send, control_recv) = flume::unbounded();
        self.tasks.insert(
            task_id,
            TaskControl {
                player,
                perms,
                state: TaskState::Ready,
                start,
                is_background,
                server_initiated,
                control_send,
                control_recv: Some(control_recv),
                thread_spawned: false,
                wake_value: None,
                wake_time: None,
                desc: None,
                subscribers: subscriber.into_iter().collect(),
            },
        );
        task_id
    }

    // ------------------------------------------------------------------
    // Task control messages
    // ------------------------------------------------------------------

    fn handle_task_control_msg(&mut self, task_id: TaskId, msg: SchedulerControlMsg) {
        match msg {
            SchedulerControlMsg::TaskSuccess(value) => {
                self.finish_task(task_id, TaskResult::Success(value));
            }
            SchedulerControlMsg::TaskException(exception) => {
                let lines = match &exception {
                    crate::vm::Exception::Error(raised) => raised.traceback.clone(),
                    crate::vm::Exception::Abort(_) => vec!["(aborted)".to_string()],
                };
                self.deliver_traceback(task_id, &lines);
                self.finish_task(task_id, TaskResult::Exception(lines));
            }
            SchedulerControlMsg::TaskAbortLimitsReached(reason) => {
                let msg = match reason {
                    AbortReason::OutOfTicks => "Task ran out of ticks",
                    AbortReason::OutOfSeconds => "Task ran out of seconds",
                    AbortReason::Killed => "Task killed",
                };
                self.deliver_traceback(task_id, &[msg.to_string()]);
                self.finish_task(task_id, TaskResult::AbortLimits);
            }
            SchedulerControlMsg::TaskAbortCancelled => {
                self.finish_task(task_id, TaskResult::AbortCancelled);
            }
            SchedulerControlMsg::TaskSuspend(wake_at, desc) => {
                self.release_baton(task_id);
                let Some(tc) = self.tasks.get_mut(&task_id) else {
                    return;
                };
                tc.desc = Some(desc);
                // Once suspended, a task is background work: it survives
                // its connection's disconnect and runs on the bg budget.
                tc.is_background = true;
                match wake_at {
                    Some(at) => {
                        tc.state = TaskState::SuspendedTimed;
                        let delay = at.saturating_duration_since(Instant::now());
                        tc.wake_time = Some(SystemTime::now() + delay);
                        self.timers.push(Reverse((at, task_id)));
                    }
                    None => {
                        tc.state = TaskState::SuspendedIndef;
                    }
                }
            }
            SchedulerControlMsg::TaskRequestInput(desc) => {
                self.release_baton(task_id);
                let Some(tc) = self.tasks.get_mut(&task_id) else {
                    return;
                };
                tc.desc = Some(desc);
                tc.state = TaskState::WaitingInput;
                let player = tc.player;
                self.input_wait.entry(player).or_default().push_back(task_id);
            }
            SchedulerControlMsg::TaskRequestFork(fork, reply) => {
                let delay = fork.delay;
                let player = fork.player;
                let perms = fork.perms;
                let child = self.create_task(
                    Arc::new(TaskStart::Fork(fork)),
                    player,
                    perms,
                    true,
                    false,
                    None,
                );
                if delay.is_zero() {
                    // Child queues behind the parent; the parent keeps the
                    // baton until its own slice ends.
                    self.ready.push_back(child);
                } else {
                    let tc = self.tasks.get_mut(&child).expect("just created");
                    tc.state = TaskState::SuspendedTimed;
                    tc.wake_time = Some(SystemTime::now() + delay);
                    self.timers.push(Reverse((Instant::now() + delay, child)));
                }
                let _ = reply.send(child);
            }
            SchedulerControlMsg::KillTask {
                victim,
                perms,
                wizardly,
                reply,
            } => {
                let _ = reply.send(self.kill_task(victim, perms, wizardly));
            }
            SchedulerControlMsg::ResumeTask {
                victim,
                value,
                perms,
                wizardly,
                reply,
            } => {
                let _ = reply.send(self.resume_task(victim, value, perms, wizardly));
            }
            SchedulerControlMsg::ExternalResume { victim, value } => {
                let Some(tc) = self.tasks.get_mut(&victim) else {
                    // The task died while its external operation ran; the
                    // result is discarded.
                    return;
                };
                if matches!(
                    tc.state,
                    TaskState::SuspendedIndef | TaskState::SuspendedTimed
                ) {
                    tc.state = TaskState::Ready;
                    tc.wake_value = Some(value);
                    self.ready.push_back(victim);
                }
            }
            SchedulerControlMsg::RequestQueuedTasks(reply) => {
                let _ = reply.send(self.task_descriptions());
            }
            SchedulerControlMsg::BootPlayer { player } => {
                let _ = self.session.boot_player(player);
            }
            SchedulerControlMsg::Checkpoint => {
                self.checkpoint_async();
            }
            SchedulerControlMsg::CheckpointFinished(success) => {
                self.submit_server_hook("checkpoint_finished", vec![v_int(success as i64)]);
            }
            SchedulerControlMsg::Shutdown(msg) => {
                self.begin_shutdown(msg);
            }
        }
    }

    fn kill_task(&mut self, victim: TaskId, perms: Obj, wizardly: bool) -> Var {
        let Some(tc) = self.tasks.get(&victim) else {
            return v_errcode(E_INVARG);
        };
        if !wizardly && tc.perms != perms {
            return v_errcode(E_PERM);
        }
        if tc.thread_spawned {
            let _ = tc.control_send.send(TaskControlMsg::Kill);
        }
        if self.running == Some(victim) {
            // The victim holds the execution baton; it dies at its next
            // statement boundary and reports TaskAbortCancelled itself.
            // Reaping it now would let a second task start running.
            return v_int(0);
        }
        // Not running: drop it from our books now; a parked thread's
        // eventual TaskAbortCancelled for an unknown id is ignored.
        self.finish_task(victim, TaskResult::AbortCancelled);
        v_int(0)
    }

    fn resume_task(&mut self, victim: TaskId, value: Var, perms: Obj, wizardly: bool) -> Var {
        let Some(tc) = self.tasks.get_mut(&victim) else {
            return v_errcode(E_INVARG);
        };
        if !wizardly && tc.perms != perms {
            return v_errcode(E_PERM);
        }
        if !matches!(
            tc.state,
            TaskState::SuspendedIndef | TaskState::SuspendedTimed
        ) {
            return v_errcode(E_INVARG);
        }
        // Ready at the next scheduler pass, not immediately.
        tc.state = TaskState::Ready;
        tc.wake_value = Some(value);
        tc.wake_time = None;
        self.ready.push_back(victim);
        v_int(0)
    }

    fn task_descriptions(&self) -> Vec<TaskDescription> {
        self.tasks
            .iter()
            .filter(|(id, _)| self.running != Some(**id))
            .map(|(id, tc)| TaskDescription {
                task_id: *id,
                start_time: tc.wake_time,
                player: tc.player,
                programmer: tc.perms,
                frames: tc.desc.as_ref().map(|d| d.frames.clone()).unwrap_or_default(),
                bytes: tc.desc.as_ref().map(|d| d.bytes).unwrap_or(0),
            })
            .collect()
    }

    /// A task died messily: traceback to the player's connection if there
    /// is one, the server log if not. Never silently dropped.
    fn deliver_traceback(&self, task_id: TaskId, lines: &[String]) {
        let Some(tc) = self.tasks.get(&task_id) else {
            for line in lines {
                error!("orphaned traceback: {line}");
            }
            return;
        };
        let mut delivered = true;
        for line in lines {
            if self.session.send_system_msg(tc.player, line).is_err() {
                delivered = false;
                break;
            }
        }
        if !delivered {
            for line in lines {
                error!("traceback for {} (task {}): {line}", tc.player, task_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Client messages
    // ------------------------------------------------------------------

    fn handle_client_msg(&mut self, msg: SchedulerClientMsg) {
        match msg {
            SchedulerClientMsg::SubmitCommand {
                player,
                command,
                subscriber,
                reply,
            } => {
                // A task blocked in read() on this connection takes the
                // line instead of command dispatch.
                if let Some(queue) = self.input_wait.get_mut(&player) {
                    if let Some(reader) = queue.pop_front() {
                        if queue.is_empty() {
                            self.input_wait.remove(&player);
                        }
                        if let Some(tc) = self.tasks.get_mut(&reader) {
                            tc.state = TaskState::Ready;
                            tc.wake_value = Some(v_str(&command));
                            self.ready.push_back(reader);
                        }
                        let _ = reply.send(Ok(reader));
                        return;
                    }
                }
                let id = self.create_task(
                    Arc::new(TaskStart::Command { player, command }),
                    player,
                    player,
                    false,
                    false,
                    subscriber,
                );
                self.ready.push_back(id);
                let _ = reply.send(Ok(id));
            }
            SchedulerClientMsg::SubmitVerb {
                player,
                vloc,
                verb,
                args,
                argstr,
                subscriber,
                reply,
            } => {
                let id = self.create_task(
                    Arc::new(TaskStart::Verb {
                        player,
                        vloc,
                        verb,
                        args,
                        argstr,
                    }),
                    player,
                    player,
                    false,
                    true,
                    subscriber,
                );
                self.ready.push_back(id);
                let _ = reply.send(Ok(id));
            }
            SchedulerClientMsg::SubmitEval {
                player,
                program,
                subscriber,
                reply,
            } => {
                let id = self.create_task(
                    Arc::new(TaskStart::Eval { player, program }),
                    player,
                    player,
                    false,
                    false,
                    subscriber,
                );
                self.ready.push_back(id);
                let _ = reply.send(Ok(id));
            }
            SchedulerClientMsg::DisconnectPlayer { player } => {
                // Foreground tasks die with the connection; background
                // (forked, suspended) work continues.
                let victims: Vec<TaskId> = self
                    .tasks
                    .iter()
                    .filter(|(_, tc)| tc.player == player && !tc.is_background)
                    .map(|(id, _)| *id)
                    .collect();
                for victim in victims {
                    if let Some(tc) = self.tasks.get(&victim) {
                        if tc.thread_spawned {
                            let _ = tc.control_send.send(TaskControlMsg::Kill);
                        }
                    }
                    // A currently-running victim keeps the baton until it
                    // aborts at a statement boundary.
                    if self.running != Some(victim) {
                        self.finish_task(victim, TaskResult::AbortCancelled);
                    }
                }
            }
            SchedulerClientMsg::Checkpoint => self.checkpoint_async(),
            SchedulerClientMsg::Shutdown(msg) => self.begin_shutdown(msg),
        }
    }

    fn submit_server_hook(&mut self, verb: &str, args: Vec<Var>) {
        let id = self.create_task(
            Arc::new(TaskStart::Verb {
                player: corral_var::SYSTEM_OBJECT,
                vloc: corral_db::ObjectRef::Obj(corral_var::SYSTEM_OBJECT),
                verb: corral_var::Symbol::mk(verb),
                args,
                argstr: String::new(),
            }),
            corral_var::SYSTEM_OBJECT,
            corral_var::SYSTEM_OBJECT,
            true,
            true,
            None,
        );
        self.ready.push_back(id);
    }

    // ------------------------------------------------------------------
    // Checkpoints and shutdown
    // ------------------------------------------------------------------

    fn saved_tasks(&self) -> Vec<SavedTask> {
        self.tasks
            .iter()
            .filter(|(id, _)| self.running != Some(**id))
            .map(|(_, tc)| SavedTask {
                start: (*tc.start).clone(),
                player: tc.player,
                perms: tc.perms,
                is_background: tc.is_background,
                server_initiated: tc.server_initiated,
                wake_after_seconds: tc.wake_time.and_then(|at| {
                    at.duration_since(SystemTime::now())
                        .ok()
                        .map(|d| d.as_secs_f64())
                }),
            })
            .collect()
    }

    /// `dump_database()`: clone a consistent snapshot and write it from a
    /// background thread; the hook verbs fire around it.
    fn checkpoint_async(&mut self) {
        self.submit_server_hook("checkpoint_started", vec![]);
        let snapshot = self.build_snapshot();
        let path = self.checkpoint_path.clone();
        let notify = self.control_send.clone();
        std::thread::Builder::new()
            .name("checkpoint-writer".to_string())
            .spawn(move || {
                let ok = match corral_db::write_snapshot(&path, &snapshot) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("checkpoint failed: {e}");
                        false
                    }
                };
                let _ = notify.send((0, SchedulerControlMsg::CheckpointFinished(ok)));
            })
            .map(|_| ())
            .unwrap_or_else(|e| error!("cannot spawn checkpoint writer: {e}"));
    }

    fn checkpoint_sync(&mut self) {
        let snapshot = self.build_snapshot();
        if let Err(e) = corral_db::write_snapshot(&self.checkpoint_path, &snapshot) {
            error!("final checkpoint failed: {e}");
        }
    }

    fn build_snapshot(&self) -> corral_db::Snapshot {
        let world = {
            let guard = self.world.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let tasks =
            serde_json::to_value(self.saved_tasks()).unwrap_or(serde_json::Value::Null);
        corral_db::Snapshot::new(world, tasks)
    }

    fn begin_shutdown(&mut self, msg: Option<String>) {
        if self.shutting_down {
            return;
        }
        info!("Shutdown requested: {msg:?}");
        let text = match &msg {
            Some(msg) => format!("*** Server shutting down: {msg} ***"),
            None => "*** Server shutting down ***".to_string(),
        };
        if let Ok(players) = self.session.connected_players(true) {
            for player in players {
                let _ = self.session.send_system_msg(player, &text);
            }
        }
        // Stop dispatching; surviving queued tasks land in the final
        // checkpoint. The loop exits once the in-flight task (if any)
        // reports its slice end.
        self.shutting_down = true;
        if self.running.is_some() {
            warn!("waiting for the running task to finish before shutdown");
        }
    }
}
