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

//! The AST-walking interpreter. One statement is one tick; control flow
//! (return/break/continue) travels as `StmtResult`, errors and aborts as
//! `Exception`.

use std::sync::Arc;
use std::time::Instant;

use crate::builtins::{BfCallState, BfErr, BfRet, BuiltinRegistry};
use crate::config::{check_bytes_limit, server_options, value_bytes};
use crate::tasks::command_parse::ParsedCommand;
use crate::tasks::sessions::Session;
use crate::tasks::task_messages::{
    ForkRequest, SchedulerControlMsg, TaskControlMsg,
};
use crate::tasks::{FrameSnapshot, SuspendedTaskDesc, TaskId};
use crate::vm::activation::Activation;
use crate::vm::scatter_assign::scatter_assign;
use crate::vm::unwind::{Exception, RaisedError, make_traceback};
use crate::vm::{AbortReason, MAX_STACK_DEPTH, VMExecState, WorldHandle};
use corral_compiler::ast::{
    Arg, BinaryOp, CatchCodes, Expr, Stmt, StmtNode, UnaryOp,
};
use corral_compiler::{Name, Program};
use corral_db::{ObjFlag, ObjectRef, PropFlag, VerbFlag, WorldState, WorldStateError};
use corral_var::ErrorCode::{
    E_DIV, E_FLOAT, E_INVARG, E_INVIND, E_MAXREC, E_PERM, E_PROPNF, E_QUOTA, E_TYPE, E_VARNF,
    E_VERBNF,
};
use corral_var::{
    Error, Obj, SYSTEM_OBJECT, Symbol, Var, VarType, Variant, v_bool_int, v_err, v_float,
    v_int, v_list_iter, v_map_iter, v_obj, v_str, v_waif,
};

/// How a statement (or block) finished.
#[derive(Debug, Clone)]
pub enum StmtResult {
    Done,
    Return(Var),
    Break(Option<Name>),
    Continue(Option<Name>),
}

/// Convert store failures into the MOO error codes the language surfaces.
pub fn world_state_err(e: WorldStateError) -> Error {
    match e {
        WorldStateError::InvalidObject(_) => E_INVIND.msg(e.to_string()),
        WorldStateError::PropertyNotFound(_, _) => E_PROPNF.msg(e.to_string()),
        WorldStateError::VerbNotFound(_, _) => E_VERBNF.msg(e.to_string()),
        WorldStateError::InvalidArgument(_) => E_INVARG.msg(e.to_string()),
        WorldStateError::Recursive(_) => {
            corral_var::ErrorCode::E_RECMOVE.msg(e.to_string())
        }
        WorldStateError::PropertyConflict(_) => E_INVARG.msg(e.to_string()),
    }
}

/// The interpreter for one task. Owns the task's VM state and the handles
/// it needs to reach the store, the scheduler, and the connection side.
pub struct Interpreter {
    pub state: VMExecState,
    pub world: WorldHandle,
    pub session: Arc<dyn Session>,
    pub scheduler_send: flume::Sender<(TaskId, SchedulerControlMsg)>,
    pub control_recv: flume::Receiver<TaskControlMsg>,
    pub builtins: Arc<BuiltinRegistry>,
    /// Stack of enclosing index contexts, for `$` (and giving `^`/`$` a
    /// length to refer to). `None` for unindexable bases.
    index_lengths: Vec<Option<i64>>,
}

impl Interpreter {
    pub fn new(
        state: VMExecState,
        world: WorldHandle,
        session: Arc<dyn Session>,
        scheduler_send: flume::Sender<(TaskId, SchedulerControlMsg)>,
        control_recv: flume::Receiver<TaskControlMsg>,
        builtins: Arc<BuiltinRegistry>,
    ) -> Self {
        Self {
            state,
            world,
            session,
            scheduler_send,
            control_recv,
            builtins,
            index_lengths: vec![],
        }
    }

    // ------------------------------------------------------------------
    // Shared-state access
    // ------------------------------------------------------------------

    pub fn with_world<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        let guard = self.world.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn with_world_mut<R>(&self, f: impl FnOnce(&mut WorldState) -> R) -> R {
        let mut guard = self.world.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn send_scheduler(&self, msg: SchedulerControlMsg) {
        let _ = self.scheduler_send.send((self.state.task_id, msg));
    }

    pub fn raise_err(&self, e: Error) -> Exception {
        Exception::Error(RaisedError {
            traceback: make_traceback(&e, &self.state.stack),
            error: e,
        })
    }

    fn raise_code(&self, c: corral_var::ErrorCode) -> Exception {
        self.raise_err(Error::from(c))
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    pub fn obj_is_wizard(&self, o: Obj) -> bool {
        self.with_world(|ws| {
            ws.get(ObjectRef::Obj(o))
                .map(|obj| obj.is_wizard())
                .unwrap_or(false)
        })
    }

    /// The permission disjunction privileged builtins honor: the programmer
    /// of the running verb is a wizard, or the player behind the task is.
    pub fn task_wizardly(&self) -> bool {
        self.obj_is_wizard(self.state.task_perms())
            || self.obj_is_wizard(self.state.player())
    }

    /// Wizard, or the owner of the thing.
    pub fn controls(&self, owner: Obj) -> bool {
        self.task_wizardly() || self.state.task_perms() == owner
    }

    // ------------------------------------------------------------------
    // Frame management and entry points
    // ------------------------------------------------------------------

    fn check_depth(&self) -> Result<(), Exception> {
        if self.state.stack.len() >= MAX_STACK_DEPTH {
            return Err(self.raise_err(E_MAXREC.msg("too many verb calls")));
        }
        Ok(())
    }

    fn run_top_frame(&mut self) -> Result<Var, Exception> {
        let stmts = self.state.top().stmts.clone();
        match self.exec_stmts(&stmts)? {
            StmtResult::Return(v) => Ok(v),
            _ => Ok(v_int(0)),
        }
    }

    /// Run an eval program in a fresh frame. `eval()`'s error-capture rules
    /// are in bf_eval, not here.
    pub fn run_eval(
        &mut self,
        program: &Program,
        player: Obj,
        permissions: Obj,
    ) -> Result<Var, Exception> {
        self.check_depth()?;
        self.state
            .stack
            .push(Activation::for_eval(program, player, permissions));
        let result = self.run_top_frame();
        self.state.stack.pop();
        result
    }

    /// Run a forked task body in a fresh frame built from the fork
    /// snapshot.
    pub fn run_fork(&mut self, fork: &ForkRequest, task_id: TaskId) -> Result<Var, Exception> {
        let mut activation = Activation {
            this: fork.this.clone(),
            player: fork.player,
            permissions: fork.perms,
            caller: fork.caller.clone(),
            verb_name: fork.verb_name.clone(),
            verb_loc: fork.verb_loc,
            args: vec![],
            line_number: 1,
            server_initiated: false,
            debug: true,
            env: fork.env.clone(),
            stmts: fork.stmts.clone(),
            names: fork.names.clone(),
        };
        if let Some(var) = &fork.fork_var {
            activation.set_variable(var, v_int(task_id as i64));
        }
        self.state.task_local = fork.task_local.clone();
        self.state.stack.push(activation);
        let result = self.run_top_frame();
        self.state.stack.pop();
        result
    }

    /// Dispatch and run a verb call, pushing and popping its frame.
    /// `require_exec` is false for command-dispatched verbs.
    #[allow(clippy::too_many_arguments)]
    pub fn call_verb(
        &mut self,
        receiver: Var,
        verb_name: Symbol,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
        player: Obj,
        require_exec: bool,
        server_initiated: bool,
    ) -> Result<Var, Exception> {
        let target = self.dispatch_target(&receiver)?;

        let resolved = self.with_world(|ws| ws.resolve_verb(target, &verb_name));
        let (definer, _index, verbdef) =
            resolved.map_err(|e| self.raise_err(world_state_err(e)))?;

        if require_exec && !verbdef.flags.contains(VerbFlag::Exec) {
            return Err(self.raise_err(E_VERBNF.msg(format!("{verb_name} is not executable"))));
        }
        let Some(program) = &verbdef.program else {
            return Err(self.raise_err(E_VERBNF.msg(format!("{verb_name} has not been programmed"))));
        };

        self.check_depth()?;
        let caller = match self.state.stack.last() {
            Some(top) => top.this.clone(),
            None => v_obj(player),
        };
        // The frame records the name the verb was *called* by, which under
        // abbreviation may be shorter than its definition name.
        let mut activation = Activation::for_verb(
            program,
            receiver,
            player,
            caller,
            verb_name,
            definer,
            verbdef.owner,
            verbdef.flags.contains(VerbFlag::Debug),
            args,
            command,
        );
        activation.server_initiated = server_initiated;
        let debug = activation.debug;
        self.state.stack.push(activation);
        let result = self.run_top_frame();
        self.state.stack.pop();

        match result {
            Err(Exception::Error(raised)) if !debug => Ok(v_err(raised.error)),
            other => other,
        }
    }

    /// Run a verb that command dispatch already resolved (name *and*
    /// argspec), bypassing re-resolution.
    pub fn call_resolved_verb(
        &mut self,
        receiver: Var,
        definer: ObjectRef,
        verbdef: &corral_db::VerbDef,
        verb_name: Symbol,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
        player: Obj,
    ) -> Result<Var, Exception> {
        let Some(program) = &verbdef.program else {
            return Err(self.raise_err(E_VERBNF.msg(format!("{verb_name} has not been programmed"))));
        };
        self.check_depth()?;
        let caller = match self.state.stack.last() {
            Some(top) => top.this.clone(),
            None => v_obj(player),
        };
        let activation = Activation::for_verb(
            program,
            receiver,
            player,
            caller,
            verb_name,
            definer,
            verbdef.owner,
            verbdef.flags.contains(VerbFlag::Debug),
            args,
            command,
        );
        let debug = activation.debug;
        self.state.stack.push(activation);
        let result = self.run_top_frame();
        self.state.stack.pop();
        match result {
            Err(Exception::Error(raised)) if !debug => Ok(v_err(raised.error)),
            other => other,
        }
    }

    /// Call a hook verb if it exists; `Ok(None)` when it does not. Used for
    /// `:initialize`, `:recycle`, `:accept`, `do_login_command`, and kin.
    pub fn call_verb_if_exists(
        &mut self,
        receiver: Var,
        verb_name: &str,
        args: Vec<Var>,
    ) -> Result<Option<Var>, Exception> {
        let name = Symbol::mk(verb_name);
        let Ok(target) = self.dispatch_target(&receiver) else {
            return Ok(None);
        };
        let found = self.with_world(|ws| ws.resolve_verb(target, &name).is_ok());
        if !found {
            return Ok(None);
        }
        let player = self.state.player();
        self.call_verb(receiver, name, args, None, player, true, false)
            .map(Some)
    }

    /// Resolve the object whose verb table a call on `receiver` consults:
    /// objects and anonymous objects dispatch on themselves, waifs on their
    /// class, and other primitives through the `$<type>_proto` table.
    fn dispatch_target(&self, receiver: &Var) -> Result<ObjectRef, Exception> {
        match receiver.variant() {
            Variant::Obj(o) => {
                let oref = ObjectRef::Obj(*o);
                if !self.with_world(|ws| ws.valid(oref)) {
                    return Err(self.raise_code(E_INVIND));
                }
                Ok(oref)
            }
            Variant::Anon(a) => {
                let oref = ObjectRef::Anon(*a);
                if !self.with_world(|ws| ws.valid(oref)) {
                    return Err(self.raise_code(E_INVIND));
                }
                Ok(oref)
            }
            Variant::Waif(w) => {
                let oref = ObjectRef::Obj(w.class());
                if !self.with_world(|ws| ws.valid(oref)) {
                    return Err(self.raise_code(E_INVIND));
                }
                Ok(oref)
            }
            _ => {
                let proto_name = match receiver.type_code() {
                    VarType::TYPE_INT => "int_proto",
                    VarType::TYPE_FLOAT => "float_proto",
                    VarType::TYPE_STR => "str_proto",
                    VarType::TYPE_LIST => "list_proto",
                    VarType::TYPE_MAP => "map_proto",
                    VarType::TYPE_ERR => "err_proto",
                    VarType::TYPE_BOOL => "bool_proto",
                    _ => return Err(self.raise_code(E_TYPE)),
                };
                let proto = self.with_world(|ws| {
                    ws.resolve_property(ObjectRef::Obj(SYSTEM_OBJECT), &Symbol::mk(proto_name))
                });
                let Ok(proto) = proto else {
                    return Err(self.raise_code(E_TYPE));
                };
                let Variant::Obj(proto) = proto.variant() else {
                    return Err(self.raise_code(E_TYPE));
                };
                let oref = ObjectRef::Obj(*proto);
                if !self.with_world(|ws| ws.valid(oref)) {
                    return Err(self.raise_code(E_TYPE));
                }
                Ok(oref)
            }
        }
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    pub fn snapshot_desc(&self) -> SuspendedTaskDesc {
        let frames = self
            .state
            .stack
            .iter()
            .rev()
            .map(|f| FrameSnapshot {
                this: f.this.clone(),
                verb_name: f.verb_name.clone(),
                verb_loc: f.verb_definer_var(),
                programmer: f.permissions,
                line: f.line_number,
                server_initiated: f.server_initiated,
            })
            .collect();
        let bytes = self
            .state
            .stack
            .iter()
            .flat_map(|f| f.env.iter().flatten())
            .map(value_bytes)
            .sum();
        SuspendedTaskDesc { frames, bytes }
    }

    /// Park this task until the scheduler resumes or kills it. The slice
    /// ends with the message we send here; the wake value is `suspend()`'s
    /// return.
    pub fn suspend(&mut self, wake_at: Option<Instant>) -> Result<Var, Exception> {
        let desc = self.snapshot_desc();
        self.send_scheduler(SchedulerControlMsg::TaskSuspend(wake_at, desc));
        self.block_for_resume()
    }

    /// Park awaiting a line of connection input (`read()`).
    pub fn suspend_for_input(&mut self) -> Result<Var, Exception> {
        let desc = self.snapshot_desc();
        self.send_scheduler(SchedulerControlMsg::TaskRequestInput(desc));
        self.block_for_resume()
    }

    fn block_for_resume(&mut self) -> Result<Var, Exception> {
        match self.control_recv.recv() {
            Ok(TaskControlMsg::Resume(value)) => {
                let options = server_options();
                // Anything that suspended resumes on the background budget.
                self.state.is_background = true;
                self.state
                    .reset_limits(options.bg_ticks, options.bg_seconds);
                Ok(value)
            }
            Ok(TaskControlMsg::Kill) | Err(_) => Err(Exception::Abort(AbortReason::Killed)),
            Ok(TaskControlMsg::Run) => {
                // A stray Run for an already-running task; treat as a
                // zero-valued wake.
                Ok(v_int(0))
            }
        }
    }

    // ------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------

    fn charge_tick(&mut self) -> Result<(), Exception> {
        if self.state.ticks_left == 0 {
            return Err(Exception::Abort(AbortReason::OutOfTicks));
        }
        self.state.ticks_left -= 1;
        if self.state.slice_started.elapsed() > self.state.seconds_limit {
            return Err(Exception::Abort(AbortReason::OutOfSeconds));
        }
        // Kill can arrive while we are running; honor it at statement
        // granularity.
        if let Ok(TaskControlMsg::Kill) = self.control_recv.try_recv() {
            return Err(Exception::Abort(AbortReason::Killed));
        }
        Ok(())
    }

    pub fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<StmtResult, Exception> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                StmtResult::Done => continue,
                flow => return Ok(flow),
            }
        }
        Ok(StmtResult::Done)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<StmtResult, Exception> {
        self.charge_tick()?;
        self.state.top_mut().line_number = stmt.line;

        match &stmt.node {
            StmtNode::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(StmtResult::Done)
            }
            StmtNode::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr)?,
                    None => v_int(0),
                };
                Ok(StmtResult::Return(value))
            }
            StmtNode::Break { exit } => Ok(StmtResult::Break(*exit)),
            StmtNode::Continue { exit } => Ok(StmtResult::Continue(*exit)),
            StmtNode::Cond { arms, otherwise } => {
                for arm in arms {
                    if self.eval_expr(&arm.condition)?.is_true() {
                        return self.exec_stmts(&arm.statements);
                    }
                }
                self.exec_stmts(otherwise)
            }
            StmtNode::While {
                id,
                condition,
                body,
            } => {
                loop {
                    self.charge_tick()?;
                    if !self.eval_expr(condition)?.is_true() {
                        break;
                    }
                    match self.exec_stmts(body)? {
                        StmtResult::Done => {}
                        StmtResult::Break(exit) if loop_matches(&exit, id) => break,
                        StmtResult::Continue(exit) if loop_matches(&exit, id) => continue,
                        flow => return Ok(flow),
                    }
                }
                Ok(StmtResult::Done)
            }
            StmtNode::ForList {
                value_id,
                key_id,
                expr,
                body,
            } => {
                // Snapshot the collection; mutations of the source variable
                // during iteration are not observed.
                let collection = self.eval_expr(expr)?;
                let pairs: Vec<(Var, Var)> = match collection.variant() {
                    Variant::List(l) => l
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (v.clone(), v_int(i as i64 + 1)))
                        .collect(),
                    Variant::Map(m) => {
                        m.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
                    }
                    _ => return Err(self.raise_code(E_TYPE)),
                };
                let label = Some(*value_id);
                for (value, key) in pairs {
                    self.charge_tick()?;
                    self.state.top_mut().set_variable(value_id, value);
                    if let Some(key_id) = key_id {
                        self.state.top_mut().set_variable(key_id, key);
                    }
                    match self.exec_stmts(body)? {
                        StmtResult::Done => {}
                        StmtResult::Break(exit) if loop_matches(&exit, &label) => break,
                        StmtResult::Continue(exit) if loop_matches(&exit, &label) => {
                            continue;
                        }
                        flow => return Ok(flow),
                    }
                }
                Ok(StmtResult::Done)
            }
            StmtNode::ForRange { id, from, to, body } => {
                let from = self.eval_expr(from)?;
                let to = self.eval_expr(to)?;
                // Ranges run over ints or object ids; a backward range runs
                // zero iterations and leaves the loop variable untouched.
                let (start, end, objs) = match (from.variant(), to.variant()) {
                    (Variant::Int(a), Variant::Int(b)) => (*a, *b, false),
                    (Variant::Obj(a), Variant::Obj(b)) => (a.id(), b.id(), true),
                    _ => return Err(self.raise_code(E_TYPE)),
                };
                let label = Some(*id);
                let mut i = start;
                while i <= end {
                    self.charge_tick()?;
                    let value = if objs {
                        v_obj(Obj::mk_id(i))
                    } else {
                        v_int(i)
                    };
                    self.state.top_mut().set_variable(id, value);
                    match self.exec_stmts(body)? {
                        StmtResult::Done => {}
                        StmtResult::Break(exit) if loop_matches(&exit, &label) => break,
                        StmtResult::Continue(exit) if loop_matches(&exit, &label) => {
                            let Some(next) = i.checked_add(1) else { break };
                            i = next;
                            continue;
                        }
                        flow => return Ok(flow),
                    }
                    let Some(next) = i.checked_add(1) else { break };
                    i = next;
                }
                Ok(StmtResult::Done)
            }
            StmtNode::Fork { id, time, body } => {
                let delay = self.eval_expr(time)?;
                let seconds = match delay.variant() {
                    Variant::Int(i) if *i >= 0 => *i as f64,
                    Variant::Float(f) if *f >= 0.0 => *f,
                    _ => return Err(self.raise_code(E_INVARG)),
                };
                let top = self.state.top();
                let fork = ForkRequest {
                    player: top.player,
                    perms: top.permissions,
                    delay: std::time::Duration::from_secs_f64(seconds),
                    stmts: Arc::new(body.clone()),
                    names: top.names.clone(),
                    env: top.env.clone(),
                    task_local: self.state.task_local.clone(),
                    this: top.this.clone(),
                    caller: top.caller.clone(),
                    verb_name: top.verb_name.clone(),
                    verb_loc: top.verb_loc,
                    fork_var: *id,
                };
                let (tx, rx) = oneshot::channel();
                self.send_scheduler(SchedulerControlMsg::TaskRequestFork(fork, tx));
                let child_id = rx
                    .recv()
                    .map_err(|_| Exception::Abort(AbortReason::Killed))?;
                if let Some(id) = id {
                    self.state
                        .top_mut()
                        .set_variable(id, v_int(child_id as i64));
                }
                Ok(StmtResult::Done)
            }
            StmtNode::TryExcept { body, excepts } => {
                match self.exec_stmts(body) {
                    Err(Exception::Error(raised)) => {
                        for arm in excepts {
                            if !self.codes_match(&arm.codes, &raised.error)? {
                                continue;
                            }
                            if let Some(id) = &arm.id {
                                // The bound variable holds the error code
                                // value itself.
                                self.state
                                    .top_mut()
                                    .set_variable(id, v_err(raised.error.clone()));
                            }
                            return self.exec_stmts(&arm.statements);
                        }
                        Err(Exception::Error(raised))
                    }
                    other => other,
                }
            }
            StmtNode::TryFinally { body, handler } => {
                let body_result = self.exec_stmts(body);
                match &body_result {
                    // Kill/limit aborts do not run `finally`.
                    Err(Exception::Abort(_)) => body_result,
                    _ => match self.exec_stmts(handler)? {
                        // A handler that itself returns/breaks/continues
                        // overrides the pending completion of the body.
                        StmtResult::Done => body_result,
                        flow => Ok(flow),
                    },
                }
            }
        }
    }

    fn codes_match(&mut self, codes: &CatchCodes, error: &Error) -> Result<bool, Exception> {
        match codes {
            CatchCodes::Any => Ok(true),
            CatchCodes::Codes(args) => {
                let values = self.eval_args(args)?;
                let raised = v_err(error.clone());
                Ok(values.iter().any(|v| *v == raised))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expression evaluation
    // ------------------------------------------------------------------

    pub fn eval_expr(&mut self, expr: &Expr) -> Result<Var, Exception> {
        match expr {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Id(name) => self
                .state
                .top()
                .get_variable(name)
                .ok_or_else(|| self.raise_code(E_VARNF)),
            Expr::And(lhs, rhs) => {
                let l = self.eval_expr(lhs)?;
                if !l.is_true() {
                    return Ok(l);
                }
                self.eval_expr(rhs)
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval_expr(lhs)?;
                if l.is_true() {
                    return Ok(l);
                }
                self.eval_expr(rhs)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval_expr(operand)?;
                eval_unary_op(*op, &v).map_err(|e| self.raise_err(e))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval_expr(lhs)?;
                let r = self.eval_expr(rhs)?;
                eval_binary_op(*op, &l, &r).map_err(|e| self.raise_err(e))
            }
            Expr::Cond {
                condition,
                consequence,
                alternative,
            } => {
                if self.eval_expr(condition)?.is_true() {
                    self.eval_expr(consequence)
                } else {
                    self.eval_expr(alternative)
                }
            }
            Expr::List(args) => {
                let values = self.eval_args(args)?;
                Ok(v_list_iter(values))
            }
            Expr::Map(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let k = self.eval_expr(k)?;
                    let v = self.eval_expr(v)?;
                    out.push((k, v));
                }
                // Key validity enforced by the map builder.
                let m = v_map_iter(out.iter());
                Ok(m)
            }
            Expr::Index(base, index) => {
                let basev = self.eval_expr(base)?;
                let idxv = self.eval_in_index_context(&basev, index)?;
                basev.index(&idxv).map_err(|e| self.raise_err(e))
            }
            Expr::Range { base, from, to } => {
                let basev = self.eval_expr(base)?;
                let fromv = self.eval_in_index_context(&basev, from)?;
                let tov = self.eval_in_index_context(&basev, to)?;
                basev.range(&fromv, &tov).map_err(|e| self.raise_err(e))
            }
            Expr::Length => match self.index_lengths.last() {
                Some(Some(len)) => Ok(v_int(*len)),
                _ => Err(self.raise_code(E_TYPE)),
            },
            Expr::Prop { location, property } => {
                let locv = self.eval_expr(location)?;
                let name = self
                    .eval_expr(property)?
                    .as_symbol()
                    .map_err(|e| self.raise_err(e))?;
                self.prop_read(&locv, &name)
            }
            Expr::Assign { left, right } => {
                let value = self.eval_expr(right)?;
                self.assign(left, value.clone())?;
                Ok(value)
            }
            Expr::Scatter(items, rhs) => {
                let value = self.eval_expr(rhs)?;
                scatter_assign(self, items, &value)?;
                Ok(value)
            }
            Expr::Catch {
                trye,
                codes,
                except,
            } => match self.eval_expr(trye) {
                Err(Exception::Error(raised)) => {
                    if self.codes_match(codes, &raised.error)? {
                        match except {
                            Some(except) => self.eval_expr(except),
                            None => Ok(v_int(0)),
                        }
                    } else {
                        Err(Exception::Error(raised))
                    }
                }
                other => other,
            },
            Expr::Call { function, args } => {
                let args = self.eval_args(args)?;
                self.call_builtin(function.clone(), args)
            }
            Expr::Verb {
                location,
                verb,
                args,
            } => {
                let receiver = self.eval_expr(location)?;
                let name = self
                    .eval_expr(verb)?
                    .as_symbol()
                    .map_err(|e| self.raise_err(e))?;
                let args = self.eval_args(args)?;
                let player = self.state.player();
                self.call_verb(receiver, name, args, None, player, true, false)
            }
            Expr::Pass { args } => {
                let mut args = self.eval_args(args)?;
                let top = self.state.top();
                if args.is_empty() {
                    args = top.args.clone();
                }
                let this = top.this.clone();
                let verb_name = top.verb_name.clone();
                let definer = top.verb_loc;
                let player = top.player;

                let resolved =
                    self.with_world(|ws| ws.resolve_verb_above(definer, &verb_name));
                let (parent_definer, _, verbdef) =
                    resolved.map_err(|e| self.raise_err(world_state_err(e)))?;
                let Some(program) = &verbdef.program else {
                    return Err(self.raise_err(
                        E_VERBNF.msg(format!("{verb_name} has not been programmed")),
                    ));
                };
                self.check_depth()?;
                let caller = this.clone();
                let mut activation = Activation::for_verb(
                    program,
                    this,
                    player,
                    caller,
                    verb_name,
                    parent_definer,
                    verbdef.owner,
                    verbdef.flags.contains(VerbFlag::Debug),
                    args,
                    None,
                );
                activation.server_initiated = false;
                let debug = activation.debug;
                self.state.stack.push(activation);
                let result = self.run_top_frame();
                self.state.stack.pop();
                match result {
                    Err(Exception::Error(raised)) if !debug => Ok(v_err(raised.error)),
                    other => other,
                }
            }
        }
    }

    fn eval_in_index_context(
        &mut self,
        base: &Var,
        index: &Expr,
    ) -> Result<Var, Exception> {
        let len = match base.variant() {
            Variant::Str(s) => Some(s.len() as i64),
            Variant::List(l) => Some(l.len() as i64),
            _ => None,
        };
        self.index_lengths.push(len);
        let result = self.eval_expr(index);
        self.index_lengths.pop();
        result
    }

    pub fn eval_args(&mut self, args: &[Arg]) -> Result<Vec<Var>, Exception> {
        let mut out = vec![];
        for arg in args {
            match arg {
                Arg::Normal(expr) => out.push(self.eval_expr(expr)?),
                Arg::Splice(expr) => {
                    let v = self.eval_expr(expr)?;
                    let Variant::List(l) = v.variant() else {
                        return Err(self.raise_code(E_TYPE));
                    };
                    out.extend(l.iter().cloned());
                }
            }
        }
        Ok(out)
    }

    fn call_builtin(&mut self, function: Symbol, args: Vec<Var>) -> Result<Var, Exception> {
        let Some(f) = self.builtins.clone().lookup(&function) else {
            return Err(self
                .raise_err(E_VERBNF.msg(format!("Unknown built-in function: {function}"))));
        };
        if server_options().protected.contains(&function) && !self.task_wizardly() {
            return Err(self.raise_code(E_PERM));
        }
        let mut bf_args = BfCallState {
            name: function,
            args,
            exec: self,
        };
        let result = f(&mut bf_args);
        drop(bf_args);
        match result {
            Ok(BfRet::Ret(v)) => Ok(v),
            Err(BfErr::Code(c)) => Err(self.raise_code(c)),
            Err(BfErr::ErrValue(e)) => Err(self.raise_err(e)),
            Err(BfErr::Raise(exception)) => Err(exception),
        }
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Store `value` into an l-value expression. Collections are
    /// copy-on-write: the freshly-built container is written back up the
    /// chain until a variable or an object property anchors it.
    pub fn assign(&mut self, target: &Expr, value: Var) -> Result<(), Exception> {
        match target {
            Expr::Id(name) => {
                self.state.top_mut().set_variable(name, value);
                Ok(())
            }
            Expr::Prop { location, property } => {
                let locv = self.eval_expr(location)?;
                let name = self
                    .eval_expr(property)?
                    .as_symbol()
                    .map_err(|e| self.raise_err(e))?;
                if let Variant::Waif(w) = locv.variant() {
                    // A new waif replaces the old one in whatever held it.
                    let new_waif = v_waif(w.with_slot(name, value));
                    return self.assign(location, new_waif);
                }
                self.prop_write(&locv, &name, value)
            }
            Expr::Index(base, index) => {
                let basev = self.eval_expr(base)?;
                let idxv = self.eval_in_index_context(&basev, index)?;
                let updated = basev
                    .index_set(&idxv, &value)
                    .map_err(|e| self.raise_err(e))?;
                self.assign(base, updated)
            }
            Expr::Range { base, from, to } => {
                let basev = self.eval_expr(base)?;
                let fromv = self.eval_in_index_context(&basev, from)?;
                let tov = self.eval_in_index_context(&basev, to)?;
                let updated = basev
                    .range_set(&fromv, &tov, &value)
                    .map_err(|e| self.raise_err(e))?;
                self.assign(base, updated)
            }
            _ => Err(self.raise_code(E_TYPE)),
        }
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    pub fn prop_read(&mut self, locv: &Var, name: &Symbol) -> Result<Var, Exception> {
        // Waifs: instance slot, falling back to the class property.
        if let Variant::Waif(w) = locv.variant() {
            if name.as_str().eq_ignore_ascii_case("class") {
                return Ok(v_obj(w.class()));
            }
            if let Some(v) = w.slot(name) {
                return Ok(v);
            }
            return self.prop_read(&v_obj(w.class()), name);
        }

        let Some(oref) = ObjectRef::from_var(locv) else {
            return Err(self.raise_code(E_INVIND));
        };

        if let Some(v) = self.builtin_prop_read(oref, name)? {
            return Ok(v);
        }

        let perms = self.state.task_perms();
        let wizardly = self.task_wizardly();
        let result = self.with_world(|ws| {
            let record = ws.property_record(oref, name)?;
            let readable =
                record.flags.contains(PropFlag::Read) || record.owner == perms;
            Ok::<_, WorldStateError>((readable, ws.resolve_property(oref, name)?))
        });
        let (readable, value) = result.map_err(|e| self.raise_err(world_state_err(e)))?;
        if !readable && !wizardly {
            return Err(self.raise_code(E_PERM));
        }
        Ok(value)
    }

    fn builtin_prop_read(
        &self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<Option<Var>, Exception> {
        let n = name.as_str().to_ascii_lowercase();
        let result = self.with_world(|ws| {
            let obj = ws.get(oref)?;
            let v = match n.as_str() {
                "name" => Some(v_str(&obj.name)),
                "owner" => Some(v_obj(obj.owner)),
                "location" => Some(v_obj(obj.location)),
                "contents" => Some(v_list_iter(obj.contents.iter().map(|o| v_obj(*o)))),
                "programmer" => Some(v_bool_int(obj.is_programmer())),
                "wizard" => Some(v_bool_int(obj.is_wizard())),
                "player" => Some(v_bool_int(obj.is_user())),
                "r" => Some(v_bool_int(obj.flags.contains(ObjFlag::Read))),
                "w" => Some(v_bool_int(obj.flags.contains(ObjFlag::Write))),
                "f" => Some(v_bool_int(obj.flags.contains(ObjFlag::Fertile))),
                _ => None,
            };
            Ok::<_, WorldStateError>(v)
        });
        result.map_err(|e| self.raise_err(world_state_err(e)))
    }

    pub fn prop_write(
        &mut self,
        locv: &Var,
        name: &Symbol,
        value: Var,
    ) -> Result<(), Exception> {
        let Some(oref) = ObjectRef::from_var(locv) else {
            return Err(self.raise_code(E_INVIND));
        };
        if !self.with_world(|ws| ws.valid(oref)) {
            return Err(self.raise_code(E_INVIND));
        }

        let n = name.as_str().to_ascii_lowercase();
        match n.as_str() {
            "name" | "r" | "w" | "f" => {
                let owner = self
                    .with_world(|ws| ws.get(oref).map(|o| o.owner))
                    .map_err(|e| self.raise_err(world_state_err(e)))?;
                if !self.controls(owner) {
                    return Err(self.raise_code(E_PERM));
                }
                return self
                    .with_world_mut(|ws| {
                        let obj = ws.get_mut(oref)?;
                        match n.as_str() {
                            "name" => {
                                let Variant::Str(s) = value.variant() else {
                                    return Err(WorldStateError::InvalidArgument(
                                        "name must be a string".into(),
                                    ));
                                };
                                obj.name = s.as_str().to_string();
                            }
                            "r" => set_flag(obj, ObjFlag::Read, value.is_true()),
                            "w" => set_flag(obj, ObjFlag::Write, value.is_true()),
                            "f" => set_flag(obj, ObjFlag::Fertile, value.is_true()),
                            _ => unreachable!(),
                        }
                        Ok(())
                    })
                    .map_err(|e| self.raise_err(world_state_err(e)));
            }
            "owner" | "programmer" | "wizard" => {
                if !self.task_wizardly() {
                    return Err(self.raise_code(E_PERM));
                }
                return self
                    .with_world_mut(|ws| {
                        let obj = ws.get_mut(oref)?;
                        match n.as_str() {
                            "owner" => {
                                let Variant::Obj(o) = value.variant() else {
                                    return Err(WorldStateError::InvalidArgument(
                                        "owner must be an object".into(),
                                    ));
                                };
                                obj.owner = *o;
                            }
                            "programmer" => {
                                set_flag(obj, ObjFlag::Programmer, value.is_true())
                            }
                            "wizard" => set_flag(obj, ObjFlag::Wizard, value.is_true()),
                            _ => unreachable!(),
                        }
                        Ok(())
                    })
                    .map_err(|e| self.raise_err(world_state_err(e)));
            }
            // Containment is maintained solely by move().
            "location" | "contents" | "player" => {
                return Err(self.raise_code(E_PERM));
            }
            _ => {}
        }

        let perms = self.state.task_perms();
        let wizardly = self.task_wizardly();
        let record = self.with_world(|ws| {
            ws.property_record(oref, name)
                .map(|r| (r.owner, r.flags))
        });
        let (owner, flags) = record.map_err(|e| self.raise_err(world_state_err(e)))?;
        if !flags.contains(PropFlag::Write) && owner != perms && !wizardly {
            return Err(self.raise_code(E_PERM));
        }
        self.with_world_mut(|ws| ws.set_property_value(oref, name, value))
            .map_err(|e| self.raise_err(world_state_err(e)))
    }
}

fn set_flag(obj: &mut corral_db::Object, flag: ObjFlag, on: bool) {
    if on {
        obj.flags.set(flag);
    } else {
        obj.flags.clear(flag);
    }
}

fn loop_matches(exit: &Option<Name>, label: &Option<Name>) -> bool {
    match exit {
        None => true,
        Some(exit) => label.map(|l| l == *exit).unwrap_or(false),
    }
}

// ----------------------------------------------------------------------
// Operators
// ----------------------------------------------------------------------

fn float_checked(f: f64) -> Result<Var, Error> {
    if f.is_finite() {
        Ok(v_float(f))
    } else {
        Err(E_FLOAT.msg("floating-point overflow"))
    }
}

pub fn eval_unary_op(op: UnaryOp, v: &Var) -> Result<Var, Error> {
    match op {
        UnaryOp::Not => Ok(v_bool_int(!v.is_true())),
        UnaryOp::Neg => match v.variant() {
            Variant::Int(i) => Ok(v_int(i.wrapping_neg())),
            Variant::Float(f) => Ok(v_float(-f)),
            _ => Err(E_TYPE.into()),
        },
        UnaryOp::BitNot => match v.variant() {
            Variant::Int(i) => Ok(v_int(!i)),
            _ => Err(E_TYPE.into()),
        },
    }
}

/// Floored modulo, result carrying the sign of the divisor.
fn floored_mod_i64(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
}

fn floored_mod_f64(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
}

fn int_pow(base: i64, exp: i64) -> Result<i64, Error> {
    if exp < 0 {
        return match base {
            0 => Err(E_DIV.msg("zero to negative power")),
            1 => Ok(1),
            -1 => Ok(if exp % 2 == 0 { 1 } else { -1 }),
            _ => Ok(0),
        };
    }
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    Ok(result)
}

pub fn eval_binary_op(op: BinaryOp, lhs: &Var, rhs: &Var) -> Result<Var, Error> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(v_bool_int(lhs == rhs)),
        NEq => return Ok(v_bool_int(lhs != rhs)),
        In => return lhs.index_in(rhs),
        Lt | LtE | Gt | GtE => {
            let ord = match (lhs.variant(), rhs.variant()) {
                (Variant::Int(a), Variant::Int(b)) => a.cmp(b),
                (Variant::Float(a), Variant::Float(b)) => a.total_cmp(b),
                (Variant::Str(a), Variant::Str(b)) => a.cmp(b),
                (Variant::Obj(a), Variant::Obj(b)) => a.cmp(b),
                (Variant::Err(a), Variant::Err(b)) => a.code.cmp(&b.code),
                _ => return Err(E_TYPE.into()),
            };
            return Ok(v_bool_int(match op {
                Lt => ord.is_lt(),
                LtE => ord.is_le(),
                Gt => ord.is_gt(),
                GtE => ord.is_ge(),
                _ => unreachable!(),
            }));
        }
        BitAnd | BitOr | BitXor | Shl | Shr => {
            let (Variant::Int(a), Variant::Int(b)) = (lhs.variant(), rhs.variant()) else {
                return Err(E_TYPE.into());
            };
            return match op {
                BitAnd => Ok(v_int(a & b)),
                BitOr => Ok(v_int(a | b)),
                BitXor => Ok(v_int(a ^ b)),
                Shl | Shr => {
                    if *b < 0 || *b > 64 {
                        return Err(E_INVARG.msg("shift count out of range"));
                    }
                    if *b == 64 {
                        return Ok(v_int(0));
                    }
                    if matches!(op, Shl) {
                        Ok(v_int(((*a as u64) << *b) as i64))
                    } else {
                        // Logical right shift.
                        Ok(v_int(((*a as u64) >> *b) as i64))
                    }
                }
                _ => unreachable!(),
            };
        }
        _ => {}
    }

    match (lhs.variant(), rhs.variant()) {
        (Variant::Int(a), Variant::Int(b)) => match op {
            Add => Ok(v_int(a.wrapping_add(*b))),
            Sub => Ok(v_int(a.wrapping_sub(*b))),
            Mul => Ok(v_int(a.wrapping_mul(*b))),
            Div => {
                if *b == 0 {
                    Err(E_DIV.into())
                } else if *a == i64::MIN && *b == -1 {
                    // Documented saturation; the sole overflow case.
                    Ok(v_int(i64::MIN))
                } else {
                    Ok(v_int(a / b))
                }
            }
            Mod => {
                if *b == 0 {
                    Err(E_DIV.into())
                } else {
                    Ok(v_int(floored_mod_i64(*a, *b)))
                }
            }
            Exp => int_pow(*a, *b).map(v_int),
            _ => unreachable!(),
        },
        (Variant::Float(a), Variant::Float(b)) => match op {
            Add => float_checked(a + b),
            Sub => float_checked(a - b),
            Mul => float_checked(a * b),
            Div => {
                if *b == 0.0 {
                    Err(E_DIV.into())
                } else {
                    float_checked(a / b)
                }
            }
            Mod => {
                if *b == 0.0 {
                    Err(E_DIV.into())
                } else {
                    float_checked(floored_mod_f64(*a, *b))
                }
            }
            Exp => float_checked(a.powf(*b)),
            _ => unreachable!(),
        },
        (Variant::Str(a), Variant::Str(b)) => match op {
            Add => {
                let joined = a.append(b);
                let limit = server_options().max_string_concat;
                if !check_bytes_limit(&joined, limit) {
                    return Err(E_QUOTA.msg("string too long"));
                }
                Ok(joined)
            }
            _ => Err(E_TYPE.into()),
        },
        _ => Err(E_TYPE.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_var::v_str;

    #[test]
    fn test_integer_division_truncates() {
        let r = eval_binary_op(BinaryOp::Div, &v_int(-7), &v_int(2)).unwrap();
        assert_eq!(r, v_int(-3));
    }

    #[test]
    fn test_min_int_division_saturates() {
        let r = eval_binary_op(BinaryOp::Div, &v_int(i64::MIN), &v_int(-1)).unwrap();
        assert_eq!(r, v_int(i64::MIN));
    }

    #[test]
    fn test_floored_modulo_sign_of_divisor() {
        assert_eq!(
            eval_binary_op(BinaryOp::Mod, &v_int(-7), &v_int(3)).unwrap(),
            v_int(2)
        );
        assert_eq!(
            eval_binary_op(BinaryOp::Mod, &v_int(7), &v_int(-3)).unwrap(),
            v_int(-2)
        );
    }

    #[test]
    fn test_zero_to_negative_power() {
        assert_eq!(
            eval_binary_op(BinaryOp::Exp, &v_int(0), &v_int(-1)),
            Err(E_DIV.msg("zero to negative power"))
        );
    }

    #[test]
    fn test_mixed_numeric_is_type_error() {
        assert!(eval_binary_op(BinaryOp::Add, &v_int(1), &v_float(1.0)).is_err());
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            eval_binary_op(BinaryOp::Add, &v_str("foo"), &v_str("bar")).unwrap(),
            v_str("foobar")
        );
        assert!(eval_binary_op(BinaryOp::Add, &v_str("foo"), &v_int(1)).is_err());
    }

    #[test]
    fn test_shift_edge_cases() {
        assert_eq!(
            eval_binary_op(BinaryOp::Shl, &v_int(1), &v_int(64)).unwrap(),
            v_int(0)
        );
        assert_eq!(
            eval_binary_op(BinaryOp::Shr, &v_int(-1), &v_int(63)).unwrap(),
            v_int(1)
        );
        assert!(eval_binary_op(BinaryOp::Shl, &v_int(1), &v_int(65)).is_err());
    }

    #[test]
    fn test_bool_ordering_is_type_error() {
        use corral_var::v_bool;
        assert!(eval_binary_op(BinaryOp::Lt, &v_bool(true), &v_int(0)).is_err());
        // But equality works.
        assert_eq!(
            eval_binary_op(BinaryOp::Eq, &v_bool(true), &v_int(1)).unwrap(),
            v_int(1)
        );
    }

    #[test]
    fn test_float_overflow_is_e_float() {
        let r = eval_binary_op(BinaryOp::Mul, &v_float(f64::MAX), &v_float(2.0));
        assert!(matches!(r, Err(e) if e == corral_var::ErrorCode::E_FLOAT));
    }
}
