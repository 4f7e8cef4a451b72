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

use corral_compiler::{GLOBAL_NAMES, Name, Names, Program};
use corral_db::ObjectRef;
use corral_var::{
    NOTHING, Obj, Symbol, Var, VarType, v_empty_list, v_empty_str, v_int, v_list, v_obj, v_str,
};
use std::sync::Arc;

use crate::tasks::command_parse::ParsedCommand;
use corral_compiler::ast::Stmt;

/// One frame of the call stack: a verb (or eval, or server-hook) in flight.
#[derive(Clone)]
pub struct Activation {
    /// The receiver of the call. A `Var`, not an `Obj`: primitive-prototype
    /// dispatch and waif calls put the primitive value here.
    pub this: Var,
    pub player: Obj,
    /// Task permissions for this frame; starts as the verb owner, mutable
    /// via `set_task_perms()`.
    pub permissions: Obj,
    /// `this` of the calling frame; the player at top level.
    pub caller: Var,
    pub verb_name: Symbol,
    /// Where the running verb was found by the inheritance search. NOTHING
    /// for eval and server-initiated frames.
    pub verb_loc: ObjectRef,
    pub args: Vec<Var>,
    /// The line currently being executed, updated per-statement.
    pub line_number: usize,
    /// Frames pushed by the server itself (command dispatch, hooks) are
    /// shown in tracebacks but hidden from `callers()`.
    pub server_initiated: bool,
    /// Whether the verb runs with the `d` (debug) flag: errors raised here
    /// propagate; without it they become the verb's return value.
    pub debug: bool,
    /// Flat variable environment, indexed by compiler `Name` slots.
    pub env: Vec<Option<Var>>,
    pub stmts: Arc<Vec<Stmt>>,
    pub names: Names,
}

fn type_const(t: VarType) -> Var {
    v_int(t as i64)
}

impl Activation {
    #[allow(clippy::too_many_arguments)]
    pub fn for_verb(
        program: &Program,
        this: Var,
        player: Obj,
        caller: Var,
        verb_name: Symbol,
        verb_loc: ObjectRef,
        verb_owner: Obj,
        debug: bool,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
    ) -> Self {
        let mut activation = Activation {
            this: this.clone(),
            player,
            permissions: verb_owner,
            caller,
            verb_name: verb_name.clone(),
            verb_loc,
            args: args.clone(),
            line_number: 1,
            server_initiated: false,
            debug,
            env: vec![None; program.names().len()],
            stmts: program.stmts_arc(),
            names: program.names().clone(),
        };
        activation.bind_globals(&this, player, command);
        activation.set_by_name("verb", v_str(verb_name.as_str()));
        activation.set_by_name("args", v_list(&args));
        activation
    }

    pub fn for_eval(program: &Program, player: Obj, permissions: Obj) -> Self {
        let mut activation = Activation {
            this: v_obj(NOTHING),
            player,
            permissions,
            caller: v_obj(player),
            verb_name: Symbol::mk("eval"),
            verb_loc: ObjectRef::Obj(NOTHING),
            args: vec![],
            line_number: 1,
            server_initiated: false,
            debug: true,
            env: vec![None; program.names().len()],
            stmts: program.stmts_arc(),
            names: program.names().clone(),
        };
        activation.bind_globals(&v_obj(NOTHING), player, None);
        activation.set_by_name("verb", v_empty_str());
        activation.set_by_name("args", v_empty_list());
        activation
    }

    fn bind_globals(&mut self, this: &Var, player: Obj, command: Option<&ParsedCommand>) {
        debug_assert!(GLOBAL_NAMES.contains(&"this"));
        self.set_by_name("NUM", type_const(VarType::TYPE_INT));
        self.set_by_name("INT", type_const(VarType::TYPE_INT));
        self.set_by_name("FLOAT", type_const(VarType::TYPE_FLOAT));
        self.set_by_name("OBJ", type_const(VarType::TYPE_OBJ));
        self.set_by_name("STR", type_const(VarType::TYPE_STR));
        self.set_by_name("ERR", type_const(VarType::TYPE_ERR));
        self.set_by_name("LIST", type_const(VarType::TYPE_LIST));
        self.set_by_name("MAP", type_const(VarType::TYPE_MAP));
        self.set_by_name("BOOL", type_const(VarType::TYPE_BOOL));
        self.set_by_name("WAIF", type_const(VarType::TYPE_WAIF));
        self.set_by_name("ANON", type_const(VarType::TYPE_ANON));

        self.set_by_name("this", this.clone());
        self.set_by_name("player", v_obj(player));
        self.set_by_name("caller", self.caller.clone());

        match command {
            Some(command) => {
                self.set_by_name("argstr", v_str(&command.argstr));
                self.set_by_name("dobj", v_obj(command.dobj.unwrap_or(NOTHING)));
                self.set_by_name("dobjstr", v_str(&command.dobjstr));
                self.set_by_name("prepstr", v_str(&command.prepstr));
                self.set_by_name("iobj", v_obj(command.iobj.unwrap_or(NOTHING)));
                self.set_by_name("iobjstr", v_str(&command.iobjstr));
            }
            None => {
                self.set_by_name("argstr", v_empty_str());
                self.set_by_name("dobj", v_obj(NOTHING));
                self.set_by_name("dobjstr", v_empty_str());
                self.set_by_name("prepstr", v_empty_str());
                self.set_by_name("iobj", v_obj(NOTHING));
                self.set_by_name("iobjstr", v_empty_str());
            }
        }
    }

    fn set_by_name(&mut self, name: &str, value: Var) {
        if let Some(slot) = self.names.find(name) {
            self.set_variable(&slot, value);
        }
    }

    pub fn set_variable(&mut self, name: &Name, value: Var) {
        let slot = name.0 as usize;
        if slot >= self.env.len() {
            self.env.resize(slot + 1, None);
        }
        self.env[slot] = Some(value);
    }

    pub fn get_variable(&self, name: &Name) -> Option<Var> {
        self.env.get(name.0 as usize).cloned().flatten()
    }

    /// The definer as a Var, for `callers()` rows and tracebacks.
    pub fn verb_definer_var(&self) -> Var {
        self.verb_loc.to_var()
    }
}
