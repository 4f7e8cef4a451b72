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

/// Registration shorthand used by every bf_* module.
macro_rules! register_bf {
    ($m:expr, $($name:literal => $f:ident),+ $(,)?) => {
        $( $m.insert(corral_var::Symbol::mk($name), $f as $crate::builtins::BuiltinFunction); )+
    };
}

mod bf_list_sets;
mod bf_maps;
mod bf_num;
mod bf_objects;
mod bf_properties;
mod bf_server;
mod bf_strings;
mod bf_tasks;
mod bf_values;
mod bf_verbs;

pub use bf_values::to_literal;

use crate::vm::moo_execute::Interpreter;
use crate::vm::unwind::Exception;
use corral_db::ObjectRef;
use corral_var::ErrorCode::{E_ARGS, E_INVARG, E_PERM, E_TYPE};
use corral_var::{Error, ErrorCode, Obj, Symbol, Var, Variant};
use std::collections::HashMap;
use std::sync::Arc;

/// The arguments and execution context handed to a built-in function. The
/// interpreter reference gives builtins the world, the session, the
/// scheduler channels, and recursive verb calls (for hooks).
pub struct BfCallState<'a> {
    /// The name the function was invoked by.
    pub name: Symbol,
    /// Evaluated argument vector.
    pub args: Vec<Var>,
    pub exec: &'a mut Interpreter,
}

/// Return possibilities from a built-in function.
pub enum BfRet {
    /// Successful return; the expression's value.
    Ret(Var),
}

/// Failure possibilities from a built-in function.
#[derive(Debug)]
pub enum BfErr {
    /// Raise a bare error code.
    Code(ErrorCode),
    /// Raise an error with message/value payload.
    ErrValue(Error),
    /// Propagate an already-built exception (aborts, re-raises).
    Raise(Exception),
}

impl From<Error> for BfErr {
    fn from(e: Error) -> Self {
        BfErr::ErrValue(e)
    }
}

impl From<ErrorCode> for BfErr {
    fn from(c: ErrorCode) -> Self {
        BfErr::Code(c)
    }
}

pub type BuiltinFunction = fn(&mut BfCallState<'_>) -> Result<BfRet, BfErr>;

/// All builtins, name-keyed. Built once at server start and shared by every
/// task.
pub struct BuiltinRegistry {
    by_name: HashMap<Symbol, BuiltinFunction>,
}

impl BuiltinRegistry {
    pub fn new() -> Arc<Self> {
        let mut by_name = HashMap::new();
        bf_values::register(&mut by_name);
        bf_num::register(&mut by_name);
        bf_list_sets::register(&mut by_name);
        bf_maps::register(&mut by_name);
        bf_strings::register(&mut by_name);
        bf_objects::register(&mut by_name);
        bf_properties::register(&mut by_name);
        bf_verbs::register(&mut by_name);
        bf_server::register(&mut by_name);
        bf_tasks::register(&mut by_name);
        Arc::new(Self { by_name })
    }

    pub fn lookup(&self, name: &Symbol) -> Option<BuiltinFunction> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &Symbol> + '_ {
        self.by_name.keys()
    }
}

impl BfCallState<'_> {
    pub fn check_nargs(&self, expected: std::ops::RangeInclusive<usize>) -> Result<(), BfErr> {
        if expected.contains(&self.args.len()) {
            Ok(())
        } else {
            Err(BfErr::Code(E_ARGS))
        }
    }

    pub fn task_perms_who(&self) -> Obj {
        self.exec.state.task_perms()
    }

    pub fn caller_perms(&self) -> Obj {
        self.exec.state.caller_perms()
    }

    /// Gate for wizard-only builtins; honors the programmer-or-player
    /// disjunction.
    pub fn check_wizardly(&self) -> Result<(), BfErr> {
        if self.exec.task_wizardly() {
            Ok(())
        } else {
            Err(BfErr::Code(E_PERM))
        }
    }

    // Typed argument accessors; all E_TYPE on mismatch, E_ARGS if absent.

    pub fn arg(&self, i: usize) -> Result<&Var, BfErr> {
        self.args.get(i).ok_or(BfErr::Code(E_ARGS))
    }

    pub fn int_arg(&self, i: usize) -> Result<i64, BfErr> {
        match self.arg(i)?.variant() {
            Variant::Int(v) => Ok(*v),
            _ => Err(BfErr::Code(E_TYPE)),
        }
    }

    pub fn str_arg(&self, i: usize) -> Result<String, BfErr> {
        match self.arg(i)?.variant() {
            Variant::Str(s) => Ok(s.as_str().to_string()),
            _ => Err(BfErr::Code(E_TYPE)),
        }
    }

    pub fn obj_arg(&self, i: usize) -> Result<Obj, BfErr> {
        match self.arg(i)?.variant() {
            Variant::Obj(o) => Ok(*o),
            _ => Err(BfErr::Code(E_TYPE)),
        }
    }

    /// An argument naming an object or anonymous object, checked valid.
    pub fn objref_arg(&self, i: usize) -> Result<ObjectRef, BfErr> {
        let Some(oref) = ObjectRef::from_var(self.arg(i)?) else {
            return Err(BfErr::Code(E_TYPE));
        };
        if !self.exec.with_world(|ws| ws.valid(oref)) {
            return Err(BfErr::Code(corral_var::ErrorCode::E_INVARG));
        }
        Ok(oref)
    }

    pub fn sym_arg(&self, i: usize) -> Result<Symbol, BfErr> {
        self.arg(i)?.as_symbol().map_err(BfErr::ErrValue)
    }
}

/// Shorthand for `E_INVARG` with a message, the most common builtin
/// failure.
pub fn e_invarg<S: ToString>(msg: S) -> BfErr {
    BfErr::ErrValue(E_INVARG.msg(msg.to_string()))
}
