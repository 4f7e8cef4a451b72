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

use crate::builtins::{BfCallState, BfErr, BfRet, BuiltinFunction};
use crate::config::{check_bytes_limit, server_options};
use corral_var::ErrorCode::{E_QUOTA, E_TYPE};
use corral_var::{List, Symbol, Var, Variant, v_list_iter};
use std::collections::HashMap;

/// Growth operations check the list byte limit after the fact.
fn check_list_quota(v: &Var) -> Result<(), BfErr> {
    let limit = server_options().max_list_value_bytes;
    if !check_bytes_limit(v, limit) {
        return Err(BfErr::ErrValue(E_QUOTA.msg("list too large")));
    }
    Ok(())
}

fn list_arg<'a>(bf_args: &'a BfCallState<'_>, i: usize) -> Result<&'a List, BfErr> {
    match bf_args.arg(i)?.variant() {
        Variant::List(l) => Ok(l),
        _ => Err(BfErr::Code(E_TYPE)),
    }
}

fn bf_listappend(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let l = list_arg(bf_args, 0)?;
    let value = bf_args.arg(1)?;
    let new = match bf_args.args.get(2) {
        // listappend(l, v, i) inserts after index i.
        Some(_) => {
            let i = bf_args.int_arg(2)?;
            l.insert(i + 1, value)
        }
        None => l.push(value),
    };
    check_list_quota(&new)?;
    Ok(BfRet::Ret(new))
}

fn bf_listinsert(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let l = list_arg(bf_args, 0)?;
    let value = bf_args.arg(1)?;
    let new = match bf_args.args.get(2) {
        Some(_) => {
            let i = bf_args.int_arg(2)?;
            l.insert(i, value)
        }
        None => l.insert(1, value),
    };
    check_list_quota(&new)?;
    Ok(BfRet::Ret(new))
}

fn bf_listdelete(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let l = list_arg(bf_args, 0)?;
    let i = bf_args.int_arg(1)?;
    let new = l.remove_at(i).map_err(BfErr::ErrValue)?;
    Ok(BfRet::Ret(new))
}

fn bf_listset(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    let l = list_arg(bf_args, 0)?;
    let value = bf_args.arg(1)?;
    let i = bf_args.int_arg(2)?;
    let new = l.index_set(i, value).map_err(BfErr::ErrValue)?;
    check_list_quota(&new)?;
    Ok(BfRet::Ret(new))
}

fn bf_setadd(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let l = list_arg(bf_args, 0)?;
    let new = l.set_add(bf_args.arg(1)?);
    check_list_quota(&new)?;
    Ok(BfRet::Ret(new))
}

fn bf_setremove(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let l = list_arg(bf_args, 0)?;
    Ok(BfRet::Ret(l.set_remove(bf_args.arg(1)?)))
}

fn bf_reverse(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let l = list_arg(bf_args, 0)?;
    let reversed: Vec<Var> = l.iter().rev().cloned().collect();
    Ok(BfRet::Ret(v_list_iter(reversed)))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "listappend" => bf_listappend,
        "listinsert" => bf_listinsert,
        "listdelete" => bf_listdelete,
        "listset" => bf_listset,
        "setadd" => bf_setadd,
        "setremove" => bf_setremove,
        "reverse" => bf_reverse,
    );
}
