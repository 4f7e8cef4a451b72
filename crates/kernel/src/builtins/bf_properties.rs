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
use crate::vm::moo_execute::world_state_err;
use corral_db::{ObjectRef, PropFlag, is_builtin_property};
use corral_var::ErrorCode::{E_INVARG, E_PERM, E_TYPE};
use corral_var::{Obj, Symbol, Var, Variant, v_bool_int, v_int, v_list, v_obj, v_str, v_sym};
use std::collections::HashMap;

fn prop_target(bf_args: &BfCallState<'_>) -> Result<(ObjectRef, Symbol), BfErr> {
    let oref = bf_args.objref_arg(0)?;
    let name = bf_args.sym_arg(1)?;
    Ok((oref, name))
}

/// Read access to the property *record* (for info/clear queries): the `r`
/// bit, ownership, or wizardliness.
fn check_record_readable(bf_args: &BfCallState<'_>, oref: ObjectRef, name: &Symbol) -> Result<(), BfErr> {
    let record = bf_args
        .exec
        .with_world(|ws| ws.property_record(oref, name).map(|r| (r.owner, r.flags)));
    let (owner, flags) = record.map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if flags.contains(PropFlag::Read)
        || owner == bf_args.task_perms_who()
        || bf_args.exec.task_wizardly()
    {
        Ok(())
    } else {
        Err(BfErr::Code(E_PERM))
    }
}

fn check_record_writable(bf_args: &BfCallState<'_>, oref: ObjectRef, name: &Symbol) -> Result<(), BfErr> {
    let record = bf_args
        .exec
        .with_world(|ws| ws.property_record(oref, name).map(|r| (r.owner, r.flags)));
    let (owner, flags) = record.map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if flags.contains(PropFlag::Write)
        || owner == bf_args.task_perms_who()
        || bf_args.exec.task_wizardly()
    {
        Ok(())
    } else {
        Err(BfErr::Code(E_PERM))
    }
}

/// Property names defined on the object itself, in definition order.
fn bf_properties(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let names = bf_args
        .exec
        .with_world(|ws| ws.defined_properties(oref))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list(
        &names.into_iter().map(v_sym).collect::<Vec<_>>(),
    )))
}

fn bf_property_info(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, name) = prop_target(bf_args)?;
    check_record_readable(bf_args, oref, &name)?;
    let (owner, flags) = bf_args
        .exec
        .with_world(|ws| ws.property_record(oref, &name).map(|r| (r.owner, r.flags)))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list(&[
        v_obj(owner),
        v_str(&PropFlag::perms_string(flags)),
    ])))
}

fn parse_propinfo(info: &Var) -> Result<(Obj, corral_db::BitEnum<PropFlag>), BfErr> {
    let Variant::List(info) = info.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    if info.len() != 2 {
        return Err(BfErr::Code(E_INVARG));
    }
    let owner_v = info.index(1).map_err(BfErr::ErrValue)?;
    let Variant::Obj(owner) = owner_v.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let perms = info.index(2).map_err(BfErr::ErrValue)?;
    let Variant::Str(perms) = perms.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let Some(flags) = PropFlag::parse_perms(perms.as_str()) else {
        return Err(BfErr::Code(E_INVARG));
    };
    Ok((*owner, flags))
}

fn bf_set_property_info(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    let (oref, name) = prop_target(bf_args)?;
    check_record_writable(bf_args, oref, &name)?;
    let (owner, flags) = parse_propinfo(bf_args.arg(2)?)?;
    if owner != bf_args.task_perms_who() && !bf_args.exec.task_wizardly() {
        return Err(BfErr::Code(E_PERM));
    }
    bf_args
        .exec
        .with_world_mut(|ws| ws.set_property_info(oref, &name, owner, flags))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_add_property(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(4..=4)?;
    let (oref, name) = prop_target(bf_args)?;
    if is_builtin_property(&name) {
        return Err(e_invarg(format!("{name} is a built-in property")));
    }
    let value = bf_args.arg(2)?.clone();
    let (owner, flags) = parse_propinfo(bf_args.arg(3)?)?;

    let obj_owner = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(obj_owner) {
        return Err(BfErr::Code(E_PERM));
    }
    if owner != bf_args.task_perms_who() && !bf_args.exec.task_wizardly() {
        return Err(BfErr::Code(E_PERM));
    }

    bf_args
        .exec
        .with_world_mut(|ws| ws.define_property(oref, name, owner, flags, value))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_delete_property(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, name) = prop_target(bf_args)?;
    let obj_owner = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(obj_owner) {
        return Err(BfErr::Code(E_PERM));
    }
    bf_args
        .exec
        .with_world_mut(|ws| ws.delete_property(oref, &name))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_clear_property(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, name) = prop_target(bf_args)?;
    check_record_writable(bf_args, oref, &name)?;
    bf_args
        .exec
        .with_world_mut(|ws| ws.clear_property(oref, &name))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_is_clear_property(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, name) = prop_target(bf_args)?;
    check_record_readable(bf_args, oref, &name)?;
    let clear = bf_args
        .exec
        .with_world(|ws| ws.is_clear_property(oref, &name))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_bool_int(clear)))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "properties" => bf_properties,
        "property_info" => bf_property_info,
        "set_property_info" => bf_set_property_info,
        "add_property" => bf_add_property,
        "delete_property" => bf_delete_property,
        "clear_property" => bf_clear_property,
        "is_clear_property" => bf_is_clear_property,
    );
}
