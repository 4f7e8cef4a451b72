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
use crate::tasks::prepositions::{parse_prep_spec, prep_spec_string};
use crate::vm::moo_execute::world_state_err;
use corral_compiler::compile;
use corral_db::{ArgSpec, ObjectRef, VerbArgsSpec, VerbDef, VerbFlag};
use corral_var::ErrorCode::{E_INVARG, E_PERM, E_TYPE};
use corral_var::{Symbol, Var, Variant, v_bool_int, v_int, v_list, v_list_iter, v_obj, v_str};
use std::collections::HashMap;

fn verb_target(bf_args: &BfCallState<'_>) -> Result<(ObjectRef, usize), BfErr> {
    let oref = bf_args.objref_arg(0)?;
    let selector = bf_args.arg(1)?.clone();
    let index = bf_args
        .exec
        .with_world(|ws| ws.verbdef_at(oref, &selector))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok((oref, index))
}

fn verb_flags_at(
    bf_args: &BfCallState<'_>,
    oref: ObjectRef,
    index: usize,
) -> Result<(corral_var::Obj, corral_db::BitEnum<VerbFlag>), BfErr> {
    bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref)
                .map(|o| (o.verbs[index].owner, o.verbs[index].flags))
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))
}

fn check_verb_readable(
    bf_args: &BfCallState<'_>,
    oref: ObjectRef,
    index: usize,
) -> Result<(), BfErr> {
    let (owner, flags) = verb_flags_at(bf_args, oref, index)?;
    if flags.contains(VerbFlag::Read)
        || owner == bf_args.task_perms_who()
        || bf_args.exec.task_wizardly()
    {
        Ok(())
    } else {
        Err(BfErr::Code(E_PERM))
    }
}

fn check_verb_writable(
    bf_args: &BfCallState<'_>,
    oref: ObjectRef,
    index: usize,
) -> Result<(), BfErr> {
    let (owner, flags) = verb_flags_at(bf_args, oref, index)?;
    if flags.contains(VerbFlag::Write)
        || owner == bf_args.task_perms_who()
        || bf_args.exec.task_wizardly()
    {
        Ok(())
    } else {
        Err(BfErr::Code(E_PERM))
    }
}

fn bf_verbs(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let names = bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref)
                .map(|o| o.verbs.iter().map(|v| v.names_string()).collect::<Vec<_>>())
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(names.iter().map(|n| v_str(n)))))
}

fn bf_verb_info(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_readable(bf_args, oref, index)?;
    let (owner, flags, names) = bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref).map(|o| {
                let v = &o.verbs[index];
                (v.owner, v.flags, v.names_string())
            })
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list(&[
        v_obj(owner),
        v_str(&VerbFlag::perms_string(flags)),
        v_str(&names),
    ])))
}

fn parse_verbinfo(
    info: &Var,
) -> Result<(corral_var::Obj, corral_db::BitEnum<VerbFlag>, Vec<Symbol>), BfErr> {
    let Variant::List(info) = info.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    if info.len() != 3 {
        return Err(BfErr::Code(E_INVARG));
    }
    let owner_v = info.index(1).map_err(BfErr::ErrValue)?;
    let Variant::Obj(owner) = owner_v.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let perms_v = info.index(2).map_err(BfErr::ErrValue)?;
    let Variant::Str(perms) = perms_v.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let Some(flags) = VerbFlag::parse_perms(perms.as_str()) else {
        return Err(BfErr::Code(E_INVARG));
    };
    let names_v = info.index(3).map_err(BfErr::ErrValue)?;
    let Variant::Str(names) = names_v.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let names: Vec<Symbol> = names
        .as_str()
        .split_whitespace()
        .map(Symbol::mk)
        .collect();
    if names.is_empty() {
        return Err(BfErr::Code(E_INVARG));
    }
    Ok((*owner, flags, names))
}

/// Rewriting a verb's identity (owner/perms/names) is a wizard operation.
fn bf_set_verb_info(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    bf_args.check_wizardly()?;
    let (oref, index) = verb_target(bf_args)?;
    let (owner, flags, names) = parse_verbinfo(bf_args.arg(2)?)?;
    bf_args.exec.with_world_mut(|ws| {
        let obj = ws.get_mut(oref)?;
        let v = &mut obj.verbs[index];
        v.owner = owner;
        v.flags = flags;
        v.names = names;
        Ok(())
    })
    .map_err(|e: corral_db::WorldStateError| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_verb_args(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_readable(bf_args, oref, index)?;
    let args = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.verbs[index].args))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list(&[
        v_str(args.dobj.to_str()),
        v_str(&prep_spec_string(args.prep)),
        v_str(args.iobj.to_str()),
    ])))
}

fn parse_verbargs(args: &Var) -> Result<VerbArgsSpec, BfErr> {
    let Variant::List(spec) = args.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    if spec.len() != 3 {
        return Err(BfErr::Code(E_INVARG));
    }
    let dobj_v = spec.index(1).map_err(BfErr::ErrValue)?;
    let prep_v = spec.index(2).map_err(BfErr::ErrValue)?;
    let iobj_v = spec.index(3).map_err(BfErr::ErrValue)?;
    let (Variant::Str(dobj), Variant::Str(prep), Variant::Str(iobj)) =
        (dobj_v.variant(), prep_v.variant(), iobj_v.variant())
    else {
        return Err(BfErr::Code(E_TYPE));
    };
    let Some(dobj) = ArgSpec::parse(dobj.as_str()) else {
        return Err(BfErr::Code(E_INVARG));
    };
    let Some(prep) = parse_prep_spec(prep.as_str()) else {
        return Err(BfErr::Code(E_INVARG));
    };
    let Some(iobj) = ArgSpec::parse(iobj.as_str()) else {
        return Err(BfErr::Code(E_INVARG));
    };
    Ok(VerbArgsSpec { dobj, prep, iobj })
}

fn bf_set_verb_args(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_writable(bf_args, oref, index)?;
    let spec = parse_verbargs(bf_args.arg(2)?)?;
    bf_args.exec.with_world_mut(|ws| {
        let obj = ws.get_mut(oref)?;
        obj.verbs[index].args = spec;
        Ok(())
    })
    .map_err(|e: corral_db::WorldStateError| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_verb_code(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=4)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_readable(bf_args, oref, index)?;
    let lines = bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref).map(|o| {
                o.verbs[index]
                    .program
                    .as_ref()
                    .map(|p| p.source_lines().to_vec())
                    .unwrap_or_default()
            })
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(lines.iter().map(|l| v_str(l)))))
}

/// Compile and install a verb body. Compile failures come back to the
/// caller as a list of human-readable strings; success returns the verb's
/// 1-based index.
fn bf_set_verb_code(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_writable(bf_args, oref, index)?;
    if !bf_args.exec.obj_is_wizard(bf_args.task_perms_who())
        && !bf_args.exec.with_world(|ws| {
            ws.get(ObjectRef::Obj(bf_args.exec.state.task_perms()))
                .map(|o| o.is_programmer())
                .unwrap_or(false)
        })
    {
        return Err(BfErr::Code(E_PERM));
    }

    let Variant::List(lines) = bf_args.arg(2)?.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let mut source = String::new();
    for line in lines.iter() {
        source.push_str(line.as_string().map_err(BfErr::ErrValue)?);
        source.push('\n');
    }

    match compile(&source) {
        Err(err) => Ok(BfRet::Ret(v_list(&[v_str(&err.to_string())]))),
        Ok(program) => {
            bf_args.exec.with_world_mut(|ws| {
                let obj = ws.get_mut(oref)?;
                obj.verbs[index].program = Some(program);
                Ok(())
            })
            .map_err(|e: corral_db::WorldStateError| BfErr::ErrValue(world_state_err(e)))?;
            Ok(BfRet::Ret(v_int(index as i64 + 1)))
        }
    }
}

fn bf_add_verb(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=3)?;
    let oref = bf_args.objref_arg(0)?;
    let (owner, flags, names) = parse_verbinfo(bf_args.arg(1)?)?;
    let spec = parse_verbargs(bf_args.arg(2)?)?;

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

    let index = bf_args
        .exec
        .with_world_mut(|ws| {
            ws.add_verb(
                oref,
                VerbDef {
                    names,
                    owner,
                    flags,
                    args: spec,
                    program: None,
                },
            )
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(index as i64)))
}

fn bf_delete_verb(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, index) = verb_target(bf_args)?;
    let obj_owner = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(obj_owner) {
        return Err(BfErr::Code(E_PERM));
    }
    bf_args
        .exec
        .with_world_mut(|ws| ws.delete_verb(oref, index))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

/// A human-readable pseudo-listing of the interpreted tree. Not a
/// decompile; there is no bytecode to show.
fn bf_disassemble(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let (oref, index) = verb_target(bf_args)?;
    check_verb_readable(bf_args, oref, index)?;
    let listing = bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref).map(|o| {
                o.verbs[index]
                    .program
                    .as_ref()
                    .map(|p| p.listing())
                    .unwrap_or_default()
            })
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(listing.iter().map(|l| v_str(l)))))
}

/// Whether the value's dispatch target (or its ancestry) carries the named
/// verb.
fn bf_respond_to(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let name = bf_args.sym_arg(1)?;
    let Some(oref) = ObjectRef::from_var(bf_args.arg(0)?) else {
        return Err(e_invarg("respond_to() needs an object"));
    };
    if !bf_args.exec.with_world(|ws| ws.valid(oref)) {
        return Ok(BfRet::Ret(v_bool_int(false)));
    }
    let found = bf_args
        .exec
        .with_world(|ws| ws.resolve_verb(oref, &name).is_ok());
    Ok(BfRet::Ret(v_bool_int(found)))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "verbs" => bf_verbs,
        "verb_info" => bf_verb_info,
        "set_verb_info" => bf_set_verb_info,
        "verb_args" => bf_verb_args,
        "set_verb_args" => bf_set_verb_args,
        "verb_code" => bf_verb_code,
        "set_verb_code" => bf_set_verb_code,
        "add_verb" => bf_add_verb,
        "delete_verb" => bf_delete_verb,
        "disassemble" => bf_disassemble,
        "respond_to" => bf_respond_to,
    );
}
