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
use crate::config::value_bytes;
use crate::vm::moo_execute::world_state_err;
use corral_db::{ObjFlag, ObjectRef};
use corral_var::ErrorCode::{E_INVARG, E_NACC, E_PERM, E_RECMOVE, E_TYPE};
use corral_var::{
    NOTHING, Obj, Symbol, Var, Variant, Waif, v_bool_int, v_int, v_list_iter, v_obj, v_waif,
};
use std::collections::HashMap;

fn parents_from_arg(bf_args: &BfCallState<'_>, i: usize) -> Result<Vec<Obj>, BfErr> {
    match bf_args.arg(i)?.variant() {
        Variant::Obj(o) if o.is_nothing() => Ok(vec![]),
        Variant::Obj(o) => Ok(vec![*o]),
        Variant::List(l) => {
            let mut parents = vec![];
            for v in l.iter() {
                let Variant::Obj(o) = v.variant() else {
                    return Err(BfErr::Code(E_TYPE));
                };
                parents.push(*o);
            }
            Ok(parents)
        }
        _ => Err(BfErr::Code(E_TYPE)),
    }
}

/// Parents must exist and be fertile (or controlled by, or the caller a
/// wizard).
fn check_parents_usable(bf_args: &BfCallState<'_>, parents: &[Obj]) -> Result<(), BfErr> {
    let wizardly = bf_args.exec.task_wizardly();
    let perms = bf_args.task_perms_who();
    for parent in parents {
        let usable = bf_args.exec.with_world(|ws| {
            let obj = ws.get((*parent).into()).ok()?;
            Some(obj.flags.contains(ObjFlag::Fertile) || obj.owner == perms)
        });
        match usable {
            None => return Err(BfErr::Code(E_INVARG)),
            Some(false) if !wizardly => return Err(BfErr::Code(E_PERM)),
            _ => {}
        }
    }
    Ok(())
}

fn bf_create(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=3)?;
    let parents = parents_from_arg(bf_args, 0)?;
    check_parents_usable(bf_args, &parents)?;

    let perms = bf_args.task_perms_who();
    let owner = match bf_args.args.get(1) {
        Some(_) => {
            let owner = bf_args.obj_arg(1)?;
            if owner != perms && !bf_args.exec.task_wizardly() {
                return Err(BfErr::Code(E_PERM));
            }
            owner
        }
        None => perms,
    };
    let anonymous = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);

    let created = bf_args
        .exec
        .with_world_mut(|ws| ws.create_object(&parents, owner, anonymous))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;

    // An owner of $nothing means the object owns itself.
    if owner == NOTHING {
        bf_args.exec.with_world_mut(|ws| {
            if let (Ok(obj), Some(me)) = (ws.get_mut(created), created.as_obj()) {
                obj.owner = me;
            }
        });
    }

    let created_var = created.to_var();
    bf_args
        .exec
        .call_verb_if_exists(created_var.clone(), "initialize", vec![])
        .map_err(BfErr::Raise)?;
    Ok(BfRet::Ret(created_var))
}

fn bf_recycle(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let owner = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(owner) {
        return Err(BfErr::Code(E_PERM));
    }

    // The hook observes the pre-destruction state.
    bf_args
        .exec
        .call_verb_if_exists(oref.to_var(), "recycle", vec![])
        .map_err(BfErr::Raise)?;

    bf_args
        .exec
        .with_world_mut(|ws| ws.destroy_object(oref))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_valid(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let valid = match ObjectRef::from_var(bf_args.arg(0)?) {
        Some(oref) => bf_args.exec.with_world(|ws| ws.valid(oref)),
        None => return Err(BfErr::Code(E_TYPE)),
    };
    Ok(BfRet::Ret(v_bool_int(valid)))
}

fn bf_max_object(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_obj(
        bf_args.exec.with_world(|ws| ws.max_object()),
    )))
}

fn bf_reset_max_object(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    bf_args.check_wizardly()?;
    bf_args.exec.with_world_mut(|ws| ws.reset_max_object());
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_parent(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let parent = bf_args.exec.with_world(|ws| {
        ws.get(oref)
            .map(|o| o.parents.first().copied().unwrap_or(NOTHING))
    });
    Ok(BfRet::Ret(v_obj(
        parent.map_err(|e| BfErr::ErrValue(world_state_err(e)))?,
    )))
}

fn bf_parents(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let parents = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.parents.clone()))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(parents.into_iter().map(v_obj))))
}

fn bf_children(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let oref = bf_args.objref_arg(0)?;
    let children = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.children.clone()))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(
        children.into_iter().map(|c| c.to_var()),
    )))
}

fn bf_ancestors(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let obj = bf_args.obj_arg(0)?;
    let ancestors = bf_args
        .exec
        .with_world(|ws| ws.ancestors(obj))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(ancestors.into_iter().map(v_obj))))
}

fn bf_descendants(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let obj = bf_args.obj_arg(0)?;
    let descendants = bf_args
        .exec
        .with_world(|ws| ws.descendants(obj))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_list_iter(
        descendants.into_iter().map(|d| d.to_var()),
    )))
}

fn bf_isa(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let oref = bf_args.objref_arg(0)?;
    let ancestor = bf_args.obj_arg(1)?;
    let result = bf_args
        .exec
        .with_world(|ws| ws.isa(oref, ancestor))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_bool_int(result)))
}

fn bf_chparent(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let oref = bf_args.objref_arg(0)?;
    let parents = parents_from_arg(bf_args, 1)?;
    for p in &parents {
        if !bf_args.exec.with_world(|ws| ws.valid((*p).into())) {
            return Err(BfErr::Code(E_INVARG));
        }
    }
    check_parents_usable(bf_args, &parents)?;

    let owner = bf_args
        .exec
        .with_world(|ws| ws.get(oref).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(owner) {
        return Err(BfErr::Code(E_PERM));
    }

    bf_args
        .exec
        .with_world_mut(|ws| ws.chparent(oref, &parents))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

/// `move(what, where)`: accept check, cycle check, then the
/// exitfunc / relocate / enterfunc choreography.
fn bf_move(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let what = bf_args.obj_arg(0)?;
    let whereto = bf_args.obj_arg(1)?;

    if !bf_args.exec.with_world(|ws| ws.valid(what.into())) {
        return Err(BfErr::Code(E_INVARG));
    }
    if whereto != NOTHING && !bf_args.exec.with_world(|ws| ws.valid(whereto.into())) {
        return Err(BfErr::Code(E_INVARG));
    }
    let owner = bf_args
        .exec
        .with_world(|ws| ws.get(what.into()).map(|o| o.owner))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if !bf_args.exec.controls(owner) {
        return Err(BfErr::Code(E_PERM));
    }

    // Destination gets a veto, unless a wizard is doing the moving.
    if whereto != NOTHING && !bf_args.exec.task_wizardly() {
        let accepted = bf_args
            .exec
            .call_verb_if_exists(v_obj(whereto), "accept", vec![v_obj(what)])
            .map_err(BfErr::Raise)?;
        match accepted {
            Some(result) if !result.is_true() => return Err(BfErr::Code(E_NACC)),
            Some(_) => {}
            None => return Err(BfErr::Code(E_NACC)),
        }
    }

    bf_args
        .exec
        .with_world(|ws| ws.check_move(what, whereto))
        .map_err(|_| BfErr::Code(E_RECMOVE))?;

    let old_loc = bf_args
        .exec
        .with_world(|ws| ws.get(what.into()).map(|o| o.location))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if old_loc == whereto {
        return Ok(BfRet::Ret(v_int(0)));
    }

    if old_loc != NOTHING {
        bf_args
            .exec
            .call_verb_if_exists(v_obj(old_loc), "exitfunc", vec![v_obj(what)])
            .map_err(BfErr::Raise)?;
    }
    bf_args
        .exec
        .with_world_mut(|ws| ws.set_location_raw(what, whereto))
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    if whereto != NOTHING {
        bf_args
            .exec
            .call_verb_if_exists(v_obj(whereto), "enterfunc", vec![v_obj(what)])
            .map_err(BfErr::Raise)?;
    }
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_players(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let players = bf_args.exec.with_world(|ws| ws.players());
    Ok(BfRet::Ret(v_list_iter(players.into_iter().map(v_obj))))
}

fn bf_is_player(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let obj = bf_args.obj_arg(0)?;
    let is_player = bf_args
        .exec
        .with_world(|ws| ws.get(obj.into()).map(|o| o.is_user()))
        .map_err(|_| BfErr::Code(E_INVARG))?;
    Ok(BfRet::Ret(v_bool_int(is_player)))
}

fn bf_set_player_flag(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    bf_args.check_wizardly()?;
    let obj = bf_args.obj_arg(0)?;
    let on = bf_args.arg(1)?.is_true();
    bf_args
        .exec
        .with_world_mut(|ws| {
            let o = ws.get_mut(obj.into())?;
            if on {
                o.flags.set(ObjFlag::User);
            } else {
                o.flags.clear(ObjFlag::User);
            }
            Ok(())
        })
        .map_err(|e: corral_db::WorldStateError| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(0)))
}

fn bf_object_bytes(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    bf_args.check_wizardly()?;
    let oref = bf_args.objref_arg(0)?;
    let bytes = bf_args
        .exec
        .with_world(|ws| {
            ws.get(oref).map(|o| {
                let props: usize = o
                    .properties
                    .values()
                    .map(|p| p.value.as_ref().map(value_bytes).unwrap_or(0) + 32)
                    .sum();
                let verbs: usize = o
                    .verbs
                    .iter()
                    .map(|v| {
                        v.program
                            .as_ref()
                            .map(|p| p.source_lines().iter().map(|l| l.len()).sum())
                            .unwrap_or(0)
                            + 64
                    })
                    .sum();
                props + verbs + 128
            })
        })
        .map_err(|e| BfErr::ErrValue(world_state_err(e)))?;
    Ok(BfRet::Ret(v_int(bytes as i64)))
}

/// Construct a waif whose class is the object defining the calling verb.
fn bf_new_waif(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let Some(class) = bf_args.exec.state.top().verb_loc.as_obj() else {
        return Err(e_invarg("new_waif() must be called from a verb"));
    };
    if class == NOTHING {
        return Err(e_invarg("new_waif() must be called from a verb"));
    }
    Ok(BfRet::Ret(v_waif(Waif::mk(class, &[]))))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "create" => bf_create,
        "recycle" => bf_recycle,
        "valid" => bf_valid,
        "max_object" => bf_max_object,
        "reset_max_object" => bf_reset_max_object,
        "parent" => bf_parent,
        "parents" => bf_parents,
        "children" => bf_children,
        "ancestors" => bf_ancestors,
        "descendants" => bf_descendants,
        "isa" => bf_isa,
        "chparent" => bf_chparent,
        "chparents" => bf_chparent,
        "move" => bf_move,
        "players" => bf_players,
        "is_player" => bf_is_player,
        "set_player_flag" => bf_set_player_flag,
        "object_bytes" => bf_object_bytes,
        "new_waif" => bf_new_waif,
    );
}
