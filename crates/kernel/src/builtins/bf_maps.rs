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
use corral_var::ErrorCode::{E_QUOTA, E_RANGE, E_TYPE};
use corral_var::{Map, Symbol, Var, Variant, v_bool_int, v_list, v_list_iter, v_map_iter};
use std::collections::HashMap;

fn check_map_quota(v: &Var) -> Result<(), BfErr> {
    let limit = server_options().max_map_value_bytes;
    if !check_bytes_limit(v, limit) {
        return Err(BfErr::ErrValue(E_QUOTA.msg("map too large")));
    }
    Ok(())
}

fn map_arg<'a>(bf_args: &'a BfCallState<'_>, i: usize) -> Result<&'a Map, BfErr> {
    match bf_args.arg(i)?.variant() {
        Variant::Map(m) => Ok(m),
        _ => Err(BfErr::Code(E_TYPE)),
    }
}

/// Returns a copy of the map with the given key removed. A missing key is
/// E_RANGE, except that deleting the empty-list key is a no-op when absent.
fn bf_mapdelete(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let m = map_arg(bf_args, 0)?;
    let key = bf_args.arg(1)?;
    let (new, removed) = m.remove(key);
    if removed.is_none() {
        let is_empty_list = matches!(key.variant(), Variant::List(l) if l.is_empty());
        if !is_empty_list {
            return Err(BfErr::Code(E_RANGE));
        }
    }
    Ok(BfRet::Ret(new))
}

/// Keys in canonical order.
fn bf_mapkeys(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let m = map_arg(bf_args, 0)?;
    Ok(BfRet::Ret(v_list_iter(m.keys())))
}

/// Values, positionally aligned with `mapkeys()`.
fn bf_mapvalues(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let m = map_arg(bf_args, 0)?;
    Ok(BfRet::Ret(v_list_iter(m.values())))
}

fn bf_maphaskey(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let m = map_arg(bf_args, 0)?;
    Ok(BfRet::Ret(v_bool_int(m.contains_key(bf_args.arg(1)?))))
}

fn bf_mapmerge(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let a = map_arg(bf_args, 0)?;
    let b = map_arg(bf_args, 1)?;
    let mut merged: Vec<(Var, Var)> = a.iter().cloned().collect();
    merged.extend(b.iter().cloned());
    let new = v_map_iter(merged.iter());
    check_map_quota(&new)?;
    Ok(BfRet::Ret(new))
}

/// A submap of just the named keys; missing keys are skipped.
fn bf_mapslice(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let m = map_arg(bf_args, 0)?;
    let Variant::List(keys) = bf_args.arg(1)?.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let pairs: Vec<(Var, Var)> = keys
        .iter()
        .filter_map(|k| m.get(k).map(|v| (k.clone(), v)))
        .collect();
    Ok(BfRet::Ret(v_map_iter(pairs.iter())))
}

/// Map to list of {key, value} pairs, canonical order.
fn bf_mklist(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let m = map_arg(bf_args, 0)?;
    let pairs: Vec<Var> = m
        .iter()
        .map(|(k, v)| v_list(&[k.clone(), v.clone()]))
        .collect();
    Ok(BfRet::Ret(v_list_iter(pairs)))
}

/// List of {key, value} pairs to map; the inverse of `mklist`.
fn bf_mkmap(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let Variant::List(l) = bf_args.arg(0)?.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let mut pairs = Vec::with_capacity(l.len());
    for entry in l.iter() {
        let Variant::List(pair) = entry.variant() else {
            return Err(BfErr::Code(E_TYPE));
        };
        if pair.len() != 2 {
            return Err(BfErr::Code(E_TYPE));
        }
        pairs.push((
            pair.index(1).map_err(BfErr::ErrValue)?,
            pair.index(2).map_err(BfErr::ErrValue)?,
        ));
    }
    let new = v_map_iter(pairs.iter());
    check_map_quota(&new)?;
    Ok(BfRet::Ret(new))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "mapdelete" => bf_mapdelete,
        "mapkeys" => bf_mapkeys,
        "mapvalues" => bf_mapvalues,
        "maphaskey" => bf_maphaskey,
        "mapmerge" => bf_mapmerge,
        "mapslice" => bf_mapslice,
        "mklist" => bf_mklist,
        "mkmap" => bf_mkmap,
    );
}
