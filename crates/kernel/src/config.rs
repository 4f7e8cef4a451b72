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

//! The process-wide `$server_options` cache. `load_server_options()` reads
//! the properties off the options object and swaps the whole struct in one
//! shot; everything else just reads the current snapshot.

use arc_swap::ArcSwap;
use corral_db::{ObjectRef, WorldState};
use corral_var::ErrorCode::E_INVARG;
use corral_var::{Error, SYSTEM_OBJECT, Symbol, Var, Variant};
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Byte limits; 0 or negative means unlimited.
    pub max_string_concat: i64,
    pub max_list_value_bytes: i64,
    pub max_map_value_bytes: i64,
    pub max_queued_output: i64,
    /// Tick/second budgets for foreground (command/eval) and background
    /// (forked/suspended) tasks.
    pub fg_ticks: usize,
    pub fg_seconds: u64,
    pub bg_ticks: usize,
    pub bg_seconds: u64,
    /// When set, `E_QUOTA` raised by string concatenation limits can be
    /// caught by `eval()` like an ordinary error.
    pub max_concat_catchable: bool,
    /// Builtins restricted to wizards via `protect_<name>`.
    pub protected: HashSet<Symbol>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_string_concat: 0,
            max_list_value_bytes: 0,
            max_map_value_bytes: 0,
            max_queued_output: 65536,
            fg_ticks: 60_000,
            fg_seconds: 5,
            bg_ticks: 30_000,
            bg_seconds: 3,
            max_concat_catchable: false,
            protected: HashSet::new(),
        }
    }
}

lazy_static! {
    static ref SERVER_OPTIONS: ArcSwap<ServerOptions> =
        ArcSwap::from_pointee(ServerOptions::default());
}

pub fn server_options() -> Arc<ServerOptions> {
    SERVER_OPTIONS.load_full()
}

fn int_of(v: &Var, key: &str) -> Result<i64, Error> {
    match v.variant() {
        Variant::Int(i) => Ok(*i),
        Variant::Bool(b) => Ok(*b as i64),
        _ => Err(E_INVARG.msg(format!("$server_options.{key} must be an integer"))),
    }
}

/// Re-read `$server_options` (a property on #0 naming an options object)
/// into the cache. Unknown keys are ignored; type mismatches are E_INVARG.
pub fn load_server_options(world: &WorldState) -> Result<(), Error> {
    let mut options = ServerOptions::default();

    let Ok(options_ref) =
        world.resolve_property(ObjectRef::Obj(SYSTEM_OBJECT), &Symbol::mk("server_options"))
    else {
        // No options object at all; defaults stand.
        SERVER_OPTIONS.store(Arc::new(options));
        return Ok(());
    };
    let Variant::Obj(options_obj) = options_ref.variant() else {
        return Err(E_INVARG.msg("$server_options is not an object"));
    };
    let oref = ObjectRef::Obj(*options_obj);
    if !world.valid(oref) {
        return Err(E_INVARG.msg("$server_options is not a valid object"));
    }

    let names = world.defined_properties(oref).unwrap_or_default();
    for name in names {
        let value = match world.resolve_property(oref, &name) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let key = name.as_str().to_ascii_lowercase();
        match key.as_str() {
            "max_string_concat" => options.max_string_concat = int_of(&value, &key)?,
            "max_list_value_bytes" => options.max_list_value_bytes = int_of(&value, &key)?,
            "max_map_value_bytes" => options.max_map_value_bytes = int_of(&value, &key)?,
            "max_queued_output" => options.max_queued_output = int_of(&value, &key)?,
            "fg_ticks" => options.fg_ticks = int_of(&value, &key)?.max(1) as usize,
            "fg_seconds" => options.fg_seconds = int_of(&value, &key)?.max(1) as u64,
            "bg_ticks" => options.bg_ticks = int_of(&value, &key)?.max(1) as usize,
            "bg_seconds" => options.bg_seconds = int_of(&value, &key)?.max(1) as u64,
            "max_concat_catchable" => {
                options.max_concat_catchable = int_of(&value, &key)? != 0
            }
            _ if key.starts_with("protect_") => {
                if value.is_true() {
                    options.protected.insert(Symbol::mk(&key["protect_".len()..]));
                }
            }
            _ => {
                warn!("Ignoring unknown $server_options key {key}");
            }
        }
    }

    SERVER_OPTIONS.store(Arc::new(options));
    Ok(())
}

/// Recursive byte estimate of a value, the `value_bytes()` builtin and the
/// basis of all the quota limits.
pub fn value_bytes(v: &Var) -> usize {
    const OVERHEAD: usize = 16;
    match v.variant() {
        Variant::Bool(_) | Variant::Int(_) | Variant::Float(_) | Variant::Obj(_)
        | Variant::Anon(_) => OVERHEAD,
        Variant::Err(e) => {
            let mut n = OVERHEAD;
            if let Some(m) = &e.msg {
                n += m.len();
            }
            if let Some(val) = &e.value {
                n += value_bytes(val);
            }
            n
        }
        Variant::Str(s) => OVERHEAD + s.as_str().len(),
        Variant::List(l) => OVERHEAD + l.iter().map(value_bytes).sum::<usize>(),
        Variant::Map(m) => {
            OVERHEAD
                + m.iter()
                    .map(|(k, val)| value_bytes(k) + value_bytes(val))
                    .sum::<usize>()
        }
        Variant::Waif(w) => {
            OVERHEAD + w.slots().map(|(_, val)| value_bytes(val)).sum::<usize>()
        }
    }
}

/// Limit check applied *after* a growth operation; 0/negative limit means
/// unlimited.
pub fn check_bytes_limit(v: &Var, limit: i64) -> bool {
    limit <= 0 || value_bytes(v) as i64 <= limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_var::{v_int, v_list, v_str};

    #[test]
    fn test_value_bytes_grows() {
        assert!(value_bytes(&v_str("longer string")) > value_bytes(&v_str("s")));
        assert!(
            value_bytes(&v_list(&[v_int(1), v_int(2)])) > value_bytes(&v_list(&[v_int(1)]))
        );
    }

    #[test]
    fn test_limit_zero_is_unlimited() {
        assert!(check_bytes_limit(&v_str("anything at all"), 0));
        assert!(!check_bytes_limit(&v_str("anything at all"), 1));
    }
}
