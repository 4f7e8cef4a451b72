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

//! `{a, ?b = default, @rest} = expr` binding.

use crate::vm::moo_execute::Interpreter;
use crate::vm::unwind::Exception;
use corral_compiler::ast::{ScatterItem, ScatterKind};
use corral_var::ErrorCode::{E_ARGS, E_TYPE};
use corral_var::{Var, Variant, v_list};

/// Distribute the elements of `value` (a list) across the scatter targets.
/// Required targets bind first; optionals bind left-to-right while spare
/// elements remain; the rest target soaks up the middle.
pub fn scatter_assign(
    exec: &mut Interpreter,
    items: &[ScatterItem],
    value: &Var,
) -> Result<(), Exception> {
    let Variant::List(list) = value.variant() else {
        return Err(exec.raise_err(E_TYPE.msg("scatter needs a list")));
    };
    let values: Vec<Var> = list.iter().cloned().collect();

    let required = items
        .iter()
        .filter(|i| i.kind == ScatterKind::Required)
        .count();
    let optional = items
        .iter()
        .filter(|i| i.kind == ScatterKind::Optional)
        .count();
    let has_rest = items.iter().any(|i| i.kind == ScatterKind::Rest);

    if values.len() < required || (!has_rest && values.len() > required + optional) {
        return Err(exec.raise_err(E_ARGS.msg("wrong number of values to scatter")));
    }

    // How many optionals actually receive a value.
    let spare = values.len() - required;
    let mut optionals_filled = spare.min(optional);
    let rest_len = if has_rest {
        spare - optionals_filled
    } else {
        0
    };

    let mut cursor = values.into_iter();
    for item in items {
        match item.kind {
            ScatterKind::Required => {
                let v = cursor.next().expect("arity checked above");
                exec.state.top_mut().set_variable(&item.id, v);
            }
            ScatterKind::Optional => {
                if optionals_filled > 0 {
                    optionals_filled -= 1;
                    let v = cursor.next().expect("arity checked above");
                    exec.state.top_mut().set_variable(&item.id, v);
                } else if let Some(default) = &item.expr {
                    let v = exec.eval_expr(default)?;
                    exec.state.top_mut().set_variable(&item.id, v);
                }
                // An optional with no value and no default leaves the
                // variable as it was.
            }
            ScatterKind::Rest => {
                let rest: Vec<Var> = cursor.by_ref().take(rest_len).collect();
                exec.state.top_mut().set_variable(&item.id, v_list(&rest));
            }
        }
    }
    Ok(())
}
