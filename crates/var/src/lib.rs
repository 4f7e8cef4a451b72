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

mod error;
mod list;
mod map;
mod obj;
mod string;
mod symbol;
mod var;
mod variant;
mod waif;

pub use crate::error::{Error, ErrorCode};
pub use crate::list::List;
pub use crate::map::Map;
pub use crate::obj::{Anon, Obj};
pub use crate::string::Str;
pub use crate::symbol::Symbol;
pub use crate::var::{
    Var, v_anon, v_bool, v_bool_int, v_empty_list, v_empty_map, v_empty_str, v_err, v_errcode,
    v_float, v_int, v_list, v_list_iter, v_map, v_map_iter, v_obj, v_objid, v_str, v_string,
    v_sym, v_waif,
};
pub use crate::variant::Variant;
pub use crate::waif::Waif;

/// The sentinel "no object" object.
pub const NOTHING: Obj = Obj::mk_id(-1);
/// Returned by object matching when nothing matched.
pub const FAILED_MATCH: Obj = Obj::mk_id(-2);
/// Returned by object matching when more than one thing matched.
pub const AMBIGUOUS: Obj = Obj::mk_id(-3);
/// `#0`, the system object, on which `$name` references hang.
pub const SYSTEM_OBJECT: Obj = Obj::mk_id(0);

/// Integer type codes for MOO values, as surfaced by `typeof()`.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, strum::Display, strum::EnumIter,
)]
#[allow(non_camel_case_types)]
pub enum VarType {
    TYPE_INT = 0,
    TYPE_OBJ = 1,
    TYPE_STR = 2,
    TYPE_ERR = 3,
    TYPE_LIST = 4,
    TYPE_FLOAT = 9,
    TYPE_MAP = 10,
    TYPE_ANON = 12,
    TYPE_WAIF = 13,
    TYPE_BOOL = 14,
}

impl VarType {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(VarType::TYPE_INT),
            1 => Some(VarType::TYPE_OBJ),
            2 => Some(VarType::TYPE_STR),
            3 => Some(VarType::TYPE_ERR),
            4 => Some(VarType::TYPE_LIST),
            9 => Some(VarType::TYPE_FLOAT),
            10 => Some(VarType::TYPE_MAP),
            12 => Some(VarType::TYPE_ANON),
            13 => Some(VarType::TYPE_WAIF),
            14 => Some(VarType::TYPE_BOOL),
            _ => None,
        }
    }
}
