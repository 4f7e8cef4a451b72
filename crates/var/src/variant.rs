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

use crate::error::Error;
use crate::list::List;
use crate::map::Map;
use crate::obj::{Anon, Obj};
use crate::string::Str;
use crate::waif::Waif;
use crate::VarType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};

/// The union of all MOO runtime values.
#[derive(Clone, Serialize, Deserialize)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Str),
    Obj(Obj),
    Err(Error),
    List(List),
    Map(Map),
    Waif(Waif),
    Anon(Anon),
}

impl Variant {
    pub fn type_code(&self) -> VarType {
        match self {
            Variant::Bool(_) => VarType::TYPE_BOOL,
            Variant::Int(_) => VarType::TYPE_INT,
            Variant::Float(_) => VarType::TYPE_FLOAT,
            Variant::Str(_) => VarType::TYPE_STR,
            Variant::Obj(_) => VarType::TYPE_OBJ,
            Variant::Err(_) => VarType::TYPE_ERR,
            Variant::List(_) => VarType::TYPE_LIST,
            Variant::Map(_) => VarType::TYPE_MAP,
            Variant::Waif(_) => VarType::TYPE_WAIF,
            Variant::Anon(_) => VarType::TYPE_ANON,
        }
    }

    /// Rank in the canonical cross-type ordering used for map keys:
    /// int < float < obj < err < str < list, with bools ranked alongside
    /// ints as 0/1 so that equality and ordering agree.
    fn type_rank(&self) -> u8 {
        match self {
            Variant::Int(_) | Variant::Bool(_) => 1,
            Variant::Float(_) => 2,
            Variant::Obj(_) => 3,
            Variant::Err(_) => 4,
            Variant::Str(_) => 5,
            Variant::List(_) => 6,
            Variant::Map(_) => 7,
            Variant::Waif(_) => 8,
            Variant::Anon(_) => 9,
        }
    }

    fn as_rank_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            Variant::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        // Bools are equal to their 0/1 integers; handled by the rank-int
        // path below before the per-variant cases.
        if let (Some(a), Some(b)) = (self.as_rank_int(), other.as_rank_int()) {
            return a == b;
        }
        match (self, other) {
            (Variant::Float(a), Variant::Float(b)) => a == b,
            (Variant::Str(a), Variant::Str(b)) => a == b,
            (Variant::Obj(a), Variant::Obj(b)) => a == b,
            (Variant::Err(a), Variant::Err(b)) => a == b,
            (Variant::List(a), Variant::List(b)) => a == b,
            (Variant::Map(a), Variant::Map(b)) => a == b,
            (Variant::Waif(a), Variant::Waif(b)) => a == b,
            (Variant::Anon(a), Variant::Anon(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Variant {}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Variant::Float(a), Variant::Float(b)) => a.total_cmp(b),
            (Variant::Str(a), Variant::Str(b)) => a.cmp(b),
            (Variant::Obj(a), Variant::Obj(b)) => a.cmp(b),
            (Variant::Err(a), Variant::Err(b)) => a.code.cmp(&b.code),
            (Variant::List(a), Variant::List(b)) => a.cmp(b),
            (Variant::Map(a), Variant::Map(b)) => a.cmp(b),
            (Variant::Waif(a), Variant::Waif(b)) => a.cmp(b),
            (Variant::Anon(a), Variant::Anon(b)) => a.cmp(b),
            _ => {
                // Same rank, mixed int/bool.
                let a = self.as_rank_int().unwrap();
                let b = other.as_rank_int().unwrap();
                a.cmp(&b)
            }
        }
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Variant::Int(_) | Variant::Bool(_) => self.as_rank_int().unwrap().hash(state),
            Variant::Float(f) => f.to_bits().hash(state),
            Variant::Str(s) => s.hash(state),
            Variant::Obj(o) => o.hash(state),
            Variant::Err(e) => e.hash(state),
            Variant::List(l) => l.hash(state),
            Variant::Map(m) => m.hash(state),
            Variant::Waif(w) => w.hash(state),
            Variant::Anon(a) => a.hash(state),
        }
    }
}

impl Debug for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Bool(b) => write!(f, "{b}"),
            Variant::Int(i) => write!(f, "{i}"),
            Variant::Float(fl) => write!(f, "{fl:?}"),
            Variant::Str(s) => write!(f, "{:?}", s.as_str()),
            Variant::Obj(o) => write!(f, "{o}"),
            Variant::Err(e) => write!(f, "{e:?}"),
            Variant::List(l) => write!(f, "{l:?}"),
            Variant::Map(m) => write!(f, "{m:?}"),
            Variant::Waif(w) => write!(f, "{w:?}"),
            Variant::Anon(a) => write!(f, "{a:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::{v_bool, v_float, v_int, v_obj, v_str};
    use crate::Obj;

    #[test]
    fn test_bool_int_equality() {
        assert_eq!(v_bool(true), v_int(1));
        assert_eq!(v_bool(false), v_int(0));
        assert_ne!(v_bool(true), v_int(2));
    }

    #[test]
    fn test_no_numeric_promotion() {
        assert_ne!(v_int(1), v_float(1.0));
    }

    #[test]
    fn test_string_case_insensitive() {
        assert_eq!(v_str("Foo"), v_str("foo"));
    }

    #[test]
    fn test_canonical_order() {
        // int < float < obj < err < str
        let mut vals = vec![
            v_str("a"),
            v_obj(Obj::mk_id(1)),
            v_float(0.5),
            v_int(9),
        ];
        vals.sort();
        assert_eq!(vals[0], v_int(9));
        assert_eq!(vals[1], v_float(0.5));
        assert_eq!(vals[2], v_obj(Obj::mk_id(1)));
        assert_eq!(vals[3], v_str("a"));
    }
}
