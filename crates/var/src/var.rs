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

use crate::error::ErrorCode::{E_RANGE, E_TYPE};
use crate::list::List;
use crate::map::Map;
use crate::obj::{Anon, Obj};
use crate::string::Str;
use crate::symbol::Symbol;
use crate::variant::Variant;
use crate::waif::Waif;
use crate::{Error, ErrorCode, VarType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;

/// A MOO value.
#[derive(Clone, Serialize, Deserialize)]
pub struct Var(Variant);

impl Debug for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.variant())
    }
}

impl Var {
    pub fn from_variant(variant: Variant) -> Self {
        Var(variant)
    }

    pub fn mk_integer(i: i64) -> Self {
        Var(Variant::Int(i))
    }

    pub fn mk_str(s: &str) -> Self {
        Var(Variant::Str(Str::mk_str(s)))
    }

    pub fn mk_string(s: String) -> Self {
        Var(Variant::Str(Str::mk_str(&s)))
    }

    pub fn mk_float(f: f64) -> Self {
        Var(Variant::Float(f))
    }

    pub fn mk_error(e: Error) -> Self {
        Var(Variant::Err(e))
    }

    pub fn mk_object(o: Obj) -> Self {
        Var(Variant::Obj(o))
    }

    pub fn mk_bool(b: bool) -> Self {
        Var(Variant::Bool(b))
    }

    pub fn mk_list(values: &[Var]) -> Self {
        Var(Variant::List(List::mk_list(values)))
    }

    pub fn from_list(l: List) -> Self {
        Var(Variant::List(l))
    }

    pub fn from_map(m: Map) -> Self {
        Var(Variant::Map(m))
    }

    pub fn mk_waif(w: Waif) -> Self {
        Var(Variant::Waif(w))
    }

    pub fn mk_anon(a: Anon) -> Self {
        Var(Variant::Anon(a))
    }

    pub fn variant(&self) -> &Variant {
        &self.0
    }

    pub fn type_code(&self) -> VarType {
        self.0.type_code()
    }

    pub fn is_true(&self) -> bool {
        match self.variant() {
            Variant::Bool(b) => *b,
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0,
            Variant::Str(s) => !s.is_empty(),
            Variant::Obj(o) => o.is_positive(),
            Variant::Err(_) => false,
            Variant::List(l) => !l.is_empty(),
            Variant::Map(m) => !m.is_empty(),
            Variant::Waif(_) => true,
            Variant::Anon(_) => true,
        }
    }

    /// If a string or error, the corresponding name symbol; E_TYPE otherwise.
    pub fn as_symbol(&self) -> Result<Symbol, Error> {
        match self.variant() {
            Variant::Str(s) => Ok(Symbol::mk(s.as_str())),
            Variant::Err(e) => Ok(Symbol::mk(e.code.name())),
            _ => Err(E_TYPE.msg("expected a string").into()),
        }
    }

    pub fn as_integer(&self) -> Result<i64, Error> {
        match self.variant() {
            Variant::Int(i) => Ok(*i),
            _ => Err(E_TYPE.msg("expected an integer").into()),
        }
    }

    pub fn as_object(&self) -> Result<Obj, Error> {
        match self.variant() {
            Variant::Obj(o) => Ok(*o),
            _ => Err(E_TYPE.msg("expected an object").into()),
        }
    }

    pub fn as_string(&self) -> Result<&str, Error> {
        match self.variant() {
            Variant::Str(s) => Ok(s.as_str()),
            _ => Err(E_TYPE.msg("expected a string").into()),
        }
    }

    pub fn as_list(&self) -> Result<&List, Error> {
        match self.variant() {
            Variant::List(l) => Ok(l),
            _ => Err(E_TYPE.msg("expected a list").into()),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.variant(), Variant::Str(_))
    }

    /// 1-indexed length of a string, list, or map.
    pub fn len(&self) -> Result<usize, Error> {
        match self.variant() {
            Variant::Str(s) => Ok(s.len()),
            Variant::List(l) => Ok(l.len()),
            Variant::Map(m) => Ok(m.len()),
            _ => Err(E_TYPE.msg("value has no length").into()),
        }
    }

    /// `c[i]`: integer index into a sequence, or key lookup in a map.
    pub fn index(&self, idx: &Var) -> Result<Var, Error> {
        match self.variant() {
            Variant::Str(s) => s.index(idx.as_integer()?),
            Variant::List(l) => l.index(idx.as_integer()?),
            Variant::Map(m) => m
                .get(idx)
                .ok_or_else(|| E_RANGE.msg("key not found").into()),
            _ => Err(E_TYPE.msg("value is not indexable").into()),
        }
    }

    /// `c[i] = v`: returns the updated collection.
    pub fn index_set(&self, idx: &Var, value: &Var) -> Result<Var, Error> {
        match self.variant() {
            Variant::Str(s) => s.index_set(idx.as_integer()?, value),
            Variant::List(l) => l.index_set(idx.as_integer()?, value),
            Variant::Map(m) => m.set(idx, value),
            _ => Err(E_TYPE.msg("value is not indexable").into()),
        }
    }

    /// `c[from..to]`. For maps the endpoints are keys and the result is the
    /// inclusive key-range submap.
    pub fn range(&self, from: &Var, to: &Var) -> Result<Var, Error> {
        match self.variant() {
            Variant::Str(s) => s.range(from.as_integer()?, to.as_integer()?),
            Variant::List(l) => l.range(from.as_integer()?, to.as_integer()?),
            Variant::Map(m) => {
                if from > to {
                    return Ok(v_empty_map());
                }
                let pairs: Vec<(Var, Var)> = m
                    .iter()
                    .filter(|(k, _)| k >= from && k <= to)
                    .cloned()
                    .collect();
                Ok(Map::build(pairs.iter()))
            }
            _ => Err(E_TYPE.msg("value is not a sequence").into()),
        }
    }

    /// `c[from..to] = v` for strings and lists.
    pub fn range_set(&self, from: &Var, to: &Var, with: &Var) -> Result<Var, Error> {
        match self.variant() {
            Variant::Str(s) => s.range_set(from.as_integer()?, to.as_integer()?, with),
            Variant::List(l) => l.range_set(from.as_integer()?, to.as_integer()?, with),
            _ => Err(E_TYPE.msg("value is not a sequence").into()),
        }
    }

    /// MOO's `in`: 1-based position in a list, substring test on strings,
    /// value-position in maps.
    pub fn index_in(&self, container: &Var) -> Result<Var, Error> {
        match container.variant() {
            Variant::List(l) => Ok(v_int(l.index_in(self))),
            Variant::Str(haystack) => {
                let Variant::Str(needle) = self.variant() else {
                    return Err(E_TYPE.msg("`in' on a string needs a string").into());
                };
                Ok(v_int(haystack.contains_str(needle) as i64))
            }
            Variant::Map(m) => Ok(v_int(m.index_in(self))),
            _ => Err(E_TYPE.msg("right operand of `in' is not a collection").into()),
        }
    }

    /// Case-sensitive deep equality, the `equal()` builtin. `==` is the
    /// (case-insensitive for strings) `PartialEq` impl.
    pub fn eq_case_sensitive(&self, other: &Var) -> bool {
        match (self.variant(), other.variant()) {
            (Variant::Str(a), Variant::Str(b)) => a.as_str() == b.as_str(),
            (Variant::List(a), Variant::List(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.eq_case_sensitive(y))
            }
            (Variant::Map(a), Variant::Map(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| {
                        x.0.eq_case_sensitive(&y.0) && x.1.eq_case_sensitive(&y.1)
                    })
            }
            _ => self == other,
        }
    }
}

pub fn v_int(i: i64) -> Var {
    Var::mk_integer(i)
}

/// Produces a truthy integer, not a boolean, to stay compatible with
/// LambdaMOO cores that expect builtins to return 0/1.
pub fn v_bool_int(b: bool) -> Var {
    if b { v_int(1) } else { v_int(0) }
}

pub fn v_bool(b: bool) -> Var {
    Var::mk_bool(b)
}

pub fn v_str(s: &str) -> Var {
    Var::mk_str(s)
}

pub fn v_string(s: String) -> Var {
    Var::mk_string(s)
}

pub fn v_list(values: &[Var]) -> Var {
    Var::mk_list(values)
}

pub fn v_list_iter<IT: IntoIterator<Item = Var>>(values: IT) -> Var {
    Var::from_list(List::from_vec(values.into_iter().collect()))
}

pub fn v_map(pairs: &[(Var, Var)]) -> Var {
    Map::build(pairs.iter())
}

pub fn v_map_iter<'a, I: Iterator<Item = &'a (Var, Var)>>(pairs: I) -> Var {
    Map::build(pairs)
}

pub fn v_float(f: f64) -> Var {
    Var::mk_float(f)
}

pub fn v_err(e: Error) -> Var {
    Var::mk_error(e)
}

pub fn v_errcode(c: ErrorCode) -> Var {
    Var::mk_error(Error::from(c))
}

pub fn v_objid(o: i64) -> Var {
    Var::mk_object(Obj::mk_id(o))
}

pub fn v_obj(o: Obj) -> Var {
    Var::mk_object(o)
}

pub fn v_sym(s: Symbol) -> Var {
    Var::mk_str(s.as_str())
}

pub fn v_waif(w: Waif) -> Var {
    Var::mk_waif(w)
}

pub fn v_anon(a: Anon) -> Var {
    Var::mk_anon(a)
}

pub fn v_empty_list() -> Var {
    v_list(&[])
}

pub fn v_empty_str() -> Var {
    v_str("")
}

pub fn v_empty_map() -> Var {
    v_map(&[])
}

impl From<i64> for Var {
    fn from(i: i64) -> Self {
        Var::mk_integer(i)
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        Var::mk_str(s)
    }
}

impl From<String> for Var {
    fn from(s: String) -> Self {
        Var::mk_string(s)
    }
}

impl From<Obj> for Var {
    fn from(o: Obj) -> Self {
        Var::mk_object(o)
    }
}

impl From<Error> for Var {
    fn from(e: Error) -> Self {
        Var::mk_error(e)
    }
}

impl PartialEq<Self> for Var {
    fn eq(&self, other: &Self) -> bool {
        self.variant() == other.variant()
    }
}

impl Eq for Var {}

impl Ord for Var {
    fn cmp(&self, other: &Self) -> Ordering {
        self.variant().cmp(other.variant())
    }
}

impl PartialOrd<Self> for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.variant().hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_index_missing_is_range() {
        let m = v_map(&[(v_str("a"), v_int(1))]);
        let err = m.index(&v_str("b")).unwrap_err();
        assert_eq!(err, crate::ErrorCode::E_RANGE);
    }

    #[test]
    fn test_map_index_set_inserts() {
        let m = v_map(&[]);
        let m2 = m.index_set(&v_str("k"), &v_int(7)).unwrap();
        assert_eq!(m2.index(&v_str("k")).unwrap(), v_int(7));
    }

    #[test]
    fn test_in_operator_shapes() {
        let l = v_list(&[v_str("x"), v_str("y")]);
        assert_eq!(v_str("y").index_in(&l).unwrap(), v_int(2));
        assert_eq!(v_str("ell").index_in(&v_str("hello")).unwrap(), v_int(1));
        let m = v_map(&[(v_str("b"), v_int(2)), (v_str("a"), v_int(1))]);
        // 2 is the value of key "b", which sorts second.
        assert_eq!(v_int(2).index_in(&m).unwrap(), v_int(2));
    }

    #[test]
    fn test_equal_case_sensitivity() {
        assert_eq!(v_str("Foo"), v_str("foo"));
        assert!(!v_str("Foo").eq_case_sensitive(&v_str("foo")));
        assert!(v_str("foo").eq_case_sensitive(&v_str("foo")));
    }
}
