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
use crate::var::Var;
use crate::variant::Variant;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::sync::Arc;

/// An association sorted by canonical key order, behind a shared
/// copy-on-write pair vector. Lookups are binary search; iteration is
/// canonical order, which is what makes map iteration deterministic.
#[derive(Clone, Serialize, Deserialize)]
pub struct Map(Arc<Vec<(Var, Var)>>);

/// Map keys are restricted to the hashable set: scalars, strings, lists.
/// Maps, waifs, and anonymous objects cannot key a map.
fn valid_key(key: &Var) -> bool {
    !matches!(
        key.variant(),
        Variant::Map(_) | Variant::Waif(_) | Variant::Anon(_)
    )
}

impl Map {
    /// Construct from arbitrary pairs; later duplicates win, matching
    /// left-to-right literal evaluation.
    pub fn build<'a, I: Iterator<Item = &'a (Var, Var)>>(pairs: I) -> Var {
        let mut sorted: Vec<(Var, Var)> = Vec::new();
        for (k, v) in pairs {
            match sorted.binary_search_by(|(ek, _)| ek.cmp(k)) {
                Ok(i) => sorted[i] = (k.clone(), v.clone()),
                Err(i) => sorted.insert(i, (k.clone(), v.clone())),
            }
        }
        Var::from_map(Map(Arc::new(sorted)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Var, Var)> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn find(&self, key: &Var) -> Result<usize, usize> {
        self.0.binary_search_by(|(ek, _)| ek.cmp(key))
    }

    pub fn get(&self, key: &Var) -> Option<Var> {
        self.find(key).ok().map(|i| self.0[i].1.clone())
    }

    pub fn contains_key(&self, key: &Var) -> bool {
        self.find(key).is_ok()
    }

    /// `m[k] = v` and `mapmerge`'s per-entry operation: insert or replace.
    pub fn set(&self, key: &Var, value: &Var) -> Result<Var, Error> {
        if !valid_key(key) {
            return Err(E_TYPE.msg("invalid map key type").into());
        }
        let mut new = (*self.0).clone();
        match new.binary_search_by(|(ek, _)| ek.cmp(key)) {
            Ok(i) => new[i] = (key.clone(), value.clone()),
            Err(i) => new.insert(i, (key.clone(), value.clone())),
        }
        Ok(Var::from_map(Map(Arc::new(new))))
    }

    /// Remove a key, returning the new map and the removed value (if any).
    pub fn remove(&self, key: &Var) -> (Var, Option<Var>) {
        match self.find(key) {
            Ok(i) => {
                let mut new = (*self.0).clone();
                let (_, v) = new.remove(i);
                (Var::from_map(Map(Arc::new(new))), Some(v))
            }
            Err(_) => (Var::from_map(self.clone()), None),
        }
    }

    /// Nth entry in canonical order, 1-based.
    pub fn index(&self, idx: i64) -> Result<(Var, Var), Error> {
        if idx < 1 || idx as usize > self.0.len() {
            return Err(E_RANGE.msg(format!("index {idx} out of range")).into());
        }
        Ok(self.0[idx as usize - 1].clone())
    }

    /// 1-based canonical position of the key whose *value* equals `value`,
    /// 0 if absent. MOO's `in` operator on maps.
    pub fn index_in(&self, value: &Var) -> i64 {
        self.0
            .iter()
            .position(|(_, v)| v == value)
            .map(|i| i as i64 + 1)
            .unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<Var> {
        self.0.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Var> {
        self.0.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| a.0 == b.0 && a.1 == b.1)
    }
}

impl Eq for Map {}

impl PartialOrd for Map {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Map {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().cmp(other.0.iter())
    }
}

impl Hash for Map {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for (k, v) in self.0.iter() {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl Debug for Map {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::{v_int, v_map, v_str};

    #[test]
    fn test_canonical_iteration_order() {
        let m = v_map(&[
            (v_str("b"), v_int(2)),
            (v_str("a"), v_int(1)),
            (v_int(10), v_int(0)),
        ]);
        let Variant::Map(m) = m.variant() else {
            unreachable!()
        };
        let keys = m.keys();
        assert_eq!(keys, vec![v_int(10), v_str("a"), v_str("b")]);
    }

    #[test]
    fn test_keys_values_aligned() {
        let m = v_map(&[(v_str("x"), v_int(1)), (v_str("y"), v_int(2))]);
        let Variant::Map(m) = m.variant() else {
            unreachable!()
        };
        let keys = m.keys();
        let values = m.values();
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(m.get(k).unwrap(), values[i]);
        }
    }

    #[test]
    fn test_set_is_cow() {
        let m = v_map(&[(v_str("a"), v_int(1))]);
        let Variant::Map(mm) = m.variant() else {
            unreachable!()
        };
        let m2 = mm.set(&v_str("a"), &v_int(9)).unwrap();
        assert_eq!(m, v_map(&[(v_str("a"), v_int(1))]));
        assert_eq!(m2, v_map(&[(v_str("a"), v_int(9))]));
    }

    #[test]
    fn test_remove_missing() {
        let m = v_map(&[(v_str("a"), v_int(1))]);
        let Variant::Map(mm) = m.variant() else {
            unreachable!()
        };
        let (same, removed) = mm.remove(&v_str("zzz"));
        assert!(removed.is_none());
        assert_eq!(same, m);
    }

    #[test]
    fn test_duplicate_literal_keys_last_wins() {
        let m = v_map(&[(v_str("a"), v_int(1)), (v_str("a"), v_int(2))]);
        let Variant::Map(mm) = m.variant() else {
            unreachable!()
        };
        assert_eq!(mm.get(&v_str("a")), Some(v_int(2)));
        assert_eq!(mm.len(), 1);
    }
}
