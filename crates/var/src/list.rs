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

/// A shared copy-on-write sequence. Every mutator returns a new list; the
/// receiver is untouched, so `y = x; y[1] = 0;` never aliases into `x`.
/// Indices are 1-based at this interface.
#[derive(Clone, Serialize, Deserialize)]
pub struct List(Arc<Vec<Var>>);

impl List {
    pub fn mk_list(values: &[Var]) -> List {
        List(Arc::new(values.to_vec()))
    }

    pub fn from_vec(values: Vec<Var>) -> List {
        List(Arc::new(values))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Var> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Var] {
        &self.0
    }

    fn check_index(&self, idx: i64) -> Result<usize, Error> {
        if idx < 1 || idx as usize > self.0.len() {
            return Err(E_RANGE.msg(format!("index {idx} out of range")).into());
        }
        Ok(idx as usize - 1)
    }

    pub fn index(&self, idx: i64) -> Result<Var, Error> {
        Ok(self.0[self.check_index(idx)?].clone())
    }

    pub fn index_set(&self, idx: i64, value: &Var) -> Result<Var, Error> {
        let i = self.check_index(idx)?;
        let mut new = (*self.0).clone();
        new[i] = value.clone();
        Ok(Var::from_list(List(Arc::new(new))))
    }

    /// `l[from..to]`, 1-based inclusive. A backward range is empty without
    /// bounds checks.
    pub fn range(&self, from: i64, to: i64) -> Result<Var, Error> {
        if from > to {
            return Ok(Var::mk_list(&[]));
        }
        if from < 1 || to as usize > self.0.len() {
            return Err(E_RANGE.msg("range out of bounds").into());
        }
        let sub = self.0[from as usize - 1..to as usize].to_vec();
        Ok(Var::from_list(List(Arc::new(sub))))
    }

    /// Replace `l[from..to]` with the elements of another list;
    /// `to == from - 1` inserts before `from`.
    pub fn range_set(&self, from: i64, to: i64, with: &Var) -> Result<Var, Error> {
        let Variant::List(replacement) = with.variant() else {
            return Err(E_TYPE.into());
        };
        let len = self.0.len() as i64;
        if from < 1 || from > len + 1 || to < from - 1 || to > len {
            return Err(E_RANGE.msg("range out of bounds").into());
        }
        let mut new = Vec::with_capacity(self.0.len() + replacement.len());
        new.extend_from_slice(&self.0[..from as usize - 1]);
        new.extend_from_slice(&replacement.0);
        new.extend_from_slice(&self.0[to.max(0) as usize..]);
        Ok(Var::from_list(List(Arc::new(new))))
    }

    pub fn push(&self, value: &Var) -> Var {
        let mut new = (*self.0).clone();
        new.push(value.clone());
        Var::from_list(List(Arc::new(new)))
    }

    /// `listinsert`; a position past the end appends, before the start
    /// prepends.
    pub fn insert(&self, idx: i64, value: &Var) -> Var {
        let i = (idx - 1).clamp(0, self.0.len() as i64) as usize;
        let mut new = (*self.0).clone();
        new.insert(i, value.clone());
        Var::from_list(List(Arc::new(new)))
    }

    pub fn remove_at(&self, idx: i64) -> Result<Var, Error> {
        let i = self.check_index(idx)?;
        let mut new = (*self.0).clone();
        new.remove(i);
        Ok(Var::from_list(List(Arc::new(new))))
    }

    pub fn append(&self, other: &List) -> Var {
        let mut new = Vec::with_capacity(self.0.len() + other.0.len());
        new.extend_from_slice(&self.0);
        new.extend_from_slice(&other.0);
        Var::from_list(List(Arc::new(new)))
    }

    /// Add `item` only if it is not already present.
    pub fn set_add(&self, item: &Var) -> Var {
        if self.0.iter().any(|v| v == item) {
            return Var::from_list(self.clone());
        }
        self.push(item)
    }

    /// Remove the first instance of `item`, if any.
    pub fn set_remove(&self, item: &Var) -> Var {
        match self.0.iter().position(|v| v == item) {
            Some(i) => {
                let mut new = (*self.0).clone();
                new.remove(i);
                Var::from_list(List(Arc::new(new)))
            }
            None => Var::from_list(self.clone()),
        }
    }

    /// 1-based position of the first element equal to `value`, 0 if absent.
    /// MOO's `in` operator.
    pub fn index_in(&self, value: &Var) -> i64 {
        self.0
            .iter()
            .position(|v| v == value)
            .map(|i| i as i64 + 1)
            .unwrap_or(0)
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for List {}

impl PartialOrd for List {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for List {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().cmp(other.0.iter())
    }
}

impl Hash for List {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in self.0.iter() {
            v.hash(state);
        }
    }
}

impl Debug for List {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::{v_int, v_list};

    #[test]
    fn test_copy_on_write() {
        let x = v_list(&[v_int(1), v_int(2)]);
        let Variant::List(xl) = x.variant() else {
            unreachable!()
        };
        let y = xl.index_set(1, &v_int(0)).unwrap();
        assert_eq!(x, v_list(&[v_int(1), v_int(2)]));
        assert_eq!(y, v_list(&[v_int(0), v_int(2)]));
    }

    #[test]
    fn test_backward_range_empty() {
        let l = List::mk_list(&[v_int(1), v_int(2), v_int(3)]);
        assert_eq!(l.range(3, 1).unwrap(), v_list(&[]));
        assert_eq!(l.range(100, -100).unwrap(), v_list(&[]));
    }

    #[test]
    fn test_range_set_insertion() {
        let l = List::mk_list(&[v_int(1), v_int(2)]);
        let ins = v_list(&[v_int(9)]);
        assert_eq!(
            l.range_set(2, 1, &ins).unwrap(),
            v_list(&[v_int(1), v_int(9), v_int(2)])
        );
    }

    #[test]
    fn test_listdelete_tail_property() {
        // listdelete(L, i)[i..$] == L[i+1..$]
        let l = List::mk_list(&[v_int(1), v_int(2), v_int(3), v_int(4)]);
        for i in 1..=4i64 {
            let deleted = l.remove_at(i).unwrap();
            let Variant::List(dl) = deleted.variant() else {
                unreachable!()
            };
            let lhs = dl.range(i, dl.len() as i64).unwrap();
            let rhs = l.range(i + 1, l.len() as i64).unwrap();
            assert_eq!(lhs, rhs);
        }
    }

    #[test]
    fn test_in_position() {
        let l = List::mk_list(&[v_int(5), v_int(6), v_int(6)]);
        assert_eq!(l.index_in(&v_int(6)), 2);
        assert_eq!(l.index_in(&v_int(7)), 0);
    }
}
