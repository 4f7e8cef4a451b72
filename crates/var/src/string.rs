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

use crate::error::ErrorCode::{E_INVARG, E_RANGE, E_TYPE};
use crate::var::Var;
use crate::variant::Variant;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A shared immutable string. All "mutation" produces a new value. Indices
/// are 1-based at this interface, matching the language; character-counted,
/// not byte-counted.
#[derive(Clone, Serialize, Deserialize)]
pub struct Str(Arc<String>);

impl Str {
    pub fn mk_str(s: &str) -> Self {
        Str(Arc::new(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index(&self, idx: i64) -> Result<Var, Error> {
        if idx < 1 {
            return Err(E_RANGE.msg(format!("index {idx} out of range")).into());
        }
        match self.0.chars().nth(idx as usize - 1) {
            Some(c) => Ok(Var::mk_string(c.to_string())),
            None => Err(E_RANGE.msg(format!("index {idx} out of range")).into()),
        }
    }

    pub fn index_set(&self, idx: i64, value: &Var) -> Result<Var, Error> {
        let Variant::Str(replacement) = value.variant() else {
            return Err(E_TYPE.into());
        };
        if replacement.len() != 1 {
            return Err(E_INVARG.msg("replacement must be a single character").into());
        }
        let len = self.len();
        if idx < 1 || idx as usize > len {
            return Err(E_RANGE.msg(format!("index {idx} out of range")).into());
        }
        let target = idx as usize - 1;
        let new: String = self
            .0
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i == target {
                    replacement.0.chars().next().unwrap()
                } else {
                    c
                }
            })
            .collect();
        Ok(Var::mk_string(new))
    }

    /// `s[from..to]`, 1-based inclusive. A backward range is empty without
    /// bounds checks.
    pub fn range(&self, from: i64, to: i64) -> Result<Var, Error> {
        if from > to {
            return Ok(Var::mk_str(""));
        }
        if from < 1 || to as usize > self.len() {
            return Err(E_RANGE.msg("range out of bounds").into());
        }
        let sub: String = self
            .0
            .chars()
            .skip(from as usize - 1)
            .take((to - from + 1) as usize)
            .collect();
        Ok(Var::mk_string(sub))
    }

    /// Replace `s[from..to]` with another string; `to == from - 1` inserts
    /// before `from`.
    pub fn range_set(&self, from: i64, to: i64, with: &Var) -> Result<Var, Error> {
        let Variant::Str(replacement) = with.variant() else {
            return Err(E_TYPE.into());
        };
        let len = self.len() as i64;
        if from < 1 || from > len + 1 || to < from - 1 || to > len {
            return Err(E_RANGE.msg("range out of bounds").into());
        }
        let mut new = String::new();
        new.extend(self.0.chars().take(from as usize - 1));
        new.push_str(replacement.as_str());
        new.extend(self.0.chars().skip(to.max(0) as usize));
        Ok(Var::mk_string(new))
    }

    pub fn append(&self, other: &Str) -> Var {
        let mut new = String::with_capacity(self.0.len() + other.0.len());
        new.push_str(&self.0);
        new.push_str(&other.0);
        Var::mk_string(new)
    }

    /// Case-insensitive substring test, MOO's `in` on strings.
    pub fn contains_str(&self, needle: &Str) -> bool {
        self.0.to_lowercase().contains(&needle.0.to_lowercase())
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Str {}

impl PartialOrd for Str {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Str {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl Hash for Str {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            b.to_ascii_lowercase().hash(state);
        }
    }
}

impl Debug for Str {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::v_str;

    #[test]
    fn test_index_and_range() {
        let s = Str::mk_str("hello");
        assert_eq!(s.index(1).unwrap(), v_str("h"));
        assert_eq!(s.range(2, 4).unwrap(), v_str("ell"));
        assert!(s.index(6).is_err());
        assert!(s.index(0).is_err());
    }

    #[test]
    fn test_backward_range_empty() {
        let s = Str::mk_str("hello");
        assert_eq!(s.range(4, 2).unwrap(), v_str(""));
        // Out-of-bounds endpoints are fine when the range is backward.
        assert_eq!(s.range(100, -3).unwrap(), v_str(""));
    }

    #[test]
    fn test_range_set() {
        let s = Str::mk_str("hello");
        assert_eq!(s.range_set(1, 2, &v_str("J")).unwrap(), v_str("Jllo"));
        // Insertion form.
        assert_eq!(s.range_set(3, 2, &v_str("X")).unwrap(), v_str("heXllo"));
    }
}
