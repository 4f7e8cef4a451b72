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

use crate::obj::Obj;
use crate::symbol::Symbol;
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::sync::Arc;

/// A waif: a lightweight immutable instance of a class object. Reading a
/// property falls back to the class when the instance has no slot; writing
/// produces a whole new waif, so the VM rebinds whatever held it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Waif(Arc<WaifInner>);

#[derive(Serialize, Deserialize)]
struct WaifInner {
    class: Obj,
    // Sorted by symbol so comparisons are positional.
    slots: Vec<(Symbol, Var)>,
}

impl Waif {
    pub fn mk(class: Obj, slots: &[(Symbol, Var)]) -> Self {
        let mut slots = slots.to_vec();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots.dedup_by(|a, b| a.0 == b.0);
        Waif(Arc::new(WaifInner { class, slots }))
    }

    pub fn class(&self) -> Obj {
        self.0.class
    }

    pub fn slot(&self, name: &Symbol) -> Option<Var> {
        self.0
            .slots
            .binary_search_by(|(s, _)| s.cmp(name))
            .ok()
            .map(|i| self.0.slots[i].1.clone())
    }

    /// Copy-on-write slot update; the new waif replaces the old in its
    /// holder.
    pub fn with_slot(&self, name: Symbol, value: Var) -> Self {
        let mut slots = self.0.slots.clone();
        match slots.binary_search_by(|(s, _)| s.cmp(&name)) {
            Ok(i) => slots[i] = (name, value),
            Err(i) => slots.insert(i, (name, value)),
        }
        Waif(Arc::new(WaifInner {
            class: self.0.class,
            slots,
        }))
    }

    pub fn slots(&self) -> impl Iterator<Item = &(Symbol, Var)> + '_ {
        self.0.slots.iter()
    }
}

impl PartialEq for Waif {
    fn eq(&self, other: &Self) -> bool {
        self.0.class == other.0.class
            && self.0.slots.len() == other.0.slots.len()
            && self
                .0
                .slots
                .iter()
                .zip(other.0.slots.iter())
                .all(|(a, b)| a.0 == b.0 && a.1 == b.1)
    }
}

impl Eq for Waif {}

impl PartialOrd for Waif {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waif {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .class
            .cmp(&other.0.class)
            .then_with(|| self.0.slots.iter().cmp(other.0.slots.iter()))
    }
}

impl Hash for Waif {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.class.hash(state);
        for (s, v) in &self.0.slots {
            s.hash(state);
            v.hash(state);
        }
    }
}

impl Debug for Waif {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[[class = {}", self.0.class)?;
        for (s, v) in &self.0.slots {
            write!(f, ", .{s} = {v:?}")?;
        }
        write!(f, "]]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::v_int;

    #[test]
    fn test_with_slot_is_cow() {
        let w = Waif::mk(Obj::mk_id(10), &[]);
        let w2 = w.with_slot(Symbol::mk("p"), v_int(5));
        assert_eq!(w.slot(&Symbol::mk("p")), None);
        assert_eq!(w2.slot(&Symbol::mk("p")), Some(v_int(5)));
        assert_eq!(w2.class(), Obj::mk_id(10));
    }
}
