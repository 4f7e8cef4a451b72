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

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// An object id. Negative ids are sentinels ($nothing, $failed_match,
/// $ambiguous_match) or unlogged network connections; they never name a live
/// object in the store.
#[derive(
    Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default,
)]
pub struct Obj(i64);

impl Obj {
    pub const fn mk_id(id: i64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> i64 {
        self.0
    }

    pub fn is_nothing(&self) -> bool {
        self.0 == -1
    }

    /// True if this id could name an object in the store (ids are allocated
    /// from 0 upward).
    pub fn is_positive(&self) -> bool {
        self.0 >= 0
    }

    /// True if this id is in the range the connection manager hands out to
    /// unlogged connections.
    pub fn is_connection(&self) -> bool {
        self.0 <= -2
    }
}

impl Display for Obj {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Debug for Obj {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A handle to an anonymous object in the store's side table. The handle is
/// opaque; only the store can resolve it. Compared by identity.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Anon(u64);

impl Anon {
    pub fn mk(handle: u64) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> u64 {
        self.0
    }
}

impl Display for Anon {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "*anonymous*")
    }
}

impl Debug for Anon {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "anon<{}>", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(crate::NOTHING.is_nothing());
        assert!(!crate::NOTHING.is_positive());
        assert!(crate::FAILED_MATCH.is_connection());
        assert!(crate::SYSTEM_OBJECT.is_positive());
        assert_eq!(format!("{}", Obj::mk_id(2)), "#2");
    }
}
