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

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// A compact bitset over a small enum, for object/property/verb flags.
#[derive(Serialize, Deserialize)]
pub struct BitEnum<T: ToPrimitive> {
    value: u16,
    #[serde(skip)]
    phantom: PhantomData<T>,
}

impl<T: ToPrimitive> BitEnum<T> {
    pub fn new() -> Self {
        Self {
            value: 0,
            phantom: PhantomData,
        }
    }

    pub fn new_with(flag: T) -> Self {
        let mut s = Self::new();
        s.set(flag);
        s
    }

    pub fn set(&mut self, flag: T) {
        self.value |= 1 << flag.to_u16().unwrap();
    }

    pub fn clear(&mut self, flag: T) {
        self.value &= !(1 << flag.to_u16().unwrap());
    }

    pub fn contains(&self, flag: T) -> bool {
        self.value & (1 << flag.to_u16().unwrap()) != 0
    }

    pub fn with(mut self, flag: T) -> Self {
        self.set(flag);
        self
    }
}

impl<T: ToPrimitive> Default for BitEnum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToPrimitive> Clone for BitEnum<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            phantom: PhantomData,
        }
    }
}

impl<T: ToPrimitive> Copy for BitEnum<T> {}

impl<T: ToPrimitive> PartialEq for BitEnum<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: ToPrimitive> Eq for BitEnum<T> {}

impl<T: ToPrimitive> std::fmt::Debug for BitEnum<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitEnum({:#b})", self.value)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u16)]
pub enum ObjFlag {
    User = 0,
    Programmer = 1,
    Wizard = 2,
    Read = 3,
    Write = 4,
    Fertile = 5,
    Anonymous = 6,
}

impl ToPrimitive for ObjFlag {
    fn to_i64(&self) -> Option<i64> {
        Some(*self as i64)
    }
    fn to_u64(&self) -> Option<u64> {
        Some(*self as u64)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u16)]
pub enum PropFlag {
    Read = 0,
    Write = 1,
    Chown = 2,
}

impl ToPrimitive for PropFlag {
    fn to_i64(&self) -> Option<i64> {
        Some(*self as i64)
    }
    fn to_u64(&self) -> Option<u64> {
        Some(*self as u64)
    }
}

impl PropFlag {
    /// Parse a permission string for `add_property`/`set_property_info`.
    /// Only `r`, `w`, `c` are legal characters.
    pub fn parse_perms(s: &str) -> Option<BitEnum<PropFlag>> {
        let mut flags = BitEnum::new();
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'r' => flags.set(PropFlag::Read),
                'w' => flags.set(PropFlag::Write),
                'c' => flags.set(PropFlag::Chown),
                _ => return None,
            }
        }
        Some(flags)
    }

    pub fn perms_string(flags: BitEnum<PropFlag>) -> String {
        let mut s = String::new();
        if flags.contains(PropFlag::Read) {
            s.push('r');
        }
        if flags.contains(PropFlag::Write) {
            s.push('w');
        }
        if flags.contains(PropFlag::Chown) {
            s.push('c');
        }
        s
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u16)]
pub enum VerbFlag {
    Read = 0,
    Write = 1,
    Exec = 2,
    Debug = 3,
}

impl ToPrimitive for VerbFlag {
    fn to_i64(&self) -> Option<i64> {
        Some(*self as i64)
    }
    fn to_u64(&self) -> Option<u64> {
        Some(*self as u64)
    }
}

impl VerbFlag {
    /// Parse a verb permission string; `r`, `w`, `x`, `d` only.
    pub fn parse_perms(s: &str) -> Option<BitEnum<VerbFlag>> {
        let mut flags = BitEnum::new();
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'r' => flags.set(VerbFlag::Read),
                'w' => flags.set(VerbFlag::Write),
                'x' => flags.set(VerbFlag::Exec),
                'd' => flags.set(VerbFlag::Debug),
                _ => return None,
            }
        }
        Some(flags)
    }

    pub fn perms_string(flags: BitEnum<VerbFlag>) -> String {
        let mut s = String::new();
        if flags.contains(VerbFlag::Read) {
            s.push('r');
        }
        if flags.contains(VerbFlag::Write) {
            s.push('w');
        }
        if flags.contains(VerbFlag::Exec) {
            s.push('x');
        }
        if flags.contains(VerbFlag::Debug) {
            s.push('d');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_check() {
        let mut flags: BitEnum<ObjFlag> = BitEnum::new();
        flags.set(ObjFlag::Wizard);
        assert!(flags.contains(ObjFlag::Wizard));
        assert!(!flags.contains(ObjFlag::User));
        flags.clear(ObjFlag::Wizard);
        assert!(!flags.contains(ObjFlag::Wizard));
    }

    #[test]
    fn test_prop_perms_parse() {
        let flags = PropFlag::parse_perms("rc").unwrap();
        assert!(flags.contains(PropFlag::Read));
        assert!(flags.contains(PropFlag::Chown));
        assert!(!flags.contains(PropFlag::Write));
        assert_eq!(PropFlag::perms_string(flags), "rc");
        assert!(PropFlag::parse_perms("rx").is_none());
    }
}
