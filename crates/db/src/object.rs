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

use crate::flags::{BitEnum, ObjFlag, PropFlag, VerbFlag};
use corral_compiler::Program;
use corral_var::{Anon, NOTHING, Obj, Symbol, Var, Variant};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Something that can hold properties and verbs: a named object or an
/// anonymous one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    Obj(Obj),
    Anon(Anon),
}

impl ObjectRef {
    pub fn as_obj(&self) -> Option<Obj> {
        match self {
            ObjectRef::Obj(o) => Some(*o),
            ObjectRef::Anon(_) => None,
        }
    }

    pub fn from_var(v: &Var) -> Option<ObjectRef> {
        match v.variant() {
            Variant::Obj(o) => Some(ObjectRef::Obj(*o)),
            Variant::Anon(a) => Some(ObjectRef::Anon(*a)),
            _ => None,
        }
    }

    pub fn to_var(&self) -> Var {
        match self {
            ObjectRef::Obj(o) => corral_var::v_obj(*o),
            ObjectRef::Anon(a) => corral_var::v_anon(*a),
        }
    }
}

impl From<Obj> for ObjectRef {
    fn from(o: Obj) -> Self {
        ObjectRef::Obj(o)
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Obj(o) => write!(f, "{o}"),
            ObjectRef::Anon(a) => write!(f, "{a}"),
        }
    }
}

/// One property record. Every object carries a record for each property
/// defined on it *or* any ancestor; `value: None` is a clear slot that
/// inherits dynamically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropDef {
    pub owner: Obj,
    pub flags: BitEnum<PropFlag>,
    pub value: Option<Var>,
    /// True on the object the property was `add_property`'d to.
    pub defined_here: bool,
}

/// What a verb expects of the direct/indirect object slot of a command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ArgSpec {
    This,
    None,
    Any,
}

impl ArgSpec {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "this" => Some(ArgSpec::This),
            "none" => Some(ArgSpec::None),
            "any" => Some(ArgSpec::Any),
            _ => None,
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            ArgSpec::This => "this",
            ArgSpec::None => "none",
            ArgSpec::Any => "any",
        }
    }
}

/// The preposition slot: none, any, or one specific entry of the fixed
/// preposition table (by index).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum PrepSpec {
    Any,
    None,
    Other(u16),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct VerbArgsSpec {
    pub dobj: ArgSpec,
    pub prep: PrepSpec,
    pub iobj: ArgSpec,
}

impl VerbArgsSpec {
    pub fn this_none_this() -> Self {
        VerbArgsSpec {
            dobj: ArgSpec::This,
            prep: PrepSpec::None,
            iobj: ArgSpec::This,
        }
    }
}

/// One verb definition. `names` are the space-separated alias patterns,
/// each possibly carrying a `*` abbreviation marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbDef {
    pub names: Vec<Symbol>,
    pub owner: Obj,
    pub flags: BitEnum<VerbFlag>,
    pub args: VerbArgsSpec,
    /// Un-programmed verbs have no program yet.
    pub program: Option<Program>,
}

impl VerbDef {
    pub fn names_string(&self) -> String {
        self.names
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn matches_name(&self, name: &Symbol) -> bool {
        self.names
            .iter()
            .any(|pattern| crate::verb_match::verbname_match(pattern.as_str(), name.as_str()))
    }
}

/// An object: identity, inheritance links, containment links, flags, and the
/// property and verb tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub id: ObjectRef,
    pub parents: Vec<Obj>,
    pub children: Vec<ObjectRef>,
    pub owner: Obj,
    pub location: Obj,
    pub contents: Vec<Obj>,
    pub name: String,
    pub flags: BitEnum<ObjFlag>,
    pub properties: IndexMap<Symbol, PropDef>,
    pub verbs: Vec<VerbDef>,
}

impl Object {
    pub fn new(id: ObjectRef, parents: Vec<Obj>, owner: Obj) -> Self {
        Object {
            id,
            parents,
            children: vec![],
            owner,
            location: NOTHING,
            contents: vec![],
            name: String::new(),
            flags: BitEnum::new(),
            properties: IndexMap::new(),
            verbs: Vec::new(),
        }
    }

    pub fn is_wizard(&self) -> bool {
        self.flags.contains(ObjFlag::Wizard)
    }

    pub fn is_programmer(&self) -> bool {
        self.flags.contains(ObjFlag::Programmer)
    }

    pub fn is_user(&self) -> bool {
        self.flags.contains(ObjFlag::User)
    }
}

/// Built-in property names, which are not in the property table and which
/// `add_property` must reject.
pub const BUILTIN_PROPERTIES: &[&str] = &[
    "name",
    "owner",
    "location",
    "contents",
    "parents",
    "parent",
    "children",
    "programmer",
    "wizard",
    "player",
    "r",
    "w",
    "f",
    "a",
];

pub fn is_builtin_property(name: &Symbol) -> bool {
    BUILTIN_PROPERTIES
        .iter()
        .any(|b| name.as_str().eq_ignore_ascii_case(b))
}
