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

use crate::flags::{BitEnum, ObjFlag, PropFlag};
use crate::object::{Object, ObjectRef, PropDef, VerbDef};
use corral_var::{Anon, NOTHING, Obj, Symbol, Var, Variant};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorldStateError {
    #[error("Invalid object: {0}")]
    InvalidObject(ObjectRef),
    #[error("Property not found: {0}.{1}")]
    PropertyNotFound(ObjectRef, String),
    #[error("Verb not found: {0}:{1}")]
    VerbNotFound(ObjectRef, String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Recursive parent or location relationship involving {0}")]
    Recursive(ObjectRef),
    #[error("Property name conflict: {0}")]
    PropertyConflict(String),
}

use WorldStateError::*;

/// The whole object database. Exclusively owned by the scheduler thread;
/// no interior locking, per the single-writer execution model. Clone is
/// how checkpoints get their consistent snapshot.
#[derive(Clone, Serialize, Deserialize)]
pub struct WorldState {
    // Dense id-indexed table; a `None` slot is a recycled (or never-used
    // after reset) id, which is never handed out again.
    objects: Vec<Option<Object>>,
    // Anonymous objects, keyed by handle, reclaimed by gc().
    anons: HashMap<u64, Object>,
    next_anon: u64,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            anons: HashMap::new(),
            next_anon: 0,
        }
    }

    pub fn valid(&self, oref: ObjectRef) -> bool {
        match oref {
            ObjectRef::Obj(o) => {
                o.id() >= 0
                    && (o.id() as usize) < self.objects.len()
                    && self.objects[o.id() as usize].is_some()
            }
            ObjectRef::Anon(a) => self.anons.contains_key(&a.handle()),
        }
    }

    pub fn get(&self, oref: ObjectRef) -> Result<&Object, WorldStateError> {
        match oref {
            ObjectRef::Obj(o) => {
                if o.id() < 0 {
                    return Err(InvalidObject(oref));
                }
                self.objects
                    .get(o.id() as usize)
                    .and_then(|s| s.as_ref())
                    .ok_or(InvalidObject(oref))
            }
            ObjectRef::Anon(a) => self.anons.get(&a.handle()).ok_or(InvalidObject(oref)),
        }
    }

    pub fn get_mut(&mut self, oref: ObjectRef) -> Result<&mut Object, WorldStateError> {
        match oref {
            ObjectRef::Obj(o) => {
                if o.id() < 0 {
                    return Err(InvalidObject(oref));
                }
                self.objects
                    .get_mut(o.id() as usize)
                    .and_then(|s| s.as_mut())
                    .ok_or(InvalidObject(oref))
            }
            ObjectRef::Anon(a) => self.anons.get_mut(&a.handle()).ok_or(InvalidObject(oref)),
        }
    }

    /// The id high-water mark; holds even when trailing objects are
    /// recycled.
    pub fn max_object(&self) -> Obj {
        Obj::mk_id(self.objects.len() as i64 - 1)
    }

    /// Lop off trailing recycled slots so their ids become allocatable
    /// again. Wizard-only at the builtin layer.
    pub fn reset_max_object(&mut self) {
        while matches!(self.objects.last(), Some(None)) {
            self.objects.pop();
        }
    }

    pub fn object_ids(&self) -> impl Iterator<Item = Obj> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| Obj::mk_id(i as i64)))
    }

    pub fn players(&self) -> Vec<Obj> {
        self.objects
            .iter()
            .flatten()
            .filter(|o| o.is_user())
            .filter_map(|o| o.id.as_obj())
            .collect()
    }

    // ------------------------------------------------------------------
    // Creation / destruction / inheritance
    // ------------------------------------------------------------------

    /// Allocate a new object under `parents`, copying the inheritance
    /// chain's property records as clear slots. The `:initialize` hook is
    /// the kernel's business.
    pub fn create_object(
        &mut self,
        parents: &[Obj],
        owner: Obj,
        anonymous: bool,
    ) -> Result<ObjectRef, WorldStateError> {
        for parent in parents {
            if !self.valid((*parent).into()) {
                return Err(InvalidObject((*parent).into()));
            }
        }

        let id = if anonymous {
            let handle = self.next_anon;
            self.next_anon += 1;
            ObjectRef::Anon(Anon::mk(handle))
        } else {
            ObjectRef::Obj(Obj::mk_id(self.objects.len() as i64))
        };

        let mut object = Object::new(id, parents.to_vec(), owner);
        if anonymous {
            object.flags.set(ObjFlag::Anonymous);
        }

        // Clear slots for every property defined anywhere up the chain.
        for ancestor in self.ancestors_of_parents(parents) {
            let ancestor_obj = self.get(ancestor.into())?;
            for (name, prop) in &ancestor_obj.properties {
                if !prop.defined_here {
                    continue;
                }
                let owner = if prop.flags.contains(PropFlag::Chown) {
                    object.owner
                } else {
                    prop.owner
                };
                object.properties.insert(
                    name.clone(),
                    PropDef {
                        owner,
                        flags: prop.flags,
                        value: None,
                        defined_here: false,
                    },
                );
            }
        }

        match id {
            ObjectRef::Obj(_) => self.objects.push(Some(object)),
            ObjectRef::Anon(a) => {
                self.anons.insert(a.handle(), object);
            }
        }
        for parent in parents {
            self.get_mut((*parent).into())?.children.push(id);
        }
        Ok(id)
    }

    /// Tear an object out of the graph. Hooks (`:recycle`, exitfunc) have
    /// already run by the time this is called. Children are re-parented to
    /// the dead object's parents; contents are evicted to $nothing.
    pub fn destroy_object(&mut self, oref: ObjectRef) -> Result<(), WorldStateError> {
        let object = self.get(oref)?;
        let parents = object.parents.clone();
        let children = object.children.clone();
        let contents = object.contents.clone();
        let location = object.location;

        for content in contents {
            self.set_location_raw(content, NOTHING)?;
        }
        for child in children {
            let parents = parents.clone();
            self.chparent(child, &parents)?;
        }
        if let Some(me) = oref.as_obj() {
            // The dead id must not linger in its container's contents.
            if location != NOTHING {
                if let Ok(loc) = self.get_mut(location.into()) {
                    loc.contents.retain(|c| *c != me);
                }
            }
            for parent in &parents {
                let p = self.get_mut((*parent).into())?;
                p.children.retain(|c| c.as_obj() != Some(me));
            }
        }

        match oref {
            ObjectRef::Obj(o) => {
                self.objects[o.id() as usize] = None;
            }
            ObjectRef::Anon(a) => {
                self.anons.remove(&a.handle());
            }
        }
        Ok(())
    }

    /// Change parents. Validity, cycle, and property-conflict rules live
    /// here; fertility and permission checks are the kernel's.
    pub fn chparent(
        &mut self,
        oref: ObjectRef,
        new_parents: &[Obj],
    ) -> Result<(), WorldStateError> {
        let object = self.get(oref)?;
        let old_parents = object.parents.clone();

        for parent in new_parents {
            if !self.valid((*parent).into()) {
                return Err(InvalidObject((*parent).into()));
            }
        }

        // Cycle check: the object (or anything under it) must not appear in
        // the new ancestry.
        if let Some(me) = oref.as_obj() {
            let mut new_ancestry: HashSet<Obj> = HashSet::new();
            for parent in new_parents {
                new_ancestry.insert(*parent);
                for a in self.ancestors(*parent)? {
                    new_ancestry.insert(a);
                }
            }
            let mut subtree: HashSet<Obj> = HashSet::new();
            subtree.insert(me);
            for d in self.descendants(me)? {
                if let Some(d) = d.as_obj() {
                    subtree.insert(d);
                }
            }
            if new_ancestry.intersection(&subtree).next().is_some() {
                return Err(Recursive(oref));
            }
        }

        // Property conflict check: names defined in this subtree must not
        // collide with names defined anywhere in the new ancestry.
        let mut subtree_defined: HashSet<Symbol> = HashSet::new();
        let mut subtree_refs = vec![oref];
        if let Some(me) = oref.as_obj() {
            subtree_refs.extend(self.descendants(me)?);
        }
        for sref in &subtree_refs {
            let sobj = self.get(*sref)?;
            for (name, prop) in &sobj.properties {
                if prop.defined_here {
                    subtree_defined.insert(name.clone());
                }
            }
        }
        for ancestor in self.ancestors_of_parents(new_parents) {
            let aobj = self.get(ancestor.into())?;
            for (name, prop) in &aobj.properties {
                if prop.defined_here && subtree_defined.contains(name) {
                    return Err(PropertyConflict(name.to_string()));
                }
            }
        }

        // Relink.
        for parent in &old_parents {
            if let Ok(p) = self.get_mut((*parent).into()) {
                p.children.retain(|c| *c != oref);
            }
        }
        for parent in new_parents {
            self.get_mut((*parent).into())?.children.push(oref);
        }
        self.get_mut(oref)?.parents = new_parents.to_vec();

        // Reset inherited (non-local) records throughout the subtree,
        // re-deriving them from each member's new chain. Locally defined
        // records are preserved untouched.
        for sref in subtree_refs {
            self.reinherit_properties(sref)?;
        }
        Ok(())
    }

    fn reinherit_properties(&mut self, oref: ObjectRef) -> Result<(), WorldStateError> {
        let object = self.get(oref)?;
        let owner = object.owner;
        let parents = object.parents.clone();
        let defined: Vec<(Symbol, PropDef)> = object
            .properties
            .iter()
            .filter(|(_, p)| p.defined_here)
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();

        let mut new_table = indexmap::IndexMap::new();
        for (name, prop) in defined {
            new_table.insert(name, prop);
        }
        for ancestor in self.ancestors_of_parents(&parents) {
            let aobj = self.get(ancestor.into())?;
            for (name, prop) in &aobj.properties {
                if !prop.defined_here || new_table.contains_key(name) {
                    continue;
                }
                let owner = if prop.flags.contains(PropFlag::Chown) {
                    owner
                } else {
                    prop.owner
                };
                new_table.insert(
                    name.clone(),
                    PropDef {
                        owner,
                        flags: prop.flags,
                        value: None,
                        defined_here: false,
                    },
                );
            }
        }
        self.get_mut(oref)?.properties = new_table;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inheritance queries
    // ------------------------------------------------------------------

    /// Breadth-first ancestor order, self excluded: for parents {A, B} with
    /// A's ancestors X and B's Y, the order is A, B, X, Y.
    pub fn ancestors(&self, obj: Obj) -> Result<Vec<Obj>, WorldStateError> {
        let object = self.get(obj.into())?;
        Ok(self.ancestors_of_parents(&object.parents))
    }

    fn ancestors_of_parents(&self, parents: &[Obj]) -> Vec<Obj> {
        let mut queue: VecDeque<Obj> = parents.iter().copied().collect();
        let mut visited: HashSet<Obj> = HashSet::new();
        let mut out = vec![];
        while let Some(o) = queue.pop_front() {
            if !visited.insert(o) {
                continue;
            }
            out.push(o);
            if let Ok(obj) = self.get(o.into()) {
                queue.extend(obj.parents.iter().copied());
            }
        }
        out
    }

    /// Breadth-first descendants, self excluded.
    pub fn descendants(&self, obj: Obj) -> Result<Vec<ObjectRef>, WorldStateError> {
        let object = self.get(obj.into())?;
        let mut queue: VecDeque<ObjectRef> = object.children.iter().copied().collect();
        let mut visited: HashSet<ObjectRef> = HashSet::new();
        let mut out = vec![];
        while let Some(o) = queue.pop_front() {
            if !visited.insert(o) {
                continue;
            }
            out.push(o);
            if let Ok(obj) = self.get(o) {
                queue.extend(obj.children.iter().copied());
            }
        }
        Ok(out)
    }

    pub fn isa(&self, oref: ObjectRef, ancestor: Obj) -> Result<bool, WorldStateError> {
        if oref.as_obj() == Some(ancestor) {
            return Ok(true);
        }
        let object = self.get(oref)?;
        Ok(self
            .ancestors_of_parents(&object.parents)
            .contains(&ancestor))
    }

    /// The breadth-first lookup chain for a receiver: itself, then its
    /// ancestors.
    fn lookup_chain(&self, oref: ObjectRef) -> Result<Vec<ObjectRef>, WorldStateError> {
        let object = self.get(oref)?;
        let mut chain = vec![oref];
        chain.extend(
            self.ancestors_of_parents(&object.parents)
                .into_iter()
                .map(ObjectRef::Obj),
        );
        Ok(chain)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Read a property's effective value: the receiver's record, chasing
    /// clear slots up the breadth-first ancestor chain.
    pub fn resolve_property(
        &self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<Var, WorldStateError> {
        let object = self.get(oref)?;
        let Some(prop) = object.properties.get(name) else {
            return Err(PropertyNotFound(oref, name.to_string()));
        };
        if let Some(value) = &prop.value {
            return Ok(value.clone());
        }
        for ancestor in self.ancestors_of_parents(&object.parents) {
            if let Some(prop) = self.get(ancestor.into())?.properties.get(name) {
                if let Some(value) = &prop.value {
                    return Ok(value.clone());
                }
            }
        }
        Err(PropertyNotFound(oref, name.to_string()))
    }

    pub fn property_record(
        &self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<&PropDef, WorldStateError> {
        let object = self.get(oref)?;
        object
            .properties
            .get(name)
            .ok_or_else(|| PropertyNotFound(oref, name.to_string()))
    }

    pub fn set_property_value(
        &mut self,
        oref: ObjectRef,
        name: &Symbol,
        value: Var,
    ) -> Result<(), WorldStateError> {
        let object = self.get_mut(oref)?;
        let Some(prop) = object.properties.get_mut(name) else {
            return Err(PropertyNotFound(oref, name.to_string()));
        };
        prop.value = Some(value);
        Ok(())
    }

    pub fn set_property_info(
        &mut self,
        oref: ObjectRef,
        name: &Symbol,
        owner: Obj,
        flags: BitEnum<PropFlag>,
    ) -> Result<(), WorldStateError> {
        let object = self.get_mut(oref)?;
        let Some(prop) = object.properties.get_mut(name) else {
            return Err(PropertyNotFound(oref, name.to_string()));
        };
        prop.owner = owner;
        prop.flags = flags;
        Ok(())
    }

    /// Clear an inherited override. Clearing on the defining object is an
    /// invalid argument.
    pub fn clear_property(
        &mut self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<(), WorldStateError> {
        let object = self.get_mut(oref)?;
        let Some(prop) = object.properties.get_mut(name) else {
            return Err(PropertyNotFound(oref, name.to_string()));
        };
        if prop.defined_here {
            return Err(InvalidArgument(format!(
                "cannot clear property {name} on its defining object"
            )));
        }
        prop.value = None;
        Ok(())
    }

    pub fn is_clear_property(
        &self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<bool, WorldStateError> {
        let prop = self.property_record(oref, name)?;
        Ok(!prop.defined_here && prop.value.is_none())
    }

    /// `add_property`: rejects collisions with records anywhere in the
    /// ancestry or the subtree. Builtin-name rejection is the kernel's.
    pub fn define_property(
        &mut self,
        oref: ObjectRef,
        name: Symbol,
        owner: Obj,
        flags: BitEnum<PropFlag>,
        value: Var,
    ) -> Result<(), WorldStateError> {
        let object = self.get(oref)?;
        if object.properties.contains_key(&name) {
            return Err(PropertyConflict(name.to_string()));
        }
        let mut subtree = vec![];
        if let Some(me) = oref.as_obj() {
            subtree = self.descendants(me)?;
        }
        for d in &subtree {
            if self.get(*d)?.properties.contains_key(&name) {
                return Err(PropertyConflict(name.to_string()));
            }
        }

        self.get_mut(oref)?.properties.insert(
            name.clone(),
            PropDef {
                owner,
                flags,
                value: Some(value),
                defined_here: true,
            },
        );
        for d in subtree {
            let downer = self.get(d)?.owner;
            let owner = if flags.contains(PropFlag::Chown) {
                downer
            } else {
                owner
            };
            self.get_mut(d)?.properties.insert(
                name.clone(),
                PropDef {
                    owner,
                    flags,
                    value: None,
                    defined_here: false,
                },
            );
        }
        Ok(())
    }

    pub fn delete_property(
        &mut self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<(), WorldStateError> {
        let prop = self.property_record(oref, name)?;
        if !prop.defined_here {
            return Err(PropertyNotFound(oref, name.to_string()));
        }
        self.get_mut(oref)?.properties.shift_remove(name);
        let mut subtree = vec![];
        if let Some(me) = oref.as_obj() {
            subtree = self.descendants(me)?;
        }
        for d in subtree {
            self.get_mut(d)?.properties.shift_remove(name);
        }
        Ok(())
    }

    /// Property names defined on this object itself, in definition order.
    pub fn defined_properties(&self, oref: ObjectRef) -> Result<Vec<Symbol>, WorldStateError> {
        let object = self.get(oref)?;
        Ok(object
            .properties
            .iter()
            .filter(|(_, p)| p.defined_here)
            .map(|(n, _)| n.clone())
            .collect())
    }

    // ------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------

    /// Breadth-first verb resolution: receiver first, then ancestors;
    /// within an object, verbs are scanned in definition order.
    pub fn resolve_verb(
        &self,
        oref: ObjectRef,
        name: &Symbol,
    ) -> Result<(ObjectRef, usize, VerbDef), WorldStateError> {
        for holder in self.lookup_chain(oref)? {
            let object = self.get(holder)?;
            for (i, verb) in object.verbs.iter().enumerate() {
                if verb.matches_name(name) {
                    return Ok((holder, i, verb.clone()));
                }
            }
        }
        Err(VerbNotFound(oref, name.to_string()))
    }

    /// `pass()`: resume the search strictly above `definer`.
    pub fn resolve_verb_above(
        &self,
        definer: ObjectRef,
        name: &Symbol,
    ) -> Result<(ObjectRef, usize, VerbDef), WorldStateError> {
        let object = self.get(definer)?;
        for ancestor in self.ancestors_of_parents(&object.parents) {
            let aobj = self.get(ancestor.into())?;
            for (i, verb) in aobj.verbs.iter().enumerate() {
                if verb.matches_name(name) {
                    return Ok((ancestor.into(), i, verb.clone()));
                }
            }
        }
        Err(VerbNotFound(definer, name.to_string()))
    }

    /// Find a verb on this object only (no inheritance), as the verb
    /// builtins address them: by name or by 1-based index.
    pub fn verbdef_at(
        &self,
        oref: ObjectRef,
        selector: &Var,
    ) -> Result<usize, WorldStateError> {
        let object = self.get(oref)?;
        match selector.variant() {
            Variant::Int(i) => {
                if *i < 1 || *i as usize > object.verbs.len() {
                    return Err(VerbNotFound(oref, i.to_string()));
                }
                Ok(*i as usize - 1)
            }
            Variant::Str(s) => {
                let name = Symbol::mk(s.as_str());
                object
                    .verbs
                    .iter()
                    .position(|v| v.matches_name(&name))
                    .ok_or_else(|| VerbNotFound(oref, name.to_string()))
            }
            _ => Err(InvalidArgument("verb selector must be a string or index".into())),
        }
    }

    pub fn add_verb(&mut self, oref: ObjectRef, verb: VerbDef) -> Result<usize, WorldStateError> {
        let object = self.get_mut(oref)?;
        object.verbs.push(verb);
        Ok(object.verbs.len())
    }

    pub fn delete_verb(&mut self, oref: ObjectRef, index: usize) -> Result<(), WorldStateError> {
        let object = self.get_mut(oref)?;
        if index >= object.verbs.len() {
            return Err(VerbNotFound(oref, (index + 1).to_string()));
        }
        object.verbs.remove(index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------

    /// The containment-cycle check for `move()`: moving `what` into `into`
    /// must not make `what` (transitively) contain itself.
    pub fn check_move(&self, what: Obj, into: Obj) -> Result<(), WorldStateError> {
        if into == NOTHING {
            return Ok(());
        }
        let mut cursor = into;
        loop {
            if cursor == what {
                return Err(Recursive(what.into()));
            }
            let Ok(obj) = self.get(cursor.into()) else {
                break;
            };
            if obj.location == NOTHING {
                break;
            }
            cursor = obj.location;
        }
        Ok(())
    }

    /// Relocate without hooks; `move()`'s accept/exitfunc/enterfunc
    /// choreography happens in the kernel.
    pub fn set_location_raw(&mut self, what: Obj, into: Obj) -> Result<(), WorldStateError> {
        let old = self.get(what.into())?.location;
        if old != NOTHING {
            if let Ok(old_loc) = self.get_mut(old.into()) {
                old_loc.contents.retain(|c| *c != what);
            }
        }
        self.get_mut(what.into())?.location = into;
        if into != NOTHING {
            self.get_mut(into.into())?.contents.push(what);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Anonymous object collection
    // ------------------------------------------------------------------

    /// Mark/sweep the anonymous table. Roots are every named object's
    /// property values plus whatever extra roots the kernel hands in (task
    /// environments, connection state). Returns (live, collected).
    pub fn collect_anonymous(&mut self, extra_roots: &[Var]) -> (usize, usize) {
        let mut marked: HashSet<u64> = HashSet::new();
        let mut pending: Vec<u64> = vec![];

        let mut scan = |v: &Var, pending: &mut Vec<u64>| {
            collect_anon_handles(v, pending);
        };
        for object in self.objects.iter().flatten() {
            for prop in object.properties.values() {
                if let Some(v) = &prop.value {
                    scan(v, &mut pending);
                }
            }
        }
        for v in extra_roots {
            scan(v, &mut pending);
        }

        while let Some(h) = pending.pop() {
            if !marked.insert(h) {
                continue;
            }
            if let Some(anon) = self.anons.get(&h) {
                for prop in anon.properties.values() {
                    if let Some(v) = &prop.value {
                        collect_anon_handles(v, &mut pending);
                    }
                }
            }
        }

        let before = self.anons.len();
        self.anons.retain(|h, _| marked.contains(h));
        let live = self.anons.len();
        (live, before - live)
    }

    pub fn anonymous_count(&self) -> usize {
        self.anons.len()
    }
}

fn collect_anon_handles(v: &Var, out: &mut Vec<u64>) {
    match v.variant() {
        Variant::Anon(a) => out.push(a.handle()),
        Variant::List(l) => {
            for item in l.iter() {
                collect_anon_handles(item, out);
            }
        }
        Variant::Map(m) => {
            for (k, val) in m.iter() {
                collect_anon_handles(k, out);
                collect_anon_handles(val, out);
            }
        }
        Variant::Waif(w) => {
            for (_, val) in w.slots() {
                collect_anon_handles(val, out);
            }
        }
        Variant::Err(e) => {
            if let Some(val) = &e.value {
                collect_anon_handles(val, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::VerbFlag;
    use crate::object::VerbArgsSpec;
    use corral_var::{v_int, v_str};

    impl WorldState {
        fn create_object_simple(&mut self, parents: &[Obj], owner: Obj) -> Obj {
            self.create_object(parents, owner, false)
                .unwrap()
                .as_obj()
                .unwrap()
        }
    }

    #[test]
    fn test_create_and_valid() {
        let mut ws = WorldState::new();
        let a = ws.create_object_simple(&[], NOTHING);
        assert!(ws.valid(a.into()));
        assert!(!ws.valid(Obj::mk_id(99).into()));
        assert!(!ws.valid(NOTHING.into()));
        assert_eq!(ws.max_object(), a);
    }

    #[test]
    fn test_recycled_id_never_reused() {
        let mut ws = WorldState::new();
        let a = ws.create_object_simple(&[], NOTHING);
        let _b = ws.create_object_simple(&[], NOTHING);
        ws.destroy_object(a.into()).unwrap();
        assert!(!ws.valid(a.into()));
        let c = ws.create_object_simple(&[], NOTHING);
        assert_ne!(c, a);
        assert_eq!(c.id(), 2);
    }

    #[test]
    fn test_bfs_ancestor_order() {
        // obj with parents {A, B}, where A's ancestor is X, B's is Y:
        // search order must be A, B, X, Y.
        let mut ws = WorldState::new();
        let x = ws.create_object_simple(&[], NOTHING);
        let y = ws.create_object_simple(&[], NOTHING);
        let a = ws.create_object_simple(&[x], NOTHING);
        let b = ws.create_object_simple(&[y], NOTHING);
        let obj = ws.create_object_simple(&[a, b], NOTHING);
        assert_eq!(ws.ancestors(obj).unwrap(), vec![a, b, x, y]);
    }

    #[test]
    fn test_property_inheritance_and_clear() {
        let mut ws = WorldState::new();
        let parent = ws.create_object_simple(&[], NOTHING);
        let name = Symbol::mk("color");
        ws.define_property(
            parent.into(),
            name.clone(),
            NOTHING,
            BitEnum::new_with(PropFlag::Read),
            v_str("red"),
        )
        .unwrap();
        let child = ws.create_object_simple(&[parent], NOTHING);

        // Child's slot is clear and resolves to the parent's value.
        assert!(ws.is_clear_property(child.into(), &name).unwrap());
        assert_eq!(ws.resolve_property(child.into(), &name).unwrap(), v_str("red"));

        // Override, then clear again.
        ws.set_property_value(child.into(), &name, v_str("blue"))
            .unwrap();
        assert_eq!(
            ws.resolve_property(child.into(), &name).unwrap(),
            v_str("blue")
        );
        ws.clear_property(child.into(), &name).unwrap();
        assert_eq!(ws.resolve_property(child.into(), &name).unwrap(), v_str("red"));

        // Clearing on the definer is an error.
        assert!(matches!(
            ws.clear_property(parent.into(), &name),
            Err(InvalidArgument(_))
        ));
    }

    #[test]
    fn test_chparent_conflict() {
        let mut ws = WorldState::new();
        let a = ws.create_object_simple(&[], NOTHING);
        let b = ws.create_object_simple(&[], NOTHING);
        let name = Symbol::mk("foo");
        ws.define_property(
            a.into(),
            name.clone(),
            NOTHING,
            BitEnum::new(),
            v_int(1),
        )
        .unwrap();
        ws.define_property(b.into(), name, NOTHING, BitEnum::new(), v_int(2))
            .unwrap();
        assert!(matches!(
            ws.chparent(a.into(), &[b]),
            Err(PropertyConflict(_))
        ));
    }

    #[test]
    fn test_chparent_cycle() {
        let mut ws = WorldState::new();
        let a = ws.create_object_simple(&[], NOTHING);
        let b = ws.create_object_simple(&[a], NOTHING);
        assert!(matches!(ws.chparent(a.into(), &[b]), Err(Recursive(_))));
    }

    #[test]
    fn test_chparent_resets_inherited_overrides() {
        let mut ws = WorldState::new();
        let p1 = ws.create_object_simple(&[], NOTHING);
        let p2 = ws.create_object_simple(&[], NOTHING);
        let name = Symbol::mk("size");
        ws.define_property(
            p1.into(),
            name.clone(),
            NOTHING,
            BitEnum::new(),
            v_int(10),
        )
        .unwrap();
        let child = ws.create_object_simple(&[p1], NOTHING);
        ws.set_property_value(child.into(), &name, v_int(99)).unwrap();

        ws.chparent(child.into(), &[p2]).unwrap();
        // The inherited record is gone entirely now.
        assert!(matches!(
            ws.resolve_property(child.into(), &name),
            Err(PropertyNotFound(_, _))
        ));
    }

    #[test]
    fn test_verb_resolution_bfs() {
        let mut ws = WorldState::new();
        let grandparent = ws.create_object_simple(&[], NOTHING);
        let parent = ws.create_object_simple(&[grandparent], NOTHING);
        let child = ws.create_object_simple(&[parent], NOTHING);

        let mk_verb = |name: &str| VerbDef {
            names: vec![Symbol::mk(name)],
            owner: NOTHING,
            flags: BitEnum::new_with(VerbFlag::Exec),
            args: VerbArgsSpec::this_none_this(),
            program: None,
        };
        ws.add_verb(grandparent.into(), mk_verb("look")).unwrap();
        ws.add_verb(parent.into(), mk_verb("look")).unwrap();

        let (definer, _, _) = ws
            .resolve_verb(child.into(), &Symbol::mk("look"))
            .unwrap();
        assert_eq!(definer.as_obj(), Some(parent));

        // pass() resumes above the found definer.
        let (above, _, _) = ws
            .resolve_verb_above(definer, &Symbol::mk("look"))
            .unwrap();
        assert_eq!(above.as_obj(), Some(grandparent));
    }

    #[test]
    fn test_wildcard_verb_resolution() {
        let mut ws = WorldState::new();
        let obj = ws.create_object_simple(&[], NOTHING);
        ws.add_verb(
            obj.into(),
            VerbDef {
                names: vec![Symbol::mk("get_conj*ugation")],
                owner: NOTHING,
                flags: BitEnum::new_with(VerbFlag::Exec),
                args: VerbArgsSpec::this_none_this(),
                program: None,
            },
        )
        .unwrap();
        assert!(ws.resolve_verb(obj.into(), &Symbol::mk("get_conj")).is_ok());
        assert!(
            ws.resolve_verb(obj.into(), &Symbol::mk("get_con"))
                .is_err()
        );
    }

    #[test]
    fn test_move_cycle_check() {
        let mut ws = WorldState::new();
        let box_ = ws.create_object_simple(&[], NOTHING);
        let bag = ws.create_object_simple(&[], NOTHING);
        ws.set_location_raw(bag, box_).unwrap();
        assert!(ws.check_move(box_, bag).is_err());
        assert!(ws.check_move(bag, NOTHING).is_ok());
        assert_eq!(ws.get(box_.into()).unwrap().contents, vec![bag]);
    }

    #[test]
    fn test_destroy_leaves_no_ghost_in_contents() {
        let mut ws = WorldState::new();
        let room = ws.create_object_simple(&[], NOTHING);
        let thing = ws.create_object_simple(&[], NOTHING);
        let trinket = ws.create_object_simple(&[], NOTHING);
        ws.set_location_raw(thing, room).unwrap();
        ws.set_location_raw(trinket, thing).unwrap();

        ws.destroy_object(thing.into()).unwrap();
        // The room's contents no longer mention the dead id, and the
        // destroyed object's own contents were evicted to $nothing.
        assert!(ws.get(room.into()).unwrap().contents.is_empty());
        assert_eq!(ws.get(trinket.into()).unwrap().location, NOTHING);
    }

    #[test]
    fn test_anonymous_gc() {
        let mut ws = WorldState::new();
        let holder = ws.create_object_simple(&[], NOTHING);
        let anon = ws.create_object(&[], NOTHING, true).unwrap();
        let ObjectRef::Anon(a) = anon else {
            panic!("expected anon handle");
        };
        let name = Symbol::mk("keeper");
        ws.define_property(
            holder.into(),
            name.clone(),
            NOTHING,
            BitEnum::new(),
            corral_var::v_anon(a),
        )
        .unwrap();

        // Rooted through the property: survives.
        let (live, collected) = ws.collect_anonymous(&[]);
        assert_eq!((live, collected), (1, 0));

        // Drop the root: collected.
        ws.set_property_value(holder.into(), &name, v_int(0)).unwrap();
        let (live, collected) = ws.collect_anonymous(&[]);
        assert_eq!((live, collected), (0, 1));
        assert!(!ws.valid(anon));
    }
}
