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

//! The emergency minimal core: what a fresh server gets when asked to run
//! without an existing database. Three objects — the system object, a
//! room, and a wizard — wired up just enough that a connection can log in
//! and evaluate code.

use corral_compiler::compile;
use corral_db::{
    BitEnum, ObjFlag, ObjectRef, VerbArgsSpec, VerbDef, VerbFlag, WorldState,
};
use corral_var::{NOTHING, Obj, SYSTEM_OBJECT, Symbol};
use tracing::info;

const WIZARD: Obj = Obj::mk_id(2);

fn system_verb(world: &mut WorldState, name: &str, source: &str) {
    let program = compile(source).expect("bootstrap verb must compile");
    world
        .add_verb(
            ObjectRef::Obj(SYSTEM_OBJECT),
            VerbDef {
                names: vec![Symbol::mk(name)],
                owner: WIZARD,
                flags: BitEnum::new_with(VerbFlag::Exec).with(VerbFlag::Read),
                args: VerbArgsSpec::this_none_this(),
                program: Some(program),
            },
        )
        .expect("bootstrap verb add");
}

/// Build the three-object world: `#0` system object, `#1` the first room,
/// `#2` the wizard. Everyone who connects logs in as the wizard; a real
/// core replaces `#0:do_login_command` with something stricter.
pub fn minimal_core() -> WorldState {
    let mut world = WorldState::new();

    let system = world
        .create_object(&[], NOTHING, false)
        .expect("create #0");
    let room = world.create_object(&[], NOTHING, false).expect("create #1");
    let wizard = world.create_object(&[], NOTHING, false).expect("create #2");
    debug_assert_eq!(system.as_obj(), Some(SYSTEM_OBJECT));
    debug_assert_eq!(wizard.as_obj(), Some(WIZARD));

    {
        let obj = world.get_mut(system).expect("#0");
        obj.name = "System Object".to_string();
        obj.owner = WIZARD;
        obj.flags.set(ObjFlag::Read);
    }
    {
        let obj = world.get_mut(room).expect("#1");
        obj.name = "The First Room".to_string();
        obj.owner = WIZARD;
        obj.flags.set(ObjFlag::Read);
    }
    {
        let obj = world.get_mut(wizard).expect("#2");
        obj.name = "Wizard".to_string();
        obj.owner = WIZARD;
        obj.flags.set(ObjFlag::User);
        obj.flags.set(ObjFlag::Wizard);
        obj.flags.set(ObjFlag::Programmer);
        obj.flags.set(ObjFlag::Read);
    }
    world
        .set_location_raw(WIZARD, Obj::mk_id(1))
        .expect("move wizard to the first room");

    system_verb(
        &mut world,
        "do_login_command",
        "return #2;\n",
    );
    system_verb(
        &mut world,
        "user_connected",
        "notify(args[1], \"*** Connected. You are the wizard. ***\");\n",
    );
    system_verb(
        &mut world,
        "user_reconnected",
        "notify(args[1], \"*** Reconnected. ***\");\n",
    );
    system_verb(&mut world, "user_disconnected", "return 0;\n");

    info!("Bootstrapped minimal core: #0 system, #1 room, #2 wizard");
    world
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_core_shape() {
        let world = minimal_core();
        assert!(world.valid(ObjectRef::Obj(SYSTEM_OBJECT)));
        assert!(world.valid(ObjectRef::Obj(WIZARD)));
        assert!(world.get(ObjectRef::Obj(WIZARD)).unwrap().is_wizard());
        assert!(
            world
                .resolve_verb(ObjectRef::Obj(SYSTEM_OBJECT), &Symbol::mk("do_login_command"))
                .is_ok()
        );
        assert_eq!(
            world.get(ObjectRef::Obj(WIZARD)).unwrap().location,
            Obj::mk_id(1)
        );
    }
}
