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

//! Command-line parsing: words and quoting, the say/emote sugar, the
//! preposition split, and object matching against the player's
//! surroundings.

use crate::tasks::prepositions::match_preposition;
use corral_db::{ArgSpec, ObjectRef, PrepSpec, VerbDef, WorldState};
use corral_var::{AMBIGUOUS, FAILED_MATCH, NOTHING, Obj, Symbol, Var, Variant, v_str};

#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub verb: Symbol,
    pub argstr: String,
    pub args: Vec<Var>,
    pub dobjstr: String,
    pub dobj: Option<Obj>,
    pub prepstr: String,
    pub prep: Option<u16>,
    pub iobjstr: String,
    pub iobj: Option<Obj>,
}

/// Split a command into words: spaces separate, double quotes group,
/// backslash escapes.
pub fn parse_into_words(input: &str) -> Vec<String> {
    let mut words = vec![];
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// The classic input sugar: a leading `"` is `say`, a leading `:` is
/// `emote`.
pub fn expand_command_aliases(line: &str) -> String {
    if let Some(rest) = line.strip_prefix('"') {
        format!("say {rest}")
    } else if let Some(rest) = line.strip_prefix(':') {
        format!("emote {rest}")
    } else {
        line.to_string()
    }
}

/// Break a command into verb / dobj / prep / iobj without consulting the
/// store; object matching happens separately.
pub fn parse_command(line: &str) -> Option<ParsedCommand> {
    let line = expand_command_aliases(line.trim());
    let words = parse_into_words(&line);
    let (verb_word, rest) = words.split_first()?;

    let argstr = line
        .trim_start()
        .strip_prefix(verb_word.as_str())
        .unwrap_or("")
        .trim_start()
        .to_string();

    let rest: Vec<String> = rest.to_vec();
    let mut prep = None;
    let mut prepstr = String::new();
    let mut dobj_words = rest.as_slice();
    let mut iobj_words: &[String] = &[];
    for at in 0..rest.len() {
        if let Some((index, consumed)) = match_preposition(&rest, at) {
            prep = Some(index);
            prepstr = rest[at..at + consumed].join(" ");
            dobj_words = &rest[..at];
            iobj_words = &rest[at + consumed..];
            break;
        }
    }

    Some(ParsedCommand {
        verb: Symbol::mk(verb_word),
        argstr,
        args: rest.iter().map(|w| v_str(w)).collect(),
        dobjstr: dobj_words.join(" "),
        dobj: None,
        prepstr,
        prep,
        iobjstr: iobj_words.join(" "),
        iobj: None,
    })
}

/// Match an object-naming string against the player's surroundings:
/// `me`, `here`, `#id`, or name/alias prefixes of the player's and the
/// room's contents.
pub fn match_object(ws: &WorldState, player: Obj, s: &str) -> Obj {
    let s = s.trim();
    if s.is_empty() {
        return NOTHING;
    }
    if s.eq_ignore_ascii_case("me") {
        return player;
    }
    let location = ws
        .get(player.into())
        .map(|p| p.location)
        .unwrap_or(NOTHING);
    if s.eq_ignore_ascii_case("here") {
        return location;
    }
    if let Some(digits) = s.strip_prefix('#') {
        if let Ok(id) = digits.parse::<i64>() {
            return Obj::mk_id(id);
        }
    }

    let mut candidates = vec![player];
    if location != NOTHING {
        candidates.push(location);
    }
    if let Ok(p) = ws.get(player.into()) {
        candidates.extend(p.contents.iter().copied());
    }
    if location != NOTHING {
        if let Ok(l) = ws.get(location.into()) {
            candidates.extend(l.contents.iter().copied());
        }
    }

    let mut exact = vec![];
    let mut partial = vec![];
    for candidate in candidates {
        let Ok(obj) = ws.get(candidate.into()) else {
            continue;
        };
        let mut names = vec![obj.name.clone()];
        if let Ok(aliases) = ws.resolve_property(candidate.into(), &Symbol::mk("aliases")) {
            if let Variant::List(aliases) = aliases.variant() {
                for a in aliases.iter() {
                    if let Variant::Str(a) = a.variant() {
                        names.push(a.as_str().to_string());
                    }
                }
            }
        }
        for name in names {
            if name.eq_ignore_ascii_case(s) {
                exact.push(candidate);
                break;
            }
            if name.len() > s.len() && name[..s.len()].eq_ignore_ascii_case(s) {
                partial.push(candidate);
                break;
            }
        }
    }

    match (exact.len(), partial.len()) {
        (1, _) => exact[0],
        (0, 1) => partial[0],
        (0, 0) => FAILED_MATCH,
        _ => AMBIGUOUS,
    }
}

fn argspec_matches(spec: ArgSpec, target: Obj, found: Option<Obj>, s: &str) -> bool {
    match spec {
        ArgSpec::Any => true,
        ArgSpec::None => s.is_empty(),
        ArgSpec::This => found == Some(target),
    }
}

fn prepspec_matches(spec: PrepSpec, found: Option<u16>) -> bool {
    match spec {
        PrepSpec::Any => true,
        PrepSpec::None => found.is_none(),
        PrepSpec::Other(index) => found == Some(index),
    }
}

/// Find the verb a command dispatches to: search player, location, dobj,
/// iobj in order, walking each one's inheritance chain, verbs in
/// definition order, argspecs consulted.
pub fn find_command_verb(
    ws: &WorldState,
    player: Obj,
    pc: &ParsedCommand,
) -> Option<(Obj, ObjectRef, usize, VerbDef)> {
    let location = ws
        .get(player.into())
        .map(|p| p.location)
        .unwrap_or(NOTHING);
    let mut targets = vec![player];
    if location != NOTHING {
        targets.push(location);
    }
    if let Some(dobj) = pc.dobj {
        if dobj.is_positive() {
            targets.push(dobj);
        }
    }
    if let Some(iobj) = pc.iobj {
        if iobj.is_positive() {
            targets.push(iobj);
        }
    }

    for target in targets {
        if !ws.valid(target.into()) {
            continue;
        }
        // Walk the whole inheritance chain, because a same-named verb
        // higher up may carry the argspec that actually matches.
        let mut chain: Vec<Obj> = vec![target];
        chain.extend(ws.ancestors(target).unwrap_or_default());
        for holder in chain {
            let Ok(obj) = ws.get(holder.into()) else {
                continue;
            };
            for (index, verbdef) in obj.verbs.iter().enumerate() {
                if verbdef.matches_name(&pc.verb)
                    && argspec_matches(verbdef.args.dobj, target, pc.dobj, &pc.dobjstr)
                    && prepspec_matches(verbdef.args.prep, pc.prep)
                    && argspec_matches(verbdef.args.iobj, target, pc.iobj, &pc.iobjstr)
                {
                    return Some((target, holder.into(), index, verbdef.clone()));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_and_quotes() {
        assert_eq!(
            parse_into_words(r#"put "red ball" in box"#),
            vec!["put", "red ball", "in", "box"]
        );
    }

    #[test]
    fn test_say_sugar() {
        assert_eq!(expand_command_aliases("\"hello there"), "say hello there");
        assert_eq!(expand_command_aliases(":grins"), "emote grins");
    }

    #[test]
    fn test_preposition_split() {
        let pc = parse_command("put ball in box").unwrap();
        assert_eq!(pc.verb, Symbol::mk("put"));
        assert_eq!(pc.dobjstr, "ball");
        assert_eq!(pc.prepstr, "in");
        assert_eq!(pc.iobjstr, "box");
        assert_eq!(pc.argstr, "ball in box");
    }

    #[test]
    fn test_no_preposition() {
        let pc = parse_command("look sword").unwrap();
        assert_eq!(pc.dobjstr, "sword");
        assert!(pc.prep.is_none());
        assert_eq!(pc.iobjstr, "");
    }
}
