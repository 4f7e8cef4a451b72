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

use corral_db::PrepSpec;

/// The fixed preposition table. Indexes are stable; verb argspecs store
/// them, and `add_verb`/`set_verb_args` validate against this list.
pub const PREPOSITIONS: &[&[&str]] = &[
    &["with", "using"],
    &["at", "to"],
    &["in front of"],
    &["in", "inside", "into"],
    &["on top of", "on", "onto", "upon"],
    &["out of", "from inside", "from"],
    &["over"],
    &["through"],
    &["under", "underneath", "beneath"],
    &["behind"],
    &["beside"],
    &["for", "about"],
    &["is"],
    &["as"],
    &["off", "off of"],
];

/// Match one-or-more command words against the table; multi-word
/// prepositions are matched greedily. Returns (index, words consumed).
pub fn match_preposition(words: &[String], at: usize) -> Option<(u16, usize)> {
    let mut best: Option<(u16, usize)> = None;
    for (index, aliases) in PREPOSITIONS.iter().enumerate() {
        for alias in *aliases {
            let parts: Vec<&str> = alias.split(' ').collect();
            if at + parts.len() > words.len() {
                continue;
            }
            let matches = parts
                .iter()
                .enumerate()
                .all(|(i, p)| words[at + i].eq_ignore_ascii_case(p));
            if matches {
                let consumed = parts.len();
                if best.map(|(_, c)| consumed > c).unwrap_or(true) {
                    best = Some((index as u16, consumed));
                }
            }
        }
    }
    best
}

/// Parse a prep specifier as `add_verb`/`set_verb_args` accept it: "none",
/// "any", an alias, or the slash-joined alias form.
pub fn parse_prep_spec(s: &str) -> Option<PrepSpec> {
    match s.to_lowercase().as_str() {
        "none" => return Some(PrepSpec::None),
        "any" => return Some(PrepSpec::Any),
        _ => {}
    }
    for (index, aliases) in PREPOSITIONS.iter().enumerate() {
        if aliases.join("/").eq_ignore_ascii_case(s) {
            return Some(PrepSpec::Other(index as u16));
        }
        for alias in *aliases {
            if alias.eq_ignore_ascii_case(s) {
                return Some(PrepSpec::Other(index as u16));
            }
        }
    }
    None
}

pub fn prep_spec_string(spec: PrepSpec) -> String {
    match spec {
        PrepSpec::None => "none".to_string(),
        PrepSpec::Any => "any".to_string(),
        PrepSpec::Other(index) => PREPOSITIONS
            .get(index as usize)
            .map(|aliases| aliases.join("/"))
            .unwrap_or_else(|| "none".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(parse_prep_spec("with"), Some(PrepSpec::Other(0)));
        assert_eq!(parse_prep_spec("using"), Some(PrepSpec::Other(0)));
        assert_eq!(parse_prep_spec("with/using"), Some(PrepSpec::Other(0)));
        assert_eq!(parse_prep_spec("none"), Some(PrepSpec::None));
        assert_eq!(parse_prep_spec("sideways"), None);
    }

    #[test]
    fn test_multiword_greedy() {
        let words: Vec<String> = ["put", "it", "on", "top", "of", "shelf"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // At position 2, "on top of" wins over "on".
        assert_eq!(match_preposition(&words, 2), Some((4, 3)));
    }
}
