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

/// Verb name pattern matching. A pattern may carry one `*` marking the
/// minimum abbreviation: `g*et_conjugation` style patterns match every
/// candidate that extends the prefix and is itself a prefix of the full
/// word. A bare `*` matches anything. Comparison is ASCII-case-insensitive.
pub fn verbname_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let candidate = candidate.to_ascii_lowercase();

    match pattern.split_once('*') {
        None => pattern == candidate,
        Some(("", "")) => true,
        Some((prefix, rest)) => {
            let full = format!("{prefix}{rest}");
            candidate.len() >= prefix.len()
                && candidate.starts_with(prefix)
                && full.starts_with(&candidate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(verbname_match("look", "look"));
        assert!(verbname_match("look", "LOOK"));
        assert!(!verbname_match("look", "loo"));
        assert!(!verbname_match("look", "looks"));
    }

    #[test]
    fn test_star_matches_all() {
        assert!(verbname_match("*", "anything"));
        assert!(verbname_match("*", ""));
    }

    #[test]
    fn test_abbreviation_range() {
        // get_conj*ugation matches every prefix of get_conjugation that is
        // at least as long as get_conj, and nothing else.
        let pat = "get_conj*ugation";
        assert!(verbname_match(pat, "get_conj"));
        assert!(verbname_match(pat, "get_conju"));
        assert!(verbname_match(pat, "get_conjugation"));
        assert!(!verbname_match(pat, "get_con"));
        assert!(!verbname_match(pat, "get_conjugations"));
        assert!(!verbname_match(pat, "get_conjx"));
    }

    #[test]
    fn test_full_wildcard_property() {
        // A*B matches every s with A a prefix of s and s a prefix of A+B.
        let pat = "foo*bar";
        for i in 0..=3 {
            let s = format!("foo{}", &"bar"[..i]);
            assert!(verbname_match(pat, &s), "expected {s} to match");
        }
        assert!(!verbname_match(pat, "fo"));
        assert!(!verbname_match(pat, "foobarx"));
    }
}
