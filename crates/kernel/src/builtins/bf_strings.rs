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

use crate::builtins::{BfCallState, BfErr, BfRet, BuiltinFunction, e_invarg};
use crate::config::server_options;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use corral_var::ErrorCode::{E_QUOTA, E_TYPE};
use corral_var::{Symbol, Var, Variant, v_int, v_list, v_list_iter, v_str, v_string};
use md5::{Digest, Md5};
use rand::Rng;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;

pub(crate) fn check_str_quota(s: &str) -> Result<(), BfErr> {
    let limit = server_options().max_string_concat;
    if limit > 0 && s.len() as i64 > limit {
        return Err(BfErr::ErrValue(E_QUOTA.msg("string too long")));
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Pattern matching. Patterns are literal text in which `%` escapes the
// following character (`%d` is a literal `d`, `%%` a literal `%`); matching
// is a substring search. The nine capture slots exist for template
// compatibility and are always unused.
// ----------------------------------------------------------------------

fn unescape_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Find `pattern` in `subject`; 1-based inclusive character span, or None.
fn find_span(
    subject: &str,
    pattern: &str,
    case_matters: bool,
    from_end: bool,
) -> Option<(usize, usize)> {
    let needle = unescape_pattern(pattern);
    let (hay, needle_folded) = if case_matters {
        (subject.to_string(), needle.clone())
    } else {
        (subject.to_lowercase(), needle.to_lowercase())
    };
    if needle_folded.is_empty() {
        // The empty pattern matches at the start (or end for rmatch).
        let pos = if from_end { subject.chars().count() + 1 } else { 1 };
        return Some((pos, pos - 1));
    }
    let byte_pos = if from_end {
        hay.rfind(&needle_folded)?
    } else {
        hay.find(&needle_folded)?
    };
    // Convert byte offsets to 1-based character positions.
    let start = hay[..byte_pos].chars().count() + 1;
    let len = needle_folded.chars().count();
    Some((start, start + len - 1))
}

fn match_result(subject: &str, span: Option<(usize, usize)>) -> Var {
    match span {
        None => v_list(&[]),
        Some((start, end)) => {
            let captures: Vec<Var> =
                (0..9).map(|_| v_list(&[v_int(0), v_int(-1)])).collect();
            v_list(&[
                v_int(start as i64),
                v_int(end as i64),
                v_list_iter(captures),
                v_str(subject),
            ])
        }
    }
}

fn bf_match(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let subject = bf_args.str_arg(0)?;
    let pattern = bf_args.str_arg(1)?;
    let case_matters = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let span = find_span(&subject, &pattern, case_matters, false);
    Ok(BfRet::Ret(match_result(&subject, span)))
}

fn bf_rmatch(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let subject = bf_args.str_arg(0)?;
    let pattern = bf_args.str_arg(1)?;
    let case_matters = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let span = find_span(&subject, &pattern, case_matters, true);
    Ok(BfRet::Ret(match_result(&subject, span)))
}

/// `substitute(template, match_result)`: `%0` is the matched span, `%1`
/// through `%9` the capture spans, `%%` a literal percent.
fn bf_substitute(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let template = bf_args.str_arg(0)?;
    let Variant::List(match_res) = bf_args.arg(1)?.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    if match_res.len() != 4 {
        return Err(e_invarg("substitute() needs a match() result"));
    }
    let start = match_res.index(1).map_err(BfErr::ErrValue)?.as_integer().map_err(BfErr::ErrValue)?;
    let end = match_res.index(2).map_err(BfErr::ErrValue)?.as_integer().map_err(BfErr::ErrValue)?;
    let captures = match_res.index(3).map_err(BfErr::ErrValue)?;
    let subject = match_res.index(4).map_err(BfErr::ErrValue)?;
    let subject = subject.as_string().map_err(BfErr::ErrValue)?;
    let subject_chars: Vec<char> = subject.chars().collect();

    let span_text = |s: i64, e: i64| -> Result<String, BfErr> {
        if s < 1 || e < s {
            return Ok(String::new());
        }
        if e as usize > subject_chars.len() {
            return Err(e_invarg("match span out of range"));
        }
        Ok(subject_chars[s as usize - 1..e as usize].iter().collect())
    };

    let mut out = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('0') => out.push_str(&span_text(start, end)?),
            Some(d @ '1'..='9') => {
                let i = d.to_digit(10).unwrap() as i64;
                let pair = captures.index(&v_int(i)).map_err(BfErr::ErrValue)?;
                let s = pair.index(&v_int(1)).map_err(BfErr::ErrValue)?;
                let e = pair.index(&v_int(2)).map_err(BfErr::ErrValue)?;
                out.push_str(&span_text(
                    s.as_integer().map_err(BfErr::ErrValue)?,
                    e.as_integer().map_err(BfErr::ErrValue)?,
                )?);
            }
            _ => return Err(e_invarg("bad substitution in template")),
        }
    }
    check_str_quota(&out)?;
    Ok(BfRet::Ret(v_string(out)))
}

// ----------------------------------------------------------------------
// Plain string functions
// ----------------------------------------------------------------------

fn bf_strsub(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(3..=4)?;
    let subject = bf_args.str_arg(0)?;
    let what = bf_args.str_arg(1)?;
    let with = bf_args.str_arg(2)?;
    let case_matters = bf_args.args.get(3).map(|v| v.is_true()).unwrap_or(false);
    if what.is_empty() {
        return Err(e_invarg("strsub() of the empty string"));
    }

    let mut out = String::new();
    let mut rest = subject.as_str();
    loop {
        let found = if case_matters {
            rest.find(&what)
        } else {
            rest.to_lowercase().find(&what.to_lowercase())
        };
        match found {
            Some(i) => {
                out.push_str(&rest[..i]);
                out.push_str(&with);
                rest = &rest[i + what.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    check_str_quota(&out)?;
    Ok(BfRet::Ret(v_string(out)))
}

fn bf_index(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let subject = bf_args.str_arg(0)?;
    let what = bf_args.str_arg(1)?;
    let case_matters = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let span = find_span(&subject, &escape_literal(&what), case_matters, false);
    Ok(BfRet::Ret(v_int(span.map(|(s, _)| s as i64).unwrap_or(0))))
}

fn bf_rindex(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let subject = bf_args.str_arg(0)?;
    let what = bf_args.str_arg(1)?;
    let case_matters = bf_args.args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let span = find_span(&subject, &escape_literal(&what), case_matters, true);
    Ok(BfRet::Ret(v_int(span.map(|(s, _)| s as i64).unwrap_or(0))))
}

/// Protect literal text from `%` interpretation when reusing find_span.
fn escape_literal(s: &str) -> String {
    s.replace('%', "%%")
}

fn bf_strcmp(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let a = bf_args.str_arg(0)?;
    let b = bf_args.str_arg(1)?;
    Ok(BfRet::Ret(v_int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })))
}

fn bf_explode(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let subject = bf_args.str_arg(0)?;
    let sep = match bf_args.args.get(1) {
        Some(_) => bf_args.str_arg(1)?,
        None => " ".to_string(),
    };
    if sep.is_empty() {
        return Err(e_invarg("explode() needs a non-empty separator"));
    }
    let parts: Vec<Var> = subject
        .split(&sep)
        .filter(|p| !p.is_empty())
        .map(v_str)
        .collect();
    Ok(BfRet::Ret(v_list_iter(parts)))
}

fn bf_implode(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let Variant::List(l) = bf_args.arg(0)?.variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let sep = match bf_args.args.get(1) {
        Some(_) => bf_args.str_arg(1)?,
        None => " ".to_string(),
    };
    let mut parts = Vec::with_capacity(l.len());
    for item in l.iter() {
        parts.push(item.as_string().map_err(BfErr::ErrValue)?.to_string());
    }
    let out = parts.join(&sep);
    check_str_quota(&out)?;
    Ok(BfRet::Ret(v_string(out)))
}

// ----------------------------------------------------------------------
// Binary strings: printable ASCII stays, everything else is `~XX`.
// ----------------------------------------------------------------------

pub(crate) fn encode_binary_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for b in bytes {
        let c = *b as char;
        if *b == b'~' {
            out.push_str("~7E");
        } else if (b' '..=b'~').contains(b) {
            out.push(c);
        } else {
            out.push_str(&format!("~{b:02X}"));
        }
    }
    out
}

pub(crate) fn decode_binary_string(s: &str) -> Result<Vec<u8>, BfErr> {
    let mut out = vec![];
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'~' {
            if i + 2 >= bytes.len() {
                return Err(e_invarg("truncated binary escape"));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|_| e_invarg("bad binary escape"))?;
            let b = u8::from_str_radix(hex, 16).map_err(|_| e_invarg("bad binary escape"))?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn bf_encode_binary(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    let mut bytes = vec![];
    fn push_value(v: &Var, bytes: &mut Vec<u8>) -> Result<(), BfErr> {
        match v.variant() {
            Variant::Int(i) => {
                if !(0..=255).contains(i) {
                    return Err(e_invarg("byte value out of range"));
                }
                bytes.push(*i as u8);
            }
            Variant::Str(s) => bytes.extend_from_slice(s.as_str().as_bytes()),
            Variant::List(l) => {
                for item in l.iter() {
                    push_value(item, bytes)?;
                }
            }
            _ => return Err(BfErr::Code(E_TYPE)),
        }
        Ok(())
    }
    for arg in &bf_args.args {
        push_value(arg, &mut bytes)?;
    }
    let encoded = encode_binary_string(&bytes);
    check_str_quota(&encoded)?;
    Ok(BfRet::Ret(v_string(encoded)))
}

fn bf_decode_binary(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let s = bf_args.str_arg(0)?;
    let fully = bf_args.args.get(1).map(|v| v.is_true()).unwrap_or(false);
    let bytes = decode_binary_string(&s)?;

    let result = if fully {
        v_list_iter(bytes.iter().map(|b| v_int(*b as i64)))
    } else {
        // Runs of printable text come back as strings, other bytes as ints.
        let mut out = vec![];
        let mut run = String::new();
        for b in &bytes {
            if (b' '..=b'~').contains(b) {
                run.push(*b as char);
            } else {
                if !run.is_empty() {
                    out.push(v_string(std::mem::take(&mut run)));
                }
                out.push(v_int(*b as i64));
            }
        }
        if !run.is_empty() {
            out.push(v_string(run));
        }
        v_list_iter(out)
    };
    let limit_probe = crate::builtins::to_literal(&result);
    check_str_quota(&limit_probe)?;
    Ok(BfRet::Ret(result))
}

fn bf_encode_base64(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let s = bf_args.str_arg(0)?;
    let bytes = decode_binary_string(&s)?;
    let out = BASE64.encode(bytes);
    check_str_quota(&out)?;
    Ok(BfRet::Ret(v_string(out)))
}

fn bf_decode_base64(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let s = bf_args.str_arg(0)?;
    let bytes = BASE64
        .decode(s.as_bytes())
        .map_err(|_| e_invarg("invalid base64"))?;
    let out = encode_binary_string(&bytes);
    check_str_quota(&out)?;
    Ok(BfRet::Ret(v_string(out)))
}

// ----------------------------------------------------------------------
// Hashing and password crypt
// ----------------------------------------------------------------------

fn hash_bytes(algo: &str, bytes: &[u8]) -> Result<String, BfErr> {
    let hex = match algo.to_lowercase().as_str() {
        "md5" => format!("{:X}", Md5::digest(bytes)),
        "sha1" => format!("{:X}", Sha1::digest(bytes)),
        "sha256" => format!("{:X}", Sha256::digest(bytes)),
        "sha512" => format!("{:X}", Sha512::digest(bytes)),
        _ => return Err(e_invarg("unknown hash algorithm")),
    };
    Ok(hex)
}

fn bf_string_hash(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let s = bf_args.str_arg(0)?;
    let algo = match bf_args.args.get(1) {
        Some(_) => bf_args.str_arg(1)?,
        None => "md5".to_string(),
    };
    Ok(BfRet::Ret(v_string(hash_bytes(&algo, s.as_bytes())?)))
}

fn bf_binary_hash(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let s = bf_args.str_arg(0)?;
    let bytes = decode_binary_string(&s)?;
    let algo = match bf_args.args.get(1) {
        Some(_) => bf_args.str_arg(1)?,
        None => "md5".to_string(),
    };
    Ok(BfRet::Ret(v_string(hash_bytes(&algo, &bytes)?)))
}

const SALT_CHARS: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn random_salt_chars(n: usize) -> String {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| SALT_CHARS[rng.random_range(0..SALT_CHARS.len())] as char)
        .collect()
}

/// The bcrypt cost everyone may use; `salt()` hands this one out.
const BCRYPT_DEFAULT_COST: u32 = 10;

/// Whether a salt asks for a non-default work factor: sha-crypt's
/// `rounds=N` field, or a bcrypt (`$2a$`/`$2b$`/`$2y$`) cost component
/// other than the default. Malformed bcrypt costs count as tunable; the
/// crypt call itself will reject them.
fn salt_tunes_cost(salt: &str) -> bool {
    if salt.contains("rounds=") {
        return true;
    }
    for prefix in ["$2a$", "$2b$", "$2y$"] {
        if let Some(rest) = salt.strip_prefix(prefix) {
            let cost = rest.split('$').next().unwrap_or("");
            return cost.parse::<u32>() != Ok(BCRYPT_DEFAULT_COST);
        }
    }
    false
}

/// `crypt(password [, salt])`. The salt prefix selects the scheme: `$5$`
/// SHA-256, `$6$` SHA-512, `$2...$` bcrypt, anything else legacy DES.
/// Tuning the work factor (`rounds=`, bcrypt cost) is wizard-only.
fn bf_crypt(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let password = bf_args.str_arg(0)?;
    let salt = match bf_args.args.get(1) {
        Some(_) => bf_args.str_arg(1)?,
        None => random_salt_chars(2),
    };
    if salt_tunes_cost(&salt) {
        bf_args.check_wizardly()?;
    }
    let hashed = pwhash::unix::crypt(password.as_str(), salt.as_str())
        .map_err(|_| e_invarg("bad salt"))?;
    Ok(BfRet::Ret(v_string(hashed)))
}

/// Generate a salt string for `crypt()`: `salt()` for DES, or
/// `salt("$5$" | "$6$" | "$2b$")` for the modern schemes.
fn bf_salt(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let prefix = match bf_args.args.first() {
        Some(_) => bf_args.str_arg(0)?,
        None => String::new(),
    };
    let out = match prefix.as_str() {
        "" => random_salt_chars(2),
        "$5$" | "$6$" => format!("{prefix}{}", random_salt_chars(16)),
        "$2a$" | "$2b$" | "$2y$" => {
            format!("{prefix}{BCRYPT_DEFAULT_COST}${}", random_salt_chars(22))
        }
        _ => return Err(e_invarg("unknown salt format")),
    };
    Ok(BfRet::Ret(v_string(out)))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "strsub" => bf_strsub,
        "index" => bf_index,
        "rindex" => bf_rindex,
        "strcmp" => bf_strcmp,
        "explode" => bf_explode,
        "implode" => bf_implode,
        "match" => bf_match,
        "rmatch" => bf_rmatch,
        "substitute" => bf_substitute,
        "encode_binary" => bf_encode_binary,
        "decode_binary" => bf_decode_binary,
        "encode_base64" => bf_encode_base64,
        "decode_base64" => bf_decode_base64,
        "string_hash" => bf_string_hash,
        "binary_hash" => bf_binary_hash,
        "crypt" => bf_crypt,
        "salt" => bf_salt,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_percent_is_escape() {
        // %d matches a literal d, not a digit class.
        assert_eq!(find_span("abcd", "%d", false, false), Some((4, 4)));
        assert_eq!(find_span("1234", "%d", false, false), None);
        assert_eq!(find_span("50% off", "%%", false, false), Some((3, 3)));
    }

    #[test]
    fn test_binary_roundtrip() {
        let bytes = vec![0u8, b'f', b'o', b'o', 10, b'~', 255];
        let encoded = encode_binary_string(&bytes);
        assert_eq!(decode_binary_string(&encoded).unwrap(), bytes);
        assert!(encoded.contains("~00"));
        assert!(encoded.contains("~7E"));
    }

    #[test]
    fn test_unescape_pattern() {
        assert_eq!(unescape_pattern("a%db%%c"), "adb%c");
    }

    #[test]
    fn test_salt_cost_tuning_detection() {
        // sha-crypt rounds and non-default bcrypt costs are tunable.
        assert!(salt_tunes_cost("$5$rounds=5000$abcdefgh"));
        assert!(salt_tunes_cost("$2b$20$abcdefghijklmnopqrstuv"));
        assert!(salt_tunes_cost("$2a$04$abcdefghijklmnopqrstuv"));
        assert!(salt_tunes_cost("$2b$garbage$salt"));
        // Plain salts and the default bcrypt cost are not.
        assert!(!salt_tunes_cost("ab"));
        assert!(!salt_tunes_cost("$5$abcdefgh"));
        assert!(!salt_tunes_cost("$6$abcdefgh"));
        assert!(!salt_tunes_cost("$2b$10$abcdefghijklmnopqrstuv"));
    }
}
