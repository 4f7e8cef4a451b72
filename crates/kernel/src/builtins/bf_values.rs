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
use crate::config::{server_options, value_bytes};
use corral_var::ErrorCode::E_TYPE;
use corral_var::{Error, Obj, Symbol, Var, Variant, v_bool_int, v_float, v_int, v_obj, v_str};
use md5::{Digest, Md5};
use std::collections::HashMap;

/// Render a float the way the language writes them: always with a decimal
/// point or exponent, so it reads back as a float.
pub fn float_literal(f: f64) -> String {
    if f == f.trunc() && f.is_finite() && f.abs() < 1e17 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// The `toliteral()` rendering: reads back as the same value.
pub fn to_literal(v: &Var) -> String {
    match v.variant() {
        Variant::Bool(b) => b.to_string(),
        Variant::Int(i) => i.to_string(),
        Variant::Float(f) => float_literal(*f),
        Variant::Str(s) => quote_string(s.as_str()),
        Variant::Obj(o) => format!("{o}"),
        Variant::Err(e) => e.code.name().to_string(),
        Variant::List(l) => {
            let inner: Vec<String> = l.iter().map(to_literal).collect();
            format!("{{{}}}", inner.join(", "))
        }
        Variant::Map(m) => {
            let inner: Vec<String> = m
                .iter()
                .map(|(k, val)| format!("{} -> {}", to_literal(k), to_literal(val)))
                .collect();
            format!("[{}]", inner.join(", "))
        }
        Variant::Waif(w) => format!("{{waif {}}}", w.class()),
        Variant::Anon(_) => "*anonymous*".to_string(),
    }
}

/// The `tostr()` rendering of one value: unquoted strings, error messages,
/// opaque collections.
pub fn to_display(v: &Var) -> String {
    match v.variant() {
        Variant::Str(s) => s.as_str().to_string(),
        Variant::Err(e) => e.message(),
        Variant::List(_) => "{list}".to_string(),
        Variant::Map(_) => "[map]".to_string(),
        Variant::Waif(_) => "{waif}".to_string(),
        _ => to_literal(v),
    }
}

fn check_str_quota(s: &str) -> Result<(), BfErr> {
    let limit = server_options().max_string_concat;
    if limit > 0 && s.len() as i64 > limit {
        return Err(BfErr::ErrValue(
            corral_var::ErrorCode::E_QUOTA.msg("string too long"),
        ));
    }
    Ok(())
}

fn bf_typeof(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    Ok(BfRet::Ret(v_int(bf_args.args[0].type_code() as i64)))
}

fn bf_tostr(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    let mut out = String::new();
    for arg in &bf_args.args {
        out.push_str(&to_display(arg));
    }
    check_str_quota(&out)?;
    Ok(BfRet::Ret(Var::mk_string(out)))
}

fn bf_toliteral(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let out = to_literal(&bf_args.args[0]);
    check_str_quota(&out)?;
    Ok(BfRet::Ret(Var::mk_string(out)))
}

/// C `strtol` semantics: leading whitespace, optional sign, then digits;
/// no digits means 0.
fn parse_leading_i64(s: &str) -> i64 {
    let s = s.trim_start();
    let mut chars = s.chars().peekable();
    let mut negative = false;
    if let Some('+' | '-') = chars.peek() {
        negative = chars.next() == Some('-');
    }
    let mut value: i64 = 0;
    for c in chars {
        let Some(d) = c.to_digit(10) else { break };
        value = value.wrapping_mul(10).wrapping_add(d as i64);
    }
    if negative { -value } else { value }
}

fn parse_leading_f64(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let bytes = s.as_bytes();
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' if end == 0 => {}
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                if end + 1 < bytes.len() && matches!(bytes[end + 1] as char, '+' | '-') {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    s[..end].parse::<f64>().unwrap_or(0.0)
}

fn bf_toint(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let v = match bf_args.args[0].variant() {
        Variant::Int(i) => v_int(*i),
        Variant::Float(f) => v_int(*f as i64),
        Variant::Str(s) => v_int(parse_leading_i64(s.as_str())),
        Variant::Obj(o) => v_int(o.id()),
        Variant::Err(e) => v_int(e.code as i64),
        Variant::Bool(b) => v_int(*b as i64),
        _ => return Err(BfErr::Code(E_TYPE)),
    };
    Ok(BfRet::Ret(v))
}

fn bf_tofloat(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let v = match bf_args.args[0].variant() {
        Variant::Int(i) => v_float(*i as f64),
        Variant::Float(f) => v_float(*f),
        Variant::Str(s) => v_float(parse_leading_f64(s.as_str())),
        _ => return Err(BfErr::Code(E_TYPE)),
    };
    Ok(BfRet::Ret(v))
}

fn bf_toobj(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let v = match bf_args.args[0].variant() {
        Variant::Int(i) => v_obj(Obj::mk_id(*i)),
        Variant::Obj(o) => v_obj(*o),
        Variant::Str(s) => {
            let trimmed = s.as_str().trim_start();
            let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
            v_obj(Obj::mk_id(parse_leading_i64(digits)))
        }
        _ => return Err(BfErr::Code(E_TYPE)),
    };
    Ok(BfRet::Ret(v))
}

fn bf_equal(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    Ok(BfRet::Ret(v_bool_int(
        bf_args.args[0].eq_case_sensitive(&bf_args.args[1]),
    )))
}

fn bf_length(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let len = bf_args.args[0].len().map_err(BfErr::ErrValue)?;
    Ok(BfRet::Ret(v_int(len as i64)))
}

fn bf_value_bytes(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    Ok(BfRet::Ret(v_int(value_bytes(&bf_args.args[0]) as i64)))
}

fn bf_value_hash(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let literal = to_literal(&bf_args.args[0]);
    let digest = Md5::digest(literal.as_bytes());
    Ok(BfRet::Ret(v_str(&format!("{digest:X}"))))
}

fn bf_is_member(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=2)?;
    let Variant::List(l) = bf_args.args[1].variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let pos = l
        .iter()
        .position(|v| v.eq_case_sensitive(&bf_args.args[0]))
        .map(|i| i as i64 + 1)
        .unwrap_or(0);
    Ok(BfRet::Ret(v_int(pos)))
}

fn bf_raise(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=3)?;
    let Variant::Err(e) = bf_args.args[0].variant() else {
        return Err(e_invarg("raise() takes an error value"));
    };
    let msg = match bf_args.args.get(1) {
        Some(m) => Some(m.as_string().map_err(BfErr::ErrValue)?.to_string()),
        None => None,
    };
    let value = bf_args.args.get(2).cloned();
    Err(BfErr::ErrValue(Error::new(e.code, msg, value)))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "typeof" => bf_typeof,
        "tostr" => bf_tostr,
        "toliteral" => bf_toliteral,
        "toint" => bf_toint,
        "tonum" => bf_toint,
        "tofloat" => bf_tofloat,
        "toobj" => bf_toobj,
        "equal" => bf_equal,
        "length" => bf_length,
        "value_bytes" => bf_value_bytes,
        "value_hash" => bf_value_hash,
        "is_member" => bf_is_member,
        "raise" => bf_raise,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_var::{v_err, v_list, v_map};

    #[test]
    fn test_to_literal_shapes() {
        assert_eq!(to_literal(&v_int(42)), "42");
        assert_eq!(to_literal(&v_float(1.0)), "1.0");
        assert_eq!(to_literal(&v_str("a \"b\"")), r#""a \"b\"""#);
        assert_eq!(
            to_literal(&v_list(&[v_int(1), v_str("x")])),
            r#"{1, "x"}"#
        );
        assert_eq!(
            to_literal(&v_map(&[(v_str("k"), v_int(1))])),
            r#"["k" -> 1]"#
        );
        assert_eq!(
            to_literal(&v_err(corral_var::ErrorCode::E_PERM.into())),
            "E_PERM"
        );
    }

    #[test]
    fn test_strtol_semantics() {
        assert_eq!(parse_leading_i64("[::1]"), 0);
        assert_eq!(parse_leading_i64("  42abc"), 42);
        assert_eq!(parse_leading_i64("-17"), -17);
        assert_eq!(parse_leading_i64(""), 0);
    }

    #[test]
    fn test_parse_leading_float() {
        assert_eq!(parse_leading_f64("2.5e2x"), 250.0);
        assert_eq!(parse_leading_f64("junk"), 0.0);
    }
}
