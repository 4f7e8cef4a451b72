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
use crate::builtins::bf_strings::encode_binary_string;
use corral_var::ErrorCode::{E_INVARG, E_TYPE};
use corral_var::{Symbol, Var, Variant, v_float, v_int, v_str};
use rand::Rng;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn bf_abs(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let v = match bf_args.args[0].variant() {
        Variant::Int(i) => v_int(i.wrapping_abs()),
        Variant::Float(f) => v_float(f.abs()),
        _ => return Err(BfErr::Code(E_TYPE)),
    };
    Ok(BfRet::Ret(v))
}

fn min_max(bf_args: &BfCallState<'_>, want_max: bool) -> Result<Var, BfErr> {
    if bf_args.args.is_empty() {
        return Err(BfErr::Code(corral_var::ErrorCode::E_ARGS));
    }
    let mut best = bf_args.args[0].clone();
    for v in &bf_args.args[1..] {
        let ord = match (best.variant(), v.variant()) {
            (Variant::Int(a), Variant::Int(b)) => a.cmp(b),
            (Variant::Float(a), Variant::Float(b)) => a.total_cmp(b),
            _ => return Err(BfErr::Code(E_TYPE)),
        };
        if (want_max && ord.is_lt()) || (!want_max && ord.is_gt()) {
            best = v.clone();
        }
    }
    Ok(best)
}

fn bf_min(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    min_max(bf_args, false).map(BfRet::Ret)
}

fn bf_max(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    min_max(bf_args, true).map(BfRet::Ret)
}

fn bf_random(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let upper = if bf_args.args.is_empty() {
        i64::MAX
    } else {
        bf_args.int_arg(0)?
    };
    if upper < 1 {
        return Err(e_invarg("random() needs a positive bound"));
    }
    let n = rand::rng().random_range(1..=upper);
    Ok(BfRet::Ret(v_int(n)))
}

fn bf_random_bytes(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let count = bf_args.int_arg(0)?;
    if !(0..=10000).contains(&count) {
        return Err(e_invarg("random_bytes() count out of range"));
    }
    let mut bytes = vec![0u8; count as usize];
    rand::rng().fill(&mut bytes[..]);
    let encoded = encode_binary_string(&bytes);
    crate::builtins::bf_strings::check_str_quota(&encoded)?;
    Ok(BfRet::Ret(v_str(&encoded)))
}

fn bf_floatstr(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(2..=3)?;
    let Variant::Float(f) = bf_args.args[0].variant() else {
        return Err(BfErr::Code(E_TYPE));
    };
    let precision = bf_args.int_arg(1)?.clamp(0, 19) as usize;
    let scientific = bf_args
        .args
        .get(2)
        .map(|v| v.is_true())
        .unwrap_or(false);
    let s = if scientific {
        format!("{f:.precision$e}")
    } else {
        format!("{f:.precision$}")
    };
    Ok(BfRet::Ret(v_str(&s)))
}

fn float_arg(bf_args: &BfCallState<'_>, i: usize) -> Result<f64, BfErr> {
    match bf_args.arg(i)?.variant() {
        Variant::Float(f) => Ok(*f),
        Variant::Int(n) => Ok(*n as f64),
        _ => Err(BfErr::Code(E_TYPE)),
    }
}

fn float_fn(
    bf_args: &mut BfCallState<'_>,
    f: impl Fn(f64) -> f64,
) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let x = float_arg(bf_args, 0)?;
    let result = f(x);
    if result.is_nan() {
        return Err(BfErr::ErrValue(E_INVARG.msg("argument out of domain")));
    }
    Ok(BfRet::Ret(v_float(result)))
}

fn bf_sqrt(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::sqrt)
}

fn bf_sin(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::sin)
}

fn bf_cos(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::cos)
}

fn bf_tan(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::tan)
}

fn bf_asin(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::asin)
}

fn bf_acos(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::acos)
}

fn bf_atan(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=2)?;
    let y = float_arg(bf_args, 0)?;
    let v = if bf_args.args.len() == 2 {
        let x = float_arg(bf_args, 1)?;
        y.atan2(x)
    } else {
        y.atan()
    };
    Ok(BfRet::Ret(v_float(v)))
}

fn bf_sinh(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::sinh)
}

fn bf_cosh(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::cosh)
}

fn bf_tanh(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::tanh)
}

fn bf_exp(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::exp)
}

fn bf_log(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let x = float_arg(bf_args, 0)?;
    if x <= 0.0 {
        return Err(e_invarg("log() of a non-positive number"));
    }
    Ok(BfRet::Ret(v_float(x.ln())))
}

fn bf_log10(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(1..=1)?;
    let x = float_arg(bf_args, 0)?;
    if x <= 0.0 {
        return Err(e_invarg("log10() of a non-positive number"));
    }
    Ok(BfRet::Ret(v_float(x.log10())))
}

fn bf_ceil(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::ceil)
}

fn bf_floor(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::floor)
}

fn bf_trunc(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    float_fn(bf_args, f64::trunc)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn bf_time(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    Ok(BfRet::Ret(v_int(now_secs())))
}

fn bf_ftime(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=0)?;
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(BfRet::Ret(v_float(t)))
}

fn bf_ctime(bf_args: &mut BfCallState<'_>) -> Result<BfRet, BfErr> {
    bf_args.check_nargs(0..=1)?;
    let t = if bf_args.args.is_empty() {
        now_secs()
    } else {
        bf_args.int_arg(0)?
    };
    use chrono::TimeZone;
    let Some(dt) = chrono::Local.timestamp_opt(t, 0).single() else {
        return Err(e_invarg("time out of range"));
    };
    Ok(BfRet::Ret(v_str(
        &dt.format("%a %b %e %H:%M:%S %Y %Z").to_string(),
    )))
}

pub(crate) fn register(builtins: &mut HashMap<Symbol, BuiltinFunction>) {
    register_bf!(builtins,
        "abs" => bf_abs,
        "min" => bf_min,
        "max" => bf_max,
        "random" => bf_random,
        "random_bytes" => bf_random_bytes,
        "floatstr" => bf_floatstr,
        "sqrt" => bf_sqrt,
        "sin" => bf_sin,
        "cos" => bf_cos,
        "tan" => bf_tan,
        "asin" => bf_asin,
        "acos" => bf_acos,
        "atan" => bf_atan,
        "sinh" => bf_sinh,
        "cosh" => bf_cosh,
        "tanh" => bf_tanh,
        "exp" => bf_exp,
        "log" => bf_log,
        "log10" => bf_log10,
        "ceil" => bf_ceil,
        "floor" => bf_floor,
        "trunc" => bf_trunc,
        "time" => bf_time,
        "ftime" => bf_ftime,
        "ctime" => bf_ctime,
    );
}
