//! Conversions between numbers and strings.

use crate::gc::Arena;
use crate::string::LuaString;
use crate::value::TValue;

/// The float as an integer, if it has an exact integer value in range.
#[inline]
pub fn float_to_integer(f: f64) -> Option<i64> {
    float_to_integer_rounded(f, f.floor())
}

/// `f` rounded towards negative infinity, as an integer.
#[inline]
pub(crate) fn float_floor_to_integer(f: f64) -> Option<i64> {
    float_to_integer_rounded(f.floor(), f.floor())
}

/// `f` rounded towards positive infinity, as an integer.
#[inline]
pub(crate) fn float_ceil_to_integer(f: f64) -> Option<i64> {
    float_to_integer_rounded(f.ceil(), f.ceil())
}

fn float_to_integer_rounded(f: f64, rounded: f64) -> Option<i64> {
    if rounded != f {
        return None;
    }
    // 2^63 is exact; i64::MAX as f64 rounds up to it
    if rounded >= -9_223_372_036_854_775_808.0 && rounded < 9_223_372_036_854_775_808.0 {
        Some(rounded as i64)
    } else {
        None
    }
}

/// Whether `i` converts to a float without loss.
#[inline]
pub(crate) fn int_fits_float(i: i64) -> bool {
    const LIMIT: i64 = 1 << 53;
    (-LIMIT..=LIMIT).contains(&i)
}

/// Numeric value of `v`, converting strings.
pub fn to_number(v: TValue, strings: &Arena<LuaString>) -> Option<f64> {
    match v {
        TValue::Integer(i) => Some(i as f64),
        TValue::Float(f) => Some(f),
        TValue::ShortStr(s) | TValue::LongStr(s) => {
            str_to_number(strings.get(s).as_bytes()).and_then(|n| n.as_number())
        }
        _ => None,
    }
}

/// Integer value of `v`. Floats must be integral; strings are converted.
pub fn to_integer(v: TValue, strings: &Arena<LuaString>) -> Option<i64> {
    match v {
        TValue::Integer(i) => Some(i),
        TValue::Float(f) => float_to_integer(f),
        TValue::ShortStr(s) | TValue::LongStr(s) => match str_to_number(strings.get(s).as_bytes())? {
            TValue::Integer(i) => Some(i),
            TValue::Float(f) => float_to_integer(f),
            _ => None,
        },
        _ => None,
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn trim(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&b| !is_space(b)).unwrap_or(s.len());
    let end = s.iter().rposition(|&b| !is_space(b)).map_or(start, |e| e + 1);
    &s[start..end]
}

/// Parse a numeral: decimal or hexadecimal integers (hexadecimal ones wrap
/// around), and decimal or hexadecimal floats. Surrounding whitespace is
/// allowed. A decimal integer that overflows becomes a float.
pub fn str_to_number(s: &[u8]) -> Option<TValue> {
    let s = trim(s);
    if s.is_empty() || s.contains(&0) {
        return None;
    }
    if let Some(i) = str_to_int(s) {
        return Some(TValue::Integer(i));
    }
    str_to_float(s).map(TValue::Float)
}

fn split_sign(s: &[u8]) -> (bool, &[u8]) {
    match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn hex_body(s: &[u8]) -> Option<&[u8]> {
    if s.len() >= 2 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X') {
        Some(&s[2..])
    } else {
        None
    }
}

fn str_to_int(s: &[u8]) -> Option<i64> {
    let (neg, body) = split_sign(s);
    let mut a: u64 = 0;
    if let Some(hex) = hex_body(body) {
        if hex.is_empty() {
            return None;
        }
        for &c in hex {
            let d = (c as char).to_digit(16)?;
            a = a.wrapping_mul(16).wrapping_add(d as u64);
        }
    } else {
        if body.is_empty() {
            return None;
        }
        let max_by_10 = i64::MAX as u64 / 10;
        let max_last = i64::MAX as u64 % 10;
        for &c in body {
            let d = (c as char).to_digit(10)? as u64;
            if a >= max_by_10 && (a > max_by_10 || d > max_last + u64::from(neg)) {
                // overflow: accept as a float instead
                return None;
            }
            a = a * 10 + d;
        }
    }
    let i = a as i64;
    Some(if neg { 0i64.wrapping_sub(i) } else { i })
}

fn str_to_float(s: &[u8]) -> Option<f64> {
    // reject 'inf' and 'nan'
    if s.iter().any(|&b| b == b'n' || b == b'N') {
        return None;
    }
    let (neg, body) = split_sign(s);
    if matches!(body.first(), Some(b'+' | b'-')) {
        return None;
    }
    let f = match hex_body(body) {
        Some(hex) => hex_to_float(hex)?,
        None => {
            let text = std::str::from_utf8(body).ok()?;
            if !text
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
            {
                return None;
            }
            if !text.bytes().any(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse::<f64>().ok()?
        }
    };
    Some(if neg { -f } else { f })
}

/// Hexadecimal float body (after `0x`): hex digits with an optional point
/// and an optional binary exponent `p[+-]digits`.
fn hex_to_float(s: &[u8]) -> Option<f64> {
    let mut mantissa = 0.0f64;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    let mut i = 0;
    while i < s.len() {
        let c = s[i];
        if c == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if let Some(d) = (c as char).to_digit(16) {
            mantissa = mantissa * 16.0 + d as f64;
            any_digit = true;
            if seen_dot {
                exp -= 4;
            }
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < s.len() {
        if s[i] != b'p' && s[i] != b'P' {
            return None;
        }
        let (eneg, digits) = split_sign(&s[i + 1..]);
        if digits.is_empty() {
            return None;
        }
        let mut e: i64 = 0;
        for &c in digits {
            let d = (c as char).to_digit(10)? as i64;
            e = e.saturating_mul(10).saturating_add(d);
        }
        exp += if eneg { -e } else { e };
    }
    Some(mantissa * 2f64.powi(exp.clamp(-2000, 2000) as i32))
}

/// Text form of a number: integers as decimal, floats like `%.14g` with
/// `.0` appended when the result would read as an integer.
pub fn number_to_string(v: TValue) -> Option<String> {
    match v {
        TValue::Integer(i) => Some(i.to_string()),
        TValue::Float(f) => {
            let mut s = format_g14(f);
            if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
                s.push_str(".0");
            }
            Some(s)
        }
        _ => None,
    }
}

/// `printf("%.14g", f)`.
fn format_g14(f: f64) -> String {
    const PRECISION: i32 = 14;
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    // the exponent after rounding to the requested precision
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (sci.clone(), 0),
    };
    if (-4..PRECISION).contains(&exp) {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        strip_zeros(format!("{:.*}", decimals, f))
    } else {
        let m = strip_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", m, sign, exp.abs())
    }
}

fn strip_zeros(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
