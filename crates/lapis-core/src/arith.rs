//! Arithmetic and bitwise operators with metamethod fallback.

use crate::coerce::{to_integer, to_number};
use crate::error::LuaError;
use crate::metamethod::Tm;
use crate::state::Vm;
use crate::value::TValue;

/// Operators accepted by `Vm::arith`, numbered like the reference API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add = 0,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    /// Unary minus.
    Unm,
    /// Bitwise not.
    BNot,
}

impl ArithOp {
    #[inline]
    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    /// Operators that always produce a float.
    fn is_float_only(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Pow)
    }

    fn event(self) -> Tm {
        match self {
            ArithOp::Add => Tm::Add,
            ArithOp::Sub => Tm::Sub,
            ArithOp::Mul => Tm::Mul,
            ArithOp::Mod => Tm::Mod,
            ArithOp::Pow => Tm::Pow,
            ArithOp::Div => Tm::Div,
            ArithOp::IDiv => Tm::IDiv,
            ArithOp::BAnd => Tm::BAnd,
            ArithOp::BOr => Tm::BOr,
            ArithOp::BXor => Tm::BXor,
            ArithOp::Shl => Tm::Shl,
            ArithOp::Shr => Tm::Shr,
            ArithOp::Unm => Tm::Unm,
            ArithOp::BNot => Tm::BNot,
        }
    }
}

/// Integer floor division. Raises on a zero divisor.
pub fn int_div(a: i64, b: i64) -> Result<i64, LuaError> {
    if b == 0 {
        return Err(LuaError::runtime("attempt to perform 'n//0'"));
    }
    if b == -1 {
        return Ok(a.wrapping_neg());
    }
    let q = a / b;
    // round towards minus infinity
    if (a % b != 0) && ((a ^ b) < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Integer modulo with the sign of the divisor. Raises on a zero divisor.
pub fn int_mod(a: i64, b: i64) -> Result<i64, LuaError> {
    if b == 0 {
        return Err(LuaError::runtime("attempt to perform 'n%0'"));
    }
    if b == -1 {
        return Ok(0);
    }
    let r = a % b;
    if r != 0 && (r ^ b) < 0 {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

/// Float modulo with the sign of the divisor.
pub fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if (m > 0.0 && b < 0.0) || (m < 0.0 && b > 0.0) {
        m + b
    } else {
        m
    }
}

/// Shift left; negative `y` shifts right. Shifts of 64 bits or more give 0.
pub fn shift_left(x: i64, y: i64) -> i64 {
    if y <= -64 || y >= 64 {
        0
    } else if y >= 0 {
        ((x as u64) << y) as i64
    } else {
        ((x as u64) >> (-y)) as i64
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<i64, LuaError> {
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Mod => int_mod(a, b)?,
        ArithOp::IDiv => int_div(a, b)?,
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => shift_left(a, b),
        ArithOp::Shr => shift_left(a, b.wrapping_neg()),
        ArithOp::Unm => 0i64.wrapping_sub(a),
        ArithOp::BNot => !a,
        ArithOp::Pow | ArithOp::Div => unreachable!("float-only operator"),
    })
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => {
            if b == 2.0 {
                a * a
            } else {
                a.powf(b)
            }
        }
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Unm => -a,
        ArithOp::Mod => float_mod(a, b),
        _ => unreachable!("integer-only operator"),
    }
}

impl Vm {
    /// Apply `op` without metamethods. `Ok(None)` means the operands are not
    /// suitable (the caller falls back to a metamethod).
    pub(crate) fn raw_arith(&self, op: ArithOp, p1: TValue, p2: TValue) -> Result<Option<TValue>, LuaError> {
        let strings = &self.g.strings;
        if op.is_bitwise() {
            return match (to_integer(p1, strings), to_integer(p2, strings)) {
                (Some(a), Some(b)) => Ok(Some(TValue::Integer(int_arith(op, a, b)?))),
                _ => Ok(None),
            };
        }
        if !op.is_float_only() {
            if let (TValue::Integer(a), TValue::Integer(b)) = (p1, p2) {
                return Ok(Some(TValue::Integer(int_arith(op, a, b)?)));
            }
        }
        match (to_number(p1, strings), to_number(p2, strings)) {
            (Some(a), Some(b)) => Ok(Some(TValue::Float(float_arith(op, a, b)))),
            _ => Ok(None),
        }
    }

    /// Apply `op`, consulting the operands' metamethods when the raw
    /// operation does not apply.
    pub(crate) fn arith_values(&mut self, op: ArithOp, p1: TValue, p2: TValue) -> Result<TValue, LuaError> {
        match self.raw_arith(op, p1, p2)? {
            Some(v) => Ok(v),
            None => self.arith_tm(p1, p2, op.event()),
        }
    }

    /// Pop the operands (one for unary operators, two otherwise) and push
    /// the result of `op`.
    pub fn arith(&mut self, op: ArithOp) -> Result<(), LuaError> {
        let r = self.arith_raw_api(op);
        self.api(r)
    }

    fn arith_raw_api(&mut self, op: ArithOp) -> Result<(), LuaError> {
        if op.is_unary() {
            debug_assert!(self.get_top() >= 1, "not enough elements in the stack");
            // the operand doubles as a fake second operand
            let v = self.th.stack[self.th.top - 1];
            self.push_raw(v);
        } else {
            debug_assert!(self.get_top() >= 2, "not enough elements in the stack");
        }
        let top = self.th.top;
        let (p1, p2) = (self.th.stack[top - 2], self.th.stack[top - 1]);
        let v = self.arith_values(op, p1, p2)?;
        self.th.stack[top - 2] = v;
        self.th.top = top - 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith2(vm: &mut Vm, a: TValue, b: TValue, op: ArithOp) -> Result<TValue, LuaError> {
        vm.arith_values(op, a, b)
    }

    #[test]
    fn test_add_integers() {
        let mut vm = Vm::new();
        vm.push_integer(10);
        vm.push_integer(20);
        vm.arith(ArithOp::Add).unwrap();
        assert_eq!(vm.get_top(), 1);
        assert!(vm.is_integer(-1));
        assert_eq!(vm.to_integer(-1), Some(30));
    }

    #[test]
    fn test_mixed_and_float_only() {
        let mut vm = Vm::new();
        let v = arith2(&mut vm, TValue::Integer(1), TValue::Float(0.5), ArithOp::Add).unwrap();
        assert_eq!(v.as_float(), Some(1.5));
        let v = arith2(&mut vm, TValue::Integer(7), TValue::Integer(2), ArithOp::Div).unwrap();
        assert_eq!(v.as_float(), Some(3.5));
        let v = arith2(&mut vm, TValue::Integer(2), TValue::Integer(10), ArithOp::Pow).unwrap();
        assert_eq!(v.as_float(), Some(1024.0));
    }

    #[test]
    fn test_floor_division_and_modulo() {
        assert_eq!(int_div(7, 2).unwrap(), 3);
        assert_eq!(int_div(-7, 2).unwrap(), -4);
        assert_eq!(int_div(i64::MIN, -1).unwrap(), i64::MIN);
        assert_eq!(int_mod(-7, 2).unwrap(), 1);
        assert_eq!(int_mod(7, -2).unwrap(), -1);
        assert_eq!(int_mod(i64::MIN, -1).unwrap(), 0);
        assert_eq!(float_mod(-7.0, 2.0), 1.0);
        assert_eq!(float_mod(5.5, -2.0), -0.5);
        assert_eq!(int_div(1, 0).unwrap_err().to_string(), "attempt to perform 'n//0'");
        assert_eq!(int_mod(1, 0).unwrap_err().to_string(), "attempt to perform 'n%0'");
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(1, 4), 16);
        assert_eq!(shift_left(16, -4), 1);
        assert_eq!(shift_left(-1, -1), i64::MAX);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_left(1, -64), 0);
    }

    #[test]
    fn test_bitwise_converts_strings_and_integral_floats() {
        let mut vm = Vm::new();
        let s = vm.new_string(b"12").unwrap();
        let v = arith2(&mut vm, s, TValue::Float(10.0), ArithOp::BAnd).unwrap();
        assert_eq!(v.as_integer(), Some(8));
        let e = arith2(&mut vm, TValue::Float(1.5), TValue::Integer(1), ArithOp::BOr).unwrap_err();
        assert_eq!(e.to_string(), "number has no integer representation");
    }

    #[test]
    fn test_string_operands_are_coerced() {
        let mut vm = Vm::new();
        let s = vm.new_string(b"10").unwrap();
        let v = arith2(&mut vm, s, TValue::Integer(1), ArithOp::Add).unwrap();
        assert_eq!(v.as_float(), Some(11.0));
    }

    #[test]
    fn test_unary_operators() {
        let mut vm = Vm::new();
        vm.push_integer(5);
        vm.arith(ArithOp::Unm).unwrap();
        assert_eq!(vm.to_integer(-1), Some(-5));
        vm.arith(ArithOp::BNot).unwrap();
        assert_eq!(vm.to_integer(-1), Some(4));
        assert_eq!(vm.get_top(), 1);
    }

    #[test]
    fn test_arith_error_inside_pcall() {
        fn bad(vm: &mut Vm) -> Result<usize, LuaError> {
            vm.push_integer(1);
            vm.create_table(0, 0)?;
            vm.arith(ArithOp::Sub)?;
            Ok(1)
        }
        let mut vm = Vm::new();
        vm.push_native_function(bad);
        assert_eq!(vm.pcall(0, 1, 0), crate::error::Status::ErrRun);
        assert_eq!(
            vm.to_lstring(-1).unwrap(),
            Some(&b"attempt to perform arithmetic on a table value"[..])
        );
    }
}
