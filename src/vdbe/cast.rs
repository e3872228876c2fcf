//! Filter value casting
//!
//! Converts client-supplied filter values (null / int64 / double / string)
//! into a column's value domain. Conversions that cannot be represented
//! exactly are resolved *directionally*: the value is nudged so the
//! comparison keeps the correct meaning, or the whole filter degrades to
//! all-match / none-match.

use crate::types::{NonStringOp, StringOp};
use crate::vdbe::value::{FetchedType, Validity, ValueFetcher};

// ============================================================================
// Integer targets
// ============================================================================

/// An integer type a filter value can be narrowed to.
pub trait IntTarget: Copy {
    const MIN_I64: i64;
    const MAX_I64: i64;
    /// Bounds as doubles. MAX_F64 is exclusive: `d >= MAX_F64` is out of
    /// range. For i64 the constant 2^63 is used directly because
    /// `i64::MAX as f64` rounds up and would misclassify.
    const MIN_F64: f64;
    const MAX_F64: f64;
    fn from_i64(v: i64) -> Self;
    fn from_f64(v: f64) -> Self;
}

impl IntTarget for u32 {
    const MIN_I64: i64 = 0;
    const MAX_I64: i64 = u32::MAX as i64;
    const MIN_F64: f64 = 0.0;
    const MAX_F64: f64 = 4294967296.0;
    fn from_i64(v: i64) -> Self {
        v as u32
    }
    fn from_f64(v: f64) -> Self {
        v as u32
    }
}

impl IntTarget for i32 {
    const MIN_I64: i64 = i32::MIN as i64;
    const MAX_I64: i64 = i32::MAX as i64;
    const MIN_F64: f64 = -2147483648.0;
    const MAX_F64: f64 = 2147483648.0;
    fn from_i64(v: i64) -> Self {
        v as i32
    }
    fn from_f64(v: f64) -> Self {
        v as i32
    }
}

impl IntTarget for i64 {
    const MIN_I64: i64 = i64::MIN;
    const MAX_I64: i64 = i64::MAX;
    const MIN_F64: f64 = -9223372036854775808.0;
    const MAX_F64: f64 = 9223372036854775808.0;
    fn from_i64(v: i64) -> Self {
        v
    }
    fn from_f64(v: f64) -> Self {
        v as i64
    }
}

// ============================================================================
// Shared fallbacks
// ============================================================================

/// Handles string and null inputs against a numeric column.
fn cast_string_or_null_to_numeric(ftype: FetchedType, op: NonStringOp) -> Validity {
    if ftype == FetchedType::String {
        // Strings order above all numerics.
        return match op {
            NonStringOp::Eq | NonStringOp::Ge | NonStringOp::Gt => Validity::NoneMatch,
            NonStringOp::Ne | NonStringOp::Le | NonStringOp::Lt => Validity::AllMatch,
        };
    }
    debug_assert_eq!(ftype, FetchedType::Null);
    // Nulls compare false to everything (including other nulls), regardless
    // of the operator.
    Validity::NoneMatch
}

fn double_to_int_directional<T: IntTarget>(
    no_data: bool,
    all_data: bool,
    d: f64,
    round: fn(f64) -> f64,
) -> (Validity, Option<T>) {
    if no_data {
        return (Validity::NoneMatch, None);
    }
    if all_data {
        return (Validity::AllMatch, None);
    }
    (Validity::Valid, Some(T::from_f64(round(d))))
}

// ============================================================================
// Casts
// ============================================================================

/// Casts a filter value to an integer type.
pub fn cast_to_integer<T: IntTarget, F: ValueFetcher>(
    handle: u32,
    ftype: FetchedType,
    fetcher: &mut F,
    op: NonStringOp,
) -> (Validity, Option<T>) {
    match ftype {
        FetchedType::Int64 => {
            let v = fetcher.int64_value(handle);
            let is_small = v < T::MIN_I64;
            let is_big = v > T::MAX_I64;
            if is_small || is_big {
                match op {
                    NonStringOp::Lt | NonStringOp::Le => {
                        if is_small {
                            return (Validity::NoneMatch, None);
                        }
                    }
                    NonStringOp::Gt | NonStringOp::Ge => {
                        if is_big {
                            return (Validity::NoneMatch, None);
                        }
                    }
                    NonStringOp::Eq => return (Validity::NoneMatch, None),
                    NonStringOp::Ne => {}
                }
                return (Validity::AllMatch, None);
            }
            (Validity::Valid, Some(T::from_i64(v)))
        }
        FetchedType::Double => {
            let d = fetcher.double_value(handle);
            // NaNs compare false to everything, regardless of the operator.
            if d.is_nan() {
                return (Validity::NoneMatch, None);
            }
            let is_big = d >= T::MAX_F64;
            let is_small = d < T::MIN_F64;
            if d == d.trunc() && !is_small && !is_big {
                return (Validity::Valid, Some(T::from_f64(d)));
            }
            match op {
                NonStringOp::Lt => double_to_int_directional::<T>(is_small, is_big, d, f64::ceil),
                NonStringOp::Le => double_to_int_directional::<T>(is_small, is_big, d, f64::floor),
                NonStringOp::Gt => double_to_int_directional::<T>(is_big, is_small, d, f64::floor),
                NonStringOp::Ge => double_to_int_directional::<T>(is_big, is_small, d, f64::ceil),
                NonStringOp::Eq => (Validity::NoneMatch, None),
                NonStringOp::Ne => (Validity::AllMatch, None),
            }
        }
        _ => (cast_string_or_null_to_numeric(ftype, op), None),
    }
}

/// Casts a filter value to a double.
pub fn cast_to_double<F: ValueFetcher>(
    handle: u32,
    ftype: FetchedType,
    fetcher: &mut F,
    op: NonStringOp,
) -> (Validity, Option<f64>) {
    match ftype {
        FetchedType::Double => (Validity::Valid, Some(fetcher.double_value(handle))),
        FetchedType::Int64 => {
            let i = fetcher.int64_value(handle);
            let iad = i as f64;
            // `iad as i64` saturates; treat the high overflow as a negative
            // wrap so the direction logic below sees it.
            let in_range = iad >= <i64 as IntTarget>::MIN_F64 && iad < <i64 as IntTarget>::MAX_F64;
            let iad_int = if in_range { iad as i64 } else { i64::MIN };
            if i == iad_int {
                return (Validity::Valid, Some(iad));
            }
            let overflow_positive_to_negative = i > 0 && iad_int < 0;
            let iad_greater_than_i = iad_int > i || overflow_positive_to_negative;
            let iad_less_than_i = iad_int < i && !overflow_positive_to_negative;
            let out = match op {
                NonStringOp::Lt => {
                    if iad_greater_than_i {
                        iad
                    } else {
                        next_toward_inf(iad)
                    }
                }
                NonStringOp::Le => {
                    if iad_less_than_i {
                        iad
                    } else {
                        next_toward_neg_inf(iad)
                    }
                }
                NonStringOp::Gt => {
                    if iad_less_than_i {
                        iad
                    } else {
                        next_toward_neg_inf(iad)
                    }
                }
                NonStringOp::Ge => {
                    if iad_greater_than_i {
                        iad
                    } else {
                        next_toward_inf(iad)
                    }
                }
                NonStringOp::Eq => return (Validity::NoneMatch, None),
                NonStringOp::Ne => return (Validity::AllMatch, None),
            };
            (Validity::Valid, Some(out))
        }
        _ => (cast_string_or_null_to_numeric(ftype, op), None),
    }
}

/// Casts a filter value against a string column.
pub fn cast_to_string<F: ValueFetcher>(
    handle: u32,
    ftype: FetchedType,
    fetcher: &mut F,
    op: StringOp,
) -> (Validity, Option<String>) {
    match ftype {
        FetchedType::String => (Validity::Valid, Some(fetcher.string_value(handle).to_owned())),
        // Nulls compare false to everything, regardless of the operator.
        FetchedType::Null => (Validity::NoneMatch, None),
        FetchedType::Int64 | FetchedType::Double => {
            // Numerics order below all strings.
            let validity = match op {
                StringOp::Ge | StringOp::Gt | StringOp::Ne => Validity::AllMatch,
                StringOp::Eq
                | StringOp::Le
                | StringOp::Lt
                | StringOp::Glob
                | StringOp::Regex => Validity::NoneMatch,
            };
            (validity, None)
        }
    }
}

// The smallest double strictly greater / smaller than `x`. Only called on
// finite values produced by an i64-to-double conversion.
fn next_toward_inf(x: f64) -> f64 {
    let bits = x.to_bits();
    let next = if x >= 0.0 { bits + 1 } else { bits - 1 };
    f64::from_bits(next)
}

fn next_toward_neg_inf(x: f64) -> f64 {
    let bits = x.to_bits();
    let next = if x > 0.0 { bits - 1 } else if x == 0.0 { 0x8000_0000_0000_0001 } else { bits + 1 };
    f64::from_bits(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneValue {
        ty: FetchedType,
        i: i64,
        d: f64,
        s: &'static str,
    }

    impl ValueFetcher for OneValue {
        fn value_type(&mut self, _i: u32) -> FetchedType {
            self.ty
        }
        fn int64_value(&mut self, _i: u32) -> i64 {
            self.i
        }
        fn double_value(&mut self, _i: u32) -> f64 {
            self.d
        }
        fn string_value(&mut self, _i: u32) -> &str {
            self.s
        }
        fn iterator_init(&mut self, _i: u32) -> bool {
            false
        }
        fn iterator_next(&mut self, _i: u32) -> bool {
            false
        }
    }

    fn int_fetcher(i: i64) -> OneValue {
        OneValue {
            ty: FetchedType::Int64,
            i,
            d: 0.0,
            s: "",
        }
    }

    fn double_fetcher(d: f64) -> OneValue {
        OneValue {
            ty: FetchedType::Double,
            i: 0,
            d,
            s: "",
        }
    }

    #[test]
    fn test_int64_to_u32_overflow() {
        // Value too large for u32: Eq can never match; Lt trivially holds.
        let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Int64, &mut int_fetcher(1 << 40), NonStringOp::Eq);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Int64, &mut int_fetcher(1 << 40), NonStringOp::Lt);
        assert_eq!(v, Validity::AllMatch);
        let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Int64, &mut int_fetcher(1 << 40), NonStringOp::Ge);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Int64, &mut int_fetcher(-1), NonStringOp::Le);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Int64, &mut int_fetcher(-1), NonStringOp::Gt);
        assert_eq!(v, Validity::AllMatch);
    }

    #[test]
    fn test_double_to_int_directional() {
        // 1.5 < x on integers means 2 <= x.
        let (v, out) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1.5), NonStringOp::Gt);
        assert_eq!(v, Validity::Valid);
        assert_eq!(out, Some(1));
        let (v, out) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1.5), NonStringOp::Ge);
        assert_eq!(v, Validity::Valid);
        assert_eq!(out, Some(2));
        let (v, _) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1.5), NonStringOp::Eq);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1.5), NonStringOp::Ne);
        assert_eq!(v, Validity::AllMatch);
    }

    #[test]
    fn test_double_above_i64_range() {
        let (v, _) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1e20), NonStringOp::Lt);
        assert_eq!(v, Validity::AllMatch);
        let (v, _) =
            cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(1e20), NonStringOp::Gt);
        assert_eq!(v, Validity::NoneMatch);
    }

    #[test]
    fn test_nan_never_matches() {
        for op in NonStringOp::ALL {
            let (v, _) =
                cast_to_integer::<i64, _>(0, FetchedType::Double, &mut double_fetcher(f64::NAN), op);
            assert_eq!(v, Validity::NoneMatch);
        }
    }

    #[test]
    fn test_null_never_matches() {
        let mut f = OneValue {
            ty: FetchedType::Null,
            i: 0,
            d: 0.0,
            s: "",
        };
        for op in NonStringOp::ALL {
            let (v, _) = cast_to_integer::<u32, _>(0, FetchedType::Null, &mut f, op);
            assert_eq!(v, Validity::NoneMatch);
        }
    }

    #[test]
    fn test_inexact_int64_to_double_nudges() {
        // 2^53 + 1 is not representable; Lt must move the bound up so that
        // the original strict comparison is preserved.
        let i = (1i64 << 53) + 1;
        let (v, out) = cast_to_double(0, FetchedType::Int64, &mut int_fetcher(i), NonStringOp::Lt);
        assert_eq!(v, Validity::Valid);
        let out = out.unwrap();
        assert!(out > (1i64 << 53) as f64);
        let (v, _) = cast_to_double(0, FetchedType::Int64, &mut int_fetcher(i), NonStringOp::Eq);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_double(0, FetchedType::Int64, &mut int_fetcher(i), NonStringOp::Ne);
        assert_eq!(v, Validity::AllMatch);
    }

    #[test]
    fn test_string_against_numeric_column() {
        let mut f = OneValue {
            ty: FetchedType::String,
            i: 0,
            d: 0.0,
            s: "abc",
        };
        let (v, _) = cast_to_integer::<i64, _>(0, FetchedType::String, &mut f, NonStringOp::Eq);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_integer::<i64, _>(0, FetchedType::String, &mut f, NonStringOp::Lt);
        assert_eq!(v, Validity::AllMatch);
    }

    #[test]
    fn test_numeric_against_string_column() {
        let mut f = int_fetcher(42);
        let (v, _) = cast_to_string(0, FetchedType::Int64, &mut f, StringOp::Gt);
        assert_eq!(v, Validity::AllMatch);
        let (v, _) = cast_to_string(0, FetchedType::Int64, &mut f, StringOp::Eq);
        assert_eq!(v, Validity::NoneMatch);
        let (v, _) = cast_to_string(0, FetchedType::Int64, &mut f, StringOp::Glob);
        assert_eq!(v, Validity::NoneMatch);
    }
}
