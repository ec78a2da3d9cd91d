/// Floating point type used throughout system
pub type Real = f64;

/// Width of a setpoint bucket in kelvin. Controller state is keyed per bucket.
pub const BUCKET_STEP_K: Real = 0.5;

/// True when `a` and `b` differ by at most `band` (inclusive).
pub fn within(a: Real, b: Real, band: Real) -> bool {
    (a - b).abs() <= band + 1e-9
}

/// Round `value` to the nearest multiple of `step`. A non-positive step
/// returns the value unchanged.
pub fn round_to_step(value: Real, step: Real) -> Real {
    if step <= 0.0 || !step.is_finite() {
        return value;
    }
    let rounded = (value / step).round() * step;
    // strip representation noise such as 21.500000000000004
    (rounded * 1e6).round() / 1e6
}

/// Quantize a target temperature to its controller bucket.
pub fn quantize_bucket(target: Real) -> Real {
    round_to_step(target, BUCKET_STEP_K)
}

/// Sign of `v` with zero treated as its own class.
pub fn sign(v: Real) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn rounding_stays_within_half_step(v in -50.0_f64..50.0, step in 0.05_f64..2.0) {
            let r = round_to_step(v, step);
            prop_assert!((r - v).abs() <= step / 2.0 + 1e-6);
        }
    }
}
