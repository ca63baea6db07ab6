//! Nodata comparisons on samples promoted to `f64`

/// True if `value` is the nodata value, a NaN nodata value matches NaN samples
#[inline]
pub fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(nod) if nod.is_nan() => value.is_nan(),
        Some(nod) => value == nod,
        None => false,
    }
}

/// True if both optional nodata values represent the same nodata value
pub fn nodata_equal(lhs: Option<f64>, rhs: Option<f64>) -> bool {
    match (lhs, rhs) {
        (Some(l), Some(r)) => l == r || (l.is_nan() && r.is_nan()),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodata_comparison() {
        assert!(is_nodata(0.0, Some(0.0)));
        assert!(!is_nodata(0.0, None));
        assert!(is_nodata(f64::NAN, Some(f64::NAN)));
        assert!(!is_nodata(1.0, Some(f64::NAN)));

        assert!(nodata_equal(Some(f64::NAN), Some(f64::NAN)));
        assert!(nodata_equal(None, None));
        assert!(!nodata_equal(Some(0.0), None));
    }
}
