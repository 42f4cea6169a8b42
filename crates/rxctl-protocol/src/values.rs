//! Admissible-value selection
//!
//! Every radio setting is declared either as an enumeration (a list of legal
//! values) or as an arithmetic `min:max:step` range. The two selectors here
//! turn a caller's request into a value the radio will accept, or reject it.

use crate::error::ProtocolError;

/// Slack used when comparing values that went through decimal formatting
const EPSILON: f64 = 1e-9;

/// An arithmetic range of legal values
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueRange {
    /// Smallest legal value
    pub min: f64,
    /// Largest legal value
    pub max: f64,
    /// Grid spacing, 0 for a continuous range
    pub step: f64,
}

impl ValueRange {
    /// Create a range
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Multiply every bound by `factor` (unit conversion)
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
            step: self.step * factor,
        }
    }

    /// Shift the bounds by `offset` (IF range to RF range)
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
            step: self.step,
        }
    }

    /// Whether `value` lies inside the bounds (grid not checked)
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether `value` lies inside the bounds and on the grid
    pub fn contains_on_grid(&self, value: f64) -> bool {
        if !self.contains(value) {
            return false;
        }
        if self.step <= 0.0 {
            return true;
        }
        let k = (value - self.min) / self.step;
        (k - k.round()).abs() <= EPSILON * k.abs().max(1.0)
    }

    /// Enumerate every grid point (only sensible for small ranges)
    pub fn points(&self) -> Vec<f64> {
        if self.step <= 0.0 {
            return vec![self.min, self.max];
        }
        let count = ((self.max - self.min) / self.step + EPSILON).floor() as usize;
        (0..=count)
            .map(|k| self.min + k as f64 * self.step)
            .collect()
    }
}

/// A setting's declared legal values: an arithmetic range or an enumeration
///
/// The radio reports either form through the same list verb; `min:max:step`
/// is a range, anything else a comma-separated list.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Declared {
    /// `min:max:step`
    Range(ValueRange),
    /// Comma-separated values, in declaration order
    List(Vec<f64>),
}

impl Declared {
    /// Decode a list-verb payload, detecting its form
    pub fn parse(payload: &str) -> Result<Self, crate::error::ParseError> {
        if crate::reply::looks_like_range(payload) {
            return crate::reply::parse_range(payload).map(Self::Range);
        }
        crate::reply::parse_list(payload)
            .iter()
            .map(|s| crate::reply::parse_number(s))
            .collect::<Result<Vec<f64>, _>>()
            .map(Self::List)
    }

    /// Whether the values are enumerated (set by position on the wire)
    pub fn is_enumerated(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Every legal value, in declaration order
    pub fn values(&self) -> Vec<f64> {
        match self {
            Self::Range(range) => range.points(),
            Self::List(values) => values.clone(),
        }
    }

    /// Position of `value` in the enumeration
    pub fn position(&self, value: f64) -> Option<usize> {
        match self {
            Self::Range(_) => None,
            Self::List(values) => values.iter().position(|v| (v - value).abs() <= EPSILON),
        }
    }

    /// Smallest legal value
    pub fn min(&self) -> Option<f64> {
        match self {
            Self::Range(range) => Some(range.min),
            Self::List(values) => values.iter().copied().reduce(f64::min),
        }
    }

    /// Largest legal value
    pub fn max(&self) -> Option<f64> {
        match self {
            Self::Range(range) => Some(range.max),
            Self::List(values) => values.iter().copied().reduce(f64::max),
        }
    }

    /// Select a legal value for `requested`, rounding up
    pub fn select(&self, requested: Option<f64>, tolerance_percent: f64) -> Result<f64, ProtocolError> {
        match self {
            Self::Range(range) => get_value_valid(requested, tolerance_percent, *range, true),
            Self::List(values) => get_value_valid_list(requested, tolerance_percent, values, false),
        }
    }

    /// Whether `value` is legal exactly
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            Self::Range(range) => range.contains_on_grid(value),
            Self::List(_) => self.position(value).is_some(),
        }
    }
}

fn invalid(value: f64, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidValue {
        value,
        reason: reason.into(),
    }
}

/// Select a legal value from an enumerated list
///
/// - `None` or a non-positive request selects the minimum, or the maximum
///   when `prefer_max` is set.
/// - Otherwise the first candidate `c` (ascending) with
///   `requested <= c <= requested * (1 + tolerance_percent / 100)` wins.
/// - No such candidate is an [`ProtocolError::InvalidValue`].
pub fn get_value_valid_list(
    requested: Option<f64>,
    tolerance_percent: f64,
    candidates: &[f64],
    prefer_max: bool,
) -> Result<f64, ProtocolError> {
    let mut sorted: Vec<f64> = candidates.iter().copied().filter(|c| !c.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    let (Some(&lowest), Some(&highest)) = (sorted.first(), sorted.last()) else {
        return Err(invalid(
            requested.unwrap_or_default(),
            "no candidate values declared",
        ));
    };

    let requested = match requested {
        Some(r) if r > 0.0 => r,
        _ => return Ok(if prefer_max { highest } else { lowest }),
    };

    let ceiling = requested * (1.0 + tolerance_percent / 100.0);
    sorted
        .into_iter()
        .find(|&c| c >= requested && c <= ceiling)
        .ok_or_else(|| {
            invalid(
                requested,
                format!(
                    "no candidate in [{requested}, {ceiling}] among {lowest}..{highest}"
                ),
            )
        })
}

/// Select a legal value from an arithmetic range
///
/// Requests outside `[min, max]` are rejected. Inside the range the request
/// is snapped up to the next grid point (`closest_ceil`) or to the nearest
/// one; the snapped value must stay within `tolerance_percent` of the
/// request, so a zero tolerance only accepts values already on the grid.
pub fn get_value_valid(
    requested: Option<f64>,
    tolerance_percent: f64,
    range: ValueRange,
    closest_ceil: bool,
) -> Result<f64, ProtocolError> {
    let Some(requested) = requested else {
        return Ok(range.min);
    };
    if requested.is_nan() {
        return Err(invalid(requested, "not a number"));
    }
    if requested < range.min || requested > range.max {
        return Err(invalid(
            requested,
            format!("outside {}..{}", range.min, range.max),
        ));
    }
    if range.step <= 0.0 {
        return Ok(requested);
    }

    let steps = (requested - range.min) / range.step;
    let k = if closest_ceil {
        (steps - EPSILON).ceil()
    } else {
        steps.round()
    };
    let mut snapped = range.min + k * range.step;
    if snapped > range.max {
        snapped = range.max;
    }

    let slack = requested.abs() * tolerance_percent / 100.0 + EPSILON * range.step.max(1.0);
    if (snapped - requested).abs() > slack {
        return Err(invalid(
            requested,
            format!(
                "nearest legal value {snapped} is outside {tolerance_percent}% tolerance"
            ),
        ));
    }
    Ok(snapped)
}

/// Check that `value` lies in a `min:max:step` declaration
pub fn in_range(value: f64, declaration: &str) -> Result<(), ProtocolError> {
    let range = crate::reply::parse_range(declaration)?;
    if range.contains_on_grid(value) {
        Ok(())
    } else {
        Err(invalid(value, format!("not in {declaration}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RATES: [f64; 2] = [25_000_000.0, 50_000_000.0];

    #[test]
    fn test_list_default_selection() {
        assert_eq!(get_value_valid_list(None, 1.0, &RATES, false).unwrap(), 25e6);
        assert_eq!(get_value_valid_list(None, 1.0, &RATES, true).unwrap(), 50e6);
        assert_eq!(get_value_valid_list(Some(0.0), 1.0, &RATES, false).unwrap(), 25e6);
        assert_eq!(get_value_valid_list(Some(-3.0), 1.0, &RATES, true).unwrap(), 50e6);
    }

    #[test]
    fn test_list_exact_bounds() {
        assert_eq!(get_value_valid_list(Some(25e6), 0.0, &RATES, false).unwrap(), 25e6);
        assert_eq!(get_value_valid_list(Some(50e6), 0.0, &RATES, false).unwrap(), 50e6);
    }

    #[test]
    fn test_list_ceiling_rule() {
        // Above the smaller candidate, and the next one is outside 1%
        assert!(get_value_valid_list(Some(25_000_001.0), 0.0, &RATES, false).is_err());
        assert!(get_value_valid_list(Some(25_000_001.0), 1.0, &RATES, false).is_err());
        // 100% tolerance reaches the next candidate
        assert_eq!(
            get_value_valid_list(Some(25_000_001.0), 100.0, &RATES, false).unwrap(),
            50e6
        );
        // Within tolerance below a candidate
        assert_eq!(
            get_value_valid_list(Some(24_900_000.0), 1.0, &RATES, false).unwrap(),
            25e6
        );
    }

    #[test]
    fn test_list_above_max_rejected() {
        let above = f64::from_bits(50e6f64.to_bits() + 1);
        assert!(get_value_valid_list(Some(above), 100.0, &RATES, false).is_err());
    }

    #[test]
    fn test_list_unsorted_candidates() {
        let list = [40e6, 10e6, 20e6];
        assert_eq!(get_value_valid_list(Some(15e6), 50.0, &list, false).unwrap(), 20e6);
    }

    #[test]
    fn test_list_empty() {
        assert!(get_value_valid_list(Some(1.0), 1.0, &[], false).is_err());
    }

    #[test]
    fn test_range_snapping() {
        let range = ValueRange::new(30e6, 3e9, 1e3);
        assert_eq!(get_value_valid(Some(100e6), 0.0, range, true).unwrap(), 100e6);
        assert_eq!(
            get_value_valid(Some(100_000_500.0), 100.0, range, true).unwrap(),
            100_001_000.0
        );
        assert_eq!(
            get_value_valid(Some(100_000_400.0), 100.0, range, false).unwrap(),
            100_000_000.0
        );
        assert!(get_value_valid(Some(100_000_500.0), 0.0, range, true).is_err());
        assert_eq!(get_value_valid(None, 0.0, range, true).unwrap(), 30e6);
    }

    #[test]
    fn test_range_bounds() {
        let range = ValueRange::new(30e6, 3e9, 1e3);
        assert_eq!(get_value_valid(Some(30e6), 0.0, range, true).unwrap(), 30e6);
        assert_eq!(get_value_valid(Some(3e9), 0.0, range, true).unwrap(), 3e9);
        let above = f64::from_bits(3e9f64.to_bits() + 1);
        assert!(get_value_valid(Some(above), 100.0, range, false).is_err());
        assert!(get_value_valid(Some(29_999_999.0), 100.0, range, true).is_err());
    }

    #[test]
    fn test_range_negative_offsets() {
        let range = ValueRange::new(-40e6, 40e6, 1.0);
        assert_eq!(get_value_valid(Some(-9e6), 0.0, range, true).unwrap(), -9e6);
        assert!(get_value_valid(Some(-99e6), 100.0, range, true).is_err());
    }

    #[test]
    fn test_range_continuous() {
        let range = ValueRange::new(0.0, 10.0, 0.0);
        assert_eq!(get_value_valid(Some(3.3), 0.0, range, true).unwrap(), 3.3);
    }

    #[test]
    fn test_in_range() {
        assert!(in_range(16.0, "8:64:8").is_ok());
        assert!(in_range(12.0, "8:64:8").is_err());
        assert!(in_range(72.0, "8:64:8").is_err());
        assert!(in_range(1.0, "garbage").is_err());
    }

    #[test]
    fn test_declared_detection() {
        let range = Declared::parse("16:256:16").unwrap();
        assert!(!range.is_enumerated());
        assert!(range.accepts(32.0));
        assert!(!range.accepts(33.0));
        assert_eq!(range.select(Some(20.0), 100.0).unwrap(), 32.0);

        let list = Declared::parse("2,4").unwrap();
        assert!(list.is_enumerated());
        assert_eq!(list.position(4.0), Some(1));
        assert_eq!(list.values(), vec![2.0, 4.0]);
        assert_eq!(list.max(), Some(4.0));
        assert!(Declared::parse("a,b").is_err());
    }

    #[test]
    fn test_points() {
        let range = ValueRange::new(8.0, 32.0, 8.0);
        assert_eq!(range.points(), vec![8.0, 16.0, 24.0, 32.0]);
    }

    proptest! {
        #[test]
        fn prop_list_selection_is_admissible(
            mut candidates in proptest::collection::vec(1.0f64..1e9, 1..16),
            requested in 1.0f64..1e9,
            tolerance in 0.0f64..200.0,
        ) {
            candidates.dedup();
            if let Ok(chosen) = get_value_valid_list(Some(requested), tolerance, &candidates, false) {
                prop_assert!(candidates.contains(&chosen));
                prop_assert!(chosen >= requested);
                prop_assert!(chosen <= requested * (1.0 + tolerance / 100.0));
            }
        }

        #[test]
        fn prop_every_grid_point_is_accepted_exactly(k in 0u32..1000) {
            let range = ValueRange::new(30e6, 3e9, 1e3);
            let value = range.min + f64::from(k) * range.step;
            prop_assert_eq!(get_value_valid(Some(value), 0.0, range, true).unwrap(), value);
        }

        #[test]
        fn prop_range_selection_stays_in_bounds(requested in 30e6f64..3e9, tolerance in 0.0f64..100.0) {
            let range = ValueRange::new(30e6, 3e9, 1e3);
            if let Ok(v) = get_value_valid(Some(requested), tolerance, range, true) {
                prop_assert!(range.contains(v));
                prop_assert!(v >= requested - 1e-6);
            }
        }
    }
}
