//! Simulated module properties
//!
//! Each simulated module is a bag of properties keyed by verb. A property
//! knows how it is declared to clients (range, enumeration, value list) and
//! validates sets against that declaration, the way the hardware does.

use rxctl_protocol::units::format_number;
use rxctl_protocol::{parse_flag, parse_number, ValueRange};

/// How a property is declared and validated
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    /// Numeric value on a `min:max:step` grid, declared by `list_verb`
    Range {
        list_verb: &'static str,
        range: ValueRange,
    },
    /// Position into a named enumeration, declared by `list_verb`
    Choice {
        list_verb: &'static str,
        choices: Vec<String>,
    },
    /// Numeric value that must be one of `values`, declared by `list_verb`
    Values {
        list_verb: &'static str,
        values: Vec<f64>,
    },
    /// Numeric value inside a range that no list verb reports
    Number(ValueRange),
    /// Any single token
    Free,
    /// `0`/`1`
    Flag,
    /// Query only
    ReadOnly,
}

impl Decl {
    /// Build a range declaration
    pub fn range(list_verb: &'static str, min: f64, max: f64, step: f64) -> Self {
        Self::Range {
            list_verb,
            range: ValueRange::new(min, max, step),
        }
    }

    /// Build an unlisted numeric declaration
    pub fn number(min: f64, max: f64, step: f64) -> Self {
        Self::Number(ValueRange::new(min, max, step))
    }

    /// Build an enumeration declaration
    pub fn choice(list_verb: &'static str, choices: &[&str]) -> Self {
        Self::Choice {
            list_verb,
            choices: choices.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build a value-list declaration
    pub fn values(list_verb: &'static str, values: &[f64]) -> Self {
        Self::Values {
            list_verb,
            values: values.to_vec(),
        }
    }

    /// Verb that reports this declaration, if any
    pub fn list_verb(&self) -> Option<&'static str> {
        match self {
            Self::Range { list_verb, .. }
            | Self::Choice { list_verb, .. }
            | Self::Values { list_verb, .. } => Some(list_verb),
            _ => None,
        }
    }

    /// Text returned for the list verb
    pub fn describe(&self, precision: Option<usize>) -> String {
        let fmt = |v: f64| match precision {
            Some(p) => format!("{v:.p$}"),
            None => format_number(v),
        };
        match self {
            Self::Range { range, .. } | Self::Number(range) => {
                format!("{}:{}:{}", fmt(range.min), fmt(range.max), format_number(range.step))
            }
            Self::Choice { choices, .. } => choices.join(","),
            Self::Values { values, .. } => values
                .iter()
                .map(|v| format_number(*v))
                .collect::<Vec<_>>()
                .join(","),
            _ => String::new(),
        }
    }
}

/// Reasons a set is refused; rendered as the `ERR` code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Value outside the declaration
    Range,
    /// Value did not parse
    Syntax,
    /// Property cannot be set
    ReadOnly,
}

impl Refusal {
    /// Error code sent on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::Range => "E_RANGE",
            Self::Syntax => "E_SYNTAX",
            Self::ReadOnly => "E_READONLY",
        }
    }
}

/// A single simulated setting
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Declaration
    pub decl: Decl,
    /// Current value as rendered on the wire
    pub value: String,
    /// Decimal places used when rendering numeric values (MHz settings)
    pub precision: Option<usize>,
}

impl Property {
    /// Create a property
    pub fn new(decl: Decl, value: impl Into<String>) -> Self {
        Self {
            decl,
            value: value.into(),
            precision: None,
        }
    }

    /// Create a MHz-valued property rendered with 1 Hz resolution
    pub fn mhz(decl: Decl, value: f64) -> Self {
        Self {
            decl,
            value: format!("{value:.6}"),
            precision: Some(6),
        }
    }

    /// Numeric view of the current value
    pub fn number(&self) -> f64 {
        self.value
            .split(',')
            .next()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Apply a set, validating against the declaration
    pub fn set(&mut self, raw: &str) -> Result<(), Refusal> {
        let rendered = match &self.decl {
            Decl::ReadOnly => return Err(Refusal::ReadOnly),
            Decl::Free => raw.to_string(),
            Decl::Flag => {
                let on = parse_flag(raw).map_err(|_| Refusal::Syntax)?;
                if on { "1" } else { "0" }.to_string()
            }
            Decl::Choice { choices, .. } => {
                let idx: usize = parse_number(raw).map_err(|_| Refusal::Syntax)?;
                if idx >= choices.len() {
                    return Err(Refusal::Range);
                }
                idx.to_string()
            }
            Decl::Values { values, .. } => {
                let v: f64 = parse_number(raw).map_err(|_| Refusal::Syntax)?;
                if !values.iter().any(|c| (c - v).abs() < 1e-9) {
                    return Err(Refusal::Range);
                }
                self.render(v)
            }
            Decl::Range { range, .. } | Decl::Number(range) => {
                let v: f64 = parse_number(raw).map_err(|_| Refusal::Syntax)?;
                if !range.contains_on_grid(v) {
                    return Err(Refusal::Range);
                }
                self.render(v)
            }
        };
        self.value = rendered;
        Ok(())
    }

    fn render(&self, v: f64) -> String {
        match self.precision {
            Some(p) => format!("{v:.p$}"),
            None => format_number(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_property() {
        let mut p = Property::mhz(Decl::range("FRQL", 30.0, 3000.0, 0.001), 100.0);
        assert_eq!(p.value, "100.000000");
        p.set("101.5").unwrap();
        assert_eq!(p.value, "101.500000");
        assert_eq!(p.set("3000.5"), Err(Refusal::Range));
        assert_eq!(p.set("abc"), Err(Refusal::Syntax));
        assert_eq!(p.decl.describe(p.precision), "30.000000:3000.000000:0.001");
    }

    #[test]
    fn test_choice_property() {
        let mut p = Property::new(Decl::choice("POLL", &["SDDS", "VITA49"]), "0");
        p.set("1").unwrap();
        assert_eq!(p.value, "1");
        assert_eq!(p.set("2"), Err(Refusal::Range));
        assert_eq!(p.decl.describe(None), "SDDS,VITA49");
        assert_eq!(p.decl.list_verb(), Some("POLL"));
    }

    #[test]
    fn test_values_property() {
        let mut p = Property::new(Decl::values("DWDL", &[8.0, 16.0]), "16");
        p.set("8").unwrap();
        assert_eq!(p.number(), 8.0);
        assert_eq!(p.set("12"), Err(Refusal::Range));
    }

    #[test]
    fn test_read_only_and_flag() {
        let mut p = Property::new(Decl::ReadOnly, "5");
        assert_eq!(p.set("1"), Err(Refusal::ReadOnly));
        let mut n = Property::new(Decl::number(0.0, 5.0, 0.1), "3.3");
        n.set("2.5").unwrap();
        assert_eq!(n.set("5.5"), Err(Refusal::Range));
        assert_eq!(n.decl.list_verb(), None);
        let mut f = Property::new(Decl::Flag, "0");
        f.set("ON").unwrap();
        assert_eq!(f.value, "1");
    }
}
