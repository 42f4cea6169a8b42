//! Reply decoding
//!
//! The radio answers a query with `MOD[:CH] VERB VALUE`. Only the last
//! whitespace token carries data; it may itself be a comma-separated list or
//! a colon-separated `min:max:step` triple. A failed command is reported as
//! `MOD[:CH] VERB ERR CODE`.

use std::str::FromStr;

use tracing::trace;

use crate::error::{ParseError, ProtocolError};
use crate::values::ValueRange;

/// Sentinel token the radio uses to report a failed command
pub const ERROR_TOKEN: &str = "ERR";

/// Clean a raw datagram into a reply line
///
/// Trailing control characters are stripped and any non-ASCII byte is
/// replaced by a space.
pub fn clean_reply(data: &[u8]) -> String {
    let text: String = data
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { ' ' })
        .collect();
    text.trim_end_matches(|c: char| c.is_ascii_control() || c == ' ')
        .to_string()
}

/// Whether a reply line carries the `ERR` sentinel
pub fn is_error(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.len() {
        0 => false,
        1 => tokens[0] == ERROR_TOKEN,
        n => tokens[n - 1] == ERROR_TOKEN || tokens[n - 2] == ERROR_TOKEN,
    }
}

/// A decoded reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    raw: String,
    payload: String,
}

impl Reply {
    /// Decode a reply line, detecting the `ERR` sentinel
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim_end_matches(|c: char| c.is_ascii_control());
        if is_error(raw) {
            trace!("error reply {:?}", raw);
            return Err(ProtocolError::CommandFailure { reply: raw.into() });
        }
        let payload = raw
            .split_whitespace()
            .last()
            .ok_or(ParseError::Empty)?
            .to_string();
        Ok(Self {
            raw: raw.to_string(),
            payload,
        })
    }

    /// Full reply text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Last whitespace token
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Split the payload on `delim`
    ///
    /// With `expected = Some(n)` the payload is split into at most `n` fields
    /// and any other count is an arity error.
    pub fn fields(&self, delim: char, expected: Option<usize>) -> Result<Vec<&str>, ParseError> {
        split_fields(&self.payload, delim, expected)
    }

    /// Parse the payload as a single value
    pub fn value<T: FromStr>(&self) -> Result<T, ParseError> {
        parse_number(&self.payload)
    }

    /// Parse the first comma-separated field as a value
    pub fn first<T: FromStr>(&self) -> Result<T, ParseError> {
        let first = self.payload.split(',').next().unwrap_or_default();
        parse_number(first)
    }

    /// Parse the payload as a `0`/`1` flag
    pub fn flag(&self) -> Result<bool, ParseError> {
        parse_flag(self.payload.split(',').next().unwrap_or_default())
    }

    /// Parse the payload as a comma-separated list
    pub fn list(&self) -> Vec<String> {
        parse_list(&self.payload)
    }

    /// Parse the payload as a list of numbers
    pub fn numbers<T: FromStr>(&self) -> Result<Vec<T>, ParseError> {
        parse_list(&self.payload)
            .iter()
            .map(|s| parse_number(s))
            .collect()
    }

    /// Parse the payload as a `min:max:step` triple
    pub fn range(&self) -> Result<ValueRange, ParseError> {
        parse_range(&self.payload)
    }
}

/// Split a payload on `delim`, optionally enforcing arity
pub fn split_fields(
    payload: &str,
    delim: char,
    expected: Option<usize>,
) -> Result<Vec<&str>, ParseError> {
    match expected {
        None => Ok(payload.split(delim).collect()),
        Some(n) => {
            let fields: Vec<&str> = payload.splitn(n, delim).collect();
            if fields.len() != n {
                return Err(ParseError::Arity {
                    expected: n,
                    actual: fields.len(),
                    payload: payload.into(),
                });
            }
            Ok(fields)
        }
    }
}

/// Parse a comma-separated list, dropping empty entries
pub fn parse_list(payload: &str) -> Vec<String> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-separated enumeration into `(position, name)` pairs
pub fn parse_indexed_list(payload: &str) -> Vec<(usize, String)> {
    parse_list(payload).into_iter().enumerate().collect()
}

/// Parse a `min:max:step` triple (`min:max` means a continuous range)
pub fn parse_range(payload: &str) -> Result<ValueRange, ParseError> {
    let fields: Vec<&str> = payload.split(':').collect();
    let nums = fields
        .iter()
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| ParseError::InvalidRange(payload.into()))?;
    let range = match nums.as_slice() {
        [min, max] => ValueRange::new(*min, *max, 0.0),
        [min, max, step] => ValueRange::new(*min, *max, *step),
        _ => return Err(ParseError::InvalidRange(payload.into())),
    };
    if range.min > range.max || range.step < 0.0 {
        return Err(ParseError::InvalidRange(payload.into()));
    }
    Ok(range)
}

/// Whether a payload looks like a `min:max[:step]` range rather than a list
pub fn looks_like_range(payload: &str) -> bool {
    payload.contains(':') && !payload.contains(',')
}

/// Parse a numeric token
pub fn parse_number<T: FromStr>(token: &str) -> Result<T, ParseError> {
    token
        .trim()
        .parse::<T>()
        .map_err(|_| ParseError::InvalidNumber(token.into()))
}

/// Parse a `0`/`1` (or `ON`/`OFF`) flag
pub fn parse_flag(token: &str) -> Result<bool, ParseError> {
    match token.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" => Ok(true),
        "0" | "OFF" | "FALSE" => Ok(false),
        _ => Err(ParseError::InvalidNumber(token.into())),
    }
}

/// Encode a flag for the wire
pub fn encode_flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// Position of `name` in an enumeration, case-insensitive
pub fn index_of(choices: &[String], name: &str) -> Result<usize, ParseError> {
    choices
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))
        .ok_or_else(|| ParseError::UnknownName {
            name: name.into(),
            choices: choices.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reply_strips_controls_and_non_ascii() {
        let raw = b"RCV:1 FRQ 100.000000\r\n\0";
        assert_eq!(clean_reply(raw), "RCV:1 FRQ 100.000000");

        let raw = [b'A', 0xC3, 0xA9, b'B', b'\n'];
        assert_eq!(clean_reply(&raw), "A  B");
    }

    #[test]
    fn test_parse_payload() {
        let reply = Reply::parse("WBDDC:1 FRQ 12.500000").unwrap();
        assert_eq!(reply.payload(), "12.500000");
        assert_eq!(reply.value::<f64>().unwrap(), 12.5);
    }

    #[test]
    fn test_parse_error_sentinel() {
        let err = Reply::parse("RCV:1 FRQ ERR E_RANGE").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::CommandFailure {
                reply: "RCV:1 FRQ ERR E_RANGE".into()
            }
        );
        assert!(Reply::parse("BOGUS ERR").is_err());
        assert!(is_error("ERR"));
        assert!(!is_error("LOG MSKL ERRORS,WARNINGS"));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            Reply::parse("\n").unwrap_err(),
            ProtocolError::Parse(ParseError::Empty)
        );
    }

    #[test]
    fn test_fields_arity() {
        let reply = Reply::parse("OUT:1 IPP eth1:10.0.0.5:5000").unwrap();
        let fields = reply.fields(':', Some(3)).unwrap();
        assert_eq!(fields, vec!["eth1", "10.0.0.5", "5000"]);

        let err = reply.fields(',', Some(2)).unwrap_err();
        assert!(matches!(err, ParseError::Arity { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_fields_limit_keeps_remainder() {
        assert_eq!(
            split_fields("a:b:c:d", ':', Some(2)).unwrap(),
            vec!["a", "b:c:d"]
        );
    }

    #[test]
    fn test_parse_range() {
        let r = parse_range("30:3000:0.001").unwrap();
        assert_eq!(r.min, 30.0);
        assert_eq!(r.max, 3000.0);
        assert_eq!(r.step, 0.001);

        let r = parse_range("-40:40").unwrap();
        assert_eq!(r.step, 0.0);

        assert!(parse_range("1,2,3").is_err());
        assert!(parse_range("5:1:1").is_err());
    }

    #[test]
    fn test_parse_list_and_indexed() {
        assert_eq!(parse_list("SDDS, VITA49,,RAW"), vec!["SDDS", "VITA49", "RAW"]);
        assert_eq!(
            parse_indexed_list("BIG,LITTLE"),
            vec![(0, "BIG".to_string()), (1, "LITTLE".to_string())]
        );
        assert!(looks_like_range("8:64:8"));
        assert!(!looks_like_range("2,4"));
    }

    #[test]
    fn test_flags() {
        assert!(parse_flag("1").unwrap());
        assert!(!parse_flag("off").unwrap());
        assert!(parse_flag("2").is_err());
        let reply = Reply::parse("WBDDC:1 ENB 1,4096,0").unwrap();
        assert!(reply.flag().unwrap());
        assert_eq!(reply.first::<u32>().unwrap(), 1);
    }

    #[test]
    fn test_index_of() {
        let choices = vec!["SDDS".to_string(), "VITA49".to_string()];
        assert_eq!(index_of(&choices, "vita49").unwrap(), 1);
        assert!(index_of(&choices, "RAW").is_err());
    }
}
