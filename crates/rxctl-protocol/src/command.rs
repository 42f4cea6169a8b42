//! Request encoding
//!
//! A request line has the shape `MOD[:CH] VERB[?][ ARGS]\n`. The module part
//! is the registration name plus a channel number; channel 0 is rendered as
//! the bare name because globally addressed modules (console, router,
//! time-of-day) live there.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Line terminator appended to every request
pub const TERMINATOR: char = '\n';

/// Identity of a module on the radio: registration name plus channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleId {
    /// Registration name (the wire name, e.g. `WBDDC`)
    pub name: String,
    /// Channel number, 0 for globally addressed modules
    pub channel: u32,
}

impl ModuleId {
    /// Create a module id
    pub fn new(name: impl Into<String>, channel: u32) -> Self {
        Self {
            name: name.into(),
            channel,
        }
    }

    /// Create a globally addressed module id (channel 0)
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }

    /// Whether this id renders without a channel suffix
    pub fn is_global(&self) -> bool {
        self.channel == 0
    }

    /// Build a query command for this module
    pub fn query(&self, verb: &str) -> Command {
        Command::query(self.clone(), verb)
    }

    /// Build a set command for this module
    pub fn set(&self, verb: &str) -> Command {
        Command::set(self.clone(), verb)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.channel)
        }
    }
}

impl FromStr for ModuleId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::InvalidModuleId(s.into()));
        }
        match s.split_once(':') {
            None => Ok(Self::global(s)),
            Some((name, ch)) => {
                if name.is_empty() {
                    return Err(ParseError::InvalidModuleId(s.into()));
                }
                let channel = ch
                    .parse::<u32>()
                    .map_err(|_| ParseError::InvalidModuleId(s.into()))?;
                Ok(Self::new(name, channel))
            }
        }
    }
}

/// A single request to the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Target module
    pub module: ModuleId,
    /// Opcode (`FRQ`, `DEC`, ...)
    pub verb: String,
    /// Whether this is a query (`?` suffix)
    pub query: bool,
    /// Arguments, joined with `,` on the wire
    pub args: Vec<String>,
}

impl Command {
    /// Create a query command with no arguments
    pub fn query(module: ModuleId, verb: impl Into<String>) -> Self {
        Self {
            module,
            verb: verb.into(),
            query: true,
            args: Vec::new(),
        }
    }

    /// Create a set command with no arguments
    pub fn set(module: ModuleId, verb: impl Into<String>) -> Self {
        Self {
            module,
            verb: verb.into(),
            query: false,
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Encode to the wire line, including the terminator
    pub fn encode(&self) -> String {
        let mut line = format!("{} {}", self.module, self.verb);
        if self.query {
            line.push('?');
        }
        if !self.args.is_empty() {
            line.push(' ');
            line.push_str(&self.args.join(","));
        }
        line.push(TERMINATOR);
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode().trim_end())
    }
}

/// A request line decoded on the radio side
///
/// The simulator uses this to dispatch incoming lines; it is the inverse of
/// [`Command::encode`].
pub fn decode_request(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let mut parts = line.splitn(3, char::is_whitespace);
    let module = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::Empty)?
        .parse::<ModuleId>()?;
    let raw_verb = parts.next().ok_or(ParseError::Empty)?;
    let (verb, query) = match raw_verb.strip_suffix('?') {
        Some(v) => (v.to_string(), true),
        None => (raw_verb.to_string(), false),
    };
    let args = parts
        .next()
        .map(|rest| {
            rest.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(Command {
        module,
        verb,
        query,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_display() {
        assert_eq!(ModuleId::new("WBDDC", 3).to_string(), "WBDDC:3");
        assert_eq!(ModuleId::global("CON").to_string(), "CON");
    }

    #[test]
    fn test_module_id_parse() {
        assert_eq!("NBDDC:12".parse::<ModuleId>().unwrap(), ModuleId::new("NBDDC", 12));
        assert_eq!("SRT".parse::<ModuleId>().unwrap(), ModuleId::global("SRT"));
        assert!("OUT:x".parse::<ModuleId>().is_err());
        assert!(":1".parse::<ModuleId>().is_err());
        assert!("".parse::<ModuleId>().is_err());
    }

    #[test]
    fn test_encode_query() {
        let cmd = ModuleId::new("RCV", 1).query("FRQ");
        assert_eq!(cmd.encode(), "RCV:1 FRQ?\n");
    }

    #[test]
    fn test_encode_set_with_args() {
        let cmd = ModuleId::new("WBDDC", 2).set("ENB").args(["1", "4096", "0"]);
        assert_eq!(cmd.encode(), "WBDDC:2 ENB 1,4096,0\n");
    }

    #[test]
    fn test_encode_global_query_with_arg() {
        let cmd = ModuleId::global("SRT").query("SRC").arg("OUT:4");
        assert_eq!(cmd.encode(), "SRT SRC? OUT:4\n");
    }

    #[test]
    fn test_decode_request_roundtrip() {
        let cmd = ModuleId::global("SRT").set("LNK").args(["NBDDC:1", "OUT:3"]);
        let decoded = decode_request(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_decode_request_whitespace_args() {
        let cmd = decode_request("OUT:1 IPP 10.0.0.2:5000\n").unwrap();
        assert_eq!(cmd.verb, "IPP");
        assert!(!cmd.query);
        assert_eq!(cmd.args, vec!["10.0.0.2:5000".to_string()]);
    }

    #[test]
    fn test_decode_request_rejects_blank() {
        assert_eq!(decode_request("   \n"), Err(ParseError::Empty));
    }
}
