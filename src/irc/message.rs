/// IRC message parsing and serialization.
///
/// Implements RFC 2812 message format:
///   [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
///
/// Messages are terminated by CR-LF (`\r\n`) on the wire,
/// but parsing operates on the content without the terminator.
use std::fmt;

/// Maximum IRC message length, including the trailing CR-LF.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Maximum number of parameters a message may carry.
pub const MAX_PARAMS: usize = 15;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// The command (e.g. `PRIVMSG`, `001`, `NICK`).
    pub command: String,
    /// Parameters — the last may have been a trailing param (with spaces).
    pub params: Vec<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build a message with no prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Message {
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Parse a single IRC message from a line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches("\r\n");

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = if input.starts_with(':') {
            // Prefix runs until the first space.
            match input[1..].find(' ') {
                Some(idx) => (Some(input[1..=idx].to_owned()), &input[idx + 2..]),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, input)
        };

        // Split into command and parameter portion.
        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();

        if let Some(mut remaining) = param_str {
            while !remaining.is_empty() {
                if remaining.starts_with(':') {
                    // Trailing parameter: everything after the colon, including spaces.
                    params.push(remaining[1..].to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        params.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to the IRC wire format (without trailing `\r\n`).
    ///
    /// Only the final parameter is `:`-prefixed, and only when it has to be
    /// (it is empty, contains a space, or itself starts with a colon).
    /// Re-serializing a parsed line therefore never grows it.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if !self.params.is_empty() {
            let last_idx = self.params.len() - 1;
            for (i, param) in self.params.iter().enumerate() {
                out.push(' ');
                if i == last_idx && needs_trailing_marker(param) {
                    out.push(':');
                }
                out.push_str(param);
            }
        }

        out
    }

    /// Serialized length of the message in octets, including the `\r\n`
    /// terminator. A well-formed message stays within [`MAX_MESSAGE_LEN`].
    pub fn wire_len(&self) -> usize {
        self.to_wire().len() + 2
    }
}

/// A last parameter needs the `:` marker when leaving it off would change
/// how the line reads back.
fn needs_trailing_marker(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
