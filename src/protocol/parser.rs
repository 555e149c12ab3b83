use crate::error::{KvError, Result};
use crate::protocol::command::{Command, CommandKind};

/// Command parsing capability.
///
/// `command_id` must accept exactly the inputs `parse_command` accepts, so a
/// request that routes also executes.
pub trait CommandsParser: Send + Sync {
    /// Parse command text into a `Command`
    fn parse_command(&self, text: &str) -> Result<Command>;

    /// Extract only the shard key (empty for `getAllItems()`)
    fn command_id(&self, text: &str) -> Result<String>;
}

/// Parser for the command text grammar:
///
/// ```text
/// addItem('KEY', 'VALUE')
/// deleteItem('KEY')
/// getItem('KEY')
/// getAllItems()
/// ```
///
/// Verbs are case-sensitive, arguments are single-quoted with no escaping,
/// and whitespace is allowed only around arguments inside the parentheses.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandParser;

impl CommandParser {
    pub fn new() -> Self {
        Self
    }

    fn parse(input: &str) -> Result<Command> {
        let open = input
            .find('(')
            .ok_or_else(|| malformed(format!("missing '(' in {:?}", input)))?;
        let verb = &input[..open];
        let kind = CommandKind::from_verb(verb)
            .ok_or_else(|| malformed(format!("unknown command '{}'", verb)))?;

        let bytes = input.as_bytes();
        let mut pos = open + 1;
        let mut args = Vec::with_capacity(kind.arity());

        for i in 0..kind.arity() {
            if i > 0 {
                Self::skip_whitespace(bytes, &mut pos);
                Self::expect(bytes, &mut pos, b',')?;
            }
            Self::skip_whitespace(bytes, &mut pos);
            args.push(Self::parse_quoted(input, &mut pos)?);
        }
        if kind.arity() > 0 {
            Self::skip_whitespace(bytes, &mut pos);
        }
        Self::expect(bytes, &mut pos, b')')?;

        if pos != bytes.len() {
            return Err(malformed(format!(
                "unexpected trailing input {:?}",
                &input[pos..]
            )));
        }

        let mut args = args.into_iter();
        let key = args.next().unwrap_or_default();
        let value = args.next().unwrap_or_default();
        Ok(Command { kind, key, value })
    }

    fn parse_quoted(input: &str, pos: &mut usize) -> Result<String> {
        Self::expect(input.as_bytes(), pos, b'\'')?;
        let start = *pos;
        let len = input[start..]
            .find('\'')
            .ok_or_else(|| malformed("unterminated quoted argument"))?;
        *pos = start + len + 1;
        Ok(input[start..start + len].to_string())
    }

    fn expect(bytes: &[u8], pos: &mut usize, expected: u8) -> Result<()> {
        match bytes.get(*pos) {
            Some(&byte) if byte == expected => {
                *pos += 1;
                Ok(())
            }
            Some(&byte) => Err(malformed(format!(
                "expected '{}' at offset {}, found '{}'",
                expected as char, *pos, byte as char
            ))),
            None => Err(malformed(format!(
                "expected '{}' at offset {}, found end of input",
                expected as char, *pos
            ))),
        }
    }

    fn skip_whitespace(bytes: &[u8], pos: &mut usize) {
        while bytes.get(*pos).is_some_and(u8::is_ascii_whitespace) {
            *pos += 1;
        }
    }
}

impl CommandsParser for CommandParser {
    fn parse_command(&self, text: &str) -> Result<Command> {
        Self::parse(text)
    }

    fn command_id(&self, text: &str) -> Result<String> {
        Self::parse(text).map(|cmd| cmd.shard_key().to_string())
    }
}

fn malformed(detail: impl Into<String>) -> KvError {
    KvError::MalformedCommand(detail.into())
}
