//! IRC line codec.
//! A minimal parser/formatter for RFC1459 protocol lines.
//!
//! Supports IRCv3 message tags: `@key=value;key2 :prefix COMMAND params :trailing`

use std::fmt;

use crate::error::ParseError;
use crate::event::Tag;

/// A parsed IRC line. The command is kept exactly as received;
/// [`crate::numeric::command_name`] produces the event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags, in wire order.
    pub tags: Vec<Tag>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a raw IRC line (trailing CR/LF is ignored).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut rest = line;

        // Tags: @key=value;key2=value2, only when followed by a space
        let mut tags = Vec::new();
        if let Some(after) = rest.strip_prefix('@')
            && let Some((tag_str, tail)) = after.split_once(' ')
        {
            tags = parse_tags(tag_str);
            rest = tail;
        }

        // Prefix: :server or :nick!user@host, then one or more spaces
        let mut prefix = None;
        if let Some(after) = rest.strip_prefix(':')
            && let Some(space) = after.find(' ')
            && space > 0
        {
            prefix = Some(after[..space].to_string());
            rest = after[space..].trim_start_matches(' ');
        }

        let (command, remainder) = match rest.find(' ') {
            Some(0) => return Err(ParseError::MissingCommand(line.to_string())),
            Some(space) => (&rest[..space], &rest[space..]),
            None if rest.is_empty() => {
                return Err(ParseError::MissingCommand(line.to_string()));
            }
            None => (rest, ""),
        };

        Ok(Message {
            tags,
            prefix,
            command: command.to_string(),
            params: parse_params(remainder),
        })
    }

    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            tags: Vec::new(),
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                match &tag.value {
                    Some(value) => write!(f, "{}={}", tag.key, escape_tag_value(value))?,
                    None => write!(f, "{}", tag.key)?,
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// Split the text after the command. Everything up to the first `" :"`
/// is whitespace-separated; whatever follows it is one final argument.
fn parse_params(remainder: &str) -> Vec<String> {
    // Keep exactly one leading space so a bare ":trailing" still matches " :".
    let trimmed = remainder.trim_start_matches(' ');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let group = &remainder[remainder.len() - trimmed.len() - 1..];

    let (main, trailing) = match group.split_once(" :") {
        Some((main, trailing)) => (main, Some(trailing)),
        None => (group, None),
    };
    let mut params: Vec<String> = main.split_whitespace().map(str::to_string).collect();
    if let Some(trailing) = trailing {
        params.push(trailing.to_string());
    }
    params
}

/// Parse IRCv3 tag string: `key=value;key2=value2`.
/// A tag without `=`, or with an empty value, has no value.
fn parse_tags(tag_str: &str) -> Vec<Tag> {
    tag_str
        .split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !value.is_empty() => Tag {
                key: key.to_string(),
                value: Some(unescape_tag_value(value)),
            },
            Some((key, _)) => Tag {
                key: key.to_string(),
                value: None,
            },
            None => Tag {
                key: pair.to_string(),
                value: None,
            },
        })
        .collect()
}

/// Unescape IRCv3 tag values.
/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF
fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Escape a value for IRCv3 tag encoding.
/// `;` → `\:`, space → `\s`, `\` → `\\`, CR → `\r`, LF → `\n`
fn escape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let msg = Message::parse("NICK alice").unwrap();
        assert!(msg.tags.is_empty());
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
    }

    #[test]
    fn parse_with_tags_and_prefix() {
        let msg = Message::parse(
            "@badge-info=;color=#1E90FF;display-name=Alice :alice!a@host PRIVMSG #chan :check this out",
        )
        .unwrap();
        assert_eq!(msg.tags.len(), 3);
        assert_eq!(msg.tags[0].key, "badge-info");
        assert_eq!(msg.tags[0].value, None);
        assert_eq!(msg.tags[1].value.as_deref(), Some("#1E90FF"));
        assert_eq!(msg.tags[2].value.as_deref(), Some("Alice"));
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "check this out"]);
    }

    #[test]
    fn valueless_tag_has_no_value() {
        let msg = Message::parse("@draft/reply PRIVMSG #chan :text").unwrap();
        assert_eq!(msg.tags[0].key, "draft/reply");
        assert_eq!(msg.tags[0].value, None);
    }

    #[test]
    fn tag_values_are_unescaped() {
        let msg =
            Message::parse("@system-msg=A\\ssub\\:\\sthanks :tmi USERNOTICE #chan").unwrap();
        assert_eq!(msg.tags[0].value.as_deref(), Some("A sub; thanks"));
    }

    #[test]
    fn duplicate_tag_keys_are_kept_in_order() {
        let msg = Message::parse("@a=1;a=2 PING x").unwrap();
        assert_eq!(msg.tags.len(), 2);
        assert_eq!(msg.tags[1].value.as_deref(), Some("2"));
    }

    #[test]
    fn trailing_argument_keeps_spaces_and_colons() {
        let msg = Message::parse(":srv 372 me :- hello :: world ").unwrap();
        assert_eq!(msg.params, vec!["me", "- hello :: world "]);
    }

    #[test]
    fn trailing_only_argument() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn extra_spaces_between_middle_params() {
        let msg = Message::parse(":a!b@c   MODE   #chan  +o   bob").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("a!b@c"));
        assert_eq!(msg.params, vec!["#chan", "+o", "bob"]);
    }

    #[test]
    fn command_without_params() {
        let msg = Message::parse(":server RECONNECT").unwrap();
        assert_eq!(msg.command, "RECONNECT");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn empty_line_is_rejected() {
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
    }

    #[test]
    fn leading_space_has_no_command() {
        assert!(matches!(
            Message::parse(" PRIVMSG #a :b"),
            Err(ParseError::MissingCommand(_))
        ));
    }

    #[test]
    fn format_roundtrips_a_wire_line() {
        let line = "@id=abc;flag :nick!u@h PRIVMSG #chan :hello there";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.to_string(), line);
        assert_eq!(Message::parse(&msg.to_string()).unwrap(), msg);
    }

    #[test]
    fn format_escapes_tag_values() {
        let mut msg = Message::new("TAGMSG", vec!["#chan"]);
        msg.tags.push(Tag {
            key: "note".into(),
            value: Some("a b;c".into()),
        });
        assert_eq!(msg.to_string(), "@note=a\\sb\\:c TAGMSG #chan");
    }
}
