//! Events emitted by the connection for handlers to consume.

use std::fmt;

/// Shadow event carrying each unparsed line, dispatched before parsing.
pub const ALL_RAW_MESSAGES: &str = "all_raw_messages";
/// Synthetic event fired exactly once when a connection is torn down.
pub const DISCONNECT: &str = "disconnect";

/// One IRCv3 message tag. Keys may repeat; order is wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: Option<String>,
}

/// A `nick!user@host` source, or a bare server name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NickMask(String);

impl NickMask {
    pub fn new(mask: impl Into<String>) -> Self {
        Self(mask.into())
    }

    /// Everything before `!`; the whole string for server names.
    pub fn nick(&self) -> &str {
        match self.0.split_once('!') {
            Some((nick, _)) => nick,
            None => &self.0,
        }
    }

    /// `user@host`, absent without a `!`.
    pub fn userhost(&self) -> Option<&str> {
        self.0.split_once('!').map(|(_, userhost)| userhost)
    }

    pub fn user(&self) -> Option<&str> {
        self.userhost()
            .map(|uh| uh.split_once('@').map_or(uh, |(user, _)| user))
    }

    pub fn host(&self) -> Option<&str> {
        self.userhost()
            .and_then(|uh| uh.split_once('@').map(|(_, host)| host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NickMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NickMask {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A protocol event. `kind` is the symbolic command name
/// (`pubmsg`, `welcome`, `disconnect`, ...); the set is open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: String,
    pub source: Option<NickMask>,
    pub target: Option<String>,
    pub arguments: Vec<String>,
    pub tags: Vec<Tag>,
}

impl Event {
    pub fn new(
        kind: impl Into<String>,
        source: Option<NickMask>,
        target: Option<String>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source,
            target,
            arguments,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Argument `n`, if present.
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.arguments.get(n).map(String::as_str)
    }

    /// Last value for `key`, if the tag is present with a value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|t| t.key == key)
            .and_then(|t| t.value.as_deref())
    }

    /// Nick of the source, or `""` for sourceless events.
    pub fn source_nick(&self) -> &str {
        self.source.as_ref().map_or("", NickMask::nick)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {}, source: ", self.kind)?;
        match &self.source {
            Some(source) => write!(f, "{source}")?,
            None => write!(f, "-")?,
        }
        write!(
            f,
            ", target: {}, arguments: {:?}",
            self.target.as_deref().unwrap_or("-"),
            self.arguments
        )?;
        if !self.tags.is_empty() {
            write!(f, ", tags: {:?}", self.tags)?;
        }
        Ok(())
    }
}

/// Channel-like targets start with one of `#&+!`.
pub fn is_channel(target: &str) -> bool {
    matches!(target.chars().next(), Some('#' | '&' | '+' | '!'))
}
