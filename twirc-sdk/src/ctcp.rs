//! CTCP (Client-to-Client Protocol) extraction.
//!
//! Message bodies may embed tagged requests between `\x01` delimiters,
//! e.g. `\x01ACTION waves\x01`. [`dequote`] splits a body into literal
//! text and tagged segments in wire order.
//!
//! Two quoting layers are undone:
//! - low-level: `\x10` followed by `0`, `n`, `r` or `\x10`
//! - CTCP-level (tagged data only): `\a` for `\x01`, `\\` for `\`
//!
//! Bodies come straight off the network, so an unknown escape is kept
//! as-is rather than rejected.

/// The CTCP delimiter character (`\x01`).
pub const DELIMITER: char = '\x01';

const LOW_LEVEL_QUOTE: char = '\x10';

/// One piece of a dequoted message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Ordinary message text.
    Text(String),
    /// A delimited request: the tag (`ACTION`, `VERSION`, ...) and the
    /// text after its first space, if any.
    Tagged { tag: String, data: Option<String> },
}

/// Split a message body into its literal and tagged segments.
///
/// A body without any delimiter comes back as a single [`Segment::Text`].
/// An unmatched trailing delimiter is treated as literal text, delimiter
/// included.
pub fn dequote(message: &str) -> Vec<Segment> {
    let message = low_level_dequote(message);
    if !message.contains(DELIMITER) {
        return vec![Segment::Text(message)];
    }

    let chunks: Vec<&str> = message.split(DELIMITER).collect();
    let mut segments = Vec::new();
    let mut i = 0;
    while i + 1 < chunks.len() {
        if !chunks[i].is_empty() {
            segments.push(Segment::Text(chunks[i].to_string()));
        }
        if i + 2 < chunks.len() {
            segments.push(tagged(chunks[i + 1]));
        }
        i += 2;
    }

    if chunks.len() % 2 == 0 {
        // lonely delimiter: the last chunk is plain text
        if let Some(last) = chunks.last() {
            segments.push(Segment::Text(format!("{DELIMITER}{last}")));
        }
    } else if let Some(last) = chunks.last()
        && !last.is_empty()
    {
        segments.push(Segment::Text((*last).to_string()));
    }
    segments
}

fn tagged(chunk: &str) -> Segment {
    match chunk.split_once(' ') {
        Some((tag, data)) => Segment::Tagged {
            tag: tag.to_string(),
            data: Some(ctcp_unescape(data)),
        },
        None => Segment::Tagged {
            tag: chunk.to_string(),
            data: None,
        },
    }
}

fn low_level_dequote(s: &str) -> String {
    if !s.contains(LOW_LEVEL_QUOTE) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != LOW_LEVEL_QUOTE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(LOW_LEVEL_QUOTE) => out.push(LOW_LEVEL_QUOTE),
            Some(other) => {
                out.push(LOW_LEVEL_QUOTE);
                out.push(other);
            }
            None => out.push(LOW_LEVEL_QUOTE),
        }
    }
    out
}

fn ctcp_unescape(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('a') => out.push(DELIMITER),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    fn tag(t: &str, data: Option<&str>) -> Segment {
        Segment::Tagged {
            tag: t.to_string(),
            data: data.map(str::to_string),
        }
    }

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(dequote("hello world"), vec![text("hello world")]);
    }

    #[test]
    fn action() {
        assert_eq!(
            dequote("\x01ACTION waves hello\x01"),
            vec![tag("ACTION", Some("waves hello"))]
        );
    }

    #[test]
    fn tag_without_data() {
        assert_eq!(dequote("\x01VERSION\x01"), vec![tag("VERSION", None)]);
    }

    #[test]
    fn text_around_a_request() {
        assert_eq!(
            dequote("hi \x01PING 123\x01 there"),
            vec![text("hi "), tag("PING", Some("123")), text(" there")]
        );
    }

    #[test]
    fn two_requests_back_to_back() {
        assert_eq!(
            dequote("\x01PING 1\x01\x01TIME\x01"),
            vec![tag("PING", Some("1")), tag("TIME", None)]
        );
    }

    #[test]
    fn unmatched_delimiter_is_literal() {
        assert_eq!(dequote("a\x01b"), vec![text("a"), text("\x01b")]);
    }

    #[test]
    fn ctcp_level_escapes_in_data() {
        assert_eq!(
            dequote("\x01PING a\\ab\\\\c\x01"),
            vec![tag("PING", Some("a\x01b\\c"))]
        );
    }

    #[test]
    fn unknown_escapes_are_kept() {
        assert_eq!(
            dequote("\x01PING \\q\x01"),
            vec![tag("PING", Some("\\q"))]
        );
        assert_eq!(dequote("x\x10zy\x10"), vec![text("x\x10zy\x10")]);
    }

    #[test]
    fn low_level_quoting() {
        assert_eq!(dequote("a\x10nb\x10\x10"), vec![text("a\nb\x10")]);
    }
}
