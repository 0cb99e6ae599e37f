//! Server features advertised through the `005` (ISUPPORT) numeric.

use std::collections::HashMap;

/// What the server said it supports.
///
/// Starts from RFC1459 defaults; each `featurelist` event refines it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    /// Channel user mode letter → status prefix, in rank order (`o` → `@`).
    pub prefix: Vec<(char, char)>,
    pub chantypes: Vec<char>,
    /// The four CHANMODES groups: list, always-param, set-param, no-param.
    pub chanmodes: [String; 4],
    /// Every other token, raw. A bare token maps to `None`.
    pub other: HashMap<String, Option<String>>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            prefix: vec![('o', '@'), ('v', '+')],
            chantypes: vec!['#', '&'],
            chanmodes: [
                "b".to_string(),
                "k".to_string(),
                "l".to_string(),
                "imnpst".to_string(),
            ],
            other: HashMap::new(),
        }
    }
}

impl FeatureSet {
    /// Apply the tokens of one `005` line (without the leading nick and
    /// the trailing "are supported by this server" text).
    pub fn load<S: AsRef<str>>(&mut self, tokens: &[S]) {
        for token in tokens {
            self.load_token(token.as_ref());
        }
    }

    fn load_token(&mut self, token: &str) {
        if let Some(name) = token.strip_prefix('-') {
            self.other.remove(&name.to_ascii_uppercase());
            return;
        }
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name.to_ascii_uppercase(), Some(value)),
            None => (token.to_ascii_uppercase(), None),
        };
        match (name.as_str(), value) {
            ("PREFIX", Some(value)) => {
                if let Some(prefix) = parse_prefix(value) {
                    self.prefix = prefix;
                }
            }
            ("CHANTYPES", Some(value)) => self.chantypes = value.chars().collect(),
            ("CHANMODES", Some(value)) => {
                let mut groups = value.split(',');
                for slot in self.chanmodes.iter_mut() {
                    *slot = groups.next().unwrap_or_default().to_string();
                }
            }
            _ => {
                self.other.insert(name, value.map(str::to_string));
            }
        }
    }

    /// Raw value of a feature; `Some(None)` when it was advertised bare.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.other
            .get(&name.to_ascii_uppercase())
            .map(|value| value.as_deref())
    }

    pub fn get_int(&self, name: &str) -> Option<u64> {
        self.get(name).flatten().and_then(|v| v.parse().ok())
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(&c))
    }
}

/// `(ov)@+` → `[('o','@'), ('v','+')]`
fn parse_prefix(value: &str) -> Option<Vec<(char, char)>> {
    let inner = value.strip_prefix('(')?;
    let (modes, symbols) = inner.split_once(')')?;
    if modes.chars().count() != symbols.chars().count() {
        return None;
    }
    Some(modes.chars().zip(symbols.chars()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let features = FeatureSet::default();
        assert!(features.is_channel("#rust"));
        assert!(!features.is_channel("+x"));
        assert_eq!(features.chanmodes[3], "imnpst");
    }

    #[test]
    fn loads_known_and_raw_tokens() {
        let mut features = FeatureSet::default();
        features.load(&[
            "PREFIX=(qaohv)~&@%+",
            "CHANTYPES=#+",
            "CHANMODES=beI,k,l,imnpst",
            "NICKLEN=25",
            "EXCEPTS",
        ]);
        assert_eq!(features.prefix.len(), 5);
        assert_eq!(features.prefix[0], ('q', '~'));
        assert!(features.is_channel("+local"));
        assert!(!features.is_channel("&old"));
        assert_eq!(features.chanmodes[0], "beI");
        assert_eq!(features.get_int("nicklen"), Some(25));
        assert_eq!(features.get("EXCEPTS"), Some(None));
        assert_eq!(features.get("MISSING"), None);
    }

    #[test]
    fn negated_token_removes_feature() {
        let mut features = FeatureSet::default();
        features.load(&["WHOX"]);
        features.load(&["-WHOX"]);
        assert_eq!(features.get("WHOX"), None);
    }

    #[test]
    fn malformed_prefix_is_ignored() {
        let mut features = FeatureSet::default();
        features.load(&["PREFIX=(ov)@"]);
        assert_eq!(features.prefix, FeatureSet::default().prefix);
    }
}
