use crate::error::{ProtocolError, Result};

/// Match `text` against a glob `pattern` where `*` matches any run of
/// characters and `?` matches exactly one. No character classes, no escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            // Backtrack: let the last '*' swallow one more character.
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// One subscription filter token of the form `[LL]CCC[.T]`.
///
/// `LL` is a two-character location pattern, `CCC` a three-character channel
/// pattern and `T` a single record-type letter; `?` is a single-character
/// wildcard in the location and channel fields. A leading `!` negates the
/// selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub negated: bool,
    pub location: Option<String>,
    pub channel: String,
    pub kind: Option<char>,
}

impl Selector {
    pub fn parse(token: &str) -> Result<Self> {
        let (negated, body) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token),
        };

        let (base, kind) = match body.split_once('.') {
            Some((base, t)) => {
                let mut chars = t.chars();
                let kind = chars.next();
                if kind.is_none() || chars.next().is_some() {
                    return Err(ProtocolError::InvalidSelector(token.to_owned()));
                }
                (base, kind)
            }
            None => (body, None),
        };

        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '?' || c == '-')
        };

        let (location, channel) = match base.len() {
            3 => (None, base.to_owned()),
            5 => (Some(base[..2].to_owned()), base[2..].to_owned()),
            _ => return Err(ProtocolError::InvalidSelector(token.to_owned())),
        };

        if !valid(&channel) || location.as_deref().is_some_and(|l| !valid(l)) {
            return Err(ProtocolError::InvalidSelector(token.to_owned()));
        }

        Ok(Self {
            negated,
            location,
            channel,
            kind,
        })
    }

    /// Test this selector (ignoring negation) against a record's location,
    /// channel and type letter.
    fn covers(&self, location: &str, channel: &str, kind: char) -> bool {
        if let Some(ref loc_pat) = self.location {
            if !field_match(loc_pat, location, 2) {
                return false;
            }
        }
        if !field_match(&self.channel, channel, 3) {
            return false;
        }
        match self.kind {
            Some('?') | None => true,
            Some(k) => k.eq_ignore_ascii_case(&kind),
        }
    }

    /// Render back to the wire token, negation marker included.
    pub fn to_token(&self) -> String {
        let mut out = String::new();
        if self.negated {
            out.push('!');
        }
        if let Some(ref loc) = self.location {
            out.push_str(loc);
        }
        out.push_str(&self.channel);
        if let Some(kind) = self.kind {
            out.push('.');
            out.push(kind);
        }
        out
    }
}

/// Fixed-width field comparison with `?` wildcards. Short record fields are
/// space-padded on the wire; trailing spaces and `-` placeholders are treated
/// as blanks.
fn field_match(pattern: &str, value: &str, width: usize) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let mut val: Vec<char> = value.chars().collect();
    val.resize(width, ' ');
    if pat.len() != width {
        return false;
    }
    pat.iter().zip(val.iter()).all(|(p, v)| {
        *p == '?'
            || p.eq_ignore_ascii_case(v)
            || (*p == '-' && *v == ' ')
            || (*p == ' ' && *v == ' ')
    })
}

/// An ordered list of selectors applying the accept/reject semantics:
/// a record is accepted if it matches any positive selector (or the list has
/// no positive selectors) and matches no negative selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectorList(pub Vec<Selector>);

impl SelectorList {
    /// Parse a space-separated selector string, e.g. `"BHZ.D !99HHZ"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let selectors = spec
            .split_whitespace()
            .map(Selector::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(selectors))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, location: &str, channel: &str, kind: char) -> bool {
        let mut has_positive = false;
        let mut positive_hit = false;
        for sel in &self.0 {
            let hit = sel.covers(location, channel, kind);
            if sel.negated {
                if hit {
                    return false;
                }
            } else {
                has_positive = true;
                positive_hit |= hit;
            }
        }
        !has_positive || positive_hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_exact() {
        assert!(glob_match("ANMO", "ANMO"));
        assert!(!glob_match("ANMO", "ANTO"));
    }

    #[test]
    fn glob_question() {
        assert!(glob_match("AN?O", "ANMO"));
        assert!(!glob_match("AN?O", "ANMOX"));
    }

    #[test]
    fn glob_star() {
        assert!(glob_match("*", "ANMO"));
        assert!(glob_match("*", ""));
        assert!(glob_match("A*O", "ANMO"));
        assert!(glob_match("A*", "A"));
        assert!(!glob_match("A*O", "ANMX"));
    }

    #[test]
    fn glob_star_backtracking() {
        assert!(glob_match("*MO", "ANMO"));
        assert!(glob_match("A*M*O", "AXMXMO"));
        assert!(!glob_match("*MOX", "ANMO"));
    }

    #[test]
    fn glob_empty_pattern() {
        assert!(glob_match("", ""));
        assert!(!glob_match("", "A"));
    }

    #[test]
    fn parse_channel_only() {
        let sel = Selector::parse("BHZ").unwrap();
        assert_eq!(sel.location, None);
        assert_eq!(sel.channel, "BHZ");
        assert_eq!(sel.kind, None);
        assert!(!sel.negated);
    }

    #[test]
    fn parse_with_location() {
        let sel = Selector::parse("00BHZ").unwrap();
        assert_eq!(sel.location.as_deref(), Some("00"));
        assert_eq!(sel.channel, "BHZ");
    }

    #[test]
    fn parse_with_type() {
        let sel = Selector::parse("BHZ.D").unwrap();
        assert_eq!(sel.kind, Some('D'));
    }

    #[test]
    fn parse_negated() {
        let sel = Selector::parse("!LOG").unwrap();
        assert!(sel.negated);
        assert_eq!(sel.channel, "LOG");
    }

    #[test]
    fn parse_full_form() {
        let sel = Selector::parse("!00BH?.E").unwrap();
        assert!(sel.negated);
        assert_eq!(sel.location.as_deref(), Some("00"));
        assert_eq!(sel.channel, "BH?");
        assert_eq!(sel.kind, Some('E'));
    }

    #[test]
    fn parse_invalid() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("BH").is_err());
        assert!(Selector::parse("BHZX").is_err());
        assert!(Selector::parse("BHZ.DD").is_err());
        assert!(Selector::parse("B Z").is_err());
    }

    #[test]
    fn token_roundtrip() {
        for token in ["BHZ", "00BHZ", "BHZ.D", "!00BH?.E"] {
            let sel = Selector::parse(token).unwrap();
            assert_eq!(sel.to_token(), token);
        }
    }

    #[test]
    fn list_accept_all_when_no_positives() {
        let list = SelectorList::parse("").unwrap();
        assert!(list.matches("00", "BHZ", 'D'));
    }

    #[test]
    fn list_positive_match() {
        let list = SelectorList::parse("BHZ BHN").unwrap();
        assert!(list.matches("", "BHZ", 'D'));
        assert!(list.matches("", "BHN", 'D'));
        assert!(!list.matches("", "BHE", 'D'));
    }

    #[test]
    fn list_negation_wins() {
        let list = SelectorList::parse("BH? !BHE").unwrap();
        assert!(list.matches("", "BHZ", 'D'));
        assert!(!list.matches("", "BHE", 'D'));
    }

    #[test]
    fn list_negation_only_accepts_rest() {
        let list = SelectorList::parse("!LOG").unwrap();
        assert!(list.matches("", "BHZ", 'D'));
        assert!(!list.matches("", "LOG", 'L'));
    }

    #[test]
    fn list_type_filter() {
        let list = SelectorList::parse("BHZ.D").unwrap();
        assert!(list.matches("", "BHZ", 'D'));
        assert!(!list.matches("", "BHZ", 'E'));
    }

    #[test]
    fn location_wildcards() {
        let list = SelectorList::parse("??BHZ").unwrap();
        assert!(list.matches("00", "BHZ", 'D'));
        assert!(list.matches("10", "BHZ", 'D'));
    }

    #[test]
    fn blank_location_dash() {
        let list = SelectorList::parse("--BHZ").unwrap();
        assert!(list.matches("", "BHZ", 'D'));
        assert!(!list.matches("00", "BHZ", 'D'));
    }
}
