use crate::error::{ProtocolError, Result};

/// A parsed server response line (or HELLO line pair).
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Ok,
    Error { description: String },
    End,
    Hello {
        software: String,
        version: String,
        extra: String,
        organization: String,
    },
}

impl Response {
    /// Parse a single-line response: OK, ERROR, END.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        if line.eq_ignore_ascii_case("OK") {
            return Ok(Self::Ok);
        }
        if line.eq_ignore_ascii_case("END") {
            return Ok(Self::End);
        }
        if line.to_uppercase().starts_with("ERROR") {
            return Ok(Self::Error {
                description: line[5..].trim().to_owned(),
            });
        }

        Err(ProtocolError::InvalidResponse(format!(
            "unrecognized response: {line:?}"
        )))
    }

    /// Parse a two-line HELLO response.
    ///
    /// Line 1: `"SeedLink v3.1 (2020.075) :: SLPROTO:3.1"`
    /// Line 2: `"GEOFON"`
    pub fn parse_hello(line1: &str, line2: &str) -> Result<Self> {
        let line1 = line1.trim_end_matches('\n').trim_end_matches('\r');
        let line2 = line2.trim_end_matches('\n').trim_end_matches('\r');

        let (main_part, capabilities) = match line1.find("::") {
            Some(idx) => (line1[..idx].trim(), line1[idx + 2..].trim()),
            None => (line1.trim(), ""),
        };

        let mut parts = main_part.split_whitespace();
        let software = parts.next().unwrap_or("").to_owned();
        let version = parts.next().unwrap_or("").to_owned();
        let rest: Vec<&str> = parts.collect();

        let extra = match (rest.is_empty(), capabilities.is_empty()) {
            (true, true) => String::new(),
            (true, false) => capabilities.to_owned(),
            (false, true) => rest.join(" "),
            (false, false) => format!("{} :: {}", rest.join(" "), capabilities),
        };

        Ok(Self::Hello {
            software,
            version,
            extra,
            organization: line2.to_owned(),
        })
    }
}

/// Extract the numeric protocol version from a HELLO version token.
///
/// `"v3.1"` → `3.1`. Returns `None` when the token carries no parseable
/// number; callers treat that as an unknown (very old) server.
pub fn version_number(version: &str) -> Option<f32> {
    let digits = version.trim_start_matches(|c: char| !c.is_ascii_digit());
    let numeric: String = digits
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok() {
        assert_eq!(Response::parse_line("OK").unwrap(), Response::Ok);
        assert_eq!(Response::parse_line("ok").unwrap(), Response::Ok);
        assert_eq!(Response::parse_line("OK\r\n").unwrap(), Response::Ok);
    }

    #[test]
    fn parse_end() {
        assert_eq!(Response::parse_line("END").unwrap(), Response::End);
    }

    #[test]
    fn parse_error_bare() {
        assert_eq!(
            Response::parse_line("ERROR").unwrap(),
            Response::Error {
                description: String::new(),
            }
        );
    }

    #[test]
    fn parse_error_with_description() {
        assert_eq!(
            Response::parse_line("ERROR invalid station").unwrap(),
            Response::Error {
                description: "invalid station".into(),
            }
        );
    }

    #[test]
    fn parse_unknown_response() {
        assert!(Response::parse_line("FOOBAR").is_err());
    }

    #[test]
    fn parse_hello_with_capabilities() {
        let resp = Response::parse_hello(
            "SeedLink v3.1 (2020.075) :: SLPROTO:3.1 CAP",
            "GEOFON",
        )
        .unwrap();
        assert_eq!(
            resp,
            Response::Hello {
                software: "SeedLink".into(),
                version: "v3.1".into(),
                extra: "(2020.075) :: SLPROTO:3.1 CAP".into(),
                organization: "GEOFON".into(),
            }
        );
    }

    #[test]
    fn parse_hello_plain() {
        let resp = Response::parse_hello("SeedLink v3.1", "IRIS DMC").unwrap();
        assert_eq!(
            resp,
            Response::Hello {
                software: "SeedLink".into(),
                version: "v3.1".into(),
                extra: String::new(),
                organization: "IRIS DMC".into(),
            }
        );
    }

    #[test]
    fn version_number_standard() {
        assert_eq!(version_number("v3.1"), Some(3.1));
        assert_eq!(version_number("3.0"), Some(3.0));
        assert_eq!(version_number("v2.93"), Some(2.93));
    }

    #[test]
    fn version_number_unparseable() {
        assert_eq!(version_number(""), None);
        assert_eq!(version_number("beta"), None);
    }
}
