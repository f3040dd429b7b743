//! Stream-list parsing: list files and the inline command-line syntax.

use seedstream_protocol::Selector;

use crate::error::{ClientError, Result};

/// One parsed stream specification before it enters the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub network: String,
    pub station: String,
    pub selectors: Vec<String>,
}

/// Parse a stream-list file.
///
/// One entry per line: `NET STA [selectors...]`. Lines starting with `#`
/// or `*` are comments; blank lines are ignored.
pub fn parse_stream_file(content: &str) -> Result<Vec<StreamSpec>> {
    let mut specs = Vec::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(network), Some(station)) = (fields.next(), fields.next()) else {
            return Err(ClientError::Config(format!(
                "stream list line {}: expected NET STA, got {line:?}",
                lineno + 1
            )));
        };
        let selectors = validate_selectors(fields, lineno + 1)?;
        specs.push(StreamSpec {
            network: network.to_owned(),
            station: station.to_owned(),
            selectors,
        });
    }
    Ok(specs)
}

/// Parse the inline list syntax: comma-separated entries of
/// `NET_STA[:sel[ sel...]]`, e.g. `"IU_KONO:BHE BHN,GE_WLF,MN_AQU:HH?.D"`.
pub fn parse_inline(arg: &str) -> Result<Vec<StreamSpec>> {
    let mut specs = Vec::new();
    for item in arg.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (stream, selector_part) = match item.split_once(':') {
            Some((stream, sel)) => (stream, Some(sel)),
            None => (item, None),
        };
        let Some((network, station)) = stream.split_once('_') else {
            return Err(ClientError::Config(format!(
                "stream {item:?}: expected NET_STA format"
            )));
        };
        let selectors = match selector_part {
            Some(sel) => validate_selectors(sel.split_whitespace(), 0)?,
            None => Vec::new(),
        };
        specs.push(StreamSpec {
            network: network.to_owned(),
            station: station.to_owned(),
            selectors,
        });
    }
    if specs.is_empty() {
        return Err(ClientError::Config("empty stream list".into()));
    }
    Ok(specs)
}

fn validate_selectors<'a>(
    tokens: impl Iterator<Item = &'a str>,
    lineno: usize,
) -> Result<Vec<String>> {
    let mut selectors = Vec::new();
    for token in tokens {
        Selector::parse(token).map_err(|e| {
            if lineno > 0 {
                ClientError::Config(format!("stream list line {lineno}: {e}"))
            } else {
                ClientError::Config(e.to_string())
            }
        })?;
        selectors.push(token.to_owned());
    }
    Ok(selectors)
}
