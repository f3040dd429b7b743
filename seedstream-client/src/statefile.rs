//! Resume-point persistence across process restarts.
//!
//! The state file is plain ASCII, one line per subscription:
//! `NET STA SEQHEX YYYY,MM,DD,HH,MM,SS`. Rewrites go through a temporary
//! file followed by a rename so a crash never leaves a half-written file.

use std::path::{Path, PathBuf};

use seedstream_protocol::SequenceNumber;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::StreamRegistry;

/// Load resume points into matching registry entries.
///
/// Lines for streams not present in the registry are ignored. A missing
/// file is not an error (first run) and counts as zero restored entries.
pub async fn load(path: &Path, registry: &mut StreamRegistry) -> Result<usize> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file yet");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut restored = 0;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(network), Some(station), Some(seq_field)) =
            (fields.next(), fields.next(), fields.next())
        else {
            warn!(path = %path.display(), lineno = lineno + 1, "malformed state line");
            continue;
        };
        let timestamp = fields.next().unwrap_or("");

        let seqnum = if seq_field == "-1" {
            SequenceNumber::UNSET
        } else {
            match SequenceNumber::from_hex(seq_field) {
                Ok(seq) => seq,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        lineno = lineno + 1,
                        error = %e,
                        "malformed sequence in state line"
                    );
                    continue;
                }
            }
        };

        match registry.find_mut(network, station) {
            Some(entry) => {
                entry.seqnum = seqnum;
                entry.timestamp = timestamp.to_owned();
                restored += 1;
            }
            None => {
                debug!(network, station, "state entry without subscription ignored");
            }
        }
    }
    debug!(path = %path.display(), restored, "state restored");
    Ok(restored)
}

/// Write all entries with a known resume point, atomically.
pub async fn save(path: &Path, registry: &StreamRegistry) -> Result<()> {
    let mut out = String::new();
    for entry in registry.iter() {
        if !entry.seqnum.is_set() {
            continue;
        }
        out.push_str(&format!(
            "{} {} {} {}\n",
            entry.network,
            entry.station,
            entry.seqnum.to_hex(),
            entry.timestamp
        ));
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, out.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "state saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
