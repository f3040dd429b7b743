//! Archive router: demultiplex records into append-only files selected by
//! a path template.
//!
//! Template tokens come in two flavors. `%X` tokens are *defining*: every
//! record sharing their expansion lands in the same file. `#X` tokens are
//! *non-defining* and take their value from the first record that created
//! the file. Recognized tokens: `n` network, `s` station,
//! `l` location, `c` channel, `Y`/`y` year, `j` day-of-year, `H`/`M`/`S`
//! time components, `F` fractional seconds, `t` record type letter, and
//! `%`/`#` literals.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use seedstream_protocol::mseed::{RecordKind, RecordSummary};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// SDS directory layout. Deprecated in favor of dedicated archiving tools,
/// but still widely used for small deployments.
pub const SDS_TEMPLATE: &str = "%Y/%n/%s/%c.%t/%n.%s.%l.%c.%t.%Y.%j";
/// BUD directory layout (waveform records only). Deprecated likewise.
pub const BUD_TEMPLATE: &str = "%n/%s/%s.%n.%l.%c.%Y.%j";

/// Close files untouched for this long. Checked on every append.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on simultaneously open files.
pub const DEFAULT_MAX_OPEN: usize = 50;

struct OpenFile {
    path: PathBuf,
    file: File,
    modtime: Instant,
}

/// An LRU-bounded table of open archive files keyed by the defining part
/// of the template expansion.
pub struct Archive {
    template: String,
    waveform_only: bool,
    idle_timeout: Duration,
    max_open: usize,
    table: HashMap<String, OpenFile>,
    failed: HashSet<String>,
}

impl Archive {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            waveform_only: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_open: DEFAULT_MAX_OPEN,
            table: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    /// SDS tree rooted at `root`.
    pub fn sds(root: &str) -> Self {
        Self::new(format!("{}/{}", root.trim_end_matches('/'), SDS_TEMPLATE))
    }

    /// BUD tree rooted at `root`; only waveform records are written.
    pub fn bud(root: &str) -> Self {
        Self {
            waveform_only: true,
            ..Self::new(format!("{}/{}", root.trim_end_matches('/'), BUD_TEMPLATE))
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    pub fn open_files(&self) -> usize {
        self.table.len()
    }

    /// Append one record to the file its defining key selects.
    ///
    /// Open or write failures disable the key for the rest of the session
    /// and are reported once.
    pub async fn archive(&mut self, summary: &RecordSummary, record: &[u8]) {
        if self.waveform_only && summary.kind != RecordKind::Data {
            return;
        }

        self.sweep_idle();

        let key = expand(&self.template, summary, false);
        if self.failed.contains(&key) {
            return;
        }

        if !self.table.contains_key(&key) {
            if self.table.len() >= self.max_open {
                self.evict_lru();
            }
            let path = PathBuf::from(expand(&self.template, summary, true));
            match open_append(&path).await {
                Ok(file) => {
                    debug!(path = %path.display(), "opened archive file");
                    self.table.insert(
                        key.clone(),
                        OpenFile {
                            path,
                            file,
                            modtime: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "cannot open archive file, disabling this stream"
                    );
                    self.failed.insert(key);
                    return;
                }
            }
        }

        let Some(entry) = self.table.get_mut(&key) else {
            return;
        };
        entry.modtime = Instant::now();
        let mut result = entry.file.write_all(record).await;
        if result.is_ok() {
            result = entry.file.flush().await;
        }
        if let Err(e) = result {
            error!(
                path = %entry.path.display(),
                error = %e,
                "archive write failed, disabling this stream"
            );
            self.table.remove(&key);
            self.failed.insert(key);
        }
    }

    /// Close every open file.
    pub fn close_all(&mut self) {
        self.table.clear();
    }

    fn sweep_idle(&mut self) {
        let now = Instant::now();
        let idle = self.idle_timeout;
        self.table
            .retain(|_, entry| now.duration_since(entry.modtime) <= idle);
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .table
            .iter()
            .min_by_key(|(_, entry)| entry.modtime)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            if let Some(entry) = self.table.remove(&key) {
                debug!(path = %entry.path.display(), "closed least recently used archive file");
            }
        }
    }
}

async fn open_append(path: &PathBuf) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().append(true).create(true).open(path).await
}

/// Expand the template for one record. With `full` false, non-defining
/// `#X` tokens are left in place, producing the table key.
fn expand(template: &str, summary: &RecordSummary, full: bool) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' && c != '#' {
            out.push(c);
            continue;
        }
        let Some(token) = chars.next() else {
            out.push(c);
            break;
        };
        if c == '#' && !full {
            out.push('#');
            out.push(token);
            continue;
        }
        expand_token(&mut out, token, summary);
    }
    out
}

fn expand_token(out: &mut String, token: char, summary: &RecordSummary) {
    match token {
        'n' => out.push_str(&summary.network),
        's' => out.push_str(&summary.station),
        'l' => out.push_str(&summary.location),
        'c' => out.push_str(&summary.channel),
        'Y' => out.push_str(&format!("{:04}", summary.start.year)),
        'y' => out.push_str(&format!("{:02}", summary.start.year % 100)),
        'j' => out.push_str(&format!("{:03}", summary.start.doy)),
        'H' => out.push_str(&format!("{:02}", summary.start.hour)),
        'M' => out.push_str(&format!("{:02}", summary.start.minute)),
        'S' => out.push_str(&format!("{:02}", summary.start.second)),
        'F' => out.push_str(&format!("{:04}", summary.start.fract)),
        't' => out.push(summary.kind.code()),
        '%' => out.push('%'),
        '#' => out.push('#'),
        // Unknown tokens pass through unchanged.
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use seedstream_protocol::mseed::{RecordFormat, RecordTime};

    use super::*;

    fn summary(net: &str, sta: &str, chan: &str, hour: u8, minute: u8, second: u8) -> RecordSummary {
        RecordSummary {
            network: net.into(),
            station: sta.into(),
            location: "00".into(),
            channel: chan.into(),
            start: RecordTime {
                year: 2024,
                doy: 122,
                hour,
                minute,
                second,
                fract: 0,
            },
            kind: RecordKind::Data,
            format: RecordFormat::V2,
        }
    }

    fn scratch(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("seedstream-archive-{}-{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn expand_defining_tokens() {
        let s = summary("NL", "HGN", "BHZ", 10, 30, 45);
        assert_eq!(
            expand("%n/%s/%Y.%j", &s, true),
            "NL/HGN/2024.122"
        );
    }

    #[test]
    fn expand_key_keeps_non_defining_placeholders() {
        let s = summary("NL", "HGN", "BHZ", 10, 30, 45);
        assert_eq!(
            expand("%n.%s.%Y.%j.%H:#M:#S", &s, false),
            "NL.HGN.2024.122.10:#M:#S"
        );
        assert_eq!(
            expand("%n.%s.%Y.%j.%H:#M:#S", &s, true),
            "NL.HGN.2024.122.10:30:45"
        );
    }

    #[test]
    fn expand_literals_and_type() {
        let s = summary("NL", "HGN", "BHZ", 1, 2, 3);
        assert_eq!(expand("%%%t%#", &s, true), "%D#");
    }

    #[test]
    fn expand_two_digit_year_and_fract() {
        let mut s = summary("NL", "HGN", "BHZ", 1, 2, 3);
        s.start.fract = 42;
        assert_eq!(expand("%y-%F", &s, true), "24-0042");
    }

    #[test]
    fn sds_template_shape() {
        let s = summary("NL", "HGN", "BHZ", 0, 0, 0);
        let archive = Archive::sds("/data");
        let path = expand(&archive.template, &s, true);
        assert_eq!(path, "/data/2024/NL/HGN/BHZ.D/NL.HGN.00.BHZ.D.2024.122");
    }

    #[test]
    fn bud_template_shape() {
        let s = summary("NL", "HGN", "BHZ", 0, 0, 0);
        let archive = Archive::bud("/data");
        let path = expand(&archive.template, &s, true);
        assert_eq!(path, "/data/NL/HGN/HGN.NL.00.BHZ.2024.122");
    }

    #[tokio::test]
    async fn defining_key_groups_non_defining_values() {
        let root = scratch("hourly");
        let mut archive = Archive::new(format!("{root}/%n.%s.%Y.%j.%H:#M:#S"));

        // Two records in the same hour share one file named for the first.
        archive.archive(&summary("NL", "HGN", "BHZ", 10, 5, 0), b"one").await;
        archive.archive(&summary("NL", "HGN", "BHZ", 10, 59, 59), b"two").await;
        // A record an hour later opens a second file.
        archive.archive(&summary("NL", "HGN", "BHZ", 11, 0, 1), b"three").await;

        let first = tokio::fs::read(format!("{root}/NL.HGN.2024.122.10:05:00"))
            .await
            .unwrap();
        assert_eq!(first, b"onetwo");
        let second = tokio::fs::read(format!("{root}/NL.HGN.2024.122.11:00:01"))
            .await
            .unwrap();
        assert_eq!(second, b"three");
        assert_eq!(archive.open_files(), 2);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let root = scratch("dirs");
        let mut archive = Archive::new(format!("{root}/%Y/%n/%s/%c"));
        archive.archive(&summary("IU", "ANMO", "BHZ", 0, 0, 0), b"rec").await;

        let content = tokio::fs::read(format!("{root}/2024/IU/ANMO/BHZ"))
            .await
            .unwrap();
        assert_eq!(content, b"rec");

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn idle_files_are_closed() {
        let root = scratch("idle");
        let mut archive = Archive::new(format!("{root}/%n.%s"))
            .with_idle_timeout(Duration::from_millis(10));

        archive.archive(&summary("IU", "ANMO", "BHZ", 0, 0, 0), b"a").await;
        assert_eq!(archive.open_files(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        archive.archive(&summary("GE", "WLF", "BHZ", 0, 0, 0), b"b").await;
        // The sweep on the second append closed the idle first file.
        assert_eq!(archive.open_files(), 1);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn lru_eviction_bounds_open_files() {
        let root = scratch("lru");
        let mut archive = Archive::new(format!("{root}/%s")).with_max_open(2);

        archive.archive(&summary("IU", "AAA", "BHZ", 0, 0, 0), b"1").await;
        archive.archive(&summary("IU", "BBB", "BHZ", 0, 0, 0), b"2").await;
        archive.archive(&summary("IU", "CCC", "BHZ", 0, 0, 0), b"3").await;
        assert_eq!(archive.open_files(), 2);

        // The evicted file reopens in append mode and keeps its content.
        archive.archive(&summary("IU", "AAA", "BHZ", 0, 0, 0), b"4").await;
        let content = tokio::fs::read(format!("{root}/AAA")).await.unwrap();
        assert_eq!(content, b"14");

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn bud_skips_non_waveform_records() {
        let root = scratch("bud-filter");
        let mut archive = Archive::bud(&root);

        let mut log = summary("IU", "ANMO", "LOG", 0, 0, 0);
        log.kind = RecordKind::Log;
        archive.archive(&log, b"log").await;
        assert_eq!(archive.open_files(), 0);

        archive.archive(&summary("IU", "ANMO", "BHZ", 0, 0, 0), b"wave").await;
        assert_eq!(archive.open_files(), 1);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_disables_key_once() {
        let root = scratch("fail");
        // Make the template's parent a regular file so create_dir_all fails.
        tokio::fs::write(&root, b"blocker").await.unwrap();
        let mut archive = Archive::new(format!("{root}/sub/%s"));

        archive.archive(&summary("IU", "ANMO", "BHZ", 0, 0, 0), b"x").await;
        archive.archive(&summary("IU", "ANMO", "BHZ", 0, 0, 0), b"y").await;
        assert_eq!(archive.open_files(), 0);
        assert_eq!(archive.failed.len(), 1);

        tokio::fs::remove_file(&root).await.unwrap();
    }
}
