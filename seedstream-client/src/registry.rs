use seedstream_protocol::{SequenceNumber, glob_match};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Reserved network code marking uni-station mode.
pub const UNI_NETWORK: &str = "XX";
/// Reserved station code marking uni-station mode.
pub const UNI_STATION: &str = "UNI";

/// One subscription: a (network, station) pair with optional selectors and
/// the resume point learned from delivered packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    /// Network code, at most 2 characters, `*`/`?` wildcards allowed.
    pub network: String,
    /// Station code, at most 5 characters, `*`/`?` wildcards allowed.
    pub station: String,
    /// Selector tokens sent as `SELECT` commands during negotiation.
    pub selectors: Vec<String>,
    /// Last delivered sequence number, [`SequenceNumber::UNSET`] initially.
    pub seqnum: SequenceNumber,
    /// Start time of the last delivered record, `YYYY,MM,DD,HH,MM,SS`,
    /// empty initially.
    pub timestamp: String,
}

impl StreamEntry {
    fn new(network: &str, station: &str, selectors: Vec<String>) -> Self {
        Self {
            network: network.to_owned(),
            station: station.to_owned(),
            selectors,
            seqnum: SequenceNumber::UNSET,
            timestamp: String::new(),
        }
    }

    fn is_uni(&self) -> bool {
        self.network == UNI_NETWORK && self.station == UNI_STATION
    }
}

/// Ordered collection of subscriptions.
///
/// The registry is either empty, exactly one uni-station entry, or a list
/// of ordinary entries. Insertion order is preserved because it dictates
/// the command order during negotiation.
#[derive(Clone, Debug, Default)]
pub struct StreamRegistry {
    entries: Vec<StreamEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a multi-station subscription.
    ///
    /// Fails with [`ClientError::ModeConflict`] when a uni-station entry is
    /// present, and with [`ClientError::Config`] on malformed codes.
    /// Duplicate (network, station) pairs are ignored.
    pub fn add(
        &mut self,
        network: &str,
        station: &str,
        selectors: Vec<String>,
    ) -> Result<()> {
        if self.is_uni() {
            return Err(ClientError::ModeConflict(
                "cannot add stations to a uni-station subscription",
            ));
        }
        validate_code(network, 2, "network")?;
        validate_code(station, 5, "station")?;
        if self
            .entries
            .iter()
            .any(|e| e.network == network && e.station == station)
        {
            debug!(network, station, "duplicate stream entry ignored");
            return Ok(());
        }
        self.entries
            .push(StreamEntry::new(network, station, selectors));
        Ok(())
    }

    /// Install the single all-stations subscription, replacing any previous
    /// uni-station entry.
    ///
    /// Fails with [`ClientError::ModeConflict`] when ordinary entries exist.
    pub fn set_uni(&mut self, selectors: Vec<String>) -> Result<()> {
        if !self.entries.is_empty() && !self.is_uni() {
            return Err(ClientError::ModeConflict(
                "cannot switch a multi-station subscription to uni-station",
            ));
        }
        self.entries.clear();
        self.entries
            .push(StreamEntry::new(UNI_NETWORK, UNI_STATION, selectors));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds the single uni-station entry.
    pub fn is_uni(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].is_uni()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    /// Exact-match lookup used when restoring saved state.
    pub fn find_mut(&mut self, network: &str, station: &str) -> Option<&mut StreamEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.network == network && e.station == station)
    }

    /// Record a delivered packet against every matching entry.
    ///
    /// The uni-station entry matches everything; ordinary entries match by
    /// case-sensitive glob on the whitespace-stripped record codes. Returns
    /// the number of entries updated; zero means the server sent data for a
    /// stream nobody subscribed to.
    pub fn match_and_update(
        &mut self,
        network: &str,
        station: &str,
        seqnum: SequenceNumber,
        timestamp: &str,
    ) -> usize {
        let network = network.trim();
        let station = station.trim();
        let mut updated = 0;
        for entry in &mut self.entries {
            let hit = entry.is_uni()
                || (glob_match(&entry.network, network) && glob_match(&entry.station, station));
            if hit {
                entry.seqnum = seqnum;
                entry.timestamp = timestamp.to_owned();
                updated += 1;
            }
        }
        updated
    }
}

fn validate_code(code: &str, max_len: usize, what: &str) -> Result<()> {
    if code.is_empty() || code.len() > max_len {
        return Err(ClientError::Config(format!(
            "{what} code {code:?} must be 1..={max_len} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '*' || c == '?')
    {
        return Err(ClientError::Config(format!(
            "{what} code {code:?} contains invalid characters"
        )));
    }
    Ok(())
}
