use crate::info::InfoLevel;
use crate::sequence::SequenceNumber;

/// A SeedLink protocol command.
///
/// Commands are ASCII lines terminated by `\r\n`. Sequence numbers render
/// as 6 uppercase hex digits, times as `YYYY,MM,DD,HH,MM,SS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Hello,
    Cat,
    Bye,
    Batch,
    Station {
        station: String,
        network: String,
    },
    /// `SELECT <pattern>`; the bare form (`pattern: None`) clears all
    /// previously sent selectors for the current station.
    Select {
        pattern: Option<String>,
    },
    Data {
        sequence: Option<SequenceNumber>,
        start: Option<String>,
    },
    /// Same shape as `DATA`, but the server sends buffered data and closes
    /// the connection (dial-up mode).
    Fetch {
        sequence: Option<SequenceNumber>,
        start: Option<String>,
    },
    Time {
        start: String,
        end: Option<String>,
    },
    End,
    Info {
        level: InfoLevel,
    },
}

impl Command {
    /// Serialize to wire bytes, including the trailing `\r\n`.
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{}\r\n", self.format_line()).into_bytes()
    }

    fn format_line(&self) -> String {
        match self {
            Self::Hello => "HELLO".into(),
            Self::Cat => "CAT".into(),
            Self::Bye => "BYE".into(),
            Self::Batch => "BATCH".into(),
            Self::Station { station, network } => format!("STATION {station} {network}"),
            Self::Select { pattern } => match pattern {
                Some(p) => format!("SELECT {p}"),
                None => "SELECT".into(),
            },
            Self::Data { sequence, start } => format_flow("DATA", *sequence, start.as_deref()),
            Self::Fetch { sequence, start } => format_flow("FETCH", *sequence, start.as_deref()),
            Self::Time { start, end } => match end {
                Some(e) => format!("TIME {start} {e}"),
                None => format!("TIME {start}"),
            },
            Self::End => "END".into(),
            Self::Info { level } => format!("INFO {}", level.as_str()),
        }
    }
}

/// Render `DATA`/`FETCH` with the optional resume point.
///
/// A start time is only meaningful together with a sequence number.
fn format_flow(keyword: &str, sequence: Option<SequenceNumber>, start: Option<&str>) -> String {
    let mut line = keyword.to_owned();
    if let Some(seq) = sequence {
        line.push(' ');
        line.push_str(&seq.to_hex());
        if let Some(time) = start {
            line.push(' ');
            line.push_str(time);
        }
    }
    line
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_line())
    }
}
