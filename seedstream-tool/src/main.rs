use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use seedstream_client::config::DEFAULT_PORT;
use seedstream_client::{
    Archive, ClientError, Collected, ConnConfig, SlConnection, conn, streamlist,
};
use seedstream_protocol::InfoLevel;

/// Parses and validates a non-zero duration in seconds.
fn seconds(s: &str) -> Result<Duration, String> {
    let secs: u64 = s.parse().map_err(|_| "invalid number of seconds".to_owned())?;
    if secs == 0 {
        return Err("must be non-zero".to_owned());
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InfoItem {
    /// Server identification
    Id,
    /// Server capabilities
    Capabilities,
    /// Station list
    Stations,
    /// Stream list
    Streams,
    /// Gap information
    Gaps,
    /// Connection list
    Connections,
}

impl From<InfoItem> for InfoLevel {
    fn from(item: InfoItem) -> Self {
        match item {
            InfoItem::Id => Self::Id,
            InfoItem::Capabilities => Self::Capabilities,
            InfoItem::Stations => Self::Stations,
            InfoItem::Streams => Self::Streams,
            InfoItem::Gaps => Self::Gaps,
            InfoItem::Connections => Self::Connections,
        }
    }
}

#[derive(Parser)]
#[command(name = "sstool")]
#[command(version)]
#[command(about = "Stream miniSEED records from a SeedLink server", long_about = None)]
struct Args {
    /// SeedLink server as host[:port]; the port defaults to 18000.
    #[arg(default_value = "localhost")]
    address: String,

    /// Ping the server, print its identification, and exit.
    #[arg(short = 'P', long)]
    ping: bool,

    /// Request information of TYPE, print the XML, and exit unless
    /// streams are also configured.
    #[arg(short = 'i', long = "info", ignore_case = true, value_name = "TYPE", value_enum)]
    info: Option<InfoItem>,

    /// Comma-separated stream list for multi-station mode:
    /// NET_STA[:SELECTORS], e.g. 'IU_KONO:BHE BHN,GE_WLF,MN_AQU:HH?.D'.
    #[arg(short = 'S', long, value_name = "STREAMS")]
    streams: Option<String>,

    /// Read the stream list from FILE (one 'NET STA [selectors...]' per
    /// line; '#' and '*' start comments).
    #[arg(short = 'l', long = "stream-file", value_name = "FILE")]
    stream_file: Option<PathBuf>,

    /// Default selectors; applied to streams without their own and used
    /// for the all-station subscription when no stream list is given.
    #[arg(short = 's', long, value_name = "SELECTORS")]
    selectors: Option<String>,

    /// Server-side time window as START[:END], each formatted
    /// YYYY,MM,DD,HH,MM,SS. Overrides stored resume points.
    #[arg(short = 'w', long = "time-window", value_name = "WINDOW")]
    time_window: Option<String>,

    /// Save and restore stream state in FILE[:INTERVAL]; INTERVAL saves
    /// every that many packets in addition to shutdown.
    #[arg(short = 'x', long = "state-file", value_name = "FILE")]
    state: Option<String>,

    /// Dial-up mode: fetch buffered data, exit at the server's END marker.
    #[arg(short = 'd', long = "dial-up")]
    dialup: bool,

    /// Batch the negotiation commands.
    #[arg(short = 'b', long)]
    batch: bool,

    /// Send keepalive requests this often while idle (seconds).
    #[arg(short = 'k', long, value_name = "SECONDS", value_parser = seconds)]
    keepalive: Option<Duration>,

    /// Reconnect when nothing arrives for this long (seconds, 0 disables).
    #[arg(short = 'n', long = "network-timeout", value_name = "SECONDS", default_value_t = 600)]
    network_timeout: u64,

    /// Delay between reconnect attempts (seconds).
    #[arg(short = 'r', long = "reconnect-delay", value_name = "SECONDS", default_value_t = 30)]
    reconnect_delay: u64,

    /// Append all received records to FILE ('-' for stdout).
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<String>,

    /// Archive records into files selected by a path TEMPLATE with
    /// %X (defining) and #X (non-defining) tokens.
    #[arg(short = 'A', long = "archive", value_name = "TEMPLATE")]
    archive: Option<String>,

    /// Archive into an SDS tree rooted at DIR (deprecated layout).
    #[arg(long, value_name = "DIR", conflicts_with = "archive")]
    sds: Option<String>,

    /// Archive into a BUD tree rooted at DIR (deprecated layout).
    #[arg(long, value_name = "DIR", conflicts_with_all = ["archive", "sds"])]
    bud: Option<String>,

    /// Print packet details; repeat for more.
    #[arg(short = 'p', action = ArgAction::Count)]
    detail: u8,

    /// Decode each record with the miniSEED decoder and print it.
    #[arg(short = 'u', long)]
    unpack: bool,

    /// Increase log verbosity; repeat for more.
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,
}

enum Dump {
    Stdout(tokio::io::Stdout),
    File(tokio::fs::File),
}

impl Dump {
    async fn write(&mut self, record: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Stdout(out) => {
                out.write_all(record).await?;
                out.flush().await
            }
            Self::File(file) => {
                file.write_all(record).await?;
                file.flush().await
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ClientError> {
    let address = if args.address.contains(':') {
        args.address.clone()
    } else {
        format!("{}:{DEFAULT_PORT}", args.address)
    };

    if args.ping {
        let (ident, organization) = conn::ping(&address, Duration::from_secs(10)).await?;
        println!("{ident}");
        println!("{organization}");
        return Ok(());
    }

    let default_selectors = match args.selectors.as_deref() {
        Some(spec) => seedstream_protocol::SelectorList::parse(spec)
            .map_err(|e| ClientError::Config(e.to_string()))?
            .0
            .iter()
            .map(|s| s.to_token())
            .collect(),
        None => Vec::new(),
    };

    let (start_time, end_time) = match args.time_window.as_deref() {
        Some(window) => match window.split_once(':') {
            Some((start, end)) => (Some(start.to_owned()), Some(end.to_owned())),
            None => (Some(window.to_owned()), None),
        },
        None => (None, None),
    };

    let config = ConnConfig {
        address,
        network_timeout: Duration::from_secs(args.network_timeout),
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        keepalive: args.keepalive.unwrap_or(Duration::ZERO),
        dialup: args.dialup,
        batch: args.batch,
        start_time,
        end_time,
        ..ConnConfig::default()
    };
    let mut conn = SlConnection::new(config)?;

    // Subscriptions: inline list, list file, or the all-station default.
    let mut specs = Vec::new();
    if let Some(ref inline) = args.streams {
        specs.extend(streamlist::parse_inline(inline)?);
    }
    if let Some(ref path) = args.stream_file {
        let content = tokio::fs::read_to_string(path).await?;
        specs.extend(streamlist::parse_stream_file(&content)?);
    }
    if specs.is_empty() {
        if args.info.is_none() {
            conn.set_uni_station(default_selectors.clone())?;
        }
    } else {
        for spec in specs {
            let selectors = if spec.selectors.is_empty() {
                default_selectors.clone()
            } else {
                spec.selectors
            };
            conn.add_stream(&spec.network, &spec.station, selectors)?;
        }
    }
    let info_only = args.info.is_some() && conn.registry().is_empty();

    if let Some(item) = args.info {
        conn.request_info(item.into())?;
    }

    // State file with optional per-packet save interval.
    let state = args.state.as_deref().map(parse_state_arg);
    if let Some((ref path, _)) = state {
        let restored = conn.load_state(path).await?;
        info!(restored, path = %path.display(), "stream state restored");
    }

    let mut dump = match args.output.as_deref() {
        Some("-") => Some(Dump::Stdout(tokio::io::stdout())),
        Some(path) => Some(Dump::File(
            tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await?,
        )),
        None => None,
    };

    let mut archive = match (&args.archive, &args.sds, &args.bud) {
        (Some(template), _, _) => Some(Archive::new(template.clone())),
        (_, Some(root), _) => Some(Archive::sds(root)),
        (_, _, Some(root)) => Some(Archive::bud(root)),
        _ => None,
    };

    // Ctrl-C requests cooperative shutdown; the engine notices on its next
    // step.
    let terminator = conn.terminate_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            terminator.terminate();
        }
    });

    let mut packets: u64 = 0;
    let result = loop {
        match conn.collect().await {
            Ok(Collected::Packet(packet)) => {
                packets += 1;
                if args.detail > 0 {
                    println!(
                        "{}_{}_{}_{}, seq {}, {} bytes, {}",
                        packet.summary.network,
                        packet.summary.station,
                        packet.summary.location,
                        packet.summary.channel,
                        packet.sequence,
                        packet.record.len(),
                        packet.summary.start_time(),
                    );
                }
                if args.detail > 1 {
                    println!(
                        "  type {}, format {:?}",
                        packet.summary.kind.code(),
                        packet.summary.format,
                    );
                }
                if args.unpack {
                    match packet.decode() {
                        Ok(record) => println!("{record:?}"),
                        Err(e) => warn!(seq = %packet.sequence, "cannot decode record: {e}"),
                    }
                }
                if let Some(ref mut dump) = dump {
                    dump.write(&packet.record).await?;
                }
                if let Some(ref mut archive) = archive {
                    archive.archive(&packet.summary, &packet.record).await;
                }
                if let Some((ref path, Some(interval))) = state {
                    if packets % interval == 0 {
                        conn.save_state(path).await?;
                    }
                }
            }
            Ok(Collected::Info(response)) => {
                println!("{}", response.xml);
                if info_only {
                    conn.terminate();
                }
            }
            Ok(Collected::NoPacket) => {}
            Ok(Collected::Terminated) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    if let Some((ref path, _)) = state {
        if let Err(e) = conn.save_state(path).await {
            warn!(path = %path.display(), "cannot save stream state: {e}");
        }
    }
    if let Some(ref mut archive) = archive {
        archive.close_all();
    }

    result
}

/// Split `FILE[:INTERVAL]`; the suffix is only treated as an interval when
/// it parses as a number, so paths containing ':' keep working.
fn parse_state_arg(arg: &str) -> (PathBuf, Option<u64>) {
    if let Some((path, interval)) = arg.rsplit_once(':') {
        if let Ok(interval) = interval.parse::<u64>() {
            if interval > 0 {
                return (PathBuf::from(path), Some(interval));
            }
        }
    }
    (PathBuf::from(arg), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;

        Args::command().debug_assert()
    }

    #[test]
    fn state_arg_with_interval() {
        let (path, interval) = parse_state_arg("state.dat:100");
        assert_eq!(path, PathBuf::from("state.dat"));
        assert_eq!(interval, Some(100));
    }

    #[test]
    fn state_arg_plain_path() {
        let (path, interval) = parse_state_arg("/var/lib/seedstream/state.dat");
        assert_eq!(path, PathBuf::from("/var/lib/seedstream/state.dat"));
        assert_eq!(interval, None);
    }

    #[test]
    fn state_arg_zero_interval_is_path() {
        let (path, interval) = parse_state_arg("state.dat:0");
        assert_eq!(path, PathBuf::from("state.dat:0"));
        assert_eq!(interval, None);
    }
}
