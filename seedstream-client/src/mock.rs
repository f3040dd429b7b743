//! Scripted SeedLink server for tests: serves HELLO, acknowledges
//! negotiation commands, streams canned frame bytes, and records every
//! command line it receives per connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub struct MockConfig {
    pub hello_line1: String,
    pub hello_line2: String,
    /// Byte chunks streamed after `END`, one script per accepted connection.
    pub connection_frames: Vec<Vec<Vec<u8>>>,
    /// Reply OK to `BATCH` and stop acknowledging subsequent commands.
    pub accept_batch: bool,
    /// Reply `ERROR` to any command starting with this prefix.
    pub error_on: Option<String>,
    /// Frames sent in response to any `INFO` command.
    pub info_frames: Vec<Vec<u8>>,
    /// Send the 3-byte `END` sentinel after streaming (dial-up finish).
    pub end_after_stream: bool,
    /// Send the `END` sentinel after serving an INFO response.
    pub end_after_info: bool,
    /// Close the connection after streaming.
    pub close_after_stream: bool,
}

impl MockConfig {
    /// One connection streaming `frames`, plain v3.1 identification.
    pub fn streaming(frames: Vec<Vec<u8>>) -> Self {
        Self {
            hello_line1: "SeedLink v3.1 (2020.075)".to_owned(),
            hello_line2: "Mock Server".to_owned(),
            connection_frames: vec![frames],
            accept_batch: false,
            error_on: None,
            info_frames: Vec::new(),
            end_after_stream: false,
            end_after_info: false,
            close_after_stream: false,
        }
    }
}

pub struct MockServer {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

        let capture = Arc::clone(&captured);
        tokio::spawn(async move {
            let connections = config.connection_frames.len().max(1);
            for index in 0..connections {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                capture.lock().unwrap().push(Vec::new());
                let frames = config
                    .connection_frames
                    .get(index)
                    .cloned()
                    .unwrap_or_default();
                Self::handle(stream, &config, frames, &capture, index).await;
            }
        });

        Self { addr, captured }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Command lines received on connection `index`, in arrival order.
    pub fn commands(&self, index: usize) -> Vec<String> {
        self.captured
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    async fn handle(
        stream: tokio::net::TcpStream,
        config: &MockConfig,
        frames: Vec<Vec<u8>>,
        capture: &Arc<Mutex<Vec<Vec<String>>>>,
        index: usize,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let mut batch_active = false;

        loop {
            line.clear();
            let n = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                break;
            }
            let trimmed = line.trim().to_owned();
            capture.lock().unwrap()[index].push(trimmed.clone());
            let upper = trimmed.to_uppercase();

            if upper == "HELLO" {
                let response =
                    format!("{}\r\n{}\r\n", config.hello_line1, config.hello_line2);
                if write_half.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            } else if upper == "BATCH" {
                let reply: &[u8] = if config.accept_batch {
                    batch_active = true;
                    b"OK\r\n"
                } else {
                    b"ERROR\r\n"
                };
                if write_half.write_all(reply).await.is_err() {
                    break;
                }
            } else if upper == "BYE" {
                let _ = write_half.shutdown().await;
                break;
            } else if upper == "END" {
                for frame in &frames {
                    if write_half.write_all(frame).await.is_err() {
                        break;
                    }
                }
                if config.end_after_stream {
                    let _ = write_half.write_all(b"END").await;
                }
                let _ = write_half.flush().await;
                if config.close_after_stream {
                    break;
                }
            } else if upper.starts_with("INFO") {
                for frame in &config.info_frames {
                    if write_half.write_all(frame).await.is_err() {
                        break;
                    }
                }
                if config.end_after_info {
                    let _ = write_half.write_all(b"END").await;
                }
                let _ = write_half.flush().await;
            } else if config
                .error_on
                .as_ref()
                .is_some_and(|prefix| upper.starts_with(&prefix.to_uppercase()))
            {
                if write_half.write_all(b"ERROR\r\n").await.is_err() {
                    break;
                }
            } else if upper.starts_with("STATION")
                || upper.starts_with("SELECT")
                || upper.starts_with("DATA")
                || upper.starts_with("FETCH")
                || upper.starts_with("TIME")
            {
                if !batch_active && write_half.write_all(b"OK\r\n").await.is_err() {
                    break;
                }
            }
            let _ = write_half.flush().await;
        }
    }
}

// -- Record and frame builders shared by the test suites --

/// A 512-byte big-endian 2.x record with a blockette 1000 and a fixed
/// 2024-122 date.
pub fn ms2_record(
    network: &str,
    station: &str,
    channel: &str,
    hour: u8,
    minute: u8,
    second: u8,
) -> Vec<u8> {
    let mut rec = vec![0u8; 512];
    rec[0..6].copy_from_slice(b"000001");
    rec[6] = b'D';
    rec[7] = b' ';
    copy_padded(&mut rec[8..13], station);
    copy_padded(&mut rec[13..15], "");
    copy_padded(&mut rec[15..18], channel);
    copy_padded(&mut rec[18..20], network);
    rec[20..22].copy_from_slice(&2024u16.to_be_bytes());
    rec[22..24].copy_from_slice(&122u16.to_be_bytes());
    rec[24] = hour;
    rec[25] = minute;
    rec[26] = second;
    rec[30..32].copy_from_slice(&100u16.to_be_bytes()); // sample count
    rec[32..34].copy_from_slice(&20u16.to_be_bytes()); // sample rate factor
    rec[39] = 1; // one blockette
    rec[44..46].copy_from_slice(&64u16.to_be_bytes()); // data offset
    rec[46..48].copy_from_slice(&48u16.to_be_bytes()); // first blockette
    rec[48..50].copy_from_slice(&1000u16.to_be_bytes());
    rec[50..52].copy_from_slice(&0u16.to_be_bytes());
    rec[52] = 10; // encoding
    rec[53] = 1; // big-endian word order
    rec[54] = 9; // record length 512
    rec
}

/// Wrap a record into a data frame: `SL` + 6-hex-digit sequence + record.
pub fn sl_frame(sequence: u32, record: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + record.len());
    frame.extend_from_slice(b"SL");
    frame.extend_from_slice(format!("{sequence:06X}").as_bytes());
    frame.extend_from_slice(record);
    frame
}

/// An INFO frame: `SLINFO` header around a 512-byte log-type record whose
/// payload section carries `xml`.
pub fn info_frame(xml: &str, terminated: bool) -> Vec<u8> {
    let mut rec = ms2_record("XX", "INFO", "INF", 0, 0, 0);
    rec[32..34].copy_from_slice(&0u16.to_be_bytes()); // sample rate factor 0: log record
    let payload = xml.as_bytes();
    let max = 512 - 64;
    let take = payload.len().min(max);
    rec[64..64 + take].copy_from_slice(&payload[..take]);

    let mut frame = Vec::with_capacity(8 + rec.len());
    frame.extend_from_slice(b"SLINFO ");
    frame.push(if terminated { b'*' } else { b' ' });
    frame.extend_from_slice(&rec);
    frame
}

fn copy_padded(dst: &mut [u8], s: &str) {
    for (i, slot) in dst.iter_mut().enumerate() {
        *slot = s.as_bytes().get(i).copied().unwrap_or(b' ');
    }
}
