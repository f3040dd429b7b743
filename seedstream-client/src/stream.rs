use futures_core::Stream;

use crate::conn::{Collected, Packet, SlConnection};
use crate::error::ClientError;

/// Convert a configured [`SlConnection`] into a [`Stream`] of data packets.
///
/// Completed INFO responses are consumed silently; the stream ends when the
/// connection terminates (cooperatively or via the dial-up `END` sentinel).
pub fn packet_stream(
    mut conn: SlConnection,
) -> impl Stream<Item = Result<Packet, ClientError>> {
    async_stream::try_stream! {
        loop {
            match conn.collect().await? {
                Collected::Packet(packet) => yield packet,
                Collected::Terminated => break,
                Collected::Info(_) | Collected::NoPacket => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use seedstream_protocol::SequenceNumber;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::config::ConnConfig;
    use crate::mock::{MockConfig, MockServer, ms2_record, sl_frame};

    #[tokio::test]
    async fn stream_yields_packets_until_end() {
        let frames = vec![
            sl_frame(1, &ms2_record("IU", "ANMO", "BHZ", 10, 0, 0)),
            sl_frame(2, &ms2_record("IU", "ANMO", "BHZ", 10, 0, 10)),
        ];
        let config = MockConfig {
            end_after_stream: true,
            ..MockConfig::streaming(frames)
        };
        let server = MockServer::start(config).await;

        let mut conn = SlConnection::new(ConnConfig::new(server.addr().to_string())).unwrap();
        conn.add_stream("IU", "ANMO", vec![]).unwrap();

        let stream = packet_stream(conn);
        let mut stream = pin!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, SequenceNumber::new(1));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.sequence, SequenceNumber::new(2));

        // END sentinel → clean termination → stream ends.
        assert!(stream.next().await.is_none());
    }
}
