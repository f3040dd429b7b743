/// Receive buffer capacity: comfortably holds the largest frame (8-byte
/// header plus a 4096-byte record) with room for readahead.
pub const RECV_BUFFER_LEN: usize = 16 * 1024;

/// Contiguous receive buffer with explicit producer/consumer indices.
///
/// Bytes are appended at `read_end` and consumed from `consume_begin`;
/// `0 <= consume_begin <= read_end <= capacity` always holds. The occupied
/// region is shifted to the front when space runs out at the tail.
#[derive(Debug)]
pub struct RecvBuffer {
    data: Box<[u8]>,
    read_end: usize,
    consume_begin: usize,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; RECV_BUFFER_LEN].into_boxed_slice(),
            read_end: 0,
            consume_begin: 0,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn available(&self) -> &[u8] {
        &self.data[self.consume_begin..self.read_end]
    }

    pub fn len(&self) -> usize {
        self.read_end - self.consume_begin
    }

    pub fn is_empty(&self) -> bool {
        self.read_end == self.consume_begin
    }

    /// Mark `n` available bytes as delivered.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.consume_begin += n;
        if self.consume_begin == self.read_end {
            self.consume_begin = 0;
            self.read_end = 0;
        }
    }

    /// Writable space at the tail, compacting first when the tail is full
    /// and consumed bytes can be reclaimed at the front.
    pub fn writable(&mut self) -> &mut [u8] {
        if self.read_end == self.data.len() && self.consume_begin > 0 {
            self.compact();
        }
        &mut self.data[self.read_end..]
    }

    /// Record that `n` bytes were written into [`writable`](Self::writable).
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.read_end + n <= self.data.len());
        self.read_end += n;
    }

    pub fn clear(&mut self) {
        self.consume_begin = 0;
        self.read_end = 0;
    }

    /// Pop one `\n`-terminated line off the front, if present. The line is
    /// returned without its `\r\n` ending. Used for negotiation replies;
    /// binary frame data is never routed through here.
    pub fn take_line(&mut self) -> Option<String> {
        let avail = self.available();
        let pos = avail.iter().position(|&b| b == b'\n')?;
        let line = String::from_utf8_lossy(&avail[..pos])
            .trim_end_matches('\r')
            .to_owned();
        self.consume(pos + 1);
        Some(line)
    }

    fn compact(&mut self) {
        self.data.copy_within(self.consume_begin..self.read_end, 0);
        self.read_end -= self.consume_begin;
        self.consume_begin = 0;
    }
}
