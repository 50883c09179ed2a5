//! `Write` adapter over a bounded channel

use std::io::{self, Write};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Batches writes into `chunk_size` pieces and sends them down the channel.
/// Must be used from a blocking context.
pub(super) struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ChannelWriter {
    pub(super) fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let room = self.chunk_size - self.buf.len();
            let take = remaining.len().min(room);
            self.buf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.buf.len() >= self.chunk_size {
                self.send_buffer()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}
