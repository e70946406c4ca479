//! PCAP capture of bus traffic.
//!
//! Files use `LINKTYPE_USER0`. Every record carries a two-byte pseudo
//! header, `direction | peer address`, followed by the frame exactly as it
//! crossed the bus.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION: (u16, u16) = (2, 4);
const SNAPLEN: usize = 512;
const LINKTYPE_USER0: u32 = 147;
const PSEUDO_HEADER_LEN: usize = 2;
const RECORD_HEADER_LEN: usize = 16;

/// Direction of a captured frame relative to the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frame transmitted by this node
    Outbound = 0,
    /// Frame admitted into this node's receive buffer
    Inbound = 1,
}

/// Shared handle to a capture file.
#[derive(Clone)]
pub struct PcapRecorder {
    sink: Arc<Mutex<BufWriter<File>>>,
}

impl PcapRecorder {
    /// Create (or truncate) the capture file at `path` and write its global header.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut sink = BufWriter::new(File::create(path)?);
        sink.write_all(&global_header())?;
        sink.flush()?;
        Ok(Self {
            sink: Arc::new(Mutex::new(sink)),
        })
    }

    /// Append one frame stamped with the current time.
    pub fn record(&self, direction: Direction, peer: u8, frame: &[u8]) -> io::Result<()> {
        let record = encode_record(SystemTime::now(), direction, peer, frame);
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(&record)?;
        sink.flush()
    }
}

impl std::fmt::Debug for PcapRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcapRecorder").finish_non_exhaustive()
    }
}

fn global_header() -> BytesMut {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u32_le(MAGIC);
    buf.put_u16_le(VERSION.0);
    buf.put_u16_le(VERSION.1);
    // thiszone, sigfigs
    buf.put_i32_le(0);
    buf.put_u32_le(0);
    #[allow(clippy::cast_possible_truncation)]
    let snaplen = SNAPLEN as u32;
    buf.put_u32_le(snaplen);
    buf.put_u32_le(LINKTYPE_USER0);
    buf
}

fn encode_record(timestamp: SystemTime, direction: Direction, peer: u8, frame: &[u8]) -> BytesMut {
    let since_epoch = timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let frame = &frame[..frame.len().min(SNAPLEN - PSEUDO_HEADER_LEN)];
    // Bounded by SNAPLEN
    #[allow(clippy::cast_possible_truncation)]
    let captured = (PSEUDO_HEADER_LEN + frame.len()) as u32;

    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + captured as usize);
    #[allow(clippy::cast_possible_truncation)]
    let secs = since_epoch.as_secs().min(u64::from(u32::MAX)) as u32;
    buf.put_u32_le(secs);
    buf.put_u32_le(since_epoch.subsec_micros());
    buf.put_u32_le(captured);
    buf.put_u32_le(captured);
    buf.put_u8(direction as u8);
    buf.put_u8(peer);
    buf.put_slice(frame);
    buf
}
