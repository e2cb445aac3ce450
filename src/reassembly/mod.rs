use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, trace};

use crate::config::{ReassemblyConfig, SessionConfig};
use crate::metrics::{DecodeEvent, DecodeObserver};
use crate::output::Emitter;
use crate::protocol::{StreamKey, TcpSegment};
use crate::stream::{ByteRange, Endpoints, FlowDirection, Retain, StreamAdapter};

/// Tracks TCP connections and delivers each direction's bytes in order to
/// a [`StreamAdapter`].
pub struct ConnectionTable {
    connections: HashMap<StreamKey, Connection>,
    config: ReassemblyConfig,
    session: SessionConfig,
    emitter: Emitter,
    observer: Arc<dyn DecodeObserver>,
    stats: TableStats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub opened: u64,
    pub completed: u64,
    /// New connections refused because the table was full.
    pub refused: u64,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections opened={} completed={} refused={}",
            self.opened, self.completed, self.refused
        )
    }
}

struct Connection {
    adapter: StreamAdapter,
    endpoints: Endpoints,
    client_to_server: HalfStream,
    server_to_client: HalfStream,
    last_seen: DateTime<Utc>,
}

impl ConnectionTable {
    pub fn new(
        config: ReassemblyConfig,
        session: SessionConfig,
        emitter: Emitter,
        observer: Arc<dyn DecodeObserver>,
    ) -> Self {
        ConnectionTable {
            connections: HashMap::new(),
            config,
            session,
            emitter,
            observer,
            stats: TableStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        self.stats
    }

    /// Process one TCP segment captured at `timestamp`.
    pub fn process(&mut self, segment: &TcpSegment<'_>, timestamp: DateTime<Utc>) {
        let key = segment.stream_key();

        if !self.connections.contains_key(&key) {
            // Nothing to tear down
            if segment.flags.rst {
                return;
            }
            if self.connections.len() >= self.config.max_connections {
                self.stats.refused += 1;
                self.observer.record(DecodeEvent::ConnectionLimit);
                trace!("{}: connection table full", key);
                return;
            }

            let endpoints = roles_from_first_segment(segment);
            debug!("{}: tracking", endpoints);
            let adapter = StreamAdapter::new(
                endpoints,
                self.session,
                self.emitter.clone(),
                Arc::clone(&self.observer),
            );
            self.connections.insert(
                key.clone(),
                Connection {
                    adapter,
                    endpoints,
                    client_to_server: HalfStream::default(),
                    server_to_client: HalfStream::default(),
                    last_seen: timestamp,
                },
            );
            self.stats.opened += 1;
        }

        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };
        conn.last_seen = timestamp;
        let closed = conn.segment(segment, timestamp, &self.config, self.observer.as_ref());

        if closed && let Some(conn) = self.connections.remove(&key) {
            self.finish(conn);
        }
    }

    /// Complete connections with no traffic since `cutoff`.
    pub fn flush_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<StreamKey> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.last_seen < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(conn) = self.connections.remove(key) {
                self.finish(conn);
            }
        }
        stale.len()
    }

    /// Complete every tracked connection.
    pub fn flush_all(&mut self) -> usize {
        let conns: Vec<Connection> = self.connections.drain().map(|(_, conn)| conn).collect();
        let count = conns.len();
        for conn in conns {
            self.finish(conn);
        }
        count
    }

    fn finish(&mut self, conn: Connection) {
        trace!("{}: complete", conn.endpoints);
        conn.adapter.complete();
        self.stats.completed += 1;
    }
}

/// Bare SYN: the sender is the client. SYN-ACK: the receiver is. Otherwise
/// the establishment was missed and the first sender is taken as client.
fn roles_from_first_segment(segment: &TcpSegment<'_>) -> Endpoints {
    if segment.flags.syn && segment.flags.ack {
        Endpoints {
            client: segment.dst,
            server: segment.src,
        }
    } else {
        Endpoints {
            client: segment.src,
            server: segment.dst,
        }
    }
}

impl Connection {
    /// Returns true once the connection is over.
    fn segment(
        &mut self,
        segment: &TcpSegment<'_>,
        timestamp: DateTime<Utc>,
        config: &ReassemblyConfig,
        observer: &dyn DecodeObserver,
    ) -> bool {
        let direction = if segment.src == self.endpoints.client {
            FlowDirection::ClientToServer
        } else {
            FlowDirection::ServerToClient
        };
        if direction == FlowDirection::ClientToServer {
            // Identity is taken from the first client packet, bare SYN included.
            self.adapter.reassembled(ByteRange {
                direction,
                data: &[],
                timestamp,
                gap: false,
            });
        }
        let half = match direction {
            FlowDirection::ClientToServer => &mut self.client_to_server,
            FlowDirection::ServerToClient => &mut self.server_to_client,
        };

        let mut seq = segment.seq;
        if segment.flags.syn {
            half.syn(seq);
            seq = seq.wrapping_add(1);
        }

        if !segment.payload.is_empty() && !half.abandoned {
            if self.adapter.wants(direction) {
                let chunks = half.segment(seq, segment.payload, config.max_out_of_order);
                for chunk in chunks {
                    let range = Delivery {
                        direction,
                        timestamp,
                        chunk,
                    };
                    if !range.feed(&mut self.adapter, half, config.max_buffered_bytes) {
                        observer.record(DecodeEvent::BufferOverflow);
                        debug!(
                            "{}: over {} buffered bytes, giving up on {:?}",
                            self.endpoints, config.max_buffered_bytes, direction
                        );
                        half.abandon();
                        break;
                    }
                }
            }
            if !self.adapter.wants(direction) {
                half.release();
            }
        }

        if segment.flags.fin {
            half.fin = true;
        }
        segment.flags.rst || (self.client_to_server.fin && self.server_to_client.fin)
    }
}

struct Delivery {
    direction: FlowDirection,
    timestamp: DateTime<Utc>,
    chunk: Chunk,
}

impl Delivery {
    /// Hand one in-order chunk to the adapter, keeping what it asks to keep.
    /// Returns false if the kept bytes exceed `limit`.
    fn feed(self, adapter: &mut StreamAdapter, half: &mut HalfStream, limit: usize) -> bool {
        if self.chunk.gap {
            // Held bytes cannot be continued across a hole.
            half.pending.clear();
            adapter.reassembled(ByteRange {
                direction: self.direction,
                data: &self.chunk.data,
                timestamp: self.timestamp,
                gap: true,
            });
            return true;
        }

        half.pending.extend_from_slice(&self.chunk.data);
        let retain = adapter.reassembled(ByteRange {
            direction: self.direction,
            data: &half.pending,
            timestamp: self.timestamp,
            gap: false,
        });
        match retain {
            Retain::Nothing => half.pending.clear(),
            Retain::From(offset) => {
                let offset = offset.min(half.pending.len());
                half.pending.drain(..offset);
            }
        }
        half.pending.len() <= limit
    }
}

/// In-order bytes, flagged if something was skipped right before them.
#[derive(Debug, PartialEq, Eq)]
struct Chunk {
    data: Vec<u8>,
    gap: bool,
}

/// One direction's sequence tracking and buffers.
#[derive(Debug, Default)]
struct HalfStream {
    /// Sequence number of the next byte to deliver. Unknown until the SYN or
    /// the first data segment.
    next_seq: Option<u32>,
    /// Segments that arrived ahead of `next_seq`.
    held: Vec<(u32, Vec<u8>)>,
    /// Delivered bytes the decoder asked to see again.
    pending: Vec<u8>,
    fin: bool,
    abandoned: bool,
}

/// Signed distance from `from` to `to` in sequence space.
fn seq_distance(from: u32, to: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

impl HalfStream {
    fn syn(&mut self, seq: u32) {
        if self.next_seq.is_none() {
            self.next_seq = Some(seq.wrapping_add(1));
        }
    }

    /// Accept a data segment starting at `seq` and return whatever became
    /// contiguous. Retransmitted and overlapping bytes are trimmed.
    fn segment(&mut self, seq: u32, payload: &[u8], max_held: usize) -> Vec<Chunk> {
        let next = *self.next_seq.get_or_insert(seq);
        let mut chunks = Vec::new();

        if seq_distance(next, seq) > 0 {
            if !self.held.iter().any(|(s, _)| *s == seq) {
                self.held.push((seq, payload.to_vec()));
            }
            if self.held.len() <= max_held {
                return chunks;
            }
            // The hole is not going to fill; resume at the earliest held
            // segment.
            let earliest = self
                .held
                .iter()
                .map(|(s, _)| *s)
                .min_by_key(|s| seq_distance(next, *s))
                .unwrap_or(seq);
            self.next_seq = Some(earliest);
            self.drain_held(&mut chunks, true);
        } else {
            self.take(seq, payload, false, &mut chunks);
            self.drain_held(&mut chunks, false);
        }
        chunks
    }

    /// Append the part of `payload` at or after `next_seq`. Returns false if
    /// none of it was new.
    fn take(&mut self, seq: u32, payload: &[u8], gap: bool, chunks: &mut Vec<Chunk>) -> bool {
        let next = self.next_seq.unwrap_or(seq);
        let overlap = next.wrapping_sub(seq) as usize;
        if overlap >= payload.len() {
            return false;
        }
        let fresh = &payload[overlap..];
        chunks.push(Chunk {
            data: fresh.to_vec(),
            gap,
        });
        self.next_seq = Some(next.wrapping_add(fresh.len() as u32));
        true
    }

    fn drain_held(&mut self, chunks: &mut Vec<Chunk>, mut gap: bool) {
        while let Some(next) = self.next_seq
            && let Some(i) = self
                .held
                .iter()
                .position(|(s, _)| seq_distance(next, *s) <= 0)
        {
            let (seq, data) = self.held.swap_remove(i);
            if self.take(seq, &data, gap, chunks) {
                gap = false;
            }
        }
    }

    /// Free buffers once the decoder is done with this direction.
    fn release(&mut self) {
        self.held = Vec::new();
        self.pending = Vec::new();
    }

    fn abandon(&mut self) {
        self.release();
        self.abandoned = true;
    }
}
