use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use pcap::{Capture, Device};
use std::path::Path;

use crate::protocol::LinkType;

pub struct PacketData<'a> {
    pub data: &'a [u8],
    pub timestamp: DateTime<Utc>,
}

/// Packets seen and lost by the kernel, for live captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub received: u32,
    pub dropped: u32,
    pub if_dropped: u32,
}

pub enum PacketSource {
    Live(Capture<pcap::Active>, LinkType),
    File(Capture<pcap::Offline>, LinkType),
}

impl PacketSource {
    pub fn link_type(&self) -> LinkType {
        match self {
            PacketSource::Live(_, lt) | PacketSource::File(_, lt) => *lt,
        }
    }

    pub fn live(
        interface: Option<&str>,
        snaplen: i32,
        promisc: bool,
        bpf: Option<&str>,
    ) -> Result<Self> {
        let device = match interface {
            Some(name) => Device::list()?
                .into_iter()
                .find(|d| d.name == name)
                .with_context(|| format!("interface '{}' not found", name))?,
            None => Device::lookup()?.context("no capture device found")?,
        };

        let mut cap = Capture::from_device(device)?
            .snaplen(snaplen)
            .promisc(promisc)
            .timeout(1000)
            .open()
            .context("failed to open capture device")?;

        if let Some(filter) = bpf {
            cap.filter(filter, true)
                .with_context(|| format!("invalid BPF filter: {}", filter))?;
        }

        let lt = link_type_from_pcap(cap.get_datalink());
        Ok(PacketSource::Live(cap, lt))
    }

    pub fn from_file(path: &Path, bpf: Option<&str>) -> Result<Self> {
        let mut cap = Capture::from_file(path)
            .with_context(|| format!("failed to open pcap file: {}", path.display()))?;

        if let Some(filter) = bpf {
            cap.filter(filter, true)
                .with_context(|| format!("invalid BPF filter: {}", filter))?;
        }

        let lt = link_type_from_pcap(cap.get_datalink());
        Ok(PacketSource::File(cap, lt))
    }

    /// Kernel counters; `None` for offline files.
    pub fn stats(&mut self) -> Option<CaptureStats> {
        match self {
            PacketSource::Live(cap, _) => cap.stats().ok().map(|s| CaptureStats {
                received: s.received,
                dropped: s.dropped,
                if_dropped: s.if_dropped,
            }),
            PacketSource::File(..) => None,
        }
    }

    /// Iterate over packets, calling `f` for each one.
    /// Return `false` from `f` to stop capture.
    pub fn for_each_packet<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(PacketData) -> bool,
    {
        loop {
            let raw = match self {
                PacketSource::Live(cap, _) => cap.next_packet(),
                PacketSource::File(cap, _) => cap.next_packet(),
            };

            match raw {
                Ok(packet) => {
                    let tv = packet.header.ts;
                    let pkt = PacketData {
                        data: packet.data,
                        timestamp: timestamp(tv.tv_sec as i64, tv.tv_usec as i64),
                    };
                    if !f(pkt) {
                        break;
                    }
                }
                Err(pcap::Error::NoMorePackets) => break,
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(e).context("reading packets"),
            }
        }

        Ok(())
    }
}

/// pcap timeval to UTC. Out-of-range microseconds from malformed files are
/// clamped rather than rejected.
fn timestamp(secs: i64, usecs: i64) -> DateTime<Utc> {
    let nanos = usecs.clamp(0, 999_999) as u32 * 1000;
    DateTime::from_timestamp(secs.max(0), nanos).unwrap_or(DateTime::UNIX_EPOCH)
}

fn link_type_from_pcap(dl: pcap::Linktype) -> LinkType {
    match dl.0 {
        0 | 108 => LinkType::Loopback, // DLT_NULL, DLT_LOOP
        1 => LinkType::Ethernet,       // DLT_EN10MB
        12 | 101 => LinkType::RawIp,   // DLT_RAW
        113 => LinkType::LinuxSll,     // DLT_LINUX_SLL
        276 => LinkType::LinuxSll2,    // DLT_LINUX_SLL2
        _ => {
            warn!(
                "unsupported link type {} ({}), assuming Ethernet",
                dl.get_name().unwrap_or_default(),
                dl.0
            );
            LinkType::Ethernet
        }
    }
}
