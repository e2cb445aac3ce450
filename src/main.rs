use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::TimeDelta;
use clap::{ArgAction, Parser, ValueEnum};
use log::{LevelFilter, info};
use pcap::Device;

use hasshcap::capture::PacketSource;
use hasshcap::config::{Config, EmitPolicy, ReassemblyConfig, SessionConfig};
use hasshcap::metrics::Counters;
use hasshcap::output::{self, Destination, Format, OutputWorker, RecordWriter};
use hasshcap::protocol;
use hasshcap::reassembly::ConnectionTable;

#[derive(Parser)]
#[command(
    name = "hasshcap",
    version,
    about = "Passive SSH client and server fingerprinting (HASSH)"
)]
struct Cli {
    /// BPF filter expression (same syntax as tcpdump)
    filter: Vec<String>,

    /// Network interface to capture on
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// Read from pcap/pcapng file instead of live capture
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    input: Option<PathBuf>,

    /// Snap length (bytes to capture per packet)
    #[arg(short = 's', long, default_value_t = 65535)]
    snaplen: i32,

    /// Don't use promiscuous mode
    #[arg(long)]
    no_promisc: bool,

    /// Stop after N packets
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Append records to FILE instead of stdout
    #[arg(short = 'w', long, value_name = "FILE", conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Write one file per session into DIR
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Emit a session only once the server KEXINIT is seen, not at the
    /// server banner
    #[arg(long)]
    require_kexinit: bool,

    /// On close or timeout, emit sessions that captured at least one banner
    #[arg(long)]
    emit_partial: bool,

    /// Streams start after the version exchange; decode KEXINIT directly
    #[arg(long)]
    skip_banner: bool,

    /// Sessions waiting for output before new ones are dropped
    #[arg(long, default_value_t = 4096)]
    queue_size: usize,

    /// Connections tracked at once
    #[arg(long, default_value_t = 10_000)]
    max_connections: usize,

    /// Complete connections idle for this long
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    close_timeout: u64,

    /// Flush idle connections and log statistics every N packets (0: never)
    #[arg(long, value_name = "N", default_value_t = 10_000)]
    stats: u64,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// List available interfaces and exit
    #[arg(short = 'L', long)]
    list_interfaces: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One JSON object per line
    Json,
    /// Indented JSON
    Pretty,
    /// Colored one-line summary
    Text,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => Format::Json,
            OutputFormat::Pretty => Format::Pretty,
            OutputFormat::Text => Format::Text,
        }
    }
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            session: SessionConfig {
                emit_policy: if self.require_kexinit {
                    EmitPolicy::ServerKexInit
                } else {
                    EmitPolicy::ServerBanner
                },
                skip_banner: self.skip_banner,
                emit_partial_on_close: self.emit_partial,
            },
            reassembly: ReassemblyConfig {
                max_connections: self.max_connections,
                ..ReassemblyConfig::default()
            },
            queue_capacity: self.queue_size,
            close_timeout: i64::try_from(self.close_timeout)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
            stats_every: self.stats,
        }
    }

    fn destination(&self) -> Destination {
        match (&self.output_dir, &self.output) {
            (Some(dir), _) => Destination::Directory(dir.clone()),
            (None, Some(file)) => Destination::File(file.clone()),
            (None, None) => Destination::Stdout,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if cli.list_interfaces {
        list_interfaces()?;
        return Ok(());
    }

    let config = cli.config();
    let bpf = (!cli.filter.is_empty()).then(|| cli.filter.join(" "));
    let mut source = match &cli.input {
        Some(path) => PacketSource::from_file(path, bpf.as_deref())?,
        None => PacketSource::live(
            cli.interface.as_deref(),
            cli.snaplen,
            !cli.no_promisc,
            bpf.as_deref(),
        )?,
    };
    let link_type = source.link_type();

    let writer = RecordWriter::new(cli.destination(), cli.format.into())?;
    let counters = Arc::new(Counters::new());
    let (emitter, rx) = output::queue(config.queue_capacity, counters.clone());
    let worker = OutputWorker::spawn(rx, writer)?;
    let mut table = ConnectionTable::new(
        config.reassembly,
        config.session,
        emitter,
        counters.clone(),
    );

    let mut packets: u64 = 0;
    let captured = source.for_each_packet(|packet| {
        packets += 1;
        if let Some(segment) = protocol::parse_tcp(packet.data, link_type) {
            table.process(&segment, packet.timestamp);
        }

        if config.stats_every > 0 && packets % config.stats_every == 0 {
            let flushed = packet
                .timestamp
                .checked_sub_signed(config.close_timeout)
                .map_or(0, |cutoff| table.flush_older_than(cutoff));
            info!(
                "{} packets, {} connections tracked, {} idle closed; {}",
                packets,
                table.len(),
                flushed,
                counters
            );
        }

        cli.count.is_none_or(|n| packets < n)
    });

    if let Err(err) = captured {
        worker.cancel();
        drop(table);
        let _ = worker.join();
        return Err(err);
    }

    // Closing every connection may emit partial sessions; the queue's
    // producer side goes away with the table.
    table.flush_all();
    let stats = table.stats();
    drop(table);
    let written = worker.join()?;

    if let Some(kernel) = source.stats() {
        info!(
            "kernel: {} received, {} dropped, {} dropped by interface",
            kernel.received, kernel.dropped, kernel.if_dropped
        );
    }
    info!(
        "{} packets, {} sessions written, {}; {}",
        packets, written, stats, counters
    );
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn list_interfaces() -> Result<()> {
    let devices = Device::list()?;
    for dev in devices {
        let desc = dev.desc.as_deref().unwrap_or("");
        let addrs: Vec<String> = dev.addresses.iter().map(|a| a.addr.to_string()).collect();
        println!("{:<16} {}  [{}]", dev.name, desc, addrs.join(", "));
    }
    Ok(())
}
