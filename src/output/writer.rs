use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use colored::Colorize;

use super::report::SessionReport;
use crate::sanitize::escape_control_chars;
use crate::session::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// One compact JSON object per line.
    #[default]
    Json,
    Pretty,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    /// Single file, appended to.
    File(PathBuf),
    /// One file per session inside an existing directory.
    Directory(PathBuf),
}

enum Sink {
    Stream(Box<dyn Write + Send>),
    Directory { dir: PathBuf, written: u64 },
}

/// Renders session records and writes them out, flushing after each one.
pub struct RecordWriter {
    format: Format,
    sink: Sink,
}

impl RecordWriter {
    pub fn new(destination: Destination, format: Format) -> Result<Self> {
        let sink = match destination {
            Destination::Stdout => Sink::Stream(Box::new(io::stdout())),
            Destination::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening output file {}", path.display()))?;
                Sink::Stream(Box::new(BufWriter::new(file)))
            }
            Destination::Directory(dir) => {
                if !dir.is_dir() {
                    bail!("output directory {} does not exist", dir.display());
                }
                Sink::Directory { dir, written: 0 }
            }
        };
        Ok(RecordWriter { format, sink })
    }

    /// Write into any byte sink, e.g. an in-memory buffer.
    pub fn from_writer(writer: impl Write + Send + 'static, format: Format) -> Self {
        RecordWriter {
            format,
            sink: Sink::Stream(Box::new(writer)),
        }
    }

    pub fn write(&mut self, record: &SessionRecord) -> Result<()> {
        let mut rendered = self.render(record)?;
        rendered.push('\n');

        match &mut self.sink {
            Sink::Stream(out) => {
                out.write_all(rendered.as_bytes())
                    .and_then(|()| out.flush())
                    .context("writing session record")?;
            }
            Sink::Directory { dir, written } => {
                *written += 1;
                let path = dir.join(file_name(record, *written, self.format));
                fs::write(&path, rendered)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Sink::Stream(out) = &mut self.sink {
            out.flush().context("flushing output")?;
        }
        Ok(())
    }

    fn render(&self, record: &SessionRecord) -> Result<String> {
        let report = SessionReport::new(record);
        Ok(match self.format {
            Format::Json => serde_json::to_string(&report)?,
            Format::Pretty => serde_json::to_string_pretty(&report)?,
            Format::Text => render_text(&report),
        })
    }
}

/// `<client>_<port>_<n>.json`, or `session_<n>` when the identity is unknown.
fn file_name(record: &SessionRecord, sequence: u64, format: Format) -> String {
    let ext = match format {
        Format::Text => "txt",
        Format::Json | Format::Pretty => "json",
    };
    match record.identity() {
        // IPv6 colons are not portable in file names.
        Some(id) => format!(
            "{}_{}_{}_{}.{}",
            id.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
            id.client.ip().to_string().replace(':', "-"),
            id.client.port(),
            sequence,
            ext
        ),
        None => format!("session_{}.{}", sequence, ext),
    }
}

fn render_text(report: &SessionReport<'_>) -> String {
    let endpoint = |ip: &Option<String>, port: &Option<String>| match (ip, port) {
        (Some(ip), Some(port)) => format!("{}:{}", ip, port),
        _ => "?".to_string(),
    };
    let client = endpoint(&report.client_ip, &report.client_port);
    let server = endpoint(&report.server_ip, &report.server_port);
    let banner = |b: Option<&str>| {
        b.map(|b| escape_control_chars(b).into_owned())
            .unwrap_or_else(|| "-".to_string())
    };
    let digest = |h: &Option<String>| h.clone().unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} {} {} {} {} {} {} {} {}",
        report.timestamp.as_deref().unwrap_or("-").dimmed(),
        client.green(),
        "->".dimmed(),
        server.yellow(),
        "client".cyan().bold(),
        banner(report.client.banner),
        digest(&report.client.hassh).magenta(),
        "server".cyan().bold(),
        banner(report.server.banner),
        digest(&report.server.hassh).magenta(),
    )
}
