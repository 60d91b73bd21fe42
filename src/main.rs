//! Entry point for `stp`.
//!
//! Parses CLI arguments and dispatches into either **sender** or **receiver**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, files).

use std::fs::File;
use std::io::BufWriter;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use stp_over_udp::events::WriterSink;
use stp_over_udp::{Receiver, ReceiverConfig, Sender, SenderConfig, Socket};

/// Simple reliable transport protocol over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Sender {
        /// Local UDP port to bind.
        #[arg(value_parser = clap::value_parser!(u16).range(49_152..))]
        sender_port: u16,
        /// Receiver's UDP port on localhost.
        #[arg(value_parser = clap::value_parser!(u16).range(49_152..))]
        receiver_port: u16,
        /// File to transfer.
        file: PathBuf,
        /// Maximum unacknowledged payload bytes.
        max_win: usize,
        /// Retransmission timeout in milliseconds.
        rto: u64,
        /// Forward (DATA/SYN/FIN) loss probability.
        flp: f64,
        /// Reverse (ACK) loss probability.
        rlp: f64,
        /// Event log destination.
        #[arg(long, default_value = "sender_log.txt")]
        log: PathBuf,
    },
    /// Receive a file from a sender.
    Receiver {
        /// Local UDP port to bind.
        #[arg(value_parser = clap::value_parser!(u16).range(49_152..))]
        receiver_port: u16,
        /// Port the sender will connect from.
        #[arg(value_parser = clap::value_parser!(u16).range(49_152..))]
        sender_port: u16,
        /// Where to write the received data; never overwritten.
        file: PathBuf,
        /// Receive window in bytes.
        max_win: usize,
        /// Event log destination.
        #[arg(long, default_value = "receiver_log.txt")]
        log: PathBuf,
        /// Maximum segment lifetime in milliseconds (TIME_WAIT is twice this).
        #[arg(long, default_value_t = 1000)]
        msl_ms: u64,
    },
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Sender {
            sender_port,
            receiver_port,
            file,
            max_win,
            rto,
            flp,
            rlp,
            log,
        } => {
            let config = SenderConfig {
                max_window: max_win,
                rto: Duration::from_millis(rto),
                forward_loss: flp,
                reverse_loss: rlp,
                initial_seqno: None,
            };
            config.validate()?;
            run_sender(sender_port, receiver_port, &file, config, &log).await
        }
        Mode::Receiver {
            receiver_port,
            sender_port,
            file,
            max_win,
            log,
            msl_ms,
        } => {
            let config = ReceiverConfig {
                msl: Duration::from_millis(msl_ms),
                ..ReceiverConfig::new(sender_port, max_win)
            };
            config.validate()?;
            run_receiver(receiver_port, &file, config, &log).await
        }
    }
}

async fn run_sender(
    sender_port: u16,
    receiver_port: u16,
    file: &Path,
    config: SenderConfig,
    log_path: &Path,
) -> Result<()> {
    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;
    let log_sink = Arc::new(WriterSink::new(BufWriter::new(
        File::create(log_path).with_context(|| format!("cannot create {}", log_path.display()))?,
    )));

    let socket = Socket::bind(localhost(sender_port)).await?;
    log::info!(
        "sending {} from {} to port {receiver_port}",
        file.display(),
        socket.local_addr
    );
    let sender = Sender::new(socket, localhost(receiver_port), config).with_events(log_sink.clone());

    let stats = sender.run(source).await?;
    log_sink.write_trailer(&stats.to_string())?;
    log::info!(
        "transfer complete: {} bytes in {} segments, {} retransmitted",
        stats.original_bytes_acked,
        stats.original_segments_sent,
        stats.retransmitted_segments
    );
    Ok(())
}

async fn run_receiver(
    receiver_port: u16,
    file: &Path,
    config: ReceiverConfig,
    log_path: &Path,
) -> Result<()> {
    let log_sink = Arc::new(WriterSink::new(BufWriter::new(
        File::create(log_path).with_context(|| format!("cannot create {}", log_path.display()))?,
    )));

    let socket = Socket::bind(localhost(receiver_port)).await?;
    let path = unique_path(file);
    let output = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))?;
    log::info!("receiving into {} on {}", path.display(), socket.local_addr);

    let receiver = Receiver::new(socket, config).with_events(log_sink.clone());
    let stats = receiver.run(tokio::io::BufWriter::new(output)).await?;
    log_sink.write_trailer(&stats.to_string())?;
    log::info!(
        "received {} bytes in {} segments",
        stats.original_bytes_received,
        stats.original_segments_received
    );
    Ok(())
}

/// `path` itself if free, otherwise the first free `stem_(N).ext`.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{stem}_({n}).{ext}"),
                None => format!("{stem}_({n})"),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stp-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unique_path_keeps_free_name() {
        let dir = scratch_dir("free");
        let path = dir.join("out.txt");
        assert_eq!(unique_path(&path), path);
    }

    #[test]
    fn unique_path_appends_counter_before_extension() {
        let dir = scratch_dir("taken");
        std::fs::write(dir.join("out.txt"), b"x").unwrap();
        std::fs::write(dir.join("out_(1).txt"), b"x").unwrap();
        assert_eq!(unique_path(&dir.join("out.txt")), dir.join("out_(2).txt"));

        std::fs::write(dir.join("noext"), b"x").unwrap();
        assert_eq!(unique_path(&dir.join("noext")), dir.join("noext_(1)"));
    }

    #[test]
    fn cli_rejects_ports_outside_dynamic_range() {
        let parsed = Cli::try_parse_from([
            "stp", "sender", "8080", "50001", "f.txt", "1000", "200", "0", "0",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "stp", "receiver", "50001", "50000", "out.txt", "2000",
        ]);
        assert!(parsed.is_ok());
    }
}
