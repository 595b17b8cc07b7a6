use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};

use crate::protocol::DEFAULT_MAX_RECORD_LEN;

#[derive(Parser, Debug)]
#[command(name = "aesdsocket", author, version, about, long_about = None)]
pub struct Cli {
    /// Fork into the background once the listening socket is bound.
    #[arg(short, long)]
    pub daemon: bool,

    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:9000")]
    pub listen: SocketAddr,

    /// Where the command log lives.
    #[arg(long, value_enum, default_value_t = BackendArg::Ring)]
    pub backend: BackendArg,

    /// Device node used by the `device` backend.
    #[arg(long, default_value = "/dev/aesdchar")]
    pub device: PathBuf,

    /// File mirroring the in-process ring; removed on exit.
    #[arg(long, default_value = "/var/tmp/aesdsocketdata")]
    pub data_file: PathBuf,

    /// Seconds between timestamp records (in-process ring only).
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub marker_interval_secs: u64,

    /// Longest accepted record in bytes, newline included.
    #[arg(long, default_value_t = DEFAULT_MAX_RECORD_LEN)]
    pub max_record_len: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    /// Keep the last ten commands in this process.
    Ring,
    /// Read and write the character device.
    Device,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let cli = Cli::try_parse_from(["aesdsocket"]).expect("defaults parse");
        assert!(!cli.daemon);
        assert_eq!(cli.listen, "0.0.0.0:9000".parse().expect("addr"));
        assert_eq!(cli.backend, BackendArg::Ring);
        assert_eq!(cli.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(cli.marker_interval_secs, 10);
    }

    #[test]
    fn short_daemon_flag() {
        let cli = Cli::try_parse_from(["aesdsocket", "-d", "--backend", "device"]).expect("parse");
        assert!(cli.daemon);
        assert_eq!(cli.backend, BackendArg::Device);
    }

    #[test]
    fn zero_marker_interval_is_rejected() {
        assert!(Cli::try_parse_from(["aesdsocket", "--marker-interval-secs", "0"]).is_err());
    }
}
