use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run echo streams between two in-memory muxers and report the outcome.
    Simulate(SimulateArgs),
    /// Length-prefix payloads and print the encoded bytes as hex.
    Encode(EncodeArgs),
    /// Decode hex-encoded length-prefixed frames.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of echo streams to open.
    #[arg(long, short = 'n', default_value = "4")]
    pub streams: usize,
    /// Bytes each stream sends and expects back.
    #[arg(long, default_value = "65536")]
    pub payload_size: usize,
    /// Bytes handed to each `send` call.
    #[arg(long, default_value = "16384")]
    pub write_size: usize,
    /// Largest data chunk carried by one muxer message.
    #[arg(long, default_value = "4096")]
    pub max_message_size: usize,
    /// Connection queue chunk size; larger deliveries are split.
    #[arg(long, default_value = "65536")]
    pub chunk_size: usize,
    /// Pending deliveries at which the connection reports backpressure.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Artificial latency per delivery (e.g. 1ms).
    #[arg(long)]
    pub delay: Option<String>,
    /// Give up after this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Payloads to frame, one frame each.
    #[arg(required_unless_present = "file")]
    pub payloads: Vec<String>,
    /// Treat payloads as hex instead of text.
    #[arg(long)]
    pub hex: bool,
    /// Frame the contents of a file.
    #[arg(long, conflicts_with_all = ["payloads", "hex"])]
    pub file: Option<PathBuf>,
    /// Reject payloads longer than this.
    #[arg(long)]
    pub max_data_length: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded frames.
    #[arg(required_unless_present = "file")]
    pub input: Option<String>,
    /// Decode the raw contents of a file.
    #[arg(long, conflicts_with = "input")]
    pub file: Option<PathBuf>,
    /// Reject frames longer than this.
    #[arg(long)]
    pub max_data_length: Option<usize>,
    /// Report zero-length frames instead of skipping them.
    #[arg(long)]
    pub keep_empty: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_duration(" ").unwrap_err().code, USAGE);
    }
}
