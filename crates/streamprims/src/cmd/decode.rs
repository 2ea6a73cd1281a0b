use bytes::Bytes;
use serde::Serialize;
use streamprims_frame::{LengthPrefixedConfig, LengthPrefixedDecoder, DEFAULT_MAX_DATA_LENGTH};
use tracing::warn;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{payload_preview, print_json, print_raw, table, OutputFormat};

#[derive(Serialize)]
struct DecodedFrame {
    index: usize,
    size: usize,
    payload: String,
    hex: String,
}

#[derive(Serialize)]
struct DecodeOutput {
    count: usize,
    frames: Vec<DecodedFrame>,
    incomplete_bytes: usize,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = read_input(&args)?;
    let (frames, incomplete_bytes) = decode_all(&input, &args)?;
    if incomplete_bytes > 0 {
        warn!(bytes = incomplete_bytes, "input ends inside a frame");
    }

    match format {
        OutputFormat::Raw => {
            for frame in &frames {
                print_raw(frame);
            }
        }
        OutputFormat::Json => print_json(&DecodeOutput {
            count: frames.len(),
            frames: describe(&frames),
            incomplete_bytes,
        }),
        OutputFormat::Table => {
            let mut rows = table(vec!["FRAME", "SIZE", "PAYLOAD"]);
            for frame in describe(&frames) {
                rows.add_row(vec![frame.index.to_string(), frame.size.to_string(), frame.payload]);
            }
            println!("{rows}");
        }
        OutputFormat::Pretty => {
            for frame in describe(&frames) {
                println!("frame={} size={} payload={}", frame.index, frame.size, frame.payload);
            }
            if incomplete_bytes > 0 {
                println!("incomplete={incomplete_bytes}");
            }
        }
    }
    Ok(SUCCESS)
}

fn read_input(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    if let Some(path) = &args.file {
        return std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err));
    }

    let text = args.input.as_deref().unwrap_or_default();
    let compact: String = text.split_whitespace().collect();
    let compact = compact.strip_prefix("0x").unwrap_or(&compact);
    hex::decode(compact).map_err(|err| CliError::new(DATA_INVALID, format!("input is not valid hex: {err}")))
}

/// Decode every complete frame, returning them with the count of trailing
/// bytes that did not form a whole frame.
fn decode_all(input: &[u8], args: &DecodeArgs) -> CliResult<(Vec<Bytes>, usize)> {
    let mut decoder = LengthPrefixedDecoder::with_config(LengthPrefixedConfig {
        max_data_length: args.max_data_length.unwrap_or(DEFAULT_MAX_DATA_LENGTH),
        // The whole input is already in memory.
        max_buffer_size: Some(input.len()),
        skip_empty: !args.keep_empty,
        ..LengthPrefixedConfig::default()
    });

    let frames = decoder
        .decode(input)
        .map_err(|err| frame_error("decode failed", err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| frame_error("decode failed", err))?;
    Ok((frames, decoder.buffered_len()))
}

fn describe(frames: &[Bytes]) -> Vec<DecodedFrame> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| DecodedFrame {
            index,
            size: frame.len(),
            payload: payload_preview(frame),
            hex: hex::encode(frame),
        })
        .collect()
}
