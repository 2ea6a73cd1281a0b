use bytes::{Bytes, BytesMut};
use serde::Serialize;
use streamprims_frame::{LengthPrefixedCodec, LengthPrefixedConfig, DEFAULT_MAX_DATA_LENGTH};
use tokio_util::codec::Encoder;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_raw, table, OutputFormat};

#[derive(Serialize)]
struct EncodedFrame {
    index: usize,
    size: usize,
    prefix_length: usize,
    hex: String,
}

#[derive(Serialize)]
struct EncodeOutput {
    frames: Vec<EncodedFrame>,
    total_bytes: usize,
    hex: String,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let payloads = resolve_payloads(&args)?;
    let mut codec = LengthPrefixedCodec::with_config(LengthPrefixedConfig {
        max_data_length: args.max_data_length.unwrap_or(DEFAULT_MAX_DATA_LENGTH),
        ..LengthPrefixedConfig::default()
    });

    let mut encoded = BytesMut::new();
    let mut frames = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.into_iter().enumerate() {
        let start = encoded.len();
        let size = payload.len();
        codec
            .encode(payload, &mut encoded)
            .map_err(|err| frame_error(&format!("frame {index}"), err))?;
        frames.push(EncodedFrame {
            index,
            size,
            prefix_length: encoded.len() - start - size,
            hex: hex::encode(&encoded[start..]),
        });
    }

    let out = EncodeOutput {
        frames,
        total_bytes: encoded.len(),
        hex: hex::encode(&encoded),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut rows = table(vec!["FRAME", "SIZE", "PREFIX", "HEX"]);
            for frame in &out.frames {
                rows.add_row(vec![
                    frame.index.to_string(),
                    frame.size.to_string(),
                    frame.prefix_length.to_string(),
                    frame.hex.clone(),
                ]);
            }
            println!("{rows}");
        }
        OutputFormat::Pretty => println!("{}", out.hex),
        OutputFormat::Raw => print_raw(&encoded),
    }
    Ok(SUCCESS)
}

fn resolve_payloads(args: &EncodeArgs) -> CliResult<Vec<Bytes>> {
    if let Some(path) = &args.file {
        let data = std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err))?;
        return Ok(vec![Bytes::from(data)]);
    }

    args.payloads
        .iter()
        .map(|payload| {
            if !args.hex {
                return Ok(Bytes::copy_from_slice(payload.as_bytes()));
            }
            hex::decode(payload.trim())
                .map(Bytes::from)
                .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex payload {payload:?}: {err}")))
        })
        .collect()
}
