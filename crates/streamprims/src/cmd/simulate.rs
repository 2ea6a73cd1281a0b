use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Serialize;
use streamprims_mux::{
    CreateStreamOptions, MockMuxer, MockMuxerConfig, MuxerEvent, StreamMuxer, MOCK_MUXER_PROTOCOL,
};
use streamprims_stream::{echo, stream_pair, MessageStream, StreamConfig};
use streamprims_transport::QueueConfig;
use tracing::{debug, info};

use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{
    io_error, mux_error, stream_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT,
    USAGE,
};
use crate::output::{print_json, table, OutputFormat};

const ECHO_PROTOCOL: &str = "/echo/1.0.0";

#[derive(Debug, Serialize)]
struct StreamReport {
    id: String,
    sent: usize,
    received: usize,
    verified: bool,
    status: &'static str,
    lifetime_ms: f64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    protocol: &'static str,
    streams: usize,
    payload_size: usize,
    bytes_sent: usize,
    bytes_received: usize,
    elapsed_ms: f64,
    verified: bool,
    details: Vec<StreamReport>,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    if args.streams == 0 {
        return Err(CliError::new(USAGE, "--streams must be at least 1"));
    }
    if args.write_size == 0 || args.max_message_size == 0 || args.chunk_size == 0 {
        return Err(CliError::new(USAGE, "sizes must be greater than zero"));
    }
    let timeout = parse_duration(&args.timeout)?;
    let queue = QueueConfig {
        delay: args.delay.as_deref().map(parse_duration).transpose()?,
        capacity: args.capacity.unwrap_or(usize::MAX),
        chunk_size: args.chunk_size,
    };
    let muxer_config = MockMuxerConfig {
        max_message_size: args.max_message_size,
        ..MockMuxerConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| io_error("failed to start runtime", &err))?;

    let report = runtime
        .block_on(async {
            tokio::time::timeout(timeout, simulate(&args, queue, muxer_config)).await
        })
        .map_err(|_| CliError::new(TIMEOUT, format!("simulation timed out after {timeout:?}")))??;

    print_report(&report, format);
    Ok(if report.verified { SUCCESS } else { FAILURE })
}

async fn simulate(
    args: &SimulateArgs,
    queue: QueueConfig,
    config: MockMuxerConfig,
) -> CliResult<SimulationReport> {
    let started = Instant::now();
    let (a, b) = stream_pair(StreamConfig::default(), queue);
    let client = MockMuxer::start_with_config(a, config.clone());
    let server = MockMuxer::start_with_config(b, config);
    let server_task = tokio::spawn(serve_echo(server.clone()));

    let mut tasks = Vec::with_capacity(args.streams);
    for index in 0..args.streams {
        let stream = client
            .create_stream(CreateStreamOptions {
                protocol: Some(ECHO_PROTOCOL.to_string()),
            })
            .await
            .map_err(|err| mux_error("failed to open stream", err))?;
        let payload = payload(index, args.payload_size);
        tasks.push(tokio::spawn(exchange(stream, payload, args.write_size)));
    }

    let mut details = Vec::with_capacity(tasks.len());
    for task in tasks {
        let report = task
            .await
            .map_err(|err| CliError::new(INTERNAL, format!("stream task failed: {err}")))??;
        details.push(report);
    }

    client
        .close(None)
        .await
        .map_err(|err| mux_error("failed to close client muxer", err))?;
    server
        .close(None)
        .await
        .map_err(|err| mux_error("failed to close server muxer", err))?;
    let accepted = server_task
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("echo server failed: {err}")))?;
    debug!(accepted, "echo server finished");

    let report = SimulationReport {
        protocol: MOCK_MUXER_PROTOCOL,
        streams: details.len(),
        payload_size: args.payload_size,
        bytes_sent: details.iter().map(|d| d.sent).sum(),
        bytes_received: details.iter().map(|d| d.received).sum(),
        elapsed_ms: millis(started.elapsed()),
        verified: details.iter().all(|d| d.verified),
        details,
    };
    info!(
        streams = report.streams,
        bytes = report.bytes_sent,
        verified = report.verified,
        "simulation finished"
    );
    Ok(report)
}

/// Echo every inbound stream until the muxer closes. Returns how many
/// streams were served.
async fn serve_echo(server: StreamMuxer<MockMuxer>) -> usize {
    let mut events = server.subscribe();
    let mut accepted = 0;
    while let Some(event) = events.recv().await {
        match event {
            MuxerEvent::Stream(stream) => {
                debug!(stream = %stream.id(), "echoing inbound stream");
                let _ = echo(&stream);
                accepted += 1;
            }
            MuxerEvent::Close => break,
            MuxerEvent::Drain => {}
        }
    }
    accepted
}

/// Send `payload` in `write_size` pieces, close the write half and collect
/// everything echoed back.
async fn exchange(stream: MessageStream, payload: Bytes, write_size: usize) -> CliResult<StreamReport> {
    let mut reader = stream.reader();

    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + write_size).min(payload.len());
        let accepted = stream
            .send(payload.slice(offset..end))
            .map_err(|err| stream_error("send failed", err))?;
        if !accepted {
            stream
                .wait_drain(None)
                .await
                .map_err(|err| stream_error("wait for drain failed", err))?;
        }
        offset = end;
    }
    stream
        .close_write(None)
        .await
        .map_err(|err| stream_error("close write failed", err))?;

    let mut echoed = BytesMut::with_capacity(payload.len());
    while let Some(chunk) = reader.next().await {
        let chunk = chunk.map_err(|err| stream_error("echo failed", err))?;
        echoed.extend_from_slice(&chunk);
    }

    Ok(StreamReport {
        id: stream.id().to_string(),
        sent: payload.len(),
        received: echoed.len(),
        verified: echoed == payload,
        status: stream.status().as_str(),
        lifetime_ms: millis(stream.timeline().lifetime()),
    })
}

fn payload(index: usize, size: usize) -> Bytes {
    (0..size)
        .map(|i| (i.wrapping_mul(31).wrapping_add(index) % 251) as u8)
        .collect::<Vec<_>>()
        .into()
}

fn millis(duration: std::time::Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn print_report(report: &SimulationReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut rows = table(vec!["STREAM", "SENT", "RECEIVED", "VERIFIED", "STATUS", "LIFETIME"]);
            for detail in &report.details {
                rows.add_row(vec![
                    detail.id.clone(),
                    detail.sent.to_string(),
                    detail.received.to_string(),
                    detail.verified.to_string(),
                    detail.status.to_string(),
                    format!("{:.2}ms", detail.lifetime_ms),
                ]);
            }
            println!("{rows}");
            println!(
                "{} streams, {} bytes echoed in {:.2}ms",
                report.streams, report.bytes_received, report.elapsed_ms
            );
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("Simulation:");
            println!("  Protocol:  {}", report.protocol);
            println!("  Streams:   {}", report.streams);
            println!("  Sent:      {} bytes", report.bytes_sent);
            println!("  Received:  {} bytes", report.bytes_received);
            println!("  Elapsed:   {:.2}ms", report.elapsed_ms);
            println!("  Verified:  {}", report.verified);
        }
    }
}
