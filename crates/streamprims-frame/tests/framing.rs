use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use streamprims_frame::{
    encode_frame, varint, FrameError, LengthPrefixedCodec, LengthPrefixedConfig,
    LengthPrefixedDecoder, LengthPrefixedStream,
};
use streamprims_stream::{stream_pair, StreamConfig};
use streamprims_transport::QueueConfig;
use tokio_util::codec::{FramedRead, FramedWrite};

fn wire(frames: &[&[u8]]) -> BytesMut {
    let mut buf = BytesMut::new();
    for frame in frames {
        encode_frame(frame, &mut buf);
    }
    buf
}

#[test]
fn decoder_never_yields_partial_frames() {
    let first = wire(&[b"abcde"]);
    let second = wire(&[b"xyz"]);
    let mut decoder = LengthPrefixedDecoder::new();

    let out: Vec<Bytes> = decoder
        .decode(&first)
        .expect("first chunk should decode")
        .collect::<Result<_, _>>()
        .expect("frames should be valid");
    assert_eq!(out, vec!["abcde"]);

    let out: Vec<Bytes> = decoder
        .decode(&second)
        .expect("second chunk should decode")
        .collect::<Result<_, _>>()
        .expect("frames should be valid");
    assert_eq!(out, vec!["xyz"]);
}

#[test]
fn decoder_handles_every_split_point() {
    let all = wire(&[b"abcde", b"xyz"]);
    for split in 0..=all.len() {
        let mut decoder = LengthPrefixedDecoder::new();
        let mut out: Vec<Bytes> = Vec::new();
        for chunk in [&all[..split], &all[split..]] {
            for frame in decoder.decode(chunk).expect("chunk should decode") {
                out.push(frame.expect("frame should be valid"));
            }
        }
        assert_eq!(out, vec!["abcde", "xyz"], "split at {split}");
    }
}

#[tokio::test]
async fn length_prefixed_stream_round_trips_across_prefix_sizes() {
    let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
    let config = LengthPrefixedConfig {
        max_data_length: 1 << 21,
        ..LengthPrefixedConfig::default()
    };
    let mut writer = LengthPrefixedStream::with_config(a, config.clone());
    let mut reader = LengthPrefixedStream::with_config(b, config);

    // One, two and three byte prefixes.
    let payloads: Vec<Vec<u8>> = [0usize, 1, 127, 128, 16_383, 16_384, 70_000]
        .iter()
        .map(|&len| (0..len).map(|i| (i % 251) as u8).collect())
        .collect();

    for payload in &payloads {
        writer.write(payload, None).await.expect("write should succeed");
    }
    for payload in &payloads {
        let got = reader.read(None).await.expect("read should succeed");
        assert_eq!(got.as_ref(), payload.as_slice());
        assert_eq!(
            varint::encoding_length(payload.len() as u64),
            streamprims_frame::encoded_len(payload.len()) - payload.len()
        );
    }
}

#[tokio::test]
async fn codec_carries_frames_over_async_io() {
    let (client, server) = tokio::io::duplex(64);
    let mut sink = FramedWrite::new(client, LengthPrefixedCodec::new());
    let mut source = FramedRead::new(server, LengthPrefixedCodec::new());

    let writer = tokio::spawn(async move {
        for frame in [&b"alpha"[..], &[0u8; 200][..], b"omega"] {
            sink.send(Bytes::copy_from_slice(frame))
                .await
                .expect("send should succeed");
        }
    });

    let first = source.next().await.expect("frame").expect("valid frame");
    assert_eq!(first.as_ref(), b"alpha");
    let second = source.next().await.expect("frame").expect("valid frame");
    assert_eq!(second.len(), 200);
    let third = source.next().await.expect("frame").expect("valid frame");
    assert_eq!(third.as_ref(), b"omega");

    writer.await.expect("writer task should finish");
    assert!(source.next().await.is_none());
}

#[tokio::test]
async fn codec_rejects_oversized_frames() {
    let (mut client, server) = tokio::io::duplex(64);
    let mut source = FramedRead::new(
        server,
        LengthPrefixedCodec::with_config(LengthPrefixedConfig {
            max_data_length: 16,
            ..LengthPrefixedConfig::default()
        }),
    );

    let mut buf = BytesMut::new();
    encode_frame(&[1u8; 32], &mut buf);
    tokio::io::AsyncWriteExt::write_all(&mut client, &buf)
        .await
        .expect("write should succeed");

    let err = source
        .next()
        .await
        .expect("decoder should report")
        .expect_err("frame should be rejected");
    assert!(matches!(err, FrameError::DataTooLong { length: 32, max: 16 }));
}
