use std::time::Duration;

use futures_util::StreamExt;
use streamprims_mux::{
    CreateStreamOptions, MockMuxer, MockMuxerConfig, MuxMessage, MuxerEvent, MuxerStatus,
    StreamMuxer,
};
use streamprims_stream::{
    echo, stream_pair, Direction, MessageStream, StreamConfig, StreamError, StreamStatus,
};
use streamprims_transport::QueueConfig;

fn muxers(queue: QueueConfig, config: MockMuxerConfig) -> (StreamMuxer<MockMuxer>, StreamMuxer<MockMuxer>) {
    let (a, b) = stream_pair(StreamConfig::default(), queue);
    (
        MockMuxer::start_with_config(a, config.clone()),
        MockMuxer::start_with_config(b, config),
    )
}

async fn next_stream(muxer: &StreamMuxer<MockMuxer>) -> MessageStream {
    let mut events = muxer.subscribe();
    loop {
        match events.recv().await {
            Some(MuxerEvent::Stream(stream)) => return stream,
            Some(_) => continue,
            None => panic!("muxer dropped before announcing a stream"),
        }
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn outbound_stream_echoes_through_remote_muxer() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());
    let mut events = server.subscribe();

    let stream = client
        .create_stream(CreateStreamOptions {
            protocol: Some("/echo/1.0.0".into()),
        })
        .await
        .expect("create_stream should succeed");
    assert_eq!(stream.id(), "2");
    assert_eq!(stream.direction(), Direction::Outbound);

    let inbound = match events.recv().await {
        Some(MuxerEvent::Stream(inbound)) => inbound,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(inbound.id(), "2");
    assert_eq!(inbound.direction(), Direction::Inbound);
    let _echo = echo(&inbound);

    let reader = stream.reader();
    stream.send("ping ").expect("send should succeed");
    stream.send("pong").expect("send should succeed");
    stream.close_write(None).await.expect("close_write should succeed");

    let echoed: Vec<u8> = reader
        .map(|chunk| chunk.expect("chunk should be data"))
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(echoed, b"ping pong");
}

#[tokio::test]
async fn ids_never_collide_between_ends() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());

    let from_client = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    let from_server = server.create_stream(CreateStreamOptions::default()).await.unwrap();
    let again = client.create_stream(CreateStreamOptions::default()).await.unwrap();

    assert_eq!(from_client.id(), "2");
    assert_eq!(from_server.id(), "3");
    assert_eq!(again.id(), "4");

    eventually("both ends see three streams", || {
        client.streams().len() == 3 && server.streams().len() == 3
    })
    .await;
}

#[tokio::test]
async fn aborting_the_muxer_aborts_every_child() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());
    let first = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    let second = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    eventually("server sees both streams", || server.streams().len() == 2).await;
    let remote = server.streams();

    client.abort(StreamError::Protocol("shutting down".into()));

    assert_eq!(client.status(), MuxerStatus::Closed);
    assert_eq!(first.status(), StreamStatus::Aborted);
    assert_eq!(second.status(), StreamStatus::Aborted);
    assert!(client.streams().is_empty());

    eventually("remote children reset", || {
        remote.iter().all(|s| s.status() == StreamStatus::Reset)
    })
    .await;
    eventually("server drops reset children", || server.streams().is_empty()).await;
    assert_eq!(server.status(), MuxerStatus::Open);
}

#[tokio::test]
async fn duplicate_create_is_a_protocol_error() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());
    let create = MuxMessage::Create {
        id: "9".into(),
        protocol: None,
    }
    .encode()
    .unwrap();

    client.send(create.clone()).unwrap();
    client.send(create).unwrap();

    eventually("server muxer closed", || server.status() == MuxerStatus::Closed).await;
    assert_eq!(server.connection().status(), StreamStatus::Aborted);
}

#[tokio::test]
async fn messages_for_unknown_streams_are_dropped() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());

    let stray = MuxMessage::Data {
        id: "41".into(),
        chunk: b"lost".to_vec(),
    };
    client.send(stray.encode().unwrap()).unwrap();

    let stream = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    let inbound = next_stream(&server).await;
    assert_eq!(inbound.id(), stream.id());
    assert_eq!(server.status(), MuxerStatus::Open);
}

#[tokio::test]
async fn garbage_on_the_connection_aborts_the_muxer() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());
    let child = server.create_stream(CreateStreamOptions::default()).await.unwrap();

    client.send(&b"\x05hello"[..]).unwrap();

    eventually("server muxer closed", || server.status() == MuxerStatus::Closed).await;
    assert_eq!(child.status(), StreamStatus::Aborted);
    assert_eq!(server.connection().status(), StreamStatus::Aborted);
}

#[tokio::test]
async fn oversized_input_aborts_the_receiving_muxer() {
    let (a, b) = stream_pair(StreamConfig::default(), QueueConfig::default());
    let client = MockMuxer::start(a);
    let server = MockMuxer::start_with_config(
        b,
        MockMuxerConfig {
            max_input_buffer: 8,
            ..MockMuxerConfig::default()
        },
    );

    client.create_stream(CreateStreamOptions::default()).await.unwrap();

    eventually("server muxer closed", || server.status() == MuxerStatus::Closed).await;
    assert_eq!(server.connection().status(), StreamStatus::Aborted);
}

#[tokio::test]
async fn graceful_close_reaches_the_remote_end() {
    let (client, server) = muxers(QueueConfig::default(), MockMuxerConfig::default());
    let stream = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    let inbound = next_stream(&server).await;
    let reader = inbound.reader();

    stream.send("last words").unwrap();
    client.close(None).await.expect("close should succeed");

    assert_eq!(client.status(), MuxerStatus::Closed);
    assert_eq!(stream.status(), StreamStatus::Closed);

    let received: Vec<u8> = reader
        .map(|chunk| chunk.expect("chunk should be data"))
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(received, b"last words");
}

#[tokio::test(start_paused = true)]
async fn connection_backpressure_reaches_children() {
    let (client, server) = muxers(
        QueueConfig {
            delay: Some(Duration::from_millis(1)),
            capacity: 2,
            chunk_size: 64,
        },
        MockMuxerConfig {
            max_message_size: 16,
            ..MockMuxerConfig::default()
        },
    );
    let stream = client.create_stream(CreateStreamOptions::default()).await.unwrap();
    let inbound = next_stream(&server).await;
    let reader = inbound.reader();

    let mut expected = Vec::new();
    let mut saw_backpressure = false;
    for i in 0..40u8 {
        let chunk = vec![i; usize::from(i % 23) + 1];
        expected.extend_from_slice(&chunk);
        if !stream.send(chunk).unwrap() {
            saw_backpressure = true;
            stream.wait_drain(None).await.expect("drain should arrive");
        }
    }
    stream.close_write(None).await.unwrap();
    assert!(saw_backpressure);

    let received: Vec<u8> = reader
        .map(|chunk| chunk.expect("chunk should be data"))
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(received, expected);
}
