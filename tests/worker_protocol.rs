use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};
use weather_mcp::{
    schema::JSONRPCMessage,
    testutils::{connected_client_and_worker, make_duplex_pair, read_message},
    Arguments, Error, ErrorKind, GenericDuplex, OperationDescriptor, ParamType, Parameter,
    Registry, RpcClient, StreamTransport,
};

fn registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry
        .register(
            OperationDescriptor::new("echo", "Echo a message")
                .with_parameter(Parameter::required("message", ParamType::String))
                .with_parameter(Parameter::optional("repeat", ParamType::Integer).with_default(1)),
            |args: Arguments| async move {
                let message = args.get_string("message").unwrap_or_default();
                let repeat = args.get_i64("repeat").unwrap_or(1) as usize;
                Ok::<_, Error>(json!({ "echo": message.repeat(repeat) }))
            },
        )
        .unwrap();
    registry
        .register(
            OperationDescriptor::new("sleep", "Sleep for a number of milliseconds")
                .with_parameter(Parameter::required("ms", ParamType::Integer)),
            |args: Arguments| async move {
                let ms = args.get_i64("ms").unwrap_or(0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, Error>(json!({ "slept": ms }))
            },
        )
        .unwrap();
    registry
        .register(
            OperationDescriptor::new("lookup", "Always fails like a missing place"),
            |_args: Arguments| async move {
                Err::<Value, _>(Error::LocationNotFound("Atlantis".into()))
            },
        )
        .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn test_discovery_preserves_descriptors() {
    let (client, worker) = connected_client_and_worker(registry()).await.unwrap();

    let tools = client.list_tools().await.unwrap();
    let descriptors: Vec<_> = tools
        .tools
        .iter()
        .map(OperationDescriptor::from_tool)
        .collect();
    assert_eq!(descriptors, registry().describe_all());

    client.ping().await.unwrap();
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_call_applies_defaults() {
    let (client, worker) = connected_client_and_worker(registry()).await.unwrap();

    let value = client
        .call_tool("echo", Arguments::new().set("message", "hi"))
        .await
        .unwrap();
    assert_eq!(value, json!({"echo": "hi"}));

    let value = client
        .call_tool(
            "echo",
            Arguments::new().set("message", "hi").set("repeat", 3.0),
        )
        .await
        .unwrap();
    assert_eq!(value, json!({"echo": "hihihi"}));

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_kinds_cross_the_boundary() {
    let (client, worker) = connected_client_and_worker(registry()).await.unwrap();

    let err = client
        .call_tool("nope", Arguments::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOperation);

    let err = client
        .call_tool("echo", Arguments::new().set("message", 5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("message"));

    let err = client
        .call_tool("lookup", Arguments::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.status_code(), 404);
    assert!(err.to_string().contains("Atlantis"));

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_pipelined_calls_are_matched_by_id() {
    let (client, worker) = connected_client_and_worker(registry()).await.unwrap();

    // The worker handles requests in order, but each response must reach
    // the call that issued it.
    let (slow, fast) = tokio::join!(
        client.call_tool("sleep", Arguments::new().set("ms", 50)),
        client.call_tool("echo", Arguments::new().set("message", "quick")),
    );
    assert_eq!(slow.unwrap(), json!({"slept": 50}));
    assert_eq!(fast.unwrap(), json!({"echo": "quick"}));

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_exit_fails_in_flight_call() {
    let (client, worker) = connected_client_and_worker(registry()).await.unwrap();

    let (result, _) = tokio::join!(
        client.call_tool("sleep", Arguments::new().set("ms", 5_000)),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            worker.handle.abort();
        }
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(client.is_closed());

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_malformed_line_fails_pending_call() {
    let (peer_reader, mut peer_writer, client_reader, client_writer) = make_duplex_pair();
    let client = RpcClient::connect(Box::new(StreamTransport::new(GenericDuplex::new(
        client_reader,
        client_writer,
    ))))
    .await
    .unwrap();
    let mut peer_reader = BufReader::new(peer_reader);

    let (result, _) = tokio::join!(client.ping(), async {
        match read_message(&mut peer_reader).await.unwrap() {
            JSONRPCMessage::Request(request) => assert_eq!(request.request.method, "ping"),
            other => panic!("expected request, got {other:?}"),
        }
        peer_writer.write_all(b"this is not json\n").await.unwrap();
        peer_writer.flush().await.unwrap();
    });

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(err.to_string().contains("malformed"));
}
