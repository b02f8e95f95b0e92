//! End-to-end translation against loopback gRPC servers

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use common::{collect, grpc_message, read_body, reply, start_http1_server, unused_addr, GrpcServer};
use grpcweb_core::{parse_trailer_frame, TRAILER_FLAG};
use grpcweb_proxy::{Dispatch, GrpcWebProxy, ProxyBody, Target};
use h2::server::SendResponse;
use h2::{Reason, RecvStream};
use http::{Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::{Full, StreamBody};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

async fn call<B>(proxy: &GrpcWebProxy, req: Request<B>) -> Response<ProxyBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    match proxy.dispatch(req).await {
        Dispatch::Handled(response) => response,
        Dispatch::PassThrough(req) => panic!("{} {} was passed through", req.method(), req.uri()),
    }
}

fn grpc_web_request(content_type: &str, body: Bytes) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri("/grpc.testing.TestService/UnaryCall")
        .header("content-type", content_type)
        .header("x-grpc-web", "1")
        .body(Full::new(body))
        .unwrap()
}

async fn three_chunk_server() -> GrpcServer {
    GrpcServer::start(|req, respond| async move {
        let mut body = req.into_body();
        read_body(&mut body).await;
        reply(
            respond,
            vec![grpc_message(b"one"), grpc_message(b"two"), grpc_message(b"three")],
            "0",
            "OK",
        );
    })
    .await
}

#[tokio::test]
async fn test_unreachable_server_is_503() {
    let addr = unused_addr().await;
    let proxy = GrpcWebProxy::new(format!("http://{}", addr)).unwrap();

    for content_type in [
        "application/grpc-web",
        "application/grpc-web+proto",
        "application/grpc-web-text",
        "application/grpc-web-text+proto",
    ] {
        let response = call(&proxy, grpc_web_request(content_type, Bytes::new())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", content_type);
        let collected = collect(response.into_body()).await;
        assert!(collected.bytes().is_empty());
    }
}

#[tokio::test]
async fn test_plain_http_server_is_502() {
    let addr = start_http1_server().await;
    let proxy = GrpcWebProxy::new(addr.to_string()).unwrap();

    let response = call(
        &proxy,
        grpc_web_request("application/grpc-web+proto", grpc_message(b"hi")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_non_grpc_web_requests_pass_through() {
    let server = three_chunk_server().await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    for method in ["GET", "PUT", "PATCH", "DELETE"] {
        let req = Request::builder()
            .method(method)
            .uri("/")
            .header("content-type", "application/grpc-web")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(matches!(proxy.dispatch(req).await, Dispatch::PassThrough(_)));
    }

    let req = grpc_web_request("application/json", Bytes::new());
    assert!(matches!(proxy.dispatch(req).await, Dispatch::PassThrough(_)));
}

#[tokio::test]
async fn test_binary_streaming_response() {
    let server = three_chunk_server().await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let response = call(
        &proxy,
        grpc_web_request("application/grpc-web+proto", grpc_message(b"ping")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/grpc-web+proto");
    assert_eq!(response.headers()["x-served-by"], "loopback");

    let collected = collect(response.into_body()).await;
    assert!(collected.error.is_none());

    let trailer_frame = collected.chunks.last().unwrap();
    assert_eq!(trailer_frame[0], TRAILER_FLAG);
    let trailers = parse_trailer_frame(trailer_frame).unwrap();
    assert!(trailers.contains(&("grpc-status".to_string(), "0".to_string())));
    assert!(trailers.contains(&("grpc-message".to_string(), "OK".to_string())));

    let body = collected.bytes();
    let messages = body.slice(..body.len() - trailer_frame.len());
    let mut expected = Vec::new();
    for payload in [&b"one"[..], b"two", b"three"] {
        expected.extend_from_slice(&grpc_message(payload));
    }
    assert_eq!(&messages[..], &expected[..]);

    assert!(server.wait_closed(1).await, "session was not closed");
}

#[tokio::test]
async fn test_text_mode_round_trip() {
    let server = GrpcServer::start(|req, respond| async move {
        let mut body = req.into_body();
        let echoed = read_body(&mut body).await;
        reply(respond, vec![echoed], "0", "");
    })
    .await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let message = grpc_message(b"hello over text");
    let encoded = Bytes::from(STANDARD.encode(&message));
    let response = call(&proxy, grpc_web_request("application/grpc-web-text", encoded)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/grpc-web-text");

    let collected = collect(response.into_body()).await;
    assert!(collected.error.is_none());
    let decoded = STANDARD.decode(collected.bytes()).unwrap();

    assert_eq!(&decoded[..message.len()], &message[..]);
    let trailers = parse_trailer_frame(&decoded[message.len()..]).unwrap();
    assert_eq!(trailers[0], ("grpc-status".to_string(), "0".to_string()));
}

#[tokio::test]
async fn test_request_headers_and_path_forwarded() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let server = GrpcServer::start(move |req, respond| {
        let seen_tx = seen_tx.clone();
        async move {
            let (parts, mut body) = req.into_parts();
            let payload = read_body(&mut body).await;
            let _ = seen_tx.send((parts, payload));
            reply(respond, vec![], "0", "");
        }
    })
    .await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/grpc.testing.TestService/UnaryCall?debug=1")
        .header("content-type", "application/grpc-web+proto")
        .header("x-grpc-web", "1")
        .header("x-user-agent", "grpc-web-javascript/0.1")
        .header("origin", "http://localhost:3000")
        .header("authorization", "Bearer token")
        .header("x-custom", "kept")
        .body(Full::new(grpc_message(b"payload")))
        .unwrap();
    let response = call(&proxy, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    collect(response.into_body()).await;

    let (parts, payload) = seen_rx.recv().await.unwrap();
    assert_eq!(parts.method, "POST");
    assert_eq!(parts.uri.path(), "/grpc.testing.TestService/UnaryCall");
    assert_eq!(parts.uri.query(), None);
    assert_eq!(parts.headers["content-type"], "application/grpc+proto");
    assert_eq!(parts.headers["authorization"], "Bearer token");
    assert_eq!(parts.headers["x-custom"], "kept");
    for dropped in ["x-grpc-web", "x-user-agent", "origin"] {
        assert!(parts.headers.get(dropped).is_none(), "{} was forwarded", dropped);
    }
    assert_eq!(payload, grpc_message(b"payload"));
}

#[tokio::test]
async fn test_dropped_response_closes_session() {
    let server = GrpcServer::start(|req, respond| async move {
        let mut body = req.into_body();
        read_body(&mut body).await;
        let mut respond = respond;
        let response = http::Response::builder()
            .header("content-type", "application/grpc")
            .body(())
            .unwrap();
        let mut stream = respond.send_response(response, false).unwrap();
        let _ = stream.send_data(grpc_message(b"first"), false);
        // Never finishes on its own
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
    .await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let response = call(&proxy, grpc_web_request("application/grpc-web", grpc_message(b"x"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.closed(), 0);

    drop(response);
    assert!(server.wait_closed(1).await, "session outlived its response");
}

#[tokio::test]
async fn test_reset_after_headers_aborts_body() {
    let server = GrpcServer::start(|req, respond| async move {
        let mut body = req.into_body();
        read_body(&mut body).await;
        let mut respond = respond;
        let response = http::Response::builder()
            .header("content-type", "application/grpc")
            .body(())
            .unwrap();
        let mut stream = respond.send_response(response, false).unwrap();
        let _ = stream.send_data(grpc_message(b"partial"), false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.send_reset(Reason::INTERNAL_ERROR);
    })
    .await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let response = call(&proxy, grpc_web_request("application/grpc-web", grpc_message(b"x"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let collected = collect(response.into_body()).await;
    assert!(collected.error.is_some(), "body should end abruptly");
    assert_eq!(collected.bytes(), grpc_message(b"partial"));
    assert!(collected.chunks.iter().all(|c| c[0] != TRAILER_FLAG));
}

#[tokio::test]
async fn test_reset_before_headers_is_502() {
    let server = GrpcServer::start(|req, mut respond| async move {
        let mut body = req.into_body();
        read_body(&mut body).await;
        respond.send_reset(Reason::REFUSED_STREAM);
    })
    .await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let response = call(&proxy, grpc_web_request("application/grpc-web", grpc_message(b"x"))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    collect(response.into_body()).await;
    assert!(server.wait_closed(1).await);
}

#[tokio::test]
async fn test_factory_target_is_used_per_request() {
    let server = three_chunk_server().await;
    let addr = server.addr;
    let opened = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let counter = opened.clone();
    let target = Target::factory(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let io = tokio::net::TcpStream::connect(addr)
                .await
                .map_err(|e| grpcweb_proxy::ProxyError::Connect(e.to_string()))?;
            grpcweb_proxy::DownstreamConnection::handshake(io, addr.to_string().parse().unwrap()).await
        }
    });
    let proxy = GrpcWebProxy::new(target).unwrap().with_buffer(1);

    for _ in 0..2 {
        let response = call(
            &proxy,
            grpc_web_request("application/grpc-web", grpc_message(b"x")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let collected = collect(response.into_body()).await;
        assert!(collected.error.is_none());
    }
    assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(server.wait_closed(2).await);
}

type FrameStream = tokio_stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, Infallible>>>;

/// Request body delivered as many separate data frames, sizes cycling
fn streamed_body(data: &[u8], sizes: &[usize]) -> StreamBody<FrameStream> {
    let mut frames = Vec::new();
    let mut rest = Bytes::copy_from_slice(data);
    for size in sizes.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let piece = rest.split_to((*size).min(rest.len()));
        frames.push(Ok(Frame::data(piece)));
    }
    StreamBody::new(tokio_stream::iter(frames))
}

/// Echo the request body back in `chunk`-sized data frames
async fn echo_in_chunks(req: Request<RecvStream>, respond: SendResponse<Bytes>, chunk: usize) {
    let mut body = req.into_body();
    let echoed = read_body(&mut body).await;
    let chunks = echoed.chunks(chunk).map(Bytes::copy_from_slice).collect();
    reply(respond, chunks, "0", "");
}

#[tokio::test]
async fn test_large_message_beyond_flow_control_window() {
    let server = GrpcServer::start(|req, respond| echo_in_chunks(req, respond, 16 * 1024)).await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    let payload: Vec<u8> = (0..3_000_000u32).map(|i| (i % 251) as u8).collect();
    let message = grpc_message(&payload);
    let req = Request::builder()
        .method("POST")
        .uri("/grpc.testing.TestService/StreamingCall")
        .header("content-type", "application/grpc-web")
        .body(streamed_body(&message, &[64 * 1024, 100_000, 7]))
        .unwrap();

    let response = call(&proxy, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let collected = collect(response.into_body()).await;
    assert!(collected.error.is_none());
    assert!(collected.chunks.len() > 100, "response was not streamed in pieces");

    let body = collected.bytes();
    assert!(body.len() > message.len());
    assert_eq!(&body[..message.len()], &message[..]);
    let trailers = parse_trailer_frame(&body[message.len()..]).unwrap();
    assert_eq!(
        trailers,
        vec![
            ("grpc-status".to_string(), "0".to_string()),
            ("grpc-message".to_string(), String::new()),
        ]
    );
    assert!(server.wait_closed(1).await);
}

#[tokio::test]
async fn test_text_request_in_uneven_frames() {
    let server = GrpcServer::start(|req, respond| echo_in_chunks(req, respond, 10)).await;
    let proxy = GrpcWebProxy::new(server.target()).unwrap();

    // Browsers encode each message separately, padding included
    let first = grpc_message(b"first message, padded");
    let second = grpc_message(b"and a second one after it");
    let mut text = STANDARD.encode(&first);
    text.push_str(&STANDARD.encode(&second));
    assert!(text[..text.len() - 4].contains('='));

    let req = Request::builder()
        .method("POST")
        .uri("/grpc.testing.TestService/StreamingCall")
        .header("content-type", "application/grpc-web-text+proto")
        .body(streamed_body(text.as_bytes(), &[1, 2, 3, 5, 7]))
        .unwrap();

    let response = call(&proxy, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/grpc-web-text+proto");

    let collected = collect(response.into_body()).await;
    assert!(collected.error.is_none());
    let decoded = STANDARD.decode(collected.bytes()).unwrap();

    let mut expected = first.to_vec();
    expected.extend_from_slice(&second);
    assert_eq!(&decoded[..expected.len()], &expected[..]);
    let trailers = parse_trailer_frame(&decoded[expected.len()..]).unwrap();
    assert_eq!(trailers[0], ("grpc-status".to_string(), "0".to_string()));
}
