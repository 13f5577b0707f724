//! Url carrier behavior against a loopback HTTP server, covering ranged
//! reads, seek/tell, full-body (200) fallbacks and missing sources.

use std::io::SeekFrom;
use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;

use filetide_core::{Error, PipelineData};

#[derive(Clone)]
struct FileState {
    body: Bytes,
    ranges: bool,
}

async fn file_handler(
    State(state): State<FileState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let len = state.body.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_single_range(value, len));

    let mut out = HeaderMap::new();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    out.insert(
        header::ACCEPT_RANGES,
        HeaderValue::from_static(if state.ranges { "bytes" } else { "none" }),
    );

    if !state.ranges || range.is_none() {
        out.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&len.to_string()).unwrap(),
        );
        if method == Method::HEAD {
            return (StatusCode::OK, out, Body::empty()).into_response();
        }
        return (StatusCode::OK, out, state.body.clone()).into_response();
    }

    let (start, end) = range.unwrap();
    let slice = state.body.slice(start as usize..(end + 1) as usize);
    out.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {start}-{end}/{len}")).unwrap(),
    );
    out.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&slice.len().to_string()).unwrap(),
    );
    if method == Method::HEAD {
        return (StatusCode::PARTIAL_CONTENT, out, Body::empty()).into_response();
    }
    (StatusCode::PARTIAL_CONTENT, out, slice).into_response()
}

fn parse_single_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let rest = header.trim().to_ascii_lowercase();
    let rest = rest.strip_prefix("bytes=")?.to_string();
    if rest.contains(',') || len == 0 {
        return None;
    }
    let (a, b) = rest.split_once('-')?;
    let last = len - 1;
    if a.is_empty() {
        let suffix: u64 = b.parse().ok()?;
        return Some((len.saturating_sub(suffix), last));
    }
    let start: u64 = a.parse().ok()?;
    if start >= len {
        return None;
    }
    if b.is_empty() {
        return Some((start, last));
    }
    let end: u64 = b.parse().ok()?;
    Some((start, end.min(last)))
}

async fn spawn_server(body: Bytes, ranges: bool) -> SocketAddr {
    let app = Router::new()
        .route("/file", get(file_handler))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        )
        .with_state(FileState { body, ranges });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn pattern_body(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn url_carrier(addr: SocketAddr, path: &str) -> PipelineData {
    let url = url::Url::parse(&format!("http://{addr}{path}")).expect("url");
    PipelineData::from_url(url, reqwest::Client::new())
}

#[tokio::test]
async fn ranged_reads_reassemble_the_whole_resource() {
    let body = pattern_body(200_000);
    let addr = spawn_server(body.clone(), true).await;

    for chunk_size in [1000usize, 65_536, 300_000] {
        let mut data = url_carrier(addr, "/file");
        let mut collected = Vec::new();
        loop {
            let chunk = data.read(chunk_size).await.expect("read");
            if chunk.is_empty() {
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, body);
    }
}

#[tokio::test]
async fn seek_then_read_returns_exactly_the_tail() {
    let body = pattern_body(100_000);
    let addr = spawn_server(body.clone(), true).await;
    let mut data = url_carrier(addr, "/file");

    let k = 40_000u64;
    assert_eq!(data.seek(SeekFrom::Start(k)).await.expect("seek"), k);
    assert_eq!(data.tell().expect("tell"), k);
    let rest = data.read_to_end().await.expect("tail");
    assert_eq!(rest.len() as u64, body.len() as u64 - k);
    assert_eq!(&rest[..], &body[k as usize..]);

    assert_eq!(
        data.seek(SeekFrom::End(-10)).await.expect("seek end"),
        body.len() as u64 - 10
    );
    assert_eq!(
        data.read_to_end().await.expect("suffix"),
        body.slice(body.len() - 10..)
    );
}

#[tokio::test]
async fn seeks_are_clamped_to_the_resource_length() {
    let body = pattern_body(1_000);
    let addr = spawn_server(body.clone(), true).await;
    let mut data = url_carrier(addr, "/file");

    let pos = data
        .seek(SeekFrom::Start(10_000_000))
        .await
        .expect("clamped seek");
    assert_eq!(pos, body.len() as u64);
    assert!(data.read(100).await.expect("read at end").is_empty());

    assert_eq!(data.seek(SeekFrom::End(-5_000_000)).await.expect("clamp"), 0);
}

#[tokio::test]
async fn short_forward_seeks_read_through_the_open_stream() {
    let body = pattern_body(50_000);
    let addr = spawn_server(body.clone(), true).await;
    let mut data = url_carrier(addr, "/file");

    assert_eq!(data.read(100).await.expect("read").len(), 100);
    assert_eq!(data.seek(SeekFrom::Current(500)).await.expect("seek"), 600);
    assert_eq!(data.read(10).await.expect("read"), body.slice(600..610));
}

#[tokio::test]
async fn servers_without_range_support_still_work() {
    let body = pattern_body(80_000);
    let addr = spawn_server(body.clone(), false).await;

    let mut data = url_carrier(addr, "/file");
    assert_eq!(data.read_to_end().await.expect("all"), body);

    // Seeking forces a fresh full-body response with a discarded prefix.
    let mut data = url_carrier(addr, "/file");
    data.seek(SeekFrom::Start(70_000)).await.expect("seek");
    assert_eq!(data.read_to_end().await.expect("tail"), body.slice(70_000..));
}

#[tokio::test]
async fn content_type_flows_into_carrier_metadata() {
    let addr = spawn_server(pattern_body(100), true).await;
    let mut data = url_carrier(addr, "/file");
    assert!(data.metadata().media_type.is_none());
    data.read(10).await.expect("read");
    assert_eq!(
        data.metadata().media_type.as_deref(),
        Some("application/zip")
    );
}

#[tokio::test]
async fn missing_sources_surface_as_not_found() {
    let addr = spawn_server(pattern_body(100), true).await;
    let mut data = url_carrier(addr, "/missing");
    assert!(matches!(
        data.read(10).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn read_zero_does_not_advance_the_cursor() {
    let addr = spawn_server(pattern_body(100), true).await;
    let mut data = url_carrier(addr, "/file");
    assert!(data.read(0).await.expect("read zero").is_empty());
    assert_eq!(data.tell().expect("tell"), 0);
}
