use std::fs;

use wicket::http::headers::HeaderMap;
use wicket::http::response::{Response, StatusCode};
use wicket::http::writer::{FILE_CHUNK_SIZE, ResponseWriter, ServerInfo, serialize_head};

fn info() -> ServerInfo {
    ServerInfo {
        name: "Wicket".to_string(),
        version: "0.1.0".to_string(),
        virtual_path: "/app".to_string(),
    }
}

/// Splits raw response bytes into the head text and the body.
fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head terminator");
    (
        String::from_utf8_lossy(&raw[..end + 4]).into_owned(),
        raw[end + 4..].to_vec(),
    )
}

#[test]
fn test_serialize_head_layout() {
    let mut extra = HeaderMap::new();
    extra.insert("Content-Type", "text/plain");
    extra.insert("Content-Length", "999");

    let head = String::from_utf8(serialize_head(StatusCode::Found, Some(&extra), Some(3), false, &info())).unwrap();
    let lines: Vec<&str> = head.split("\r\n").collect();

    assert_eq!(lines[0], "HTTP/1.1 302 Found");
    assert_eq!(lines[1], "Server: Wicket/0.1.0");
    assert!(lines[2].starts_with("Date: ") && lines[2].ends_with(" GMT"));
    assert_eq!(lines[3], "Content-Length: 3");
    assert_eq!(lines[4], "Content-Type: text/plain");
    assert_eq!(lines[5], "Connection: close");
    assert!(head.ends_with("\r\n\r\n"));
    assert!(!head.contains("999"));
}

#[tokio::test]
async fn test_write_full_keep_alive() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    assert!(resp.write_full(StatusCode::Ok, None, "hello", true).await);
    assert!(resp.keep_alive());
    assert!(resp.headers_sent());

    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
    assert!(!head.contains("Connection: close"));
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn test_write_full_close() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.write_full(StatusCode::Ok, None, "hello", false).await;
    assert!(resp.is_closed());
    assert!(!resp.keep_alive());

    let (head, _) = split_response(&out);
    assert!(head.contains("Content-Length: 5\r\n"));
    assert!(head.contains("Connection: close\r\n"));
}

#[tokio::test]
async fn test_write_response_value() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    let response = Response::redirect("/docs/", "moved");
    resp.write_response(&response, true).await;

    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(head.contains("Location: /docs/\r\n"));
    assert_eq!(body, b"moved");
}

#[tokio::test]
async fn test_interim_continue_does_not_start_response() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    assert!(resp.write_interim_continue().await);
    assert!(!resp.headers_sent());
    resp.write_full(StatusCode::Ok, None, "done", true).await;

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 100 Continue\r\nServer: Wicket/0.1.0\r\nDate: "));
    let second = text.find("HTTP/1.1 200 OK").unwrap();
    assert!(!text[..second].contains("Content-Length"));
}

#[tokio::test]
async fn test_large_file_streams_in_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.html");
    let data: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &data).unwrap();

    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    assert!(resp.write_from_file(&path, true).await);
    assert_eq!(resp.body_writes(), (200 * 1024usize).div_ceil(FILE_CHUNK_SIZE));
    assert_eq!(resp.body_writes(), 4);
    assert!(resp.keep_alive());

    let (head, body) = split_response(&out);
    assert!(head.contains("Content-Length: 204800\r\n"));
    assert!(head.contains("Content-Type: text/html\r\n"));
    assert_eq!(body.len(), data.len());
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_missing_file_is_404_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.write_from_file(&dir.path().join("nope.htm"), true).await;
    assert!(resp.is_closed());

    let (head, _) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(head.contains("Connection: close\r\n"));
}

#[tokio::test]
async fn test_unlisted_extension_is_403() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.config");
    fs::write(&path, "secret").unwrap();

    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.write_from_file(&path, true).await;

    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(!String::from_utf8_lossy(&body).contains("secret"));
}

#[tokio::test]
async fn test_headers_only_is_idempotent() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    let mut extra = HeaderMap::new();
    extra.insert("Content-Type", "text/plain");

    assert!(resp.write_headers_only(StatusCode::Ok, Some(&extra)).await);
    assert!(resp.write_headers_only(StatusCode::NotFound, None).await);
    assert!(resp.write_body_chunk(b"abc").await);
    assert!(resp.write_body_chunk(b"def").await);
    assert_eq!(resp.body_writes(), 2);
    // No length was declared, so the body ends with the connection.
    assert!(!resp.keep_alive());

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("HTTP/1.1").count(), 1);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("\r\n\r\nabcdef"));
}

#[tokio::test]
async fn test_body_chunk_sends_head_first() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.set_status(StatusCode::Created);
    resp.append_header("Content-Length", "2");
    resp.write_body_chunk(b"ok").await;
    assert!(resp.keep_alive());

    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 201 Created\r\n"));
    assert!(head.contains("Content-Length: 2\r\n"));
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_error_page_embeds_diagnostic_as_comment() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.write_error(StatusCode::NotFound, Some("lookup failed -- no file"))
        .await;
    assert!(resp.is_closed());

    let (head, body) = split_response(&out);
    let body = String::from_utf8(body).unwrap();
    assert!(head.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(body.contains("Server Error in '/app' Application."));
    assert!(body.contains("HTTP Error 404 - Not Found."));
    assert!(body.contains("<!--\r\nlookup failed - - no file\r\n-->"));
}

#[tokio::test]
async fn test_error_page_without_diagnostic_has_no_comment() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.write_error(StatusCode::BadRequest, None).await;

    let (_, body) = split_response(&out);
    assert!(!String::from_utf8(body).unwrap().contains("<!--"));
}

#[tokio::test]
async fn test_buffered_flush_declares_length() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.set_status(StatusCode::Ok);
    resp.append_header("Content-Type", "text/plain");
    resp.send_body("hello ");
    resp.send_body("world");
    assert!(resp.flush(true).await);
    assert!(resp.keep_alive());

    resp.append_header("X-Late", "ignored");
    resp.set_status(StatusCode::NotFound);
    assert_eq!(resp.status(), StatusCode::Ok);

    let (head, body) = split_response(&out);
    assert!(head.contains("Content-Length: 11\r\n"));
    assert!(!head.contains("X-Late"));
    assert_eq!(body, b"hello world");
}

#[tokio::test]
async fn test_partial_flush_closes_connection() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.send_body("part one, ");
    resp.flush(false).await;
    resp.send_body("part two");
    resp.flush(true).await;
    assert!(resp.is_closed());

    let (head, body) = split_response(&out);
    assert!(!head.contains("Content-Length"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, b"part one, part two");
}

#[tokio::test]
async fn test_send_file_flushes_between_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let data = vec![7u8; FILE_CHUNK_SIZE * 2 + 10];
    fs::write(&path, &data).unwrap();

    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.send_file(&path).await.unwrap();
    // The first two blocks were flushed; the last waits for the final flush.
    assert_eq!(resp.body_writes(), 2);
    resp.flush(true).await;
    assert_eq!(resp.body_writes(), 3);
    assert!(resp.keep_alive());

    let (head, body) = split_response(&out);
    assert!(head.contains(&format!("Content-Length: {}\r\n", data.len())));
    assert_eq!(body.len(), data.len());
}

#[tokio::test]
async fn test_disable_keep_alive_before_flush() {
    let info = info();
    let mut out = Vec::new();
    let mut resp = ResponseWriter::new(&mut out, &info, true);

    resp.send_body("bye");
    resp.disable_keep_alive();
    assert!(resp.flush(true).await);
    assert!(resp.is_closed());

    let (head, body) = split_response(&out);
    assert!(head.contains("Content-Length: 3\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, b"bye");
}
