//! Unit tests for the HTTP request parser.

#[path = "../src/request.rs"]
mod request;

use request::{post_body, request_parts};

#[test]
fn request_line_yields_method_and_path() {
    let raw = "GET / HTTP/1.1\r\nHost: gate\r\n\r\n";
    assert_eq!(request_parts(raw), ("GET", "/"));

    let raw = "POST /open HTTP/1.1\r\n\r\n";
    assert_eq!(request_parts(raw), ("POST", "/open"));
}

#[test]
fn query_string_is_stripped_from_the_path() {
    let raw = "GET /?refresh=1 HTTP/1.1\r\n\r\n";
    assert_eq!(request_parts(raw), ("GET", "/"));
}

#[test]
fn garbage_request_line_yields_empty_parts() {
    assert_eq!(request_parts(""), ("", ""));
    assert_eq!(request_parts("nonsense"), ("nonsense", ""));
}

#[test]
fn body_is_extracted_after_the_header_separator() {
    let raw = b"POST /raw HTTP/1.1\r\nContent-Length: 7\r\n\r\nAT+CSQ\n";
    assert_eq!(post_body(raw), Some("AT+CSQ"));
}

#[test]
fn headers_without_a_body_are_not_a_command() {
    // A client may send headers and body in separate segments; the
    // header-only prefix must read as incomplete, not as an empty command.
    let raw = b"POST /raw HTTP/1.1\r\nContent-Length: 7\r\n";
    assert_eq!(post_body(raw), None);

    let raw = b"POST /raw HTTP/1.1\r\nContent-Length: 7\r\n\r\n";
    assert_eq!(post_body(raw), None);

    // Once the body segment lands, the same buffer parses
    let raw = b"POST /raw HTTP/1.1\r\nContent-Length: 7\r\n\r\nAT+CSQ\n";
    assert_eq!(post_body(raw), Some("AT+CSQ"));
}

#[test]
fn invalid_utf8_is_rejected() {
    assert_eq!(post_body(b"POST /raw HTTP/1.1\r\n\r\n\xff\xfe"), None);
}
