//! Status page served over raw TCP sockets.
//!
//! GET / renders the SIM diagnostics, the recent event log and an open
//! button; POST /open signals the orchestrator.

use core::fmt::Write as FmtWrite;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::Duration;
use embedded_io_async::Write;
use heapless::String as HString;

use crate::control::{web_logs, GATE_REQUEST};
use crate::{health, modem, net, request, storage};

const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[embassy_executor::task]
pub async fn server_task(stack: Stack<'static>) {
    let mut rx_buf = [0u8; 1024];
    let mut tx_buf = [0u8; 2048];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(IO_TIMEOUT));

        if socket.accept(80).await.is_err() {
            socket.abort();
            continue;
        }

        handle_request(&mut socket).await;
        socket.abort();
    }
}

async fn handle_request(socket: &mut TcpSocket<'_>) {
    // Read request
    let mut request_buf = [0u8; 512];
    let n = match socket.read(&mut request_buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };

    let request = match core::str::from_utf8(&request_buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };

    // Route request
    match request::request_parts(request) {
        ("GET", "/") => handle_index(socket).await,
        ("POST", "/open") => handle_open(socket).await,
        ("POST", "/debug") => handle_debug(socket).await,
        ("POST", "/raw") => handle_raw(socket, &request_buf[..n]).await,
        _ => send_response(socket, 404, "Not Found", "text/plain", "Not Found").await,
    }
}

/// Toggle passive listen mode: modem lines are echoed to the log and the
/// health monitor stands down.
async fn handle_debug(socket: &mut TcpSocket<'_>) {
    let enabled = !modem::debug_mode();
    modem::set_debug_mode(enabled);
    let body = if enabled {
        "<p>Debug mode on</p>"
    } else {
        "<p>Debug mode off</p>"
    };
    send_response(socket, 200, "OK", "text/html", body).await;
}

/// Inject one raw AT command. The response surfaces in the log, not here.
async fn handle_raw(socket: &mut TcpSocket<'_>, initial: &[u8]) {
    let mut buf = [0u8; 512];
    let mut len = initial.len().min(buf.len());
    buf[..len].copy_from_slice(&initial[..len]);

    // Headers and body can arrive in separate segments
    while request::post_body(&buf[..len]).is_none() && len < buf.len() {
        match socket.read(&mut buf[len..]).await {
            Ok(n) if n > 0 => len += n,
            _ => break,
        }
    }

    let Some(command) = request::post_body(&buf[..len]) else {
        send_response(socket, 400, "Bad Request", "text/plain", "empty command").await;
        return;
    };
    modem::send_raw(command).await;
    send_response(socket, 200, "OK", "text/html", "<p>Command sent</p>").await;
}

async fn handle_index(socket: &mut TcpSocket<'_>) {
    let snapshot = health::snapshot();
    let settings = storage::settings();

    let mut body: HString<1536> = HString::new();
    let _ = write!(
        body,
        "<h1>Gate opener</h1>\
         <p>WiFi: {}</p>\
         <p>SIM: {}</p>\
         <p>Network: {}</p>\
         <p>Signal: {} ({})</p>\
         <p>Modem: {}</p>\
         <p>Allowed callers: {}</p>\
         <form action=/open method=post>\
         <button>Open gate</button></form>\
         <h2>Log</h2><pre>",
        if net::is_connected() { "up" } else { "down" },
        field(snapshot.pin_status.as_deref()),
        field(snapshot.network.as_deref()),
        field(snapshot.signal.as_deref()),
        snapshot
            .signal_friendly
            .map(|s| s.as_str())
            .unwrap_or("unknown"),
        field(snapshot.product.as_deref()),
        settings.allowed.len()
    );

    for (secs, line) in web_logs() {
        let _ = write!(body, "{}s {}\n", secs, line);
    }
    let _ = body.push_str("</pre>");

    send_response(socket, 200, "OK", "text/html", body.as_str()).await;
}

async fn handle_open(socket: &mut TcpSocket<'_>) {
    GATE_REQUEST.signal(());
    send_response(socket, 200, "OK", "text/html", "<p>Opening gate</p>").await;
}

fn field(value: Option<&str>) -> &str {
    value.unwrap_or("(unknown)")
}

async fn send_response(
    socket: &mut TcpSocket<'_>,
    status: u16,
    status_text: &str,
    content_type: &str,
    body: &str,
) {
    let mut response: HString<2048> = HString::new();
    let _ = write!(
        response,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    );

    let _ = socket.write_all(response.as_bytes()).await;
}
