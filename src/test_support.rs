//! In-process HTTP fixtures for the search and download tests.

use std::collections::VecDeque;
use std::io::Write;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use tiny_http::{Header, Response, Server};

pub type Seen = Arc<Mutex<Vec<String>>>;

fn bind() -> (Server, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Server::from_listener(listener, None).unwrap();
    (server, format!("http://127.0.0.1:{port}"))
}

/// Serves `status`/`body` as JSON to every request.
pub fn serve_json(status: u16, body: &'static str) -> (String, Seen) {
    let (server, base) = bind();
    let seen = Seen::default();
    let seen_clone = seen.clone();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            seen_clone.lock().unwrap().push(request.url().to_string());
            let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
            let response = Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });
    (base, seen)
}

/// Answers requests with the scripted pairs in order, repeating the last one
/// once the script runs out.
pub fn scripted_server(script: Vec<(u16, &'static [u8])>) -> (String, Seen) {
    let (server, base) = bind();
    let seen = Seen::default();
    let seen_clone = seen.clone();
    let mut script: VecDeque<_> = script.into();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            seen_clone.lock().unwrap().push(request.url().to_string());
            let (status, body) = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().unwrap()
            };
            let _ = request.respond(Response::from_data(body).with_status_code(status));
        }
    });
    (base, seen)
}

/// Serves fixed answers per path; unknown paths get 404.
pub fn routed_server(routes: Vec<(&'static str, u16, &'static [u8])>) -> (String, Seen) {
    let (server, base) = bind();
    let seen = Seen::default();
    let seen_clone = seen.clone();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            seen_clone.lock().unwrap().push(url.clone());
            let path = url.split('?').next().unwrap_or("/");
            let response = match routes.iter().find(|(p, _, _)| *p == path) {
                Some((_, status, body)) => Response::from_data(*body).with_status_code(*status),
                None => Response::from_data(&b""[..]).with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    (base, seen)
}

/// A base URL nothing listens on.
pub fn dead_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Sends headers announcing 100 bytes, five bytes of body, then holds every
/// connection open without writing more.
pub fn stalled_server() -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Seen::default();
    let seen_clone = seen.clone();
    thread::spawn(move || {
        let mut open = Vec::new();
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            seen_clone.lock().unwrap().push("stalled".to_string());
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabcde");
            let _ = stream.flush();
            open.push(stream);
        }
    });
    (format!("http://127.0.0.1:{port}"), seen)
}
