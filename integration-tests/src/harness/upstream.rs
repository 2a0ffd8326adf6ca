use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Read the request head so the proxy's write completes cleanly.
fn read_request_head(stream: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
}

fn respond(stream: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Serve every connection immediately with a fixed body.
pub fn start_echo_upstream(port: u16, body: &'static str) {
    let addr = format!("127.0.0.1:{port}");

    thread::spawn(move || {
        let listener = TcpListener::bind(&addr).expect("failed to bind upstream");
        for stream in listener.incoming() {
            let mut stream = stream.expect("stream error");
            thread::spawn(move || {
                read_request_head(&mut stream);
                respond(&mut stream, body);
            });
        }
    });

    // tiny delay so the listener is actually ready
    thread::sleep(Duration::from_millis(25));
}

/// Serve every connection after a fixed delay.
pub fn start_delayed_upstream(port: u16, delay: Duration, body: &'static str) {
    let addr = format!("127.0.0.1:{port}");

    thread::spawn(move || {
        let listener = TcpListener::bind(&addr).expect("failed to bind upstream");
        for stream in listener.incoming() {
            let mut stream = stream.expect("stream error");
            thread::spawn(move || {
                read_request_head(&mut stream);
                thread::sleep(delay);
                respond(&mut stream, body);
            });
        }
    });

    thread::sleep(Duration::from_millis(25));
}

/// A backend that refuses every connection: the port is bound once to
/// prove it is free, then released, so connects fail with ECONNREFUSED
/// until something else (e.g. a revived upstream) claims it.
pub fn start_refusing_upstream(port: u16) {
    let listener =
        TcpListener::bind(("127.0.0.1", port)).expect("failed to reserve refusing upstream port");
    drop(listener);
}

/// Lets a test hold every in-flight request until it calls `open`.
#[derive(Clone)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.state;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}

/// Serve connections only once the returned gate is opened; until then
/// every request hangs.
pub fn start_gated_upstream(port: u16, body: &'static str) -> Gate {
    let addr = format!("127.0.0.1:{port}");
    let gate = Gate {
        state: Arc::new((Mutex::new(false), Condvar::new())),
    };
    let accept_state = gate.state.clone();

    thread::spawn(move || {
        let listener = TcpListener::bind(&addr).expect("failed to bind upstream");
        for stream in listener.incoming() {
            let mut stream = stream.expect("stream error");
            let state = accept_state.clone();
            thread::spawn(move || {
                read_request_head(&mut stream);
                let (lock, cvar) = &*state;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
                drop(open);
                respond(&mut stream, body);
            });
        }
    });

    thread::sleep(Duration::from_millis(25));
    gate
}
