use reqwest::blocking::{Client, Response};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use switchyard_core::conf::{BootstrapConfig, RouteConfig, ServerConfig};
use switchyard_core::server::{build_server, ProxyServer};

/// Global port allocator; every listener and upstream in a test binary gets
/// its own port.
static NEXT_PORT: AtomicU16 = AtomicU16::new(23_000);

pub fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Handle to a running Switchyard test instance.
pub struct TestProxy {
    proxy_port: u16,
    api_port: u16,
    client: Client,
}

impl TestProxy {
    /// Start an instance with dynamically allocated ports and the given
    /// routes. Parallel-safe within one test binary.
    pub fn start(routes: Vec<RouteConfig>) -> Self {
        let config = BootstrapConfig {
            server: ServerConfig {
                port: next_port(),
                ssl_port: None,
                api_port: next_port(),
            },
            routes,
        };
        Self::start_with(config)
    }

    pub fn start_with(config: BootstrapConfig) -> Self {
        let proxy_port = config.server.port;
        let api_port = config.server.api_port;

        let built = build_server(config).expect("failed to build switchyard server");

        // Run server in background thread
        thread::spawn(move || {
            let ProxyServer {
                server,
                probe_rt: _probe_rt,
                ..
            } = built;
            server.run_forever();
        });

        wait_for_port(proxy_port);
        wait_for_port(api_port);

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build client");

        Self {
            proxy_port,
            api_port,
            client,
        }
    }

    pub fn proxy_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.proxy_port)
    }

    /// GET through the data plane under the given vHost.
    pub fn get(&self, path: &str, host: &str) -> Response {
        self.client
            .get(format!("{}{}", self.proxy_url(), path))
            .header("Host", host)
            .send()
            .expect("proxy request failed")
    }

    fn api_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/api/v1{}", self.api_port, path)
    }

    pub fn api_get(&self, path: &str) -> Response {
        self.client
            .get(self.api_url(path))
            .send()
            .expect("api request failed")
    }

    pub fn api_post(&self, path: &str, body: &serde_json::Value) -> Response {
        self.client
            .post(self.api_url(path))
            .json(body)
            .send()
            .expect("api request failed")
    }

    pub fn api_delete(&self, path: &str) -> Response {
        self.client
            .delete(self.api_url(path))
            .send()
            .expect("api request failed")
    }

    /// Poll the stats API until the predicate holds (finalize is
    /// asynchronous with respect to the client seeing the response).
    pub fn wait_for_stats<F>(&self, vhost: &str, predicate: F, deadline: Duration) -> serde_json::Value
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let end = Instant::now() + deadline;
        loop {
            let response = self.api_get(&format!("/stats/{vhost}"));
            if response.status().as_u16() == 200 {
                let stats: serde_json::Value = response.json().expect("stats must be JSON");
                if predicate(&stats) {
                    return stats;
                }
                if Instant::now() > end {
                    panic!("stats predicate never held for {vhost}; last: {stats}");
                }
            } else if Instant::now() > end {
                panic!("no stats entry for {vhost}");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Send raw bytes to the data plane and return the raw response. Used
    /// for requests a well-behaved client cannot produce.
    pub fn raw_request(&self, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", self.proxy_port))
            .expect("failed to connect to proxy");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("failed to set read timeout");
        stream
            .write_all(request.as_bytes())
            .expect("failed to write raw request");

        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }
}

/// Poll until the server accepts connections (or panic).
fn wait_for_port(port: u16) {
    let deadline = Instant::now() + Duration::from_secs(2);

    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(_) => return,
            Err(_) => {
                if Instant::now() > deadline {
                    panic!("server failed to start on port {port}");
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}
