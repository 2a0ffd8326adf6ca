use integration_tests::harness::{backend, next_port, route, start_gated_upstream, TestProxy};
use std::thread;
use std::time::Duration;

#[test]
fn queue_fills_then_sheds_then_drains_in_order() {
    // Arrange: one active slot, two queue slots, a backend that hangs until
    // released.
    let backend_port = next_port();
    let gate = start_gated_upstream(backend_port, "released");
    let proxy = TestProxy::start(vec![route(
        "q.local",
        vec![backend("b1", backend_port)],
        1,
        2,
    )]);

    // Act: three requests occupy the active slot and both queue slots.
    let mut workers = vec![];
    for _ in 0..3 {
        let url = proxy.proxy_url();
        workers.push(thread::spawn(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap();
            let response = client
                .get(format!("{url}/"))
                .header("Host", "q.local")
                .send()
                .expect("queued request failed");
            (response.status().as_u16(), response.text().unwrap())
        }));
        // Give each request time to reach its admission decision.
        thread::sleep(Duration::from_millis(250));
    }

    // A fourth request finds both budgets exhausted.
    let shed = proxy.get("/", "q.local");
    assert_eq!(shed.status().as_u16(), 503);
    assert_eq!(shed.headers().get("Retry-After").unwrap(), "10");
    assert_eq!(shed.text().unwrap(), "Server Busy");

    // Unblock the backend: the active request completes and the two queued
    // ones are pumped after it.
    gate.open();
    for worker in workers {
        let (status, body) = worker.join().unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "released");
    }

    // Assert: three served, one shed.
    let stats = proxy.wait_for_stats(
        "q.local",
        |s| s["requestsActive"] == 0 && s["requestsTotal"] == 3,
        Duration::from_secs(10),
    );
    assert_eq!(stats["errorsTotal"], 1);
}

#[test]
fn requests_beyond_max_active_wait_instead_of_failing() {
    // Arrange: single slot, generous queue.
    let backend_port = next_port();
    let gate = start_gated_upstream(backend_port, "eventually");
    let proxy = TestProxy::start(vec![route(
        "w.local",
        vec![backend("b1", backend_port)],
        1,
        8,
    )]);

    // Act
    let mut workers = vec![];
    for _ in 0..4 {
        let url = proxy.proxy_url();
        workers.push(thread::spawn(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap();
            client
                .get(format!("{url}/"))
                .header("Host", "w.local")
                .send()
                .expect("request failed")
                .status()
                .as_u16()
        }));
        thread::sleep(Duration::from_millis(100));
    }
    gate.open();

    // Assert: nobody was shed.
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 200);
    }
}
