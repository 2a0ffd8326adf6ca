use integration_tests::harness::{backend, next_port, route, start_delayed_upstream, TestProxy};
use std::time::Duration;

#[test]
fn client_abort_finalizes_exactly_once() {
    // Arrange: the backend answers after 3 s; the client gives up at 300 ms.
    let backend_port = next_port();
    start_delayed_upstream(backend_port, Duration::from_secs(3), "slow");
    let proxy = TestProxy::start(vec![route(
        "a.local",
        vec![backend("b1", backend_port)],
        10,
        10,
    )]);

    // Act
    let impatient = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let result = impatient
        .get(format!("{}/", proxy.proxy_url()))
        .header("Host", "a.local")
        .send();
    assert!(result.is_err(), "the client was supposed to give up");

    // Assert: the active gauge returns to zero and the request is settled
    // once, as a failure.
    let stats = proxy.wait_for_stats(
        "a.local",
        |s| s["requestsActive"] == 0 && s["requestsTotal"] == 1 && s["errorsTotal"] == 1,
        Duration::from_secs(10),
    );
    assert_eq!(stats["requestsTotal"], 1);
}
