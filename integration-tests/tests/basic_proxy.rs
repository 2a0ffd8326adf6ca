use integration_tests::harness::{backend, next_port, route, start_echo_upstream, TestProxy};
use std::time::Duration;

#[test]
fn forwards_to_the_single_backend() {
    // Arrange
    let backend_port = next_port();
    start_echo_upstream(backend_port, "hello from b1");
    let proxy = TestProxy::start(vec![route(
        "t1.local",
        vec![backend("b1", backend_port)],
        100,
        100,
    )]);

    // Act
    let response = proxy.get("/", "t1.local");

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().unwrap(), "hello from b1");

    let stats = proxy.wait_for_stats(
        "t1.local",
        |s| s["requestsActive"] == 0,
        Duration::from_secs(5),
    );
    assert_eq!(stats["requestsTotal"], 1);
    assert_eq!(stats["errorsTotal"], 0);
}

#[test]
fn missing_host_header_is_rejected_with_400() {
    // Arrange
    let proxy = TestProxy::start(vec![]);

    // Act: no sane client omits Host, so go in raw.
    let response = proxy.raw_request("GET / HTTP/1.0\r\n\r\n");

    // Assert
    assert!(response.contains(" 400 "), "unexpected response: {response}");
    assert!(response.contains("Missing Host Header"));
}

#[test]
fn unknown_vhost_is_rejected_with_404() {
    // Arrange
    let proxy = TestProxy::start(vec![]);

    // Act
    let response = proxy.get("/", "unknown.local");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(
        response.text().unwrap(),
        "No route configured for unknown.local"
    );
}

#[test]
fn host_header_port_is_stripped_before_routing() {
    // Arrange
    let backend_port = next_port();
    start_echo_upstream(backend_port, "ported");
    let proxy = TestProxy::start(vec![route(
        "p.local",
        vec![backend("b1", backend_port)],
        100,
        100,
    )]);

    // Act
    let response = proxy.get("/", "p.local:12345");

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().unwrap(), "ported");
}
