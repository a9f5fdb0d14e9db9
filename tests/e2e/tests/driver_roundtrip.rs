//! End-to-end scenario: a driver correlating requests and responses
//! through reactor proxies, surviving aborts and full shutdown.

use callback_reactor::{Lifecycle, Reactor};
use crossbeam_channel::unbounded;
use reactor_e2e_tests::{RequestDriver, Response};
use std::collections::HashSet;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn request_response_roundtrip() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (transmitter, responses) = unbounded();
    let mut driver = RequestDriver::new(reactor.clone(), transmitter).unwrap();

    let registrations: Vec<_> = (0..100)
        .map(|token| driver.begin_request(token).unwrap())
        .collect();
    for registration in &registrations {
        assert!(registration.wait(WAIT));
    }
    assert_eq!(driver.pending_requests(), 100);

    // Backend answers out of order; every token still resolves.
    let deliveries: Vec<_> = (0..100)
        .rev()
        .map(|token| {
            driver
                .complete_request(token, format!("payload-{}", token))
                .unwrap()
        })
        .collect();
    for delivery in &deliveries {
        assert!(delivery.wait(WAIT));
        assert_eq!(delivery.try_get(), Some(Ok(())));
    }
    assert_eq!(driver.pending_requests(), 0);

    let mut seen = HashSet::new();
    for _ in 0..100 {
        match responses.recv().unwrap() {
            Response::Ok(token, payload) => {
                assert_eq!(payload, format!("payload-{}", token));
                assert!(seen.insert(token));
            }
            Response::Error(token, error) => {
                panic!("unexpected error for token {}: {}", token, error)
            }
        }
    }

    assert!(driver.shutdown(WAIT));
    assert!(reactor.destroy(WAIT));
    assert_eq!(reactor.lifecycle(), Lifecycle::Destroyed);
}

#[test]
fn aborted_requests_produce_no_response() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (transmitter, responses) = unbounded();
    let mut driver = RequestDriver::new(reactor.clone(), transmitter).unwrap();

    for token in 0..4 {
        driver.begin_request(token).unwrap();
    }
    for token in [1, 3] {
        let destroyed = driver.abort_request(token).unwrap();
        assert!(destroyed.wait(WAIT));
    }
    assert_eq!(driver.pending_requests(), 2);

    driver.complete_request(0, "zero".to_string()).unwrap();
    driver.complete_request(2, "two".to_string()).unwrap();

    let mut tokens = vec![];
    for _ in 0..2 {
        match responses.recv_timeout(Duration::from_secs(10)).unwrap() {
            Response::Ok(token, _) => tokens.push(token),
            Response::Error(token, error) => {
                panic!("unexpected error for token {}: {}", token, error)
            }
        }
    }
    tokens.sort_unstable();
    assert_eq!(tokens, vec![0, 2]);
    // Aborted slots never answer.
    assert!(responses
        .recv_timeout(Duration::from_millis(100))
        .is_err());

    assert!(reactor.destroy(WAIT));
}

#[test]
fn shutdown_with_open_slots_and_late_requests() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (transmitter, _responses) = unbounded();
    let mut driver = RequestDriver::new(reactor.clone(), transmitter).unwrap();

    for token in 0..8 {
        driver.begin_request(token).unwrap();
    }

    // Open slots are torn down in cascade.
    assert!(reactor.destroy(WAIT));

    let (transmitter, _responses) = unbounded();
    assert!(RequestDriver::new(reactor, transmitter).is_err());
}
