//! Tests for Router module

use super::*;

fn make_router(ports: u8) -> PortRouter {
    PortRouter::new(ports, DEFAULT_IDLE_RESET).unwrap()
}

#[test]
fn test_port_count_bounds() {
    assert!(PortRouter::new(0, DEFAULT_IDLE_RESET).is_err());
    assert!(PortRouter::new(17, DEFAULT_IDLE_RESET).is_err());
    assert_eq!(make_router(16).port_count(), 16);
}

#[test]
fn test_outbound_announces_once_per_change() {
    let mut route = make_router(4).outbound();
    let now = Instant::now();

    assert_eq!(route.resolve(1, now).unwrap(), Some(1));
    assert_eq!(route.resolve(1, now).unwrap(), None);
    assert_eq!(route.resolve(2, now).unwrap(), Some(2));
    assert_eq!(route.resolve(2, now).unwrap(), None);
    assert_eq!(route.last_sent_port(), Some(2));
}

#[test]
fn test_outbound_single_port_is_passthrough() {
    let mut route = make_router(1).outbound();
    let now = Instant::now();

    assert_eq!(route.resolve(1, now).unwrap(), None);
    assert_eq!(route.resolve(1, now).unwrap(), None);
    assert!(route.resolve(2, now).is_err());
}

#[test]
fn test_outbound_rejects_out_of_range() {
    let mut route = make_router(2).outbound();
    let now = Instant::now();

    assert!(matches!(
        route.resolve(3, now),
        Err(BridgeError::PortOutOfRange { port: 3, count: 2 })
    ));
    assert!(route.resolve(0, now).is_err());
}

#[test]
fn test_outbound_idle_forces_reannounce() {
    let mut route = make_router(2).outbound();
    let start = Instant::now();

    assert_eq!(route.resolve(2, start).unwrap(), Some(2));
    route.record_activity(start);

    let later = start + Duration::from_secs(1);
    assert_eq!(route.resolve(2, later).unwrap(), None);
    route.record_activity(later);

    let idle = later + DEFAULT_IDLE_RESET;
    assert_eq!(route.resolve(2, idle).unwrap(), Some(2));
}

#[test]
fn test_outbound_expire_without_traffic_is_noop() {
    let mut route = make_router(2).outbound();
    assert!(!route.expire_if_idle(Instant::now() + Duration::from_secs(60)));
}

#[test]
fn test_subscription_transitions_invalidate() {
    let mut route = make_router(2).outbound();
    let now = Instant::now();
    route.resolve(2, now).unwrap();

    route.subscription_changed(1);
    assert_eq!(route.last_sent_port(), None);

    route.resolve(2, now).unwrap();
    route.subscription_changed(1);
    assert_eq!(route.last_sent_port(), Some(2));
    assert_eq!(route.subscribers(), 2);

    route.subscription_changed(-2);
    assert_eq!(route.last_sent_port(), None);
    assert_eq!(route.subscribers(), 0);
}

#[test]
fn test_inbound_port_select() {
    let mut route = make_router(4).inbound();
    assert_eq!(route.port(), 1);

    assert_eq!(route.apply_port_select(3), 3);
    assert_eq!(route.port(), 3);

    // Broadcast values map to port 1
    assert_eq!(route.apply_port_select(0x7F), 1);
    route.apply_port_select(2);
    assert_eq!(route.apply_port_select(0x00), 1);
}

#[test]
fn test_inbound_out_of_range_keeps_port() {
    let mut route = make_router(2).inbound();
    route.apply_port_select(2);

    assert_eq!(route.apply_port_select(9), 2);
}

#[test]
fn test_inbound_single_port_ignores_select() {
    let mut route = make_router(1).inbound();
    assert_eq!(route.apply_port_select(5), 1);
}

#[test]
fn test_inbound_idle_falls_back_to_port_one() {
    let mut route = make_router(3).inbound();
    let start = Instant::now();
    route.apply_port_select(3);
    route.record_traffic(start);

    assert!(!route.expire_if_idle(start + Duration::from_secs(1)));
    assert_eq!(route.port(), 3);

    assert!(route.expire_if_idle(start + DEFAULT_IDLE_RESET));
    assert_eq!(route.port(), 1);
}
