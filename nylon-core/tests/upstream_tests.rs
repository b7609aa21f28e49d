use nylon_core::upstream::{parse_duration_suffixed, Endpoint, HealthState, HealthStatus};

/// P4: state flips require exactly `threshold` consecutive outcomes; a
/// single counter-opposing result resets the counter.
#[test]
fn p4_health_transitions_require_exact_threshold() {
    let hs = HealthState::new();
    for _ in 0..2 {
        hs.record(false, 2, 3);
        assert!(hs.is_selectable(), "should stay selectable below threshold");
    }
    hs.record(false, 2, 3);
    assert_eq!(hs.status(), HealthStatus::Unhealthy);
}

#[test]
fn p4_opposing_result_resets_the_streak() {
    let hs = HealthState::new();
    hs.record(false, 2, 5);
    hs.record(false, 2, 5);
    hs.record(false, 2, 5);
    hs.record(true, 2, 5); // resets fail streak at 3/5
    for _ in 0..4 {
        hs.record(false, 2, 5);
        assert!(hs.is_selectable());
    }
    hs.record(false, 2, 5);
    assert_eq!(hs.status(), HealthStatus::Unhealthy);
}

#[test]
fn endpoint_addr_formats_ip_and_port() {
    let e = Endpoint { ip: "10.0.0.5".into(), port: 8080, weight: 3 };
    assert_eq!(e.addr(), "10.0.0.5:8080");
}

#[test]
fn durations_must_be_unit_suffixed() {
    assert!(parse_duration_suffixed("5").is_err());
    assert!(parse_duration_suffixed("5x").is_err());
    assert_eq!(parse_duration_suffixed("1500ms").unwrap().as_millis(), 1500);
}
