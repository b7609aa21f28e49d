use nylon_core::config::ProxyConfig;
use nylon_core::route::{HttpMethod, Matcher, MiddlewareStep, Path, Route};
use nylon_core::service::Service;
use nylon_core::upstream::Endpoint;

fn sample_service() -> Service {
    Service::Http {
        name: "backend".into(),
        endpoints: vec![Endpoint { ip: "127.0.0.1".into(), port: 3000, weight: 1 }],
        algorithm: Default::default(),
        hc: Default::default(),
        hash_key: None,
        max_retries: 1,
    }
}

fn sample_route() -> Route {
    Route {
        matcher: Matcher::Host { value: "localhost".into() },
        tls: None,
        middleware: vec![],
        paths: vec![Path {
            patterns: vec!["/hello".into()],
            methods: vec![HttpMethod::Get],
            service_ref: "backend".into(),
            middleware: vec![],
        }],
    }
}

#[test]
fn full_config_round_trips_through_yaml() {
    let mut cfg = ProxyConfig::default();
    cfg.services.push(sample_service());
    cfg.routes.push(sample_route());

    let yaml = serde_yaml::to_string(&cfg).unwrap();
    let decoded: ProxyConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(decoded.services.len(), 1);
    assert_eq!(decoded.routes.len(), 1);
    decoded.validate().expect("round-tripped config must validate");
}

#[test]
fn effective_chain_is_route_then_path_middleware() {
    let mut cfg = ProxyConfig::default();
    cfg.services.push(sample_service());
    cfg.middleware_groups.insert(
        "common".into(),
        vec![MiddlewareStep::Call { plugin: "cors".into(), entry: "apply".into(), payload_template: serde_json::Value::Null }],
    );
    cfg.plugins.push(nylon_core::plugin_def::PluginDefinition {
        name: "cors".into(),
        transport: nylon_core::plugin_def::Transport::Ffi { file_path: "./cors.so".into() },
        initial_config: serde_json::Value::Null,
    });
    cfg.plugins.push(nylon_core::plugin_def::PluginDefinition {
        name: "auth".into(),
        transport: nylon_core::plugin_def::Transport::Ffi { file_path: "./auth.so".into() },
        initial_config: serde_json::Value::Null,
    });

    let mut route = sample_route();
    route.middleware = vec![MiddlewareStep::Group { name: "common".into() }];
    route.paths[0].middleware =
        vec![MiddlewareStep::Call { plugin: "auth".into(), entry: "check".into(), payload_template: serde_json::Value::Null }];
    cfg.routes.push(route.clone());
    cfg.validate().unwrap();

    let route_steps = cfg.expand_groups(&route.middleware).unwrap();
    let path_steps = cfg.expand_groups(&route.paths[0].middleware).unwrap();
    let effective: Vec<_> = route_steps.into_iter().chain(path_steps).collect();

    assert_eq!(effective.len(), 2);
    match &effective[0] {
        MiddlewareStep::Call { plugin, .. } => assert_eq!(plugin, "cors"),
        _ => panic!("group should have expanded to a call"),
    }
    match &effective[1] {
        MiddlewareStep::Call { plugin, .. } => assert_eq!(plugin, "auth"),
        _ => panic!("expected path-level call"),
    }
}

#[test]
fn unknown_group_reference_fails_validation() {
    let mut cfg = ProxyConfig::default();
    cfg.services.push(sample_service());
    let mut route = sample_route();
    route.middleware = vec![MiddlewareStep::Group { name: "nope".into() }];
    cfg.routes.push(route);
    assert!(cfg.validate().is_err());
}
