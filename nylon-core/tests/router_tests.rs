use nylon_core::route::{HttpMethod, Matcher, Path, Route};
use nylon_core::router::Router;

fn route_with_paths(host: &str, paths: Vec<Path>) -> Route {
    Route { matcher: Matcher::Host { value: host.into() }, tls: None, middleware: vec![], paths }
}

fn path(pattern: &str, service: &str) -> Path {
    Path { patterns: vec![pattern.into()], methods: vec![], service_ref: service.into(), middleware: vec![] }
}

/// P1: repeated resolution of the same (request, config) pair is
/// deterministic, and literal patterns win over parametric ones.
#[test]
fn p1_router_determinism_and_specificity() {
    let router = Router::new();
    router.replace_all(vec![route_with_paths(
        "localhost",
        vec![path("/users/{id}", "dynamic"), path("/users/admin", "literal")],
    )]);

    for _ in 0..50 {
        let m = router.match_route("GET", "/users/admin", Some("localhost"), |_| None).unwrap();
        assert_eq!(m.route.paths[m.path_index].service_ref, "literal");
    }
    let m = router.match_route("GET", "/users/42", Some("localhost"), |_| None).unwrap();
    assert_eq!(m.route.paths[m.path_index].service_ref, "dynamic");
}

#[test]
fn reload_swaps_the_whole_table_atomically() {
    let router = Router::new();
    router.replace_all(vec![route_with_paths("localhost", vec![path("/a", "v1")])]);
    assert!(router.match_route("GET", "/a", Some("localhost"), |_| None).is_some());

    router.replace_all(vec![route_with_paths("localhost", vec![path("/b", "v2")])]);
    assert!(router.match_route("GET", "/a", Some("localhost"), |_| None).is_none());
    assert!(router.match_route("GET", "/b", Some("localhost"), |_| None).is_some());
}

#[test]
fn greedy_tail_capture_matches_remaining_segments() {
    let router = Router::new();
    router.replace_all(vec![route_with_paths("localhost", vec![path("/files/{*rest}", "static")])]);
    let m = router.match_route("GET", "/files/a/b/c.png", Some("localhost"), |_| None).unwrap();
    assert_eq!(m.params[0].0, "rest");
    assert_eq!(m.params[0].1, "a/b/c.png");
}

#[test]
fn method_restricted_path_does_not_shadow_catch_all() {
    let router = Router::new();
    let mut post_only = path("/submit", "writer");
    post_only.methods = vec![HttpMethod::Post];
    router.replace_all(vec![route_with_paths("localhost", vec![post_only, path("/submit", "reader")])]);

    let get = router.match_route("GET", "/submit", Some("localhost"), |_| None).unwrap();
    assert_eq!(get.route.paths[get.path_index].service_ref, "reader");
    let post = router.match_route("POST", "/submit", Some("localhost"), |_| None).unwrap();
    assert_eq!(post.route.paths[post.path_index].service_ref, "writer");
}

#[test]
fn version_increments_on_every_reload() {
    let router = Router::new();
    let v0 = router.version();
    router.replace_all(vec![]);
    assert_eq!(router.version(), v0 + 1);
    router.replace_all(vec![]);
    assert_eq!(router.version(), v0 + 2);
}
