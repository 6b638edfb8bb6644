//! Path-to-handler routing table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Root,
    Status,
    Favicon,
    Proxy,
    Preflight,
    NotFound,
}

/// Resolve a request to a handler. OPTIONS terminates as a CORS preflight
/// on every path; `/proxy` accepts GET only; everything unknown falls
/// through to the 404 envelope.
pub(crate) fn route_for(method: &str, path: &str) -> Route {
    if method == "OPTIONS" {
        return Route::Preflight;
    }

    let mut path = path;
    if path.len() > 1 {
        path = path.trim_end_matches('/');
    }

    match path {
        "/" => Route::Root,
        "/status" => Route::Status,
        "/favicon.ico" => Route::Favicon,
        "/proxy" if method == "GET" => Route::Proxy,
        _ => Route::NotFound,
    }
}
