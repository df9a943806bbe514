//! In-process dispatch with timing and optional raw payload capture.

use std::time::Instant;

use crate::request::InjectedRequest;
use crate::server::{HookId, InjectOptions, Injection, LiveServer, ServerRequest};

/// An on-request hook recording the exact payload bytes, registered for as long as
/// the guard lives.
pub struct RawPayloadCapture<'a, S: LiveServer + ?Sized> {
    server: &'a S,
    hook: HookId,
}

impl<'a, S: LiveServer + ?Sized> RawPayloadCapture<'a, S> {
    pub fn acquire(server: &'a S) -> Self {
        let hook = server.ext_on_request(Box::new(ServerRequest::capture_raw_payload));
        tracing::debug!(?hook, "raw payload capture registered");
        Self { server, hook }
    }
}

impl<S: LiveServer + ?Sized> Drop for RawPayloadCapture<'_, S> {
    fn drop(&mut self) {
        let removed = self.server.remove_ext(self.hook);
        tracing::debug!(hook = ?self.hook, removed, "raw payload capture released");
    }
}

/// The request that was sent together with what came back.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub sent: InjectedRequest,
    pub injection: Injection,
    pub timing_ms: u128,
}

/// Inject `request` and time it in whole milliseconds.
pub fn dispatch<S>(server: &S, request: InjectedRequest, capture_raw: bool) -> Dispatched
where
    S: LiveServer + ?Sized,
{
    let _capture = capture_raw.then(|| RawPayloadCapture::acquire(server));

    let started = Instant::now();
    let injection = server.inject(InjectOptions {
        method: request.method.clone(),
        url: request.url.clone(),
        payload: request.payload.clone(),
        headers: request.headers.clone(),
    });
    let timing_ms = started.elapsed().as_millis();

    tracing::debug!(
        method = %request.method,
        url = %request.url,
        status = injection.status_code,
        timing_ms,
        "dispatched"
    );
    Dispatched {
        sent: request,
        injection,
        timing_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Headers, Payload};
    use crate::server::{RouteConfig, Server};

    fn test_server() -> Server {
        let mut server = Server::default();
        server
            .route(RouteConfig::new("post", "/echo", |req| {
                crate::server::Response::json(req.payload.clone().unwrap_or_default())
            }))
            .unwrap();
        server
    }

    fn echo_request(body: &str) -> InjectedRequest {
        InjectedRequest {
            method: "post".to_string(),
            url: "/echo".to_string(),
            payload: Some(Payload::Raw(body.to_string())),
            headers: Headers::new(),
        }
    }

    #[test]
    fn test_dispatch_captures_raw_when_asked() {
        let server = test_server();
        let out = dispatch(&server, echo_request("{ \"a\":  1 }"), true);
        assert_eq!(out.injection.request.raw_payload(), Some(b"{ \"a\":  1 }".as_slice()));
        assert_eq!(out.injection.raw_payload, b"{\"a\":1}".to_vec());
        assert_eq!(server.hook_count(), 0);
    }

    #[test]
    fn test_dispatch_without_capture_registers_nothing() {
        let server = test_server();
        let out = dispatch(&server, echo_request("{}"), false);
        assert!(out.injection.request.raw_payload().is_none());
        assert_eq!(server.hook_count(), 0);
    }

    #[test]
    fn test_capture_guard_releases_hook() {
        let server = test_server();
        {
            let _guard = RawPayloadCapture::acquire(&server);
            assert_eq!(server.hook_count(), 1);
        }
        assert_eq!(server.hook_count(), 0);
        for _ in 0..3 {
            dispatch(&server, echo_request("{}"), true);
        }
        assert_eq!(server.hook_count(), 0);
    }
}
