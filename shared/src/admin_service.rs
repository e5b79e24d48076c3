use crate::http::{make_boxed_error_response, make_text_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Point-in-time view of the controller reported on the admin listener.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeState {
    /// True once a configuration has been activated on the proxy.
    pub ready: bool,
    /// Free-form status lines served on `/status`.
    pub detail: String,
}

/// Serves `/health`, `/ready` and `/status`.
pub struct AdminService<F, E> {
    probe: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> ProbeState,
{
    pub fn new(probe: F) -> Self {
        Self {
            probe,
            _error: PhantomData,
        }
    }
}

fn respond(path: &str, state: ProbeState) -> Response<BoxBody<Bytes, Infallible>> {
    match path {
        "/health" => make_text_response("ok\n".into()),
        "/ready" => match state.ready {
            true => make_text_response("ok\n".into()),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        "/status" => make_text_response(state.detail),
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> ProbeState + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let state = (self.probe)();
        let path = req.uri().path().to_string();

        Box::pin(async move { Ok(respond(&path, state)) })
    }
}
