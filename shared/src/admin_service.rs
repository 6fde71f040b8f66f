use crate::http::{boxed_text, make_boxed_error_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health` and `/ready` for orchestrator health checks.
///
/// Health always answers `ok`. Readiness is delegated to the `is_ready` callback.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();
        let res = route(req.method(), req.uri().path(), is_ready);

        Box::pin(async move { Ok(res) })
    }
}

fn route<E>(method: &Method, path: &str, is_ready: bool) -> Response<BoxBody<Bytes, E>> {
    if method != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match path {
        "/health" => Response::new(boxed_text("ok\n")),
        "/ready" => match is_ready {
            true => Response::new(boxed_text("ok\n")),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_admin_routes() {
        let res = route::<Infallible>(&Method::GET, "/health", false);
        assert_eq!(res.status(), StatusCode::OK);

        let res = route::<Infallible>(&Method::GET, "/ready", true);
        assert_eq!(res.status(), StatusCode::OK);

        let res = route::<Infallible>(&Method::GET, "/ready", false);
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let res = route::<Infallible>(&Method::GET, "/other", true);
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = route::<Infallible>(&Method::POST, "/health", true);
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_admin_service_over_http() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service: AdminService<_, std::io::Error> = AdminService::new(|| true);
        tokio::spawn(crate::http::run_http_service("127.0.0.1", port, service));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let body = reqwest::get(format!("http://127.0.0.1:{port}/ready"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok\n");
    }
}
