use http_body_util::Full;
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response};
use hyper_util::rt::TokioIo;
use prometheus_client::{encoding::text, registry::Registry};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, info, instrument};

/// Serves the readiness/liveness probes and the metrics endpoint.
#[instrument(skip(ready, registry))]
pub async fn serve(
    addr: SocketAddr,
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP admin server listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let ready = ready.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let ready = ready.clone();
                let registry = registry.clone();
                async move { Ok::<_, Infallible>(handle(req, &ready, &registry)) }
            });
            if let Err(error) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%error, "Admin connection failed");
            }
        });
    }
}

fn handle(
    req: Request<hyper::body::Incoming>,
    ready: &watch::Receiver<bool>,
    registry: &Registry,
) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/ready") | (&Method::HEAD, "/ready") => {
            if *ready.borrow() {
                text_response(hyper::StatusCode::OK, "ready\n")
            } else {
                text_response(hyper::StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
            }
        }
        (&Method::GET, "/live") | (&Method::HEAD, "/live") => {
            text_response(hyper::StatusCode::OK, "live\n")
        }
        (&Method::GET, "/metrics") => {
            let mut buf = String::new();
            match text::encode(&mut buf, registry) {
                Ok(()) => Response::builder()
                    .status(hyper::StatusCode::OK)
                    .header(
                        hyper::header::CONTENT_TYPE,
                        "application/openmetrics-text; version=1.0.0; charset=utf-8",
                    )
                    .body(Full::new(Bytes::from(buf)))
                    .unwrap(),
                Err(_) => text_response(
                    hyper::StatusCode::INTERNAL_SERVER_ERROR,
                    "encoding failed\n",
                ),
            }
        }
        _ => Response::builder()
            .status(hyper::StatusCode::NOT_FOUND)
            .body(Full::default())
            .unwrap(),
    }
}

fn text_response(status: hyper::StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
