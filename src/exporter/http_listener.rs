use std::net::SocketAddr;

use http_body_util::Full;
use hyper::{
    body::{self, Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use super::{ExporterError, ExporterFuture};
use crate::common::BuildError;
use crate::registry::ScrapeHandle;

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

struct HttpListeningExporter {
    handle: ScrapeHandle,
}

impl HttpListeningExporter {
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener)?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            self.process_stream(stream).await;
        }
    }

    async fn process_stream(&self, stream: TcpStream) {
        let handle = self.handle.clone();
        let service = service_fn(move |req: Request<body::Incoming>| {
            let handle = handle.clone();
            async move { Self::handle_http_request(&handle, &req) }
        });

        tokio::task::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!("Error serving connection.  Error: {:?}", err);
            };
        });
    }

    fn handle_http_request(
        handle: &ScrapeHandle,
        req: &Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        Ok(match req.uri().path() {
            "/health" => Response::new("OK".into()),
            _ => {
                let mut response = Response::new(handle.render().into());
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT_CONTENT_TYPE));
                response
            }
        })
    }
}

/// Creates an [`ExporterFuture`] serving the Prometheus exposition format over HTTP.
///
/// `/health` answers with a plain `OK` liveness response. Every other path, `/metrics`
/// included, answers with the rendered contents of the registry behind `handle`.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address.
pub fn new_http_listener(
    handle: ScrapeHandle,
    listen_address: SocketAddr,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter = HttpListeningExporter { handle };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}
