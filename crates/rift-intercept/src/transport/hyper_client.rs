//! Real HTTP transport built on the hyper legacy client.

use super::tls::NoVerifier;
use super::{HttpTransport, OutboundRequest};
use crate::config::PassthroughConfig;
use crate::error::InterceptError;
use crate::headers::HeaderList;
use crate::request::{InterceptedResponse, ResponseBody, ResponseHead};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Type alias for the HTTP client used for pass-through.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Sends requests over the network. Used for everything interception lets through.
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpClient,
    request_timeout: Option<Duration>,
}

impl HyperTransport {
    pub fn new(config: &PassthroughConfig) -> io::Result<Self> {
        let mut http_connector = HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_timeout_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let https_connector = if config.tls_skip_verify {
            warn!("TLS certificate verification DISABLED for pass-through requests (development/testing only)");
            let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls)
                .https_or_http()
                .enable_http1()
                .wrap_connector(http_connector)
        } else {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_provider_and_native_roots(rustls::crypto::ring::default_provider())?
                .https_or_http()
                .enable_http1()
                .wrap_connector(http_connector)
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        info!(
            "Pass-through client configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
            config.max_idle_per_host, config.idle_timeout_secs, config.keepalive_timeout_secs
        );

        Ok(Self {
            client,
            request_timeout: (config.request_timeout_secs > 0)
                .then(|| Duration::from_secs(config.request_timeout_secs)),
        })
    }

    fn build_request(
        request: OutboundRequest,
    ) -> Result<hyper::Request<Full<Bytes>>, InterceptError> {
        let mut builder = hyper::Request::builder()
            .method(request.head.method.as_str())
            .uri(request.head.url());
        for (name, value) in request.head.headers.iter() {
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(request.body))
            .map_err(InterceptError::passthrough)
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: OutboundRequest) -> Result<InterceptedResponse, InterceptError> {
        let method = request.head.method.clone();
        let url = request.head.url();
        let req = Self::build_request(request)?;

        let pending = self.client.request(req);
        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                InterceptError::passthrough(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("request to {url} timed out after {}s", limit.as_secs()),
                ))
            })?,
            None => pending.await,
        }
        .map_err(InterceptError::passthrough)?;

        debug!("Pass-through {} {} -> {}", method, url, response.status());

        let mut headers = HeaderList::new();
        for (name, value) in response.headers() {
            headers.push(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        let head = ResponseHead {
            status: response.status().as_u16(),
            headers,
        };

        let (tx, body) = ResponseBody::channel();
        let mut incoming = response.into_body();
        tokio::spawn(async move {
            while let Some(frame) = incoming.frame().await {
                match frame {
                    Ok(frame) => {
                        if let Ok(data) = frame.into_data() {
                            if tx.send(Ok(data)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(InterceptError::passthrough(e)));
                        break;
                    }
                }
            }
        });

        Ok(InterceptedResponse { head, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::RequestHead;

    #[test]
    fn test_build_request_copies_headers() {
        let head = RequestHead::post("http://localhost:8080/items?x=1")
            .unwrap()
            .header("X-Trace", "abc")
            .header("Accept", "application/json");
        let req = HyperTransport::build_request(OutboundRequest::new(head).with_body("{}"))
            .unwrap();
        assert_eq!(req.method(), hyper::Method::POST);
        assert_eq!(req.uri().to_string(), "http://localhost:8080/items?x=1");
        assert_eq!(req.headers()["x-trace"], "abc");
    }

    #[test]
    fn test_invalid_header_is_passthrough_error() {
        let head = RequestHead::get("http://localhost/")
            .unwrap()
            .header("bad header", "x");
        let err = HyperTransport::build_request(OutboundRequest::new(head)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Passthrough);
    }

    #[tokio::test]
    async fn test_transport_builds_with_skip_verify() {
        let config = PassthroughConfig {
            tls_skip_verify: true,
            ..PassthroughConfig::default()
        };
        assert!(HyperTransport::new(&config).is_ok());
    }
}
