//! Network fetches through the wrapped client service.

use std::time::Duration;

use bytes::Bytes;
use http::response::Parts;
use http::{Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceExt};

use crate::backend::CacheEntry;
use crate::error::CacheError;
use crate::layer::BoxError;

/// A fully collected network response.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub(crate) parts: Parts,
    pub(crate) body: Bytes,
}

impl Fetched {
    pub(crate) fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub(crate) fn to_entry(&self) -> CacheEntry {
        CacheEntry::from_parts(&self.parts, self.body.clone())
    }

    pub(crate) fn into_response(self) -> Response<Full<Bytes>> {
        Response::from_parts(self.parts, Full::from(self.body))
    }
}

/// Issues `request` on `service` and collects the body.
///
/// With a `timeout` the whole exchange, body included, must finish in time.
pub(crate) async fn fetch<S, ReqBody, ResBody>(
    service: S,
    request: Request<ReqBody>,
    timeout: Option<Duration>,
) -> Result<Fetched, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    let exchange = async move {
        let response = service
            .oneshot(request)
            .await
            .map_err(|err| -> BoxError { err.into() })?;
        let (parts, body) = response.into_parts();
        let collected = BodyExt::collect(body)
            .await
            .map_err(|err| -> BoxError { err.into() })?;
        Ok::<_, BoxError>(Fetched {
            parts,
            body: collected.to_bytes(),
        })
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| -> BoxError { Box::new(CacheError::Timeout(limit)) })?,
        None => exchange.await,
    }
}
