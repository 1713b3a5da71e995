//! The discovery HTTP handler.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tracing::error;

use tailmon_overlay::OverlayStatus;

use crate::endpoints::{enumerate, render_sd};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Serve one discovery request for the given path.
///
/// `GET /` answers with the HTTP SD document. An overlay query failure
/// becomes a 500 whose body is the error text; the error path sets no
/// content-type, matching the long-standing observable behavior. Any
/// other path is 404 with an identifying body.
pub async fn handle_discovery<S>(overlay: &S, path: &str) -> Response<Full<Bytes>>
where
    S: OverlayStatus + Sync,
{
    if path != "/" {
        let mut resp = Response::new(Full::new(Bytes::from_static(b"tailmon-discover\n")));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        return resp;
    }

    let doc = match enumerate(overlay).await {
        Ok(endpoints) => render_sd(&endpoints),
        Err(e) => {
            error!(error = %e, "unable to enumerate endpoints");
            let mut resp = Response::new(Full::new(Bytes::from(e.to_string())));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return resp;
        }
    };

    match doc {
        Ok(doc) => {
            let mut resp = Response::new(Full::new(Bytes::from(doc)));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            resp
        }
        Err(e) => {
            error!(error = %e, "unable to render endpoints");
            let mut resp = Response::new(Full::new(Bytes::from(e.to_string())));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    }
}
