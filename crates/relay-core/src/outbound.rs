//! Generic `http::Request<Vec<u8>>` <-> `reqwest` bridge used by every
//! provider adaptor's DISPATCH step (spec §4.5/§4.6).

use crate::error::GatewayError;
use http::{Request, Response};
use once_cell::sync::Lazy;
use reqwest::Client;

static CLIENT: Lazy<Client> = Lazy::new(Client::new);

pub async fn call_outbound(req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, GatewayError> {
    let client = &*CLIENT;

    let method = req
        .method()
        .as_str()
        .parse::<reqwest::Method>()
        .map_err(|e| GatewayError::Internal(format!("invalid method: {e}")))?;

    let mut rb = client.request(method, req.uri().to_string());
    for (name, value) in req.headers().iter() {
        let val_str = value
            .to_str()
            .map_err(|e| GatewayError::Internal(format!("invalid header value: {e}")))?;
        rb = rb.header(name.as_str(), val_str);
    }

    let resp = rb.body(req.into_body()).send().await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.bytes().await?.to_vec();

    if !status.is_success() {
        let body_text = String::from_utf8_lossy(&bytes).to_string();
        return if status.is_client_error() {
            Err(GatewayError::UpstreamPermanent(format!("{status}: {body_text}")))
        } else {
            Err(GatewayError::UpstreamTransient(format!("{status}: {body_text}")))
        };
    }

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in headers.iter() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder
        .body(bytes)
        .map_err(|e| GatewayError::Internal(format!("malformed upstream response: {e}")))
}
