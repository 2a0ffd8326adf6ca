use http::{header, StatusCode};
use pingora::prelude::*;
use pingora::Custom;
use pingora_http::ResponseHeader;
use serde::Serialize;

/// Write a plain-text response and end the exchange.
pub(crate) async fn send_plain(
    session: &mut Session,
    status: StatusCode,
    body: &str,
) -> Result<()> {
    send_plain_with(session, status, body, &[]).await
}

/// Plain-text response with extra headers (e.g. `Retry-After`).
pub(crate) async fn send_plain_with(
    session: &mut Session,
    status: StatusCode,
    body: &str,
    extra: &[(&str, &str)],
) -> Result<()> {
    let mut resp = ResponseHeader::build(status, None)?;
    resp.insert_header(header::CONTENT_TYPE, "text/plain")?;
    resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
    for (name, value) in extra {
        resp.insert_header(name.to_string(), *value)?;
    }

    session.write_response_header(Box::new(resp), false).await?;
    session
        .write_response_body(Some(body.as_bytes().to_vec().into()), true)
        .await?;

    Ok(())
}

pub(crate) async fn send_json<T: Serialize>(
    session: &mut Session,
    status: StatusCode,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value)
        .map_err(|_| Error::new(Custom("json serialization failed")))?;

    let mut resp = ResponseHeader::build(status, None)?;
    resp.insert_header(header::CONTENT_TYPE, "application/json")?;
    resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;

    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(body.into()), true).await?;

    Ok(())
}

/// 204 with no body.
pub(crate) async fn send_no_content(session: &mut Session) -> Result<()> {
    let mut resp = ResponseHeader::build(StatusCode::NO_CONTENT, None)?;
    resp.insert_header(header::CONTENT_LENGTH, "0")?;
    session.write_response_header(Box::new(resp), true).await?;
    Ok(())
}
