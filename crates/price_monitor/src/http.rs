use arb_detector::{CoreError, ProviderId, UpstreamFailure};
use std::time::Duration;

/// Longest upstream error body we keep for diagnostics.
const MAX_ERROR_BODY: usize = 200;

pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("arbfeed-live/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// GET `url` and return the body of a 2xx answer; everything else becomes an `UpstreamFailure`.
pub async fn fetch_text(
    client: &reqwest::Client,
    url:    &str,
    query:  &[(&str, String)],
) -> Result<String, UpstreamFailure> {
    let resp = client
        .get(url)
        .header("Accept", "application/json")
        .query(query)
        .send()
        .await
        .map_err(classify)?;

    let status = resp.status();
    let body = resp.text().await.map_err(classify)?;

    if !status.is_success() {
        return Err(UpstreamFailure::Http {
            status: status.as_u16(),
            body:   truncate(&body, MAX_ERROR_BODY),
        });
    }
    Ok(body)
}

fn classify(e: reqwest::Error) -> UpstreamFailure {
    if e.is_timeout() {
        UpstreamFailure::Timeout
    } else if e.is_connect() || e.is_request() {
        UpstreamFailure::Network(e.without_url().to_string())
    } else if let Some(status) = e.status() {
        UpstreamFailure::Http { status: status.as_u16(), body: String::new() }
    } else {
        UpstreamFailure::Unknown(e.without_url().to_string())
    }
}

/// A 2xx body that didn't parse. Carries the id the scheduler logged the request under.
pub fn malformed_payload(
    provider:       ProviderId,
    sport:          &str,
    cause:          &serde_json::Error,
    correlation_id: &str,
) -> CoreError {
    CoreError::provider(
        "PROVIDER_MALFORMED_PAYLOAD",
        format!("{provider} {sport}: {cause}"),
        correlation_id,
    )
    .with_details(serde_json::json!({ "provider": provider.as_str(), "sport": sport }))
}

/// Cut at a char boundary at or below `max` bytes.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
