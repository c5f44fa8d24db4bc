use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Request, Url};

use crate::config::HttpClientConfig;
use crate::crd::RestCallSpec;
use crate::error::{OperatorError, Result};

pub fn build_client(config: &HttpClientConfig) -> Result<Client> {
    let redirect = if config.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(config.max_redirects)
    };

    Ok(Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .user_agent(config.user_agent.clone())
        .build()?)
}

pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(OperatorError::invalid_spec("spec.endpoint is empty"));
    }

    let url = Url::parse(endpoint).map_err(|e| {
        OperatorError::invalid_spec(format!(
            "spec.endpoint {:?} is not a valid URL: {}",
            endpoint, e
        ))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(OperatorError::invalid_spec(format!(
                "spec.endpoint scheme {:?} is not http or https",
                other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(OperatorError::invalid_spec(format!(
            "spec.endpoint {:?} has no host",
            endpoint
        )));
    }

    Ok(url)
}

/// GET request for `spec`, carrying every configured header.
pub fn build_request(client: &Client, spec: &RestCallSpec) -> Result<Request> {
    let url = parse_endpoint(&spec.endpoint)?;
    let mut builder = client.get(url);

    for (name, value) in &spec.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            OperatorError::invalid_spec(format!("spec.headers has invalid name {:?}", name))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            OperatorError::invalid_spec(format!("spec.headers[{:?}] has an invalid value", name))
        })?;
        builder = builder.header(header_name, header_value);
    }

    Ok(builder.build()?)
}

/// Performs one attempt and returns the body as text. No retries here;
/// the work queue owns retry policy.
pub async fn execute(
    client: &Client,
    config: &HttpClientConfig,
    request: Request,
) -> Result<String> {
    let mut response = client.execute(request).await?;

    let status = response.status();
    if config.fail_on_error_status && (status.is_client_error() || status.is_server_error()) {
        return Err(OperatorError::UnexpectedStatus(status.as_u16()));
    }

    let limit = config.max_response_bytes;
    if let Some(length) = response.content_length() {
        if length > limit as u64 {
            return Err(OperatorError::ResponseTooLarge { limit });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(OperatorError::ResponseTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_accepts_http_and_https() {
        assert!(parse_endpoint("http://example.com/ok").is_ok());
        assert!(parse_endpoint("https://example.com").is_ok());
        assert!(parse_endpoint("  http://127.0.0.1:8080/path?q=1  ").is_ok());
    }

    #[test]
    fn test_parse_endpoint_rejects_invalid() {
        for endpoint in ["", "   ", "not a url", "ftp://example.com", "example.com/ok"] {
            let err = parse_endpoint(endpoint).unwrap_err();
            assert!(
                matches!(err, OperatorError::InvalidSpec(_)),
                "expected invalid spec for {:?}",
                endpoint
            );
        }
    }

    #[test]
    fn test_build_request_attaches_headers() {
        let client = build_client(&HttpClientConfig::default()).unwrap();
        let spec = RestCallSpec::new("http://example.com/ok")
            .with_header("X-Test", "abc")
            .with_header("Authorization", "Bearer t");

        let request = build_request(&client, &spec).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().as_str(), "http://example.com/ok");
        assert_eq!(request.headers()["x-test"], "abc");
        assert_eq!(request.headers()["authorization"], "Bearer t");
    }

    #[test]
    fn test_build_request_rejects_bad_headers() {
        let client = build_client(&HttpClientConfig::default()).unwrap();

        let spec = RestCallSpec::new("http://example.com").with_header("bad header", "x");
        assert!(matches!(
            build_request(&client, &spec),
            Err(OperatorError::InvalidSpec(_))
        ));

        let spec = RestCallSpec::new("http://example.com").with_header("X-Test", "line\nbreak");
        assert!(matches!(
            build_request(&client, &spec),
            Err(OperatorError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_build_client_without_redirects() {
        let config = HttpClientConfig::default().with_max_redirects(0);
        assert!(build_client(&config).is_ok());
    }
}
