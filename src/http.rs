use std::thread;

use thiserror::Error;

use crate::config::HttpSettings;

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    /// Only reads are replayed. A write that timed out may still have landed.
    fn attempts(self, configured: usize) -> usize {
        match self {
            Self::Get => configured.max(1),
            Self::Post => 1,
        }
    }
}

/// A failed request. `status` is `None` for transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub(crate) struct HttpFailure {
    pub(crate) status: Option<u16>,
    pub(crate) message: String,
}

impl HttpFailure {
    fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn is_unauthorized(&self) -> bool {
        matches!(self.status, Some(401 | 403))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpReply {
    pub(crate) body: String,
    pub(crate) set_cookies: Vec<String>,
}

impl HttpReply {
    /// Value of the cookie `name` among the `Set-Cookie` headers.
    pub(crate) fn cookie(&self, name: &str) -> Option<String> {
        self.set_cookies.iter().find_map(|header| {
            let pair = header.split(';').next()?;
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    }
}

pub(crate) fn send_with_retries(
    method: Method,
    url: &str,
    headers: &[(&str, String)],
    json_body: Option<&str>,
    settings: &HttpSettings,
) -> Result<HttpReply, HttpFailure> {
    let attempts = method.attempts(settings.attempts);

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.connect_timeout())
            .timeout_read(settings.read_timeout())
            .timeout_write(settings.read_timeout())
            .build();

        let mut request = agent
            .request(method.as_str(), url)
            .set("Accept", "application/json");
        for (key, value) in headers {
            request = request.set(key, value);
        }

        let outcome = match (method, json_body) {
            (Method::Get, _) => request.call(),
            (Method::Post, Some(body)) => request
                .set("Content-Type", "application/json")
                .send_string(body),
            (Method::Post, None) => request.send_string(""),
        };

        match outcome {
            Ok(response) => {
                let set_cookies = response
                    .all("set-cookie")
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                return match response.into_string() {
                    Ok(body) => Ok(HttpReply { body, set_cookies }),
                    Err(err) => Err(HttpFailure::new(
                        None,
                        format!("request failed: response decode failed: {err}"),
                    )),
                };
            }
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let status_error = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let truncated = body.chars().take(240).collect::<String>();
                    format!("HTTP status {status} ({truncated})")
                };

                if should_retry_http_status(status) && attempt < attempts {
                    thread::sleep(settings.retry_delay());
                    continue;
                }

                if should_retry_http_status(status) && attempts > 1 {
                    return Err(HttpFailure::new(
                        Some(status),
                        format!("request failed after {attempts} attempt(s): {status_error}"),
                    ));
                }

                return Err(HttpFailure::new(
                    Some(status),
                    format!("request failed: {status_error}"),
                ));
            }
            Err(ureq::Error::Transport(err)) => {
                let transport_error = format!("transport error: {err}");
                if attempt < attempts {
                    thread::sleep(settings.retry_delay());
                    continue;
                }
                return Err(HttpFailure::new(
                    None,
                    format!("request failed after {attempts} attempt(s): {transport_error}"),
                ));
            }
        }
    }

    Err(HttpFailure::new(
        None,
        "request failed: exhausted attempts without a concrete error",
    ))
}
