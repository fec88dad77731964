use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use vmcore::net::{HttpClient, HttpRequest, HttpResponse};

/// `HttpClient` backed by blocking `ureq` calls.
/// Every request runs inside `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct UreqHttpClient;

impl UreqHttpClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        tokio::task::spawn_blocking(move || {
            let result = match request.method.as_str() {
                "GET" => {
                    let mut req = ureq::get(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()
                }
                "HEAD" => {
                    let mut req = ureq::head(&request.url);
                    for (key, value) in &request.headers {
                        req = req.header(key, value);
                    }
                    req.call()
                }
                method => {
                    return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method));
                }
            };

            let response = match result {
                Ok(response) => response,
                // Non-2xx statuses are reported to the caller, not raised here.
                Err(ureq::Error::StatusCode(status_code)) => {
                    debug!("{} {} -> {}", request.method, request.url, status_code);
                    return Ok(HttpResponse {
                        status_code,
                        body: Vec::new(),
                    });
                }
                Err(e) => return Err(e.into()),
            };

            let status_code = response.status().as_u16();
            let body = if request.method == "HEAD" {
                Vec::new()
            } else {
                response.into_body().read_to_vec()?
            };

            Ok(HttpResponse { status_code, body })
        })
        .await?
    }
}
