//! Blocking HTTP implementation of the marketplace gateway.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{
    ActivationGateway, Availability, Balance, GatewayError, NewActivationRequest,
    RemoteActivation,
};

const API_KEY_HEADER: &str = "X-Api-Key";
const USER_AGENT: &str = concat!("smsact/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Production gateway speaking the marketplace REST API.
///
/// Authentication is a static API key header; the key is held in a
/// [`SecretString`] so it cannot end up in debug output or logs.
pub struct HttpActivationGateway {
    base_url: String,
    api_key: SecretString,
    client: reqwest::blocking::Client,
}

impl HttpActivationGateway {
    /// Creates a gateway for `base_url` with a 10 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL or key is empty, or the HTTP
    /// client cannot be initialized.
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, api_key, Duration::from_secs(10))
    }

    /// Creates a gateway with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when required values are missing or the HTTP
    /// client cannot be initialized.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(GatewayError::Transport {
                message: "base_url must not be empty".to_string(),
            });
        }
        if api_key.expose_secret().trim().is_empty() {
            return Err(GatewayError::Transport {
                message: "api key must not be empty".to_string(),
            });
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| GatewayError::Transport {
                message: error.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        resource: &str,
    ) -> Result<reqwest::blocking::Response, GatewayError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .map_err(|error| GatewayError::Transport {
                message: error.to_string(),
            })?;
        ensure_success(response, resource)
    }

    fn post<B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
        resource: &str,
    ) -> Result<reqwest::blocking::Response, GatewayError> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, self.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().map_err(|error| GatewayError::Transport {
            message: error.to_string(),
        })?;
        ensure_success(response, resource)
    }
}

impl ActivationGateway for HttpActivationGateway {
    fn get_prices(&self, service_id: &str) -> Result<Vec<Availability>, GatewayError> {
        self.get(
            "/activation/prices/services",
            &[("service_id", service_id)],
            service_id,
        )?
        .json()
        .map_err(decode)
    }

    fn get_activation(&self, id: &str) -> Result<RemoteActivation, GatewayError> {
        self.get(&format!("/activation/{id}"), &[], id)?
            .json()
            .map_err(decode)
    }

    fn request_activation(
        &self,
        request: &NewActivationRequest,
    ) -> Result<RemoteActivation, GatewayError> {
        self.post("/activation/new", Some(request), &request.order_id)?
            .json()
            .map_err(decode)
    }

    fn cancel_activation(&self, id: &str) -> Result<(), GatewayError> {
        self.post::<()>(&format!("/activation/{id}/cancel"), None, id)?;
        Ok(())
    }

    fn finalize_activation(&self, id: &str) -> Result<(), GatewayError> {
        self.post::<()>(&format!("/activation/{id}/finalize"), None, id)?;
        Ok(())
    }

    fn get_balance(&self) -> Result<Balance, GatewayError> {
        self.get("/user/balance", &[], "balance")?
            .json()
            .map_err(decode)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn decode(error: reqwest::Error) -> GatewayError {
    GatewayError::Decode {
        message: error.to_string(),
    }
}

fn ensure_success(
    response: reqwest::blocking::Response,
    resource: &str,
) -> Result<reqwest::blocking::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().unwrap_or_default();
    Err(classify_error(
        status.as_u16(),
        retry_after.as_deref(),
        &body,
        resource,
    ))
}

/// Maps an error response onto the gateway's error vocabulary. Split out
/// from the transport so the classification is testable without sockets.
fn classify_error(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    resource: &str,
) -> GatewayError {
    match status {
        429 => GatewayError::RateLimited {
            retry_after: retry_after.and_then(|value| value.trim().parse().ok()),
        },
        404 => GatewayError::NotFound {
            id: resource.to_string(),
        },
        409 => {
            // A price conflict carries the marketplace's counter-offer.
            if let Some(suggested) = suggested_price(body) {
                GatewayError::PriceConflict {
                    suggested_price: suggested,
                }
            } else {
                GatewayError::Api {
                    status,
                    message: api_message(status, body),
                }
            }
        }
        _ => GatewayError::Api {
            status,
            message: api_message(status, body),
        },
    }
}

fn suggested_price(body: &str) -> Option<f64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("suggested_price")?
        .as_f64()
}

fn api_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("api error: {status}")
            } else {
                trimmed.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_credentials() {
        let gateway = HttpActivationGateway::new("", SecretString::from("key"));
        assert!(matches!(gateway, Err(GatewayError::Transport { .. })));

        let gateway =
            HttpActivationGateway::new("https://api.example.test", SecretString::from("  "));
        assert!(matches!(gateway, Err(GatewayError::Transport { .. })));
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let gateway = HttpActivationGateway::new(
            "https://api.example.test/",
            SecretString::from("key"),
        )
        .unwrap();
        assert_eq!(gateway.base_url, "https://api.example.test");
    }

    #[test]
    fn classifies_rate_limits_with_retry_after() {
        let error = classify_error(429, Some("30"), "", "act-1");
        assert_eq!(
            error,
            GatewayError::RateLimited {
                retry_after: Some(30)
            }
        );

        let error = classify_error(429, Some("soon"), "", "act-1");
        assert_eq!(error, GatewayError::RateLimited { retry_after: None });
    }

    #[test]
    fn classifies_not_found_with_the_resource() {
        let error = classify_error(404, None, "", "act-9");
        assert_eq!(
            error,
            GatewayError::NotFound {
                id: "act-9".to_string()
            }
        );
    }

    #[test]
    fn classifies_price_conflicts() {
        let body = r#"{"message": "price moved", "suggested_price": 0.62}"#;
        let error = classify_error(409, None, body, "ord-1");
        assert_eq!(
            error,
            GatewayError::PriceConflict {
                suggested_price: 0.62
            }
        );
    }

    #[test]
    fn conflict_without_suggestion_is_a_plain_api_error() {
        let body = r#"{"message": "order id already used"}"#;
        let error = classify_error(409, None, body, "ord-1");
        assert_eq!(
            error,
            GatewayError::Api {
                status: 409,
                message: "order id already used".to_string()
            }
        );
    }

    #[test]
    fn api_errors_prefer_the_remote_message() {
        let error = classify_error(500, None, r#"{"message": "boom"}"#, "x");
        assert_eq!(
            error,
            GatewayError::Api {
                status: 500,
                message: "boom".to_string()
            }
        );

        let error = classify_error(503, None, "", "x");
        assert_eq!(
            error,
            GatewayError::Api {
                status: 503,
                message: "api error: 503".to_string()
            }
        );
    }
}
