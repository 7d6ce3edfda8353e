//! HTTP client for the storefront REST API.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::models::{Coupon, LineItem, OrderDraft};
use crate::response::{ApiResponse, Created};
use crate::storefront::{
    identity::Identity,
    remote::{AccountCartRecord, ApiError, CartApi, CouponApi, OrderApi},
};

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

#[derive(Serialize)]
struct UsageBody {
    order_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct StorefrontClient {
    client: Client,
    base_url: Url,
}

impl StorefrontClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| ApiError::Network(format!("invalid API url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Network(format!(
                "invalid API url: {}",
                config.api_url
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url, identity: Option<&Identity>) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match identity {
            Some(identity) => builder.bearer_auth(identity.bearer_token()),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn data<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
        let body = Self::send(builder)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        envelope_data(&body)
    }
}

/// Error for a non-2xx response, using the envelope's message when the body
/// has one.
fn status_error(status: StatusCode, body: &[u8]) -> ApiError {
    if status == StatusCode::NOT_FOUND {
        return ApiError::NotFound;
    }
    let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(body)
        .map(|envelope| envelope.message)
        .unwrap_or_else(|_| status.to_string());
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

fn envelope_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let envelope: ApiResponse<T> =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    envelope
        .data
        .ok_or_else(|| ApiError::Decode(format!("response without data: {}", envelope.message)))
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err.to_string())
    }
}

#[async_trait]
impl CartApi for StorefrontClient {
    async fn fetch(&self, identity: &Identity) -> Result<Vec<AccountCartRecord>, ApiError> {
        let mut url = self.url(&["carts"]);
        url.query_pairs_mut().append_pair("email", &identity.email);
        Self::data(self.request(Method::GET, url, Some(identity))).await
    }

    async fn add(&self, identity: &Identity, item: &LineItem) -> Result<Uuid, ApiError> {
        let request = self
            .request(Method::POST, self.url(&["carts"]), Some(identity))
            .json(item);
        let created: Created = Self::data(request).await?;
        Ok(created.inserted_id)
    }

    async fn set_quantity(
        &self,
        identity: &Identity,
        line_id: &str,
        quantity: u32,
    ) -> Result<(), ApiError> {
        let request = self
            .request(Method::PATCH, self.url(&["carts", line_id]), Some(identity))
            .json(&QuantityBody { quantity });
        Self::send(request).await.map(|_| ())
    }

    async fn remove(&self, identity: &Identity, line_id: &str) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, self.url(&["carts", line_id]), Some(identity));
        Self::send(request).await.map(|_| ())
    }

    async fn clear(&self, identity: &Identity) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, self.url(&["carts"]), Some(identity));
        Self::send(request).await.map(|_| ())
    }
}

#[async_trait]
impl CouponApi for StorefrontClient {
    async fn fetch(&self, code: &str) -> Result<Option<Coupon>, ApiError> {
        let request = self.request(Method::GET, self.url(&["coupons", code]), None);
        match Self::data(request).await {
            Ok(coupon) => Ok(Some(coupon)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn register_usage(
        &self,
        identity: &Identity,
        code: &str,
        order_id: Uuid,
    ) -> Result<(), ApiError> {
        let request = self
            .request(
                Method::PATCH,
                self.url(&["coupons", "update-count", code]),
                Some(identity),
            )
            .json(&UsageBody { order_id });
        Self::send(request).await.map(|_| ())
    }
}

#[async_trait]
impl OrderApi for StorefrontClient {
    async fn submit(&self, identity: &Identity, order: &OrderDraft) -> Result<Uuid, ApiError> {
        let request = self
            .request(Method::POST, self.url(&["orders"]), Some(identity))
            .json(order);
        let created: Created = Self::data(request).await?;
        Ok(created.inserted_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_are_appended_and_escaped() {
        let client = StorefrontClient::new(&ClientConfig::new("http://localhost:3000/api/")).unwrap();
        let url = client.url(&["carts", "abc-XL L"]);
        assert_eq!(url.as_str(), "http://localhost:3000/api/carts/abc-XL%20L");
    }

    #[test]
    fn not_found_maps_to_its_own_variant() {
        let body = br#"{"message":"Not Found","data":null,"meta":null}"#;
        assert_eq!(status_error(StatusCode::NOT_FOUND, body), ApiError::NotFound);
    }

    #[test]
    fn error_status_carries_envelope_message() {
        let body = br#"{"message":"Forbidden","data":null,"meta":null}"#;
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, body),
            ApiError::Status {
                status: 403,
                message: "Forbidden".into(),
            }
        );
    }

    #[test]
    fn error_status_without_envelope_uses_status_text() {
        let err = status_error(StatusCode::BAD_GATEWAY, b"<html>upstream down</html>");
        assert_eq!(
            err,
            ApiError::Status {
                status: 502,
                message: StatusCode::BAD_GATEWAY.to_string(),
            }
        );
    }

    #[test]
    fn envelope_data_is_unwrapped() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"message":"Added to cart","data":{{"inserted_id":"{id}"}},"meta":null}}"#);
        let created: Created = envelope_data(body.as_bytes()).unwrap();
        assert_eq!(created.inserted_id, id);
    }

    #[test]
    fn envelope_without_data_is_a_decode_error() {
        let body = br#"{"message":"OK","meta":null}"#;
        let err = envelope_data::<Created>(body).unwrap_err();
        assert!(matches!(err, ApiError::Decode(message) if message.contains("OK")));

        let err = envelope_data::<Created>(b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(StorefrontClient::new(&ClientConfig::new("not a url")).is_err());
    }
}
