use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;

use crate::config::ApiConfig;
use crate::core::models::Student;
use crate::error::Error;
use crate::source::{AuthTransport, LoginPayload, MessagePayload, RemoteSource, TokenPairPayload};

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    push_token: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct DeviceTokenRequest<'a> {
    token: &'a str,
}

/// HTTP client for the school-messaging REST API. Every request carries the
/// configured timeout; a timeout surfaces as a network error and the sync
/// layer falls back to cache.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, Error> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(ApiClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-2xx onto the error taxonomy, keeping the body for the log.
    async fn check(resp: Response) -> Result<Response, Error> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::from_status(status, &body))
    }
}

#[async_trait]
impl AuthTransport for ApiClient {
    async fn login(
        &self,
        identifier: &str,
        secret: &str,
        push_token: Option<&str>,
    ) -> Result<LoginPayload, Error> {
        let resp = self
            .http
            .post(self.url("/login"))
            .json(&LoginRequest {
                identifier,
                secret,
                push_token,
            })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPairPayload, Error> {
        let resp = self
            .http
            .post(self.url("/refresh-token"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), Error> {
        let resp = self
            .http
            .post(self.url("/revoke"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn register_device_token(&self, access_token: &str, token: &str) -> Result<(), Error> {
        let resp = self
            .http
            .post(self.url("/device-token"))
            .bearer_auth(access_token)
            .json(&DeviceTokenRequest { token })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for ApiClient {
    async fn list_students(&self, access_token: &str) -> Result<Vec<Student>, Error> {
        let resp = self
            .http
            .get(self.url("/students"))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_messages(
        &self,
        access_token: &str,
        student_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, Error> {
        let resp = self
            .http
            .get(self.url(&format!("/students/{student_id}/messages")))
            .query(&[("offset", offset), ("limit", limit)])
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn mark_read(
        &self,
        access_token: &str,
        student_id: i64,
        message_id: i64,
    ) -> Result<(), Error> {
        let resp = self
            .http
            .post(self.url(&format!(
                "/students/{student_id}/messages/{message_id}/read"
            )))
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
