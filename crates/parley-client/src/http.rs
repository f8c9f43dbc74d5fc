//! HTTP client for the chat server.
//!
//! This module provides `HttpChatApi`, the reqwest-backed implementation of
//! [`ChatApi`](crate::ChatApi).

use async_trait::async_trait;
use parley_core::{ConversationId, ConversationStatus, CustomerId, EmployeeId, Message};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::types::{
    ApiErrorResponse, ClaimRequest, ConversationSummary, GuestRequest, MessagePage,
    SendMessageRequest, StatusResponse,
};

/// HTTP client for the chat server's REST API.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatApi {
    /// Create a new client from connection settings.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Create a new client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    /// Get the base URL of the chat server.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/conversations{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn error_from(response: Response) -> ApiError {
        let status = response.status();
        let url = response.url().path().to_string();
        let message = response
            .json::<ApiErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("server returned status {status}"));

        if status == StatusCode::CONFLICT {
            tracing::debug!(path = %url, error = %message, "Request conflicted");
            return ApiError::Conflict(message);
        }

        tracing::error!(
            path = %url,
            status = %status,
            error = %message,
            "Chat server request failed"
        );

        ApiError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: u32,
    ) -> Result<MessagePage> {
        let request = self
            .client
            .get(self.url(&format!("/{conversation_id}/messages")))
            .query(&[("page", page), ("size", size)]);

        let page_body: MessagePage = self.execute_json(request).await?;
        tracing::debug!(
            conversation_id = %conversation_id,
            page,
            count = page_body.content.len(),
            last = page_body.last,
            "Fetched message page"
        );
        Ok(page_body)
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        let builder = self.client.post(self.url("/messages")).json(request);
        let message: Message = self.execute_json(builder).await?;
        tracing::debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            "Message accepted"
        );
        Ok(message)
    }

    async fn fetch_status(&self, conversation_id: ConversationId) -> Result<ConversationStatus> {
        let request = self
            .client
            .get(self.url(&format!("/{conversation_id}/status")));
        let body: StatusResponse = self.execute_json(request).await?;
        Ok(body.status)
    }

    async fn claim_conversation(
        &self,
        conversation_id: ConversationId,
        agent_id: EmployeeId,
    ) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/{conversation_id}/claim")))
            .json(&ClaimRequest { agent_id });
        self.execute(request).await?;
        tracing::debug!(conversation_id = %conversation_id, agent_id = %agent_id, "Claimed conversation");
        Ok(())
    }

    async fn release_to_bot(&self, conversation_id: ConversationId) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/{conversation_id}/release")));
        self.execute(request).await?;
        tracing::debug!(conversation_id = %conversation_id, "Released conversation to bot");
        Ok(())
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/{conversation_id}/read")));
        self.execute(request).await.map(drop)
    }

    async fn start_guest_conversation(
        &self,
        customer_id: Option<CustomerId>,
    ) -> Result<ConversationSummary> {
        let request = self
            .client
            .post(self.url("/guest"))
            .json(&GuestRequest { customer_id });
        let summary: ConversationSummary = self.execute_json(request).await?;
        tracing::debug!(conversation_id = %summary.id, "Started guest conversation");
        Ok(summary)
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>> {
        let mut request = self.client.get(self.url(""));
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        self.execute_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{MessageId, SenderRole, ServerMessageId};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(uri: &str) -> HttpChatApi {
        HttpChatApi::new(&ClientConfig::new(uri).with_token("secret")).unwrap()
    }

    fn message_json(id: u64, role: &str, content: &str) -> serde_json::Value {
        json!({
            "id": id,
            "conversationId": 42,
            "senderRole": role,
            "content": content,
            "createdAt": "2024-01-01T12:00:00Z"
        })
    }

    #[tokio::test]
    async fn fetch_messages_sends_paging_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/conversations/42/messages"))
            .and(query_param("page", "1"))
            .and(query_param("size", "20"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [message_json(9001, "AI", "Soup."), message_json(8801, "CUSTOMER", "Menu?")],
                "last": true
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let page = client
            .fetch_messages(ConversationId::new(42), 1, 20)
            .await
            .unwrap();

        assert!(page.last);
        assert_eq!(page.content.len(), 2);
        assert_eq!(
            page.content[0].id,
            MessageId::Server(ServerMessageId::new(9001))
        );
    }

    #[tokio::test]
    async fn send_message_posts_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/conversations/messages"))
            .and(body_json(json!({
                "conversationId": 42,
                "senderRole": "CUSTOMER",
                "content": "Menu?",
                "lang": "en",
                "idempotencyKey": "abc"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(message_json(8801, "CUSTOMER", "Menu?")),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let message = client
            .send_message(&SendMessageRequest {
                conversation_id: Some(ConversationId::new(42)),
                sender_role: SenderRole::Customer,
                content: "Menu?".to_string(),
                lang: "en".to_string(),
                idempotency_key: Some("abc".to_string()),
                customer_id: None,
                employee_id: None,
            })
            .await
            .unwrap();

        assert_eq!(message.sender_role, SenderRole::Customer);
        assert!(!message.is_local());
    }

    #[tokio::test]
    async fn claim_conflict_maps_to_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/conversations/42/claim"))
            .and(body_json(json!({"agentId": 7})))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"error": "already claimed"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .claim_conversation(ConversationId::new(42), EmployeeId::new(7))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Conflict(ref m) if m == "already claimed"));
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/conversations/42/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .fetch_status(ConversationId::new(42))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn fetch_status_parses_wire_name() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/conversations/42/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "WAITING_AGENT"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let status = client.fetch_status(ConversationId::new(42)).await.unwrap();
        assert_eq!(status, ConversationStatus::WaitingAgent);
    }

    #[tokio::test]
    async fn list_conversations_filters_by_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/conversations"))
            .and(query_param("status", "WAITING_AGENT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 42, "status": "WAITING_AGENT"},
                {"id": 43, "status": "WAITING_AGENT", "customerId": 5}
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let list = client
            .list_conversations(Some(ConversationStatus::WaitingAgent))
            .await
            .unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[1].customer_id, Some(CustomerId::new(5)));
    }

    #[tokio::test]
    async fn guest_conversation_returns_summary() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/conversations/guest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let summary = client.start_guest_conversation(None).await.unwrap();
        assert_eq!(summary.id, ConversationId::new(42));
        assert_eq!(summary.status, ConversationStatus::Ai);
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/conversations/42/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .fetch_messages(ConversationId::new(42), 0, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
    }
}
