use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::pager::{NextLinkHandler, NextLinkPage, Pager};
use crate::poller::{Poller, PollerOptions};
use crate::{ClientError, Context};

const HEADER_ERROR_CODE: &str = "x-ms-error-code";

/// An outgoing HTTP request.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serializes `body` as the JSON request payload.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ClientError> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// A fully buffered HTTP response, together with the method and URL of the
/// request that produced it.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    method: Method,
    url: Url,
}

impl Response {
    pub fn new(status: StatusCode, method: Method, url: Url) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            method,
            url,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Method of the request this response answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL of the request this response answers.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the value of `name` when present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn has_status_code(&self, codes: &[StatusCode]) -> bool {
        codes.contains(&self.status)
    }

    /// Parses the body as JSON.
    ///
    /// An empty body is parsed as JSON `null`, so `()` and `Option<_>` targets
    /// accept bodiless responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        decode_body(&self.body)
    }

    /// The body as a JSON value, or `None` when it is empty or not JSON.
    pub(crate) fn body_value(&self) -> Option<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Converts a non-success response into [`ClientError::HttpStatus`].
    pub fn into_error(self) -> ClientError {
        let (code, _) = service_error_details(&self, self.body_value().as_ref());
        ClientError::HttpStatus {
            status: self.status,
            code,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

pub(crate) fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(serde_json::from_value(Value::Null)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Extracts the service error code and message.
///
/// The code comes from the `x-ms-error-code` header when present, else from
/// `error.code` or a top-level `code` in the body.
pub(crate) fn service_error_details(
    response: &Response,
    body: Option<&Value>,
) -> (Option<String>, Option<String>) {
    let field = |name: &str| {
        body.and_then(|value| {
            value
                .pointer(&format!("/error/{name}"))
                .or_else(|| value.get(name))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
    };
    let code = response
        .header_str(HEADER_ERROR_CODE)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| field("code"));
    (code, field("message"))
}

/// The send capability consumed by pollers and pagers.
///
/// Implementations own connection management and any transport-level retry.
/// They should stop waiting on the network once `ctx` is canceled.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    async fn send(&self, ctx: &Context, request: Request) -> Result<Response, ClientError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, ctx: &Context, request: Request) -> Result<Response, ClientError> {
        let Request {
            method,
            url,
            headers,
            body,
        } = request;
        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let (status, headers, body) = ctx
            .run(async {
                let response = builder.send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await?;
                Ok::<_, reqwest::Error>((status, headers, body))
            })
            .await??;

        Ok(Response::new(status, method, url)
            .with_headers(headers)
            .with_body(body))
    }
}

/// Shared request pipeline: base URL, credentials and transport.
///
/// Cloning is cheap; every clone shares the same transport. Generated
/// clients hold one pipeline and hand clones to the pollers and pagers they
/// create.
#[derive(Clone, Debug)]
pub struct Pipeline {
    base_url: Url,
    authorization_token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Creates a pipeline with the given base URL and a default
    /// [`HttpTransport`].
    ///
    /// The URL is normalized to include a trailing slash, so relative endpoint
    /// paths join correctly.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url.as_ref())
            .map_err(|_| ClientError::InvalidBaseUrl(base_url.as_ref().to_owned()))?;

        Ok(Self {
            base_url: ensure_trailing_slash(parsed),
            authorization_token: None,
            transport: Arc::new(HttpTransport::default()),
        })
    }

    /// Returns a new pipeline that sends `Authorization: Bearer <token>` on
    /// every request.
    #[must_use]
    pub fn with_authorization_token(mut self, token: impl Into<String>) -> Self {
        self.authorization_token = Some(token.into());
        self
    }

    /// Replaces the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL.
    ///
    /// Absolute URLs (such as a server-provided `nextLink`) are returned as is.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let relative = path.trim_start_matches('/');
        self.base_url
            .join(relative)
            .map_err(|_| ClientError::InvalidPath(path.to_owned()))
    }

    /// Sends a request through the transport.
    ///
    /// The response is returned whatever its status code; callers decide what
    /// counts as success.
    pub async fn send(&self, ctx: &Context, mut request: Request) -> Result<Response, ClientError> {
        ctx.check()?;

        request
            .headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        if let Some(token) = &self.authorization_token {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(ClientError::transport)?;
            value.set_sensitive(true);
            request.headers.insert(header::AUTHORIZATION, value);
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.send(ctx, request).await?;
        debug!(
            method = %response.method(),
            url = %response.url(),
            status = response.status().as_u16(),
            "received response"
        );
        Ok(response)
    }

    /// Sends a request with an optional JSON body and parses the JSON reply.
    ///
    /// Non-success statuses are returned as [`ClientError::HttpStatus`].
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let response = self.send(ctx, self.build_request(method, path, body)?).await?;
        if !response.status().is_success() {
            return Err(response.into_error());
        }
        response.json()
    }

    /// Sends the initiating request of a long-running operation and wraps the
    /// reply in a [`Poller`].
    pub async fn begin<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: PollerOptions,
    ) -> Result<Poller<T>, ClientError> {
        let response = self.send(ctx, self.build_request(method, path, body)?).await?;
        Poller::new(self.clone(), response, options)
    }

    /// Returns a pager over a `{ "value": [...], "nextLink": ... }` collection.
    ///
    /// No request is sent until the first page is requested.
    pub fn list<T>(&self, path: &str) -> Result<Pager<NextLinkPage<T>>, ClientError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let first = self.endpoint(path)?;
        Ok(Pager::new(NextLinkHandler::new(self.clone(), first)))
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Request, ClientError> {
        let request = Request::new(method, self.endpoint(path)?);
        match body {
            Some(json_body) => request.with_json(json_body),
            None => Ok(request),
        }
    }
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_owned();
        path.push('/');
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    use super::Pipeline;
    use crate::test_support::{Reply, ScriptedTransport};
    use crate::{ClientError, Context};

    #[test]
    fn joins_paths_from_base_with_nested_prefix() {
        let pipeline = Pipeline::new("https://example.com/api/v1").expect("valid url");
        let resolved = pipeline.endpoint("items").expect("valid path");
        assert_eq!(resolved.as_str(), "https://example.com/api/v1/items");
    }

    #[test]
    fn absolute_links_replace_the_base() {
        let pipeline = Pipeline::new("https://example.com/api/v1").expect("valid url");
        let resolved = pipeline
            .endpoint("https://other.example.com/items?$skiptoken=2")
            .expect("valid link");
        assert_eq!(
            resolved.as_str(),
            "https://other.example.com/items?$skiptoken=2"
        );
    }

    #[test]
    fn rejects_relative_base_url() {
        let error = Pipeline::new("not a url").expect_err("invalid base");
        assert!(matches!(error, ClientError::InvalidBaseUrl(_)));
    }

    #[tokio::test]
    async fn send_attaches_bearer_token_and_json_body() {
        let transport = ScriptedTransport::new([Reply::status(200).body(r#"{"name":"a"}"#)]);
        let pipeline = Pipeline::new("https://example.com/")
            .expect("valid url")
            .with_authorization_token("secret")
            .with_transport(transport.clone());

        let value: serde_json::Value = pipeline
            .request_json(
                &Context::background(),
                Method::PUT,
                "/items/a",
                Some(&json!({"size": 1})),
            )
            .await
            .expect("request succeeds");
        assert_eq!(value, json!({"name": "a"}));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(*request.method(), Method::PUT);
        assert_eq!(request.url().as_str(), "https://example.com/items/a");
        assert_eq!(
            request.headers().get(AUTHORIZATION).expect("auth header"),
            "Bearer secret"
        );
        assert_eq!(
            request.headers().get(CONTENT_TYPE).expect("content type"),
            "application/json"
        );
        assert_eq!(
            request.body().map(|body| body.as_ref()),
            Some(br#"{"size":1}"#.as_slice())
        );
    }

    #[tokio::test]
    async fn non_success_status_carries_service_error_code() {
        let transport = ScriptedTransport::new([Reply::status(404)
            .body(r#"{"error":{"code":"ResourceNotFound","message":"gone"}}"#)]);
        let pipeline = Pipeline::new("https://example.com/")
            .expect("valid url")
            .with_transport(transport);

        let error = pipeline
            .request_json::<serde_json::Value>(&Context::background(), Method::GET, "items/x", None)
            .await
            .expect_err("404 is an error");
        match error {
            ClientError::HttpStatus { status, code, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(code.as_deref(), Some("ResourceNotFound"));
                assert!(body.contains("gone"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn error_code_header_wins_over_body() {
        let transport = ScriptedTransport::new([Reply::status(409)
            .header("x-ms-error-code", "Conflict")
            .body(r#"{"code":"ErrorItsBroken"}"#)]);
        let pipeline = Pipeline::new("https://example.com/")
            .expect("valid url")
            .with_transport(transport);

        let error = pipeline
            .request_json::<()>(&Context::background(), Method::DELETE, "items/x", None)
            .await
            .expect_err("409 is an error");
        assert!(matches!(
            error,
            ClientError::HttpStatus { code: Some(ref code), .. } if code == "Conflict"
        ));
    }

    #[tokio::test]
    async fn canceled_context_sends_nothing() {
        let transport = ScriptedTransport::new([Reply::status(200)]);
        let pipeline = Pipeline::new("https://example.com/")
            .expect("valid url")
            .with_transport(transport.clone());
        let ctx = Context::background();
        ctx.cancel();

        let error = pipeline
            .request_json::<()>(&ctx, Method::GET, "items", None)
            .await
            .expect_err("canceled");
        assert!(matches!(error, ClientError::Canceled));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let response = Reply::status(204).for_request(Method::DELETE, "https://example.com/x");
        let (): () = response.json().expect("unit from empty body");
        let missing: Option<u32> = response.json().expect("option from empty body");
        assert_eq!(missing, None);
    }
}
