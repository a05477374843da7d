//! In-memory transport replaying scripted responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};

use crate::{ClientError, Context, Pipeline, Request, Response, Transport};

pub(crate) const BASE_URL: &str = "https://management.example.com/";

/// A scripted reply, turned into a [`Response`] for whichever request
/// consumes it.
#[derive(Clone, Debug)]
pub(crate) struct Reply {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Reply {
    pub(crate) fn status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).expect("valid status code"),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub(crate) fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn for_request(self, method: Method, url: &str) -> Response {
        let url = Url::parse(url).expect("valid url");
        self.into_response(method, url)
    }

    fn into_response(self, method: Method, url: Url) -> Response {
        self.headers.into_iter().fold(
            Response::new(self.status, method, url).with_body(self.body),
            |response, (name, value)| {
                response.with_header(
                    HeaderName::from_static(name),
                    HeaderValue::from_str(&value).expect("valid header value"),
                )
            },
        )
    }
}

#[derive(Debug)]
enum Step {
    Reply(Reply),
    Fail(String),
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        let transport = Self::default();
        transport
            .steps
            .lock()
            .expect("script lock")
            .extend(replies.into_iter().map(Step::Reply));
        Arc::new(transport)
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(Step::Reply(reply));
    }

    pub(crate) fn push_failure(&self, message: &str) {
        self.steps
            .lock()
            .expect("script lock")
            .push_back(Step::Fail(message.to_owned()));
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("request lock").clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().expect("request lock").len()
    }

    pub(crate) fn pipeline(self: &Arc<Self>) -> Pipeline {
        Pipeline::new(BASE_URL)
            .expect("valid base url")
            .with_transport(self.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _ctx: &Context, request: Request) -> Result<Response, ClientError> {
        self.requests
            .lock()
            .expect("request lock")
            .push(request.clone());
        let step = self.steps.lock().expect("script lock").pop_front();
        match step {
            Some(Step::Reply(reply)) => {
                Ok(reply.into_response(request.method().clone(), request.url().clone()))
            }
            Some(Step::Fail(message)) => Err(ClientError::transport(message)),
            None => Err(ClientError::transport(format!(
                "no scripted response for {} {}",
                request.method(),
                request.url()
            ))),
        }
    }
}
