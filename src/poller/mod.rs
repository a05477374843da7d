//! Long-running operation pollers.
//!
//! A [`Poller`] wraps the reply to a request that started a long-running
//! operation (typically `201`/`202` with a polling header) and follows the
//! operation until it succeeds, fails or is canceled.
//!
//! Three progress conventions are supported, looked for in this order:
//! `Azure-AsyncOperation` / `Operation-Location` status resources, the
//! `Location` header, and re-reading the resource a `PUT`/`PATCH` targeted.
//! A poller can be exported as a resume token at any point and rebuilt from
//! it in another process without repeating the initial request.

mod signal;
mod token;

use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::pipeline::{decode_body, service_error_details};
use crate::status::{self, PROVISIONING_STATE, StatusTable, is_polling_status, retry_after};
use crate::{ClientError, Context, OperationError, OperationStatus, Pipeline, Request, Response};

pub use signal::{FinalStateVia, PollingSignal};
use token::{ResumeToken, TOKEN_VERSION, token_url};

/// Interval between polls when the service sends no retry hint.
pub const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(30);

/// Construction options for [`Poller`].
#[derive(Clone, Debug)]
pub struct PollerOptions {
    /// Where the final payload is read from; method-based default when unset.
    pub final_state_via: Option<FinalStateVia>,
    /// Name recorded in resume tokens. When set on both sides, resuming a token
    /// produced for another operation fails.
    pub operation: Option<String>,
    /// Vocabulary used to interpret status strings.
    pub status_table: StatusTable,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            final_state_via: None,
            operation: None,
            status_table: StatusTable::resource_manager(),
        }
    }
}

impl PollerOptions {
    #[must_use]
    pub fn with_final_state_via(mut self, final_state_via: FinalStateVia) -> Self {
        self.final_state_via = Some(final_state_via);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[must_use]
    pub fn with_status_table(mut self, status_table: StatusTable) -> Self {
        self.status_table = status_table;
        self
    }
}

/// Options for [`Poller::poll_until_done`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollUntilDoneOptions {
    /// Delay between polls unless the service suggests one.
    pub frequency: Duration,
}

impl Default for PollUntilDoneOptions {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_POLL_FREQUENCY,
        }
    }
}

impl PollUntilDoneOptions {
    #[must_use]
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }
}

enum Outcome {
    /// Body the result is decoded from.
    Succeeded(Bytes),
    Failed(OperationError),
}

/// Completion handle for a long-running operation producing a `T`.
///
/// Once the operation reaches a terminal state the poller never touches the
/// network for polling again; the final payload is fetched at most once and
/// then decoded from its cached body.
pub struct Poller<T> {
    pipeline: Pipeline,
    options: PollerOptions,
    method: Method,
    initial_url: Url,
    polling_url: Url,
    result_url: Option<Url>,
    signal: PollingSignal,
    status: OperationStatus,
    attempts: u32,
    last_response: Option<Response>,
    outcome: Option<Outcome>,
    _result: PhantomData<fn() -> T>,
}

impl<T> Poller<T> {
    /// `true` once the operation succeeded, failed or was canceled.
    pub fn done(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn polling_signal(&self) -> PollingSignal {
        self.signal
    }

    pub fn polling_url(&self) -> &Url {
        &self.polling_url
    }

    /// Most recent response: the initial one, or the latest poll.
    ///
    /// `None` for a poller rebuilt from a resume token that has not polled yet.
    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Exports the poller state as an opaque string for
    /// [`Poller::from_resume_token`].
    pub fn resume_token(&self) -> Result<String, ClientError> {
        ResumeToken {
            version: TOKEN_VERSION,
            operation: self.options.operation.clone(),
            method: self.method.to_string(),
            initial_url: self.initial_url.to_string(),
            polling_url: self.polling_url.to_string(),
            result_url: self.result_url.as_ref().map(Url::to_string),
            signal: self.signal,
            final_state_via: self.options.final_state_via,
            status: self.status,
        }
        .encode()
    }
}

impl<T: DeserializeOwned> Poller<T> {
    /// Wraps the response of the request that started the operation.
    ///
    /// Fails with [`ClientError::HttpStatus`] for an error status and with
    /// [`ClientError::InvalidResponse`] when the response neither says how to
    /// follow the operation nor reports it as complete.
    pub fn new(
        pipeline: Pipeline,
        response: Response,
        options: PollerOptions,
    ) -> Result<Self, ClientError> {
        if !is_polling_status(response.status()) {
            return Err(response.into_error());
        }

        let body = response.body_value();
        let result_url = signal::result_url(&response, options.final_state_via)?;
        let (signal, polling_url, status) = match signal::discover(&response)? {
            Some((signal, url)) if signal.header().is_some() => {
                (signal, url, OperationStatus::InProgress)
            }
            discovered => {
                let status = status::classify(
                    response.status(),
                    body.as_ref(),
                    &[PROVISIONING_STATE],
                    &options.status_table,
                )?;
                match discovered {
                    Some((signal, url)) => (signal, url, status),
                    None if status.is_terminal() => {
                        (PollingSignal::OriginalUri, response.url().clone(), status)
                    }
                    None => {
                        return Err(ClientError::InvalidResponse(format!(
                            "{} response to {} {} has no polling header",
                            response.status(),
                            response.method(),
                            response.url()
                        )));
                    }
                }
            }
        };

        debug!(
            method = %response.method(),
            url = %response.url(),
            ?signal,
            polling_url = %polling_url,
            %status,
            "created poller"
        );

        let mut poller = Self {
            pipeline,
            method: response.method().clone(),
            initial_url: response.url().clone(),
            polling_url,
            result_url,
            signal,
            status,
            attempts: 0,
            last_response: None,
            outcome: None,
            options,
            _result: PhantomData,
        };
        poller.settle(&response, body.as_ref());
        poller.last_response = Some(response);
        Ok(poller)
    }

    /// Rebuilds a poller from [`Poller::resume_token`] output without any
    /// network call.
    pub fn from_resume_token(
        pipeline: Pipeline,
        token: &str,
        options: PollerOptions,
    ) -> Result<Self, ClientError> {
        let token = ResumeToken::decode(token)?;
        if let (Some(expected), Some(found)) = (&options.operation, &token.operation)
            && expected != found
        {
            return Err(ClientError::MalformedToken(format!(
                "token was produced for operation '{found}', not '{expected}'"
            )));
        }

        let method = Method::from_bytes(token.method.as_bytes())
            .map_err(|_| ClientError::MalformedToken(format!("invalid method '{}'", token.method)))?;
        let initial_url = token_url("initialUrl", &token.initial_url)?;
        let polling_url = token_url("pollingUrl", &token.polling_url)?;
        let result_url = token
            .result_url
            .as_deref()
            .map(|url| token_url("resultUrl", url))
            .transpose()?;

        debug!(%method, polling_url = %polling_url, status = %token.status, "resumed poller");

        Ok(Self {
            pipeline,
            options: PollerOptions {
                final_state_via: token.final_state_via,
                operation: token.operation,
                status_table: options.status_table,
            },
            method,
            initial_url,
            polling_url,
            result_url,
            signal: token.signal,
            status: token.status,
            attempts: 0,
            last_response: None,
            outcome: None,
            _result: PhantomData,
        })
    }

    /// Sends one status request and reports whether the operation is done.
    ///
    /// A done poller answers `true` without a request. Error statuses are
    /// returned as [`ClientError::HttpStatus`] and leave the poller as it was,
    /// so a throttled poll can simply be retried.
    pub async fn poll(&mut self, ctx: &Context) -> Result<bool, ClientError> {
        if self.done() {
            return Ok(true);
        }
        ctx.check()?;

        self.attempts += 1;
        let response = self
            .pipeline
            .send(ctx, Request::get(self.polling_url.clone()))
            .await?;
        if !is_polling_status(response.status()) {
            return Err(response.into_error());
        }

        let body = response.body_value();
        let status = status::classify(
            response.status(),
            body.as_ref(),
            self.signal.status_fields(),
            &self.options.status_table,
        )?;
        if self.signal == PollingSignal::Location
            && let Some(url) = signal::header_url(&response, signal::HEADER_LOCATION)?
        {
            if self.result_url.as_ref() == Some(&self.polling_url) {
                self.result_url = Some(url.clone());
            }
            self.polling_url = url;
        }

        debug!(
            attempt = self.attempts,
            url = %response.url(),
            code = response.status().as_u16(),
            %status,
            "polled operation"
        );
        self.status = status;
        self.settle(&response, body.as_ref());
        self.last_response = Some(response);
        Ok(self.done())
    }

    /// Polls until the operation is done and returns its result.
    ///
    /// Waits between polls for the service's retry hint, falling back to
    /// `options.frequency`. A `Retry-After` on the initial response is honoured
    /// before the first poll. Canceling `ctx` ends the wait immediately.
    pub async fn poll_until_done(
        &mut self,
        ctx: &Context,
        options: PollUntilDoneOptions,
    ) -> Result<T, ClientError> {
        if !self.done() {
            if self.attempts == 0
                && let Some(delay) = self.server_delay()
            {
                trace!(?delay, "honouring initial retry hint");
                ctx.sleep(delay).await?;
            }
            while !self.poll(ctx).await? {
                let delay = self.server_delay().unwrap_or(options.frequency);
                trace!(?delay, "waiting before next poll");
                ctx.sleep(delay).await?;
            }
        }
        self.result(ctx).await
    }

    /// Result of a done operation.
    ///
    /// Fails with [`ClientError::NotDone`] before the operation is terminal
    /// and with [`ClientError::OperationFailed`] when it failed or was
    /// canceled. When the payload lives at a separate result URL it is fetched
    /// on the first call only.
    pub async fn result(&mut self, ctx: &Context) -> Result<T, ClientError> {
        match &self.outcome {
            Some(Outcome::Succeeded(body)) => return decode_body(body),
            Some(Outcome::Failed(error)) => return Err(ClientError::OperationFailed(error.clone())),
            None => {}
        }
        if !self.done() {
            return Err(ClientError::NotDone);
        }
        if self.status.is_failure() {
            let error = OperationError {
                status: self.status,
                code: None,
                message: None,
            };
            self.outcome = Some(Outcome::Failed(error.clone()));
            return Err(ClientError::OperationFailed(error));
        }

        if self.result_url.is_none() && !self.status_body_is_result() {
            self.outcome = Some(Outcome::Succeeded(Bytes::new()));
            return decode_body(&[]);
        }
        let url = self
            .result_url
            .clone()
            .unwrap_or_else(|| self.polling_url.clone());
        debug!(url = %url, "fetching operation result");
        let response = self.pipeline.send(ctx, Request::get(url)).await?;
        if !response.status().is_success() {
            return Err(response.into_error());
        }
        let body = response.body().clone();
        let value = decode_body(&body)?;
        self.outcome = Some(Outcome::Succeeded(body));
        self.last_response = Some(response);
        Ok(value)
    }

    /// Records the outcome once `self.status` is terminal.
    fn settle(&mut self, response: &Response, body: Option<&serde_json::Value>) {
        if self.status.is_success() {
            match &self.result_url {
                Some(url) if url != response.url() => {}
                None if !self.status_body_is_result() => {
                    self.outcome = Some(Outcome::Succeeded(Bytes::new()));
                }
                _ => self.outcome = Some(Outcome::Succeeded(response.body().clone())),
            }
        } else if self.status.is_failure() {
            let (code, message) = service_error_details(response, body);
            self.outcome = Some(Outcome::Failed(OperationError {
                status: self.status,
                code,
                message,
            }));
        }
    }

    /// Whether the last polling body is the payload when no result URL
    /// applies. A status resource only is when explicitly selected.
    fn status_body_is_result(&self) -> bool {
        !self.signal.is_status_resource()
            || matches!(
                self.options.final_state_via,
                Some(FinalStateVia::AzureAsyncOperation | FinalStateVia::OperationLocation)
            )
    }

    fn server_delay(&self) -> Option<Duration> {
        self.last_response
            .as_ref()
            .and_then(|response| retry_after(response.headers()))
    }
}
