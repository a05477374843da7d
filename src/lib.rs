//! Core runtime for Azure Resource Manager style REST clients.
//!
//! Public API layers:
//! - [`Pipeline`]: base URL, credentials and a pluggable [`Transport`].
//! - [`Poller`]: follows a long-running operation to completion and can be
//!   suspended into a resume token.
//! - [`Pager`]/[`ItemPager`]: page-by-page and item-by-item iteration over
//!   paged collections.
//! - [`Context`]: cancellation and deadlines for every call that waits.
//! - [`ClientError`]: unified error type used by all of the above.

mod context;
mod error;
mod pager;
mod pipeline;
mod poller;
mod status;

#[cfg(test)]
mod test_support;

/// Cancellation and deadline propagation.
pub use context::Context;
/// Error types returned by all client operations.
pub use error::{BoxError, ClientError, OperationError};
/// Paged iteration.
pub use pager::{ItemPager, NextLinkPage, Page, Pager, PagingHandler};
/// Request pipeline and transports.
pub use pipeline::{HttpTransport, Pipeline, Request, Response, Transport};
/// Long-running operations.
pub use poller::{
    DEFAULT_POLL_FREQUENCY, FinalStateVia, PollUntilDoneOptions, Poller, PollerOptions,
    PollingSignal,
};
pub use status::{OperationStatus, StatusTable, retry_after};
