use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::status::{PROVISIONING_STATE, STATUS, StatusField};
use crate::{ClientError, Response};

pub(crate) const HEADER_AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
pub(crate) const HEADER_OPERATION_LOCATION: &str = "operation-location";
pub(crate) const HEADER_LOCATION: &str = "location";

/// How a long-running operation reports its progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollingSignal {
    /// `Azure-AsyncOperation` header pointing at a status resource.
    AzureAsyncOperation,
    /// `Operation-Location` header pointing at a status resource.
    OperationLocation,
    /// `Location` header; `202` until the operation completes.
    Location,
    /// Re-`GET` the resource the initial `PUT`/`PATCH` targeted.
    OriginalUri,
}

/// Signals in the order they are looked for on an initial response.
pub(crate) const POLLING_PRIORITY: [PollingSignal; 4] = [
    PollingSignal::AzureAsyncOperation,
    PollingSignal::OperationLocation,
    PollingSignal::Location,
    PollingSignal::OriginalUri,
];

impl PollingSignal {
    /// Response header carrying the polling URL, if the signal is header based.
    pub(crate) fn header(self) -> Option<&'static str> {
        match self {
            Self::AzureAsyncOperation => Some(HEADER_AZURE_ASYNC_OPERATION),
            Self::OperationLocation => Some(HEADER_OPERATION_LOCATION),
            Self::Location => Some(HEADER_LOCATION),
            Self::OriginalUri => None,
        }
    }

    /// Body fields holding the operation status on polling responses.
    pub(crate) fn status_fields(self) -> &'static [StatusField] {
        match self {
            Self::AzureAsyncOperation | Self::OperationLocation => &[STATUS],
            Self::Location | Self::OriginalUri => &[PROVISIONING_STATE],
        }
    }

    /// `true` when polling reads a separate operation status resource.
    pub(crate) fn is_status_resource(self) -> bool {
        matches!(self, Self::AzureAsyncOperation | Self::OperationLocation)
    }

    fn applies_to(self, response: &Response) -> Result<Option<Url>, ClientError> {
        match self.header() {
            Some(name) => header_url(response, name),
            None => Ok((is_resource_write(response.method())
                && response.status() != StatusCode::ACCEPTED)
                .then(|| response.url().clone())),
        }
    }
}

/// Where the final result of a succeeded operation is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalStateVia {
    /// The async-operation status resource itself.
    AzureAsyncOperation,
    /// The `Operation-Location` status resource itself.
    OperationLocation,
    /// The URL from the initial `Location` header.
    Location,
    /// The URL of the initial request.
    OriginalUri,
}

/// Walks [`POLLING_PRIORITY`] and returns the first signal present on
/// `response` together with its polling URL.
pub(crate) fn discover(response: &Response) -> Result<Option<(PollingSignal, Url)>, ClientError> {
    for signal in POLLING_PRIORITY {
        if let Some(url) = signal.applies_to(response)? {
            return Ok(Some((signal, url)));
        }
    }
    Ok(None)
}

/// Picks the URL holding the final payload, or `None` when the last polling
/// response carries it.
pub(crate) fn result_url(
    response: &Response,
    final_state_via: Option<FinalStateVia>,
) -> Result<Option<Url>, ClientError> {
    let location = header_url(response, HEADER_LOCATION)?;
    let original = response.url().clone();
    Ok(match final_state_via {
        Some(FinalStateVia::AzureAsyncOperation | FinalStateVia::OperationLocation) => None,
        Some(FinalStateVia::OriginalUri) => Some(original),
        Some(FinalStateVia::Location) => location.or_else(|| default_result_url(response, original, None)),
        None => default_result_url(response, original, location),
    })
}

fn default_result_url(response: &Response, original: Url, location: Option<Url>) -> Option<Url> {
    if is_resource_write(response.method()) {
        Some(original)
    } else if *response.method() == Method::POST {
        location
    } else {
        None
    }
}

fn is_resource_write(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::PATCH
}

/// Reads an absolute URL from header `name`.
///
/// A missing or empty header is `None`; anything that is not an absolute URL
/// is an invalid response.
pub(crate) fn header_url(response: &Response, name: &str) -> Result<Option<Url>, ClientError> {
    let Some(value) = response.headers().get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| ClientError::InvalidResponse(format!("{name} header is not valid text")))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    Url::parse(text)
        .map(Some)
        .map_err(|_| ClientError::InvalidResponse(format!("invalid polling URL '{text}' in {name}")))
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::{FinalStateVia, PollingSignal, discover, result_url};
    use crate::ClientError;
    use crate::test_support::Reply;

    const RESOURCE: &str = "https://management.example.com/widgets/w1";
    const OPERATION: &str = "https://management.example.com/operations/op1";
    const LOCATION: &str = "https://management.example.com/results/r1";

    #[test]
    fn async_operation_header_wins_over_location() {
        let response = Reply::status(202)
            .header("location", LOCATION)
            .header("azure-asyncoperation", OPERATION)
            .for_request(Method::DELETE, RESOURCE);
        let (signal, url) = discover(&response).expect("valid").expect("signal");
        assert_eq!(signal, PollingSignal::AzureAsyncOperation);
        assert_eq!(url.as_str(), OPERATION);
    }

    #[test]
    fn operation_location_wins_over_location() {
        let response = Reply::status(202)
            .header("location", LOCATION)
            .header("operation-location", OPERATION)
            .for_request(Method::POST, RESOURCE);
        let (signal, _) = discover(&response).expect("valid").expect("signal");
        assert_eq!(signal, PollingSignal::OperationLocation);
    }

    #[test]
    fn original_uri_only_for_put_and_patch() {
        let put = Reply::status(201).for_request(Method::PUT, RESOURCE);
        let (signal, url) = discover(&put).expect("valid").expect("signal");
        assert_eq!(signal, PollingSignal::OriginalUri);
        assert_eq!(url.as_str(), RESOURCE);

        let delete = Reply::status(200).for_request(Method::DELETE, RESOURCE);
        assert!(discover(&delete).expect("valid").is_none());

        let accepted = Reply::status(202).for_request(Method::PUT, RESOURCE);
        assert!(discover(&accepted).expect("valid").is_none());
    }

    #[test]
    fn relative_polling_url_is_invalid() {
        let response = Reply::status(202)
            .header("location", "/operations/op1")
            .for_request(Method::DELETE, RESOURCE);
        let error = discover(&response).expect_err("relative url");
        assert!(matches!(error, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn result_url_defaults_follow_the_method() {
        let put = Reply::status(201)
            .header("azure-asyncoperation", OPERATION)
            .for_request(Method::PUT, RESOURCE);
        assert_eq!(
            result_url(&put, None).expect("valid").map(String::from),
            Some(RESOURCE.to_owned())
        );

        let post = Reply::status(202)
            .header("azure-asyncoperation", OPERATION)
            .header("location", LOCATION)
            .for_request(Method::POST, RESOURCE);
        assert_eq!(
            result_url(&post, None).expect("valid").map(String::from),
            Some(LOCATION.to_owned())
        );

        let delete = Reply::status(202)
            .header("location", LOCATION)
            .for_request(Method::DELETE, RESOURCE);
        assert_eq!(result_url(&delete, None).expect("valid"), None);
    }

    #[test]
    fn final_state_via_overrides_defaults() {
        let post = Reply::status(202)
            .header("azure-asyncoperation", OPERATION)
            .header("location", LOCATION)
            .for_request(Method::POST, RESOURCE);
        assert_eq!(
            result_url(&post, Some(FinalStateVia::AzureAsyncOperation)).expect("valid"),
            None
        );
        assert_eq!(
            result_url(&post, Some(FinalStateVia::OriginalUri))
                .expect("valid")
                .map(String::from),
            Some(RESOURCE.to_owned())
        );
    }
}
