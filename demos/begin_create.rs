//! Create a resource group through a long-running `PUT` and wait for it.
//!
//! Run:
//! `cargo run --example begin_create`
//!
//! Required env vars:
//! - `ARM_SUBSCRIPTION_ID`
//! - `ARM_ACCESS_TOKEN`
//!
//! Optional env vars:
//! - `ARM_BASE_URL` (defaults to `https://management.azure.com/`)
//! - `ARM_RESOURCE_GROUP` (defaults to `armcore-demo`)
//! - `ARM_RESUME_TOKEN` (resume an operation exported by a previous run)

use std::time::Duration;

use armcore::{Context, Pipeline, PollUntilDoneOptions, Poller, PollerOptions};
use reqwest::Method;
use serde_json::json;

const OPERATION: &str = "ResourceGroups.CreateOrUpdate";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var("ARM_BASE_URL")
        .unwrap_or_else(|_| "https://management.azure.com/".to_owned());
    let subscription = std::env::var("ARM_SUBSCRIPTION_ID")?;
    let token = std::env::var("ARM_ACCESS_TOKEN")?;
    let group = std::env::var("ARM_RESOURCE_GROUP").unwrap_or_else(|_| "armcore-demo".to_owned());

    let pipeline = Pipeline::new(base_url)?.with_authorization_token(token);
    let ctx = Context::background().with_timeout(Duration::from_secs(600));
    let options = PollerOptions::default().with_operation(OPERATION);

    let mut poller: Poller<serde_json::Value> = match std::env::var("ARM_RESUME_TOKEN") {
        Ok(resume) => Poller::from_resume_token(pipeline, &resume, options)?,
        Err(_) => {
            pipeline
                .begin(
                    &ctx,
                    Method::PUT,
                    &format!(
                        "subscriptions/{subscription}/resourcegroups/{group}?api-version=2021-04-01"
                    ),
                    Some(&json!({ "location": "westus" })),
                    options,
                )
                .await?
        }
    };
    eprintln!("resume token: {}", poller.resume_token()?);

    let group = poller
        .poll_until_done(
            &ctx,
            PollUntilDoneOptions::default().with_frequency(Duration::from_secs(5)),
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&group)?);
    Ok(())
}
