//! List every resource in a subscription, following `nextLink`.
//!
//! Run:
//! `cargo run --example list_resources`
//!
//! Required env vars:
//! - `ARM_SUBSCRIPTION_ID`
//! - `ARM_ACCESS_TOKEN`
//!
//! Optional env vars:
//! - `ARM_BASE_URL` (defaults to `https://management.azure.com/`)
//! - `ARM_PAGE_SIZE` (defaults to `20`)

use armcore::{Context, ItemPager, Pipeline};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Resource {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var("ARM_BASE_URL")
        .unwrap_or_else(|_| "https://management.azure.com/".to_owned());
    let subscription = std::env::var("ARM_SUBSCRIPTION_ID")?;
    let token = std::env::var("ARM_ACCESS_TOKEN")?;
    let page_size = std::env::var("ARM_PAGE_SIZE").unwrap_or_else(|_| "20".to_owned());

    let pipeline = Pipeline::new(base_url)?.with_authorization_token(token);
    let ctx = Context::background();
    let pager = pipeline.list::<Resource>(&format!(
        "subscriptions/{subscription}/resources?api-version=2021-04-01&$top={page_size}"
    ))?;

    let mut resources = ItemPager::new(&ctx, pager).await?;
    while let Some(resource) = resources.value() {
        println!("{:<40} {}", resource.name, resource.kind);
        resources.next(&ctx).await?;
    }
    Ok(())
}
