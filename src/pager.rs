//! Paged result iteration.
//!
//! A [`Pager`] drives a [`PagingHandler`] one page at a time. Collections in
//! the `{ "value": [...], "nextLink": "..." }` shape get a ready-made handler
//! through [`Pipeline::list`], and [`ItemPager`] flattens any pager whose pages
//! implement [`Page`] into individual items.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::Stream;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{ClientError, Context, Pipeline, Request};

/// Fetches pages and decides whether another one exists.
#[async_trait]
pub trait PagingHandler<P>: Send + Sync {
    /// Whether a page follows `current`.
    fn more(&self, current: &P) -> bool;

    /// Fetches the first page when `current` is `None`, otherwise the page
    /// after `current`.
    async fn fetch(&self, ctx: &Context, current: Option<&P>) -> Result<P, ClientError>;
}

struct FnPagingHandler<M, F, Fut> {
    more: M,
    fetch: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<P, M, F, Fut> PagingHandler<P> for FnPagingHandler<M, F, Fut>
where
    P: Send + Sync,
    M: Fn(&P) -> bool + Send + Sync,
    F: Fn(Context, Option<&P>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<P, ClientError>> + Send + 'static,
{
    fn more(&self, current: &P) -> bool {
        (self.more)(current)
    }

    async fn fetch(&self, ctx: &Context, current: Option<&P>) -> Result<P, ClientError> {
        (self.fetch)(ctx.clone(), current).await
    }
}

/// Page-at-a-time iterator over a paged collection.
///
/// A fetch error is returned as is and leaves the current page in place, so
/// the same page can be requested again.
pub struct Pager<P> {
    handler: Box<dyn PagingHandler<P>>,
    current: Option<P>,
}

impl<P: Send + Sync + 'static> Pager<P> {
    pub fn new(handler: impl PagingHandler<P> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            current: None,
        }
    }

    /// Builds a pager from a pair of closures.
    ///
    /// `fetch` receives the current page (`None` for the first request) and
    /// must return a future that does not borrow it.
    pub fn from_fn<M, F, Fut>(more: M, fetch: F) -> Self
    where
        M: Fn(&P) -> bool + Send + Sync + 'static,
        F: Fn(Context, Option<&P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, ClientError>> + Send + 'static,
    {
        Self::new(FnPagingHandler {
            more,
            fetch,
            _future: PhantomData,
        })
    }

    /// `true` before the first page is fetched, then whatever the handler
    /// says about the current page.
    pub fn more(&self) -> bool {
        self.current
            .as_ref()
            .is_none_or(|page| self.handler.more(page))
    }

    /// The most recently fetched page.
    pub fn current(&self) -> Option<&P> {
        self.current.as_ref()
    }

    /// Fetches the next page and makes it current.
    ///
    /// Fails with [`ClientError::NoMorePages`] once [`Pager::more`] is false.
    pub async fn next_page(&mut self, ctx: &Context) -> Result<&P, ClientError> {
        if !self.more() {
            return Err(ClientError::NoMorePages);
        }
        ctx.check()?;
        let page = self.handler.fetch(ctx, self.current.as_ref()).await?;
        trace!("advanced pager");
        Ok(self.current.insert(page))
    }

    /// Turns the pager into a stream of pages.
    ///
    /// The stream ends after the last page or after the first error.
    pub fn into_stream(self, ctx: Context) -> impl Stream<Item = Result<P, ClientError>>
    where
        P: Clone,
    {
        futures::stream::unfold(Some(self), move |state| {
            let ctx = ctx.clone();
            async move {
                let mut pager = state?;
                if !pager.more() {
                    return None;
                }
                let next = pager.next_page(&ctx).await.cloned();
                match next {
                    Ok(page) => Some((Ok(page), Some(pager))),
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }
}

/// A page holding a slice of items.
pub trait Page {
    type Item;

    fn items(&self) -> &[Self::Item];
}

/// Item-at-a-time view over a [`Pager`].
///
/// Empty pages that are followed by more pages are skipped, so
/// [`ItemPager::not_done`] is false only once the current page is exhausted
/// and no further page exists.
///
/// ```no_run
/// # async fn run(pipeline: armcore::Pipeline) -> Result<(), armcore::ClientError> {
/// let ctx = armcore::Context::background();
/// let pager = pipeline.list::<serde_json::Value>("subscriptions/s1/resources")?;
/// let mut items = armcore::ItemPager::new(&ctx, pager).await?;
/// while let Some(item) = items.value() {
///     println!("{item}");
///     items.next(&ctx).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct ItemPager<P> {
    pager: Pager<P>,
    index: usize,
    fetched: usize,
}

impl<P> ItemPager<P>
where
    P: Page + Send + Sync + 'static,
{
    /// Fetches pages until one has an item or none remain.
    pub async fn new(ctx: &Context, pager: Pager<P>) -> Result<Self, ClientError> {
        let mut items = Self {
            pager,
            index: 0,
            fetched: 0,
        };
        items.fill(ctx).await?;
        Ok(items)
    }

    pub fn not_done(&self) -> bool {
        self.value().is_some() || self.pager.more()
    }

    /// The current item.
    pub fn value(&self) -> Option<&P::Item> {
        self.pager
            .current()
            .and_then(|page| page.items().get(self.index))
    }

    /// Moves to the next item, fetching pages as needed.
    ///
    /// When a fetch fails before any page was replaced, the current item stays
    /// in place. When empty pages were already skipped, [`ItemPager::value`]
    /// is `None` until a later call fetches the next page.
    pub async fn next(&mut self, ctx: &Context) -> Result<(), ClientError> {
        if self.value().is_none() {
            return self.fill(ctx).await;
        }
        let (previous, fetched) = (self.index, self.fetched);
        self.index += 1;
        if let Err(e) = self.fill(ctx).await {
            if self.fetched == fetched {
                self.index = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn into_pager(self) -> Pager<P> {
        self.pager
    }

    async fn fill(&mut self, ctx: &Context) -> Result<(), ClientError> {
        while self.value().is_none() && self.pager.more() {
            self.pager.next_page(ctx).await?;
            self.index = 0;
            self.fetched += 1;
        }
        Ok(())
    }
}

/// A page of a `{ "value": [...], "nextLink": "..." }` collection.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct NextLinkPage<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(
        default,
        rename = "nextLink",
        alias = "NextLink",
        alias = "@odata.nextLink"
    )]
    pub next_link: Option<String>,
}

impl<T> NextLinkPage<T> {
    pub fn has_next_link(&self) -> bool {
        self.next_link
            .as_deref()
            .is_some_and(|link| !link.trim().is_empty())
    }
}

impl<T> Page for NextLinkPage<T> {
    type Item = T;

    fn items(&self) -> &[T] {
        &self.value
    }
}

/// Follows `nextLink` from `first` until a page has none.
pub(crate) struct NextLinkHandler<T> {
    pipeline: Pipeline,
    first: Url,
    _item: PhantomData<fn() -> T>,
}

impl<T> NextLinkHandler<T> {
    pub(crate) fn new(pipeline: Pipeline, first: Url) -> Self {
        Self {
            pipeline,
            first,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T> PagingHandler<NextLinkPage<T>> for NextLinkHandler<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn more(&self, current: &NextLinkPage<T>) -> bool {
        current.has_next_link()
    }

    async fn fetch(
        &self,
        ctx: &Context,
        current: Option<&NextLinkPage<T>>,
    ) -> Result<NextLinkPage<T>, ClientError> {
        let url = match current {
            None => self.first.clone(),
            Some(page) => match page.next_link.as_deref().map(str::trim) {
                Some(link) if !link.is_empty() => self.pipeline.endpoint(link)?,
                _ => return Err(ClientError::NoMorePages),
            },
        };

        let response = self.pipeline.send(ctx, Request::get(url)).await?;
        if !response.has_status_code(&[StatusCode::OK]) {
            return Err(response.into_error());
        }
        let page: NextLinkPage<T> = response.json()?;
        debug!(
            url = %response.url(),
            items = page.value.len(),
            more = page.has_next_link(),
            "fetched page"
        );
        Ok(page)
    }
}
