//! Filter/query/pagination pipeline and the browse, random and add flows built on it.

use std::fmt::Display;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use randfood_client::{AddError, BackoffPolicy, FetchError, HttpClientConfig, RestaurantSource};
use randfood_core::{
    AddForm, FilterState, QueryParameters, Restaurant, ResultSet, ValidationErrors,
    PARAM_DISTRICT, PARAM_FOOD_STYLES, PARAM_PRICE,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "randfood-engine";

pub const DEFAULT_PAGE_SIZE: usize = 2;

pub const MSG_NO_MATCH: &str = "No restaurant matches your filter.";
pub const MSG_NETWORK_ERROR: &str = "Network error.";
pub const MSG_ADDED: &str = "Restaurant added!";
pub const MSG_ADD_NETWORK_ERROR: &str = "Network error. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub page_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("parsing {key}={raw:?}")),
                None => Ok(default),
            }
        };

        Ok(Self {
            base_url: lookup("RANDFOOD_BASE_URL")
                .unwrap_or_else(|| "http://localhost:4000".to_string()),
            user_agent: lookup("RANDFOOD_USER_AGENT").unwrap_or_else(|| "randfood/0.1".to_string()),
            http_timeout_secs: number("RANDFOOD_HTTP_TIMEOUT_SECS", 20)?,
            http_max_retries: number("RANDFOOD_HTTP_MAX_RETRIES", 0)? as usize,
            page_size: (number("RANDFOOD_PAGE_SIZE", DEFAULT_PAGE_SIZE as u64)? as usize).max(1),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: std::time::Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
        }
    }
}

/// Derive the remote query for `filter`.
///
/// Unconstrained dimensions are omitted. Multi-valued dimensions are joined with
/// `,` and the joined string is percent-encoded as one component, so the comma
/// travels as `%2C`. The search term is local-only and never sent.
pub fn build_query(filter: &FilterState) -> QueryParameters {
    let mut params = QueryParameters::new();
    if !filter.districts().is_empty() {
        params.insert(PARAM_DISTRICT, join_encoded(filter.districts()));
    }
    if let Some(price) = filter.price().query_value() {
        params.insert(PARAM_PRICE, urlencoding::encode(price).into_owned());
    }
    if !filter.styles().is_empty() {
        params.insert(PARAM_FOOD_STYLES, join_encoded(filter.styles()));
    }
    params
}

fn join_encoded<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    let joined = items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",");
    urlencoding::encode(&joined).into_owned()
}

/// Case-insensitive name match of the trimmed term, always over the full result set.
pub fn apply_local_search<'a>(results: &'a [Restaurant], term: &str) -> Vec<&'a Restaurant> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return results.iter().collect();
    }
    results
        .iter()
        .filter(|r| r.name.to_lowercase().contains(&needle))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOfResults<'a, T> {
    pub items: &'a [T],
    pub page: usize,
    pub total_pages: usize,
}

pub fn total_pages(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size.max(1)).max(1)
}

/// Slice `[(page-1)*size, page*size)` clipped to bounds. Out-of-range pages are empty.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> PageOfResults<'_, T> {
    let size = page_size.max(1);
    let start = page.saturating_sub(1).saturating_mul(size).min(items.len());
    let end = start.saturating_add(size).min(items.len());
    PageOfResults {
        items: &items[start..end],
        page: page.max(1),
        total_pages: total_pages(items.len(), size),
    }
}

/// 1-based page cursor with a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    page: usize,
    page_size: usize,
}

impl Default for PageState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageState {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn at(self, page: usize, total_pages: usize) -> Self {
        Self {
            page: page.clamp(1, total_pages.max(1)),
            ..self
        }
    }

    pub fn next(self, total_pages: usize) -> Self {
        if self.page >= total_pages {
            self
        } else {
            Self {
                page: self.page + 1,
                ..self
            }
        }
    }

    pub fn previous(self) -> Self {
        Self {
            page: self.page.saturating_sub(1).max(1),
            ..self
        }
    }

    pub fn reset(self) -> Self {
        Self { page: 1, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No restaurant matches your filter.")]
pub struct EmptyResultError;

/// Uniform choice over `results`.
pub fn pick_random<'a, T, R>(results: &'a [T], rng: &mut R) -> Result<&'a T, EmptyResultError>
where
    R: Rng + ?Sized,
{
    results.choose(rng).ok_or(EmptyResultError)
}

/// A fetch issued for one filter snapshot. Completing a stale ticket is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    query: QueryParameters,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &QueryParameters {
        &self.query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchApplied {
    Applied { count: usize },
    /// The fetch failed; the result set was replaced with an empty one.
    Failed,
    /// A newer filter superseded this fetch; nothing changed.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisiblePage<'a> {
    pub items: Vec<&'a Restaurant>,
    pub page: usize,
    pub total_pages: usize,
    pub filtered_count: usize,
}

/// Restaurants list: filters drive remote fetches, search and paging stay local.
#[derive(Debug, Clone, Default)]
pub struct BrowseSession {
    filter: FilterState,
    results: ResultSet,
    page: PageState,
    generation: u64,
    loading: bool,
}

impl BrowseSession {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: PageState::new(page_size),
            ..Self::default()
        }
    }

    /// Start from `filter` without issuing a fetch; call [`BrowseSession::refresh`] to load.
    pub fn with_filter(page_size: usize, filter: FilterState) -> Self {
        Self {
            filter,
            ..Self::new(page_size)
        }
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn results(&self) -> &[Restaurant] {
        &self.results
    }

    pub fn page_state(&self) -> PageState {
        self.page
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Replace the filter. Returns a ticket when the remote query changed.
    pub fn update_filter(&mut self, filter: FilterState) -> Option<FetchTicket> {
        let needs_fetch = !self.filter.query_eq(&filter);
        self.filter = filter;
        self.page = self.page.reset();
        needs_fetch.then(|| self.issue_ticket())
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issue_ticket()
    }

    fn issue_ticket(&mut self) -> FetchTicket {
        self.generation += 1;
        self.loading = true;
        FetchTicket {
            generation: self.generation,
            query: build_query(&self.filter),
        }
    }

    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        outcome: Result<ResultSet, FetchError>,
    ) -> FetchApplied {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding superseded restaurant fetch"
            );
            return FetchApplied::Stale;
        }

        self.loading = false;
        self.page = self.page.reset();
        match outcome {
            Ok(rows) => {
                let count = rows.len();
                self.results = rows;
                FetchApplied::Applied { count }
            }
            Err(err) => {
                warn!(error = %err, "restaurant fetch failed; showing an empty list");
                self.results = Vec::new();
                FetchApplied::Failed
            }
        }
    }

    pub async fn refresh<S>(&mut self, source: &S) -> FetchApplied
    where
        S: RestaurantSource + ?Sized,
    {
        let ticket = self.begin_fetch();
        let outcome = source.fetch_results(ticket.query()).await;
        self.complete_fetch(ticket, outcome)
    }

    /// Replace the filter and fetch when the query changed.
    pub async fn apply_filter<S>(&mut self, filter: FilterState, source: &S) -> Option<FetchApplied>
    where
        S: RestaurantSource + ?Sized,
    {
        let ticket = self.update_filter(filter)?;
        let outcome = source.fetch_results(ticket.query()).await;
        Some(self.complete_fetch(ticket, outcome))
    }

    pub fn filtered(&self) -> Vec<&Restaurant> {
        apply_local_search(&self.results, self.filter.search())
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.filtered().len(), self.page.page_size())
    }

    pub fn visible_page(&self) -> VisiblePage<'_> {
        let filtered = self.filtered();
        let page = paginate(&filtered, self.page.page(), self.page.page_size());
        VisiblePage {
            items: page.items.to_vec(),
            page: page.page,
            total_pages: page.total_pages,
            filtered_count: filtered.len(),
        }
    }

    pub fn next_page(&mut self) {
        self.page = self.page.next(self.total_pages());
    }

    pub fn previous_page(&mut self) {
        self.page = self.page.previous();
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.page = self.page.at(page, self.total_pages());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomOutcome {
    Picked(Restaurant),
    NoMatch,
    NetworkError,
}

impl RandomOutcome {
    pub fn message(&self) -> &str {
        match self {
            RandomOutcome::Picked(restaurant) => restaurant.display_name(),
            RandomOutcome::NoMatch => MSG_NO_MATCH,
            RandomOutcome::NetworkError => MSG_NETWORK_ERROR,
        }
    }
}

/// Random picker: a single-district filter and the last pick.
#[derive(Debug, Clone, Default)]
pub struct RandomSession {
    filter: FilterState,
    generation: u64,
    outcome: Option<RandomOutcome>,
}

impl RandomSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn outcome(&self) -> Option<&RandomOutcome> {
        self.outcome.as_ref()
    }

    /// Replace the filter, keeping at most one district. A changed query drops in-flight picks.
    pub fn set_filter(&mut self, filter: FilterState) {
        let first = filter.districts().iter().next().copied();
        let filter = filter.with_district(first);
        if !filter.query_eq(&self.filter) {
            self.generation += 1;
        }
        self.filter = filter;
    }

    pub fn begin_pick(&mut self) -> FetchTicket {
        self.generation += 1;
        FetchTicket {
            generation: self.generation,
            query: build_query(&self.filter),
        }
    }

    /// Record the pick for `ticket`. Returns `None` when the ticket was superseded.
    pub fn finish_pick<R>(
        &mut self,
        ticket: FetchTicket,
        fetched: Result<ResultSet, FetchError>,
        rng: &mut R,
    ) -> Option<&RandomOutcome>
    where
        R: Rng + ?Sized,
    {
        if ticket.generation != self.generation {
            debug!(ticket = ticket.generation, "discarding superseded random pick");
            return None;
        }

        let outcome = match fetched {
            Ok(rows) => match pick_random(&rows, rng) {
                Ok(restaurant) => RandomOutcome::Picked(restaurant.clone()),
                Err(EmptyResultError) => RandomOutcome::NoMatch,
            },
            Err(err) => {
                warn!(error = %err, "random pick fetch failed");
                RandomOutcome::NetworkError
            }
        };
        self.outcome = Some(outcome);
        self.outcome.as_ref()
    }

    pub async fn pick<S, R>(&mut self, source: &S, rng: &mut R) -> Option<&RandomOutcome>
    where
        S: RestaurantSource + ?Sized,
        R: Rng + ?Sized,
    {
        let ticket = self.begin_pick();
        let fetched = source.fetch_results(ticket.query()).await;
        self.finish_pick(ticket, fetched, rng)
    }

    /// Reset every filter and the result; in-flight picks are dropped.
    pub fn clear(&mut self) {
        self.filter = FilterState::cleared();
        self.outcome = None;
        self.generation += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Invalid(ValidationErrors),
    Added,
    Rejected(String),
    NetworkError,
}

impl AddOutcome {
    /// User-facing notice. Validation failures are shown next to their fields instead.
    pub fn message(&self) -> Option<&str> {
        match self {
            AddOutcome::Invalid(_) => None,
            AddOutcome::Added => Some(MSG_ADDED),
            AddOutcome::Rejected(message) => Some(message),
            AddOutcome::NetworkError => Some(MSG_ADD_NETWORK_ERROR),
        }
    }
}

/// Validate the form and submit it. The form is reset only after the service accepts it.
pub async fn submit_add<S>(form: &mut AddForm, source: &S) -> AddOutcome
where
    S: RestaurantSource + ?Sized,
{
    let payload = match form.validate() {
        Ok(payload) => payload,
        Err(errors) => return AddOutcome::Invalid(errors),
    };

    match source.add_restaurant(&payload).await {
        Ok(()) => {
            info!(restaurant = %payload.restaurant, district = %payload.district, "restaurant added");
            form.reset();
            AddOutcome::Added
        }
        Err(AddError::Rejected { message, .. }) => AddOutcome::Rejected(message),
        Err(AddError::Request(err)) => {
            warn!(error = %err, "add request failed");
            AddOutcome::NetworkError
        }
    }
}
