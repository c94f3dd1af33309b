// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cell::RefCell;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use super::{DataSource, Error};
use crate::geo::Rect;
use crate::osm::model::{Feature, OverpassResponse};

/// Controls how the [Overpass API](https://wiki.openstreetmap.org/wiki/Overpass_API) is used.
#[derive(Debug, Clone, PartialEq)]
pub struct OverpassOptions {
    /// Base URL of the API, with a trailing slash. The `status` and `interpreter`
    /// endpoints are resolved relative to it.
    pub base_url: String,

    /// Delay between retries of failed requests.
    pub retry_delay: Duration,

    /// Server-side timeout of a single query.
    pub timeout: Duration,
}

impl Default for OverpassOptions {
    fn default() -> Self {
        Self {
            base_url: "https://overpass.kumi.systems/api/".to_string(),
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Raw access to the two endpoints of an Overpass API instance.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Returns the plain-text body of the `status` endpoint.
    async fn status(&self) -> Result<String, Error>;

    /// Runs an Overpass QL query, returning the body of the response.
    async fn interpreter(&self, query: &str) -> Result<String, Error>;
}

/// Capacity of an Overpass API instance, as reported by its `status` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// A query may be run right away.
    Available,

    /// No slots are free, the next one frees up after the provided delay.
    Wait(Duration),

    /// No slots are free, and the server didn't say when one frees up.
    Full,
}

/// Parses the body of the Overpass `status` endpoint, looking for
/// "N slots available now" or "in N seconds" lines.
///
/// Returns `None` if neither is present.
pub fn parse_status(body: &str) -> Option<SlotStatus> {
    let mut wait: Option<u64> = None;
    let mut full = false;

    for line in body.lines() {
        let line = line.trim();

        let count = line
            .strip_suffix("slots available now.")
            .or_else(|| line.strip_suffix("slots available now"));
        if let Some(count) = count.and_then(|c| c.trim().parse::<u64>().ok()) {
            if count > 0 {
                return Some(SlotStatus::Available);
            }
            full = true;
        }

        if let Some((_, after)) = line.rsplit_once(" in ") {
            let seconds = after
                .trim_end_matches('.')
                .strip_suffix("seconds")
                .and_then(|s| s.trim().parse::<u64>().ok());
            if let Some(seconds) = seconds {
                wait = Some(wait.map_or(seconds, |w| w.min(seconds)));
            }
        }
    }

    match wait {
        Some(s) => Some(SlotStatus::Wait(Duration::from_secs(s))),
        None if full => Some(SlotStatus::Full),
        None => None,
    }
}

/// Builds an Overpass QL query fetching all highways and turn restrictions
/// in the geographic `area`, together with all of their nodes.
pub fn area_query(area: &Rect, timeout: Duration) -> String {
    let bbox = format!(
        "({},{},{},{})",
        area.bottom, area.left, area.top, area.right
    );
    format!(
        "[out:json][timeout:{}];(way[\"highway\"]{bbox};relation[\"restriction\"]{bbox};);(._;>;);out;",
        timeout.as_secs(),
    )
}

/// Hand-off queue admitting one waiter at a time.
///
/// Every waiter registers itself as the last one in line and waits for its predecessor
/// to drop its [SlotTicket].
#[derive(Debug, Default)]
struct SlotGate {
    last: RefCell<Option<oneshot::Receiver<()>>>,
}

/// Proof of passing through a [SlotGate]. The next waiter is released when the ticket is dropped.
struct SlotTicket(#[allow(dead_code)] oneshot::Sender<()>);

impl SlotGate {
    async fn enter(&self) -> SlotTicket {
        let (tx, rx) = oneshot::channel();
        let previous = self.last.replace(Some(rx));
        if let Some(previous) = previous {
            // Err only means the predecessor is gone, which also releases us
            let _ = previous.await;
        }
        SlotTicket(tx)
    }
}

/// [DataSource] fetching data from an [Overpass API](https://wiki.openstreetmap.org/wiki/Overpass_API)
/// instance.
///
/// Before running a query, the capacity of the server is checked through its `status`
/// endpoint, and the request waits until a slot is free. Only one request checks the
/// capacity at a time.
///
/// Failed requests are retried forever with a fixed delay, as there's no other source
/// of the data. A persistent failure manifests itself as a hanging
/// [DataSource::fetch_area] call, and with warnings in the log.
pub struct Overpass<T: Transport> {
    transport: T,
    options: OverpassOptions,
    gate: SlotGate,
}

impl<T: Transport> Overpass<T> {
    pub fn new(transport: T, options: OverpassOptions) -> Self {
        Self {
            transport,
            options,
            gate: SlotGate::default(),
        }
    }

    pub fn options(&self) -> &OverpassOptions {
        &self.options
    }

    /// Waits until the server has a free slot. Unrecognized status responses
    /// are assumed to mean that a slot is available.
    async fn wait_for_slot(&self) {
        loop {
            match self.transport.status().await {
                Ok(body) => match parse_status(&body) {
                    Some(SlotStatus::Available) => return,
                    Some(SlotStatus::Wait(delay)) => {
                        debug!("no free overpass slots, waiting {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    Some(SlotStatus::Full) => {
                        debug!(
                            "no free overpass slots, checking again in {:?}",
                            self.options.retry_delay
                        );
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                    None => {
                        warn!("{}", Error::UnexpectedStatus(body));
                        return;
                    }
                },
                Err(e) => {
                    warn!(
                        "overpass status request failed: {} - retrying in {:?}",
                        e, self.options.retry_delay
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
            }
        }
    }

    /// Runs a query until it succeeds.
    pub async fn request(&self, query: &str) -> OverpassResponse {
        loop {
            {
                let _ticket = self.gate.enter().await;
                self.wait_for_slot().await;
            }

            let result = self
                .transport
                .interpreter(query)
                .await
                .and_then(|body| Ok(serde_json::from_str::<OverpassResponse>(&body)?));

            match result {
                Ok(response) => return response,
                Err(e) => {
                    warn!(
                        "overpass request failed: {} - retrying in {:?}",
                        e, self.options.retry_delay
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
            }
        }
    }
}

impl<T: Transport> DataSource for Overpass<T> {
    async fn fetch_area(&self, area: &Rect) -> Vec<Feature> {
        let query = area_query(area, self.options.timeout);
        debug!("overpass query: {}", query);

        let started = tokio::time::Instant::now();
        let response = self.request(&query).await;
        info!(
            "fetched {} elements from overpass in {:?}",
            response.elements.len(),
            started.elapsed()
        );
        response.elements
    }
}

/// [Transport] over HTTP(S), using [reqwest].
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Creates a transport talking to the server at `base_url` (with a trailing slash).
    /// `timeout` applies to whole requests, and should be no shorter than the query timeout.
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("streetpath/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_options(options: &OverpassOptions) -> Result<Self, Error> {
        // Leave the server some time to report its own timeout
        Self::new(options.base_url.clone(), options.timeout + Duration::from_secs(30))
    }
}

#[cfg(feature = "http")]
impl Transport for HttpTransport {
    async fn status(&self) -> Result<String, Error> {
        let response = self
            .client
            .get(format!("{}status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn interpreter(&self, query: &str) -> Result<String, Error> {
        let response = self
            .client
            .get(format!("{}interpreter", self.base_url))
            .query(&[("data", query)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    const EMPTY_RESPONSE: &str = r#"{"elements": []}"#;

    /// Scripted [Transport]. Status responses are served from a queue,
    /// falling back to one free slot. Interpreter responses likewise,
    /// falling back to an empty element list.
    #[derive(Default)]
    struct MockTransport {
        statuses: RefCell<VecDeque<Result<String, Error>>>,
        responses: RefCell<VecDeque<Result<String, Error>>>,
        queries: RefCell<Vec<String>>,
        status_calls: Cell<usize>,
        checking: Cell<usize>,
        max_checking: Cell<usize>,
    }

    impl Transport for MockTransport {
        async fn status(&self) -> Result<String, Error> {
            self.status_calls.set(self.status_calls.get() + 1);
            self.checking.set(self.checking.get() + 1);
            self.max_checking
                .set(self.max_checking.get().max(self.checking.get()));

            tokio::time::sleep(Duration::from_millis(10)).await;

            self.checking.set(self.checking.get() - 1);
            let next = self.statuses.borrow_mut().pop_front();
            next.unwrap_or_else(|| Ok("Rate limit: 2\n1 slots available now.\n".to_string()))
        }

        async fn interpreter(&self, query: &str) -> Result<String, Error> {
            self.queries.borrow_mut().push(query.to_string());
            let next = self.responses.borrow_mut().pop_front();
            next.unwrap_or_else(|| Ok(EMPTY_RESPONSE.to_string()))
        }
    }

    fn io_error() -> Error {
        Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
    }

    #[test]
    fn parse_status_lines() {
        let available = concat!(
            "Connected as: 1\n",
            "Current time: 2024-01-01T00:00:00Z\n",
            "Rate limit: 2\n",
            "2 slots available now.\n",
            "Currently running queries (pid, space limit, time limit, start time):\n",
        );
        assert_eq!(parse_status(available), Some(SlotStatus::Available));

        let waiting = concat!(
            "Rate limit: 2\n",
            "Slot available after: 2024-01-01T00:00:15Z, in 15 seconds.\n",
            "Slot available after: 2024-01-01T00:00:07Z, in 7 seconds.\n",
        );
        assert_eq!(
            parse_status(waiting),
            Some(SlotStatus::Wait(Duration::from_secs(7)))
        );

        assert_eq!(parse_status("0 slots available now."), Some(SlotStatus::Full));
        let full_until = concat!(
            "0 slots available now.\n",
            "Slot available after: 2024-01-01T00:00:03Z, in 3 seconds.\n",
        );
        assert_eq!(
            parse_status(full_until),
            Some(SlotStatus::Wait(Duration::from_secs(3)))
        );
        assert_eq!(parse_status("<html>502 Bad Gateway</html>"), None);
    }

    #[test]
    fn query_format() {
        let q = area_query(&Rect::new(21.0, 21.1, 52.2, 52.3), Duration::from_secs(180));
        assert_eq!(
            q,
            "[out:json][timeout:180];(way[\"highway\"](52.2,21,52.3,21.1);relation[\"restriction\"](52.2,21,52.3,21.1););(._;>;);out;"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_requests() {
        let transport = MockTransport::default();
        transport.responses.borrow_mut().extend([
            Err(io_error()),
            Ok("<html>Too many requests</html>".to_string()),
            Ok(r#"{"elements": [{"type": "node", "id": 1, "lat": 0.5, "lon": 1.5}]}"#.to_string()),
        ]);
        let o = Overpass::new(transport, OverpassOptions::default());

        let started = tokio::time::Instant::now();
        let features = o.fetch_area(&Rect::new(1.0, 2.0, 0.0, 1.0)).await;
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id(), Some(1));
        assert_eq!(o.transport.queries.borrow().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_free_slot() {
        let transport = MockTransport::default();
        transport.statuses.borrow_mut().extend([
            Err(io_error()),
            Ok("Slot available after: 2024-01-01T00:00:30Z, in 30 seconds.".to_string()),
        ]);
        let o = Overpass::new(transport, OverpassOptions::default());

        let started = tokio::time::Instant::now();
        o.fetch_area(&Rect::new(1.0, 2.0, 0.0, 1.0)).await;
        assert!(started.elapsed() >= Duration::from_secs(35));
        assert_eq!(o.transport.status_calls.get(), 3);
        assert_eq!(o.transport.queries.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rechecks_full_server() {
        let transport = MockTransport::default();
        transport.statuses.borrow_mut().extend([
            Ok("Rate limit: 2\n0 slots available now.\n".to_string()),
            Ok("Rate limit: 2\n0 slots available now.\n".to_string()),
        ]);
        let o = Overpass::new(transport, OverpassOptions::default());

        let started = tokio::time::Instant::now();
        o.fetch_area(&Rect::new(1.0, 2.0, 0.0, 1.0)).await;
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(o.transport.status_calls.get(), 3);
        assert_eq!(o.transport.queries.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_capacity_one_at_a_time() {
        let o = Overpass::new(MockTransport::default(), OverpassOptions::default());
        let areas = (0..4)
            .map(|i| Rect::new(i as f64, i as f64 + 1.0, 0.0, 1.0))
            .collect::<Vec<_>>();

        futures::future::join_all(areas.iter().map(|a| o.fetch_area(a))).await;

        assert_eq!(o.transport.status_calls.get(), 4);
        assert_eq!(o.transport.max_checking.get(), 1);
        assert_eq!(o.transport.queries.borrow().len(), 4);
    }
}
