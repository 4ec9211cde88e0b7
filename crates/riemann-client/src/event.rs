//! Event construction.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::RiemannClient;
use crate::error::Error;
use crate::message::{Attribute, Event};
use crate::promise::{Promise, Response};

/// A metric value in the exact form the caller supplied.
///
/// Every variant is also stored as `metric_f` so old servers that only read
/// the float field still see a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    /// Signed integer, sent as `metric_sint64`.
    Int(i64),
    /// Single precision, sent as `metric_f` only.
    Float(f32),
    /// Double precision, sent as `metric_d`.
    Double(f64),
}

impl Metric {
    fn apply(self, event: &mut Event) {
        event.metric_sint64 = None;
        event.metric_d = None;
        match self {
            Metric::Int(i) => {
                event.metric_sint64 = Some(i);
                event.metric_f = Some(i as f32);
            }
            Metric::Float(f) => {
                event.metric_f = Some(f);
            }
            Metric::Double(d) => {
                event.metric_d = Some(d);
                event.metric_f = Some(d as f32);
            }
        }
    }
}

impl From<i64> for Metric {
    fn from(v: i64) -> Self {
        Metric::Int(v)
    }
}

impl From<i32> for Metric {
    fn from(v: i32) -> Self {
        Metric::Int(i64::from(v))
    }
}

impl From<u32> for Metric {
    fn from(v: u32) -> Self {
        Metric::Int(i64::from(v))
    }
}

impl From<f32> for Metric {
    fn from(v: f32) -> Self {
        Metric::Float(v)
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Double(v)
    }
}

/// Accumulates event fields; `build` or `send` finishes it.
///
/// # Example
///
/// ```
/// use riemann_client::event::EventBuilder;
///
/// let event = EventBuilder::new()
///     .host("web-1")
///     .service("api req/s")
///     .state("ok")
///     .metric(125)
///     .tag("http")
///     .attribute("region", "eu")
///     .ttl(30.0)
///     .build();
/// assert_eq!(event.metric_sint64, Some(125));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventBuilder<'a> {
    client: Option<&'a RiemannClient>,
    event: Event,
}

impl<'a> EventBuilder<'a> {
    /// A builder not bound to any client.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_client(client: &'a RiemannClient) -> Self {
        Self {
            client: Some(client),
            event: Event::default(),
        }
    }

    /// Sets the host. Without one the server fills in the sender's address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.event.host = Some(host.into());
        self
    }

    /// Sets the service name.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.event.service = Some(service.into());
        self
    }

    /// Sets the state, e.g. `"ok"`, `"warning"`, `"critical"`.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.event.state = Some(state.into());
        self
    }

    /// Sets the free-form description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.event.description = Some(description.into());
        self
    }

    /// Sets the event time in (fractional) seconds since the epoch.
    pub fn time(mut self, seconds: f64) -> Self {
        self.event.time = Some(seconds.floor() as i64);
        self.event.time_micros = Some((seconds * 1_000_000.0) as i64);
        self
    }

    /// Sets the event time in whole seconds since the epoch.
    pub fn time_secs(mut self, seconds: i64) -> Self {
        self.event.time = Some(seconds);
        self.event.time_micros = None;
        self
    }

    /// Stamps the event with the local clock instead of leaving it to the server.
    pub fn now(self) -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.time(seconds)
    }

    /// Sets the metric.
    pub fn metric(mut self, metric: impl Into<Metric>) -> Self {
        metric.into().apply(&mut self.event);
        self
    }

    /// Appends a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.event.tags.push(tag.into());
        self
    }

    /// Appends several tags, keeping their order.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the time-to-live in seconds.
    pub fn ttl(mut self, seconds: f32) -> Self {
        self.event.ttl = Some(seconds);
        self
    }

    /// Sets an attribute, replacing any earlier value for the same key.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = Some(value.into());
        match self.event.attributes.iter_mut().find(|a| a.key == key) {
            Some(existing) => existing.value = value,
            None => self.event.attributes.push(Attribute { key, value }),
        }
        self
    }

    /// Sets several attributes.
    pub fn attributes<I, K, V>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        attributes
            .into_iter()
            .fold(self, |builder, (k, v)| builder.attribute(k, v))
    }

    /// Finishes the event.
    pub fn build(self) -> Event {
        self.event
    }

    /// Sends the event through the client this builder came from.
    pub fn send(self) -> Response<crate::message::Msg> {
        match self.client {
            Some(client) => client.send_event(self.event),
            None => Box::new(Promise::failed(Error::Unsupported(
                "event builder is not bound to a client",
            ))),
        }
    }
}
