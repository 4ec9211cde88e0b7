//! Wire schema for the collector protocol.
//!
//! These are the protobuf (proto2) messages exchanged with the collector,
//! declared with `prost` derives exactly as `prost-build` would emit them.
//! Field tags must stay byte-compatible with the server's `proto.proto`.

/// An arbitrary key/value pair attached to an event.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Attribute {
    /// Attribute name.
    #[prost(string, required, tag = "1")]
    pub key: ::prost::alloc::string::String,
    /// Attribute value.
    #[prost(string, optional, tag = "2")]
    pub value: ::core::option::Option<::prost::alloc::string::String>,
}

/// A single monitoring data point.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    /// Seconds since the Unix epoch.
    #[prost(int64, optional, tag = "1")]
    pub time: ::core::option::Option<i64>,
    /// Free-form state, conventionally `ok`, `warning` or `critical`.
    #[prost(string, optional, tag = "2")]
    pub state: ::core::option::Option<::prost::alloc::string::String>,
    /// What is being measured.
    #[prost(string, optional, tag = "3")]
    pub service: ::core::option::Option<::prost::alloc::string::String>,
    /// Where the event originated.
    #[prost(string, optional, tag = "4")]
    pub host: ::core::option::Option<::prost::alloc::string::String>,
    /// Human-readable detail.
    #[prost(string, optional, tag = "5")]
    pub description: ::core::option::Option<::prost::alloc::string::String>,
    /// Labels for grouping and filtering.
    #[prost(string, repeated, tag = "7")]
    pub tags: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Seconds the event stays valid.
    #[prost(float, optional, tag = "8")]
    pub ttl: ::core::option::Option<f32>,
    /// Arbitrary key/value pairs.
    #[prost(message, repeated, tag = "9")]
    pub attributes: ::prost::alloc::vec::Vec<Attribute>,
    /// Microseconds since the Unix epoch; wins over `time`.
    #[prost(int64, optional, tag = "10")]
    pub time_micros: ::core::option::Option<i64>,
    /// Integer metric.
    #[prost(sint64, optional, tag = "13")]
    pub metric_sint64: ::core::option::Option<i64>,
    /// Double-precision metric.
    #[prost(double, optional, tag = "14")]
    pub metric_d: ::core::option::Option<f64>,
    /// Single-precision metric, read by older servers.
    #[prost(float, optional, tag = "15")]
    pub metric_f: ::core::option::Option<f32>,
}

/// A server-side query; the expression is passed through untouched.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Query {
    /// The query expression.
    #[prost(string, optional, tag = "1")]
    pub string: ::core::option::Option<::prost::alloc::string::String>,
}

/// The envelope for everything sent to or received from the collector.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Msg {
    /// Whether the collector accepted the request.
    #[prost(bool, optional, tag = "2")]
    pub ok: ::core::option::Option<bool>,
    /// Rejection reason when `ok` is false.
    #[prost(string, optional, tag = "3")]
    pub error: ::core::option::Option<::prost::alloc::string::String>,
    /// Query to run, or the query being answered.
    #[prost(message, optional, tag = "5")]
    pub query: ::core::option::Option<Query>,
    /// Events sent, or the results of a query.
    #[prost(message, repeated, tag = "6")]
    pub events: ::prost::alloc::vec::Vec<Event>,
}

impl Msg {
    /// A message carrying the given events.
    pub fn with_events(events: Vec<Event>) -> Self {
        Msg {
            events,
            ..Default::default()
        }
    }

    /// A message carrying a query expression.
    pub fn with_query(expression: impl Into<String>) -> Self {
        Msg {
            query: Some(Query {
                string: Some(expression.into()),
            }),
            ..Default::default()
        }
    }

    /// An acknowledgement as the collector sends it.
    pub fn ack() -> Self {
        Msg {
            ok: Some(true),
            ..Default::default()
        }
    }

    /// A rejection as the collector sends it.
    pub fn rejection(error: impl Into<String>) -> Self {
        Msg {
            ok: Some(false),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// False only when the collector explicitly answered `ok = false`.
    ///
    /// A missing `ok` field counts as success; datagram sends never get one.
    pub fn is_ok(&self) -> bool {
        self.ok != Some(false)
    }
}

impl Event {
    /// Looks up an attribute value by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .and_then(|a| a.value.as_deref())
    }

    /// The metric in its most precise stored form, if any was set.
    pub fn metric(&self) -> Option<f64> {
        if let Some(i) = self.metric_sint64 {
            return Some(i as f64);
        }
        if let Some(d) = self.metric_d {
            return Some(d);
        }
        self.metric_f.map(f64::from)
    }
}
