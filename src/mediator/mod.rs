//! Correlation registry: request/response and broadcast mediation.
//!
//! Two variants over the same capability ("consume decoded frames,
//! dispatch"), composed rather than inherited:
//!
//! - [`RequestIdMediator`] - id-bearing: maps `(kind, request id)` to a
//!   waiter, resolving it with the matching response or a broker error
//! - [`BroadcastMediator`] - id-less: fans frames of a fixed kind set out to
//!   any number of subscribers via the shared event bus
//!
//! Both variants read the same bus, so the two matching strategies never
//! interfere: an id-bearing waiter and a broadcast subscriber can observe the
//! same frame.

mod broadcast;
mod request_id;

pub use broadcast::BroadcastMediator;
pub use request_id::RequestIdMediator;
