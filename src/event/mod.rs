//! # Event Fan-out
//!
//! Logs, debugger events and agent events all reach their observers through
//! the same mechanism: a [`SinkRegistry`] holding one bounded channel per
//! subscriber.
//!
//! ```text
//! ┌─────────┐  try_send  ┌──────────────┐
//! │Producer │──────────▶│ SinkRegistry │──▶ sink 1 (bounded)
//! └─────────┘            │              │──▶ sink 2 (bounded, full: dropped)
//!                        └──────────────┘──▶ sink 3 (closed: removed)
//! ```
//!
//! Publishing never waits. A subscriber whose channel is full misses that
//! event and nobody else notices; a subscriber whose receiver was dropped is
//! pruned on the next publish.
//!
//! ```rust
//! # use chariot::event::SinkRegistry;
//! # async fn example() {
//! let sinks = SinkRegistry::<String>::new(10);
//! let mut subscription = sinks.subscribe();
//!
//! sinks.publish("hello".to_string());
//! assert_eq!(subscription.receiver.recv().await.as_deref(), Some("hello"));
//!
//! sinks.unsubscribe(subscription.id);
//! assert_eq!(subscription.receiver.recv().await, None);
//! # }
//! ```

pub mod sink;

pub use sink::{SinkId, SinkRegistry, Subscription};
