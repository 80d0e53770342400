//! Live upstream feed: wire events, the websocket client and the router that
//! turns events into aggregates and channel updates.

pub mod events;
pub mod router;
pub mod ws;

pub use events::{FeedEvent, parse_feed_message};
pub use router::{FeedRouter, LastTrades};
pub use ws::FeedClient;
