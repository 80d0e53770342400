pub mod channel;
pub mod client;
pub mod error;
pub mod hub;
pub mod initial;
pub mod payload;
pub mod protocol;
pub mod replay;

pub use channel::{ChannelName, HoursMode, SecurityChannel, StreamType};
pub use client::{Client, ClientConfig, ClientIo};
pub use error::SessionError;
pub use hub::{ClientHandle, ClientId, SubscriptionHub};
