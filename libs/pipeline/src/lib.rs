pub mod codec;
pub mod config;
pub mod error;
mod consumer;
mod dispatch;

#[cfg(test)]
mod testing;

pub use config::ConsumerConfig;
pub use consumer::{Consumer, ConsumerState, ConsumerStats, StatsSnapshot};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{AckError, ConfigError, DecodeError, DispatchError, PollError};
