//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the engine.
//!
//! # Tasks
//! - Sweeper: Removes expired cache entries at configured intervals
//! - Refresh timers: Notify a key's revalidation subscribers on an interval

mod refresh;
mod sweeper;

pub use refresh::spawn_refresh_timer;
pub use sweeper::spawn_sweeper_task;
