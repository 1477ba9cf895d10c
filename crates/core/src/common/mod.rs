pub mod owner;
pub mod time;

pub use owner::OwnerKey;
pub use time::{FakeClockProvider, RealTimeProvider, TimeProvider};
