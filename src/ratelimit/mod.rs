//! Rate limiting logic and state management.

mod backend;
mod clock;
mod limiter;
mod local;
mod policy;
mod shared;
mod window;

pub use backend::WindowCounter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use local::LocalCounter;
pub use policy::{parse_window, Policy, PolicyRegistry, PolicySpec, PolicyTable, PRESETS};
pub use shared::{
    CounterStore, RedisStore, SharedCounter, StoreOutcome, DEFAULT_BACKEND_TIMEOUT,
    DEFAULT_KEY_PREFIX,
};
pub use window::{is_live, surviving_events, Decision, WindowState};
