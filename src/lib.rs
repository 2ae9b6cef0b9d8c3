pub mod http;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod sweeper;
