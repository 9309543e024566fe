//! # Priority Dispatcher
//! Some services can only absorb a fixed number of requests per second (and sometimes per minute), while the work queued up in front of them is not all equally urgent. This crate sits in between: submitted work is held in a priority heap, and a background cadence loop releases the most urgent item at a steady rate, never exceeding the configured ceilings, through a bounded pool of concurrent executions.
//!
//! # Example
//! Here, we create a dispatcher that releases at most 2 loads per second. Three loads are submitted before it starts, with priorities 1, 10 and 5. They are released most urgent first, half a second apart.
//! ```
//! # use std::sync::{Arc, Mutex};
//! # use std::time::Duration;
//! # use priority_dispatcher::{Dispatcher, DispatcherConfig};
//! # #[tokio::main]
//! # async fn main() {
//!     let released = Arc::new(Mutex::new(vec![]));
//!     let log = released.clone();
//!     let executor = move |name: &'static str| {
//!         let log = log.clone();
//!         async move { log.lock().unwrap().push(name) }
//!     };
//!
//!     let config = DispatcherConfig { per_second_budget: 2, ..Default::default() };
//!     let dispatcher = Dispatcher::new(config, executor).unwrap();
//!     dispatcher.submit(1, "background sync");
//!     dispatcher.submit(10, "checkout");
//!     dispatcher.submit(5, "search");
//!
//!     dispatcher.start().unwrap();
//!     tokio::time::sleep(Duration::from_millis(1200)).await;
//!     dispatcher.stop(Duration::from_secs(1)).await.unwrap();
//!
//!     assert_eq!(*released.lock().unwrap(), vec!["checkout", "search", "background sync"]);
//! # }
//! ```
//!
//! # Limitations
//! Priority is strict: a steady stream of urgent loads will starve everything below it.
//!
//! Ordering only applies among loads pending at the moment of release. A load is never recalled once released, even if a more urgent one arrives a moment later.
//!
//! Submission is fire-and-forget. Loads refused by a rule, turned away by a full admission buffer, or still pending at shutdown are dropped; the counters in [`MetricsSnapshot`] are the only record of them.

mod collector;
mod config;
mod dispatcher;
mod error;
mod load;
mod metrics;
mod window;

pub use collector::PriorityCollector;
pub use config::DispatcherConfig;
pub use dispatcher::{AdmissionRule, Dispatcher, DispatcherState};
pub use error::DispatchError;
pub use load::{with_deadline, Deadline, Executor, Load};
pub use metrics::MetricsSnapshot;
pub use window::{BudgetExhausted, WindowBudget};
