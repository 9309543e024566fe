//! Construct a dispatcher that releases 4 requests a second, at most 30 a minute.
//! Submit a burst of requests with random priorities and print when each one runs.
//!
//! Run with `RUST_LOG=priority_dispatcher=trace` to watch the cadence loop.

use priority_dispatcher::{with_deadline, Dispatcher, DispatcherConfig};

use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

type Request = (usize, &'static str);

const ROUTES: [(&str, u16); 4] = [
    ("/service1/api/v1/resource1", 100),
    ("/service1/api/v1/resource2", 50),
    ("/service2/api/v2/resource1", 25),
    ("/health", 10),
];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let start = Instant::now();
    let handler = move |(id, route): Request| async move {
        println!("Handling #{id} {route} at {:?}", Instant::now() - start);
        sleep(Duration::from_millis(300)).await;
    };

    let config = DispatcherConfig {
        per_second_budget: 4,
        per_minute_budget: 30,
        admission_capacity: 20,
    };
    let dispatcher =
        Dispatcher::<Request>::new(config, with_deadline(handler, Duration::from_secs(1)))
            .expect("valid configuration");
    dispatcher.add_rule(|load| load.payload().1 != "/admin");
    dispatcher.start().expect("running inside a Tokio runtime");

    let mut rng = thread_rng();
    for id in 0..25 {
        let (route, priority) = ROUTES[rng.gen_range(0..ROUTES.len())];
        dispatcher.submit(priority, (id, route));
    }
    dispatcher.submit(255, (25, "/admin"));

    sleep(Duration::from_secs(6)).await;
    dispatcher
        .stop(Duration::from_secs(2))
        .await
        .expect("in-flight requests drain");

    println!("{:#?}", dispatcher.metrics());
}
