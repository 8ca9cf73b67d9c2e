//! Queuesim Simulation
//!
//! Reference host for `queuesim-core` processes: a single-threaded
//! cooperative kernel with a simulated clock, plus run configuration and
//! tracing setup.
//!
//! ## Core Components
//!
//! - **Simulation**: process table, event list and run loop; implements the
//!   core `Scheduler` trait
//! - **SimulatedClock**: monotone simulated time shared with the kernel
//! - **SimulationConfig**: seed, stop time and defaults, loadable from TOML
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use queuesim_core::{Bin, QueueConfig};
//! use queuesim_simulation::Simulation;
//!
//! let sim = Simulation::with_seed(7);
//! let bin = Rc::new(Bin::new(&sim.context(), "parts", QueueConfig::fifo(), 0));
//!
//! let consumer = bin.clone();
//! sim.spawn("consumer", async move {
//!     consumer.retrieve(5).await.expect("retrieve");
//! });
//! let producer = bin.clone();
//! sim.spawn("producer", async move {
//!     producer.store(5).expect("store");
//! });
//!
//! sim.run().expect("run");
//! assert_eq!(bin.avail(), 0);
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;

pub use clock::SimulatedClock;
pub use config::SimulationConfig;
pub use engine::{ProcessSpec, RunSummary, Simulation};
pub use error::{SimulationError, SimulationResult};
pub use log::init_tracing;
