pub mod aggregator;
pub mod scheduler;
pub mod worker;

pub use aggregator::{Aggregate, ResultAggregator};
pub use scheduler::{PagePlan, PageScheduler, SchedulerSettings};
pub use worker::{PageBatch, PageJob, WorkerEvent};
