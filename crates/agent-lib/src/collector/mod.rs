//! Periodic autoscaler collection
//!
//! The collector lists every namespace, samples the autoscalers in each,
//! turns them into telemetry events and hands those to the output pool.
//! Failures are contained per namespace and per event so one bad namespace
//! or one dead output host never stops the loop.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{
    Collector, CollectorBuilder, CollectorSettings, CollectorState, CycleStats,
};
