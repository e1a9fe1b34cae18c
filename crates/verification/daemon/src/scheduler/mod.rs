//! Background tasks

mod sla;

pub use sla::SlaScheduler;
