//! Default implementations of [crate::fleet::FleetClient]

pub mod dataproc;
pub mod fixed;
