#![forbid(unsafe_code)]

//! The stateful core of the Renderhive node coordinator.
//!
//! Four subsystems live here, constructed leaves-first by the lifecycle
//! manager: the on-disk operator/node registry, the session & keystore
//! gateway that every signed outbound action funnels through, the hive-cycle
//! engine, and the render-job lifecycle with its renderer driver.

pub mod cycle;
pub mod jobs;
pub mod registry;
pub mod renderer;
pub mod session;
