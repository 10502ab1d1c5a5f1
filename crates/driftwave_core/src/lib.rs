//! Core types shared by every driftwave crate: device tags, the result
//! taxonomy, tensor-port records and the module contracts.
//!
//! Nothing in this crate touches tensor memory. Records describe ports,
//! modules describe work, and the scheduler in `driftwave_graph` wires the
//! two together.

mod device;
mod module;
mod record;
mod result;

pub use device::Device;
pub use module::{share_module, Compute, Module, Present, RuntimeMetadata, SharedModule};
pub use record::{Locale, Record, RecordMap, Shape};
pub use result::{Flow, FlowError, FlowResult};

pub mod prelude {
    pub use crate::{
        share_module, Compute, Device, Flow, FlowError, FlowResult, Locale, Module, Present,
        Record, RecordMap, RuntimeMetadata,
    };
}
