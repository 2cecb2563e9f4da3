pub mod actor;
pub mod controller;
mod job;
pub mod state;

pub use actor::{ClientActor, ClientHandle};
pub use controller::{CaptureController, ClientSnapshot};
pub use state::{CaptureSession, CaptureState, SampleHistory};
