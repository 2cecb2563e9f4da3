pub mod device;
pub mod sample;

pub use device::{DeviceDescriptor, DeviceDetails};
pub use sample::{
    AcquiredSample, OpaqueData, Quality, QualityBand, SampleFormat, SamplePayload, SampleRecord,
};
