//! Host audio output: device enumeration, stream ownership, live switching

mod device;
mod error;
mod output;

pub use device::{find_output_device, list_output_devices, OutputDeviceInfo};
pub use error::{AudioError, AudioResult};
pub use output::{CallbackState, DriverNotice, OutputDriver, StreamInfo, StreamRequest};
