use std::fmt;

/// Execution device a module and its tensors are bound to.
///
/// The tag drives executor selection: modules that share a device (and a
/// cluster) are grouped into one executor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Device {
    /// Unbound. Modules carrying this tag are scheduled but never grouped
    /// with a real device run.
    #[default]
    None,
    Cpu,
    Cuda,
    Metal,
    Vulkan,
}

impl Device {
    /// Whether work on this device is submitted through a queue instead of
    /// running inline on the calling thread.
    pub fn is_queued(self) -> bool {
        matches!(self, Device::Cuda | Device::Metal | Device::Vulkan)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::None => "none",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Metal => "metal",
            Device::Vulkan => "vulkan",
        })
    }
}
