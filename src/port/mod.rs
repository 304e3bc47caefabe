mod allocator;

pub use allocator::{platform_default_ports, PortAllocator, PortProbeResult};
