// Vulkan state management

pub mod deletion_queue;
pub mod frame;
pub mod immediate;
pub mod swapchain;
pub mod sync;

pub use deletion_queue::*;
pub use frame::*;
pub use immediate::*;
pub use swapchain::*;
pub use sync::*;
