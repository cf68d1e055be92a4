//! Tools the agent may invoke during a turn

mod page_fetch;
mod registry;
mod traits;

pub use page_fetch::PageFetchTool;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolOutput, ToolSchema};
