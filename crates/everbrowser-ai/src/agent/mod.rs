//! Agent capability: the contract the orchestrator drives, and the
//! tool-calling agent that fulfils it.

mod accumulator;
mod capability;
mod tool_agent;

pub use accumulator::ToolCallAccumulator;
pub use capability::{AgentCapability, RawUnit, RawUnitStream, ToolInvocation, Turn, TurnRole};
pub use tool_agent::{DEFAULT_MAX_TOOL_ROUNDS, ToolAgent};
