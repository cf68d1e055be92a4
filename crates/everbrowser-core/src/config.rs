//! Orchestrator tuning knobs and prompts

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_MAX_HISTORY_TURNS: usize = 50;
pub const DEFAULT_MAX_AUTO_CONTINUATIONS: u32 = 80;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 80;

/// Standing instructions seeded as the first turn of every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "# 角色\n\
你是一个名为 everBrowser 的浏览器助手。\n\
根据用户的请求使用浏览器工具打开网页、阅读页面内容并完成操作，不要拒绝用户的需求。\n\
如果看不懂用户的意思，先查看当前页面，理解用户的意图后再开始工作。\n\
遇到不确定的时效性问题，使用 https://www.bing.com/search?q=<URL 编码的关键词> 在互联网上查询。\n\
如果需要用户登录、输入验证码或做出选择，请停下来说明需要用户操作。\n\
始终使用简体中文回复。";

pub const DEFAULT_CONTINUE_PROMPT: &str = "continue";

/// Probe asking the agent to self-report task status
pub const DEFAULT_JUDGE_PROMPT: &str = "Review the conversation above and report the status of the user's task. \
Reply with exactly one of these labels and nothing else:\n\
COMPLETED - the task is finished or nothing is left to do\n\
CONTINUE - the task is still in progress and you can keep working on it\n\
USER_ACTION_REQUIRED - you need the user to do something (log in, solve a captcha, make a choice)";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Turn count cap per conversation, system turn included
    pub max_history_turns: usize,
    /// Auto-continuations allowed per request
    pub max_auto_continuations: u32,
    /// Consecutive failed attempts allowed per request
    pub max_consecutive_errors: u32,
    pub system_prompt: String,
    pub continue_prompt: String,
    pub judge_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            max_auto_continuations: DEFAULT_MAX_AUTO_CONTINUATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            continue_prompt: DEFAULT_CONTINUE_PROMPT.to_string(),
            judge_prompt: DEFAULT_JUDGE_PROMPT.to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        // Room for the system turn plus at least one exchange turn
        if self.max_history_turns < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "max_history_turns must be at least 2, got {}",
                self.max_history_turns
            )));
        }
        if self.max_auto_continuations == 0 {
            return Err(CoreError::InvalidConfig(
                "max_auto_continuations must be greater than 0".to_string(),
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(CoreError::InvalidConfig(
                "max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        if self.continue_prompt.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "continue_prompt must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
