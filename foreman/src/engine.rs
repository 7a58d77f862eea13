//! Shared dependencies handed to every role and lifecycle run.

use crate::io::clock::Clock;
use crate::io::config::Settings;
use crate::io::invoker::Invoker;
use crate::io::layout::Workspace;
use crate::io::prompt::PromptLibrary;
use crate::shutdown::ShutdownFlag;

/// Borrowed view of everything a role needs to do its work.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    pub settings: &'a Settings,
    pub workspace: &'a Workspace,
    pub invoker: &'a dyn Invoker,
    pub clock: &'a dyn Clock,
    pub prompts: &'a PromptLibrary,
    pub shutdown: &'a ShutdownFlag,
}

impl Engine<'_> {
    /// Model passed to the agent, if any.
    pub fn model(&self) -> Option<String> {
        let model = self.settings.agent.model.trim();
        (!model.is_empty()).then(|| model.to_string())
    }
}
