use crate::script::model::Action;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    ScriptStarted(String),
    ScriptActionExecuting(Action),
    ScriptFinished(String),
    ScriptAborted(String),
}

pub trait ScriptListener: Fn(ScriptEvent) + Send + Sync {}
impl<F: Fn(ScriptEvent) + Send + Sync> ScriptListener for F {}
