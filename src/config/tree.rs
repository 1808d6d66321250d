//! The parsed form an external config-file parser yields (spec §4.4, §6):
//! a tree of groups and commands plus a flat list of named scripts. This
//! crate's `config::binding` module is the pure, stateless translation
//! layer between this tree and the live Sheriff/ScriptManager state.

use serde::{Deserialize, Serialize};

use crate::script::model::Action;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTree {
    #[serde(default)]
    pub groups: Vec<GroupNode>,
    #[serde(default)]
    pub commands: Vec<CommandNode>,
    #[serde(default)]
    pub scripts: Vec<ScriptNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupNode>,
    #[serde(default)]
    pub commands: Vec<CommandNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandNode {
    pub exec: String,
    pub command_id: String,
    pub deputy: String,
    #[serde(default)]
    pub auto_respawn: bool,
    #[serde(default = "default_stop_signal")]
    pub stop_signal: i32,
    #[serde(default)]
    pub stop_time_allowed: u32,
}

fn default_stop_signal() -> i32 {
    15 // SIGTERM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptNode {
    pub name: String,
    pub actions: Vec<Action>,
}

impl ConfigTree {
    /// Walks the tree depth-first, yielding `(group_path, &CommandNode)`
    /// for every command, with `group_path` the "/"-joined path of parent
    /// group names.
    pub fn walk_commands(&self) -> Vec<(String, &CommandNode)> {
        let mut out = Vec::new();
        for c in &self.commands {
            out.push((String::new(), c));
        }
        for g in &self.groups {
            g.walk_commands(&mut out, "");
        }
        out
    }
}

impl GroupNode {
    fn walk_commands<'a>(&'a self, out: &mut Vec<(String, &'a CommandNode)>, parent: &str) {
        let path = if parent.is_empty() {
            self.name.clone()
        } else {
            format!("{parent}/{}", self.name)
        };
        for c in &self.commands {
            out.push((path.clone(), c));
        }
        for g in &self.groups {
            g.walk_commands(out, &path);
        }
    }
}
