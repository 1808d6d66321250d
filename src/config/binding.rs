//! Pure, stateless translation between the parsed config tree and live
//! Sheriff/ScriptManager state (spec §4.4). Every function here takes the
//! target component's lock internally (via its own public API) and holds
//! no state of its own.

use super::error::ConfigError;
use super::tree::{CommandNode, ConfigTree, GroupNode, ScriptNode};
use crate::commands::{normalize_group, CommandSpec};
use crate::script::ScriptManager;
use crate::sheriff::{AddCommandRequest, Sheriff};

/// Loads a config tree into a freshly constructed Sheriff. Scripts are
/// replaced wholesale before commands are added. Rejected if the Sheriff
/// already owns any commands — the UI is expected to explicitly remove
/// them first.
pub fn load_config(sheriff: &Sheriff, manager: &ScriptManager, tree: &ConfigTree) -> Result<(), ConfigError> {
    let existing = sheriff.get_all_commands().len();
    if existing > 0 {
        return Err(ConfigError::CommandsAlreadyExist(existing));
    }

    manager.replace_scripts(
        tree.scripts
            .iter()
            .map(|s| (s.name.clone(), s.actions.clone()))
            .collect(),
    );

    for (group_path, node) in tree.walk_commands() {
        sheriff
            .add_command(AddCommandRequest {
                deputy_id: node.deputy.clone().into(),
                spec: CommandSpec {
                    exec_str: node.exec.clone(),
                    command_id: node.command_id.clone().into(),
                    group: normalize_group(&group_path),
                    auto_respawn: node.auto_respawn,
                    stop_signal: node.stop_signal,
                    stop_time_allowed: node.stop_time_allowed,
                },
            })
            .map_err(|e| ConfigError::Text(e.to_string()))?;
    }

    Ok(())
}

/// Serializes live Sheriff + ScriptManager state back into a config tree,
/// attaching each command to a (possibly freshly created) group node along
/// its "/"-delimited path.
pub fn save_config(sheriff: &Sheriff, manager: &ScriptManager) -> ConfigTree {
    let mut tree = ConfigTree::default();

    for rec in sheriff.get_all_commands() {
        let node = CommandNode {
            exec: rec.spec.exec_str.clone(),
            command_id: rec.spec.command_id.0.clone(),
            deputy: deputy_owning(sheriff, &rec.spec.command_id),
            auto_respawn: rec.spec.auto_respawn,
            stop_signal: rec.spec.stop_signal,
            stop_time_allowed: rec.spec.stop_time_allowed,
        };
        insert_at_path(&mut tree, &rec.spec.normalized_group(), node);
    }

    tree.scripts = manager
        .list_scripts()
        .into_iter()
        .map(|(name, actions)| ScriptNode { name, actions })
        .collect();

    tree
}

fn deputy_owning(sheriff: &Sheriff, id: &crate::ids::CommandId) -> String {
    for dep_id in sheriff.get_deputies() {
        if let Some(dep) = sheriff.find_deputy(&dep_id) {
            if dep.commands.contains_key(id) {
                return dep_id.0;
            }
        }
    }
    String::new()
}

fn insert_at_path(tree: &mut ConfigTree, path: &str, node: CommandNode) {
    if path.is_empty() {
        tree.commands.push(node);
        return;
    }
    let mut groups = &mut tree.groups;
    let mut segments = path.split('/').peekable();
    loop {
        let seg = segments.next().unwrap();
        let idx = match groups.iter().position(|g| g.name == seg) {
            Some(i) => i,
            None => {
                groups.push(GroupNode {
                    name: seg.to_string(),
                    groups: Vec::new(),
                    commands: Vec::new(),
                });
                groups.len() - 1
            }
        };
        if segments.peek().is_none() {
            groups[idx].commands.push(node);
            return;
        }
        groups = &mut groups[idx].groups;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SheriffId;
    use crate::transport::memory::MemoryTransport;
    use std::sync::Arc;

    fn sheriff() -> Arc<Sheriff> {
        Sheriff::new(SheriffId("test".into()), Arc::new(MemoryTransport::new()), false)
    }

    #[test]
    fn load_then_save_round_trips_command_fields() {
        let sh = sheriff();
        let mgr = ScriptManager::new();

        let mut tree = ConfigTree::default();
        tree.groups.push(GroupNode {
            name: "web".into(),
            groups: vec![],
            commands: vec![CommandNode {
                exec: "/bin/sleep 60".into(),
                command_id: "s1".into(),
                deputy: "dep1".into(),
                auto_respawn: true,
                stop_signal: 15,
                stop_time_allowed: 5,
            }],
        });

        load_config(&sh, &mgr, &tree).unwrap();
        assert_eq!(sh.get_all_commands().len(), 1);

        let saved = save_config(&sh, &mgr);
        let (path, node) = saved.walk_commands().remove(0);
        assert_eq!(path, "web");
        assert_eq!(node.command_id, "s1");
        assert_eq!(node.exec, "/bin/sleep 60");
        assert!(node.auto_respawn);

        sh.shutdown();
    }

    #[test]
    fn load_rejected_when_commands_already_exist() {
        let sh = sheriff();
        let mgr = ScriptManager::new();
        sh.add_command(AddCommandRequest {
            deputy_id: "dep1".into(),
            spec: CommandSpec {
                exec_str: "/bin/true".into(),
                command_id: "s1".into(),
                group: String::new(),
                auto_respawn: false,
                stop_signal: 15,
                stop_time_allowed: 5,
            },
        })
        .unwrap();

        let tree = ConfigTree::default();
        let err = load_config(&sh, &mgr, &tree).unwrap_err();
        assert!(matches!(err, ConfigError::CommandsAlreadyExist(1)));

        sh.shutdown();
    }
}
