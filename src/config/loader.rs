//! Reads a [`ConfigTree`] from a YAML file on disk. Grounded in the
//! teacher's file-backed config loader: open, then hand the reader
//! straight to `serde_yaml` rather than buffering the whole file first.

use std::fs::File;
use std::path::Path;

use super::error::ConfigError;
use super::tree::ConfigTree;

pub fn load_from_path(path: &Path) -> Result<ConfigTree, ConfigError> {
    let file = File::open(path)?;
    let tree: ConfigTree = serde_yaml::from_reader(file)?;
    Ok(tree)
}

pub fn save_to_path(path: &Path, tree: &ConfigTree) -> Result<(), ConfigError> {
    let file = File::create(path)?;
    serde_yaml::to_writer(file, tree)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tree::{CommandNode, GroupNode};
    use std::io::Write;

    #[test]
    fn round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");

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

        save_to_path(&path, &tree).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = load_from_path(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "groups: [this is not valid: yaml: at all:").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
