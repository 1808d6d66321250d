//! Parsed configuration tree, file/text front-ends, and the stateless
//! binding layer that loads/saves it against live Sheriff/ScriptManager
//! state (spec §4.4, §6).

pub mod binding;
pub mod error;
pub mod loader;
pub mod text;
pub mod tree;

pub use binding::{load_config, save_config};
pub use error::ConfigError;
pub use tree::ConfigTree;
