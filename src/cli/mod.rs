//! The headless CLI front-end surface (spec §6): a thin consumer of the
//! library's public API, not part of the reconciliation engine itself.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// `sheriffctl [config-file] [script-name]` — loads a fleet definition,
/// optionally runs one named script to completion, and exits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to load (brace grammar or YAML, by extension).
    pub config_file: Option<PathBuf>,

    /// Script to run to completion before exiting.
    pub script_name: Option<String>,

    /// Spawn a deputy in-process. The deputy implementation is an
    /// external collaborator of this crate; passing this flag logs a
    /// diagnostic and otherwise has no effect here.
    #[arg(short = 'l', long = "local-deputy")]
    pub local_deputy: bool,

    /// Start in observer mode: never broadcast orders, treat foreign
    /// `Orders` as authoritative state rather than as conflicts.
    #[arg(short = 'o', long = "observer")]
    pub observer: bool,

    /// What to do once `script_name` finishes (or fails): exit the
    /// process, or keep running as an observer.
    #[arg(long = "on-script-complete", value_enum, default_value_t = OnScriptComplete::Exit)]
    pub on_script_complete: OnScriptComplete,

    /// No GUI — accepted for compatibility with the documented flag set;
    /// this binary never has a GUI to suppress.
    #[arg(short = 'n', long = "no-gui")]
    pub no_gui: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnScriptComplete {
    Exit,
    Observe,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Process exit codes per spec §6.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const SCRIPT_OR_DEPUTY_FAILURE: i32 = 1;
    pub const ARGUMENT_ERROR: i32 = 2;
}
