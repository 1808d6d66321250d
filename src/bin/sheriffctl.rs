//! Headless front-end binary over the `sheriff` library (spec §6). Loads
//! a config file, optionally runs one script to completion, and prints
//! listener events to stdout. Not part of the reconciliation engine —
//! a thin consumer of its public API, matching spec §1's framing of
//! front-ends as external collaborators.

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use sheriff::cli::{exit_code, Cli, OnScriptComplete};
use sheriff::config::{load_config, loader, text};
use sheriff::ids::SheriffId;
use sheriff::logging::LoggingConfig;
use sheriff::sheriff::Sheriff;
use sheriff::transport::memory::MemoryTransport;
use sheriff::transport::Transport;
use sheriff::{ScriptEvent, ScriptManager};

/// Polling interval for [`spawn_receive_loop`]. The `Transport` trait
/// exposes only non-blocking drains (spec §6), so the "transport receive
/// loop" worker spec §5 describes is realized here as a short-period poll
/// rather than a blocking recv — the real message-broker binding this
/// crate's trait is designed to sit in front of would instead block.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spawns the thread that feeds inbound `DeputyInfo`/`Orders` from the
/// transport into the Sheriff. This is the one core worker the library
/// itself does not own: `Transport` is an external collaborator (spec
/// §1), so whoever embeds a Sheriff against a real binding is expected to
/// drive this loop the way this binary does for `MemoryTransport`.
fn spawn_receive_loop(transport: Arc<MemoryTransport>, sheriff: Arc<Sheriff>, exiting: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !exiting.load(Ordering::SeqCst) {
            for msg in transport.poll_deputy_info() {
                match msg {
                    Ok(info) => sheriff.on_deputy_info(info),
                    Err(err) => warn!(%err, "dropping undecodable DeputyInfo"),
                }
            }
            for msg in transport.poll_orders() {
                match msg {
                    Ok(orders) => sheriff.on_orders(orders),
                    Err(err) => warn!(%err, "dropping undecodable Orders"),
                }
            }
            std::thread::sleep(RECEIVE_POLL_INTERVAL);
        }
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = LoggingConfig::default().try_init() {
        eprintln!("warning: {err}");
    }

    if cli.local_deputy {
        warn!("`-l` requested an in-process deputy; deputy execution is an external collaborator of this crate and was not started");
    }

    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId::generate(), transport.clone() as Arc<dyn Transport>, cli.observer);
    let manager = ScriptManager::new();
    manager.wire(&sheriff);

    manager.add_listener(|event| match &event {
        ScriptEvent::ScriptStarted(name) => info!(script = %name, "script started"),
        ScriptEvent::ScriptActionExecuting(action) => info!(?action, "executing action"),
        ScriptEvent::ScriptFinished(name) => info!(script = %name, "script finished"),
        ScriptEvent::ScriptAborted(name) => warn!(script = %name, "script aborted"),
    });

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupted);
    if let Err(err) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        error!(%err, "could not install Ctrl-C handler");
    }

    let receive_exiting = Arc::new(AtomicBool::new(false));
    let receive_handle = spawn_receive_loop(transport, Arc::clone(&sheriff), Arc::clone(&receive_exiting));

    let exit = run(&cli, &sheriff, &manager, &interrupted);

    receive_exiting.store(true, Ordering::SeqCst);
    let _ = receive_handle.join();
    sheriff.shutdown();
    manager.shutdown();
    ExitCode::from(exit as u8)
}

fn run(cli: &Cli, sheriff: &Sheriff, manager: &ScriptManager, interrupted: &AtomicBool) -> i32 {
    let Some(path) = &cli.config_file else {
        return exit_code::CLEAN;
    };

    let tree = match load_config_file(path) {
        Ok(t) => t,
        Err(err) => {
            error!(%err, path = %path.display(), "failed to load config file");
            return exit_code::ARGUMENT_ERROR;
        }
    };

    if let Err(err) = load_config(sheriff, manager, &tree) {
        error!(%err, "failed to apply config to sheriff");
        return exit_code::ARGUMENT_ERROR;
    }

    let Some(script_name) = &cli.script_name else {
        return exit_code::CLEAN;
    };

    let errors = manager.check_script_for_errors(script_name);
    if !errors.is_empty() {
        for e in &errors {
            error!(%e, script = %script_name, "script validation error");
        }
        return exit_code::ARGUMENT_ERROR;
    }

    if let Err(err) = manager.run_script(script_name) {
        error!(%err, "failed to start script");
        return exit_code::SCRIPT_OR_DEPUTY_FAILURE;
    }

    while manager.is_running() {
        if interrupted.load(Ordering::SeqCst) {
            info!("interrupted, aborting running script");
            manager.abort_script();
            return exit_code::SCRIPT_OR_DEPUTY_FAILURE;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    match cli.on_script_complete {
        OnScriptComplete::Exit => exit_code::CLEAN,
        OnScriptComplete::Observe => {
            sheriff.set_observer(true);
            info!("script complete, continuing as observer");
            while !interrupted.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
            exit_code::CLEAN
        }
    }
}

fn load_config_file(path: &Path) -> Result<sheriff::config::ConfigTree, String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => loader::load_from_path(path).map_err(|e| e.to_string()),
        _ => {
            let src = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
            text::parse(&src).map_err(|e| e.to_string())
        }
    }
}
