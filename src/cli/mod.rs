//! CLI subcommands: init, validate, list, show, serve, install, uninstall,
//! apply-step, revert-step, status.

use crate::api;
use crate::config::{Overrides, ServerConfig, DEFAULT_CONFIG_FILE};
use crate::core::error::{RecipeError, Result};
use crate::core::executor::RecipeExecutionService;
use crate::core::registry::DirectoryRecipeProvider;
use crate::core::types::{ExecutionDto, ExecutionState, Operation, StepDto};
use crate::core::state::LockStore;
use crate::core::{parser, recipe};
use crate::provenance::eventlog;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory overrides shared by commands that touch recipes or state.
#[derive(Args, Debug, Clone, Default)]
pub struct DirArgs {
    /// Recipes directory
    #[arg(long)]
    pub recipes_dir: Option<PathBuf>,

    /// Data directory steps write into
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Local plugin repository
    #[arg(long)]
    pub plugin_repo: Option<PathBuf>,

    /// State directory (lock files, event logs)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

impl DirArgs {
    fn overrides(&self, bind: Option<String>) -> Overrides {
        Overrides {
            bind,
            recipes_dir: self.recipes_dir.clone(),
            data_dir: self.data_dir.clone(),
            plugin_repo: self.plugin_repo.clone(),
            state_dir: self.state_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new recipectl workspace
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate recipe files without running anything
    Validate {
        #[command(flatten)]
        dirs: DirArgs,
    },

    /// List recipes and their status
    List {
        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Print one recipe as JSON
    Show {
        /// Recipe id
        recipe: String,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Apply every step of a recipe, in order
    Install {
        /// Recipe id
        recipe: String,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Revert every step of a recipe, in reverse order
    Uninstall {
        /// Recipe id
        recipe: String,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Apply a single step
    ApplyStep {
        /// Recipe id
        recipe: String,

        /// Zero-based step number
        step: usize,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Revert a single step
    RevertStep {
        /// Recipe id
        recipe: String,

        /// Zero-based step number
        step: usize,

        #[command(flatten)]
        dirs: DirArgs,
    },

    /// Show persisted step status and recent events
    Status {
        /// Recipe id (default: all)
        recipe: Option<String>,

        /// Number of recent events to show
        #[arg(short = 'n', long, default_value_t = 5)]
        events: usize,

        #[command(flatten)]
        dirs: DirArgs,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands, config: Option<PathBuf>) -> Result<()> {
    let config = config.as_deref();
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { dirs } => cmd_validate(&load_config(config, &dirs, None)?),
        Commands::List { dirs } => cmd_list(&load_config(config, &dirs, None)?),
        Commands::Show { recipe, dirs } => cmd_show(&load_config(config, &dirs, None)?, &recipe),
        Commands::Serve { bind, dirs } => cmd_serve(load_config(config, &dirs, bind)?).await,
        Commands::Install { recipe, dirs } => {
            cmd_run(&load_config(config, &dirs, None)?, &recipe, Operation::Install).await
        }
        Commands::Uninstall { recipe, dirs } => {
            cmd_run(&load_config(config, &dirs, None)?, &recipe, Operation::Uninstall).await
        }
        Commands::ApplyStep { recipe, step, dirs } => {
            cmd_step(&load_config(config, &dirs, None)?, &recipe, step, true).await
        }
        Commands::RevertStep { recipe, step, dirs } => {
            cmd_step(&load_config(config, &dirs, None)?, &recipe, step, false).await
        }
        Commands::Status {
            recipe,
            events,
            dirs,
        } => cmd_status(&load_config(config, &dirs, None)?, recipe.as_deref(), events),
    }
}

fn load_config(path: Option<&Path>, dirs: &DirArgs, bind: Option<String>) -> Result<ServerConfig> {
    let mut config = ServerConfig::resolve(path)?;
    config.apply_overrides(dirs.overrides(bind));
    config.validate()?;
    Ok(config)
}

/// Open the recipes directory and wire up the execution service.
pub fn build_service(config: &ServerConfig) -> Result<Arc<RecipeExecutionService>> {
    let locks = config
        .policy
        .lock_file
        .then(|| LockStore::new(&config.state_dir));
    let provider = DirectoryRecipeProvider::open(&config.recipes_dir, locks)?;
    Ok(RecipeExecutionService::new(
        Arc::new(provider),
        config.step_context(),
        &config.state_dir,
        config.policy.clone(),
    ))
}

const CONFIG_TEMPLATE: &str = r#"bind: 127.0.0.1:3100
recipes_dir: recipes
data_dir: data
plugin_repo: plugin-repo
state_dir: state

policy:
  failure: stop_on_first
  execution_timeout_secs: 600
  step_timeout_secs: 120
  events: true
  lock_file: true
"#;

const RECIPE_TEMPLATE: &str = r#"recipe:
  id: enable-foo
  name: Enable Foo
  description: Install the foo plugin and switch on its UI

params:
  plugin: foo

steps:
  - type: install_plugin
    name: Install {{params.plugin}}
    plugin_id: "{{params.plugin}}"
  - type: feature_flag
    flag: "{{params.plugin}}-ui"
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        return Err(RecipeError::config(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    for dir in ["recipes", "data", "state", "plugin-repo/foo"] {
        std::fs::create_dir_all(path.join(dir))?;
    }
    std::fs::write(&config_path, CONFIG_TEMPLATE)?;
    let recipe_path = path.join("recipes").join("enable-foo.yaml");
    std::fs::write(&recipe_path, RECIPE_TEMPLATE)?;
    std::fs::write(
        path.join("plugin-repo").join("foo").join("plugin.json"),
        "{\"id\": \"foo\", \"name\": \"Foo\"}\n",
    )?;

    println!("Initialized recipectl workspace at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}", recipe_path.display());
    println!("  Created: {}/", path.join("plugin-repo").display());
    Ok(())
}

fn cmd_validate(config: &ServerConfig) -> Result<()> {
    let files = parser::discover_recipe_files(&config.recipes_dir)?;
    let mut failures = 0;
    let mut seen = std::collections::HashSet::new();

    for path in &files {
        let file = match recipe::load_recipe_file(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("  ERROR: {}", e);
                failures += 1;
                continue;
            }
        };
        let mut errors: Vec<String> = parser::validate_recipe(&file)
            .iter()
            .map(|e| e.to_string())
            .collect();
        if !seen.insert(file.recipe.id.clone()) {
            errors.push(format!("duplicate recipe id '{}'", file.recipe.id));
        }
        if errors.is_empty() {
            println!(
                "OK: {} ({} step(s)) {}",
                file.recipe.id,
                file.steps.len(),
                path.display()
            );
        } else {
            for e in &errors {
                eprintln!("  ERROR: {}: {}", path.display(), e);
            }
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(RecipeError::validation(format!(
            "{} of {} recipe file(s) invalid",
            failures,
            files.len()
        )));
    }
    println!("{} recipe file(s) valid.", files.len());
    Ok(())
}

fn cmd_list(config: &ServerConfig) -> Result<()> {
    let service = build_service(config)?;
    let recipes = service.list_recipes();
    if recipes.is_empty() {
        println!("No recipes in {}", config.recipes_dir.display());
        return Ok(());
    }
    for r in &recipes {
        println!("{:<24} {:<14} {} ({} steps)", r.id, r.status.to_string(), r.name, r.steps.len());
    }
    Ok(())
}

fn cmd_show(config: &ServerConfig, id: &str) -> Result<()> {
    let service = build_service(config)?;
    let dto = service.get_recipe(id)?;
    println!("{}", serde_json::to_string_pretty(&dto)?);
    Ok(())
}

async fn cmd_serve(config: ServerConfig) -> Result<()> {
    let addr = config.socket_addr()?;
    let service = build_service(&config)?;
    spawn_reload_on_hangup(Arc::clone(&service));

    println!(
        "recipectl {} serving {} recipe(s) on http://{}/api",
        env!("CARGO_PKG_VERSION"),
        service.list_recipes().len(),
        addr
    );
    api::serve(Arc::clone(&service), addr, shutdown_signal()).await?;

    service.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(service: Arc<RecipeExecutionService>) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGHUP; reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match service.reload() {
                Ok(count) => tracing::info!(recipes = count, "recipes reloaded"),
                Err(e) => tracing::error!(error = %e, "reload failed; keeping previous recipes"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_service: Arc<RecipeExecutionService>) {}

fn print_execution(exec: &ExecutionDto) {
    for outcome in &exec.outcomes {
        match outcome.error {
            Some(ref err) => println!(
                "  step {}: {} ({} ms) {}",
                outcome.index, outcome.status, outcome.duration_ms, err
            ),
            None => println!(
                "  step {}: {} ({} ms)",
                outcome.index, outcome.status, outcome.duration_ms
            ),
        }
    }
}

async fn cmd_run(config: &ServerConfig, id: &str, operation: Operation) -> Result<()> {
    let service = build_service(config)?;
    let total = service.get_recipe(id)?.steps.len();
    println!("{} {} ({} steps)", operation, id, total);

    let exec = service.run_to_completion(id, operation).await?;
    print_execution(&exec);
    println!();

    match exec.state {
        ExecutionState::Succeeded => {
            println!(
                "{} complete: {} step(s) in run {}.",
                operation,
                exec.outcomes.len(),
                exec.run_id
            );
            Ok(())
        }
        state => {
            let failed = exec.outcomes.iter().filter(|o| o.error.is_some()).count();
            println!("{} finished {}: {} step(s) FAILED", operation, state, failed);
            Err(RecipeError::state(format!(
                "{} of '{}' ended {}",
                operation, id, state
            )))
        }
    }
}

fn print_step(step: &StepDto) {
    println!("  step {}: {} [{}] {}", step.index, step.status, step.kind, step.name);
    if let Some(ref err) = step.error {
        println!("    error: {}", err);
    }
}

async fn cmd_step(config: &ServerConfig, id: &str, index: usize, apply: bool) -> Result<()> {
    let service = build_service(config)?;
    let step = if apply {
        service.apply_step(id, index).await?
    } else {
        service.revert_step(id, index).await?
    };
    print_step(&step);
    Ok(())
}

fn cmd_status(config: &ServerConfig, filter: Option<&str>, events: usize) -> Result<()> {
    let locks = LockStore::new(&config.state_dir);
    let state_dir = locks.root();
    let names: Vec<String> = locks
        .recipes()?
        .into_iter()
        .filter(|name| filter.is_none_or(|f| f == name))
        .collect();

    let mut found = false;
    for name in &names {
        let Some(lock) = locks.load(name)? else {
            continue;
        };
        found = true;
        println!("Recipe: {}", lock.recipe);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        for (index, step) in &lock.steps {
            let when = step.updated_at.as_deref().unwrap_or("-");
            println!("    {}: {} [{}] {}", index, step.status, step.kind, when);
            if let Some(ref err) = step.error {
                println!("       error: {}", err);
            }
        }

        let recent = eventlog::read_events(state_dir, name, events)?;
        if !recent.is_empty() {
            println!("  Recent events:");
            for e in &recent {
                println!("    {} {}", e.ts, serde_json::to_string(&e.event)?);
            }
        }
    }

    if !found {
        match filter {
            Some(id) => println!("No state for recipe '{}'", id),
            None => println!("No state found in {}", state_dir.display()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, DirArgs) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let dirs = DirArgs {
            recipes_dir: Some(dir.path().join("recipes")),
            data_dir: Some(dir.path().join("data")),
            plugin_repo: Some(dir.path().join("plugin-repo")),
            state_dir: Some(dir.path().join("state")),
        };
        (dir, dirs)
    }

    fn config(dirs: &DirArgs) -> ServerConfig {
        load_config(None, dirs, None).unwrap()
    }

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        assert!(dir.path().join("recipectl.yaml").exists());
        assert!(dir.path().join("recipes/enable-foo.yaml").exists());
        assert!(dir.path().join("plugin-repo/foo/plugin.json").exists());
        let cfg = ServerConfig::load(&dir.path().join("recipectl.yaml")).unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let err = cmd_init(dir.path()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_validate_template() {
        let (_dir, dirs) = workspace();
        cmd_validate(&config(&dirs)).unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let (dir, dirs) = workspace();
        std::fs::write(
            dir.path().join("recipes/bad.yaml"),
            "recipe: {id: Bad, name: x}\nsteps: []\n",
        )
        .unwrap();
        let err = cmd_validate(&config(&dirs)).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
    }

    #[test]
    fn test_list_and_show() {
        let (_dir, dirs) = workspace();
        cmd_list(&config(&dirs)).unwrap();
        cmd_show(&config(&dirs), "enable-foo").unwrap();
        assert!(matches!(
            cmd_show(&config(&dirs), "ghost"),
            Err(RecipeError::RecipeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_install_uninstall_roundtrip() {
        let (dir, dirs) = workspace();
        let cfg = config(&dirs);

        cmd_run(&cfg, "enable-foo", Operation::Install).await.unwrap();
        assert!(dir.path().join("data/plugins/foo/plugin.json").exists());
        let lock = LockStore::new(&cfg.state_dir)
            .load("enable-foo")
            .unwrap()
            .unwrap();
        assert_eq!(lock.steps.len(), 2);

        // Fresh service picks up persisted status
        let dto = build_service(&cfg).unwrap().get_recipe("enable-foo").unwrap();
        assert_eq!(dto.status, crate::core::types::RecipeStatus::Installed);

        cmd_run(&cfg, "enable-foo", Operation::Uninstall).await.unwrap();
        assert!(!dir.path().join("data/plugins/foo").exists());
        cmd_status(&cfg, Some("enable-foo"), 3).unwrap();
    }

    #[tokio::test]
    async fn test_install_failure_is_error() {
        let (dir, dirs) = workspace();
        std::fs::remove_dir_all(dir.path().join("plugin-repo/foo")).unwrap();
        let err = cmd_run(&config(&dirs), "enable-foo", Operation::Install)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FAILED"));
    }

    #[tokio::test]
    async fn test_single_steps() {
        let (dir, dirs) = workspace();
        let cfg = config(&dirs);
        cmd_step(&cfg, "enable-foo", 1, true).await.unwrap();
        let flags = std::fs::read_to_string(dir.path().join("data/feature_flags.yaml")).unwrap();
        assert!(flags.contains("foo-ui: true"));
        cmd_step(&cfg, "enable-foo", 1, false).await.unwrap();
        assert!(matches!(
            cmd_step(&cfg, "enable-foo", 9, true).await,
            Err(RecipeError::StepIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_status_empty_and_missing() {
        let (dir, dirs) = workspace();
        cmd_status(&config(&dirs), None, 5).unwrap();
        let mut cfg = config(&dirs);
        cfg.state_dir = dir.path().join("nope");
        cmd_status(&cfg, None, 5).unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_validate_and_step() {
        let (_dir, dirs) = workspace();
        dispatch(Commands::Validate { dirs: dirs.clone() }, None)
            .await
            .unwrap();
        dispatch(
            Commands::ApplyStep {
                recipe: "enable-foo".to_string(),
                step: 0,
                dirs: dirs.clone(),
            },
            None,
        )
        .await
        .unwrap();
        dispatch(
            Commands::Status {
                recipe: None,
                events: 2,
                dirs,
            },
            None,
        )
        .await
        .unwrap();
    }
}
