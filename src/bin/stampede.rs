//! Stampede CLI: inspect and lint scenario files.
//!
//! Loads scenario documents (YAML or JSON), prints their step lists,
//! and reports authoring problems the orchestrator would otherwise
//! surface only at run time: duplicate step names, variable
//! references to unknown or later steps, and invalid URLs.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use stampede::model::Scenario;
use stampede::resolver;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Scenario inspector and linter for the stampede orchestration
/// core.
#[derive(Parser, Debug)]
#[command(name = "stampede", version, about)]
struct Cli {
    /// Scenario file or directory path.
    #[arg(short = 'p', long = "path", default_value = "scenarios")]
    path: String,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Only lint; skip the step listing.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .try_init();
}

fn is_scenario_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read scenario file: {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "json") {
        Scenario::from_json(&content).context(format!(
            "Failed to parse scenario JSON from {}",
            path.display()
        ))
    } else {
        Scenario::from_yaml(&content).context(format!(
            "Failed to parse scenario YAML from {}",
            path.display()
        ))
    }
}

fn collect_scenarios(path: &Path) -> Result<Vec<Scenario>> {
    if path.is_file() {
        return Ok(vec![load_scenario(path)?]);
    }

    let mut scenarios = Vec::new();
    for entry in std::fs::read_dir(path)
        .context(format!("Failed to read directory: {}", path.display()))?
    {
        let entry_path = entry?.path();
        if entry_path.is_file() && is_scenario_file(&entry_path) {
            match load_scenario(&entry_path) {
                Ok(scenario) => scenarios.push(scenario),
                Err(err) => warn!("skipping {}: {}", entry_path.display(), err),
            }
        }
    }
    Ok(scenarios)
}

/// Lint one scenario. Returns the list of problems found.
fn lint_scenario(scenario: &Scenario) -> Vec<String> {
    let mut problems = Vec::new();

    // Duplicate display names make {{name.path}} addressing
    // ambiguous; the resolver keeps the first writer.
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &scenario.steps {
        if !seen.insert(step.name.as_str()) {
            problems.push(format!(
                "duplicate step name '{}': variable addressing is ambiguous",
                step.name
            ));
        }
    }

    // A reference only resolves against steps that already ran.
    let mut known: HashSet<&str> = HashSet::new();
    for step in &scenario.steps {
        let mut texts: Vec<&str> = vec![&step.url];
        for (k, v) in &step.headers {
            texts.push(k);
            texts.push(v);
        }
        if let Some(body) = &step.body {
            texts.push(body);
        }

        for text in texts {
            for referenced in resolver::references(text) {
                if !known.contains(referenced.as_str()) {
                    let later = scenario.steps.iter().any(|s| s.name == referenced);
                    problems.push(if later {
                        format!(
                            "step '{}' references '{}' which runs later: the placeholder will be sent verbatim",
                            step.name, referenced
                        )
                    } else {
                        format!(
                            "step '{}' references unknown step '{}'",
                            step.name, referenced
                        )
                    });
                }
            }
        }

        known.insert(step.name.as_str());
    }

    // Non-blank, non-templated URLs must parse as absolute http(s).
    for step in &scenario.steps {
        let url = step.url.trim();
        if url.is_empty() || url.contains("{{") {
            continue;
        }
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => problems.push(format!(
                "step '{}' has a non-http(s) URL scheme '{}'",
                step.name,
                parsed.scheme()
            )),
            Err(err) => problems.push(format!(
                "step '{}' has an invalid URL '{}': {}",
                step.name, url, err
            )),
        }
    }

    problems
}

fn print_scenario(scenario: &Scenario) {
    info!(
        "scenario: {} ({} step{})",
        scenario.name,
        scenario.steps.len(),
        if scenario.steps.len() == 1 { "" } else { "s" }
    );
    for (i, step) in scenario.steps.iter().enumerate() {
        let url = if step.url.trim().is_empty() {
            "(no URL, will be skipped)"
        } else {
            &step.url
        };
        info!("  {}. {}: {} {}", i + 1, step.name, step.method, url);
        for a in &step.assertions {
            info!("       assert {:?} {}", a.kind, a.value);
        }
    }
}


fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let path = PathBuf::from(&args.path);
    if !path.exists() {
        return Err(anyhow!("Path does not exist: {}", path.display()));
    }

    let scenarios = collect_scenarios(&path)?;
    if scenarios.is_empty() {
        return Err(anyhow!("No scenario files found under {}", path.display()));
    }

    let mut problem_count = 0;
    for scenario in &scenarios {
        if !args.quiet {
            print_scenario(scenario);
        }

        let problems = lint_scenario(scenario);
        for problem in &problems {
            error!("[{}] {}", scenario.name, problem);
        }
        problem_count += problems.len();
    }

    if problem_count > 0 {
        error!(
            "{} problem(s) across {} scenario(s)",
            problem_count,
            scenarios.len()
        );
        exit(1);
    }

    info!("{} scenario(s) OK", scenarios.len());
    Ok(())
}
