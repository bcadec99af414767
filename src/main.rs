use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use render_runtime::hydration::collect_manifest;
use render_runtime::{PageState, RenderTree, RuntimeConfig};

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    pretty: bool,
    manifest: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    root: String,
    tree: RenderTree,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<Vec<String>>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("[render-runtime] {:#}", err);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args(env::args().skip(1))?;

    let mut stdin_payload = String::new();
    io::stdin()
        .read_to_string(&mut stdin_payload)
        .context("failed to read stdin")?;
    if stdin_payload.trim().is_empty() {
        bail!("stdin payload is empty");
    }

    let mut state = PageState::from_json_str(&stdin_payload).context("invalid page state JSON")?;
    if let Some(path) = &args.config {
        state.config = RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?;
    } else {
        state.config = state.config.with_env_overrides();
    }

    let (runtime, root) = state.into_runtime()?;
    let tree = runtime.build_tree(&root);
    let manifest = args.manifest.then(|| {
        collect_manifest(runtime.registry(), &root)
            .components
            .into_iter()
            .collect()
    });

    let output = Output {
        root: root.to_string(),
        tree,
        manifest,
    };
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    bail!("missing value for --config");
                };
                parsed.config = Some(PathBuf::from(path));
            }
            "--pretty" => parsed.pretty = true,
            "--manifest" => parsed.manifest = true,
            "-h" | "--help" => {
                println!("usage: render-runtime [--config <file>] [--pretty] [--manifest] < page-state.json");
                process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&["--config", "rt.json", "--pretty"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("rt.json")));
        assert!(parsed.pretty);
        assert!(!parsed.manifest);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
