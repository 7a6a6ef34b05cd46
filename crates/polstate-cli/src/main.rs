//! CLI entry point for polstate.
//!
//! This module stays thin: it handles argument parsing, I/O and exit codes.
//! Use cases live in the `polstate-app` crate; sources are opened through `polstate-loader`.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use polstate_app::{apply_script, export_reg, import_reg, load_catalog, policy_states};
use polstate_loader::{LoaderSettings, PolicyLoader, SourceKind, platform_host};
use polstate_settings::Overrides;
use polstate_types::{PolicyScope, RegistryHive, RegistryValueType};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "polstate",
    version,
    about = "Inspect, convert and apply registry policy files"
)]
struct Cli {
    /// Path to polstate config TOML (a missing file means defaults).
    #[arg(long, default_value = "polstate.toml")]
    config: Utf8PathBuf,

    /// Override platform preset (workstation|home|offline).
    #[arg(long)]
    platform: Option<String>,

    /// Override the system root holding the GroupPolicy trees.
    #[arg(long)]
    system_root: Option<String>,

    /// Override how saved GPOs reach effective policy (native|registry-diff|none).
    #[arg(long)]
    refresh: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

/// Where policy data is read from and saved to.
#[derive(Args, Debug)]
struct Target {
    /// Policy file (`Registry.pol`).
    #[arg(required_unless_present = "gpo", conflicts_with = "gpo")]
    pol: Option<Utf8PathBuf>,

    /// Use a GPO below the system root instead: `local`, or a user SID.
    #[arg(long)]
    gpo: Option<String>,

    /// Settings half to work on (machine|user).
    #[arg(long, default_value = "machine")]
    scope: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every entry of a policy file, deletion markers included.
    Dump {
        /// Path to the policy file.
        pol: Utf8PathBuf,
    },

    /// Convert a policy file to registry editor text.
    Export {
        /// Path to the policy file.
        pol: Utf8PathBuf,

        /// Hive the keys are written below (HKLM|HKCU).
        #[arg(long, default_value = "HKLM")]
        hive: String,

        /// Where to write the text (if not specified, prints to stdout).
        #[arg(long, short)]
        out: Option<Utf8PathBuf>,
    },

    /// Merge registry editor text into a policy file.
    Import {
        /// Path to the `.reg` file.
        reg: Utf8PathBuf,

        /// Policy file to create or update.
        #[arg(long, short)]
        out: Utf8PathBuf,

        /// Only keys below this path are imported, relative to it.
        #[arg(long, default_value = "HKLM")]
        prefix: String,
    },

    /// Report the state of every defined policy.
    State {
        /// Policy definitions: a JSON file or a directory of them.
        #[arg(long)]
        definitions: Utf8PathBuf,

        #[command(flatten)]
        target: Target,

        /// Only report this policy.
        #[arg(long)]
        policy: Option<String>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Apply a policy script and save the result.
    Apply {
        /// Policy definitions: a JSON file or a directory of them.
        #[arg(long)]
        definitions: Utf8PathBuf,

        #[command(flatten)]
        target: Target,

        /// Script with one `<policy-id> <state> [element=value ...]` per line.
        #[arg(long)]
        script: Utf8PathBuf,
    },

    /// Bump the version counter of a `gpt.ini`, creating it if missing.
    BumpVersion {
        /// Path to the `gpt.ini`.
        gpt_ini: Utf8PathBuf,

        /// Settings half that changed (machine|user).
        #[arg(long)]
        scope: String,
    },

    /// Print the JSON schema of the config file.
    ConfigSchema,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.cmd {
        Commands::Dump { pol } => cmd_dump(pol),
        Commands::Export { pol, hive, out } => cmd_export(&cli, pol, hive, out.as_deref()),
        Commands::Import { reg, out, prefix } => cmd_import(&cli, reg, out, prefix),
        Commands::State {
            definitions,
            target,
            policy,
            json,
        } => cmd_state(&cli, definitions, target, policy.as_deref(), *json),
        Commands::Apply {
            definitions,
            target,
            script,
        } => cmd_apply(&cli, definitions, target, script),
        Commands::BumpVersion { gpt_ini, scope } => cmd_bump_version(gpt_ini, scope),
        Commands::ConfigSchema => {
            print!("{}", polstate_settings::config_schema_json()?);
            Ok(())
        }
    }
}

fn settings(cli: &Cli) -> anyhow::Result<LoaderSettings> {
    // Missing config file is allowed (defaults apply).
    let cfg_text = std::fs::read_to_string(&cli.config).unwrap_or_default();
    let cfg = if cfg_text.trim().is_empty() {
        polstate_settings::PolstateConfigV1::default()
    } else {
        polstate_settings::parse_config_toml(&cfg_text)
            .with_context(|| format!("parse config: {}", cli.config))?
    };
    let overrides = Overrides {
        platform: cli.platform.clone(),
        system_root: cli.system_root.clone(),
        refresh: cli.refresh.clone(),
    };
    let settings = polstate_settings::resolve_config(cfg, overrides).context("resolve config")?;
    debug!(?settings, "resolved settings");
    Ok(settings)
}

fn parse_scope(name: &str) -> anyhow::Result<PolicyScope> {
    PolicyScope::parse(name)
        .with_context(|| format!("unknown scope: {name} (expected machine|user)"))
}

/// Open `kind` against the host of the machine we run on.
fn open_source(cli: &Cli, kind: SourceKind, scope: PolicyScope) -> anyhow::Result<PolicyLoader> {
    let mut settings = settings(cli)?;
    let host = platform_host(&mut settings);
    PolicyLoader::open(kind, scope, settings, host)
}

fn open_pol(cli: &Cli, path: &Utf8Path, scope: PolicyScope) -> anyhow::Result<PolicyLoader> {
    let kind = SourceKind::PolFile {
        path: path.to_path_buf(),
    };
    open_source(cli, kind, scope)
}

fn open_target(cli: &Cli, target: &Target) -> anyhow::Result<PolicyLoader> {
    let scope = parse_scope(&target.scope)?;
    let kind = match (&target.pol, target.gpo.as_deref()) {
        (Some(path), _) => SourceKind::PolFile { path: path.clone() },
        (None, Some(gpo)) if gpo.eq_ignore_ascii_case("local") => SourceKind::LocalGpo,
        (None, Some(sid)) => SourceKind::UserGpo {
            sid: sid.to_string(),
        },
        (None, None) => anyhow::bail!("a policy file or --gpo is required"),
    };
    open_source(cli, kind, scope)
}

fn write_text_file(path: &Utf8Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create directory: {parent}"))?;
    }
    std::fs::write(path, text).with_context(|| format!("write text: {path}"))?;
    Ok(())
}

fn cmd_dump(path: &Utf8Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("read policy file: {path}"))?;
    let pol = polstate_polfile::PolFile::from_bytes(&bytes)
        .with_context(|| format!("parse policy file: {path}"))?;
    for item in pol.iter() {
        let kind = match RegistryValueType::from_code(item.entry.kind) {
            Some(kind) => format!("{kind:?}"),
            None => format!("type {}", item.entry.kind),
        };
        println!(
            "[{}] {} = {} ({} bytes) {}",
            item.key,
            item.value,
            kind,
            item.entry.data.len(),
            hex::encode(&item.entry.data)
        );
    }
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Utf8Path, hive: &str, out: Option<&Utf8Path>) -> anyhow::Result<()> {
    let scope = match RegistryHive::parse(hive) {
        Some(RegistryHive::LocalMachine) => PolicyScope::Machine,
        Some(RegistryHive::CurrentUser) => PolicyScope::User,
        _ => anyhow::bail!("unsupported hive: {hive} (expected HKLM|HKCU)"),
    };
    let loader = open_pol(cli, path, scope)?;
    let pol = loader
        .pol_file()
        .with_context(|| format!("{} has no policy file", loader.describe()))?;
    let text = export_reg(pol, scope)?;
    match out {
        Some(out) => write_text_file(out, &text).context("write registry text")?,
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_import(cli: &Cli, reg: &Utf8Path, out: &Utf8Path, prefix: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(reg).with_context(|| format!("read registry text: {reg}"))?;
    let scope = match RegistryHive::split_path(prefix) {
        Some((RegistryHive::CurrentUser, _)) => PolicyScope::User,
        _ => PolicyScope::Machine,
    };
    let mut loader = open_pol(cli, out, scope)?;
    let keys = import_reg(&text, prefix, loader.source_mut())?;
    let outcome = loader.save()?;
    eprintln!("polstate: imported {keys} keys; {outcome}");
    Ok(())
}

fn cmd_state(
    cli: &Cli,
    definitions: &Utf8Path,
    target: &Target,
    policy: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let catalog = load_catalog(definitions)?;
    let loader = open_target(cli, target)?;
    let mut states = policy_states(&catalog, loader.source(), loader.scope());
    if let Some(id) = policy {
        states.retain(|status| status.id == id);
        if states.is_empty() {
            anyhow::bail!("unknown policy for {} scope: {id}", loader.scope());
        }
    }

    if json {
        let mut text = serde_json::to_string_pretty(&states).context("serialize states")?;
        text.push('\n');
        print!("{text}");
    } else {
        for status in &states {
            println!("{}\t{}", status.id, status.state);
            for (element, option) in &status.options {
                println!("  {element} = {}", serde_json::to_string(option)?);
            }
        }
    }
    Ok(())
}

fn cmd_apply(
    cli: &Cli,
    definitions: &Utf8Path,
    target: &Target,
    script: &Utf8Path,
) -> anyhow::Result<()> {
    let catalog = load_catalog(definitions)?;
    let script_text =
        std::fs::read_to_string(script).with_context(|| format!("read script: {script}"))?;
    let mut loader = open_target(cli, target)?;
    if !loader.is_writable() {
        anyhow::bail!("{} is not writable", loader.describe());
    }

    let scope = loader.scope();
    let failures = apply_script(&catalog, loader.source_mut(), scope, &script_text);
    let outcome = loader.save()?;
    eprintln!("polstate: {outcome}");

    if failures > 0 {
        eprintln!("polstate: {failures} script line(s) failed");
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_bump_version(path: &Utf8Path, scope: &str) -> anyhow::Result<()> {
    let scope = parse_scope(scope)?;
    let version = polstate_loader::gpt_ini::bump_version_file(path, scope)?;
    println!("{version}");
    Ok(())
}
