//! diskforge – command-line front end.
//!
//! Startup order:
//! 1. Parse arguments and load configuration from the environment.
//! 2. Initialise tracing.
//! 3. Run one subcommand; conversions and acquisition are rendered from the
//!    event channel until their `Done` event.

mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use diskforge_core::{
    Catalog, Config, ConversionIntent, DiskFormat, EventChannel, Orchestrator, default_destination,
};
use tracing::info;

use crate::render::Renderer;

#[derive(Debug, Parser)]
#[command(name = "diskforge", version, about = "Convert virtual disk images with qemu-img")]
struct Cli {
    /// Use this qemu-img instead of searching for one.
    #[arg(long, global = true, value_name = "PATH")]
    qemu_img: Option<PathBuf>,

    /// Directory `install` writes qemu-img into.
    #[arg(long, global = true, value_name = "DIR")]
    install_dir: Option<PathBuf>,

    /// Tracing filter, e.g. `debug` or `diskforge_core=trace`.
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    /// Emit tracing output as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    /// Show raw qemu-img output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a disk image.
    Convert(ConvertArgs),
    /// List supported disk formats.
    Formats,
    /// List named multi-stage modes.
    Modes,
    /// Show which qemu-img would be used.
    Locate,
    /// Download qemu-img into the install directory.
    Install {
        /// `owner/repo` to take the release from.
        #[arg(long)]
        repo: Option<String>,
    },
}

#[derive(Debug, Args)]
struct ConvertArgs {
    source: PathBuf,

    /// Defaults to `<source stem>_converted<ext>` next to the source.
    destination: Option<PathBuf>,

    /// Source format tag; inferred from the source extension when omitted.
    #[arg(long, conflicts_with = "mode")]
    from: Option<String>,

    /// Output format tag; inferred from the destination extension when omitted.
    #[arg(long, conflicts_with = "mode")]
    to: Option<String>,

    /// Run a named mode instead of a single conversion.
    #[arg(long)]
    mode: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // ── 1. Arguments and configuration ────────────────────────────────────────
    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(path) = cli.qemu_img.clone() {
        cfg.tool_override = Some(path);
    }
    if let Some(dir) = cli.install_dir.clone() {
        cfg.install_dir = dir;
    }
    cfg.log_json |= cli.log_json;

    // ── 2. Tracing ────────────────────────────────────────────────────────────
    init_tracing(&cfg, cli.log.as_deref());
    info!(version = env!("CARGO_PKG_VERSION"), "diskforge starting");

    // ── 3. Command ────────────────────────────────────────────────────────────
    let success = match cli.command {
        Command::Formats => {
            print_formats();
            true
        }
        Command::Modes => {
            print_modes(&Catalog::default());
            true
        }
        Command::Locate => {
            let (tx, _rx) = EventChannel::unbounded();
            print_location(&Orchestrator::new(cfg, tx));
            true
        }
        Command::Install { repo } => {
            if let Some(repo) = repo {
                cfg.release_repo = repo;
            }
            let (tx, rx) = EventChannel::unbounded();
            let orchestrator = Orchestrator::new(cfg, tx);
            let handle = orchestrator.start_acquisition()?;
            let success = Renderer::new(cli.verbose).run(rx).await;
            handle.await.context("acquisition task panicked")? && success
        }
        Command::Convert(args) => {
            let (tx, rx) = EventChannel::unbounded();
            let orchestrator = Orchestrator::new(cfg, tx);
            let (intent, destination) = plan(orchestrator.catalog(), &args)?;
            let handle = orchestrator.start_conversion(&args.source, destination, intent)?;
            let success = Renderer::new(cli.verbose).run(rx).await;
            handle.await.context("conversion task panicked")? && success
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Log filter by precedence: `--log`, then `RUST_LOG`, then `DISKFORGE_LOG`
/// (already folded into `configured`).
fn filter_directive(flag: Option<&str>, rust_log: Option<&str>, configured: &str) -> String {
    let set = |v: &&str| !v.trim().is_empty();
    flag.filter(set)
        .or(rust_log.filter(set))
        .unwrap_or(configured)
        .to_string()
}

fn init_tracing(cfg: &Config, flag: Option<&str>) {
    let rust_log = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(flag, rust_log.as_deref(), &cfg.log_level);
    let env_filter = match directive.parse::<tracing_subscriber::EnvFilter>() {
        Ok(f) => f,
        Err(e) => {
            eprintln!(
                "WARN: log filter '{}' is not a valid tracing filter ({}); \
                 falling back to 'warn'",
                directive, e
            );
            tracing_subscriber::EnvFilter::new("warn")
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Turn CLI arguments into an intent and a destination path.
fn plan(catalog: &Catalog, args: &ConvertArgs) -> anyhow::Result<(ConversionIntent, PathBuf)> {
    if let Some(key) = &args.mode {
        let destination = match &args.destination {
            Some(dst) => dst.clone(),
            None => {
                let output = catalog
                    .mode(key)
                    .and_then(|m| m.pipeline.output_format())
                    .with_context(|| format!("unknown mode `{key}`; see `diskforge modes`"))?;
                default_destination(&args.source, output)
            }
        };
        return Ok((ConversionIntent::mode(key.clone()), destination));
    }

    let from = match &args.from {
        Some(tag) => tag.clone(),
        None => match format_of(&args.source) {
            Some(f) => f.to_string(),
            None => bail!(
                "cannot infer the format of {}; pass --from",
                args.source.display()
            ),
        },
    };
    let to = match (&args.to, &args.destination) {
        (Some(tag), _) => tag.clone(),
        (None, Some(dst)) => match format_of(dst) {
            Some(f) => f.to_string(),
            None => bail!("cannot infer the format of {}; pass --to", dst.display()),
        },
        (None, None) => bail!("pass --to or a destination path"),
    };
    let destination = match &args.destination {
        Some(dst) => dst.clone(),
        None => {
            let format: DiskFormat = to
                .parse()
                .map_err(|_| anyhow::anyhow!("unknown format `{to}`; see `diskforge formats`"))?;
            default_destination(&args.source, format)
        }
    };
    Ok((ConversionIntent::formats(from, to), destination))
}

fn format_of(path: &Path) -> Option<DiskFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(DiskFormat::from_extension)
}

fn print_formats() {
    for f in Catalog::default().formats() {
        let marker = if f.recommended() { " (recommended)" } else { "" };
        println!("{:<10} {:<7} {}{marker}", f.to_string(), f.extension(), f.description());
    }
}

fn print_modes(catalog: &Catalog) {
    for mode in catalog.modes() {
        println!("{:<22} {}", mode.key, mode.label);
        println!("{:<22} {}", "", mode.description);
        for (i, label) in mode.pipeline.step_labels().iter().enumerate() {
            println!("{:<22}   {i}. {label}", "");
        }
    }
}

fn print_location(orchestrator: &Orchestrator) {
    match orchestrator.locate_tool() {
        Some(location) => println!("qemu-img: {} ({:?})", location.path.display(), location.kind),
        None => println!("qemu-img: not found (run `diskforge install`)"),
    }
    match orchestrator.installed_version() {
        Some(version) => println!("installed: {} from {}", version.tag_name, version.repo),
        None => println!("installed: none"),
    }
    println!("install dir: {}", orchestrator.config().install_dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &[&str]) -> ConvertArgs {
        let mut argv = vec!["diskforge", "convert"];
        argv.extend_from_slice(line);
        match Cli::parse_from(argv).command {
            Command::Convert(a) => a,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn formats_are_inferred_from_extensions() {
        let (intent, dst) = plan(&Catalog::default(), &args(&["vm.vhdx", "vm.vmdk"])).unwrap();
        assert_eq!(intent, ConversionIntent::formats("vhdx", "vmdk"));
        assert_eq!(dst, PathBuf::from("vm.vmdk"));
    }

    #[test]
    fn destination_defaults_from_target_format() {
        let (_, dst) = plan(&Catalog::default(), &args(&["/vm/a.img", "--to", "qcow2"])).unwrap();
        assert_eq!(dst, PathBuf::from("/vm/a_converted.qcow2"));
    }

    #[test]
    fn mode_destination_uses_last_stage() {
        let (intent, dst) = plan(
            &Catalog::default(),
            &args(&["old.vhd", "--mode", "virtualpc-to-vmware"]),
        )
        .unwrap();
        assert_eq!(intent, ConversionIntent::mode("virtualpc-to-vmware"));
        assert_eq!(dst, PathBuf::from("old_converted.vmdk"));
    }

    #[test]
    fn unknown_extension_needs_flags() {
        assert!(plan(&Catalog::default(), &args(&["disk.bin", "out.qcow2"])).is_err());
        assert!(plan(&Catalog::default(), &args(&["disk.img"])).is_err());
    }

    #[test]
    fn log_flag_beats_environment() {
        assert_eq!(filter_directive(Some("debug"), Some("trace"), "warn"), "debug");
        assert_eq!(filter_directive(None, Some("trace"), "warn"), "trace");
        assert_eq!(filter_directive(None, None, "info"), "info");
        assert_eq!(filter_directive(None, Some(" "), "info"), "info");
        assert_eq!(filter_directive(Some(""), Some("trace"), "info"), "trace");
    }

    #[test]
    fn mode_conflicts_with_format_flags() {
        let argv = ["diskforge", "convert", "a.img", "--mode", "compress-qcow2", "--to", "vdi"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
