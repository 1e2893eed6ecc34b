// SPDX-License-Identifier: AGPL-3.0-or-later
//! tcex: package TcEx apps and manage their test profiles

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tcex_tools::{
    package::{PackageOptions, PackageReport, Packager},
    profile::{CreateRequest, ProfileGenerator, RedisStore},
    BuildConfig,
};

/// tcex: build tooling for TcEx apps
///
/// Packages app directories into versioned archives and manages the
/// JSON test profiles used to run them.
#[derive(Parser, Debug)]
#[command(name = "tcex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// App directory
    #[arg(short, long, default_value = ".", global = true)]
    app_dir: PathBuf,

    /// Build configuration file, relative to the app directory
    #[arg(short, long, default_value = "tcex.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build versioned app archives
    #[command(alias = "pkg")]
    Package {
        /// Bundle all archives into one
        #[arg(short, long)]
        bundle: bool,

        /// Additional exclude glob (repeatable)
        #[arg(short, long = "exclude")]
        excludes: Vec<String>,

        /// Output directory, relative to the app directory
        #[arg(short, long)]
        outdir: Option<PathBuf>,

        /// Schema file replacing the bundled install.json schema
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Validate manifests and report planned archives only
        #[arg(long)]
        dry_run: bool,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage test profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },

    /// Show configuration
    Config,

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// Create a profile from a manifest
    Create {
        /// Profile name
        #[arg(short, long)]
        name: String,

        /// Profile file name (defaults to <name>.json)
        #[arg(short, long)]
        outfile: Option<String>,

        /// Manifest to derive arguments from
        #[arg(long, default_value = "install.json")]
        ij: String,

        /// Redis host recorded for playbook apps
        #[arg(long, default_value = "localhost")]
        redis_host: String,

        /// Redis port recorded for playbook apps
        #[arg(long, default_value_t = 6379)]
        redis_port: u16,
    },

    /// Delete a profile
    Delete {
        /// Profile name
        #[arg(short, long)]
        name: String,
    },

    /// Upgrade legacy profiles in place
    Update,

    /// Rebuild a profile's validations from stored playbook outputs
    ReplaceValidation {
        /// Profile name
        #[arg(short, long)]
        name: String,

        /// Redis URL (defaults to the host and port recorded in the profile)
        #[arg(long)]
        redis_url: Option<String>,
    },

    /// List profiles
    #[command(alias = "ls")]
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.app_dir.join(&cli.config);

    match cli.command {
        Commands::Version => {
            println!("tcex-tools v{}", env!("CARGO_PKG_VERSION"));
            println!("Packaging and profile tooling for TcEx apps");
            Ok(())
        }

        Commands::Config => show_config(&config_path),

        Commands::Package {
            bundle,
            excludes,
            outdir,
            schema,
            dry_run,
            format,
        } => {
            let config = load_config(&config_path)?;
            let mut options = PackageOptions::from_config(&cli.app_dir, &config);
            options.bundle |= bundle;
            options.excludes.extend(excludes);
            options.schema_path = schema;
            options.dry_run = dry_run;
            if let Some(outdir) = outdir {
                options.outdir = cli.app_dir.join(outdir);
            }

            package(options, format)
        }

        Commands::Profile { action } => {
            let config = load_config(&config_path)?;
            let generator = ProfileGenerator::new(&cli.app_dir, &config);
            run_profile(&generator, action).await
        }
    }
}

fn load_config(config_path: &Path) -> anyhow::Result<BuildConfig> {
    BuildConfig::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

/// Show the resolved configuration
fn show_config(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("No configuration file found. Using defaults:");
        println!();
    }

    let config = load_config(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Build archives for the app directory
fn package(options: PackageOptions, format: OutputFormat) -> anyhow::Result<()> {
    info!(app_dir = %options.app_dir.display(), "Packaging app");

    let report = Packager::new(options)
        .run()
        .context("Packaging failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_package_report(&report),
    }

    Ok(())
}

fn print_package_report(report: &PackageReport) {
    if report.dry_run {
        println!("[DRY RUN] Packages for {}:", report.app_name);
    } else {
        println!("Packages for {}:", report.app_name);
    }
    println!();

    for package in &report.packages {
        match &package.archive {
            Some(archive) => {
                println!("  - {}", archive.path.display());
                println!("    size: {} bytes", archive.size);
                println!("    sha256: {}", archive.sha256);
            }
            None => println!("  - {}.zip (from {})", package.name, package.manifest.display()),
        }
    }

    match (&report.bundle, &report.planned_bundle) {
        (Some(bundle), _) => {
            println!();
            println!("Bundle: {}", bundle.path.display());
            println!("  sha256: {}", bundle.sha256);
        }
        (None, Some(planned)) => {
            println!();
            println!("Bundle: {}", report.outdir.join(planned).display());
        }
        (None, None) => {}
    }
}

async fn run_profile(generator: &ProfileGenerator, action: ProfileCommand) -> anyhow::Result<()> {
    match action {
        ProfileCommand::Create {
            name,
            outfile,
            ij,
            redis_host,
            redis_port,
        } => {
            let request = CreateRequest {
                name,
                outfile,
                install_json: ij,
                redis_host,
                redis_port,
            };
            let created = generator
                .create(&request)
                .with_context(|| format!("Failed to create profile '{}'", request.name))?;

            println!(
                "Created profile '{}' in {}",
                created.profile.profile_name,
                created.profile_file.display()
            );
            if let Some(data_file) = &created.data_file {
                println!("Staging data: {}", data_file.display());
            }
            Ok(())
        }

        ProfileCommand::Delete { name } => {
            let path = generator
                .delete(&name)
                .with_context(|| format!("Failed to delete profile '{}'", name))?;
            println!("Deleted profile '{}' from {}", name, path.display());
            Ok(())
        }

        ProfileCommand::Update => {
            let summary = generator.update().context("Failed to update profiles")?;
            println!(
                "Upgraded {} of {} profiles ({} files rewritten)",
                summary.profiles_upgraded, summary.profiles_checked, summary.files_rewritten
            );
            Ok(())
        }

        ProfileCommand::ReplaceValidation { name, redis_url } => {
            let url = match redis_url {
                Some(url) => url,
                None => generator.redis_url_for(&name)?,
            };
            let store = RedisStore::open(&url)?;

            let rules = generator
                .replace_validation(&name, &store)
                .await
                .with_context(|| format!("Failed to replace validations for '{}'", name))?;

            println!("Replaced validations for '{}' ({} rules)", name, rules.len());
            for rule in &rules {
                println!("  - {} {:?}", rule.variable, rule.operator);
            }
            Ok(())
        }

        ProfileCommand::List => {
            let profiles = generator.list()?;
            if profiles.is_empty() {
                println!("No profiles found");
            } else {
                println!("Available profiles:");
                println!();
                for (name, path) in profiles {
                    println!("  - {} ({})", name, path.display());
                }
            }
            Ok(())
        }
    }
}
