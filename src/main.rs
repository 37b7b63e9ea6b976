use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use conftree::section::write_sections;
use conftree::{load_from_path, ReconcileError, Reconciler, Report};
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conftree")]
#[command(about = "Diff, apply and merge configuration trees", long_about = None)]
#[command(version)]
struct Cli {
    /// Target directory
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// TOML profile with path excludes and codec overrides
    #[arg(short = 'c', long, global = true)]
    profile: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the diff that turns a reference tree into the target
    Diff {
        /// Reference tree, typically the pristine distribution
        #[arg(short, long)]
        reference: PathBuf,

        /// Diff file to write (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a diff file to the target
    Apply {
        /// Diff file to apply
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Merge a directory or zip archive into the target
    Merge {
        /// Source directory or zip archive; a single file when --file is given
        #[arg(short, long)]
        package: PathBuf,

        /// Merge the package file into this file only
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show unified diff of the merged file
        #[arg(long)]
        diff: bool,
    },

    /// Set entries in a structured file
    Set {
        #[arg(short, long)]
        file: PathBuf,

        /// Entry lines in the file's own syntax, e.g. `port=8080` or `-Xmx2g`
        #[arg(required = true)]
        entries: Vec<String>,

        /// Show unified diff of the change
        #[arg(long)]
        diff: bool,
    },

    /// Remove entries from a structured file
    Remove {
        #[arg(short, long)]
        file: PathBuf,

        /// Keys in the file's own syntax, e.g. `port` or `-Xmx`
        #[arg(required = true)]
        keys: Vec<String>,

        /// Show unified diff of the change
        #[arg(long)]
        diff: bool,
    },

    /// Substitute `@{expr}` references in entry values
    Filter {
        #[arg(short, long)]
        file: PathBuf,

        /// Values as `expr=value`; a bare `expr` resolves to the empty string
        values: Vec<String>,

        /// Show unified diff of the change
        #[arg(long)]
        diff: bool,
    },

    /// Parse and re-serialize a file with its codec
    Normalize {
        #[arg(short, long)]
        file: PathBuf,

        /// Show unified diff of the change
        #[arg(long)]
        diff: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let reconciler = build_reconciler(&cli.dir, cli.profile.as_deref())?;

    match cli.command {
        Commands::Diff { reference, output } => {
            cmd_diff(&reconciler, &reference, output.as_deref())
        }

        Commands::Apply { file } => cmd_apply(&reconciler, &file),

        Commands::Merge {
            package,
            file: Some(file),
            diff,
        } => edit_file(&reconciler, &file, diff, |r, f| r.merge_file(f, &package)),

        Commands::Merge {
            package,
            file: None,
            ..
        } => cmd_merge(&reconciler, &package),

        Commands::Set { file, entries, diff } => {
            edit_file(&reconciler, &file, diff, |r, f| r.set_entries(f, &entries))
        }

        Commands::Remove { file, keys, diff } => {
            edit_file(&reconciler, &file, diff, |r, f| r.remove_entries(f, &keys))
        }

        Commands::Filter { file, values, diff } => {
            let values = parse_values(&values);
            edit_file(&reconciler, &file, diff, |r, f| {
                r.filter(f, &|expr: &str| values.get(expr).cloned())
            })
        }

        Commands::Normalize { file, diff } => {
            edit_file(&reconciler, &file, diff, |r, f| r.normalize(f))
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn build_reconciler(dir: &Path, profile: Option<&Path>) -> Result<Reconciler> {
    let mut builder = Reconciler::builder(dir);
    if let Some(path) = profile {
        let profile = load_from_path(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?;
        builder = builder
            .path_filter(profile.path_filter())
            .codec_resolver(profile.codec_resolver());
    }
    Ok(builder.build())
}

/// `expr=value` pairs; the first `=` separates, a missing one means empty.
fn parse_values(args: &[String]) -> HashMap<String, String> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((expr, value)) => (expr.to_string(), value.to_string()),
            None => (arg.clone(), String::new()),
        })
        .collect()
}

fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", file.display()).dimmed());
    println!("{}", format!("+++ {} (modified)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn print_report(report: &Report) {
    for path in &report.created_dirs {
        println!("{} {}/", "+".cyan(), path);
    }
    for path in &report.written {
        println!("{} {}", "✓".green(), path);
    }
    for path in &report.deleted {
        println!("{} {}", "✗".red(), path);
    }
    for path in &report.skipped {
        println!("{} {} (skipped)", "⊘".yellow(), path);
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} written", format!("{}", report.written.len()).green());
    println!("  {} deleted", format!("{}", report.deleted.len()).red());
    println!("  {} directories created", format!("{}", report.created_dirs.len()).cyan());
    println!("  {} skipped", format!("{}", report.skipped.len()).yellow());
}

fn cmd_diff(reconciler: &Reconciler, reference: &Path, output: Option<&Path>) -> Result<()> {
    match output {
        Some(output) => {
            let sections = reconciler
                .diff_to_file(reference, output)
                .with_context(|| format!("Failed to diff against {}", reference.display()))?;
            println!(
                "{} {} section(s) written to {}",
                "✓".green(),
                sections.len(),
                output.display()
            );
        }
        None => {
            let sections = reconciler
                .diff(reference)
                .with_context(|| format!("Failed to diff against {}", reference.display()))?;
            let mut stdout = io::stdout().lock();
            write_sections(&sections, &mut stdout).context("Failed to write diff")?;
            stdout.flush().context("Failed to write diff")?;
        }
    }
    Ok(())
}

fn cmd_apply(reconciler: &Reconciler, file: &Path) -> Result<()> {
    let report = reconciler
        .apply(file)
        .with_context(|| format!("Failed to apply {}", file.display()))?;
    print_report(&report);
    Ok(())
}

fn cmd_merge(reconciler: &Reconciler, package: &Path) -> Result<()> {
    let report = reconciler
        .merge(package)
        .with_context(|| format!("Failed to merge {}", package.display()))?;
    print_report(&report);
    Ok(())
}

fn edit_file<F>(reconciler: &Reconciler, file: &Path, show_diff: bool, op: F) -> Result<()>
where
    F: FnOnce(&Reconciler, &Path) -> std::result::Result<PathBuf, ReconcileError>,
{
    let before = show_diff.then(|| read_lossy(&reconciler.target().join(file)));

    let path = op(reconciler, file)
        .with_context(|| format!("Failed to update {}", file.display()))?;
    println!("{} {}", "✓".green(), path.display());

    if let Some(before) = before {
        let after = read_lossy(&path);
        if before != after {
            display_diff(&path, &before, &after);
        }
    }
    Ok(())
}

/// Missing files read as empty; non-UTF-8 bytes are replaced for display.
fn read_lossy(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "conftree", "set", "-f", "a.properties", "a=1", "-d", "/opt/app", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.dir, PathBuf::from("/opt/app"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Set { ref entries, .. } if entries == &["a=1".to_string()]
        ));
    }

    #[test]
    fn test_set_requires_entries() {
        assert!(Cli::try_parse_from(["conftree", "set", "-f", "a.properties"]).is_err());
    }

    #[test]
    fn test_parse_values() {
        let args = ["host=example.org", "empty", "eq=a=b"].map(String::from);
        let values = parse_values(&args);
        assert_eq!(values["host"], "example.org");
        assert_eq!(values["empty"], "");
        assert_eq!(values["eq"], "a=b");
    }
}
