use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use lenstree::config::{load_from_path, TransformDefinition};
use lenstree::session::{Session, SessionOptions};
use lenstree::transform::PendingChange;
use similar::{ChangeTag, TextDiff};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "lenstree")]
#[command(about = "Query and edit configuration files as a tree", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Directory that /files mirrors
    #[arg(long, short = 'r', global = true)]
    root: Option<PathBuf>,

    /// Extra directory to search for lens modules (repeatable)
    #[arg(long = "include", short = 'I', global = true)]
    include: Vec<PathBuf>,

    /// Session file (lenstree.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Add a transform, written LENS=GLOB (repeatable)
    #[arg(long = "transform", short = 't', global = true, value_parser = parse_transform)]
    transforms: Vec<(String, String)>,

    /// Keep the original of every saved file as <file>.orig
    #[arg(long, short = 'b', global = true)]
    backup: bool,

    /// Save to <file>.new instead of replacing the file
    #[arg(long, short = 'n', global = true)]
    new: bool,

    /// Show what saving would change without writing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Do not load any files
    #[arg(long, global = true)]
    noload: bool,

    /// Do not register the built-in lens modules
    #[arg(long, global = true)]
    nostdinc: bool,

    /// Do not add the transforms declared by lens modules
    #[arg(long, global = true)]
    noautoload: bool,

    /// Record source spans while loading
    #[arg(long, global = true)]
    span: bool,

    /// Type check lenses before loading
    #[arg(long, global = true)]
    typecheck: bool,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Only report errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of a single node
    Get { path: String },

    /// List the nodes matching a path, optionally only those with VALUE
    Match { path: String, value: Option<String> },

    /// Set the value of a node, creating it if needed
    Set { path: String, value: Option<String> },

    /// Set SUB below every node matching BASE
    Setm {
        base: String,
        sub: String,
        value: Option<String>,
    },

    /// Remove every node matching a path
    Rm { path: String },

    /// Move a node
    Mv { src: String, dest: String },

    /// Insert a new sibling next to a node
    Ins {
        label: String,
        #[arg(value_enum)]
        position: Position,
        path: String,
    },

    /// Relabel every node matching a path
    Rename { path: String, label: String },

    /// Print a subtree as path = value lines
    Print {
        #[arg(default_value = "/files")]
        path: String,
    },

    /// Show where a node came from in its file
    Span { path: String },

    /// List files that failed to load or save
    Errors {
        /// Print the errors as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// List registered lenses
    Lenses,
}

#[derive(Clone, Copy, ValueEnum)]
enum Position {
    Before,
    After,
}

fn parse_transform(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((lens, glob)) if !lens.trim().is_empty() && !glob.trim().is_empty() => {
            Ok((lens.trim().to_string(), glob.trim().to_string()))
        }
        _ => Err(format!("expected LENS=GLOB, got '{s}'")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.global.quiet {
        Level::ERROR
    } else if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut session = open_session(&cli.global)?;
    let mutated = run_command(&mut session, cli.command)?;
    if mutated {
        save(&mut session, cli.global.dry_run)?;
    }
    Ok(())
}

/// Build the session from the config file and the global flags. Extra
/// transforms are added before the first load.
fn open_session(global: &GlobalOptions) -> Result<Session> {
    let (mut options, mut transforms) = match &global.config {
        Some(path) => {
            let config = load_from_path(path)?;
            (config.options(), config.transforms)
        }
        None => (SessionOptions::new("/"), Vec::new()),
    };
    if let Some(root) = &global.root {
        options.root = root.clone();
    }
    options.load_paths.extend(global.include.iter().cloned());
    for (lens, glob) in &global.transforms {
        transforms.push(TransformDefinition {
            lens: lens.clone(),
            name: None,
            incl: vec![glob.clone()],
            excl: Vec::new(),
        });
    }

    let flags = &mut options.flags;
    flags.save_backup |= global.backup;
    flags.save_newfile |= global.new;
    flags.save_noop |= global.dry_run;
    flags.no_stdinc |= global.nostdinc;
    flags.no_module_autoload |= global.noautoload;
    flags.enable_span |= global.span;
    flags.type_check |= global.typecheck;
    let load = !(flags.no_load || global.noload);
    flags.no_load = true;

    let root = options.root.clone();
    let mut session = Session::open(options)
        .with_context(|| format!("cannot open session at {}", root.display()))?;
    for def in &transforms {
        let incl: Vec<&str> = def.incl.iter().map(String::as_str).collect();
        let excl: Vec<&str> = def.excl.iter().map(String::as_str).collect();
        session
            .add_transform(&def.lens, def.name.as_deref(), &incl, &excl)
            .with_context(|| format!("cannot add transform for {}", def.lens))?;
    }
    if load {
        session.load()?;
        for err in session.file_errors()? {
            eprintln!("{} {}", "warning:".yellow(), err);
        }
    }
    Ok(session)
}

/// Run one subcommand. Returns whether the tree was modified.
fn run_command(session: &mut Session, command: Commands) -> Result<bool> {
    match command {
        Commands::Get { path } => {
            match session.matches(&path)?.len() {
                0 => println!("{path} (o)"),
                _ => match session.get(&path)? {
                    Some(value) => println!("{path} = {value}"),
                    None => println!("{path} (none)"),
                },
            }
            Ok(false)
        }
        Commands::Match { path, value } => {
            let found = session.matches(&path)?;
            let mut shown = 0;
            for node in &found {
                let node_value = session.get(node)?;
                match &value {
                    Some(wanted) if node_value.as_deref() != Some(wanted.as_str()) => {}
                    Some(_) => {
                        println!("{node}");
                        shown += 1;
                    }
                    None => {
                        match node_value {
                            Some(v) => println!("{node} = {v}"),
                            None => println!("{node} (none)"),
                        }
                        shown += 1;
                    }
                }
            }
            if shown == 0 {
                println!("  (no matches)");
            }
            Ok(false)
        }
        Commands::Set { path, value } => {
            session.set(&path, value.as_deref())?;
            Ok(true)
        }
        Commands::Setm { base, sub, value } => {
            let count = session.set_many(&base, Some(sub.as_str()), value.as_deref())?;
            println!("setm : {base} {sub} {count}");
            Ok(count > 0)
        }
        Commands::Rm { path } => {
            let count = session.rm(&path)?;
            println!("rm : {path} {count}");
            Ok(count > 0)
        }
        Commands::Mv { src, dest } => {
            session.mv(&src, &dest)?;
            Ok(true)
        }
        Commands::Ins {
            label,
            position,
            path,
        } => {
            session.insert(&path, &label, matches!(position, Position::Before))?;
            Ok(true)
        }
        Commands::Rename { path, label } => {
            let count = session.rename(&path, &label)?;
            println!("rename : {path} to {label} {count}");
            Ok(count > 0)
        }
        Commands::Print { path } => {
            print!("{}", session.print(&path)?);
            Ok(false)
        }
        Commands::Span { path } => {
            let span = session.span(&path)?;
            println!("{span}");
            Ok(false)
        }
        Commands::Errors { json } => {
            let errors = session.file_errors()?;
            if json {
                let entries: Vec<_> = errors
                    .iter()
                    .map(|err| {
                        serde_json::json!({
                            "path": err.path,
                            "kind": err.kind.as_str(),
                            "message": err.message,
                            "lens": err.lens,
                            "line": err.position.map(|p| p.line),
                            "char": err.position.map(|p| p.col),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(false);
            }
            if errors.is_empty() {
                println!("{}", "No errors".green());
            }
            for err in errors {
                println!("{}", err);
                if let Some(lens) = &err.lens {
                    println!("  lens: {lens}");
                }
            }
            Ok(false)
        }
        Commands::Lenses => {
            for name in session.lenses()? {
                println!("{name}");
            }
            Ok(false)
        }
    }
}

fn save(session: &mut Session, dry_run: bool) -> Result<()> {
    let report = match session.save() {
        Ok(report) => report,
        Err(err) => {
            for file_err in session.file_errors()? {
                eprintln!("{} {}", "error:".red(), file_err);
            }
            bail!("saving failed: {err}");
        }
    };
    if dry_run {
        if report.pending.is_empty() {
            println!("{}", "No changes".dimmed());
        }
        for change in &report.pending {
            display_diff(change);
        }
        return Ok(());
    }
    for saved in &report.saved {
        println!("{} {}", "Saved".green(), saved.target.display());
    }
    Ok(())
}

fn display_diff(change: &PendingChange) {
    let before = change.before.as_deref().unwrap_or("");
    let after = change.after.as_deref().unwrap_or("");
    println!("{}", format!("--- {} (original)", change.path).dimmed());
    println!("{}", format!("+++ {} (modified)", change.path).dimmed());

    let diff = TextDiff::from_lines(before, after);
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", line);
    }
}
