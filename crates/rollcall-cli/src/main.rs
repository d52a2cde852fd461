use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use rollcall_core::{Config, FaceDetector, FaceMatcher, FaceStore, LbphRecognizer, SeetaDetector, Session};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face recognition shell")]
struct Cli {
    /// Path to a TOML config file (default: ./rollcall.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// One line typed at the shell prompt.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_subcommand = true, disable_help_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
enum ShellCommand {
    /// Load a .jpg, .jpeg or .png image
    Upload {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        path: Vec<String>,
    },
    /// Enroll the first face in the current image under a name
    Add {
        #[arg(num_args = 0.., trailing_var_arg = true)]
        label: Vec<String>,
    },
    /// Recognize all faces in the current image
    Recognize,
    /// List known faces
    List,
    /// Show available commands
    Help,
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

fn parse_line(line: &str) -> Result<ShellCommand, clap::Error> {
    ShellLine::try_parse_from(line.split_whitespace()).map(|l| l.command)
}

/// One-line message for a line that failed to parse.
fn parse_error_message(line: &str, err: &clap::Error) -> String {
    let word = line.split_whitespace().next().unwrap_or_default();
    match err.kind() {
        ErrorKind::MissingRequiredArgument => {
            format!("Error: missing argument for '{word}'. Type 'help' for commands.")
        }
        ErrorKind::UnknownArgument => {
            format!("Error: unexpected argument for '{word}'. Type 'help' for commands.")
        }
        _ => format!("Error: unknown command '{}'. Type 'help' for commands.", line.trim()),
    }
}

const HELP: &str = "\
Commands:
  upload <path>   load a .jpg, .jpeg or .png image
  add [name]      enroll the first face in the current image
  recognize       recognize all faces in the current image
  list            list known faces
  help            show this help
  quit            leave the shell";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let store = FaceStore::load(&config.store_path).context("failed to load face store")?;
    let detector = SeetaDetector::load(&config.detector_model).context("failed to load face detector")?;
    let matcher = LbphRecognizer::new().context("failed to create face recognizer")?;
    let mut session = Session::new(config, store, detector, matcher)
        .context("failed to train recognizer on stored faces")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    run_shell(&mut session, &mut stdin.lock(), &mut stdout)
}

fn run_shell<D, M, R, W>(session: &mut Session<D, M>, input: &mut R, out: &mut W) -> Result<()>
where
    D: FaceDetector,
    M: FaceMatcher,
    R: BufRead,
    W: Write,
{
    writeln!(out, "Face Recognition System ({} known faces). Type 'help' for commands.", session.store().len())?;

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = read_line(input)? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(kind = ?err.kind(), "rejected shell line");
                writeln!(out, "{}", parse_error_message(&line, &err))?;
                continue;
            }
        };

        if command == ShellCommand::Quit {
            break;
        }
        execute(session, command, input, out)?;
    }

    Ok(())
}

fn execute<D, M, R, W>(session: &mut Session<D, M>, command: ShellCommand, input: &mut R, out: &mut W) -> Result<()>
where
    D: FaceDetector,
    M: FaceMatcher,
    R: BufRead,
    W: Write,
{
    match command {
        ShellCommand::Upload { path } => {
            let path = PathBuf::from(path.join(" "));
            match session.upload(&path) {
                Ok(()) => {
                    writeln!(out, "Loaded {}", path.display())?;
                    write_preview(session, out)?;
                }
                Err(err) => writeln!(out, "Error: {err}")?,
            }
        }
        ShellCommand::Add { label } => {
            let mut label = label.join(" ");
            if label.is_empty() {
                write!(out, "Enter name for the face: ")?;
                out.flush()?;
                label = read_line(input)?.unwrap_or_default();
            }
            match session.enroll(&label) {
                Ok(()) => writeln!(out, "Added {} to known faces", label.trim())?,
                Err(err) => writeln!(out, "Error: {err}")?,
            }
        }
        ShellCommand::Recognize => match session.recognize() {
            Ok(results) => {
                for result in results {
                    writeln!(out, "{}", result.recognition)?;
                }
                write_preview(session, out)?;
            }
            Err(err) => writeln!(out, "Error: {err}")?,
        },
        ShellCommand::List => {
            let labels = session.known_labels();
            if labels.is_empty() {
                writeln!(out, "No known faces")?;
            }
            for label in labels {
                writeln!(out, "  {label}")?;
            }
        }
        ShellCommand::Help => writeln!(out, "{HELP}")?,
        ShellCommand::Quit => {}
    }
    Ok(())
}

/// Write the scaled preview image to the configured path.
fn write_preview<D, M, W>(session: &Session<D, M>, out: &mut W) -> Result<()>
where
    D: FaceDetector,
    M: FaceMatcher,
    W: Write,
{
    let Some(preview) = session.preview() else {
        return Ok(());
    };
    let path = &session.config().preview_path;
    match preview.save(path) {
        Ok(()) => writeln!(out, "Preview written to {}", path.display())?,
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "failed to write preview");
            writeln!(out, "Error: failed to write preview: {err}")?;
        }
    }
    Ok(())
}

/// Read one line without its trailing newline; `None` at end of input.
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
