use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use bunexe_format::install::{self, InstallError, ModuleSelector, PatchRequest};
use bunexe_format::{Container, ExtractReport};

mod tools;

use crate::tools::{Beautifier, Codesign};

fn print_error(mut error: &dyn std::error::Error) {
    println!("Error: {}", error);

    while let Some(source) = error.source() {
        println!("   caused by {}", source);
        error = source;
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path) -> Result<Container> {
    Container::open(path).with_context(|| format!("cannot read {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let container = open(path)?;
    let header = container.header();

    println!("Inspecting {}", path.display());
    println!("Trailer:     {:#x}", container.trailer_offset());
    println!("Header:      {:#x}", container.header_offset());
    println!(
        "Blob:        {:#x} ({} bytes)",
        container.blob_start(),
        header.byte_count
    );
    println!("Entry point: {}", header.entry_point_id);
    println!("Flags:       {:#b}", header.flags);
    println!("Exec argv:   {:?}", container.exec_argv()?);
    println!("Modules:     {}", container.module_count());

    for (index, module) in container.modules().enumerate() {
        let module = match module {
            Ok(module) => module,
            Err(e) => {
                print!(" - {}: ", index);
                print_error(&e);
                continue;
            }
        };

        match container.module_name(&module) {
            Ok(name) => println!(" - {}: {}", index, name),
            Err(e) => {
                print!(" - {}: ", index);
                print_error(&e);
            }
        }
        println!("   loader:    {}", module.loader);
        println!("   encoding:  {}", module.encoding);
        println!("   format:    {} (side {})", module.module_format, module.side);
        println!("   contents:  {} bytes", module.contents.length);
        println!("   sourcemap: {} bytes", module.sourcemap.length);
        println!("   bytecode:  {} bytes", module.bytecode.length);
    }

    Ok(())
}

/// Returns `<file name>_extracted` in the current directory.
fn default_output(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("bundle"));
    name.push("_extracted");
    PathBuf::from(name)
}

async fn beautify_scripts(container: &Container, report: &ExtractReport) {
    let beautifier = Beautifier::default();

    for extracted in report.extracted.iter().filter(|m| m.loader.is_script()) {
        let contents = match container
            .module(extracted.index)
            .and_then(|module| Ok(container.module_contents(&module)?.to_vec()))
        {
            Ok(contents) => contents,
            Err(error) => {
                tracing::warn!(index = extracted.index, %error, "cannot read module");
                continue;
            }
        };

        let mut output = extracted.path.clone().into_os_string();
        output.push(".beautified.js");
        let output = PathBuf::from(output);

        match beautifier.beautify(&contents).await {
            Ok(formatted) => match fs::write(&output, formatted) {
                Ok(()) => tracing::info!(path = %output.display(), "saved beautified module"),
                Err(error) => tracing::warn!(path = %output.display(), %error, "cannot write"),
            },
            Err(error) => {
                tracing::warn!(index = extracted.index, %error, "keeping unformatted module");
            }
        }
    }
}

async fn extract(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("path")
        .context("missing path")?;
    let output = matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| default_output(path));

    let container = open(path)?;
    let report = container
        .extract_all(&output)
        .with_context(|| format!("cannot extract to {}", output.display()))?;

    if matches.get_flag("beautify") {
        beautify_scripts(&container, &report).await;
    }

    for error in &report.errors {
        print!(" - module {}: ", error.index);
        print_error(&error.error);
    }

    println!(
        "Extracted {} of {} modules to {} ({} without contents, {} errors)",
        report.count(),
        container.module_count(),
        output.display(),
        report.skipped.len(),
        report.errors.len()
    );

    Ok(())
}

/// Reads a byte argument given either inline or as a file.
fn bytes_arg(matches: &ArgMatches, text: &str, file: &str) -> Result<Vec<u8>> {
    if let Some(text) = matches.get_one::<String>(text) {
        return Ok(text.as_bytes().to_vec());
    }

    match matches.get_one::<PathBuf>(file) {
        Some(path) => fs::read(path).with_context(|| format!("cannot read {}", path.display())),
        None => bail!("either --{} or --{} is required", text, file),
    }
}

async fn patch(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("path")
        .context("missing path")?;

    let module = match matches.get_one::<usize>("module") {
        Some(&index) => ModuleSelector::Index(index),
        None => ModuleSelector::Name(
            matches
                .get_one::<String>("name")
                .context("either --module or --name is required")?
                .clone(),
        ),
    };

    let request = PatchRequest {
        module,
        marker: bytes_arg(matches, "marker", "marker-file")?,
        replacement: bytes_arg(matches, "replacement", "replacement-file")?,
    };

    let outcome = match install::patch_file(path, &request) {
        Ok(outcome) => outcome,
        Err(error) => {
            if error.is_recoverable() {
                tracing::warn!(
                    backup = %install::backup_path(path).display(),
                    "the original executable is preserved in the backup"
                );
            }
            return Err(error.into());
        }
    };

    println!(
        "Patched module {} ({}) at offset {}",
        outcome.module_index, outcome.module_name, outcome.marker_offset
    );
    println!("Backup: {}", outcome.backup_path.display());

    if cfg!(target_os = "macos") {
        Codesign::default()
            .sign(path)
            .await
            .with_context(|| format!("cannot sign {}", path.display()))?;
        tracing::info!("re-signed executable");
    }

    Ok(())
}

fn restore(path: &Path) -> Result<()> {
    let backup = install::restore_file(path)?;
    println!("Restored {} from {}", path.display(), backup.display());
    Ok(())
}

async fn execute(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("inspect", sub)) => inspect(sub.get_one::<PathBuf>("path").context("missing path")?),
        Some(("extract", sub)) => extract(sub).await,
        Some(("patch", sub)) => patch(sub).await,
        Some(("restore", sub)) => restore(sub.get_one::<PathBuf>("path").context("missing path")?),
        _ => bail!("unknown command"),
    }
}

fn path_arg() -> Arg {
    Arg::new("path")
        .required(true)
        .value_name("PATH")
        .value_parser(value_parser!(PathBuf))
        .help("Path to the compiled executable")
}

fn cli() -> Command {
    Command::new("bunexe")
        .about("Inspects, extracts and patches modules embedded in compiled executables")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log decoded structures"),
        )
        .subcommand(
            Command::new("inspect")
                .about("Shows the header and module table")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("extract")
                .about("Writes all embedded modules to a directory")
                .arg(path_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Output directory [default: <file name>_extracted]"),
                )
                .arg(
                    Arg::new("beautify")
                        .long("beautify")
                        .action(ArgAction::SetTrue)
                        .help("Also write script modules formatted with js-beautify"),
                ),
        )
        .subcommand(
            Command::new("patch")
                .about("Replaces a marker in the contents of one module")
                .arg(path_arg())
                .arg(
                    Arg::new("module")
                        .long("module")
                        .value_name("INDEX")
                        .value_parser(value_parser!(usize))
                        .help("Index of the module to patch"),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .value_name("NAME")
                        .help("Virtual path of the module to patch"),
                )
                .group(ArgGroup::new("target").args(["module", "name"]).required(true))
                .arg(
                    Arg::new("marker")
                        .long("marker")
                        .value_name("TEXT")
                        .help("Text to replace"),
                )
                .arg(
                    Arg::new("marker-file")
                        .long("marker-file")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("File holding the bytes to replace"),
                )
                .group(
                    ArgGroup::new("marker-source")
                        .args(["marker", "marker-file"])
                        .required(true),
                )
                .arg(
                    Arg::new("replacement")
                        .long("replacement")
                        .value_name("TEXT")
                        .help("Text written over the marker, padded with spaces"),
                )
                .arg(
                    Arg::new("replacement-file")
                        .long("replacement-file")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("File holding the bytes written over the marker"),
                )
                .group(
                    ArgGroup::new("replacement-source")
                        .args(["replacement", "replacement-file"])
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Restores a patched executable from its backup")
                .arg(path_arg()),
        )
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    if let Err(error) = execute(&matches).await {
        print_error(&*error);
        if let Some(hint) = error.downcast_ref::<InstallError>().and_then(InstallError::hint) {
            println!("   hint: {}", hint);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bunexe_testutils::{ContainerBuilder, TestModule};

    #[test]
    fn test_cli() {
        cli().debug_assert();
    }

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/usr/local/bin/app")),
            PathBuf::from("app_extracted")
        );
    }

    #[test]
    fn test_patch_requires_marker() {
        let result = cli().try_get_matches_from(["bunexe", "patch", "app", "--module", "0"]);
        assert!(result.is_err());

        let result = cli().try_get_matches_from([
            "bunexe",
            "patch",
            "app",
            "--name",
            "/$bunfs/root/cli.js",
            "--marker",
            "A",
            "--replacement-file",
            "b.txt",
        ]);
        assert!(result.is_ok());
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_patch_command() -> Result<()> {
        let built = ContainerBuilder::new()
            .module(TestModule::new("/$bunfs/root/cli.js", "let p = 'MARKER';"))
            .build();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("app");
        fs::write(&path, &built.bytes)?;

        let matches = cli().try_get_matches_from([
            OsString::from("bunexe"),
            "patch".into(),
            path.clone().into(),
            "--module".into(),
            "0".into(),
            "--marker".into(),
            "MARKER".into(),
            "--replacement".into(),
            "OK".into(),
        ])?;
        execute(&matches).await?;

        let container = open(&path)?;
        let module = container.module(0)?;
        assert_eq!(container.module_contents(&module)?, b"let p = 'OK    ';");
        assert!(install::backup_path(&path).exists());

        let matches = cli().try_get_matches_from([
            OsString::from("bunexe"),
            "restore".into(),
            path.clone().into(),
        ])?;
        execute(&matches).await?;
        assert_eq!(fs::read(&path)?, built.bytes);

        Ok(())
    }
}
