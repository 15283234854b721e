//! Command-line parsing for the worker binary.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use headshot_core::style::Style;
use headshot_core::types::ClientId;

pub const USAGE: &str = "\
Usage:
  headshot-worker submit <image> [--style <name>] [--client <id>] [--out <path>]
  headshot-worker styles";

const DEFAULT_CLIENT: &str = "local";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one photo through the pipeline and write the result.
    Submit(SubmitArgs),
    /// List the available styles.
    Styles,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SubmitArgs {
    pub image: PathBuf,
    pub style: Style,
    pub client: ClientId,
    /// Where to write the result; derived from `image` when unset.
    pub out: Option<PathBuf>,
}

/// Parse arguments, excluding the program name.
pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("submit") => parse_submit(args).map(Command::Submit),
        Some("styles") => Ok(Command::Styles),
        Some(other) => bail!("Unknown command '{other}'\n{USAGE}"),
        None => bail!("{USAGE}"),
    }
}

fn parse_submit(mut args: impl Iterator<Item = String>) -> anyhow::Result<SubmitArgs> {
    let mut image = None;
    let mut style = Style::CorporateClassic;
    let mut client = ClientId::new(DEFAULT_CLIENT);
    let mut out = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--style" => {
                let name = args.next().context("--style needs a value")?;
                style = Style::from_name(&name)?;
            }
            "--client" => client = ClientId::new(args.next().context("--client needs a value")?),
            "--out" => out = Some(PathBuf::from(args.next().context("--out needs a value")?)),
            flag if flag.starts_with("--") => bail!("Unknown option '{flag}'\n{USAGE}"),
            _ if image.is_none() => image = Some(PathBuf::from(arg)),
            _ => bail!("Unexpected argument '{arg}'\n{USAGE}"),
        }
    }

    Ok(SubmitArgs {
        image: image.with_context(|| format!("Missing <image>\n{USAGE}"))?,
        style,
        client,
        out,
    })
}

/// `portrait.jpg` with a PNG result becomes `portrait-headshot.png`.
pub fn default_output(image: &Path, mime_type: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());
    let ext = match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    };
    image.with_file_name(format!("{stem}-headshot.{ext}"))
}
