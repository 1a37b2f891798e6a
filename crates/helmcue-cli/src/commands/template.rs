//! `helmcue template` - convert a single template to CUE on stdout.

use std::io::Read;
use std::path::{Path, PathBuf};

use miette::{miette, IntoDiagnostic, Result};

use helmcue_convert::{convert, helm_config, template_config};

pub fn run(files: &[PathBuf], helm: bool) -> Result<()> {
    let mut helpers: Vec<String> = Vec::new();
    let mut template_file: Option<&Path> = None;

    for path in files {
        if path.extension().and_then(|e| e.to_str()) == Some("tpl") {
            helpers.push(std::fs::read_to_string(path).into_diagnostic()?);
        } else {
            if template_file.is_some() {
                return Err(miette!("multiple template files specified"));
            }
            template_file = Some(path);
        }
    }

    let input = match template_file {
        Some(path) => std::fs::read_to_string(path).into_diagnostic()?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .into_diagnostic()?;
            buf
        }
    };

    let cfg = if helm { helm_config() } else { template_config() };
    let helper_refs: Vec<&str> = helpers.iter().map(String::as_str).collect();
    let output = convert(&cfg, &input, &helper_refs).into_diagnostic()?;

    print!("{output}");
    Ok(())
}
