use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::SeparatorConfig;

/// Isolates the vocal line of a mixed recording.
pub trait VocalSeparator {
    /// Path to an audio file holding only the vocals of `input`.
    fn separate(&self, input: &Path) -> Result<PathBuf>;
}

/// Runs an external source-separation program.
///
/// Arguments may contain `{input}` and `{output_dir}` placeholders. The
/// program is expected to write `<output_dir>/<input stem>/<stem file>`;
/// when that file already exists the program is not run again.
#[derive(Debug, Clone)]
pub struct CommandSeparator {
    program: String,
    args: Vec<String>,
    stem: String,
}

impl CommandSeparator {
    pub fn new(program: impl Into<String>, args: Vec<String>, stem: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stem: stem.into(),
        }
    }

    pub fn from_config(config: &SeparatorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.stem.clone())
    }

    /// `<dir>/<name>_separated` next to the input.
    pub fn output_dir(input: &Path) -> PathBuf {
        let parent = input.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!("{}_separated", file_stem(input)))
    }

    pub fn stem_path(&self, input: &Path) -> PathBuf {
        Self::output_dir(input).join(file_stem(input)).join(&self.stem)
    }

    pub fn expand_args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

impl VocalSeparator for CommandSeparator {
    fn separate(&self, input: &Path) -> Result<PathBuf> {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }

        let stem_path = self.stem_path(input);
        if stem_path.exists() {
            log::info!("Reusing separated vocals: {}", stem_path.display());
            return Ok(stem_path);
        }
        log::warn!("No separated vocals cached for {}", input.display());

        let output_dir = Self::output_dir(input);
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

        let args = self.expand_args(input, &output_dir);
        log::info!("Separating vocals: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to spawn {}. Is it installed?", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with error:\n{}", self.program, stderr);
        }

        if !stem_path.exists() {
            anyhow::bail!(
                "{} finished but no vocal stem was written to {}",
                self.program,
                stem_path.display()
            );
        }

        log::info!("Vocals written to {}", stem_path.display());
        Ok(stem_path)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}
