//! Boundary to the embedding library that turns a media URL into HTML.

use anyhow::{Context as _, Result, anyhow, bail};
use log::debug;
use std::process::Command;

/// Turns a case input into an HTML fragment.
pub trait EmbedRenderer {
    /// Render `input` with the embed handler for `family` enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the library fails to produce markup.
    fn render(&self, family: &str, input: &str) -> Result<String>;
}

/// Runs an external command as `<program> [args...] <family> <input>` and
/// takes its standard output as the fragment.
#[derive(Clone, Debug)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    /// Build from a full command line, program first.
    ///
    /// # Errors
    ///
    /// Returns an error if the command line is empty.
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("Rendering command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl EmbedRenderer for CommandRenderer {
    fn render(&self, family: &str, input: &str) -> Result<String> {
        debug!("Rendering {input} with the {family} handler");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(family)
            .arg(input)
            .output()
            .with_context(|| format!("Failed to run renderer {}", self.program))?;

        if !output.status.success() {
            bail!(
                "Renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let html = String::from_utf8(output.stdout).context("Renderer output is not UTF-8")?;
        if html.trim().is_empty() {
            bail!("Renderer produced no markup for {input}");
        }
        Ok(html)
    }
}
