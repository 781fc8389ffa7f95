use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use tokio::process::Command;

/// One captured still.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub captured_at: DateTime<Utc>,
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self, display_id: u32) -> Result<Frame>;
}

/// Runs an external screenshot command and decodes the PNG it produces.
///
/// Arguments may contain `{display}` and `{output}`; with `{output}` the
/// image is read from that temporary file, otherwise from stdout.
#[derive(Debug, Clone)]
pub struct CommandFrameSource {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandFrameSource {
    pub fn new(command: &[String], scratch_dir: PathBuf) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("capture command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            scratch_dir,
        })
    }

    fn render_args(&self, display_id: u32, output: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{display}", &display_id.to_string())
                    .replace("{output}", output)
            })
            .collect()
    }

    fn writes_to_file(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{output}"))
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn capture(&self, display_id: u32) -> Result<Frame> {
        let captured_at = Utc::now();
        let output_path = self
            .scratch_dir
            .join(format!("screen_{}.png", captured_at.timestamp_millis()));
        let args = self.render_args(display_id, &output_path.to_string_lossy());

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&output_path).await;
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let bytes = if self.writes_to_file() {
            let bytes = tokio::fs::read(&output_path)
                .await
                .with_context(|| format!("screenshot missing at {}", output_path.display()));
            let _ = tokio::fs::remove_file(&output_path).await;
            bytes?
        } else {
            output.stdout
        };

        let image = image::load_from_memory(&bytes)
            .context("failed to decode screenshot")?
            .to_rgba8();

        Ok(Frame { image, captured_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let source = CommandFrameSource::new(
            &["screencapture".into(), "-D".into(), "{display}".into(), "{output}".into()],
            PathBuf::from("/tmp"),
        )
        .unwrap();

        assert!(source.writes_to_file());
        assert_eq!(
            source.render_args(2, "/tmp/x.png"),
            vec!["-D".to_string(), "2".to_string(), "/tmp/x.png".to_string()]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandFrameSource::new(&[], PathBuf::from("/tmp")).is_err());
    }
}
