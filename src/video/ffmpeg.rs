use std::{
    ffi::OsString,
    fmt::Write as _,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use super::{ClipRange, VideoOps};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const STDERR_TAIL_CHARS: usize = 400;

/// [`VideoOps`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegVideoOps {
    ffmpeg: OsString,
    ffprobe: OsString,
    timeout: Duration,
}

impl Default for FfmpegVideoOps {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl FfmpegVideoOps {
    pub fn new(ffmpeg: impl Into<OsString>, ffprobe: impl Into<OsString>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, program: &OsString, args: Vec<OsString>) -> Result<Vec<u8>> {
        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("running {:?} {:?}", program, args);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "{:?} timed out after {}s",
                    program,
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("failed to spawn {:?}", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr
                .char_indices()
                .rev()
                .nth(STDERR_TAIL_CHARS)
                .map(|(idx, _)| &stderr[idx..])
                .unwrap_or(stderr.as_ref());
            bail!("{:?} exited with {}: {}", program, output.status, tail.trim());
        }

        Ok(output.stdout)
    }

    /// Runs ffmpeg and removes `output` if the command did not succeed.
    async fn run_ffmpeg(&self, args: Vec<OsString>, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let result = self.run(&self.ffmpeg, args).await.and_then(|_| {
            let written = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
            if written == 0 {
                Err(anyhow!("ffmpeg produced no output at {}", output.display()))
            } else {
                Ok(())
            }
        });

        if result.is_err() {
            remove_quietly(output).await;
        }
        result
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {err}", path.display());
        }
    }
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Builds a concat-demuxer list. With `frame_secs`, each entry is shown for
/// that long and the final entry is repeated so its duration is honoured.
fn concat_list(inputs: &[PathBuf], frame_secs: Option<f64>) -> String {
    let mut list = String::new();
    for input in inputs {
        let _ = writeln!(list, "file '{}'", escape_concat_path(input));
        if let Some(secs) = frame_secs {
            let _ = writeln!(list, "duration {secs}");
        }
    }
    if frame_secs.is_some() {
        if let Some(last) = inputs.last() {
            let _ = writeln!(list, "file '{}'", escape_concat_path(last));
        }
    }
    list
}

fn list_path_for(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("concat"));
    name.push(".txt");
    output.with_file_name(name)
}

fn os(value: impl Into<OsString>) -> OsString {
    value.into()
}

fn ensure_inputs_exist(inputs: &[PathBuf]) -> Result<()> {
    if inputs.is_empty() {
        bail!("no input files given");
    }
    if let Some(missing) = inputs.iter().find(|path| !path.exists()) {
        bail!("input file missing: {}", missing.display());
    }
    Ok(())
}

#[async_trait]
impl VideoOps for FfmpegVideoOps {
    async fn encode_frames(&self, frames: &[PathBuf], fps: f64, output: &Path) -> Result<()> {
        ensure_inputs_exist(frames)?;
        if !(fps > 0.0) {
            bail!("fps must be positive, got {fps}");
        }

        let list_path = list_path_for(output);
        tokio::fs::write(&list_path, concat_list(frames, Some(1.0 / fps)))
            .await
            .with_context(|| format!("failed to write {}", list_path.display()))?;

        let args = vec![
            os("-y"),
            os("-loglevel"),
            os("error"),
            os("-f"),
            os("concat"),
            os("-safe"),
            os("0"),
            os("-i"),
            list_path.clone().into_os_string(),
            os("-vf"),
            os(format!(
                "fps={fps},scale=trunc(iw/2)*2:trunc(ih/2)*2,format=yuv420p"
            )),
            os("-c:v"),
            os("libx264"),
            os("-preset"),
            os("veryfast"),
            output.as_os_str().to_os_string(),
        ];

        let result = self.run_ffmpeg(args, output).await;
        remove_quietly(&list_path).await;
        result
    }

    async fn merge_files(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        ensure_inputs_exist(inputs)?;

        let list_path = list_path_for(output);
        tokio::fs::write(&list_path, concat_list(inputs, None))
            .await
            .with_context(|| format!("failed to write {}", list_path.display()))?;

        let args = vec![
            os("-y"),
            os("-loglevel"),
            os("error"),
            os("-f"),
            os("concat"),
            os("-safe"),
            os("0"),
            os("-i"),
            list_path.clone().into_os_string(),
            os("-c"),
            os("copy"),
            output.as_os_str().to_os_string(),
        ];

        let result = self.run_ffmpeg(args, output).await;
        remove_quietly(&list_path).await;
        result
    }

    async fn speed_up(
        &self,
        input: &Path,
        output: &Path,
        factor: f64,
        clip: Option<ClipRange>,
    ) -> Result<()> {
        ensure_inputs_exist(&[input.to_path_buf()])?;
        if !(factor > 0.0) {
            bail!("speed-up factor must be positive, got {factor}");
        }

        let mut args = vec![os("-y"), os("-loglevel"), os("error")];
        if let Some(range) = clip {
            args.extend([
                os("-ss"),
                os(format!("{:.3}", range.start_secs)),
                os("-to"),
                os(format!("{:.3}", range.end_secs)),
            ]);
        }
        args.extend([
            os("-i"),
            input.as_os_str().to_os_string(),
            os("-filter:v"),
            os(format!("setpts=PTS/{factor}")),
            os("-an"),
            os("-c:v"),
            os("libx264"),
            os("-crf"),
            os("23"),
            os("-preset"),
            os("medium"),
            output.as_os_str().to_os_string(),
        ]);

        self.run_ffmpeg(args, output).await
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        ensure_inputs_exist(&[input.to_path_buf()])?;

        let stdout = self
            .run(
                &self.ffprobe,
                vec![
                    os("-v"),
                    os("error"),
                    os("-show_entries"),
                    os("format=duration"),
                    os("-of"),
                    os("default=noprint_wrappers=1:nokey=1"),
                    input.as_os_str().to_os_string(),
                ],
            )
            .await?;

        let text = String::from_utf8_lossy(&stdout);
        let duration: f64 = text
            .trim()
            .parse()
            .with_context(|| format!("unexpected ffprobe output '{}'", text.trim()))?;
        if !duration.is_finite() || duration < 0.0 {
            bail!("invalid duration {duration} for {}", input.display());
        }
        Ok(duration)
    }

    async fn extract_frames(
        &self,
        input: &Path,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let duration = self.probe_duration(input).await?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let mut frames: Vec<PathBuf> = Vec::with_capacity(count);
        for index in 0..count {
            let at = duration * index as f64 / count as f64;
            let frame_path = output_dir.join(format!("frame_{index:03}.jpg"));
            let args = vec![
                os("-y"),
                os("-loglevel"),
                os("error"),
                os("-ss"),
                os(format!("{at:.3}")),
                os("-i"),
                input.as_os_str().to_os_string(),
                os("-frames:v"),
                os("1"),
                os("-q:v"),
                os("2"),
                frame_path.as_os_str().to_os_string(),
            ];

            if let Err(err) = self.run_ffmpeg(args, &frame_path).await {
                for written in &frames {
                    remove_quietly(written).await;
                }
                return Err(err.context(format!("frame {index} extraction failed")));
            }
            frames.push(frame_path);
        }

        Ok(frames)
    }
}
