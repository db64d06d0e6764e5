//! The renderer subprocess driver.
//!
//! Spawns the configured executable in background mode, consumes stdout and
//! stderr on separate reader tasks, and keeps the trailing stderr lines for
//! failure reports. Render failures are never retried here.

use async_trait::async_trait;
use parking_lot::Mutex;
use renderhive_api::render::{RenderInvocation, RenderOutcome, RendererDriver};
use renderhive_types::error::RendererError;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

pub struct BlenderDriver {
    stderr_tail_lines: usize,
}

impl BlenderDriver {
    pub fn new(stderr_tail_lines: usize) -> Self {
        Self { stderr_tail_lines }
    }
}

#[async_trait]
impl RendererDriver for BlenderDriver {
    async fn render(&self, invocation: RenderInvocation) -> Result<RenderOutcome, RendererError> {
        tokio::fs::create_dir_all(&invocation.output_dir)
            .await
            .map_err(|e| RendererError::Spawn(format!("output directory: {e}")))?;

        let output_pattern = invocation.output_dir.join("frame_#####");
        let mut child = Command::new(&invocation.executable)
            .arg("--background")
            .arg(&invocation.scene)
            .arg("--engine")
            .arg(invocation.engine.flag_value())
            .arg("--device")
            .arg(invocation.device.flag_value())
            .arg("--frame-start")
            .arg(invocation.frame_start.to_string())
            .arg("--frame-end")
            .arg(invocation.frame_end.to_string())
            .arg("--frame-step")
            .arg(invocation.frame_step.to_string())
            .arg("--threads")
            .arg(invocation.threads.to_string())
            .arg("--output")
            .arg(&output_pattern)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                RendererError::Spawn(format!("{}: {e}", invocation.executable.display()))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RendererError::Spawn("no stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RendererError::Spawn("no stderr pipe".into()))?;

        // Separate scanner tasks so neither pipe can back up the renderer.
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "renderer", "{line}");
            }
        });

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(self.stderr_tail_lines)));
        let tail_capacity = self.stderr_tail_lines;
        let tail_writer = Arc::clone(&tail);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "renderer", "stderr: {line}");
                let mut buffer = tail_writer.lock();
                if buffer.len() == tail_capacity {
                    buffer.pop_front();
                }
                buffer.push_back(line);
            }
        });

        let status = child
            .wait()
            .await
            .map_err(|e| RendererError::Spawn(format!("wait: {e}")))?;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if !status.success() {
            let stderr_tail: Vec<String> = tail.lock().iter().cloned().collect();
            return Err(RendererError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr_tail,
            });
        }

        let mut output_files: Vec<PathBuf> = std::fs::read_dir(&invocation.output_dir)
            .map_err(|e| RendererError::MissingOutput {
                path: format!("{}: {e}", invocation.output_dir.display()),
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        if output_files.is_empty() {
            return Err(RendererError::MissingOutput {
                path: invocation.output_dir.display().to_string(),
            });
        }
        output_files.sort();
        Ok(RenderOutcome { output_files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderhive_types::app::{RenderDevice, RenderEngine};

    fn invocation(dir: &std::path::Path, executable: &str) -> RenderInvocation {
        RenderInvocation {
            executable: PathBuf::from(executable),
            scene: dir.join("scene.blend"),
            engine: RenderEngine::Cycles,
            device: RenderDevice::Cpu,
            frame_start: 1,
            frame_end: 1,
            frame_step: 1,
            output_dir: dir.join("out"),
            threads: 2,
        }
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BlenderDriver::new(20);
        let err = driver
            .render(invocation(dir.path(), "/nonexistent/renderer"))
            .await
            .unwrap_err();
        assert!(matches!(err, RendererError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_the_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        // A stand-in renderer that complains and fails.
        let script = dir.path().join("fake-renderer.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'boom one' >&2\necho 'boom two' >&2\nexit 3\n")
            .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let driver = BlenderDriver::new(1);
        let err = driver
            .render(invocation(dir.path(), script.to_str().unwrap()))
            .await
            .unwrap_err();
        match err {
            RendererError::NonZeroExit { code, stderr_tail } => {
                assert_eq!(code, 3);
                // Only the trailing line survives a capacity of one.
                assert_eq!(stderr_tail, vec!["boom two".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_without_output_is_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-renderer.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let driver = BlenderDriver::new(20);
        let err = driver
            .render(invocation(dir.path(), script.to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, RendererError::MissingOutput { .. }));
    }
}
