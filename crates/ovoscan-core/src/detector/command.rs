//! Detector backed by an external program
//!
//! The image is written to the program's stdin; the first non-empty line of
//! stdout is the label. A program that cannot be started means the detector
//! is unavailable. A program that exits non-zero, prints nothing, or runs
//! past the timeout fails only the image it was given.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::Detector;
use crate::config::DetectorConfig;
use crate::error::{DetectionError, Error, Result};

pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let (program, args) = config.command.split_first().ok_or_else(|| {
            Error::Config("detector.command must name a program to run".to_string())
        })?;
        Ok(Self::new(
            program.clone(),
            args.to_vec(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    async fn run(&self, image: &[u8]) -> std::result::Result<String, DetectionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DetectionError::Unavailable(format!("failed to start {}: {}", self.program, e))
            })?;

        // Feed stdin while stdout drains; a program may answer before reading it all
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(image).await {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output =
            output.map_err(|e| DetectionError::Image(format!("failed to read output: {}", e)))?;
        fed.map_err(|e| DetectionError::Image(format!("failed to send image: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::Image(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| DetectionError::Image(format!("{} printed no label", self.program)))
    }
}

#[async_trait]
impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.program
    }

    async fn detect(&self, image: &[u8]) -> std::result::Result<String, DetectionError> {
        debug!(program = %self.program, bytes = image.len(), "Running detector command");
        tokio::time::timeout(self.timeout, self.run(image))
            .await
            .map_err(|_| {
                DetectionError::Image(format!("detector timed out after {:?}", self.timeout))
            })?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandDetector {
        CommandDetector::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_from_config_requires_program() {
        let config = DetectorConfig::default();
        assert!(matches!(
            CommandDetector::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_label_from_first_line() {
        let detector = sh("cat > /dev/null; echo; echo eggs-present; echo ignored");
        assert_eq!(detector.detect(b"image").await.unwrap(), "eggs-present");
    }

    #[tokio::test]
    async fn test_reads_image_from_stdin() {
        let detector = sh("wc -c | tr -d ' '");
        assert_eq!(detector.detect(b"12345").await.unwrap(), "5");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_image_failure() {
        let detector = sh("cat > /dev/null; echo bad image >&2; exit 3");
        let err = detector.detect(b"x").await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("bad image"));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let detector = CommandDetector::new(
            "/nonexistent/ovoscan-detector",
            Vec::new(),
            Duration::from_secs(5),
        );
        assert!(detector.detect(b"x").await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_timeout_is_image_failure() {
        let detector = CommandDetector::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let err = detector.detect(b"").await.unwrap_err();
        assert!(err.to_string().contains("timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_label_without_reading_image() {
        let detector = sh("echo eggs-present");
        let image = vec![0u8; 1024 * 1024];
        assert_eq!(detector.detect(&image).await.unwrap(), "eggs-present");
    }

    #[tokio::test]
    async fn test_large_output_before_reading_image() {
        let detector = sh("yes eggs | head -n 50000; cat > /dev/null");
        let image = vec![0u8; 1024 * 1024];
        assert_eq!(detector.detect(&image).await.unwrap(), "eggs");
    }
}
