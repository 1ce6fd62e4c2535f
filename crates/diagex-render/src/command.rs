//! Rendering through the Mermaid CLI (`mmdc`).
//!
//! `mmdc` doesn't write to stdout, so each render uses a private temporary
//! directory: the source goes to `input.mmd`, the CLI writes
//! `output.<ext>`, and the result is read back. The child is spawned with
//! `kill_on_drop`, so dropping the render future terminates it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::RenderError;
use crate::format::RenderOptions;
use crate::output::{finalize, source_format};
use crate::Renderer;

/// Default Mermaid CLI executable.
pub const DEFAULT_COMMAND: &str = "mmdc";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Mermaid CLI backend.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for CommandRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl CommandRenderer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parse a whitespace-separated command line such as
    /// `npx -y @mermaid-js/mermaid-cli`. Returns `None` for a blank line.
    #[must_use]
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts.map(str::to_owned)))
    }

    /// Arguments placed before the render arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Command line for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Renderer for CommandRenderer {
    fn name(&self) -> &'static str {
        "mermaid-cli"
    }

    async fn is_available(&self) -> bool {
        let mut command = self.command();
        command.arg("--version").stdout(Stdio::null()).stderr(Stdio::null());

        match tokio::time::timeout(PROBE_TIMEOUT, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(command = %self.command_line(), error = %e, "Renderer probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(command = %self.command_line(), "Renderer probe timed out");
                false
            }
        }
    }

    async fn export(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        let produced = source_format(options.format);
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.mmd");
        let output = dir.path().join(format!("output.{}", produced.extension()));
        tokio::fs::write(&input, source).await?;

        let mut command = self.command();
        command
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .arg("-t")
            .arg(options.theme.as_str())
            .arg("-b")
            .arg(&options.background_color);
        if let Some(width) = options.width {
            command.arg("-w").arg(width.to_string());
        }
        if let Some(height) = options.height {
            command.arg("-H").arg(height.to_string());
        }
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        let result = command.output().await?;
        if !result.status.success() {
            return Err(RenderError::Process {
                command: self.command_line(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_owned(),
            });
        }

        let bytes = tokio::fs::read(&output).await?;
        finalize(bytes, produced, options.format)
    }

    fn required_dependencies(&self) -> Vec<String> {
        vec![
            "Node.js".to_owned(),
            format!("@mermaid-js/mermaid-cli ({})", self.command_line()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ExportFormat, Theme};

    #[test]
    fn test_from_command_line() {
        let renderer = CommandRenderer::from_command_line("npx -y @mermaid-js/mermaid-cli").unwrap();
        assert_eq!(renderer.program, PathBuf::from("npx"));
        assert_eq!(renderer.args, vec!["-y", "@mermaid-js/mermaid-cli"]);
        assert_eq!(renderer.command_line(), "npx -y @mermaid-js/mermaid-cli");
        assert!(CommandRenderer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let renderer = CommandRenderer::new("/nonexistent/diagex/mmdc");
        assert!(!renderer.is_available().await);
    }

    #[tokio::test]
    async fn test_missing_program_fails_with_io_error() {
        let renderer = CommandRenderer::new("/nonexistent/diagex/mmdc");
        let err = renderer
            .export("graph TD", &RenderOptions::new(ExportFormat::Svg))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }

    /// A stand-in for `mmdc`, run through `sh` so no executable bit is needed.
    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path, body: &str) -> CommandRenderer {
        let script = dir.join("fake-mmdc.sh");
        std::fs::write(&script, body).unwrap();
        CommandRenderer::new("sh").with_args([script.display().to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_renders_through_cli_arguments() {
        let temp = tempfile::tempdir().unwrap();
        let args_log = temp.path().join("args.txt");
        let renderer = fake_cli(
            temp.path(),
            &format!(
                r#"echo "$@" > "{log}"
while [ $# -gt 0 ]; do
  case "$1" in -o) out="$2"; shift;; esac
  shift
done
printf '<svg xmlns="http://www.w3.org/2000/svg"></svg>' > "$out"
"#,
                log = args_log.display()
            ),
        );

        let options = RenderOptions::new(ExportFormat::Svg)
            .with_theme(Theme::Dark)
            .with_size(Some(1200), None);
        let bytes = renderer.export("graph TD\n  A --> B", &options).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<svg"));

        let args = std::fs::read_to_string(&args_log).unwrap();
        assert!(args.contains("-t dark"));
        assert!(args.contains("-b white"));
        assert!(args.contains("-w 1200"));
        assert!(!args.contains("-H"));
        assert!(args.contains("output.svg"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_cli_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let renderer = fake_cli(temp.path(), "echo 'Parse error on line 2' >&2\nexit 3\n");

        let err = renderer
            .export("graph TD\n  A -->", &RenderOptions::new(ExportFormat::Png))
            .await
            .unwrap_err();
        match err {
            RenderError::Process { stderr, .. } => assert_eq!(stderr, "Parse error on line 2"),
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_output_is_validated() {
        let temp = tempfile::tempdir().unwrap();
        let renderer = fake_cli(
            temp.path(),
            r#"while [ $# -gt 0 ]; do
  case "$1" in -o) out="$2"; shift;; esac
  shift
done
printf 'not a png' > "$out"
"#,
        );

        let err = renderer
            .export("graph TD", &RenderOptions::new(ExportFormat::Png))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidOutput { .. }));
    }
}
