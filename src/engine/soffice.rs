//! LibreOffice headless engine
//!
//! Runs `soffice --convert-to` for one document per call.
//!
//! ## Requirements
//!
//! - `soffice` (LibreOffice) must be installed and available in PATH, or
//!   configured through `CONVERT_ENGINE_PATH`
//! - The profile directory must be writable; it is reused across calls,
//!   which is one of the reasons calls must never overlap
//!
//! ## Cleanup
//!
//! soffice writes into a private directory created for each call under the
//! work directory, and only the finished file is moved onto the job's output
//! path. The directory goes away with the call, partial output included.
//! On unix the converter runs in its own process group, and the whole group
//! is killed when the call ends, so the `soffice.bin` child the launcher
//! forks cannot outlive a timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ConversionEngine, EngineError, EngineExit, EngineJob};

/// stderr marker soffice prints when no import filter accepts the input
const LOAD_FAILURE_MARKER: &str = "source file could not be loaded";

/// Prefix of the per-call output directories
const OUT_DIR_PREFIX: &str = "soffice-";

/// Configuration for the soffice engine
#[derive(Debug, Clone)]
pub struct SofficeConfig {
    /// Path to the soffice executable (default: "soffice" - uses PATH)
    pub soffice_path: String,
    /// Dedicated user profile, kept apart from any desktop session
    pub profile_dir: PathBuf,
}

impl Default for SofficeConfig {
    fn default() -> Self {
        Self {
            soffice_path: "soffice".to_string(),
            profile_dir: std::env::temp_dir().join("docconvert").join("profile"),
        }
    }
}

/// Headless LibreOffice converter
pub struct SofficeEngine {
    config: SofficeConfig,
}

impl SofficeEngine {
    pub fn new(config: SofficeConfig) -> Self {
        Self { config }
    }

    fn profile_url(&self) -> String {
        let profile = self.config.profile_dir.to_string_lossy().replace('\\', "/");
        if profile.starts_with('/') {
            format!("file://{}", profile)
        } else {
            format!("file:///{}", profile)
        }
    }

    fn command(&self, job: &EngineJob, out_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.soffice_path);

        cmd.arg("--headless")
            .arg("--norestore")
            .arg("--nologo")
            .arg("--nodefault")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation={}", self.profile_url()))
            .arg("--convert-to")
            .arg(job.format.soffice_filter())
            .arg("--outdir")
            .arg(out_dir)
            .arg(&job.input);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Kills the converter's process group when dropped.
///
/// `kill_on_drop` only reaches the launcher; whatever it forked lives on in
/// the group.
#[cfg(unix)]
struct ProcessGroup(Option<nix::unistd::Pid>);

#[cfg(unix)]
impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        let pgid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(nix::unistd::Pid::from_raw);
        Self(pgid)
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        let Some(pgid) = self.0 else { return };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => tracing::debug!(pgid = pgid.as_raw(), "Killed soffice process group"),
            // Every member already exited
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(
                pgid = pgid.as_raw(),
                error = %e,
                "Failed to kill soffice process group"
            ),
        }
    }
}

/// File soffice writes for `input`: same stem, export extension, in `out_dir`
fn produced_path(input: &Path, out_dir: &Path, extension: &str) -> Option<PathBuf> {
    let stem = input.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(extension);
    Some(out_dir.join(name))
}

#[async_trait]
impl ConversionEngine for SofficeEngine {
    fn name(&self) -> &str {
        "soffice"
    }

    async fn is_available(&self) -> bool {
        let result = Command::new(&self.config.soffice_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        matches!(result, Ok(status) if status.success())
    }

    async fn run(&self, job: &EngineJob) -> Result<EngineExit, EngineError> {
        let work_dir = job.output.parent().unwrap_or_else(|| Path::new("."));
        // Declared first so it is removed last, after the process group is gone
        let out_dir = tempfile::Builder::new()
            .prefix(OUT_DIR_PREFIX)
            .tempdir_in(work_dir)
            .map_err(|e| EngineError::Output(format!("failed to create output directory: {}", e)))?;

        let child = self
            .command(job, out_dir.path())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                engine: self.config.soffice_path.clone(),
                source,
            })?;

        #[cfg(unix)]
        let _group = ProcessGroup::of(&child);

        // Dropping this future drops `child` and `_group`, which kills soffice
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| EngineError::Wait {
                engine: self.config.soffice_path.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "soffice stderr");
        }

        if stderr.contains(LOAD_FAILURE_MARKER) {
            let reason = stderr
                .lines()
                .find(|line| line.contains(LOAD_FAILURE_MARKER))
                .unwrap_or(LOAD_FAILURE_MARKER)
                .trim()
                .trim_start_matches("Error:")
                .trim()
                .to_string();
            return Ok(EngineExit::Rejected(reason));
        }

        let Some(code) = output.status.code() else {
            return Ok(EngineExit::Terminated);
        };

        if code == 0 {
            // soffice names its output after the input; move it to the agreed path
            let produced = produced_path(&job.input, out_dir.path(), job.format.extension())
                .ok_or_else(|| EngineError::Output("input has no file name".to_string()))?;

            match tokio::fs::rename(&produced, &job.output).await {
                Ok(()) => {}
                // Missing output is the invoker's call to make
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(EngineError::Output(format!(
                        "failed to move {}: {}",
                        produced.display(),
                        e
                    )))
                }
            }
        }

        Ok(EngineExit::Completed { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ExportFormat;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn job() -> EngineJob {
        EngineJob {
            input: PathBuf::from("/work/upload-abc-report.docx"),
            format: ExportFormat::Txt,
            output: PathBuf::from("/work/output.txt"),
        }
    }

    #[test]
    fn test_produced_path_uses_input_stem() {
        let job = job();
        let produced = produced_path(&job.input, Path::new("/work"), "pdf").unwrap();
        assert_eq!(produced, PathBuf::from("/work/upload-abc-report.pdf"));
    }

    #[test]
    fn test_command_arguments() {
        let engine = SofficeEngine::new(SofficeConfig {
            soffice_path: "/opt/libreoffice/program/soffice".to_string(),
            profile_dir: PathBuf::from("/var/lib/docconvert/profile"),
        });

        let cmd = engine.command(&job(), Path::new("/work"));
        let std_cmd = cmd.as_std();
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            std_cmd.get_program().to_string_lossy(),
            "/opt/libreoffice/program/soffice"
        );
        assert!(args.contains(&"--headless".to_string()));
        assert!(args
            .contains(&"-env:UserInstallation=file:///var/lib/docconvert/profile".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--convert-to" && w[1] == "txt:Text"));
        assert!(args.windows(2).any(|w| w[0] == "--outdir" && w[1] == "/work"));
        assert_eq!(args.last().unwrap(), "/work/upload-abc-report.docx");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let engine = SofficeEngine::new(SofficeConfig {
            soffice_path: "/nonexistent/soffice".to_string(),
            ..SofficeConfig::default()
        });

        assert!(!engine.is_available().await);

        let job = EngineJob {
            input: temp_dir.path().join("upload-abc-report.docx"),
            format: ExportFormat::Txt,
            output: temp_dir.path().join("output.txt"),
        };
        let result = engine.run(&job).await;
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
        assert_eq!(entries(temp_dir.path()), Vec::<String>::new());
    }

    #[cfg(unix)]
    mod scripted {
        //! The real engine driven by shell scripts standing in for soffice.
        //! Each script sees the same arguments soffice would.

        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        /// Parses `--outdir` and the input path, then runs `body`
        fn fake_soffice(dir: &Path, body: &str) -> SofficeEngine {
            let script = dir.join("fake-soffice");
            std::fs::write(
                &script,
                format!(
                    "#!/bin/sh\n\
                     outdir=\"\"\n\
                     while [ $# -gt 1 ]; do\n\
                     \x20 if [ \"$1\" = \"--outdir\" ]; then outdir=\"$2\"; fi\n\
                     \x20 shift\n\
                     done\n\
                     input=\"$1\"\n\
                     name=$(basename \"$input\")\n\
                     stem=\"${{name%.*}}\"\n\
                     {body}\n"
                ),
            )
            .unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            SofficeEngine::new(SofficeConfig {
                soffice_path: script.to_string_lossy().into_owned(),
                profile_dir: dir.join("profile"),
            })
        }

        struct Workspace {
            _temp_dir: TempDir,
            bin_dir: PathBuf,
            work_dir: PathBuf,
        }

        fn workspace() -> Workspace {
            let temp_dir = TempDir::new().unwrap();
            let bin_dir = temp_dir.path().join("bin");
            let work_dir = temp_dir.path().join("work");
            std::fs::create_dir_all(&bin_dir).unwrap();
            std::fs::create_dir_all(&work_dir).unwrap();
            Workspace {
                _temp_dir: temp_dir,
                bin_dir,
                work_dir,
            }
        }

        impl Workspace {
            fn job(&self, input_name: &str, format: ExportFormat) -> EngineJob {
                let input = self.work_dir.join(input_name);
                std::fs::write(&input, b"uploaded bytes").unwrap();
                EngineJob {
                    input,
                    format,
                    output: self
                        .work_dir
                        .join(format!("output.{}", format.extension())),
                }
            }
        }

        #[tokio::test]
        async fn test_same_format_without_output_is_not_the_input() {
            let ws = workspace();
            let engine = fake_soffice(&ws.bin_dir, "exit 0");
            let job = ws.job("upload-x-doc.docx", ExportFormat::Docx);

            let exit = engine.run(&job).await.unwrap();

            assert_eq!(exit, EngineExit::Completed { code: 0 });
            assert!(!job.output.exists());
            assert_eq!(std::fs::read(&job.input).unwrap(), b"uploaded bytes");
            assert_eq!(entries(&ws.work_dir), vec!["upload-x-doc.docx"]);
        }

        #[tokio::test]
        async fn test_same_format_output_is_moved() {
            let ws = workspace();
            let engine = fake_soffice(
                &ws.bin_dir,
                "[ \"$(dirname \"$input\")\" != \"$outdir\" ] || exit 3\n\
                 printf converted > \"$outdir/$stem.docx\"",
            );
            let job = ws.job("upload-x-doc.docx", ExportFormat::Docx);

            let exit = engine.run(&job).await.unwrap();

            assert_eq!(exit, EngineExit::Completed { code: 0 });
            assert_eq!(std::fs::read(&job.output).unwrap(), b"converted");
            assert_eq!(std::fs::read(&job.input).unwrap(), b"uploaded bytes");
            let mut left = entries(&ws.work_dir);
            left.sort();
            assert_eq!(left, vec!["output.docx", "upload-x-doc.docx"]);
        }

        #[tokio::test]
        async fn test_partial_output_is_removed_on_failure() {
            let ws = workspace();
            let engine = fake_soffice(
                &ws.bin_dir,
                "printf partial > \"$outdir/$stem.pdf\"\nexit 1",
            );
            let job = ws.job("upload-x-doc.docx", ExportFormat::Pdf);

            let exit = engine.run(&job).await.unwrap();

            assert_eq!(exit, EngineExit::Completed { code: 1 });
            assert_eq!(entries(&ws.work_dir), vec!["upload-x-doc.docx"]);
        }

        #[tokio::test]
        async fn test_load_failure_is_rejected() {
            let ws = workspace();
            let engine = fake_soffice(
                &ws.bin_dir,
                "echo \"Error: source file could not be loaded\" >&2\nexit 0",
            );
            let job = ws.job("upload-x-junk.doc", ExportFormat::Pdf);

            let exit = engine.run(&job).await.unwrap();

            assert_eq!(
                exit,
                EngineExit::Rejected("source file could not be loaded".to_string())
            );
            assert_eq!(entries(&ws.work_dir), vec!["upload-x-junk.doc"]);
        }

        #[tokio::test]
        async fn test_cancelled_run_kills_forked_children() {
            let ws = workspace();
            let marker = ws.bin_dir.join("late");
            let engine = fake_soffice(
                &ws.bin_dir,
                &format!(
                    "(sleep 0.3; echo late > \"{}\") &\nwait",
                    marker.display()
                ),
            );
            let job = ws.job("upload-x-doc.docx", ExportFormat::Pdf);

            let result = tokio::time::timeout(Duration::from_millis(50), engine.run(&job)).await;
            assert!(result.is_err());

            tokio::time::sleep(Duration::from_millis(600)).await;
            assert!(!marker.exists(), "forked child outlived the cancelled run");
            assert_eq!(entries(&ws.work_dir), vec!["upload-x-doc.docx"]);
        }
    }
}
