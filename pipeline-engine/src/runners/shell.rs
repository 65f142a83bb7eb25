// Shell Runner
// Executes script steps and the built-in publish/download artifact steps

use crate::artifacts::ArtifactError;
use crate::execution::events::ExecutionEvent;
use crate::parser::models::{DownloadStep, PublishStep, ScriptStep, Step, StepAction, StepStatus};
use crate::runners::{StepContext, StepOutcome, StepRunner};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Runs `script` steps through the configured shell and handles
/// `publish`/`download` against the unit's artifact store
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_script(&self, step: &ScriptStep, ctx: &StepContext, full: &Step) -> StepOutcome {
        let script = ctx.expand(&step.script);
        let working_dir = resolve_dir(&ctx.working_dir, step.working_directory.as_deref().map(|d| ctx.expand(d)));
        let (program, args) = shell_command(&ctx.shell);

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.arg(&script);
        cmd.current_dir(&working_dir);
        cmd.envs(ctx.environment(full));
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StepOutcome::failed(format!(
                    "failed to spawn shell process '{}': {}",
                    program, e
                ))
            }
        };

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<(String, bool)>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone(), true));
        }
        drop(line_tx);

        let mut variables = Vec::new();
        let mut streams_open = true;
        let status = loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let _ = child.kill().await;
                    return StepOutcome::canceled();
                }
                line = line_rx.recv(), if streams_open => match line {
                    Some((line, is_error)) => {
                        if !is_error {
                            if let Some(write) = parse_set_variable(&line) {
                                variables.push(write);
                            }
                        }
                        ctx.emit(ExecutionEvent::step_output(&ctx.unit, ctx.step_index, line, is_error));
                    }
                    None => streams_open = false,
                },
                status = child.wait(), if !streams_open => break status,
            }
        };

        let exit_code = status.ok().and_then(|s| s.code());
        let succeeded = exit_code == Some(0);
        StepOutcome {
            status: if succeeded {
                StepStatus::Succeeded
            } else {
                StepStatus::Failed
            },
            exit_code,
            variables,
            artifacts: Vec::new(),
            error: (!succeeded).then(|| match exit_code {
                Some(code) => format!("script exited with code {}", code),
                None => "script terminated by signal".to_string(),
            }),
        }
    }

    async fn publish(&self, step: &PublishStep, ctx: &StepContext) -> StepOutcome {
        let source = resolve_dir(&ctx.working_dir, Some(ctx.expand(&step.publish)));
        let name = match &step.artifact {
            Some(name) => ctx.expand(name),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| step.publish.clone()),
        };

        if source.is_dir() {
            return StepOutcome::failed(format!(
                "cannot publish '{}': only files can be published",
                source.display()
            ));
        }

        let payload = match tokio::fs::read(&source).await {
            Ok(payload) => payload,
            Err(source_err) => {
                return StepOutcome::failed(
                    ArtifactError::Io {
                        name,
                        source: source_err,
                    }
                    .to_string(),
                )
            }
        };

        match ctx.artifacts.publish(&name, payload).await {
            Ok(reference) => {
                ctx.emit(ExecutionEvent::ArtifactPublished {
                    unit: ctx.unit.clone(),
                    artifact: reference.clone(),
                });
                StepOutcome {
                    artifacts: vec![reference],
                    ..StepOutcome::succeeded()
                }
            }
            Err(err) => StepOutcome::failed(err.to_string()),
        }
    }

    async fn download(&self, step: &DownloadStep, ctx: &StepContext) -> StepOutcome {
        let name = ctx.expand(&step.download);
        let Some(reference) = ctx.artifacts.lookup(&name).await else {
            return StepOutcome::failed(ArtifactError::NotFound { name }.to_string());
        };

        let payload = match ctx.artifacts.fetch(&reference).await {
            Ok(payload) => payload,
            Err(err) => return StepOutcome::failed(err.to_string()),
        };

        let target = resolve_dir(
            &ctx.working_dir,
            Some(step.path.as_deref().map(|p| ctx.expand(p)).unwrap_or_else(|| name.clone())),
        );
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return StepOutcome::failed(ArtifactError::Io { name, source: e }.to_string());
            }
        }
        if let Err(e) = tokio::fs::write(&target, payload).await {
            return StepOutcome::failed(ArtifactError::Io { name, source: e }.to_string());
        }

        StepOutcome::succeeded()
    }
}

#[async_trait::async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &Step, context: &StepContext) -> StepOutcome {
        match &step.action {
            StepAction::Script(script) => self.run_script(script, context, step).await,
            StepAction::Publish(publish) => self.publish(publish, context).await,
            StepAction::Download(download) => self.download(download, context).await,
        }
    }
}

fn shell_command(shell: &str) -> (&str, &'static [&'static str]) {
    match shell {
        "cmd" | "cmd.exe" => (shell, &["/C"]),
        "pwsh" | "powershell" | "powershell.exe" => (shell, &["-NoLogo", "-NoProfile", "-Command"]),
        _ => (shell, &["-c"]),
    }
}

fn resolve_dir(base: &Path, relative: Option<String>) -> PathBuf {
    match relative {
        Some(path) if Path::new(&path).is_absolute() => PathBuf::from(path),
        Some(path) => base.join(path),
        None => base.to_path_buf(),
    }
}

/// `##vso[task.setvariable variable=name;isoutput=true]value`; secrets are dropped
fn parse_set_variable(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("##vso[task.setvariable")
        .or_else(|| trimmed.strip_prefix("##vso[task.setVariable"))?;
    let (props, value) = rest.split_once(']')?;

    let mut name = None;
    for prop in props.split(';') {
        let prop = prop.trim();
        if let Some(n) = prop.strip_prefix("variable=") {
            name = Some(n.trim().to_string());
        } else if prop.eq_ignore_ascii_case("issecret=true") {
            return None;
        }
    }

    name.filter(|n| !n.is_empty())
        .map(|n| (n, value.to_string()))
}

/// Forward output lines until EOF; invalid UTF-8 is replaced, not fatal,
/// so the pipe keeps draining
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<(String, bool)>, is_error: bool)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                let _ = tx.send((line, is_error));
            }
        }
    }
}
