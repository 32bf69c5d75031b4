use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Trailing token that sends a script line to the background.
pub const BACKGROUND_MARKER: &str = "&nascore";

/// One parsed line of a command script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLine {
    /// `export K=V`, `set K=V` or bare `K=V`
    Env { key: String, value: String },
    Run {
        program: String,
        args: Vec<String>,
        background: bool,
        /// Original line, used in logs
        line: String,
    },
}

/// Replaces each `${Name}` placeholder with its value.
pub fn expand_placeholders(script: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(script.to_string(), |acc, (name, value)| {
        acc.replace(&format!("${{{}}}", name), value)
    })
}

/// Splits a script into environment assignments and commands. Blank lines are
/// dropped; arguments are whitespace-separated with no shell quoting.
pub fn parse_script(script: &str) -> Vec<ScriptLine> {
    script.lines().filter_map(parse_line).collect()
}

fn parse_line(raw: &str) -> Option<ScriptLine> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    let assignment = line
        .strip_prefix("export ")
        .or_else(|| line.strip_prefix("set "))
        .map(str::trim)
        .or_else(|| is_bare_assignment(line).then_some(line));
    if let Some(assignment) = assignment {
        return parse_assignment(assignment);
    }

    let mut parts: Vec<String> = line.split_whitespace().map(String::from).collect();
    let background = parts.last().is_some_and(|p| p == BACKGROUND_MARKER);
    if background {
        parts.pop();
    }
    if parts.is_empty() {
        return None;
    }
    let program = parts.remove(0);

    Some(ScriptLine::Run {
        program,
        args: parts,
        background,
        line: line.to_string(),
    })
}

fn is_bare_assignment(line: &str) -> bool {
    if line.contains(char::is_whitespace) {
        return false;
    }
    match line.split_once('=') {
        Some((key, _)) => {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn parse_assignment(assignment: &str) -> Option<ScriptLine> {
    let Some((key, value)) = assignment.split_once('=') else {
        warn!("Ignoring malformed assignment: {}", assignment);
        return None;
    };
    Some(ScriptLine::Env {
        key: key.trim().to_string(),
        value: strip_quotes(value.trim()).to_string(),
    })
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Outcome of one script run. Background lines are not awaited and do not
/// appear here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub executed: usize,
    pub backgrounded: usize,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// `line: reason` for every foreground line that failed
    pub failures: Vec<String>,
}

impl ScriptReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs multi-line command scripts such as certificate renewal or remote
/// mount recipes.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    log_file: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every command's output to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Executes `script` line by line. A failing line is recorded and the
    /// remaining lines still run.
    pub async fn run(&self, script: &str) -> ScriptReport {
        let mut report = ScriptReport::default();
        let mut envs: Vec<(String, String)> = Vec::new();

        for entry in parse_script(script) {
            match entry {
                ScriptLine::Env { key, value } => {
                    debug!("Script env {}", key);
                    envs.push((key, value));
                }
                ScriptLine::Run {
                    program,
                    args,
                    background: true,
                    line,
                } => {
                    info!("Script background: {}", line);
                    report.backgrounded += 1;
                    let envs = envs.clone();
                    let log_file = self.log_file.clone();
                    tokio::spawn(async move {
                        let result = run_command(&program, &args, &envs).await;
                        if let Err(reason) = &result {
                            warn!("Background command '{}' failed: {}", line, reason);
                        }
                        record(log_file.as_deref(), &line, result.as_ref().ok()).await;
                    });
                }
                ScriptLine::Run {
                    program,
                    args,
                    background: false,
                    line,
                } => {
                    debug!("Script sequential: {}", line);
                    report.executed += 1;
                    let result = run_command(&program, &args, &envs).await;
                    record(self.log_file.as_deref(), &line, result.as_ref().ok()).await;
                    match result {
                        Ok(output) => {
                            report
                                .stdout
                                .push(String::from_utf8_lossy(&output.stdout).into_owned());
                            report
                                .stderr
                                .push(String::from_utf8_lossy(&output.stderr).into_owned());
                            if !output.status.success() {
                                report
                                    .failures
                                    .push(format!("{}: exited with {}", line, output.status));
                            }
                        }
                        Err(reason) => {
                            warn!("Command '{}' failed: {}", line, reason);
                            report.failures.push(format!("{}: {}", line, reason));
                        }
                    }
                }
            }
        }

        report
    }
}

async fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
) -> std::result::Result<Output, String> {
    Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| e.to_string())
}

async fn record(log_file: Option<&Path>, line: &str, output: Option<&Output>) {
    let Some(log_file) = log_file else {
        return;
    };

    let mut entry = format!("\n[cmd] {}\n", line);
    if let Some(output) = output {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            entry.push_str(&format!("[stdout]\n{}\n", stdout));
        }
        if !stderr.is_empty() {
            entry.push_str(&format!("[stderr]\n{}\n", stderr));
        }
    }

    if let Err(e) = append(log_file, &entry).await {
        debug!("Cannot write script log {}: {}", log_file.display(), e);
    }
}

async fn append(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_forms_and_markers() {
        let lines = parse_script(
            "export LEGO_EMAIL=\"you@example.com\"\n\
             \n\
             set CF_TOKEN='abc'\n\
             PLAIN=1\n\
             /opt/lego --dns cloudflare run &nascore\n\
             echo done\n",
        );

        assert_eq!(
            lines,
            vec![
                ScriptLine::Env {
                    key: "LEGO_EMAIL".into(),
                    value: "you@example.com".into()
                },
                ScriptLine::Env {
                    key: "CF_TOKEN".into(),
                    value: "abc".into()
                },
                ScriptLine::Env {
                    key: "PLAIN".into(),
                    value: "1".into()
                },
                ScriptLine::Run {
                    program: "/opt/lego".into(),
                    args: vec!["--dns".into(), "cloudflare".into(), "run".into()],
                    background: true,
                    line: "/opt/lego --dns cloudflare run &nascore".into(),
                },
                ScriptLine::Run {
                    program: "echo".into(),
                    args: vec!["done".into()],
                    background: false,
                    line: "echo done".into(),
                },
            ]
        );
    }

    #[test]
    fn argument_with_equals_is_not_an_assignment() {
        let lines = parse_script("rclone mount --vfs-cache-mode=full remote: /mnt");
        assert!(matches!(&lines[0], ScriptLine::Run { program, .. } if program == "rclone"));
    }

    #[test]
    fn placeholders_are_substituted() {
        let script = "export LEGO_PATH=${LEGO_PATH}\n${BinPath} run";
        let expanded = expand_placeholders(
            script,
            &[("BinPath", "/opt/lego"), ("LEGO_PATH", "/var/lego")],
        );
        assert_eq!(expanded, "export LEGO_PATH=/var/lego\n/opt/lego run");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_reaches_later_lines() {
        let report = ScriptRunner::new()
            .run("export GREETING=\"hello there\"\nprintenv GREETING")
            .await;
        assert!(report.is_success());
        assert_eq!(report.stdout, vec!["hello there\n".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_line_does_not_stop_script() {
        let report = ScriptRunner::new()
            .run("false\n/no/such/binary\necho after")
            .await;
        assert_eq!(report.executed, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.stdout.last().map(String::as_str), Some("after\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lego").join("run.log");
        let runner = ScriptRunner::new().with_log_file(&log);

        runner.run("echo first").await;
        runner.run("echo second").await;

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("[cmd] echo first\n[stdout]\nfirst\n"));
        assert!(content.contains("[cmd] echo second\n[stdout]\nsecond\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_lines_are_not_awaited() {
        let started = std::time::Instant::now();
        let report = ScriptRunner::new().run("sleep 5 &nascore\necho now").await;
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(report.backgrounded, 1);
        assert_eq!(report.executed, 1);
    }
}
