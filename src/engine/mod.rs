use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;

use crate::error::Result;
use crate::job::{IdSequence, Job, Outcome};
use crate::params::{ParamValue, SweepSpec};
use crate::schema;
use crate::template;

/// Specification of one external command invocation.
#[derive(Debug, Clone, Default)]
pub struct CmdSpec {
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    pub envs: Vec<(String, String)>,
}

impl CmdSpec {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        CmdSpec {
            argv: argv.into_iter().map(Into::into).collect(),
            ..CmdSpec::default()
        }
    }
}

/// Terminal state of an external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Narrow interface to the outside world: run a command, feed it stdin,
/// bound it by a wall-clock timeout. Tests inject a mock implementation.
pub trait CommandRunner {
    fn run(&self, spec: &CmdSpec) -> io::Result<CmdOutput>;
}

/// Runs commands as real subprocesses.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CmdSpec) -> io::Result<CmdOutput> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;

        if let Some(input) = &spec.stdin {
            // Write the script and close the pipe so the tool sees EOF
            let mut pipe = child.stdin.take().expect("stdin was piped");
            pipe.write_all(input.as_bytes())?;
            drop(pipe);
        }

        // Drain output on reader threads so a chatty child cannot fill the
        // pipe buffer and stall while we poll for exit
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let started = Instant::now();
        let status = loop {
            if let Some(timeout) = spec.timeout {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    break RunStatus::TimedOut;
                }
            }
            match child.try_wait()? {
                Some(status) => break RunStatus::Exited(status.code().unwrap_or(-1)),
                None => thread::sleep(Duration::from_millis(25)),
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        Ok(CmdOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Execution-engine settings for one batch run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Benchmark tool binary
    pub fio_cmd: String,
    /// Wall-clock bound on each tool invocation
    pub timeout: Option<Duration>,
    /// Delay slept before every job execution
    pub cooldown: Duration,
    /// Command run before each job with the parameters in its environment
    pub pre_hook: Option<String>,
    /// Sync and drop kernel caches before each job
    pub drop_caches: bool,
    /// Trim the filesystem holding the job's target file before each job
    pub trim: bool,
    /// Randomize job order independently per replicate
    pub shuffle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fio_cmd: "fio".to_string(),
            timeout: None,
            cooldown: Duration::from_secs(2),
            pre_hook: None,
            drop_caches: false,
            trim: false,
            shuffle: false,
        }
    }
}

/// Counts reported after a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Jobs never attempted because their construction failed
    pub skipped: usize,
}

/// Sequential batch executor. Jobs never overlap: concurrent benchmark
/// invocations would share page cache and device queue state and invalidate
/// each other's measurements.
pub struct Engine<'a> {
    runner: &'a dyn CommandRunner,
    config: EngineConfig,
    ids: IdSequence,
}

impl<'a> Engine<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: EngineConfig, ids: IdSequence) -> Self {
        Engine {
            runner,
            config,
            ids,
        }
    }

    /// Runs the full sweep: every template against every parameter
    /// combination, once per replicate. Result rows go to `output`, which is
    /// flushed after every job so partial results survive a crash.
    pub fn run_sweep(
        &mut self,
        spec: &SweepSpec,
        templates: &[String],
        output: &mut dyn Write,
    ) -> Result<RunSummary> {
        let mut key_columns = vec!["replicate".to_string()];
        key_columns.extend(spec.keys().map(str::to_string));
        writeln!(
            output,
            "{};{}",
            key_columns.join(";"),
            schema::terse_header()
        )?;
        output.flush()?;

        let mut summary = RunSummary::default();
        for replicate in spec.replicates.clone() {
            info!("Starting replicate {replicate}");
            let mut jobs = self.build_jobs(spec, templates, &replicate, &mut summary);
            if self.config.shuffle {
                jobs.shuffle(&mut rand::thread_rng());
            }

            let total = jobs.len();
            for (num, mut job) in jobs.into_iter().enumerate() {
                info!("Starting job {} of {}", num + 1, total);
                if !self.config.cooldown.is_zero() {
                    info!("cooldown");
                    thread::sleep(self.config.cooldown);
                }
                self.run_job(&mut job, output)?;
                match job.outcome {
                    Outcome::Success => summary.completed += 1,
                    _ => summary.failed += 1,
                }
            }
            info!("Finished replicate {replicate}");
        }

        info!(
            "Jobs: {} completed, {} failed",
            summary.completed, summary.failed
        );
        if summary.skipped > 0 {
            warn!("{} jobs were skipped with template errors", summary.skipped);
        }
        Ok(summary)
    }

    /// Renders one job per (template, combination) pair. A template error
    /// fails that job's construction and is never attempted.
    fn build_jobs(
        &mut self,
        spec: &SweepSpec,
        templates: &[String],
        replicate: &ParamValue,
        summary: &mut RunSummary,
    ) -> Vec<Job> {
        let mut jobs = Vec::new();
        for tmpl in templates {
            for params in spec.param_sets(replicate) {
                match template::render(tmpl, &params) {
                    Ok(script) => jobs.push(Job::new(self.ids.next_id(), script, params)),
                    Err(e) => {
                        error!("Cannot construct job for {}: {}", params.serialized(), e);
                        summary.skipped += 1;
                    }
                }
            }
        }
        debug!("Number of jobs: {}", jobs.len());
        jobs
    }

    fn run_job(&self, job: &mut Job, output: &mut dyn Write) -> Result<()> {
        self.run_pre_hook(job);
        self.invalidate_caches(job);

        debug!("Fio input:\n{}", job.script);
        info!("start|batchid={}|{}", job.id, job.params.serialized());

        let spec = CmdSpec {
            argv: vec![
                self.config.fio_cmd.clone(),
                "--output-format=terse".to_string(),
                "-".to_string(),
            ],
            stdin: Some(job.script.clone()),
            timeout: self.config.timeout,
            envs: Vec::new(),
        };

        let result = match self.runner.run(&spec) {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to run {}: {}", self.config.fio_cmd, e);
                job.outcome = Outcome::Failure;
                return Ok(());
            }
        };

        match result.status {
            RunStatus::TimedOut => {
                error!("Timeout waiting for {}", job.params.serialized());
                job.outcome = Outcome::Timeout;
            }
            RunStatus::Exited(0) => {
                info!("stop|batchid={}|{}", job.id, job.params.serialized());
                let prefix = job
                    .params
                    .values()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(";");
                for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    writeln!(output, "{prefix};{line}")?;
                }
                output.flush()?;
                job.outcome = Outcome::Success;
            }
            RunStatus::Exited(code) => {
                let mut text = format!("Job return code is {code}");
                if !result.stdout.trim().is_empty() {
                    text.push('\n');
                    text.push_str(&result.stdout);
                }
                if !result.stderr.trim().is_empty() {
                    text.push('\n');
                    text.push_str(&result.stderr);
                }
                error!("{text}");
                job.outcome = Outcome::Failure;
            }
        }
        Ok(())
    }

    /// Warn-only hook: its failure never blocks the job.
    fn run_pre_hook(&self, job: &Job) {
        let Some(hook) = &self.config.pre_hook else {
            return;
        };
        let mut envs: Vec<(String, String)> = job
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        envs.push(("BATCHID".to_string(), job.id.to_string()));

        let spec = CmdSpec {
            argv: vec!["sh".to_string(), "-c".to_string(), hook.clone()],
            stdin: None,
            timeout: None,
            envs,
        };
        match self.runner.run(&spec) {
            Ok(out) => match out.status {
                RunStatus::Exited(0) => debug!("Pre-hook succeeded"),
                RunStatus::Exited(code) => warn!("Pre-hook exited with status {code}"),
                RunStatus::TimedOut => warn!("Pre-hook timed out"),
            },
            Err(e) => warn!("Cannot run pre-hook: {e}"),
        }
    }

    fn invalidate_caches(&self, job: &Job) {
        if self.config.drop_caches {
            self.run_helper(CmdSpec::new(["sync"]), "sync");
            self.run_helper(
                CmdSpec::new(["sh", "-c", "echo 3 > /proc/sys/vm/drop_caches"]),
                "drop_caches",
            );
        }
        if self.config.trim {
            self.trim_target_filesystem(job);
        }
    }

    /// Trims the filesystem holding the job's target file. Degrades to a
    /// warning when the script names no file or the mount cannot be resolved.
    fn trim_target_filesystem(&self, job: &Job) {
        let Some(filename) = extract_filename(&job.script) else {
            warn!("No filename= line in script, skipping trim");
            return;
        };
        let Some(mount) = self.resolve_mount_point(filename) else {
            warn!("Cannot resolve mount point of {filename}, skipping trim");
            return;
        };
        self.run_helper(CmdSpec::new(["fstrim", mount.as_str()]), "fstrim");
    }

    fn resolve_mount_point(&self, path: &str) -> Option<String> {
        let spec = CmdSpec::new(["findmnt", "--noheadings", "--output", "TARGET", "--target", path]);
        match self.runner.run(&spec) {
            Ok(out) if out.status == RunStatus::Exited(0) => {
                let mount = out.stdout.trim();
                if mount.is_empty() {
                    None
                } else {
                    Some(mount.to_string())
                }
            }
            _ => None,
        }
    }

    fn run_helper(&self, spec: CmdSpec, what: &str) {
        match self.runner.run(&spec) {
            Ok(out) if out.status == RunStatus::Exited(0) => {}
            Ok(out) => warn!("{what} failed with {:?}", out.status),
            Err(e) => warn!("Cannot run {what}: {e}"),
        }
    }
}

/// Pattern match for the target file of the rendered script.
pub fn extract_filename(script: &str) -> Option<&str> {
    script
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("filename="))
        .map(str::trim)
        .filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted runner: hands out canned outputs and records every call.
    struct MockRunner {
        responses: RefCell<VecDeque<io::Result<CmdOutput>>>,
        calls: RefCell<Vec<CmdSpec>>,
    }

    impl MockRunner {
        fn new(responses: Vec<io::Result<CmdOutput>>) -> Self {
            MockRunner {
                responses: RefCell::new(responses.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn exited(code: i32, stdout: &str) -> io::Result<CmdOutput> {
            Ok(CmdOutput {
                status: RunStatus::Exited(code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            })
        }

        fn timed_out() -> io::Result<CmdOutput> {
            Ok(CmdOutput {
                status: RunStatus::TimedOut,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, spec: &CmdSpec) -> io::Result<CmdOutput> {
            self.calls.borrow_mut().push(spec.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| MockRunner::exited(0, ""))
        }
    }

    fn sweep(json: &str) -> SweepSpec {
        SweepSpec::from_json(&serde_json::from_str(json).unwrap()).unwrap()
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            cooldown: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn successful_jobs_write_prefixed_rows() {
        let spec = sweep(r#"{"fio": {"bs": ["4k", "8k"]}, "replicates": 2}"#);
        let runner = MockRunner::new(vec![
            MockRunner::exited(0, "3;fio-3.28;j1\n"),
            MockRunner::exited(0, "3;fio-3.28;j1\n"),
            MockRunner::exited(0, "3;fio-3.28;j1\n"),
            MockRunner::exited(0, "3;fio-3.28;j1\n"),
        ]);
        let mut engine = Engine::new(&runner, quick_config(), IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["bs=$bs\n".to_string()], &mut out)
            .unwrap();

        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 0);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("replicate;bs;terse_version_3;"));
        assert_eq!(lines[1], "1;4k;3;fio-3.28;j1");
        assert_eq!(lines[2], "1;8k;3;fio-3.28;j1");
        assert_eq!(lines[3], "2;4k;3;fio-3.28;j1");
        assert_eq!(lines[4], "2;8k;3;fio-3.28;j1");
    }

    #[test]
    fn timeout_writes_no_rows_and_counts_as_failure() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![MockRunner::timed_out()]);
        let mut engine = Engine::new(&runner, quick_config(), IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["bs=$bs\n".to_string()], &mut out)
            .unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 1);
        // Header only, no data rows
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn nonzero_exit_counts_as_failure() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![MockRunner::exited(1, "")]);
        let mut engine = Engine::new(&runner, quick_config(), IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["bs=$bs\n".to_string()], &mut out)
            .unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn template_error_skips_job_construction() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![]);
        let mut engine = Engine::new(&runner, quick_config(), IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["size=$missing\n".to_string()], &mut out)
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed + summary.failed, 0);
        // The tool was never invoked
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn pre_hook_failure_does_not_block_the_job() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![
            MockRunner::exited(1, ""),              // pre-hook fails
            MockRunner::exited(0, "3;fio-3.28;j1"), // fio still runs
        ]);
        let config = EngineConfig {
            pre_hook: Some("exit 1".to_string()),
            ..quick_config()
        };
        let mut engine = Engine::new(&runner, config, IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["bs=$bs\n".to_string()], &mut out)
            .unwrap();

        assert_eq!(summary.completed, 1);
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].argv[0], "sh");
        // Parameters travel to the hook as environment variables
        assert!(calls[0]
            .envs
            .iter()
            .any(|(k, v)| k == "bs" && v == "4k"));
        assert!(calls[0].envs.iter().any(|(k, _)| k == "BATCHID"));
    }

    #[test]
    fn trim_resolves_mount_of_the_target_file() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![
            MockRunner::exited(0, ""),          // sync
            MockRunner::exited(0, ""),          // drop_caches
            MockRunner::exited(0, "/mnt/ssd\n"), // findmnt
            MockRunner::exited(0, ""),          // fstrim
            MockRunner::exited(0, "3;fio-3.28;j1"),
        ]);
        let config = EngineConfig {
            drop_caches: true,
            trim: true,
            ..quick_config()
        };
        let mut engine = Engine::new(&runner, config, IdSequence::starting_at(1));
        let mut out = Vec::new();
        engine
            .run_sweep(
                &spec,
                &["filename=/mnt/ssd/test.bin\nbs=$bs\n".to_string()],
                &mut out,
            )
            .unwrap();

        let calls = runner.calls.borrow();
        let argvs: Vec<&str> = calls.iter().map(|c| c.argv[0].as_str()).collect();
        assert_eq!(argvs, vec!["sync", "sh", "findmnt", "fstrim", "fio"]);
        assert_eq!(calls[3].argv[1], "/mnt/ssd");
    }

    #[test]
    fn missing_filename_skips_trim_but_runs_the_job() {
        let spec = sweep(r#"{"fio": {"bs": ["4k"]}, "replicates": 1}"#);
        let runner = MockRunner::new(vec![MockRunner::exited(0, "3;fio-3.28;j1")]);
        let config = EngineConfig {
            trim: true,
            ..quick_config()
        };
        let mut engine = Engine::new(&runner, config, IdSequence::starting_at(1));
        let mut out = Vec::new();
        let summary = engine
            .run_sweep(&spec, &["bs=$bs\n".to_string()], &mut out)
            .unwrap();

        assert_eq!(summary.completed, 1);
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].argv[0], "fio");
    }

    #[test]
    fn correlation_ids_are_unique_across_the_run() {
        let spec = sweep(r#"{"fio": {"bs": ["4k", "8k"]}, "replicates": 3}"#);
        let mut seen = std::collections::HashSet::new();
        let mut summary = RunSummary::default();
        let runner = MockRunner::new(vec![]);
        let mut engine = Engine::new(&runner, quick_config(), IdSequence::starting_at(100));
        for replicate in spec.replicates.clone() {
            for job in engine.build_jobs(&spec, &["bs=$bs".to_string()], &replicate, &mut summary)
            {
                assert!(seen.insert(job.id));
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn extract_filename_finds_the_first_target() {
        let script = "[global]\nbs=4k\nfilename=/dev/nvme0n1\n[job]\nrw=read\n";
        assert_eq!(extract_filename(script), Some("/dev/nvme0n1"));
        assert_eq!(extract_filename("[job]\nrw=read\n"), None);
    }
}
