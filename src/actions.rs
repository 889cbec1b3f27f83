//! What a tap, a hold, a scheduled slot or a mail check actually does.
//!
//! Actions are described in config as [`ActionSpec`] lists and executed by
//! [`Actions`]. While any action runs, the indicator LED is held on.

use crate::button::Indicator;
use crate::mail::MailPipeline;
use crate::model::{JobSource, PrintJob};
use crate::raster;
use crate::scheduler::TaskFuture;
use crate::serializer::PrintHandle;
use anyhow::{bail, Context, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Print a line of text.
    Text { text: String },
    /// Rasterize a local image file and print it.
    Image { path: PathBuf },
    /// Run a program and print its stdout.
    ///
    /// With `carry_state`, the last stdout line is kept as a state token,
    /// passed back as the final argument on the next run and not printed.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        carry_state: bool,
    },
    /// Run one mail cycle and print what it produced.
    CheckMail,
    /// Print an optional farewell image, drain the printer queue, power off.
    Shutdown {
        #[serde(default)]
        image: Option<PathBuf>,
        /// Program and arguments; defaults to `sync` then `shutdown -h now`.
        #[serde(default)]
        command: Option<Vec<String>>,
    },
}

impl ActionSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ActionSpec::Text { .. } => "text",
            ActionSpec::Image { .. } => "image",
            ActionSpec::Command { .. } => "command",
            ActionSpec::CheckMail => "check_mail",
            ActionSpec::Shutdown { .. } => "shutdown",
        }
    }
}

fn default_power_off() -> Vec<Vec<String>> {
    vec![
        vec!["sync".to_string()],
        vec!["shutdown".to_string(), "-h".to_string(), "now".to_string()],
    ]
}

/// Split script output into printable text and the trailing state token.
fn split_state(stdout: &str) -> (&str, Option<&str>) {
    let trimmed = stdout.trim_end();
    match trimmed.rsplit_once('\n') {
        Some((text, token)) => (text, Some(token.trim()).filter(|t| !t.is_empty())),
        None => ("", Some(trimmed.trim()).filter(|t| !t.is_empty())),
    }
}

pub struct Actions {
    printer: PrintHandle,
    mail: Option<Arc<MailPipeline>>,
    indicator: Arc<Indicator>,
    /// Carry-state tokens keyed by action label.
    state: Mutex<HashMap<String, String>>,
}

impl Actions {
    pub fn new(
        printer: PrintHandle,
        mail: Option<Arc<MailPipeline>>,
        indicator: Arc<Indicator>,
    ) -> Self {
        Self {
            printer,
            mail,
            indicator,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn printer(&self) -> &PrintHandle {
        &self.printer
    }

    /// Last state token stored for `label`.
    pub fn state_token(&self, label: &str) -> Option<String> {
        self.state.lock().ok()?.get(label).cloned()
    }

    /// Run `specs` in order, stopping at the first failure.
    #[instrument(skip_all, fields(label = %label, source = %source))]
    pub async fn run_all(&self, label: &str, specs: &[ActionSpec], source: JobSource) -> Result<()> {
        let _busy = self.indicator.busy();
        for (i, spec) in specs.iter().enumerate() {
            let key = format!("{label}#{i}");
            self.run(&key, spec, source.clone())
                .await
                .with_context(|| format!("{label}: {} action failed", spec.name()))?;
        }
        Ok(())
    }

    async fn run(&self, key: &str, spec: &ActionSpec, source: JobSource) -> Result<()> {
        debug!(action = spec.name(), "running action");
        match spec {
            ActionSpec::Text { text } => {
                self.printer.submit_or_log(PrintJob::text(source, text)).await;
            }
            ActionSpec::Image { path } => {
                let image = raster::from_path(path)
                    .await
                    .with_context(|| format!("cannot print {}", path.display()))?;
                self.printer.submit_or_log(PrintJob::image(source, image)).await;
            }
            ActionSpec::Command {
                program,
                args,
                carry_state,
            } => self.run_command(key, program, args, *carry_state, source).await?,
            ActionSpec::CheckMail => self.check_mail().await?,
            ActionSpec::Shutdown { image, command } => {
                self.shutdown(image.as_ref(), command.as_ref(), source).await?
            }
        }
        Ok(())
    }

    async fn run_command(
        &self,
        key: &str,
        program: &str,
        args: &[String],
        carry_state: bool,
        source: JobSource,
    ) -> Result<()> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if carry_state {
            if let Some(token) = self.state_token(key) {
                cmd.arg(token);
            }
        }
        let output = cmd
            .output()
            .await
            .with_context(|| format!("cannot run {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{program} exited with {}: {}", output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if carry_state {
            let (text, token) = split_state(&stdout);
            if let (Some(token), Ok(mut state)) = (token, self.state.lock()) {
                state.insert(key.to_string(), token.to_string());
            }
            text
        } else {
            &*stdout
        };
        if !text.trim().is_empty() {
            self.printer.submit_or_log(PrintJob::text(source, text)).await;
        }
        Ok(())
    }

    async fn check_mail(&self) -> Result<()> {
        let Some(mail) = &self.mail else {
            warn!("check_mail requested but mail is not configured");
            return Ok(());
        };
        let jobs = mail.check_mail().await?;
        info!(count = jobs.len(), "mail cycle finished");
        for job in jobs {
            self.printer.submit_or_log(job).await;
        }
        Ok(())
    }

    async fn shutdown(
        &self,
        image: Option<&PathBuf>,
        command: Option<&Vec<String>>,
        source: JobSource,
    ) -> Result<()> {
        if let Some(path) = image {
            match raster::from_path(path).await {
                Ok(img) => {
                    self.printer.submit_or_log(PrintJob::image(source, img)).await;
                }
                Err(err) => warn!(?err, path = %path.display(), "farewell image skipped"),
            }
        }
        // nothing may still be printing when power goes
        if let Err(err) = self.printer.flush().await {
            debug!(?err, "printer flush skipped");
        }

        let commands = match command {
            Some(cmd) if !cmd.is_empty() => vec![cmd.clone()],
            _ => default_power_off(),
        };
        for argv in commands {
            info!(command = %argv.join(" "), "running power-off command");
            let status = Command::new(&argv[0])
                .args(&argv[1..])
                .status()
                .await
                .with_context(|| format!("cannot run {}", argv[0]))?;
            if !status.success() {
                bail!("{} exited with {status}", argv[0]);
            }
        }
        Ok(())
    }

    /// Run `specs` in the background; failures are logged.
    pub fn spawn(self: &Arc<Self>, label: String, specs: Arc<Vec<ActionSpec>>, source: JobSource) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.run_all(&label, &specs, source).await {
                error!(?err, "action failed");
            }
        });
    }

    /// Scheduler task body running `specs` under the task's name.
    pub fn task_body(
        self: &Arc<Self>,
        name: &str,
        specs: Vec<ActionSpec>,
    ) -> impl Fn() -> TaskFuture + Send + Sync + 'static {
        let this = Arc::clone(self);
        let name = name.to_string();
        let specs = Arc::new(specs);
        move || {
            let this = Arc::clone(&this);
            let name = name.clone();
            let specs = Arc::clone(&specs);
            async move {
                let source = JobSource::Scheduler(name.clone());
                this.run_all(&name, &specs, source).await
            }
            .boxed()
        }
    }
}
