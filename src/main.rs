use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thermo_station::actions::{ActionSpec, Actions};
use thermo_station::button::{self, ButtonEvent, ButtonLoopConfig, Indicator};
use thermo_station::config::{self, Config, MAIL_TASK};
use thermo_station::gpio::{DigitalIo, Direction, SysfsGpio};
use thermo_station::http::{self, HttpState};
use thermo_station::mail::{AllowList, MailPipeline, SpoolSource};
use thermo_station::model::JobSource;
use thermo_station::printer::{LogPrinter, PrinterDevice, SerialPrinter};
use thermo_station::scheduler::{ScheduledTask, Scheduler};
use thermo_station::serializer::PrintSerializer;
use thermo_station::startup;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print a sample configuration and exit
    #[arg(long)]
    example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.example_config {
        print!("{}", config::example());
        return Ok(());
    }
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;

    let cancel = CancellationToken::new();
    let indicator = Arc::new(Indicator::new());

    let (printer, printer_worker) = PrintSerializer::start(open_printer(&cfg).await, cancel.clone()).await;

    startup::run(&cfg.startup.options(), &printer, &indicator).await?;

    let mail = cfg.mail.enabled.then(|| {
        let source = Arc::new(SpoolSource::new(&cfg.mail.spool_dir));
        Arc::new(
            MailPipeline::new(
                source,
                AllowList::new(&cfg.mail.allowed_senders),
                AllowList::new(&cfg.mail.allowed_recipients),
            )
            .with_printable_exts(&cfg.mail.printable_exts)
            .with_delete_processed(cfg.mail.delete_processed),
        )
    });
    let actions = Arc::new(Actions::new(printer.clone(), mail.clone(), indicator.clone()));

    let mut tasks = JoinSet::new();

    let mut scheduler = Scheduler::new();
    for task in &cfg.schedule.tasks {
        let body = actions.task_body(&task.name, task.actions.clone());
        scheduler.register(ScheduledTask::new(task.name.clone(), task.kind()?, body).with_catch_up(task.catch_up));
    }
    if mail.is_some() {
        let every = Duration::from_secs(cfg.mail.check_every_secs);
        let body = actions.task_body(MAIL_TASK, vec![ActionSpec::CheckMail]);
        scheduler.register(ScheduledTask::interval(MAIL_TASK, every, body));
    }
    tasks.spawn(scheduler.run(Duration::from_millis(cfg.schedule.tick_ms), cancel.clone()));

    if cfg.button.enabled {
        let io = open_gpio(&cfg);
        let loop_cfg = ButtonLoopConfig {
            button_pin: cfg.button.pin,
            led_pin: cfg.button.led_pin,
            poll_interval: cfg.button.poll_interval(),
            tap_debounce: cfg.button.tap_debounce(),
            hold: cfg.button.hold_time(),
            active_low: cfg.button.active_low,
        };
        let tap = Arc::new(cfg.button.tap.clone());
        let hold = Arc::new(cfg.button.hold.clone());
        let actions = actions.clone();
        let on_event = move |event| match event {
            ButtonEvent::Tap => actions.spawn("tap".into(), tap.clone(), JobSource::Button),
            ButtonEvent::HoldStart => actions.spawn("hold".into(), hold.clone(), JobSource::Button),
        };
        tasks.spawn(button::run_button_loop(io, loop_cfg, indicator.clone(), on_event, cancel.clone()));
    }

    if cfg.http.enabled {
        let listener = TcpListener::bind(&cfg.http.bind)
            .await
            .with_context(|| format!("binding {}", cfg.http.bind))?;
        let state = HttpState::new(cfg.http.secret.clone(), printer.clone());
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(err) = http::serve(listener, state, cancel).await {
                error!(?err, "http server failed");
            }
        });
    }

    info!("thermo-station running");
    shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            error!(?err, "task ended abnormally");
        }
    }
    if let Some(worker) = printer_worker {
        if let Err(err) = worker.await {
            error!(?err, "print serializer ended abnormally");
        }
    }
    Ok(())
}

async fn open_printer(cfg: &Config) -> Option<Box<dyn PrinterDevice>> {
    if !cfg.printer.enabled {
        info!("printer disabled; jobs go to the log");
        return Some(Box::new(LogPrinter::new()));
    }
    match SerialPrinter::open(&cfg.printer.device, cfg.printer.baud).await {
        Ok(p) => Some(Box::new(p)),
        Err(err) => {
            warn!(?err, device = %cfg.printer.device.display(), "cannot open printer");
            None
        }
    }
}

fn open_gpio(cfg: &Config) -> Arc<dyn DigitalIo> {
    let gpio = SysfsGpio::with_root(&cfg.button.gpio_root);
    if let Err(err) = gpio.setup(cfg.button.pin, Direction::In) {
        warn!(?err, pin = cfg.button.pin, "button pin setup failed");
    }
    if let Some(led) = cfg.button.led_pin {
        if let Err(err) = gpio.setup(led, Direction::Out) {
            warn!(?err, pin = led, "led pin setup failed");
        }
    }
    Arc::new(gpio)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(?err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
