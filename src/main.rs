use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};

use renderwatch_client::{HttpTransport, JobSession, SessionRegistry};
use renderwatch_core::config::{Endpoints, StreamConfig};
use renderwatch_core::envelope::ProgressEvent;
use renderwatch_core::ids::JobId;
use renderwatch_telemetry::{init_telemetry, TelemetryConfig};

/// Follow a render job's progress from the terminal.
#[derive(Parser, Debug)]
#[command(name = "renderwatch", version)]
struct Args {
    /// Render job id to follow
    job_id: String,

    /// Backend base URL
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    base_url: String,

    /// Reconnect attempts before falling back to polling
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Give up on the job entirely after this many seconds
    #[arg(long, default_value_t = 600)]
    overall_timeout_secs: u64,

    /// Fallback poll interval in seconds
    #[arg(long, default_value_t = 2)]
    poll_interval_secs: u64,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig {
        log_level: if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        },
        module_levels: Vec::new(),
        json: args.json,
    });

    let config = StreamConfig {
        max_retries: args.max_retries,
        overall_job_timeout: Duration::from_secs(args.overall_timeout_secs),
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        ..Default::default()
    };

    let transport = Arc::new(HttpTransport::new().expect("failed to build HTTP client"));
    let endpoints = Endpoints::new(args.base_url.as_str());
    let job_id = JobId::from_raw(args.job_id);

    info!(job_id = %job_id, base_url = endpoints.base_url(), "following render job");

    let session = JobSession::spawn(job_id, endpoints, config, transport);
    let failed = Arc::new(AtomicBool::new(false));

    session.on("job-status", |env| {
        if let ProgressEvent::JobStatus(status) = &env.event {
            info!(
                status = ?status.status,
                stage = status.stage.as_deref().unwrap_or("-"),
                percent = status.percent.unwrap_or(0.0),
                "job status"
            );
        }
    });
    session.on("step-progress", |env| {
        if let ProgressEvent::StepProgress(step) = &env.event {
            info!(
                step = %step.step,
                percent = step.progress_pct,
                message = step.message.as_deref().unwrap_or(""),
                "progress"
            );
        }
    });
    session.on("progress-message", |env| {
        if let ProgressEvent::ProgressMessage(msg) = &env.event {
            info!(message = %msg.message, "update");
        }
    });
    session.on("warning", |env| {
        if let ProgressEvent::Warning(notice) = &env.event {
            warn!(
                message = %notice.message,
                code = notice.code.as_deref().unwrap_or(""),
                "server warning"
            );
        }
    });
    session.on("job-completed", |env| {
        if let ProgressEvent::JobCompleted(done) = &env.event {
            info!(
                output = done.output_path.as_deref().unwrap_or(""),
                "render completed"
            );
        }
    });
    {
        let failed = Arc::clone(&failed);
        session.on("job-failed", move |env| {
            failed.store(true, Ordering::SeqCst);
            if let ProgressEvent::JobFailed(fail) = &env.event {
                warn!(
                    error = fail.error_message.as_deref().unwrap_or("unknown error"),
                    "render failed"
                );
            }
        });
    }
    {
        let failed = Arc::clone(&failed);
        session.on("job-cancelled", move |_| {
            failed.store(true, Ordering::SeqCst);
            warn!("render cancelled");
        });
    }
    session.on_status_change(|snap| {
        info!(
            connection = snap.status.as_str(),
            attempt = snap.reconnect_attempt,
            "connection state"
        );
    });

    let registry = Arc::new(SessionRegistry::new());
    registry
        .register(Arc::clone(&session))
        .expect("registry refused a fresh session");

    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                registry.shutdown();
            }
        });
    }

    session.wait().await;

    if failed.load(Ordering::SeqCst) {
        std::process::exit(1);
    }
}
