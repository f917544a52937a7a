//! Neurolog - biosignal acquisition service
//!
//! Entry point: acquisition pipeline, status/control server and optional
//! intent forwarding.

use anyhow::Result;
use neurolog::config::AppConfig;
use neurolog::inference::classifier::{Classifier, LogVarianceModel};
use neurolog::inference::intent::IntentForwarder;
use neurolog::server::naming::RecordingLayout;
use neurolog::server::patients::{JsonPatientStore, PatientDirectory};
use neurolog::server::{AppState, ServerConfig};
use neurolog::{open_source, Pipeline, PipelineConfig, PipelineHandle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// Command line overrides applied on top of the config file
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    udp: Option<String>,
    simulate: bool,
    model: Option<PathBuf>,
    recordings: Option<PathBuf>,
}

enum Command {
    Run(CliArgs),
    Exit,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Command::Run(cli) => cli,
        Command::Exit => return Ok(()),
    };

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    apply_overrides(&mut config, &cli);

    let _log_guard = init_logging(&config)?;

    println!("Neurolog v{} - biosignal acquisition", neurolog::VERSION);
    println!();

    let source = open_source(&config.source_config());
    let pipeline = Pipeline::start(
        source,
        PipelineConfig {
            inference: config.inference.clone(),
            ..Default::default()
        },
    );

    if let Some(model_path) = &config.model_path {
        load_model(&pipeline, model_path, config.channel_count);
    } else {
        info!("No classifier model configured, inference inactive");
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let r = Arc::clone(&running);
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })
        .ok();
    }

    let forwarder = config
        .intent_forward_addr
        .as_deref()
        .and_then(|addr| spawn_intent_forwarder(&pipeline, addr, Arc::clone(&running)));

    let patients: Arc<dyn PatientDirectory> = match JsonPatientStore::load(&config.patients_file)
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Patient file unusable, starting with an empty directory");
            Arc::new(JsonPatientStore::default())
        }
    };

    let server_config = ServerConfig {
        port: config.server_port,
        bind_addr: config.bind_addr.clone(),
        ..Default::default()
    };
    let state = AppState::new(
        pipeline.clone(),
        patients,
        RecordingLayout::new(config.recordings_dir.clone()),
        server_config,
    );

    println!(
        "Status server on http://{}:{}/api/v1/status",
        config.bind_addr, config.server_port
    );
    println!("Press Ctrl+C to stop.");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(async {
        tokio::select! {
            result = neurolog::server::start_server(state) => result,
            _ = wait_for_shutdown(&running) => Ok(()),
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(1));

    running.store(false, Ordering::SeqCst);
    info!("Shutting down");
    pipeline.stop();
    if let Some(handle) = forwarder {
        let _ = handle.join();
    }

    if let Err(e) = &served {
        error!("Server error: {}", e);
    }
    served
}

fn parse_args(args: &[String]) -> Command {
    let mut cli = CliArgs::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("neurolog {}", neurolog::VERSION);
                return Command::Exit;
            }
            "--help" | "-h" => {
                print_help();
                return Command::Exit;
            }
            "--simulate" | "-s" => {
                cli.simulate = true;
                i += 1;
                continue;
            }
            flag @ ("--config" | "--model" | "--recordings" | "--udp" | "--port" | "-p") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", flag);
                    return Command::Exit;
                };
                match flag {
                    "--config" => cli.config = Some(PathBuf::from(value)),
                    "--model" => cli.model = Some(PathBuf::from(value)),
                    "--recordings" => cli.recordings = Some(PathBuf::from(value)),
                    "--udp" => cli.udp = Some(value.clone()),
                    _ => match value.parse() {
                        Ok(port) => cli.port = Some(port),
                        Err(_) => {
                            eprintln!("Error: Invalid port: {}", value);
                            return Command::Exit;
                        }
                    },
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Command::Exit;
            }
        }
    }

    Command::Run(cli)
}

fn print_help() {
    println!("Usage: neurolog [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port PORT         Status server port (default: 8920)");
    println!("      --udp HOST:PORT     UDP endpoint of the sample stream (default: 127.0.0.1:12345)");
    println!("  -s, --simulate          Use the synthetic generator instead of the network");
    println!("      --model PATH        Classifier model (JSON); enables inference");
    println!("      --recordings DIR    Base directory for recordings");
    println!("      --config PATH       Config file (default: <data_dir>/neurolog/config.json)");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
}

fn apply_overrides(config: &mut AppConfig, cli: &CliArgs) {
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(udp) = &cli.udp {
        config.udp_addr = udp.clone();
    }
    if cli.simulate {
        config.simulate = true;
    }
    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }
    if let Some(dir) = &cli.recordings {
        config.recordings_dir = dir.clone();
    }
}

/// Console output plus an optional daily rolling file
fn init_logging(
    config: &AppConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("neurolog=info".parse()?);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "neurolog.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Install the classifier and enable inference; any failure leaves it off
fn load_model(pipeline: &PipelineHandle, path: &std::path::Path, channel_count: usize) {
    let model = match LogVarianceModel::load(path) {
        Ok(model) => model,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Classifier model unavailable, inference inactive");
            return;
        }
    };
    if model.channel_count() != channel_count {
        warn!(
            model_channels = model.channel_count(),
            stream_channels = channel_count,
            "Classifier model does not match the stream, inference inactive"
        );
        return;
    }
    pipeline.set_classifier(Some(Box::new(model)));
    let active = pipeline.set_inference_active(true);
    info!(path = %path.display(), active, "Classifier model loaded");
}

fn spawn_intent_forwarder(
    pipeline: &PipelineHandle,
    addr: &str,
    running: Arc<AtomicBool>,
) -> Option<std::thread::JoinHandle<()>> {
    let mut forwarder = match IntentForwarder::new(addr) {
        Ok(f) => f,
        Err(e) => {
            warn!(addr, error = %e, "Intent forwarding disabled");
            return None;
        }
    };
    let intents = pipeline.subscribe_intents();
    let triggers = pipeline.subscribe_triggers();
    info!(addr = %forwarder.target(), "Forwarding intent commands and marker triggers");

    let handle = std::thread::Builder::new()
        .name("intent-forward".into())
        .spawn(move || {
            let mut connected = true;
            while connected && running.load(Ordering::SeqCst) {
                crossbeam_channel::select! {
                    recv(intents) -> msg => match msg {
                        Ok(command) => {
                            if let Err(e) = forwarder.forward(&command) {
                                warn!(error = %e, "Failed to forward intent");
                            }
                        }
                        Err(_) => connected = false,
                    },
                    recv(triggers) -> msg => match msg {
                        Ok(trigger) => {
                            if let Err(e) = forwarder.send_trigger(trigger) {
                                warn!(error = %e, %trigger, "Failed to forward marker trigger");
                            }
                        }
                        Err(_) => connected = false,
                    },
                    default(Duration::from_millis(200)) => {}
                }
            }
        })
        .expect("Failed to spawn intent forwarder thread");
    Some(handle)
}

async fn wait_for_shutdown(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
