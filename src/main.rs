use anyhow::{anyhow, bail, Context};
use gcp_tasks::config::AppConfig;
use gcp_tasks::logic::{parse_list_input, OperationPoller, PatchStyle, ResourceUpdater, UpdateError};
use gcp_tasks::model::Operation;
use gcp_tasks::transport::HttpTransport;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "usage:
  gcp-task apply <resource-path> <desired> [--mask-in-body <resource-key>] [--no-wait]
  gcp-task wait <operation-name>

<desired> is @file.json, inline JSON or a parameters grid (-key value ...)";

enum Command {
    Apply {
        resource_path: String,
        desired: String,
        style: PatchStyle,
    },
    Wait {
        operation_name: String,
    },
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    match args.first().map(String::as_str) {
        Some("apply") => {
            let resource_path = args.get(1).ok_or_else(|| anyhow!(USAGE))?.clone();
            let desired = args.get(2).ok_or_else(|| anyhow!(USAGE))?.clone();

            // Mask-in-body APIs answer PATCH with the resource itself
            let mut style = PatchStyle::default();
            let mut rest = args[3..].iter();
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "--mask-in-body" => {
                        let key = rest.next().ok_or_else(|| anyhow!(USAGE))?;
                        style = PatchStyle::mask_in_body(key.clone());
                    }
                    "--no-wait" => style = style.with_long_running(false),
                    other => bail!("unknown option {}\n{}", other, USAGE),
                }
            }

            Ok(Command::Apply {
                resource_path,
                desired,
                style,
            })
        }
        Some("wait") => Ok(Command::Wait {
            operation_name: args.get(1).ok_or_else(|| anyhow!(USAGE))?.clone(),
        }),
        _ => bail!(USAGE),
    }
}

/// Read the desired state from a file, inline JSON or a parameters grid
fn load_desired(input: &str) -> anyhow::Result<Value> {
    if let Some(path) = input.strip_prefix('@') {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read desired state from {}", path))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path));
    }

    let fields = parse_list_input(input).context("Invalid desired state")?;
    Ok(Value::Object(fields))
}

/// Cancel polling on Ctrl-C or when the task timeout elapses
fn spawn_cancel_triggers(cancel: &CancellationToken, config: &AppConfig) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = config.task_timeout() {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            log::warn!("Task timed out after {} seconds, cancelling", timeout.as_secs());
            on_timeout.cancel();
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::{Builder, Env};
    use log::LevelFilter;

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = AppConfig::load()?;
    log::info!("Configuration loaded: api={}", config.api.base_url);

    let transport = HttpTransport::from_config(&config.api)?;
    let poller = OperationPoller::new(config.poll.to_poll_config());
    let updater = ResourceUpdater::new(&transport, &poller);

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, &config);

    let result = match command {
        Command::Apply {
            resource_path,
            desired,
            style,
        } => {
            let desired = load_desired(&desired)?;
            updater
                .apply(&resource_path, desired, &style, &cancel)
                .await
                .map(|result| {
                    if !result.was_changed() {
                        println!("Nothing was changed in {}.", resource_path);
                    }
                    result.into_resource()
                })
        }
        Command::Wait { operation_name } => {
            updater.wait(Operation::pending(operation_name), &cancel).await
        }
    };

    match result {
        Ok(resource) => {
            println!("{}", serde_json::to_string_pretty(&resource)?);
            Ok(())
        }
        Err(e) if e.is_cancelled() => Err(anyhow!("Task cancelled before the operation finished")),
        Err(UpdateError::Poll(e)) => Err(anyhow!(e).context("Operation did not complete")),
        Err(e) => Err(e.into()),
    }
}
