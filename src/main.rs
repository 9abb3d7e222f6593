use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use podsession::utils::{format_millis, IntoSessionError};
use podsession::{
    Config, Episode, EpisodeId, EpisodeStore, Intent, JsonFileEpisodeStore, SessionController,
    SimulatedEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// podsession - drive a podcast playback session from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file to use instead of the system and user files
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Episode store location
    #[arg(short, long, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Position poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Write the effective configuration to the user config file and exit
    #[arg(long)]
    save_config: bool,
}

const HELP: &str = "\
commands:
  add <url> <duration_ms> <title...>   register an episode
  play <url> | prepare <url>           load an episode
  pause | resume                       transport
  seek <ms> | back | fwd               move within the episode
  state [<url>] | list                 inspect
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(poll_ms) = args.poll_ms {
        config.session.poll_interval_ms = poll_ms;
        config.session.persist_interval_ms = config.session.persist_interval_ms.max(poll_ms);
    }
    if let Some(path) = args.store.clone() {
        config.store.path = Some(path);
    }
    config.validate()?;

    let log_level = if args.debug {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting podsession v{}", env!("CARGO_PKG_VERSION"));

    if args.save_config {
        config.save()?;
        info!("Configuration saved");
        return Ok(());
    }

    let store_path = config
        .store
        .resolved_path()
        .context("Cannot determine episode store location")?;
    info!("Episode store: {:?}", store_path);
    let store = Arc::new(JsonFileEpisodeStore::open(store_path));

    let engine = Arc::new(SimulatedEngine::new());
    for episode in store.list().await? {
        if let Some(duration_ms) = episode.duration_ms {
            engine.register_duration(episode.id.as_str(), duration_ms);
        }
    }

    let controller = SessionController::new(store.clone(), &config.session);
    controller.connect(engine.clone()).await?;
    controller.bind(|id: &EpisodeId, position_ms: u64| {
        println!("{} {}", format_millis(position_ms), id);
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = words.split_first() else {
            continue;
        };

        let outcome = match command {
            "quit" | "exit" => break,
            "add" => add_episode(&store, &engine, rest).await,
            "play" | "prepare" => load_episode(&controller, store.as_ref(), command, rest).await,
            "pause" => transport(&controller, Intent::Pause).await,
            "resume" => transport(&controller, Intent::Resume).await,
            "seek" => match rest.first().map(|ms| ms.parse::<u64>()) {
                Some(Ok(ms)) => transport(&controller, Intent::Seek(ms)).await,
                _ => Err(anyhow::anyhow!("usage: seek <ms>")),
            },
            "back" => transport(&controller, Intent::skip_back(&config.session)).await,
            "fwd" => transport(&controller, Intent::skip_forward(&config.session)).await,
            "state" => show_state(&controller, rest).await,
            "list" => list_episodes(&store).await,
            "help" => {
                println!("{}", HELP);
                Ok(())
            }
            other => {
                warn!("Unknown command: {}", other);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!("{:#}", e);
        }
    }

    controller.unbind();
    controller.shutdown().await?;
    info!("podsession shutting down");
    Ok(())
}

async fn add_episode(
    store: &JsonFileEpisodeStore,
    engine: &SimulatedEngine,
    rest: &[&str],
) -> Result<()> {
    let [url, duration, title @ ..] = rest else {
        anyhow::bail!("usage: add <url> <duration_ms> <title...>");
    };
    let duration_ms: u64 = duration.parse().context("duration must be in milliseconds")?;
    let title = if title.is_empty() { url.to_string() } else { title.join(" ") };

    store
        .insert(Episode::new(*url, title).with_duration(duration_ms))
        .await
        .store_err("Failed to add episode")?;
    engine.register_duration(*url, duration_ms);
    println!("added {}", url);
    Ok(())
}

async fn load_episode(
    controller: &SessionController,
    store: &dyn EpisodeStore,
    command: &str,
    rest: &[&str],
) -> Result<()> {
    let url = rest.first().context("missing episode url")?;
    let episode = store
        .get(&EpisodeId::from(*url))
        .await
        .store_err("Unknown episode")?;

    let intent = if command == "play" {
        Intent::Play(episode)
    } else {
        Intent::Prepare(episode)
    };
    println!("{}", controller.submit(intent, None).await);
    Ok(())
}

async fn transport(controller: &SessionController, intent: Intent) -> Result<()> {
    println!("{}", controller.submit(intent, None).await);
    Ok(())
}

async fn show_state(controller: &SessionController, rest: &[&str]) -> Result<()> {
    match rest.first() {
        Some(url) => println!("{}", controller.query_state(&EpisodeId::from(*url)).await),
        None => {
            let state = controller.state().await?;
            match state.current {
                Some(episode) => println!("{}: {}", episode.title, state.phase),
                None => println!("{}", state.phase),
            }
        }
    }
    Ok(())
}

async fn list_episodes(store: &JsonFileEpisodeStore) -> Result<()> {
    for episode in store.list().await? {
        let duration = episode
            .duration_ms
            .map(format_millis)
            .unwrap_or_else(|| "-:--".to_string());
        println!(
            "{} {}/{}{} {}",
            episode.id,
            format_millis(episode.position_ms),
            duration,
            if episode.finished { " (finished)" } else { "" },
            episode.title
        );
    }
    Ok(())
}
