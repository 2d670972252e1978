use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyshare::api::{Photo, StorySubmission, Submission};
use storyshare::config::Config;
use storyshare::event::{ClientBus, Connectivity, EventHandler};
use storyshare::http::{Destination, HttpFetcher, Request, RequestMode};
use storyshare::store::{Collection, Store};
use storyshare::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "storyshare")]
#[command(about = "Offline cache and sync queue for the StoryShare client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storyshare/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start with connectivity marked offline
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Show store, cache and queue state
  Status,
  /// Fetch a URL through the cache router
  Fetch {
    url: String,
    /// Treat as an image request
    #[arg(long)]
    image: bool,
    /// Treat as a page navigation
    #[arg(long, conflicts_with = "image")]
    navigate: bool,
  },
  /// List stories (saved copy when offline)
  Stories,
  /// Show one story
  Story { id: String },
  /// Submit a new story; queued when offline
  Post {
    #[arg(short, long)]
    description: String,
    #[arg(short, long)]
    photo: PathBuf,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
  },
  /// List queued operations
  Queue {
    /// Discard every queued operation
    #[arg(long)]
    clear: bool,
  },
  /// Replay the offline queue now
  Sync,
  /// Manage favorite stories
  #[command(subcommand)]
  Favorites(FavoritesCmd),
  /// Precache static resources
  Install,
  /// Delete caches left over from older versions
  Activate,
  /// Process signals from stdin, one per line
  Run,
  /// Wipe all local data
  Reset,
}

#[derive(Subcommand, Debug)]
enum FavoritesCmd {
  Add { id: String },
  Remove { id: String },
  List,
  Clear,
}

fn init_logging() -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "storyshare.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("STORYSHARE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Ok(guard)
}

fn read_photo(path: &Path) -> Result<Photo> {
  let bytes =
    std::fs::read(path).wrap_err_with(|| format!("Failed to read photo {}", path.display()))?;
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("Invalid photo path: {}", path.display()))?
    .to_string();
  let mime = match path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase)
    .as_deref()
  {
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "application/octet-stream",
  };

  Ok(Photo {
    file_name,
    mime: mime.to_string(),
    bytes,
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let args = Args::parse();
  let _log_guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;
  let store = Store::open(&config.database_path()?)?;
  let fetcher = Arc::new(HttpFetcher::new(config.network.timeout())?);
  let connectivity = Connectivity::new(!args.offline);
  let clients = ClientBus::new();

  let mut worker = Worker::new(&config, store, fetcher, connectivity, clients)?;

  match args.command {
    Cmd::Status => {
      let store = worker.store();
      println!("schema version: {}", store.schema_version().await?);
      println!("online:         {}", worker.connectivity().is_online());
      for collection in Collection::ALL {
        println!(
          "{:<15} {}",
          format!("{}:", collection.table()),
          store.count(collection).await?
        );
      }
      let stale = store
        .is_data_stale(Collection::Stories, chrono::Duration::minutes(5))
        .await?;
      println!("stories stale:  {}", stale);
    }

    Cmd::Fetch {
      url,
      image,
      navigate,
    } => {
      let mut request = Request::get(&url)?;
      if image {
        request = request.with_destination(Destination::Image);
      }
      if navigate {
        request = request
          .with_destination(Destination::Document)
          .with_mode(RequestMode::Navigate);
      }

      let served = worker.router().handle(request).await?;
      println!(
        "{} ({:?}{})",
        served.response.status,
        served.source,
        served
          .cached_at
          .map(|at| format!(", cached {}", at.to_rfc3339()))
          .unwrap_or_default()
      );
      if let Some(notice) = served.response.as_offline_notice() {
        println!("offline: {}", notice.message);
      } else {
        println!("{}", served.response.text());
      }
      worker.settle().await;
    }

    Cmd::Stories => {
      for story in worker.repository().get_all_stories().await? {
        println!("{}  {:<20} {}", story.id, story.name, story.description);
      }
    }

    Cmd::Story { id } => {
      let story = worker.repository().get_story_detail(&id).await?;
      println!("{} by {} at {}", story.id, story.name, story.created_at);
      println!("{}", story.description);
      println!("{}", story.photo_url);
      if let (Some(lat), Some(lon)) = (story.lat, story.lon) {
        println!("location: {}, {}", lat, lon);
      }
    }

    Cmd::Post {
      description,
      photo,
      lat,
      lon,
    } => {
      let submission = StorySubmission {
        description,
        photo: read_photo(&photo)?,
        lat,
        lon,
      };
      match worker.repository().add_new_story(&submission).await? {
        Submission::Sent { message } => println!("{}", message),
        Submission::Queued { operation_id } => {
          println!("Saved locally, will sync later (operation {})", operation_id)
        }
      }
    }

    Cmd::Queue { clear } => {
      if clear {
        worker.queue().clear().await?;
        println!("queue cleared");
      } else {
        for op in worker.queue().pending().await? {
          println!(
            "{:>4}  {:<14} {}  {}",
            op.id,
            op.op_type,
            chrono::DateTime::from_timestamp_millis(op.timestamp)
              .map(|t| t.to_rfc3339())
              .unwrap_or_default(),
            op.preview
          );
        }
      }
    }

    Cmd::Sync => {
      let report = worker.queue().flush().await?;
      println!(
        "synced {}, failed {}, remaining {}",
        report.synced.len(),
        report.failed.len(),
        report.remaining
      );
      for (id, reason) in report.failed {
        println!("  {}: {}", id, reason);
      }
    }

    Cmd::Favorites(cmd) => {
      let store = worker.store();
      match cmd {
        FavoritesCmd::Add { id } => {
          let story = worker.repository().get_story_detail(&id).await?;
          store.add_favorite(story).await?;
          println!("added {}", id);
        }
        FavoritesCmd::Remove { id } => {
          if store.remove_favorite(&id).await? {
            println!("removed {}", id);
          } else {
            println!("{} was not a favorite", id);
          }
        }
        FavoritesCmd::List => {
          for fav in store.get_favorites().await? {
            println!("{}  {}", fav.story.id, fav.story.description);
          }
        }
        FavoritesCmd::Clear => {
          store.clear_favorites().await?;
          println!("favorites cleared");
        }
      }
    }

    Cmd::Install => {
      let report = worker.router().install().await?;
      println!("cached {}, failed {}", report.cached.len(), report.failed.len());
      for url in report.failed {
        println!("  failed: {}", url);
      }
    }

    Cmd::Activate => {
      for name in worker.router().activate().await? {
        println!("deleted {}", name);
      }
    }

    Cmd::Run => {
      let mut events = EventHandler::new();
      events.spawn_line_reader(tokio::io::BufReader::new(tokio::io::stdin()));

      let mut rx = worker.clients().subscribe();
      let printer = tokio::spawn(async move {
        while let Ok(message) = rx.recv().await {
          if let Ok(line) = serde_json::to_string(&message) {
            println!("{}", line);
          }
        }
      });

      worker.run(&mut events).await?;
      drop(worker);
      let _ = printer.await;
    }

    Cmd::Reset => {
      worker.store().reset().await?;
      println!("local data wiped");
    }
  }

  Ok(())
}
