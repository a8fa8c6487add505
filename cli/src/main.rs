use clap::{Parser, Subcommand, ValueEnum};
use std::{io::stdin, process, sync::Arc, time::Duration};
use tokio::{signal, task::JoinHandle};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use twin_client_core::{
	bus::Bus,
	classify::{ClassificationKey, FrameClassifierFn, StreamingType},
	error::Error,
	frame::{Adaptable, ParseFrame, SearchAction},
	search::{SearchOutbound, SearchSubscriber, SearchSubscriptionDriver, SearchSubscriptionHandle},
};

const EXIT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
	setup_tracing().expect("failed to install tracing subscriber");

	let arguments = Arguments::parse();
	let bus = Bus::<DemoFrame>::new(parse_frame());
	bus.add_frame_classifier(streaming_classifier());
	bus.add_frame_classifier(search_classifier());

	match arguments.command {
		Commands::Listen { streaming_type, idle_timeout } => run_listen(bus, streaming_type, idle_timeout).await,
		Commands::Search { session_id, demand } => run_search(bus, session_id, demand).await,
	}
}

/// Subscribes to a streaming channel and prints every matching frame
/// published on stdin, until ctrl-c or end-of-stream.
async fn run_listen(bus: Bus<DemoFrame>, streaming_type: InputStreamingType, idle_timeout: Option<u64>) -> Result<(), Error> {
	let tag = ClassificationKey::StreamingType(streaming_type.into());
	let subscription_id = match idle_timeout {
		Some(secs) => {
			bus.subscribe_for_frame_with_idle_timeout(
				tag,
				Duration::from_secs(secs),
				Arc::new(|frame: Arc<DemoFrame>| println!("{}", frame.payload)),
				Arc::new(|_frame: &DemoFrame| false),
				Arc::new(|_err| {
					tracing::warn!("idle timeout fired, no frames arrived in time");
					process::exit(0);
				}),
			)
			.await?
		}
		None => {
			bus.subscribe_for_frame(tag, Arc::new(|frame: Arc<DemoFrame>| println!("{}", frame.payload)))
				.await?
		}
	};

	let signal_handler: JoinHandle<()> = {
		let bus = bus.clone();
		tokio::spawn(async move {
			let _ = signal::ctrl_c().await;
			let timeout = tokio::time::sleep(EXIT_TIMEOUT);
			tokio::pin!(timeout);
			tokio::select! {
				_ = timeout => {
					tracing::warn!("unsubscribe timed out, exiting anyway");
					process::exit(1);
				}
				_ = bus.unsubscribe(subscription_id) => {}
			}
			process::exit(0);
		})
	};

	for line in stdin().lines() {
		let Ok(line) = line else { break };
		bus.publish(line);
	}
	signal_handler.await.ok();
	Ok(())
}

/// Drives a search session against signals read from stdin (each line
/// formatted `search:<next|complete|failed>:<sessionId>:<payload>`, or
/// the literal `cancel`). Outbound `request-from`/`cancel` frames are
/// printed rather than sent, since the real wire connection this stands
/// in for lives above this crate.
async fn run_search(bus: Bus<DemoFrame>, session_id: String, demand: i64) -> Result<(), Error> {
	let outbound = Arc::new(PrintingOutbound);
	let downstream = Arc::new(PrintingSubscriber);
	let driver = SearchSubscriptionDriver::start(
		session_id,
		DEFAULT_IDLE_TIMEOUT,
		bus.clone(),
		outbound,
		downstream,
		tokio::runtime::Handle::current(),
	)
	.await?;

	driver.handle().request(demand);

	for line in stdin().lines() {
		let Ok(line) = line else { break };
		if line.trim() == "cancel" {
			driver.handle().cancel();
			break;
		}
		bus.publish(line);
	}
	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::WARN.into())
		.with_env_var("TWIN_CLIENT_LOG")
		.try_from_env();

	let subscriber = tracing_subscriber::fmt()
		.with_file(true)
		.with_target(false)
		.with_env_filter(filter.unwrap_or_default())
		.finish();

	tracing::subscriber::set_global_default(subscriber)
}

/// A small in-process frame used by the demo CLI. It carries either a
/// streaming-channel event or a search-session signal, distinguished by
/// a `event:`/`search:` prefix on the raw line typed at stdin — the
/// real wire envelope this stands in for lives above this crate.
#[derive(Debug)]
struct DemoFrame {
	streaming_type: Option<StreamingType>,
	search_action: Option<SearchAction>,
	search_id: Option<String>,
	payload: serde_json::Value,
}

impl Adaptable for DemoFrame {
	fn correlation_id(&self) -> Option<&str> {
		None
	}
	fn group(&self) -> Option<&str> {
		None
	}
	fn channel(&self) -> Option<&str> {
		None
	}
	fn criterion(&self) -> Option<&str> {
		None
	}
	fn search_subscription_id(&self) -> Option<&str> {
		self.search_id.as_deref()
	}
	fn search_action(&self) -> Option<SearchAction> {
		self.search_action
	}
	fn payload(&self) -> &serde_json::Value {
		&self.payload
	}
}

fn parse_frame() -> ParseFrame<DemoFrame> {
	Arc::new(|raw: &str| {
		let (kind, rest) = raw.split_once(':')?;
		match kind {
			"event" => {
				let (ty, payload) = rest.split_once(':').unwrap_or((rest, ""));
				let streaming_type = match ty {
					"live-command" => StreamingType::LiveCommand,
					"live-event" => StreamingType::LiveEvent,
					"live-message" => StreamingType::LiveMessage,
					"twin-event" => StreamingType::TwinEvent,
					_ => return None,
				};
				Some(DemoFrame {
					streaming_type: Some(streaming_type),
					search_action: None,
					search_id: None,
					payload: serde_json::Value::String(payload.to_string()),
				})
			}
			"search" => {
				let mut parts = rest.splitn(3, ':');
				let action = parts.next()?;
				let session = parts.next()?;
				let payload = parts.next().unwrap_or("");
				let search_action = match action {
					"next" => SearchAction::HasNext,
					"complete" => SearchAction::Complete,
					"failed" => SearchAction::Failed,
					_ => return None,
				};
				Some(DemoFrame {
					streaming_type: None,
					search_action: Some(search_action),
					search_id: Some(session.to_string()),
					payload: serde_json::Value::String(payload.to_string()),
				})
			}
			_ => None,
		}
	})
}

fn streaming_classifier() -> FrameClassifierFn<DemoFrame> {
	Box::new(|frame: &DemoFrame| frame.streaming_type.map(ClassificationKey::StreamingType))
}

fn search_classifier() -> FrameClassifierFn<DemoFrame> {
	Box::new(|frame: &DemoFrame| frame.search_subscription_id().map(|id| ClassificationKey::SearchSession(id.to_string())))
}

struct PrintingOutbound;

impl SearchOutbound for PrintingOutbound {
	fn request_from(&self, session_id: &str, demand: i64, correlation_id: &str) {
		println!("outbound: request-from({session_id}, {demand}) [{correlation_id}]");
	}
	fn cancel(&self, session_id: &str) {
		println!("outbound: cancel({session_id})");
	}
}

struct PrintingSubscriber;

impl SearchSubscriber<DemoFrame> for PrintingSubscriber {
	fn on_subscribe(&self, _handle: SearchSubscriptionHandle) {
		println!("subscribed");
	}
	fn on_next(&self, page: Arc<DemoFrame>) {
		println!("item: {}", page.payload);
	}
	fn on_complete(&self) {
		println!("complete");
		process::exit(0);
	}
	fn on_error(&self, error: Error) {
		eprintln!("error: {error}");
		process::exit(1);
	}
}

#[derive(Debug, Parser)]
#[clap(version, author)]
struct Arguments {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Subscribe to a streaming channel and print every matching frame
	/// read from stdin (each line formatted `event:<type>:<payload>`).
	Listen {
		#[arg(value_enum)]
		streaming_type: InputStreamingType,

		/// Idle timeout in seconds; unset means no idle watchdog.
		#[arg(long)]
		idle_timeout: Option<u64>,
	},
	/// Drive a search session against signals read from stdin.
	Search {
		session_id: String,

		#[arg(long, default_value = "1")]
		demand: i64,
	},
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputStreamingType {
	LiveCommand,
	LiveEvent,
	LiveMessage,
	TwinEvent,
}

impl From<InputStreamingType> for StreamingType {
	fn from(value: InputStreamingType) -> Self {
		match value {
			InputStreamingType::LiveCommand => StreamingType::LiveCommand,
			InputStreamingType::LiveEvent => StreamingType::LiveEvent,
			InputStreamingType::LiveMessage => StreamingType::LiveMessage,
			InputStreamingType::TwinEvent => StreamingType::TwinEvent,
		}
	}
}
