//! Operator entry point: serves the consent endpoints and runs one-shot token chores.

// std
use std::process::ExitCode;
// crates.io
use color_eyre::Result;
// self
use brokerage_oauth::{
	config::Config,
	ext::SkipReason,
	flows::TokenLifecycleManager,
	obs::logging,
	server,
	status::StatusReporter,
};

const USAGE: &str = "\
Usage: brokerage-oauth <command>

Commands:
  serve     Serve /auth and /status on BIND_ADDRESS
  status    Print the credential status as JSON
  refresh   Make sure a valid access token is stored (exit 0 valid, 2 re-authorization
            required, 3 temporarily unavailable, 78 configuration)
  auth-url  Print a fresh brokerage consent URL";

/// Parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
	Serve,
	Status,
	Refresh,
	AuthUrl,
	Help,
	Unknown(String),
}

fn parse_args<I>(mut args: I) -> Command
where
	I: Iterator<Item = String>,
{
	match args.nth(1).as_deref() {
		None | Some("serve") => Command::Serve,
		Some("status") => Command::Status,
		Some("refresh") => Command::Refresh,
		Some("auth-url") => Command::AuthUrl,
		Some("help" | "--help" | "-h") => Command::Help,
		Some(other) => Command::Unknown(other.to_owned()),
	}
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	color_eyre::install()?;

	let command = parse_args(std::env::args());

	match command {
		Command::Help => {
			println!("{USAGE}");

			return Ok(ExitCode::SUCCESS);
		},
		Command::Unknown(arg) => {
			eprintln!("Unknown command `{arg}`.\n\n{USAGE}");

			return Ok(ExitCode::from(64));
		},
		_ => (),
	}

	let config = Config::from_env()?;

	logging::init(config.log_format)?;

	match command {
		Command::Serve => server::serve(config).await?,
		Command::Status => {
			let report = StatusReporter::from_config(&config)?.get_status().await?;

			println!("{}", serde_json::to_string_pretty(&report)?);
		},
		Command::Refresh => return Ok(refresh(&config).await),
		Command::AuthUrl => {
			let manager = TokenLifecycleManager::from_config(&config)?;
			let request =
				manager.authorization_initiator().build_authorization_url(&config).await?;

			println!("{}", request.url);
		},
		Command::Help | Command::Unknown(_) => (),
	}

	Ok(ExitCode::SUCCESS)
}

async fn refresh(config: &Config) -> ExitCode {
	let outcome = match TokenLifecycleManager::from_config(config) {
		Ok(manager) => manager.get_valid_token().await,
		Err(e) => Err(e),
	};

	match outcome {
		Ok(token) => {
			println!("Access token valid until {}.", token.expires_at);

			ExitCode::SUCCESS
		},
		Err(e) => {
			let reason = SkipReason::from_error(&e);

			eprintln!("{reason}");

			ExitCode::from(u8::try_from(reason.exit_code()).unwrap_or(1))
		},
	}
}
