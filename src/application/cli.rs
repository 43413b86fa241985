#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::io;
use std::io::Read;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::ArgGroup;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use strum::VariantNames;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use yansi::Paint;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::FeedSignal;
use crate::domain::models::Session;
use crate::domain::services::AskService;
use crate::infrastructure::opencode::OpenCodeClient;

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// A client for one-off requests. The feed is never started, so nothing
/// listens for signals.
fn request_client() -> Result<OpenCodeClient> {
    let (tx, _) = mpsc::unbounded_channel::<FeedSignal>();
    return Ok(OpenCodeClient::new(Config::transport_options()?, tx));
}

fn format_session(session: &Session) -> String {
    let mut res = format!("- (ID: {}) {}", session.id, session.display_title());

    if let Some(summary) = &session.summary {
        if summary.files > 0 {
            res = format!("{res}, Files changed: {}", summary.files);
        }
    }

    if let Some(share) = &session.share {
        res = format!("{res}, Shared: {}", share.url);
    }

    return res;
}

async fn print_sessions_list() -> Result<()> {
    let mut sessions = request_client()?.list_sessions().await?;
    sessions.sort_by(|a, b| return b.time.updated.total_cmp(&a.time.updated));

    if sessions.is_empty() {
        println!("There are no sessions available. You should start your first one!");
        return Ok(());
    }

    let lines = sessions
        .iter()
        .map(|session| {
            return format_session(session);
        })
        .collect::<Vec<String>>();

    println!("{}", lines.join("\n"));
    return Ok(());
}

async fn select_session_interactive() -> Result<bool> {
    let mut sessions = request_client()?.list_sessions().await?;
    sessions.sort_by(|a, b| return b.time.updated.total_cmp(&a.time.updated));

    if sessions.is_empty() {
        println!("There are no sessions available. You should start your first one!");
        return Ok(false);
    }

    let session_options = sessions
        .iter()
        .map(|session| {
            return format_session(session);
        })
        .collect::<Vec<String>>();

    let idx = match Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Which session would you like to open?")
        .default(0)
        .items(&session_options)
        .interact_opt()?
    {
        Some(idx) => idx,
        None => return Ok(false),
    };

    Config::set(ConfigKey::SessionID, &sessions[idx].id);
    return Ok(true);
}

async fn delete_sessions(session_id: Option<&String>) -> Result<()> {
    let client = request_client()?;
    if let Some(session_id) = session_id {
        client.delete_session(session_id).await?;
        println!("Deleted session {session_id}");
        return Ok(());
    }

    let sessions = client.list_sessions().await?;
    for session in sessions.iter() {
        client.delete_session(&session.id).await?;
    }
    println!("Deleted {} sessions", sessions.len());

    return Ok(());
}

async fn print_agents() -> Result<()> {
    let agents = request_client()?.list_agents().await?;
    for agent in agents {
        match agent.description {
            Some(description) => println!("- {}: {description}", agent.id),
            None => println!("- {}", agent.id),
        }
    }

    return Ok(());
}

async fn print_providers() -> Result<()> {
    let providers = request_client()?.list_providers().await?;
    for provider in providers {
        println!("{} ({})", Paint::new(&provider.name).bold(), provider.id);
        for model in provider.models {
            println!("  - {}/{} {}", provider.id, model.id, model.name);
        }
    }

    return Ok(());
}

async fn run_ask(prompt: Option<&String>) -> Result<()> {
    let prompt = match prompt {
        Some(prompt) => prompt.to_string(),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    if prompt.trim().is_empty() {
        bail!("No prompt given, pass one as argument or through stdin");
    }

    let client = request_client()?;
    let answer = AskService::ask(&client, &prompt, &Config::ask_options()?).await?;
    println!("{answer}");

    return Ok(());
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(config_file_path.clone()).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn log_path() -> path::PathBuf {
    return dirs::cache_dir()
        .unwrap_or_default()
        .join("opencode-sync/debug.log");
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_debug() -> Command {
    return Command::new("debug")
        .about("Debug helpers for opencode-sync")
        .hide(true)
        .subcommand(
            Command::new("log-path").about("Output path to debug log file generated when running with environment variable RUST_LOG=opencode_sync")
        )
        .subcommand(
            Command::new("enum-config").about("List all config keys as strings.")
        );
}

fn subcommand_sessions_delete() -> Command {
    return Command::new("delete")
        .about("Delete one or all sessions on the server.")
        .arg(
            clap::Arg::new("session-id")
                .short('i')
                .long("id")
                .help("Session ID")
                .num_args(1),
        )
        .arg(
            clap::Arg::new("all")
                .long("all")
                .help("Delete all sessions.")
                .action(ArgAction::SetTrue),
        )
        .group(
            ArgGroup::new("delete-args")
                .args(["session-id", "all"])
                .required(true),
        );
}

fn subcommand_sessions() -> Command {
    return Command::new("sessions")
        .about("Manage sessions on the OpenCode server.")
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List all sessions, most recently updated first."))
        .subcommand(
            Command::new("open")
                .about("Open a session by ID. Omit passing any session ID to load an interactive selection.")
                .arg(
                    clap::Arg::new(ConfigKey::SessionID.to_string())
                        .short('i')
                        .long("id")
                        .help("Session ID")
                        .required(false),
                ),
        )
        .subcommand(subcommand_sessions_delete());
}

fn subcommand_chat() -> Command {
    return Command::new("chat")
        .about("Chat in the most recent session, or in a new one if there is none.")
        .arg(
            clap::Arg::new(ConfigKey::SessionID.to_string())
                .short('i')
                .long("id")
                .help("Session ID to chat in.")
                .required(false),
        );
}

fn subcommand_ask() -> Command {
    return Command::new("ask")
        .about("Runs a single prompt in a throwaway session and prints the answer. Reads the prompt from stdin when omitted.")
        .arg(clap::Arg::new("prompt").help("The prompt to send.").required(false));
}

fn arg_agent() -> Arg {
    return Arg::new(ConfigKey::Agent.to_string())
        .short('a')
        .long(ConfigKey::Agent.to_string())
        .env("OPENCODE_SYNC_AGENT")
        .num_args(1)
        .help("Agent used for prompts. Falls back to the last agent used in a session, then the first agent OpenCode offers.")
        .global(true);
}

fn arg_model() -> Arg {
    return Arg::new(ConfigKey::Model.to_string())
        .short('m')
        .long(ConfigKey::Model.to_string())
        .env("OPENCODE_SYNC_MODEL")
        .num_args(1)
        .help("Model used for prompts in the format provider/model. Defaults to the first model of the preferred connected provider.")
        .global(true);
}

pub fn build() -> Command {
    let about = format!(
        "{}\n\nVersion: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
    );

    return Command::new("opencode-sync")
        .about(about)
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg_required_else_help(false)
        .subcommand(subcommand_chat())
        .subcommand(subcommand_ask())
        .subcommand(Command::new("agents").about("List the agents offered by OpenCode."))
        .subcommand(Command::new("providers").about("List connected providers and their models."))
        .subcommand(Command::new("watch").about("Print the live event feed."))
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .subcommand(subcommand_debug())
        .subcommand(subcommand_sessions())
        .arg(arg_agent())
        .arg(arg_model())
        .arg(
            Arg::new(ConfigKey::ConfigFile.to_string())
                .short('c')
                .long(ConfigKey::ConfigFile.to_string())
                .env("OPENCODE_SYNC_CONFIG_FILE")
                .num_args(1)
                .help(format!("Path to configuration file [default: {}]", Config::default(ConfigKey::ConfigFile)))
                .global(true)
        )
        .arg(
            Arg::new(ConfigKey::BaseUrl.to_string())
                .short('u')
                .long(ConfigKey::BaseUrl.to_string())
                .env("OPENCODE_SYNC_BASE_URL")
                .num_args(1)
                .help(format!("URL of the OpenCode server. [default: {}]", Config::default(ConfigKey::BaseUrl)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::Directory.to_string())
                .short('d')
                .long(ConfigKey::Directory.to_string())
                .env("OPENCODE_SYNC_DIRECTORY")
                .num_args(1)
                .help("Project directory every request is scoped to. [default: current directory]")
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::MaxReconnectAttempts.to_string())
                .long(ConfigKey::MaxReconnectAttempts.to_string())
                .env("OPENCODE_SYNC_MAX_RECONNECT_ATTEMPTS")
                .num_args(1)
                .help(format!("Maximum number of reconnect attempts for the event feed before giving up. [default: {}]", Config::default(ConfigKey::MaxReconnectAttempts)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ReconnectDelay.to_string())
                .long(ConfigKey::ReconnectDelay.to_string())
                .env("OPENCODE_SYNC_RECONNECT_DELAY")
                .num_args(1)
                .help(format!("Base delay in milliseconds between reconnect attempts, doubled after every attempt. [default: {}]", Config::default(ConfigKey::ReconnectDelay)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::AskTimeout.to_string())
                .long(ConfigKey::AskTimeout.to_string())
                .env("OPENCODE_SYNC_ASK_TIMEOUT")
                .num_args(1)
                .help(format!("Time to wait in milliseconds for a one-shot prompt answer. [default: {}]", Config::default(ConfigKey::AskTimeout)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ApiReadyRetries.to_string())
                .long(ConfigKey::ApiReadyRetries.to_string())
                .env("OPENCODE_SYNC_API_READY_RETRIES")
                .num_args(1)
                .help(format!("Number of times the OpenCode API is probed for readiness after connecting. [default: {}]", Config::default(ConfigKey::ApiReadyRetries)))
                .global(true),
        );
}

/// Parses arguments and runs one-shot subcommands. Returns true when the
/// interactive chat should start.
pub async fn parse() -> Result<bool> {
    return run(build().get_matches()).await;
}

pub async fn run(matches: ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("debug", debug_matches)) => {
            match debug_matches.subcommand() {
                Some(("log-path", _)) => {
                    println!("{}", log_path().to_string_lossy());
                }
                Some(("enum-config", _)) => {
                    let res = ConfigKey::VARIANTS.join("\n");
                    println!("{}", res);
                }
                _ => {
                    subcommand_debug().print_long_help()?;
                }
            }

            return Ok(false);
        }
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
        }
        Some(("ask", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            run_ask(subcmd_matches.get_one::<String>("prompt")).await?;
            return Ok(false);
        }
        Some(("agents", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            print_agents().await?;
            return Ok(false);
        }
        Some(("providers", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            print_providers().await?;
            return Ok(false);
        }
        Some(("watch", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            crate::application::ui::watch().await?;
            return Ok(false);
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }

            return Ok(false);
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(false);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(false);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(false);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(false);
            }
        },
        Some(("sessions", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("list", list_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, list_matches]).await?;
                print_sessions_list().await?;
                return Ok(false);
            }
            Some(("open", open_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, open_matches]).await?;
                if open_matches
                    .get_one::<String>(&ConfigKey::SessionID.to_string())
                    .is_none()
                {
                    return select_session_interactive().await;
                }
            }
            Some(("delete", delete_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, delete_matches]).await?;
                delete_sessions(delete_matches.get_one::<String>("session-id")).await?;
                return Ok(false);
            }
            _ => {
                subcommand_sessions().print_long_help()?;
                return Ok(false);
            }
        },
        _ => {
            Config::load(build(), vec![&matches]).await?;
        }
    }

    return Ok(true);
}
