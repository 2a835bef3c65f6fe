use agentlink::{
    render_buffer_ids, render_messages, render_profile_detail, render_profiles, render_summaries,
};
use al_config::{ClientConfig, ConfigPaths, ProtocolKind, ServerProfile};
use al_session::{CacheDelegate, SessionCache};
use al_store::SqliteStorage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "agentlink",
    version,
    about = "Manage agent server profiles and inspect the local session cache"
)]
struct Cli {
    /// Override the configuration directory (defaults to $AGENTLINK_HOME, then ~/.agentlink)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage server profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// List cached sessions for a profile
    Sessions {
        /// Profile id
        profile: Uuid,
    },
    /// Print the cached message buffer of a session, or list cached buffers
    Messages {
        /// Session id; omit to list every session with a cached buffer
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List configured profiles
    List,
    /// Add a new profile
    Add {
        #[arg(long)]
        name: String,
        /// Host, optionally with port or a full URL
        #[arg(long)]
        host: String,
        /// URL scheme; `wss` when empty
        #[arg(long, default_value = "")]
        scheme: String,
        #[arg(long, default_value = "")]
        token: String,
        /// Working directory sessions are created in
        #[arg(long, default_value = "/")]
        cwd: PathBuf,
        #[arg(long, default_value_t = ProtocolKind::Acp)]
        protocol: ProtocolKind,
        #[arg(long, requires = "cf_client_secret")]
        cf_client_id: Option<String>,
        #[arg(long, requires = "cf_client_id")]
        cf_client_secret: Option<String>,
        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },
    /// Remove a profile and its cached sessions
    Remove { id: Uuid },
    /// Show a profile with secrets redacted
    Show { id: Uuid },
}

fn open_cache(paths: &ConfigPaths) -> anyhow::Result<SessionCache> {
    let storage = SqliteStorage::open(&paths.cache_db_path())?;
    Ok(SessionCache::new(Arc::new(storage)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentlink=info,al_session=info,al_store=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = ConfigPaths::resolve(cli.config_dir)?;

    match cli.command {
        Commands::Profiles { command } => {
            let mut config = ClientConfig::load_from(&paths)?;
            match command {
                ProfileCommands::List => {
                    let default = config.default_profile().map(|p| p.id);
                    print!("{}", render_profiles(&config.profiles, default.as_ref()));
                }
                ProfileCommands::Add {
                    name,
                    host,
                    scheme,
                    token,
                    cwd,
                    protocol,
                    cf_client_id,
                    cf_client_secret,
                    default,
                } => {
                    let mut profile = ServerProfile::new(name, scheme, host);
                    profile.token = token;
                    profile.working_directory = cwd;
                    profile.protocol = protocol;
                    profile.cf_access_client_id = cf_client_id;
                    profile.cf_access_client_secret = cf_client_secret;
                    let id = profile.id;
                    config.add_profile(profile)?;
                    if default {
                        config.default_profile = Some(id);
                    }
                    config.save_to(&paths)?;
                    tracing::info!(profile_id = %id, "profile added");
                    println!("{id}");
                }
                ProfileCommands::Remove { id } => {
                    let Some(removed) = config.remove_profile(&id) else {
                        anyhow::bail!("No profile with id {id}");
                    };
                    config.save_to(&paths)?;
                    let purged = open_cache(&paths)?.purge_profile(&id.to_string())?;
                    tracing::info!(profile_id = %id, purged, "profile removed");
                    println!("Removed {} ({purged} cached session(s) purged)", removed.name);
                }
                ProfileCommands::Show { id } => {
                    let Some(profile) = config.profile(&id) else {
                        anyhow::bail!("No profile with id {id}");
                    };
                    print!("{}", render_profile_detail(profile));
                }
            }
        }
        Commands::Sessions { profile } => {
            let config = ClientConfig::load_from(&paths)?;
            if config.profile(&profile).is_none() {
                tracing::warn!(profile_id = %profile, "profile is not configured, showing cache anyway");
            }
            let summaries = open_cache(&paths)?.load_cached_sessions(&profile.to_string());
            print!("{}", render_summaries(&summaries));
        }
        Commands::Messages { session: None } => {
            let ids = open_cache(&paths)?.cached_message_ids()?;
            print!("{}", render_buffer_ids(&ids));
        }
        Commands::Messages {
            session: Some(session),
        } => {
            let cache = open_cache(&paths)?;
            match cache.load_messages(&session)? {
                Some(messages) => print!("{}", render_messages(&messages)),
                None => anyhow::bail!("No cached messages for session {session}"),
            }
        }
    }

    Ok(())
}
