//! Room daemon.
//!
//! A room is a relay node for peers that cannot dial each other directly:
//! members keep a QUIC connection open to the room, and any member can ask
//! the room to broker a tunnel to another attendant. The daemon also carries
//! the membership database and a small CLI to administer it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use room_db::{MemberRole, MemberStore};
use room_proto::{Identity, Method};
use room_registry::EndpointRegistry;
use room_transport::TransportError;
use room_transport_quic::{QuicConfig, RoomConnection, RoomListener};
use room_tunnel::ConnectHandler;

mod keys;

/// Room relay daemon - brokers tunnels between peers behind NAT
#[derive(Parser, Debug)]
#[command(name = "roomd")]
#[command(about = "Run a tunnel-relay room node", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the room server
    Serve(ServeArgs),

    /// Administer the membership database (no running server required)
    Members {
        #[command(subcommand)]
        command: MembersCommand,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Print this room's identity, generating the node key if missing
    Identity {
        /// Node key file
        #[arg(long, env = "ROOMD_KEY_FILE")]
        key_file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// UDP address to listen on for room connections (QUIC)
    #[arg(long, default_value = "0.0.0.0:8008")]
    bind: SocketAddr,

    #[command(flatten)]
    db: DbArgs,

    /// Node key file (created on first run)
    #[arg(long, env = "ROOMD_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ROOMD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Admit any authenticated peer instead of members only
    #[arg(long)]
    open: bool,
}

#[derive(Args, Debug)]
struct DbArgs {
    /// Membership database URL
    /// SQLite file: "sqlite://roomd.db?mode=rwc"
    /// In-memory SQLite: "sqlite::memory:" (membership lost on restart)
    #[arg(long, env = "ROOMD_DATABASE_URL", default_value = "sqlite://roomd.db?mode=rwc")]
    database_url: String,
}

#[derive(Subcommand, Debug)]
enum MembersCommand {
    /// Add a member
    Add {
        /// Member identity (64 hex characters)
        identity: String,

        /// Role: admin, moderator or member
        #[arg(long, default_value = "member", value_parser = parse_role)]
        role: MemberRole,
    },

    /// Remove a member
    Remove {
        /// Member identity (64 hex characters)
        identity: String,
    },

    /// Change a member's role
    SetRole {
        /// Member identity (64 hex characters)
        identity: String,

        /// Role: admin, moderator or member
        #[arg(long, value_parser = parse_role)]
        role: MemberRole,
    },

    /// List all members
    List,
}

fn parse_role(value: &str) -> Result<MemberRole, String> {
    match value {
        "admin" => Ok(MemberRole::Admin),
        "moderator" => Ok(MemberRole::Moderator),
        "member" => Ok(MemberRole::Member),
        other => Err(format!(
            "unknown role '{}' (expected admin, moderator or member)",
            other
        )),
    }
}

fn role_name(role: &MemberRole) -> &'static str {
    match role {
        MemberRole::Admin => "admin",
        MemberRole::Moderator => "moderator",
        MemberRole::Member => "member",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Members { command, db } => members(command, &db.database_url).await,
        Commands::Identity { key_file } => {
            let keypair = keys::load_or_generate(key_file.as_deref())?;
            println!("{}", keypair.identity());
            Ok(())
        }
    }
}

/// Membership administration against the database, for operators.
async fn members(command: MembersCommand, database_url: &str) -> Result<()> {
    let db = room_db::connect(database_url)
        .await
        .with_context(|| format!("Failed to connect to database {}", database_url))?;
    room_db::migrate(&db)
        .await
        .context("Failed to run database migrations")?;
    let store = MemberStore::new(db);

    match command {
        MembersCommand::Add { identity, role } => {
            let identity = Identity::from_hex(&identity).context("Invalid member identity")?;
            let added = store.add(identity, role).await?;
            println!("Added {} as {}", identity, role_name(&added.role));
        }
        MembersCommand::Remove { identity } => {
            let identity = Identity::from_hex(&identity).context("Invalid member identity")?;
            store.remove(identity).await?;
            println!("Removed {}", identity);
        }
        MembersCommand::SetRole { identity, role } => {
            let identity = Identity::from_hex(&identity).context("Invalid member identity")?;
            store.set_role(identity, role.clone()).await?;
            println!("Changed {} to {}", identity, role_name(&role));
        }
        MembersCommand::List => {
            let members = store.list().await?;
            if members.is_empty() {
                println!("No members");
                return Ok(());
            }
            println!("{:<4} {:<10} {:<20} identity", "id", "role", "joined");
            for member in members {
                println!(
                    "{:<4} {:<10} {:<20} {}",
                    member.id,
                    role_name(&member.role),
                    member.created_at.format("%Y-%m-%d %H:%M:%S"),
                    member.public_key,
                );
            }
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    init_logging(&args.log_level)?;
    room_transport_quic::ensure_crypto_provider();

    info!("Starting room node");

    let keypair = keys::load_or_generate(args.key_file.as_deref())?;
    let room_id = keypair.identity();
    info!(identity = %room_id, "room identity (hand this to peers as the portal)");

    info!(url = %args.db.database_url, "opening membership database");
    let db = room_db::connect(&args.db.database_url).await?;
    room_db::migrate(&db)
        .await
        .context("Failed to run database migrations")?;
    let members = MemberStore::new(db);

    if args.open {
        warn!("Open room: any authenticated peer may attend");
    } else {
        let member_count = members.count().await?;
        info!(members = member_count, "members-only room");
    }

    let registry = EndpointRegistry::new();
    let handler = ConnectHandler::new(room_id, Arc::new(registry.clone()));

    let listener = RoomListener::bind(args.bind, &keypair, &QuicConfig::default())?;
    info!(addr = %listener.local_addr()?, "room listening (QUIC)");

    let open = args.open;
    let accept_loop = tokio::spawn(async move {
        while let Some(connection) = listener.accept().await {
            let registry = registry.clone();
            let handler = handler.clone();
            let members = members.clone();
            tokio::spawn(async move {
                serve_connection(connection, registry, handler, members, open).await;
            });
        }
        error!("accept loop exited: listening endpoint closed");
    });

    info!("Room node is running, press Ctrl+C to stop");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping"),
        Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
    }

    accept_loop.abort();
    info!("Room node stopped");

    Ok(())
}

/// Serves one attendant connection: gate, register, dispatch, unregister.
async fn serve_connection(
    connection: RoomConnection,
    registry: EndpointRegistry,
    handler: ConnectHandler,
    members: MemberStore,
    open: bool,
) {
    let peer = connection.identity();
    let remote = connection.remote_address();

    if !open {
        match members.is_member(peer).await {
            Ok(true) => {}
            Ok(false) => {
                info!(peer = %peer.short(), %remote, "turning away non-member");
                connection.close("not a room member");
                return;
            }
            Err(err) => {
                error!(peer = %peer.short(), error = %err, "membership check failed");
                connection.close("membership check failed");
                return;
            }
        }
    }

    // Hold on to the exact handle we register: if the peer reconnects, its
    // new connection replaces this entry, and our teardown must not remove
    // the replacement.
    let endpoint = connection.endpoint();
    registry.register(endpoint.clone());
    info!(peer = %peer.short(), %remote, "peer joined");

    loop {
        match connection.next_call().await {
            Ok(Some(call)) => {
                if call.method == Method::tunnel_connect() {
                    // Each call gets its own task so a slow target cannot
                    // hold up the next call on this connection. Pre-relay
                    // failures already reached the caller as the rejection.
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = handler.handle_connect(Some(peer), call).await;
                    });
                } else {
                    let reason = TransportError::NoSuchMethod(call.method.to_string());
                    debug!(peer = %peer.short(), method = %call.method, "rejecting call");
                    if let Err(err) = call.reject(&reason.to_string()).await {
                        debug!(error = %err, "rejection not delivered");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(peer = %peer.short(), error = %err, "connection lost");
                break;
            }
        }
    }

    registry.unregister_endpoint(&endpoint);
    info!(peer = %peer.short(), "peer left");
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
