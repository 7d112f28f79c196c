//! kalends-admin: create principals and collections, set credentials,
//! and import iCalendar files. The server itself never creates
//! principals; this tool owns schema bootstrap.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kalends_core::digest::credential_hash;
use kalends_core::{Mutation, Store};
use kalends_ical::Calendar;

/// Realm baked into credential hashes; must match the server's.
const DEFAULT_REALM: &str = "kalends";

#[derive(Parser)]
#[command(name = "kalends-admin", about = "Administer a kalends calendar database")]
struct Cli {
    /// Directory holding the calendar database
    #[arg(short = 'd', long, env = "KALENDS_DIR")]
    caldir: PathBuf,

    /// Digest realm used when hashing passwords
    #[arg(long, default_value = DEFAULT_REALM)]
    realm: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a principal with an initial calendar collection
    Useradd {
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Path segment of the initial collection
        #[arg(long, default_value = "calendars")]
        collection: String,
    },
    /// Change a principal's password
    Passwd {
        name: String,
        #[arg(long)]
        password: String,
    },
    /// Change a principal's email address
    Email {
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Create an additional collection under a principal
    Colnadd { name: String, url: String },
    /// Let a peer principal act on another's calendars
    Proxyadd {
        /// The grantor whose calendars are shared
        name: String,
        /// The delegate being granted access
        peer: String,
        /// Grant write access instead of read-only
        #[arg(long)]
        write: bool,
    },
    /// Revoke a proxy grant
    Proxydel { name: String, peer: String },
    /// Import an iCalendar file as a new resource
    Import {
        name: String,
        collection: String,
        file: PathBuf,
        /// Resource path segment; defaults to the file name
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kalends-admin: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let store = Store::open(&cli.caldir, true)
        .await
        .with_context(|| format!("{}", cli.caldir.display()))?;

    let uid = i64::from(nix::unistd::getuid().as_raw());
    match store.owner_check_or_set(uid).await? {
        Mutation::Done(()) => {}
        Mutation::Constraint => bail!("database is owned by another user"),
    }

    match cli.command {
        Command::Useradd {
            name,
            email,
            password,
            collection,
        } => {
            let hash = credential_hash(&name, &cli.realm, &password);
            match store
                .principal_create(&name, &hash, &email, &collection)
                .await?
            {
                Mutation::Done(_) => println!("principal created: {name}"),
                Mutation::Constraint => bail!("principal name or email already in use"),
            }
        }
        Command::Passwd { name, password } => {
            let principal = load_principal(&store, &name).await?;
            let hash = credential_hash(&name, &cli.realm, &password);
            match store
                .principal_update(principal.id, &hash, &principal.email)
                .await?
            {
                Mutation::Done(()) => println!("password updated: {name}"),
                Mutation::Constraint => bail!("cannot update principal"),
            }
        }
        Command::Email { name, email } => {
            let principal = load_principal(&store, &name).await?;
            match store
                .principal_update(principal.id, &principal.hash, &email)
                .await?
            {
                Mutation::Done(()) => println!("email updated: {name}"),
                Mutation::Constraint => bail!("email already in use: {email}"),
            }
        }
        Command::Colnadd { name, url } => {
            if !kalends_core::validation::safe_path_segment(&url) {
                bail!("unsafe collection path: {url}");
            }
            let principal = load_principal(&store, &name).await?;
            match store.collection_create(principal.id, &url).await? {
                Mutation::Done(_) => println!("collection created: {url}"),
                Mutation::Constraint => bail!("collection already exists: {url}"),
            }
        }
        Command::Proxyadd { name, peer, write } => {
            let grantor = load_principal(&store, &name).await?;
            let delegate = load_principal(&store, &peer).await?;
            let bits = if write {
                kalends_core::ProxyBits::Write
            } else {
                kalends_core::ProxyBits::Read
            };
            match store.proxy_upsert(grantor.id, delegate.id, bits).await? {
                Mutation::Done(()) => println!("proxy granted: {peer} on {name}"),
                Mutation::Constraint => bail!("cannot grant proxy to {peer}"),
            }
        }
        Command::Proxydel { name, peer } => {
            let grantor = load_principal(&store, &name).await?;
            let delegate = load_principal(&store, &peer).await?;
            store.proxy_remove(grantor.id, delegate.id).await?;
            println!("proxy revoked: {peer} on {name}");
        }
        Command::Import {
            name,
            collection,
            file,
            url,
        } => {
            let principal = load_principal(&store, &name).await?;
            let Some(coln) = principal.collection_by_url(&collection) else {
                bail!("unknown collection: {collection}");
            };

            let data = std::fs::read(&file).with_context(|| format!("{}", file.display()))?;
            let filename = file.to_string_lossy().into_owned();
            let cal = Calendar::parse(&data, Some(&filename)).map_err(|e| anyhow::anyhow!("{e}"))?;

            let url = match url {
                Some(url) => url,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            if !kalends_core::validation::safe_path_segment(&url) {
                bail!("unsafe resource path: {url}");
            }

            let printed = String::from_utf8(cal.to_bytes()).context("printed calendar")?;
            match store.resource_create(coln.id, &url, &printed).await? {
                Mutation::Done(etag) => println!("resource created: {url} (etag {etag})"),
                Mutation::Constraint => bail!("resource already exists: {url}"),
            }
        }
    }

    Ok(())
}

async fn load_principal(store: &Store, name: &str) -> Result<kalends_core::Principal> {
    store
        .principal_load(name)
        .await?
        .with_context(|| format!("unknown principal: {name}"))
}
