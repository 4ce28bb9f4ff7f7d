//! Operator CLI for davstore.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use davstore_core::config::AppConfig;
use davstore_core::kind::KIND_METADATA_KEY;
use davstore_core::{CollectionKind, LogicalPath};
use davstore_metadata::{Node, Storage};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::collections::BTreeMap;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "davstorectl")]
#[command(about = "Operator CLI for davstore")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        long,
        env = "DAVSTORE_CONFIG",
        default_value = "config/davstore.toml",
        global = true
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a collection and any missing parents
    Mkcol {
        /// Collection path, e.g. /user/calendar
        path: String,
        /// Collection kind marker (VCALENDAR or VADDRESSBOOK)
        #[arg(long, value_parser = parse_kind)]
        tag: Option<CollectionKind>,
        /// Collection property as key=value (repeatable)
        #[arg(long = "prop", value_parser = parse_property)]
        props: Vec<(String, String)>,
    },
    /// List a collection or show an item
    Ls {
        path: String,
        /// 0 shows the node itself, anything greater also lists its children
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Print the current sync token of a collection and what changed since TOKEN
    Sync {
        path: String,
        #[arg(long, default_value = "")]
        token: String,
    },
    /// Remove deleted-item history past its retention
    Prune {
        /// Override the configured maximum token age
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Check the collection tree invariants
    Verify,
}

fn parse_kind(value: &str) -> Result<CollectionKind, String> {
    CollectionKind::from_marker(value)
        .ok_or_else(|| format!("unknown collection kind '{value}' (expected VCALENDAR or VADDRESSBOOK)"))
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("invalid property '{value}' (expected key=value)")),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("DAVSTORE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let store = davstore_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    Storage::open(store, &config.sync)
        .await
        .context("failed to open collection store")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Cli { config, command } = Cli::parse();
    let config = load_config(Path::new(&config))?;
    let storage = open_storage(&config).await?;

    match command {
        Commands::Mkcol { path, tag, props } => handle_mkcol(&storage, &path, tag, props).await,
        Commands::Ls { path, depth } => handle_ls(&storage, &path, depth).await,
        Commands::Sync { path, token } => handle_sync(&storage, &path, &token).await,
        Commands::Prune { max_age_secs } => handle_prune(&storage, max_age_secs).await,
        Commands::Verify => handle_verify(&storage).await,
    }
}

async fn handle_mkcol(
    storage: &Storage,
    path: &str,
    tag: Option<CollectionKind>,
    props: Vec<(String, String)>,
) -> Result<()> {
    let path = LogicalPath::parse(path);
    let mut metadata: BTreeMap<String, String> = props.into_iter().collect();
    if let Some(kind) = tag {
        metadata.insert(KIND_METADATA_KEY.to_string(), kind.marker().to_string());
    }

    let metadata = if metadata.is_empty() {
        None
    } else {
        // Setting properties replaces a collection's contents.
        if storage.find_collection(&path).await?.is_some() {
            anyhow::bail!("collection /{path} already exists");
        }
        Some(metadata)
    };

    let collection = storage
        .create_collection_path(&path, None, metadata)
        .await
        .with_context(|| format!("failed to create /{path}"))?;
    println!("{}\t/{}", collection.id, collection.path);
    Ok(())
}

async fn handle_ls(storage: &Storage, path: &str, depth: u32) -> Result<()> {
    let path = LogicalPath::parse(path);
    let nodes = storage
        .resolve(&path, depth)
        .await
        .with_context(|| format!("failed to resolve /{path}"))?;
    if nodes.is_empty() {
        anyhow::bail!("/{path}: not found");
    }
    for node in &nodes {
        println!("{}", format_node(node));
    }
    Ok(())
}

fn format_node(node: &Node) -> String {
    match node {
        Node::Collection(collection) => format!(
            "collection\t/{}\t{}",
            collection.path,
            collection.http_last_modified()
        ),
        Node::Item { path, item } => format!("item\t/{path}\t{}\t{}", item.data.len(), item.etag()),
    }
}

async fn handle_sync(storage: &Storage, path: &str, token: &str) -> Result<()> {
    let path = LogicalPath::parse(path);
    let collection = storage
        .find_collection(&path)
        .await?
        .ok_or_else(|| anyhow::anyhow!("/{path}: no such collection"))?;
    let result = storage
        .sync(collection.id, token)
        .await
        .with_context(|| format!("failed to sync /{path}"))?;
    println!("{}", result.token);
    for name in &result.changes {
        println!("{name}");
    }
    Ok(())
}

async fn handle_prune(storage: &Storage, max_age_secs: Option<u64>) -> Result<()> {
    let stats = match max_age_secs {
        Some(secs) => {
            if secs > davstore_core::MAX_TOKEN_AGE_LIMIT_SECS {
                anyhow::bail!(
                    "--max-age-secs {secs} exceeds maximum value {}",
                    davstore_core::MAX_TOKEN_AGE_LIMIT_SECS
                );
            }
            let secs = i64::try_from(secs).context("--max-age-secs is too large")?;
            storage
                .prune_older_than(time::Duration::seconds(secs))
                .await?
        }
        None => storage.prune_expired().await?,
    };
    println!("pruned {} history rows", stats.history_rows);
    Ok(())
}

async fn handle_verify(storage: &Storage) -> Result<()> {
    storage.health_check().await.context("health check failed")?;
    if !storage.verify().await? {
        anyhow::bail!("collection tree does not have exactly one root");
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use davstore_core::config::MetadataConfig;
    use uuid::Uuid;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_mkcol_with_tag_and_props() {
        let cli = Cli::try_parse_from([
            "davstorectl",
            "mkcol",
            "/user/calendar",
            "--tag",
            "VCALENDAR",
            "--prop",
            "D:displayname=Work",
            "--prop",
            "C:calendar-description=a=b",
        ])
        .unwrap();
        match cli.command {
            Commands::Mkcol { path, tag, props } => {
                assert_eq!(path, "/user/calendar");
                assert_eq!(tag, Some(CollectionKind::Calendar));
                assert_eq!(
                    props,
                    vec![
                        ("D:displayname".to_string(), "Work".to_string()),
                        ("C:calendar-description".to_string(), "a=b".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind_and_bad_property() {
        assert!(Cli::try_parse_from(["davstorectl", "mkcol", "/x", "--tag", "VTODO"]).is_err());
        assert!(Cli::try_parse_from(["davstorectl", "mkcol", "/x", "--prop", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["davstorectl", "mkcol", "/x", "--prop", "=v"]).is_err());
    }

    #[test]
    fn test_parse_ls_sync_prune_verify() {
        let cli = Cli::try_parse_from(["davstorectl", "ls", "/user", "--depth", "1"]).unwrap();
        assert!(matches!(cli.command, Commands::Ls { depth: 1, .. }));

        let cli = Cli::try_parse_from(["davstorectl", "sync", "/user/cal"]).unwrap();
        assert!(matches!(cli.command, Commands::Sync { ref token, .. } if token.is_empty()));

        let cli =
            Cli::try_parse_from(["davstorectl", "prune", "--max-age-secs", "60"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Prune {
                max_age_secs: Some(60)
            }
        ));

        let cli = Cli::try_parse_from([
            "davstorectl",
            "--config",
            "/etc/davstore.toml",
            "verify",
        ])
        .unwrap();
        assert_eq!(cli.config, "/etc/davstore.toml");
        assert!(matches!(cli.command, Commands::Verify));
    }

    #[tokio::test]
    async fn test_prune_rejects_age_past_limit() {
        let storage = open_storage(&AppConfig::for_testing()).await.unwrap();
        let err = handle_prune(&storage, Some(1_000_000_000_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--max-age-secs"));

        handle_prune(&storage, Some(davstore_core::MAX_TOKEN_AGE_LIMIT_SECS))
            .await
            .unwrap();
    }

    #[test]
    fn test_load_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("davstore.toml");
        std::fs::write(
            &path,
            r#"
[metadata]
type = "sqlite"
path = "/var/lib/davstore/store.db"

[sync]
max_token_age_secs = 3600
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        match config.metadata {
            MetadataConfig::Sqlite { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("/var/lib/davstore/store.db"));
            }
            other => panic!("unexpected metadata config {other:?}"),
        }
        assert_eq!(config.sync.max_token_age_secs, 3600);
    }

    #[test]
    fn test_load_config_rejects_incomplete_postgres() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("davstore.toml");
        std::fs::write(&path, "[metadata]\ntype = \"postgres\"\nhost = \"db\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_format_node() {
        let item = davstore_metadata::Item {
            id: Uuid::nil(),
            collection_id: Uuid::nil(),
            name: "a.ics".to_string(),
            data: b"abc".to_vec(),
            modified: time::OffsetDateTime::UNIX_EPOCH,
        };
        let node = Node::Item {
            path: LogicalPath::parse("/cal/a.ics"),
            item,
        };
        let line = format_node(&node);
        assert!(line.starts_with("item\t/cal/a.ics\t3\t\""));
    }
}
