//! `moltis-wechat`: inspect a WeChat channel config and send messages through
//! a running Wechaty sidecar.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand},
    serde_json::Value,
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use {
    moltis_channels::{
        AccountDescription, ChannelOutbound, HostConfig, SendMediaRequest, SendTextRequest,
    },
    moltis_wechat::{
        BotRegistry, CHANNEL_ID, DEFAULT_SIDECAR_URL, SidecarBotFactory, WechatConfig, accounts,
        config, outbound::WechatOutbound, runtime::BotSettings,
    },
};

#[derive(Parser)]
#[command(name = "moltis-wechat", version, about = "WeChat channel tooling for moltis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the `channels.wechat` section of a host config file.
    Check {
        /// Host config, TOML or JSON.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List configured accounts as JSON.
    Accounts {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the JSON Schema of the `channels.wechat` section.
    Schema,

    /// Start an account's bot and send one message.
    Send {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        account: Option<String>,

        /// Recipient, e.g. `user:12345` or a raw contact id.
        #[arg(long)]
        to: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        media_url: Option<String>,

        #[arg(long, env = "MOLTIS_WECHAT_SIDECAR_URL", default_value = DEFAULT_SIDECAR_URL)]
        sidecar_url: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Read a host config file. `.toml` files are parsed as TOML, anything else as JSON.
fn load_host_config(path: &Path) -> Result<HostConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)
            .with_context(|| format!("invalid TOML in {}", path.display()))?,
        _ => serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in {}", path.display()))?,
    };
    Ok(HostConfig::new(raw))
}

/// Validate the wechat section. A missing section is an error here.
fn check(cfg: &HostConfig) -> Result<WechatConfig> {
    match WechatConfig::from_host(cfg)? {
        Some(section) => Ok(section),
        None => bail!("no channels.{CHANNEL_ID} section"),
    }
}

fn describe_accounts(cfg: &HostConfig) -> Vec<AccountDescription> {
    accounts::list_account_ids(cfg)
        .iter()
        .map(|id| accounts::resolve_account(cfg, Some(id.as_str())).describe())
        .collect()
}

async fn send(
    cfg: &HostConfig,
    account: Option<String>,
    to: String,
    text: Option<String>,
    media_url: Option<String>,
    sidecar_url: String,
) -> Result<()> {
    if text.is_none() && media_url.is_none() {
        bail!("nothing to send: pass --text and/or --media-url");
    }
    check(cfg)?;

    let account = accounts::resolve_account(cfg, account.as_deref());
    if !account.enabled {
        bail!("account {} is disabled", account.account_id);
    }

    let registry = Arc::new(BotRegistry::new(Arc::new(SidecarBotFactory::new(
        sidecar_url,
    ))));
    registry
        .create_wechat_bot(&account.account_id, BotSettings::from(&account.config))
        .await?;
    let outbound = WechatOutbound::new(Arc::clone(&registry), reqwest::Client::new());

    let account_id = Some(account.account_id.clone());
    let result = match media_url {
        Some(media_url) => {
            outbound
                .send_media(SendMediaRequest {
                    to,
                    text,
                    media_url: Some(media_url),
                    account_id,
                })
                .await
        },
        None => {
            outbound
                .send_text(SendTextRequest {
                    to,
                    text: text.unwrap_or_default(),
                    account_id,
                })
                .await
        },
    };

    registry.stop_all_wechat_bots().await?;
    let result = result?;
    info!(to = %result.target, "message sent");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let cfg = load_host_config(&config)?;
            check(&cfg)?;
            let ids = accounts::list_account_ids(&cfg);
            println!("ok: {} account(s): {}", ids.len(), ids.join(", "));
        },
        Commands::Accounts { config } => {
            let cfg = load_host_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&describe_accounts(&cfg))?);
        },
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&config::json_schema())?);
        },
        Commands::Send {
            config,
            account,
            to,
            text,
            media_url,
            sidecar_url,
        } => {
            let cfg = load_host_config(&config)?;
            send(&cfg, account, to, text, media_url, sidecar_url).await?;
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json, std::io::Write};

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_toml_config() {
        let file = write_config(
            ".toml",
            r#"
[channels.wechat]
name = "Butler"

[channels.wechat.accounts.work]
token = "t"
"#,
        );
        let cfg = load_host_config(file.path()).unwrap();
        let section = check(&cfg).unwrap();
        assert_eq!(section.name.as_deref(), Some("Butler"));
        assert_eq!(accounts::list_account_ids(&cfg), vec!["work"]);
    }

    #[test]
    fn loads_json_config() {
        let file = write_config(".json", r#"{ "channels": { "wechat": { "puppet": "p" } } }"#);
        let cfg = load_host_config(file.path()).unwrap();
        check(&cfg).unwrap();
        let described = describe_accounts(&cfg);
        assert_eq!(described[0].account_id, "default");
        assert_eq!(described[0].name, "WeChat Bot");
        assert!(described[0].configured);
    }

    #[test]
    fn check_rejects_unknown_keys_and_missing_section() {
        let bad = write_config(".json", r#"{ "channels": { "wechat": { "tokne": "x" } } }"#);
        assert!(check(&load_host_config(bad.path()).unwrap()).is_err());

        let empty = write_config(".json", "{}");
        let err = check(&load_host_config(empty.path()).unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "no channels.wechat section");
    }

    #[test]
    fn unreadable_config_reports_path() {
        let file = write_config(".toml", "not = [valid");
        let err = load_host_config(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("invalid TOML in"));
    }

    #[tokio::test]
    async fn send_requires_content() {
        let cfg = HostConfig::new(json!({ "channels": { "wechat": {} } }));
        let err = send(&cfg, None, "user:1".into(), None, None, DEFAULT_SIDECAR_URL.into())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("nothing to send"));
    }

    #[tokio::test]
    async fn send_refuses_disabled_account() {
        let cfg = HostConfig::new(json!({ "channels": { "wechat": { "enabled": false } } }));
        let err = send(
            &cfg,
            None,
            "user:1".into(),
            Some("hi".into()),
            None,
            DEFAULT_SIDECAR_URL.into(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "account default is disabled");
    }
}
