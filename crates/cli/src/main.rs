use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use kbchat::api::llm_providers::SetApiKey;
use kbchat::api::users::{UserForm, UserQuery};
use kbchat::api::{ApiClient, Reply};
use kbchat::auth::{parse_claims, UserSession};
use kbchat::chat::{
    conversation_channel, transcript_from_conversation, ChatError, ChatSession, CompletionOptions,
    ConversationRef, RemoteProvisioner, RemoteSender, SubmitOutcome,
};
use kbchat::config::Config;
use kbchat::prefs::PrefStore;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(about = "Knowledge-base chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default config file (server URLs, token, chat defaults).
    Init {
        /// Config file path (default: KBCHAT_CONFIG_PATH or ~/.kbchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat interactively. The first message creates a conversation unless one is given.
    Chat {
        /// Config file path (default: KBCHAT_CONFIG_PATH or ~/.kbchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Assistant to create new conversations under (default: chat.dialogId).
        #[arg(long, value_name = "ID")]
        dialog: Option<String>,

        /// Existing conversation id to continue.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },

    /// Read or write saved chat preferences.
    Prefs {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: PrefsAction,
    },

    /// List models available for chat; the selected one is marked.
    Models {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List knowledge bases available for chat; selected ones are marked.
    Kbs {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List assistants (dialogs) on the chat backend.
    Dialogs {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List, rename, or delete conversations of an assistant.
    Conversations {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Assistant id (default: chat.dialogId).
        #[arg(long, value_name = "ID")]
        dialog: Option<String>,

        #[command(subcommand)]
        action: Option<ConversationsAction>,
    },

    /// Manage users on the management backend.
    Users {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: UsersAction,
    },

    /// Manage LLM providers on the management backend.
    Providers {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: ProvidersAction,
    },

    /// Save a bearer token for later commands.
    Login {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        token: String,
    },

    /// Forget the saved token.
    Logout {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Show the signed-in user, roles, and token expiry.
    Whoami {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    Get { key: PrefKey },
    Set { key: PrefKey, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum PrefKey {
    /// Selected model name ("" for the assistant default)
    Model,
    /// Selected knowledge bases, comma-separated
    Kbs,
    /// Knowledge retrieval on or off (true/false)
    Knowledge,
    FontSize,
}

#[derive(Subcommand)]
enum ConversationsAction {
    Rename { id: String, name: String },
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// One page of users, newest first.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    Create {
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    Update {
        id: String,
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    Delete { id: String },
}

#[derive(Subcommand)]
enum ProvidersAction {
    /// Provider factories the server supports.
    Factories,
    /// Configured models grouped by factory.
    Mine,
    /// All models with availability, optionally filtered by type (chat, embedding, ...).
    List {
        #[arg(long, value_name = "TYPE")]
        model_type: Option<String>,
    },
    /// Set a factory's API key, importing its predefined models.
    SetKey {
        factory: String,
        api_key: String,
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
    },
    /// Delete one model, or the whole factory when no model is given.
    Delete {
        factory: String,
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("kbchat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Chat {
            config,
            dialog,
            conversation,
        }) => run_chat(config, dialog, conversation).await,
        Some(Commands::Prefs { config, action }) => run_prefs(config, action),
        Some(Commands::Models { config }) => run_models(config).await,
        Some(Commands::Kbs { config }) => run_kbs(config).await,
        Some(Commands::Dialogs { config }) => run_dialogs(config).await,
        Some(Commands::Conversations {
            config,
            dialog,
            action,
        }) => run_conversations(config, dialog, action).await,
        Some(Commands::Users { config, action }) => run_users(config, action).await,
        Some(Commands::Providers { config, action }) => run_providers(config, action).await,
        Some(Commands::Login { config, token }) => run_login(config, &token),
        Some(Commands::Logout { config }) => run_logout(config),
        Some(Commands::Whoami { config }) => run_whoami(config).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Loaded config plus the preference store and signed-in state it points at.
struct AppContext {
    config: Config,
    prefs: PrefStore,
    user: UserSession,
}

impl AppContext {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, path) = kbchat::config::load_config(config_path)?;
        let prefs = PrefStore::open(kbchat::config::resolve_prefs_path(&config, &path));
        let user = UserSession::hydrate(&prefs);
        Ok(Self {
            config,
            prefs,
            user,
        })
    }

    /// KBCHAT_TOKEN or config token first, then the token saved by `login`.
    fn token(&self) -> Option<String> {
        kbchat::config::resolve_token(&self.config)
            .or_else(|| Some(self.user.token.clone()).filter(|t| !t.is_empty()))
    }

    fn chat_api(&self) -> ApiClient {
        ApiClient::new(&self.config.server.chat_base_url, self.token())
    }

    fn management_api(&self) -> ApiClient {
        ApiClient::new(&self.config.server.management_base_url, self.token())
    }

    fn dialog_id(&self, arg: Option<String>) -> anyhow::Result<String> {
        match arg.or_else(|| self.config.chat.dialog_id.clone()) {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => bail!("no assistant configured: pass --dialog or set chat.dialogId"),
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(kbchat::config::default_config_path);
    let dir = kbchat::config::init_config(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    dialog: Option<String>,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let api = ctx.chat_api();

    let (initial, history) = match &conversation {
        Some(id) => {
            let c = api
                .get_conversation(id)
                .await
                .with_context(|| format!("loading conversation {}", id))?;
            (ConversationRef::durable(c.id.clone(), false), transcript_from_conversation(&c))
        }
        None => (ConversationRef::default(), Vec::new()),
    };
    let dialog_id = match conversation {
        Some(_) => dialog.unwrap_or_default(),
        None => ctx.dialog_id(dialog)?,
    };

    let (publisher, rx) = conversation_channel(initial);
    let provisioner = RemoteProvisioner::new(
        api.clone(),
        dialog_id,
        ctx.config.chat.conversation_name.clone(),
        publisher.clone(),
    );
    let sender = RemoteSender::new(api, CompletionOptions::from_prefs(&ctx.prefs));
    let mut session = ChatSession::new(sender, provisioner, rx);
    for entry in &history {
        println!("[{:?}] {}", entry.message.role, entry.message.content.trim());
    }
    session.switch_conversation(history);

    // Ctrl-C stops a streaming answer; when nothing is streaming it exits.
    let stop = session.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !stop.stop() {
                std::process::exit(130);
            }
        }
    });

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut print_chunk = |s: &str| {
        let mut out = std::io::stdout();
        let _ = out.write_all(s.as_bytes());
        let _ = out.flush();
    };

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if let Some(doc) = input.strip_prefix("/attach ") {
            session.draft_mut().attach_document(doc.trim());
            println!("attached {}", doc.trim());
            continue;
        }
        if input.eq_ignore_ascii_case("/new") {
            publisher.publish(ConversationRef::default());
            session.switch_conversation(Vec::new());
            println!("started a new conversation");
            continue;
        }
        if input.eq_ignore_ascii_case("/history") {
            for entry in session.transcript() {
                let id = entry.message.id.as_deref().unwrap_or("-");
                println!("{}  [{:?}] {}", id, entry.message.role, entry.message.content.trim());
            }
            continue;
        }
        if let Some(id) = input.strip_prefix("/rm ") {
            let removed = session.remove_message(id.trim());
            if removed.is_empty() {
                println!("no message {}", id.trim());
            } else {
                println!("removed {}", removed.join(", "));
            }
            continue;
        }

        let result = if input.eq_ignore_ascii_case("/regen") {
            session.regenerate_last(&mut print_chunk).await
        } else {
            if input.eq_ignore_ascii_case("/retry") {
                if session.draft().is_blank() {
                    println!("nothing to retry");
                    continue;
                }
            } else {
                session.draft_mut().set_text(input);
            }
            match session.submit_draft(&mut print_chunk).await {
                Ok(SubmitOutcome::Sent(reply)) => Ok(Some(reply)),
                Ok(SubmitOutcome::Deferred) => session.drive_pending(&mut print_chunk).await,
                Ok(SubmitOutcome::Ignored) => Ok(None),
                Err(e) => Err(e),
            }
        };
        println!();
        match result {
            Ok(Some(reply)) => print_citations(&reply),
            Ok(None) => {}
            Err(ChatError::Cancelled) => println!("(stopped)"),
            Err(e @ ChatError::Provision(_)) => {
                session.abandon_pending();
                eprintln!("chat error: {}", e);
            }
            Err(e) => eprintln!("chat error: {} (draft kept, /retry to send it again)", e),
        }
    }

    Ok(())
}

fn print_citations(reply: &Reply) {
    for (i, chunk) in reply.reference.chunks.iter().enumerate() {
        match chunk.similarity_percent() {
            Some(p) => println!("  [{}] {} ({})", i + 1, chunk.document_name, p),
            None => println!("  [{}] {}", i + 1, chunk.document_name),
        }
    }
}

fn run_prefs(config_path: Option<PathBuf>, action: PrefsAction) -> anyhow::Result<()> {
    let mut ctx = AppContext::load(config_path)?;
    let prefs = &mut ctx.prefs;
    match action {
        PrefsAction::Get { key } => match key {
            PrefKey::Model => println!("{}", prefs.selected_model()),
            PrefKey::Kbs => println!("{}", prefs.selected_kbs().join(",")),
            PrefKey::Knowledge => println!("{}", prefs.knowledge_enabled()),
            PrefKey::FontSize => println!("{}", prefs.font_size()),
        },
        PrefsAction::Set { key, value } => match key {
            PrefKey::Model => prefs.set_selected_model(value.trim())?,
            PrefKey::Kbs => {
                let kbs: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                prefs.set_selected_kbs(&kbs)?
            }
            PrefKey::Knowledge => {
                let enabled: bool = value
                    .trim()
                    .parse()
                    .with_context(|| format!("expected true or false, got {:?}", value))?;
                prefs.set_knowledge_enabled(enabled)?
            }
            PrefKey::FontSize => {
                let size: u32 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("expected a font size, got {:?}", value))?;
                prefs.set_font_size(size)?
            }
        },
    }
    Ok(())
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let selected = ctx.prefs.selected_model();
    for m in ctx.chat_api().available_models().await? {
        let mark = if m.llm_name == selected { "*" } else { " " };
        println!("{} {}  {}  {}", mark, m.llm_name, m.llm_factory, m.model_type);
    }
    Ok(())
}

async fn run_kbs(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let selected = ctx.prefs.selected_kbs();
    if !ctx.prefs.knowledge_enabled() {
        println!("(knowledge retrieval is off)");
    }
    for kb in ctx.chat_api().available_knowledgebases().await? {
        let mark = if selected.contains(&kb.id) { "*" } else { " " };
        println!("{} {}  {}  ({} docs)", mark, kb.id, kb.name, kb.doc_num);
    }
    Ok(())
}

async fn run_dialogs(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    for d in ctx.chat_api().list_dialogs().await? {
        println!("{}  {}  {}", d.id, d.name, d.description.unwrap_or_default());
    }
    Ok(())
}

async fn run_conversations(
    config_path: Option<PathBuf>,
    dialog: Option<String>,
    action: Option<ConversationsAction>,
) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let api = ctx.chat_api();
    match action {
        None => {
            let dialog_id = ctx.dialog_id(dialog)?;
            for c in api.list_conversations(&dialog_id).await? {
                let updated = c
                    .updated_at()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}  {}  {}", c.id, updated, c.name);
            }
        }
        Some(ConversationsAction::Rename { id, name }) => {
            let c = api.rename_conversation(&id, &name).await?;
            println!("renamed {} to {}", c.id, c.name);
        }
        Some(ConversationsAction::Delete { ids }) => {
            let dialog_id = ctx.dialog_id(dialog)?;
            println!("{}", api.delete_conversations(&dialog_id, &ids).await?);
        }
    }
    Ok(())
}

async fn run_users(config_path: Option<PathBuf>, action: UsersAction) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let api = ctx.management_api();
    match action {
        UsersAction::List {
            page,
            size,
            username,
            email,
        } => {
            let query = UserQuery {
                current_page: page,
                size,
                username,
                email,
                ..Default::default()
            };
            let result = api.list_users(&query).await?;
            for u in &result.list {
                println!("{}  {}  {}  {}", u.id, u.username, u.email, u.create_time);
            }
            println!("({} of {} users)", result.list.len(), result.total);
        }
        UsersAction::Create {
            username,
            email,
            password,
        } => {
            let form = UserForm {
                username,
                email,
                password,
                ..Default::default()
            };
            println!("{}", api.create_user(&form).await?);
        }
        UsersAction::Update {
            id,
            username,
            email,
            password,
        } => {
            let form = UserForm {
                username,
                email,
                password,
                ..Default::default()
            };
            println!("{}", api.update_user(&id, &form).await?);
        }
        UsersAction::Delete { id } => println!("{}", api.delete_user(&id).await?),
    }
    Ok(())
}

async fn run_providers(config_path: Option<PathBuf>, action: ProvidersAction) -> anyhow::Result<()> {
    let ctx = AppContext::load(config_path)?;
    let api = ctx.management_api();
    match action {
        ProvidersAction::Factories => {
            for f in api.llm_factories().await? {
                println!("{}  [{}]", f.name, f.model_types.join(","));
            }
        }
        ProvidersAction::Mine => {
            for (factory, group) in api.my_llms().await? {
                println!("{}", factory);
                for m in group.llm {
                    println!("  {} ({}, {} tokens used)", m.name, m.typ, m.used_token);
                }
            }
        }
        ProvidersAction::List { model_type } => {
            for (factory, items) in api.list_llms(model_type.as_deref()).await? {
                println!("{}", factory);
                for m in items {
                    let mark = if m.available { "+" } else { "-" };
                    println!("  {} {} ({})", mark, m.llm_name, m.model_type);
                }
            }
        }
        ProvidersAction::SetKey {
            factory,
            api_key,
            base_url,
        } => {
            let message = api
                .set_api_key(&SetApiKey {
                    llm_factory: factory,
                    api_key,
                    base_url,
                })
                .await?;
            println!("{}", message);
        }
        ProvidersAction::Delete { factory, model } => {
            let message = match model {
                Some(m) => api.delete_llm(&factory, &m).await?,
                None => api.delete_factory(&factory).await?,
            };
            println!("{}", message);
        }
    }
    Ok(())
}

fn run_login(config_path: Option<PathBuf>, token: &str) -> anyhow::Result<()> {
    let mut ctx = AppContext::load(config_path)?;
    ctx.user.set_token(&mut ctx.prefs, token)?;
    println!("token saved to {}", ctx.prefs.path().display());
    Ok(())
}

fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut ctx = AppContext::load(config_path)?;
    ctx.user.logout(&mut ctx.prefs)?;
    println!("signed out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut ctx = AppContext::load(config_path)?;
    let Some(token) = ctx.token() else {
        bail!("not signed in: run `kbchat login <token>` or set KBCHAT_TOKEN");
    };
    if let Ok(claims) = parse_claims(&token) {
        if let Some(exp) = claims.expires_at() {
            println!("token expires {}", exp.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    let info = ctx.management_api().current_user().await?;
    ctx.user.apply_user_info(&info);
    println!("{} ({})", ctx.user.username, ctx.user.roles.join(", "));
    if ctx.user.is_admin() {
        println!("administrator");
    }
    Ok(())
}
