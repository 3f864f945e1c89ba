use dotenvy::dotenv;
use omni_chat_rs::bot::handlers::{self, Command};
use omni_chat_rs::bot::media_groups::MediaGroups;
use omni_chat_rs::bot::sessions::ChatStore;
use omni_chat_rs::config::Settings;
use omni_chat_rs::llm::gemini::GeminiClient;
use omni_chat_rs::llm::ChatBackend;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    api_key: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_key: Regex::new(r"key=[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .api_key
            .replace_all(&output, "key=[GEMINI_API_KEY]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // We return the original buffer length to satisfy the contract,
        // even if the redacted string length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    // Setup logging with redaction
    init_logging(patterns);

    info!("Starting Omni Telegram bot...");

    // Load settings
    let settings = init_settings();

    // Initialize the Gemini backend and the per-chat conversation store
    let backend: Arc<dyn ChatBackend> = Arc::new(GeminiClient::new(&settings));
    info!("Gemini client initialized (model: {}).", settings.model_name);

    let store = Arc::new(ChatStore::new(
        backend,
        settings.system_message.clone(),
        settings.default_temperature,
    ));
    let media_groups = Arc::new(MediaGroups::new());

    // Initialize Bot
    let bot = Bot::new(settings.telegram_token.clone());

    // Setup handlers
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, store, media_groups])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry().branch(
        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(
                dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo),
            )
            .branch(
                dptree::filter(|msg: Message| msg.sticker().is_some()).endpoint(handle_sticker),
            )
            .branch(
                dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice),
            )
            .branch(
                dptree::filter(|msg: Message| msg.audio().is_some()).endpoint(handle_audio),
            )
            .branch(
                dptree::filter(|msg: Message| {
                    msg.video().is_some() || msg.video_note().is_some()
                })
                .endpoint(handle_video),
            )
            .branch(
                dptree::filter(|msg: Message| msg.document().is_some()).endpoint(handle_document),
            )
            .branch(
                dptree::filter(|msg: Message| {
                    msg.text().is_some_and(|t| !t.starts_with('/'))
                })
                .endpoint(handle_text),
            ),
    )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    settings: Arc<Settings>,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(&bot, &msg, &settings, &store).await,
        Command::Clear => handlers::clear(&bot, &msg, &store).await,
        Command::Settemp(args) => handlers::settemp(&bot, &msg, &store, &args).await,
    };
    if let Err(e) = res {
        error!("Command error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::text(&bot, &msg, &store).await {
        error!("Text handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
    media_groups: Arc<MediaGroups>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::photo(&bot, &msg, &store, &media_groups).await {
        error!("Photo handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_sticker(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::sticker(&bot, &msg, &store).await {
        error!("Sticker handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_voice(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::voice(&bot, &msg, &store).await {
        error!("Voice handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_audio(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::audio(&bot, &msg, &store).await {
        error!("Audio handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}

async fn handle_video(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::video(&bot, &msg).await {
        error!("Video handler error in chat {}: {e:#}", msg.chat.id);
    }
    respond(())
}

async fn handle_document(
    bot: Bot,
    msg: Message,
    store: Arc<ChatStore>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::document(&bot, &msg, &store).await {
        error!("Document handler error in chat {}: {e:#}", msg.chat.id);
        handlers::report_error(&bot, msg.chat.id, &e).await;
    }
    respond(())
}
