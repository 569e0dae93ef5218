//! relaychat - terminal chat client for webhook-driven AI workflows
//!
//! Signs in against the hosted auth service, shows the stored conversation,
//! forwards each message to the workflow webhook and prints the AI reply
//! when the realtime channel delivers it.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod cli;
mod config;
mod conversation;
mod core;

use backend::auth::SignUp;
use backend::{AuthService, Endpoint, RealtimeListener, RestHistory, User, WebhookDispatcher};
use cli::{Command, TranscriptView, HELP};
use config::{models, ClientConfig, Config};
use conversation::{ConversationPreview, SessionId};
use crate::core::{ChatSession, SessionContext, SqliteStore};

type Input = Lines<BufReader<Stdin>>;

enum Exit {
    SignedOut,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaychat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let client = config.load_client_config()?;

    let store = Arc::new(SqliteStore::new(&config.state_db_path()).await?);
    let context = SessionContext::new(store);

    let endpoint = Endpoint::new(&config.supabase_url, &config.supabase_key);
    let auth = AuthService::new(endpoint.clone(), context.clone(), config.dev_credentials.clone());

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut auth_state = auth.subscribe();

    if let Err(e) = auth.restore().await {
        tracing::warn!("Session check error: {}", e);
    }

    // every sign-in and sign-out is observed through the auth state channel
    loop {
        let signed_in = auth_state.borrow_and_update().is_some();
        if !signed_in {
            if !authenticate(&auth, &mut input).await? {
                return Ok(());
            }
            continue;
        }

        let chat = ChatContext {
            config: &config,
            client: &client,
            endpoint: &endpoint,
            context: &context,
            auth: &auth,
        };
        match run_chat(chat, &mut auth_state, &mut input).await? {
            Exit::Quit => return Ok(()),
            Exit::SignedOut => println!("Signed out."),
        }
    }
}

/// Ask for credentials until sign-in succeeds; `false` when input ends
async fn authenticate(auth: &AuthService, input: &mut Input) -> anyhow::Result<bool> {
    loop {
        println!("Sign in (or type `signup` to create an account)");
        let Some(mut email) = prompt(input, "email: ").await? else {
            return Ok(false);
        };
        let registering = email == "signup";
        if registering {
            let Some(line) = prompt(input, "new account email: ").await? else {
                return Ok(false);
            };
            email = line;
        }
        let Some(password) = prompt(input, "password: ").await? else {
            return Ok(false);
        };

        if registering {
            match auth.sign_up(&email, &password).await {
                Ok(SignUp::SignedIn(_)) => return Ok(true),
                Ok(SignUp::ConfirmationRequired(_)) => {
                    println!("Registration successful. Please check your email for verification.");
                }
                Err(e) => println!("! Registration error: {}", e),
            }
            continue;
        }

        match auth.sign_in(&email, &password).await {
            Ok(_) => {
                println!("Welcome back!");
                return Ok(true);
            }
            Err(e) => println!("! Authentication error: {}", e),
        }
    }
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    use std::io::Write;
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}

/// Services a signed-in chat needs
struct ChatContext<'a> {
    config: &'a Config,
    client: &'a ClientConfig,
    endpoint: &'a Endpoint,
    context: &'a SessionContext,
    auth: &'a AuthService,
}

async fn run_chat(
    chat: ChatContext<'_>,
    auth_state: &mut watch::Receiver<Option<User>>,
    input: &mut Input,
) -> anyhow::Result<Exit> {
    let ChatContext {
        config,
        client,
        endpoint,
        context,
        auth,
    } = chat;

    if let Some(user) = auth.current_user() {
        println!("Signed in as {}. Type /help for commands.", user.email);
    }

    let history = Arc::new(RestHistory::new(endpoint.clone(), config.chat_table.clone()));
    let listener = Arc::new(RealtimeListener::new(
        endpoint.clone(),
        config.chat_table.clone(),
        Duration::from_secs(client.realtime.heartbeat_secs),
    ));
    let dispatcher = Arc::new(WebhookDispatcher::new(
        config.webhook_url.clone(),
        config.webhook_username.clone(),
        config.webhook_password.clone(),
    ));

    let mut session = ChatSession::open(
        context.clone(),
        history,
        listener,
        dispatcher,
        client.initial_model(),
    )
    .await?;

    let shortcuts = client.all_shortcuts();
    let mut view = TranscriptView::default();
    let mut listed: Vec<ConversationPreview> = Vec::new();
    let mut draft: Option<String> = None;

    println!("Model: {}", session.model().option().label);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    session.close();
                    return Ok(Exit::Quit);
                };
                // a prefilled shortcut is completed by the next line
                let line = match draft.take() {
                    Some(prefix) if !line.trim().is_empty() && !line.starts_with('/') => {
                        format!("{}{}", prefix, line)
                    }
                    _ => line,
                };

                match Command::parse(&line) {
                    Command::Send(text) => {
                        if session.is_pending() {
                            println!("… still waiting for the previous reply");
                        }
                        session.send(&text).await;
                    }
                    Command::New => session.new_conversation().await?,
                    Command::List => {
                        listed = session.conversations().await;
                        if listed.is_empty() {
                            println!("No conversations yet.");
                        }
                        for (i, conversation) in listed.iter().enumerate() {
                            let marker = if conversation.session_id == *session.active() { "*" } else { " " };
                            println!("{}{:>3}. {}", marker, i + 1, conversation.title);
                        }
                    }
                    Command::Open(target) => {
                        let session_id = match target.parse::<usize>() {
                            Ok(n) if n >= 1 && n <= listed.len() => listed[n - 1].session_id.clone(),
                            _ => SessionId::new(target),
                        };
                        session.select_conversation(session_id).await?;
                    }
                    Command::Refresh => session.refresh(),
                    Command::Models => {
                        for option in models::CATALOG {
                            let current = if option.value == session.model().version() { "*" } else { " " };
                            let mut tags = Vec::new();
                            if option.is_new {
                                tags.push("new");
                            }
                            if option.is_featured {
                                tags.push("featured");
                            }
                            println!(
                                "{} {:<10} {:<28} {} {}",
                                current,
                                option.provider.as_str(),
                                option.value,
                                option.label,
                                if tags.is_empty() { String::new() } else { format!("[{}]", tags.join(", ")) }
                            );
                        }
                    }
                    Command::Model(version) => {
                        session.set_model_version(&version);
                        if session.model().version() != version {
                            println!("! Unknown model {}, using {}", version, session.model().version());
                        }
                        println!("Model: {}", session.model().option().label);
                    }
                    Command::Provider(name) => match name.parse() {
                        Ok(provider) => {
                            session.set_provider(provider);
                            println!("Model: {}", session.model().option().label);
                        }
                        Err(e) => println!("! {}", e),
                    },
                    Command::Instructions(None) => {
                        if session.instructions().is_empty() {
                            println!("No additional instructions.");
                        } else {
                            println!("Additional instructions: {}", session.instructions());
                        }
                    }
                    Command::Instructions(Some(text)) => {
                        let text = if text == "-" { String::new() } else { text };
                        session.set_instructions(&text).await?;
                        println!("Additional instructions saved.");
                    }
                    Command::Shortcuts => {
                        for (i, shortcut) in shortcuts.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, shortcut.label);
                        }
                    }
                    Command::Shortcut(n) => match shortcuts.get(n - 1) {
                        Some(shortcut) => match session.apply_shortcut(shortcut) {
                            Some(template) => {
                                println!("{}", template);
                                draft = Some(template.to_string());
                            }
                            None => println!("… wait for the current reply first"),
                        },
                        None => println!("! No shortcut {}", n),
                    },
                    Command::SignOut => {
                        // success is picked up by the auth state branch
                        if let Err(e) = auth.sign_out().await {
                            tracing::error!("Error signing out: {}", e);
                            println!("! There was a problem signing you out.");
                        }
                    }
                    Command::Help => println!("{}", HELP),
                    Command::Quit => {
                        session.close();
                        return Ok(Exit::Quit);
                    }
                    Command::Empty => {}
                    Command::Unknown(command) => println!("! Unknown command {} (try /help)", command),
                }
            }
            Some(event) = session.next_event() => session.handle_event(event),
            changed = auth_state.changed() => {
                if changed.is_err() || auth_state.borrow_and_update().is_none() {
                    session.close();
                    return Ok(Exit::SignedOut);
                }
            }
        }

        session.drain_events();
        for notice in session.take_notices() {
            println!("! {}", notice);
        }
        print_updates(&mut session, &mut view);
    }
}

fn print_updates(session: &mut ChatSession, view: &mut TranscriptView) {
    if session.is_loading_history() {
        return;
    }
    for line in view.update(session.active(), session.messages()) {
        println!("{}", line);
    }
    if session.take_scroll_request() && session.is_pending() {
        println!("  … thinking");
    }
}
