use std::{io::Write, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, HttpGateway, QuizState, RegistryState, SessionError, SessionEvent,
    StudySession, UploadRequest, UploadState, FAILED_ANSWER_MESSAGE,
};
use shared::{domain::UserId, protocol::Quiz};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "smartstudy",
    about = "Terminal client for the SmartStudy document Q&A service"
)]
struct Args {
    /// Base URL of the study service; overrides smartstudy.toml and env.
    #[arg(long)]
    server_url: Option<String>,
    /// Identity to act as; overrides smartstudy.toml and env.
    #[arg(long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(user_id) = args.user_id {
        settings.user_id = user_id;
    }

    let base_url = Url::parse(&settings.server_url)
        .with_context(|| format!("invalid server url: {}", settings.server_url))?;
    let gateway = Arc::new(HttpGateway::new(
        base_url,
        Duration::from_secs(settings.request_timeout_secs),
    )?);
    let session = StudySession::new(gateway, UserId::new(settings.user_id.clone()));

    println!(
        "SmartStudy: {} as {}",
        settings.server_url, settings.user_id
    );
    print_help();

    if session.documents.refresh().await.is_ok() {
        print_documents(&session).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" || line == ":q" {
            break;
        } else if line == ":help" {
            print_help();
        } else if line == ":docs" {
            let _ = session.documents.refresh().await;
            print_documents(&session).await;
        } else if let Some(path) = line.strip_prefix(":upload ") {
            upload(&session, path.trim()).await;
        } else if let Some(filename) = line.strip_prefix(":delete ") {
            delete(&session, filename.trim()).await;
        } else if line == ":quiz" {
            run_quiz(&session, false).await;
        } else if line == ":retake" {
            run_quiz(&session, true).await;
        } else if let Some(query) = line.strip_prefix(":ask ") {
            ask_sync(&session, query.trim()).await;
        } else if line.starts_with(':') {
            println!("unknown command; :help lists them");
        } else {
            ask_streamed(&session, &line).await;
        }
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

fn print_help() {
    println!("  :upload <path>     upload a PDF");
    println!("  :docs              list your documents");
    println!("  :delete <name>     delete a document");
    println!("  :ask <question>    one-shot answer with sources");
    println!("  :quiz / :retake    generate or regenerate a quiz");
    println!("  :quit              exit");
    println!("anything else is asked as a streamed question");
}

async fn upload(session: &StudySession, path: &str) {
    let Some(filename) = Path::new(path).file_name().and_then(|name| name.to_str()) else {
        println!("cannot read a filename from '{path}'");
        return;
    };
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            println!("could not read {path}: {err}");
            return;
        }
    };
    match session
        .uploads
        .submit(UploadRequest {
            filename: filename.to_string(),
            bytes,
        })
        .await
    {
        Ok(()) => {
            if let UploadState::Succeeded { message } = session.uploads.state().await {
                println!("{message}");
            }
        }
        Err(err) => println!("{err}"),
    }
}

async fn delete(session: &StudySession, filename: &str) {
    match session.documents.delete(filename).await {
        Ok(()) => print_documents(session).await,
        Err(err) => println!("{err}"),
    }
}

async fn print_documents(session: &StudySession) {
    match session.documents.state().await {
        RegistryState::Loaded(documents) if documents.is_empty() => {
            println!("(no documents uploaded yet)")
        }
        RegistryState::Loaded(documents) => {
            println!("documents:");
            for doc in documents {
                println!("  - {}", doc.filename);
            }
        }
        RegistryState::Error(reason) => println!("could not list documents: {reason}"),
        RegistryState::Loading => println!("(still loading)"),
        RegistryState::Empty => println!("(not loaded yet)"),
    }
}

async fn ask_sync(session: &StudySession, query: &str) {
    match session.chat.ask(query).await {
        Ok(_) => {
            let transcript = session.chat.transcript().await;
            if let Some(turn) = transcript.last() {
                println!("{}", turn.text());
                if !turn.sources().is_empty() {
                    println!("sources:");
                    for source in turn.sources().iter().take(2) {
                        println!("  \"{source}\"");
                    }
                }
            }
        }
        Err(err) => println!("{err}"),
    }
}

/// Prints the answer as it streams by following transcript notifications;
/// `printed` tracks how many bytes of the growing turn are already on
/// screen.
async fn ask_streamed(session: &StudySession, query: &str) {
    let mut events = session.subscribe_events();
    let mut printed = 0usize;
    let ask = session.chat.ask_streaming(query);
    tokio::pin!(ask);
    loop {
        tokio::select! {
            result = &mut ask => {
                match result {
                    Ok(_) => {
                        if let Some(turn) = session.chat.transcript().await.last() {
                            let text = turn.text();
                            if text.len() > printed {
                                print!("{}", &text[printed..]);
                            }
                        }
                        println!();
                    }
                    Err(err) if matches!(err, SessionError::Validation(_) | SessionError::Busy { .. }) => {
                        println!("{err}");
                    }
                    Err(err) => {
                        println!();
                        println!("{FAILED_ANSWER_MESSAGE}");
                        tracing::debug!(error = %err, "streamed ask failed");
                    }
                }
                return;
            }
            event = events.recv() => {
                if matches!(event, Ok(SessionEvent::TranscriptUpdated)) {
                    if let Some(turn) = session.chat.transcript().await.last() {
                        if turn.is_streaming() {
                            let text = turn.text();
                            if text.len() > printed {
                                print!("{}", &text[printed..]);
                                let _ = std::io::stdout().flush();
                                printed = text.len();
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn run_quiz(session: &StudySession, retake: bool) {
    println!("Generating your quiz... This may take a moment.");
    let result = if retake {
        session.quiz.retake().await
    } else {
        session.quiz.generate().await
    };
    match result {
        Ok(quiz) => print_quiz(&quiz),
        Err(err) => match session.quiz.state().await {
            QuizState::Failed(reason) => println!("{reason}"),
            _ => println!("{err}"),
        },
    }
}

fn print_quiz(quiz: &Quiz) {
    for (index, item) in quiz.items.iter().enumerate() {
        println!("{}. {}", index + 1, item.question);
        for (choice_index, choice) in item.choices.iter().enumerate() {
            let marker = if Some(choice_index) == item.correct_index() {
                "*"
            } else {
                " "
            };
            println!("  {marker} {}) {}", choice_index + 1, choice);
        }
    }
}
