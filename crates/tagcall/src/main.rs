//! A simple program demonstrates how to use `tagcall` as a library.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::pin::pin;
use std::process::ExitCode;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tagcall::core::conversation::{Message, MessageId, Role};
use tagcall::core::{AgentStage, Markup, Parser};
use tagcall::{SessionBuilder, Settings};
use tagcall_openai_model::OpenAIProvider;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let config = match settings.openai_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}, set the TAGCALL_MODEL environment variable");
            return ExitCode::FAILURE;
        }
    };
    debug!("using engine: {config:?}");

    let mut session = match SessionBuilder::with_model_provider(
        OpenAIProvider::new(config),
    )
    .with_settings(settings)
    .build()
    {
        Ok(session) => session,
        Err(err) => {
            eprintln!("cannot start the session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/reset" {
            if let Err(err) = session.reset() {
                eprintln!("{}", err.bright_red());
            }
            continue;
        }

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let options = session.run_options().on_engine_ready(move || {
            ready_tx.send(()).ok();
        });
        let Some(mut messages) = session.subscribe_messages() else {
            break;
        };
        let mut stage = session.subscribe_stage();
        let mut printer = StreamPrinter::default();
        let mut spinner = Some(new_spinner(&progress_style));

        let mut run = pin!(session.send_message_with(line, options));
        let result = loop {
            select! {
                result = &mut run => break result,
                Some(()) = ready_rx.recv() => {
                    if let Some(spinner) = spinner.take() {
                        spinner.finish_and_clear();
                    }
                }
                Ok(()) = messages.changed() => {
                    let snapshot = messages.borrow_and_update();
                    // The printer catches up on the next change.
                    if spinner.is_none() {
                        printer.update(&snapshot);
                    }
                }
                Ok(()) = stage.changed() => {
                    let current = *stage.borrow_and_update();
                    if let AgentStage::Dispatching { calls, .. } = current {
                        printer.finish();
                        let bar = BAR_CHAR.bright_yellow();
                        println!("{bar}🔧 Running {calls} tool call(s)...");
                        spinner = Some(new_spinner(&progress_style));
                    }
                }
            }
        };

        if let Some(spinner) = spinner.take() {
            spinner.finish_and_clear();
        }
        printer.update(&messages.borrow());
        printer.finish();
        match result {
            Ok(outcome) if outcome.is_fallback => {
                let bar = BAR_CHAR.bright_cyan();
                println!("{bar}🤖 {}", outcome.answer.yellow());
            }
            Ok(outcome) => {
                debug!(
                    "answered in {} rounds with {} tool calls",
                    outcome.rounds,
                    outcome.executed_calls.len()
                );
            }
            Err(err) => {
                eprintln!("{}", err.bright_red());
            }
        }
        println!();
    }
    ExitCode::SUCCESS
}

fn new_spinner(style: &ProgressStyle) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(style.clone());
    spinner.set_message("🤔 Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Prints assistant messages as they stream in, call blocks left out.
struct StreamPrinter {
    parser: Parser,
    current: Option<MessageId>,
    printed: usize,
}

impl Default for StreamPrinter {
    fn default() -> Self {
        Self {
            parser: Parser::new(Markup::default()),
            current: None,
            printed: 0,
        }
    }
}

impl StreamPrinter {
    fn update(&mut self, messages: &[Message]) {
        let Some(msg) = messages.last() else {
            return;
        };
        if msg.role() != Role::Assistant {
            return;
        }
        if self.current != Some(msg.id()) {
            self.finish();
            self.current = Some(msg.id());
            self.printed = 0;
        }

        let clean_text = self.parser.parse(msg.content()).clean_text;
        // Hold back what may become an opening token.
        let open = self.parser.markup().open;
        let visible = match clean_text.rfind('<') {
            Some(idx) if open.starts_with(&clean_text[idx..]) => {
                &clean_text[..idx]
            }
            _ => clean_text.as_str(),
        };
        if visible.len() <= self.printed
            || !visible.is_char_boundary(self.printed)
        {
            return;
        }
        if self.printed == 0 {
            print!("{}🤖 ", BAR_CHAR.bright_cyan());
        }
        print!("{}", (&visible[self.printed..]).bright_white());
        std::io::stdout().flush().ok();
        self.printed = visible.len();
    }

    fn finish(&mut self) {
        if self.printed > 0 {
            println!();
        }
        self.printed = 0;
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
