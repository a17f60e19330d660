use clap::Parser;
use gba_client::{
    config::{
        resolve_backend_url, resolve_genome, resolve_log_dir, resolve_model_config,
        resolve_stdout_logging,
    },
    ChannelConfig, ChatOptions, ChatSession, GatewayConfig, HeadlessGenomeView, HeadlessSession,
    NavigationGateway, RealtimeChannel, TestConnectionStatus, ViewCapabilities,
};
use gba_core::{logging::init_logging, parse_locus, ConnectionState, NavigationResult};
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gba-client", about = "Chat with the genome browser assistant")]
struct Args {
    #[arg(long, default_value = "")]
    backend_url: String,
    #[arg(long, default_value = "")]
    api_base_url: String,
    #[arg(long, default_value = "")]
    api_key: String,
    #[arg(long, default_value = "")]
    model_name: String,
    #[arg(long, default_value = "")]
    genome: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 300)]
    settle_ms: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    Where,
    Goto(String),
    Test,
    Connect,
    Reset,
    History,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Chat(line.to_string()));
        };
        let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        Some(match name {
            "where" => Command::Where,
            "goto" => Command::Goto(arg.trim().to_string()),
            "test" => Command::Test,
            "connect" => Command::Connect,
            "reset" => Command::Reset,
            "history" => Command::History,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        })
    }
}

#[derive(Default)]
struct Printer {
    printed: usize,
    state: Option<ConnectionState>,
    test: Option<TestConnectionStatus>,
}

impl Printer {
    fn refresh(&mut self, session: &ChatSession) {
        let messages = session.messages();
        if messages.len() < self.printed {
            self.printed = 0;
        }
        for message in &messages[self.printed..] {
            if message.sender == gba_core::Role::Assistant {
                println!("assistant> {}", message.content);
            }
        }
        self.printed = messages.len();

        let state = session.connection_state();
        if self.state != Some(state) {
            println!("[connection: {state}]");
            self.state = Some(state);
        }
        let (test, detail) = session.test_status();
        if self.test != Some(test) && test != TestConnectionStatus::Idle {
            match (test, detail) {
                (TestConnectionStatus::Testing, _) => println!("[testing connection...]"),
                (status, Some(detail)) => println!("[connection test: {status:?}: {detail}]"),
                (status, None) => println!("[connection test: {status:?}]"),
            }
        }
        self.test = Some(test);
    }
}

fn print_result(result: &NavigationResult) {
    match (&result.location, &result.error) {
        (Some(location), _) if result.success => println!("[{}: {location}]", result.message),
        (_, Some(error)) => println!("[{}: {error}]", result.message),
        _ => println!("[{}]", result.message),
    }
}

fn print_help() {
    println!("commands: /where /goto <locus> /test /connect /reset /history /quit");
    println!("anything else is sent to the assistant");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_dir = resolve_log_dir(&args.log_dir);
    let _log_guard = init_logging("gba-client", &log_dir, resolve_stdout_logging(), args.debug);

    let url = resolve_backend_url(&args.backend_url)?;
    let preset = resolve_genome(&args.genome)?;
    let model_config = resolve_model_config(&args.api_base_url, &args.api_key, &args.model_name);

    let view = Arc::new(HeadlessGenomeView::from_preset(
        preset,
        ViewCapabilities::both(),
    ));
    let gateway = Arc::new(NavigationGateway::with_session(
        GatewayConfig {
            chromosome_format: Some(preset.chromosome_format),
            default_assembly: preset.assembly_name.to_string(),
            settle_delay: Duration::from_millis(args.settle_ms),
        },
        Arc::new(HeadlessSession::new(vec![view.clone()])),
    ));
    let channel = RealtimeChannel::new(ChannelConfig::new(url.clone()), gateway.clone());
    let mut session = ChatSession::new(channel, model_config, ChatOptions::default());
    info!(event = "client_start", url = %url, genome = preset.id, log_dir = %log_dir);

    println!("{} at {}; backend {url}", preset.name, preset.default_location);
    print_help();
    let _ = session.start().await;

    let mut printer = Printer::default();
    printer.refresh(&session);
    let mut revisions = session.subscribe();
    let mut regions = view.watch_regions();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = Command::parse(&line) else { continue };
                match command {
                    Command::Chat(text) => {
                        if let Err(err) = session.send_user_message(&text) {
                            info!(event = "chat_rejected", error = %err);
                        }
                    }
                    Command::Where => print_result(&gateway.current_location()),
                    Command::Goto(raw) => match parse_locus(&raw) {
                        Ok(locus) => {
                            let result = gateway
                                .navigate_to_location(&locus.ref_name, locus.start, locus.end)
                                .await;
                            print_result(&result);
                        }
                        Err(err) => println!("[cannot parse locus {raw:?}: {err}]"),
                    },
                    Command::Test => {
                        let _ = session.test_connection(&session.model_config());
                    }
                    Command::Connect => {
                        let _ = session.start().await;
                    }
                    Command::Reset => session.reset(),
                    Command::History => {
                        for message in session.messages() {
                            println!("{}> {}", message.sender, message.content);
                        }
                    }
                    Command::Help => print_help(),
                    Command::Quit => break,
                    Command::Unknown(name) => println!("[unknown command /{name}]"),
                }
                printer.refresh(&session);
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                printer.refresh(&session);
            }
            changed = regions.changed() => {
                if changed.is_err() {
                    break;
                }
                print_result(&gateway.current_location());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    info!(event = "client_stop");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repl_lines() {
        assert_eq!(Command::parse("   "), None);
        assert_eq!(
            Command::parse("Show me TP53"),
            Some(Command::Chat("Show me TP53".to_string()))
        );
        assert_eq!(
            Command::parse("/goto chr17:7661779..7687550"),
            Some(Command::Goto("chr17:7661779..7687550".to_string()))
        );
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(
            Command::parse("/zoom 2"),
            Some(Command::Unknown("zoom".to_string()))
        );
    }
}
