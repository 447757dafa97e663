use std::io::{self, BufRead, Write};

use clap::Parser;
use reqwest::{Client, StatusCode};
use secret_exchange::parser::{self, Command};
use secret_exchange::server::{ErrorResponse, ExchangeRequest, ExchangeResponse, HealthResponse};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive client for the secret exchange", long_about = None)]
struct Args {
    /// Base URL of the exchange server.
    #[clap(long, env = "SECRET_EXCHANGE_URL", default_value = "http://127.0.0.1:8000")]
    server: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let base = args.server.trim_end_matches('/').to_string();
    let client = Client::new();

    print_banner();

    match health(&client, &base).await {
        Ok(records) => println!("[\u{2713}] Connected to {} ({} secrets stored)", base, records),
        Err(e) => {
            println!("[\u{2717}] Could not reach server at {}: {}", base, e);
            println!("    Make sure 'secret-exchange' is running.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("exchange> ");
        if io::stdout().flush().is_err() {
            break;
        }
        buffer.clear();

        match stdin.lock().read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&client, &base, cmd).await {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.trim_start().to_uppercase().starts_with("EXCHANGE") {
                    println!("    \u{2139}\u{fe0f}  Hint: Quote the secret: EXCHANGE \"my secret text\"");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   Secret Exchange CLI - give one, get one");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. EXCHANGE: EXCHANGE \"at least ten characters\"");
    println!("2. HEALTH:   Show server status");
    println!("3. EXIT:     Quit\n");
}

async fn execute_command(client: &Client, base: &str, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Health => {
            let records = health(client, base).await?;
            println!("[\u{2713} OK] {} secrets stored", records);
            Ok(())
        }
        Command::Exchange { secret } => perform_exchange(client, base, secret).await,
        Command::Exit => Ok(()),
    }
}

// --- NETWORK HANDLERS ---

async fn perform_exchange(client: &Client, base: &str, secret: String) -> Result<(), String> {
    let resp = client
        .post(format!("{}/exchange-secret", base))
        .json(&ExchangeRequest { secret })
        .send()
        .await
        .map_err(|e| e.to_string())?;

    match resp.status() {
        StatusCode::OK => {
            let body: ExchangeResponse = resp.json().await.map_err(|e| e.to_string())?;
            println!("[\u{2713} OK] You received: \"{}\"", body.secret);
            Ok(())
        }
        status => {
            let body: ErrorResponse = resp.json().await.map_err(|e| e.to_string())?;
            Err(format!("{} ({})", body.error, status.as_u16()))
        }
    }
}

async fn health(client: &Client, base: &str) -> Result<u64, String> {
    let resp = client
        .get(format!("{}/health", base))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("server answered {}", resp.status()));
    }
    let body: HealthResponse = resp.json().await.map_err(|e| e.to_string())?;
    Ok(body.records)
}
