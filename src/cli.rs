use clap::Parser;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use nearby::parser::{self, Command};
use nearby::server::{OP_COUNT, OP_FIRST_SEEN, OP_NEAREST, OP_RECORD, STATUS_ABSENT, STATUS_FOUND};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for the nearby protocol")]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    host: String,
}

fn main() {
    let args = Args::parse();
    print_banner();

    match TcpStream::connect(&args.host) {
        Ok(_) => println!("[\u{2713}] Connected to nearby at {}!", args.host),
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", args.host);
            println!("    Make sure to run 'cargo run --release --bin nearby' in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("nearby> ");
        if io::stdout().flush().is_err() { break; }
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&args.host, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.to_uppercase().starts_with("RECORD") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'RECORD 1234 51.5074 -0.1278'");
                } else if buffer.to_uppercase().starts_with("NEAR") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'NEAREST 1234 LIMIT 10'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   nearby CLI - who is near me?");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. RECORD:   RECORD <identity> <lat> <lng>");
    println!("2. NEAREST:  NEAREST <identity> [LIMIT k]");
    println!("3. WHEN:     WHEN <identity>");
    println!("4. COUNT:    COUNT");
    println!("5. EXIT:     Quit\n");
}

fn execute_command(host: &str, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => { print_help(); Ok(()) },
        Command::Record { identity, latitude, longitude } => perform_record(host, &identity, latitude, longitude),
        Command::Nearest { identity, limit } => perform_nearest(host, &identity, limit),
        Command::When { identity } => perform_when(host, &identity),
        Command::Count => perform_count(host),
        Command::Exit => Ok(()),
    }
}

// --- NETWORK HANDLERS ---

fn send(host: &str, op: u8, body: &[u8]) -> Result<TcpStream, String> {
    let mut stream = TcpStream::connect(host).map_err(|e| e.to_string())?;
    stream.write_all(&[op]).map_err(|e| e.to_string())?;
    stream.write_all(&(body.len() as u32).to_le_bytes()).map_err(|e| e.to_string())?;
    stream.write_all(body).map_err(|e| e.to_string())?;
    Ok(stream)
}

fn read_bytes<const N: usize>(stream: &mut TcpStream) -> Result<[u8; N], String> {
    let mut buf = [0u8; N];
    stream.read_exact(&mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Status byte of a read reply. A failed request becomes an error.
fn read_status(stream: &mut TcpStream) -> Result<u8, String> {
    match read_bytes::<1>(stream)? {
        [status @ (STATUS_ABSENT | STATUS_FOUND)] => Ok(status),
        _ => Err("Server failed to answer the request".into()),
    }
}

fn perform_record(host: &str, identity: &str, lat: f64, lng: f64) -> Result<(), String> {
    let mut body = Vec::with_capacity(16 + identity.len());
    body.extend_from_slice(&lat.to_le_bytes());
    body.extend_from_slice(&lng.to_le_bytes());
    body.extend_from_slice(identity.as_bytes());

    let mut stream = send(host, OP_RECORD, &body)?;
    let resp: [u8; 2] = read_bytes(&mut stream)?;
    match &resp {
        b"OK" => {
            println!("[\u{2713} OK] Recorded {} at ({}, {})", identity, lat, lng);
            Ok(())
        }
        b"CD" => {
            let allowed_at = u64::from_le_bytes(read_bytes(&mut stream)?);
            println!("[\u{23f1}\u{fe0f}] {} can change position again at {} (ms since epoch).", identity, allowed_at);
            Ok(())
        }
        _ => Err("Server Rejected Request".into()),
    }
}

fn perform_nearest(host: &str, identity: &str, limit: usize) -> Result<(), String> {
    let limit = u32::try_from(limit).unwrap_or(u32::MAX);
    let mut body = limit.to_le_bytes().to_vec();
    body.extend_from_slice(identity.as_bytes());

    let mut stream = send(host, OP_NEAREST, &body)?;
    match read_status(&mut stream)? {
        STATUS_FOUND => {}
        _ => {
            println!("[\u{2717}] {} has not recorded a position yet.", identity);
            return Ok(());
        }
    }

    let total = u64::from_le_bytes(read_bytes(&mut stream)?);
    let count = u32::from_le_bytes(read_bytes(&mut stream)?);

    println!("\nSearched {} people.", total);
    println!("People nearest to {}:", identity);
    for _ in 0..count {
        let id_len = u16::from_le_bytes(read_bytes(&mut stream)?) as usize;
        let mut id = vec![0u8; id_len];
        stream.read_exact(&mut id).map_err(|e| e.to_string())?;
        let dist = f64::from_le_bytes(read_bytes(&mut stream)?);
        let _lat = f64::from_le_bytes(read_bytes(&mut stream)?);
        let _lng = f64::from_le_bytes(read_bytes(&mut stream)?);

        // Rounded to 10 km so exact positions are not revealed
        let km = (dist / 10.0).round() * 10.0;
        println!("  \u{2022} {:>5} km away - {}", km, String::from_utf8_lossy(&id));
    }
    println!();
    Ok(())
}

fn perform_when(host: &str, identity: &str) -> Result<(), String> {
    let mut stream = send(host, OP_FIRST_SEEN, identity.as_bytes())?;
    if read_status(&mut stream)? == STATUS_FOUND {
        let ts = u64::from_le_bytes(read_bytes(&mut stream)?);
        println!("{} first recorded a position at {} (ms since epoch).", identity, ts);
    } else {
        println!("[\u{2717}] {} has not recorded a position yet.", identity);
    }
    Ok(())
}

fn perform_count(host: &str) -> Result<(), String> {
    let mut stream = send(host, OP_COUNT, &[])?;
    read_status(&mut stream)?;
    let total = u64::from_le_bytes(read_bytes(&mut stream)?);
    println!("{} positions recorded.", total);
    Ok(())
}
