//! meshwork-admin CLI tool
//!
//! Manages node credentials and SV rows on a running meshwork-node, and
//! signs pings offline for testing.
//!
//! Usage:
//!   meshwork-admin register-node <node_id> [hmac|ed25519] [key]
//!   meshwork-admin revoke-node <node_id>
//!   meshwork-admin list-nodes
//!   meshwork-admin sv-get <node_id>
//!   meshwork-admin sv-bump-streak <node_id> [by]
//!   meshwork-admin prune-nonces
//!   meshwork-admin ping
//!   meshwork-admin keygen [hmac|ed25519]
//!   meshwork-admin sign <node_id> <hmac|ed25519> <key> [--sticker <id>] [--at <lat>,<lon>]

use aesc_meshwork::admin_socket::{default_socket_path, AdminCommand, AdminResponse};
use aesc_sign::{generate_signing_key, parse_signing_key, PingBuilder, Scheme, Secret};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::exit;

fn print_usage() {
    eprintln!("meshwork-admin - Manage Meshwork node credentials and SV");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  meshwork-admin register-node <node_id> [scheme] [key]  Register a node (hmac secret generated if no key)");
    eprintln!("  meshwork-admin revoke-node <node_id>                  Remove a node credential");
    eprintln!("  meshwork-admin list-nodes                             List registered nodes");
    eprintln!("  meshwork-admin sv-get <node_id>                       Show a node's SV");
    eprintln!("  meshwork-admin sv-bump-streak <node_id> [by]          Extend a node's streak");
    eprintln!("  meshwork-admin prune-nonces                           Drop expired nonces");
    eprintln!("  meshwork-admin ping                                   Check if daemon is running");
    eprintln!();
    eprintln!("Offline:");
    eprintln!("  meshwork-admin keygen [hmac|ed25519]                  Generate a key");
    eprintln!("  meshwork-admin sign <node_id> <scheme> <key> [--sticker <id>] [--at <lat>,<lon>]");
    eprintln!("                                                        Print a signed ping as JSON");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MESHWORK_ADMIN_SOCKET  Path to admin socket (default: $MESHWORK_DATA_DIR/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("MESHWORK_ADMIN_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_socket_path())
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to meshwork-node at {:?}: {}\n\
             Is the meshwork-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    exit(1);
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> &'a str {
    match args.get(index) {
        Some(value) => value,
        None => fail(format!("{} requires {}", args[1], what)),
    }
}

fn parse_scheme(raw: &str) -> Scheme {
    raw.parse().unwrap_or_else(|e| fail(e))
}

fn keygen(scheme: Scheme) {
    match scheme {
        Scheme::Hmac => println!("secret: {}", Secret::generate().to_prefixed_hex()),
        Scheme::Ed25519 => {
            let key = generate_signing_key();
            println!("seed:       {}", hex::encode(key.to_bytes()));
            println!("public_key: {}", hex::encode(key.verifying_key().to_bytes()));
        }
    }
}

fn sign(args: &[String]) {
    let node_id = arg(args, 2, "a node_id");
    let scheme = parse_scheme(arg(args, 3, "a scheme"));
    let key = arg(args, 4, "a key");

    let mut builder = PingBuilder::new(node_id);
    let mut rest = args[5..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .unwrap_or_else(|| fail(format!("{flag} requires a value")));
        match flag.as_str() {
            "--sticker" => builder = builder.sticker(value.clone()),
            "--at" => {
                let (lat, lon): (f64, f64) = value
                    .split_once(',')
                    .and_then(|(lat, lon)| Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?)))
                    .unwrap_or_else(|| fail("--at expects <lat>,<lon>"));
                builder = builder.location(lat, lon);
            }
            other => fail(format!("unknown option: {other}")),
        }
    }

    let signed = match scheme {
        Scheme::Hmac => Secret::parse(key).and_then(|secret| builder.sign_hmac(&secret)),
        Scheme::Ed25519 => parse_signing_key(key).and_then(|key| builder.sign_ed25519(&key)),
    };
    match signed.map(|ping| serde_json::to_string_pretty(&ping)) {
        Ok(Ok(json)) => println!("{json}"),
        Ok(Err(e)) => fail(e),
        Err(e) => fail(e),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        exit(1);
    }

    let cmd = match args[1].as_str() {
        "register-node" => AdminCommand::RegisterNode {
            node_id: arg(&args, 2, "a node_id").to_string(),
            scheme: args.get(3).map(|s| parse_scheme(s)).unwrap_or(Scheme::Hmac),
            key: args.get(4).cloned(),
        },
        "revoke-node" => AdminCommand::RevokeNode {
            node_id: arg(&args, 2, "a node_id").to_string(),
        },
        "list-nodes" => AdminCommand::ListNodes,
        "sv-get" => AdminCommand::SvGet {
            node_id: arg(&args, 2, "a node_id").to_string(),
        },
        "sv-bump-streak" => AdminCommand::SvBumpStreak {
            node_id: arg(&args, 2, "a node_id").to_string(),
            by: args
                .get(3)
                .map(|by| by.parse().unwrap_or_else(|_| fail("by must be a positive integer"))),
        },
        "prune-nonces" => AdminCommand::PruneNonces,
        "ping" => AdminCommand::Ping,
        "keygen" => {
            keygen(args.get(2).map(|s| parse_scheme(s)).unwrap_or(Scheme::Hmac));
            return;
        }
        "sign" => {
            sign(&args);
            return;
        }
        "-h" | "--help" | "help" => {
            print_usage();
            exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            exit(1);
        }
    };

    match send_command(cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => fail(error),
            AdminResponse::List { items } => {
                if items.is_empty() {
                    println!("(none)");
                } else {
                    for item in items {
                        println!("{}", item);
                    }
                }
            }
            AdminResponse::Value { value } => {
                let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                println!("{}", rendered);
            }
            AdminResponse::Pong => {
                println!("pong - meshwork-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    }
}
