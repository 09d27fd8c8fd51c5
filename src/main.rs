use std::env;
use std::process::ExitCode;

use dbconn::{Connection, ConnectionParameters, DbError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dbconn <driver> <host> <port> <user> <password> <database> [sql]
       dbconn <config.json> [sql]";

const DEFAULT_QUERY: &str = "SELECT 1";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logging system, honouring RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (params, sql) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(&params, sql).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dbconn failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Either a config file path or the six discrete connection parameters,
/// optionally followed by the SQL to run.
fn parse_args(args: &[String]) -> dbconn::Result<(ConnectionParameters, &str)> {
    match args.len() {
        1 | 2 => {
            let params = ConnectionParameters::from_file(&args[0])?;
            Ok((params, args.get(1).map_or(DEFAULT_QUERY, String::as_str)))
        }
        6 | 7 => {
            let port = args[2]
                .parse::<u16>()
                .map_err(|_| DbError::InvalidConfig(format!("can't parse port: {}", args[2])))?;
            let params =
                ConnectionParameters::new(&args[0], &args[1], port, &args[3], &args[4], &args[5])?;
            Ok((params, args.get(6).map_or(DEFAULT_QUERY, String::as_str)))
        }
        n => Err(DbError::InvalidConfig(format!(
            "expected 1, 2, 6 or 7 arguments, got {}",
            n
        ))),
    }
}

async fn run(params: &ConnectionParameters, sql: &str) -> dbconn::Result<()> {
    let conn = Connection::open(params).await?;
    info!(
        "Successfully connected to database {}/{}",
        params.host, params.database
    );

    let result = conn.query(sql).await;
    let closed = conn.close().await;

    println!("{}", result?.to_json()?);
    closed
}
