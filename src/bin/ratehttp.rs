//! ratehttp: run a JSON list of HTTP requests under a rate and connection cap.
//!
//! Usage:
//!   ratehttp [OPTIONS] [FILE]        Read requests from FILE (or stdin with `-`/no FILE)
//!
//! Each input element is `{"method", "url", "params", "headers", "body"}`; one JSON
//! line per request is printed to stdout, in input order.

use ratehttp::progress::TracingProgress;
use ratehttp::{Error, HttpRequest, RateHttp, SchedulerConfig};
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Options {
    config: SchedulerConfig,
    keep_going: bool,
    input: Option<String>,
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("ratehttp {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("ratehttp: {e}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ratehttp: rate-limited batch HTTP runner

USAGE:
    ratehttp [OPTIONS] [FILE]

OPTIONS:
    --rate <N>             Maximum requests per second (default: unbounded)
    --connections <N>      Maximum requests in flight (default: 5)
    --retries <N>          Attempts per request, including the first (default: 3)
    --insecure             Do not verify TLS certificates
    --config <FILE>        JSON scheduler configuration (environment and flags override it)
    --keep-going           Report failed requests as values instead of aborting
    -h, --help             Show this help message
    -V, --version          Show version information

ENVIRONMENT:
    RATEHTTP_RATE, RATEHTTP_CONNECTIONS, RATEHTTP_RETRIES,
    RATEHTTP_SSL, RATEHTTP_TIMEOUT_SECS   Defaults for the options above
    RUST_LOG                              Log filter (default: info)"#
    );
}

fn parse_args(args: &[String]) -> Result<Options, Error> {
    parse_args_with(args, |key| std::env::var(key).ok())
}

/// Layers, lowest first: defaults, `--config` file, `RATEHTTP_*` variables, flags.
fn parse_args_with<F>(args: &[String], env: F) -> Result<Options, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match config_path(args)? {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SchedulerConfig::default(),
    };
    let mut config = base.overlay_lookup(env)?;
    let mut keep_going = false;
    let mut input = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--rate" | "--connections" | "--retries" | "--config" => {
                let value = flag_value(args, i)?;
                match arg {
                    "--rate" => config.rate = Some(parse_flag_value(arg, value)?),
                    "--connections" => config.connections = parse_flag_value(arg, value)?,
                    "--retries" => config.retries = parse_flag_value(arg, value)?,
                    _ => {}
                }
                i += 2;
                continue;
            }
            "--insecure" => config.ssl = false,
            "--keep-going" => keep_going = true,
            "-" => input = None,
            other if other.starts_with("--") => {
                return Err(usage_error(format!("unknown option {other}")));
            }
            other => input = Some(other.to_string()),
        }
        i += 1;
    }

    config.validate()?;
    Ok(Options {
        config,
        keep_going,
        input,
    })
}

/// Last `--config` wins; values of other options are skipped.
fn config_path(args: &[String]) -> Result<Option<&str>, Error> {
    let mut path = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                path = Some(flag_value(args, i)?);
                i += 2;
            }
            "--rate" | "--connections" | "--retries" => i += 2,
            _ => i += 1,
        }
    }
    Ok(path)
}

fn flag_value(args: &[String], i: usize) -> Result<&str, Error> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| usage_error(format!("{} needs a value", args[i])))
}

fn parse_flag_value<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| usage_error(format!("invalid value {value:?} for {flag}")))
}

fn usage_error(message: String) -> Error {
    Error::configuration_with_context(
        message,
        ratehttp::ErrorContext::new().with_source("cli"),
    )
}

fn read_requests(input: Option<&str>) -> Result<Vec<HttpRequest>, Error> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

fn run(args: &[String]) -> Result<(), Error> {
    let options = parse_args(args)?;
    let requests = read_requests(options.input.as_deref())?;
    let keep_going = options.keep_going;

    let scheduler = RateHttp::new(options.config)?.with_progress(Arc::new(TracingProgress::new()));

    let results = scheduler.execute(requests, |session, request| async move {
        match session.perform(&request).await {
            Ok(resp) => {
                let body = resp.json::<Value>().unwrap_or_else(|_| Value::String(resp.text()));
                Ok(json!({"url": request.url, "status": resp.status, "body": body}))
            }
            Err(e) if keep_going => Ok(json!({
                "url": request.url,
                "status": e.status(),
                "error": e.to_string(),
            })),
            Err(e) => Err(e),
        }
    })?;

    for (index, mut line) in results.into_iter().enumerate() {
        if let Value::Object(map) = &mut line {
            map.insert("index".to_string(), json!(index));
        }
        println!("{line}");
    }
    Ok(())
}
