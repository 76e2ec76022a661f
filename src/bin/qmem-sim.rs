use clap::{Arg, ArgMatches, Command};
use lightning_query::logging::init_logging;
use lightning_query::testing::{LoopbackRunner, McReply, ScriptedReply};
use lightning_query::{ConfigPreset, QueryContext, QueryEngine, QueryRuntimeConfig};
use std::time::Instant;
use tracing::{info, Level};

/// Request-loop simulator for the query arena.
///
/// Runs a number of synthetic requests against the loopback runner, each
/// issuing memcached, SQL and RPC queries, and prints the arena statistics.
/// Every `--teardown-every`th request ends with a full teardown; the others
/// only reset the arena between requests.
fn main() {
    let matches = create_cli().get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("qmem-sim")
        .about("Simulate request handling against the query arena")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("requests")
                .help("Number of requests to simulate")
                .long("requests")
                .short('n')
                .value_parser(clap::value_parser!(u64))
                .default_value("100"),
        )
        .arg(
            Arg::new("queries")
                .help("Memcached queries per request")
                .long("queries")
                .value_parser(clap::value_parser!(u64))
                .default_value("16"),
        )
        .arg(
            Arg::new("teardown-every")
                .help("Fully tear down the arena every N requests")
                .long("teardown-every")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("1"),
        )
        .arg(
            Arg::new("config")
                .help("JSON runtime config file")
                .long("config")
                .conflicts_with("preset"),
        )
        .arg(
            Arg::new("preset")
                .help("Named config preset")
                .long("preset")
                .value_parser(["production", "development", "low-memory"])
                .default_value("development"),
        )
        .arg(
            Arg::new("log-level")
                .help("Log level")
                .long("log-level")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("json-logs")
                .help("Emit logs as JSON")
                .long("json-logs")
                .action(clap::ArgAction::SetTrue),
        )
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let level: Level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info")
        .parse()?;
    init_logging(level, matches.get_flag("json-logs"))?;

    let config = match matches.get_one::<String>("config") {
        Some(path) => QueryRuntimeConfig::from_json_file(path)?,
        None => {
            let name = matches
                .get_one::<String>("preset")
                .map(String::as_str)
                .unwrap_or("development");
            ConfigPreset::from_name(name)
                .ok_or_else(|| format!("unknown preset {}", name))?
                .to_config()
        }
    };

    let requests = *matches.get_one::<u64>("requests").unwrap_or(&100);
    let queries = *matches.get_one::<u64>("queries").unwrap_or(&16);
    let teardown_every = *matches.get_one::<u64>("teardown-every").unwrap_or(&1);

    let ctx = QueryContext::new(config)?;
    let mut engine = QueryEngine::with_context(ctx, LoopbackRunner::new());
    let started = Instant::now();
    let mut rows = 0u64;
    let mut values = 0u64;
    let mut failures = 0u64;

    engine.start_request()?;
    for request in 0..requests {
        for q in 0..queries {
            let value = format!("value-{}-{}", request, q).into_bytes();
            let runner = engine.runner_mut();
            if q % 7 == 6 {
                runner.push_reply(ScriptedReply::Timeout);
            } else {
                runner.push_reply(ScriptedReply::Memcached(vec![
                    McReply::Value(value),
                    McReply::End,
                ]));
            }
            let mut on_reply = |_: &[u8]| values += 1;
            if engine
                .mc_run_query(1, b"get key\r\n", 100, 0, Some(&mut on_reply))
                .is_err()
            {
                failures += 1;
            }
        }

        engine.runner_mut().push_reply(ScriptedReply::Sql {
            ready: Vec::new(),
            rows: vec![b"row-1".to_vec(), b"row-2".to_vec()],
        });
        engine.sql_run_query(2, b"SELECT 1", 100, &mut |_: &[u8]| rows += 1)?;

        let slot_id = engine.rpc_send_query(3, format!("rpc-{}", request).into(), 100)?;
        engine.wait_net_events(10)?;
        while let Some(event) = engine.pop_net_event() {
            if event.slot_id != slot_id {
                return Err(format!("answer for unexpected slot {}", event.slot_id).into());
            }
        }

        if (request + 1) % teardown_every == 0 {
            engine.finish_request()?;
            engine.start_request()?;
        } else {
            engine.between_requests();
        }
    }
    let stats = engine.context().arena.stats();
    engine.finish_request()?;

    info!(
        requests,
        values,
        rows,
        failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
