//! `rhino` command line front-end: log in to the trade gateway, query and
//! place orders, or watch pushed notifications.

use anyhow::Result;
use clap::{Arg, ArgAction, Command, value_parser};

mod commands;

fn cli() -> Command {
    Command::new("rhino")
        .version("0.1.0")
        .about("Command line front-end for the rhino trade gateway")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .help("Path to a TOML client configuration"),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .short('e')
                .global(true)
                .help("Gateway endpoint, e.g. tcp://127.0.0.1:9527"),
        )
        .arg(
            Arg::new("username")
                .long("username")
                .short('u')
                .global(true)
                .help("Login name (falls back to RHINO_USERNAME)"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .global(true)
                .help("Login password (falls back to RHINO_PASSWORD)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Set verbose output level"),
        )
        .subcommand(Command::new("login").about("Check that the credentials are accepted"))
        .subcommand(Command::new("positions").about("List current positions"))
        .subcommand(Command::new("orders").about("List orders known to the gateway"))
        .subcommand(
            Command::new("place")
                .about("Place a limit order")
                .arg(
                    Arg::new("order_book_id")
                        .required(true)
                        .help("Instrument, e.g. 600000.SH"),
                )
                .arg(Arg::new("side").required(true).help("B/buy or S/sell"))
                .arg(
                    Arg::new("quantity")
                        .required(true)
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("price")
                        .required(true)
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("cancel")
                .about("Cancel an order")
                .arg(Arg::new("order_ref").required(true)),
        )
        .subcommand(
            Command::new("watch")
                .about("Print notifications pushed by the gateway")
                .arg(
                    Arg::new("methods")
                        .required(true)
                        .num_args(1..)
                        .help("Notification names to subscribe to"),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .short('s')
                        .default_value("60")
                        .value_parser(value_parser!(u64))
                        .help("How long to watch before exiting"),
                ),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    rhino_client::setup(Some(log_level));

    // credentials and endpoint may come from a .env file
    dotenvy::dotenv().ok();

    let config = commands::load_config(
        matches.get_one::<String>("config"),
        matches.get_one::<String>("endpoint"),
    )?;
    let credentials = commands::credentials(
        matches.get_one::<String>("username"),
        matches.get_one::<String>("password"),
    );

    match matches.subcommand() {
        Some(("login", _)) => commands::login(&config, &credentials),
        Some(("positions", _)) => commands::positions(&config, &credentials),
        Some(("orders", _)) => commands::orders(&config, &credentials),
        Some(("place", sub)) => commands::place(&config, &credentials, sub),
        Some(("cancel", sub)) => commands::cancel(&config, &credentials, sub),
        Some(("watch", sub)) => commands::watch(&config, &credentials, sub),
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
