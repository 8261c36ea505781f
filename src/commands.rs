use std::env;
use std::str::FromStr as _;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, bail};
use clap::ArgMatches;
use console::style;
use rhino_client::ClientConfig;
use rhino_client::trade::{Credentials, OrderFields, OrderSide, REJECTED_ORDER, TradeApi};

const USERNAME_VAR: &str = "RHINO_USERNAME";
const PASSWORD_VAR: &str = "RHINO_PASSWORD";
const ENDPOINT_VAR: &str = "RHINO_ENDPOINT";

pub fn load_config(path: Option<&String>, endpoint: Option<&String>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    // flag beats environment beats file
    let endpoint = endpoint.cloned().or_else(|| env::var(ENDPOINT_VAR).ok());
    Ok(match endpoint {
        Some(endpoint) => config.with_endpoint(endpoint),
        None => config,
    })
}

pub fn credentials(username: Option<&String>, password: Option<&String>) -> Credentials {
    let username = username
        .cloned()
        .or_else(|| env::var(USERNAME_VAR).ok())
        .unwrap_or_default();
    let password = password
        .cloned()
        .or_else(|| env::var(PASSWORD_VAR).ok())
        .unwrap_or_default();
    Credentials::new(username, password)
}

fn connect(config: &ClientConfig, credentials: &Credentials) -> Result<TradeApi> {
    let mut api = TradeApi::new(config.clone());
    let (ok, message) = api.login(&config.endpoint, credentials);
    if !ok {
        bail!("login to {} failed: {message}", config.endpoint);
    }
    log::info!("{message}");
    Ok(api)
}

pub fn login(config: &ClientConfig, credentials: &Credentials) -> Result<()> {
    let api = connect(config, credentials)?;
    println!(
        "{} {} logged in at {}",
        style("ok").green().bold(),
        api.username(),
        config.endpoint
    );
    Ok(())
}

pub fn positions(config: &ClientConfig, credentials: &Credentials) -> Result<()> {
    let api = connect(config, credentials)?;
    let (rows, status) = api.get_positions();
    if !status.is_ok() {
        bail!("position query failed: {status}");
    }

    if rows.is_empty() {
        println!("{}", style("no positions").dim());
    }
    for row in rows {
        let instrument = row["order_book_id"].as_str().unwrap_or("?");
        println!("{} {row}", style(instrument).cyan().bold());
    }
    Ok(())
}

pub fn orders(config: &ClientConfig, credentials: &Credentials) -> Result<()> {
    let api = connect(config, credentials)?;
    let (orders, status) = api.get_orders();
    if !status.is_ok() {
        bail!("order query failed: {status}");
    }

    if orders.is_empty() {
        println!("{}", style("no orders").dim());
    }
    for (order_ref, order) in orders {
        println!("{} {order}", style(order_ref).cyan().bold());
    }
    Ok(())
}

pub fn place(config: &ClientConfig, credentials: &Credentials, matches: &ArgMatches) -> Result<()> {
    let order_book_id = matches
        .get_one::<String>("order_book_id")
        .context("missing instrument")?;
    let side = matches.get_one::<String>("side").context("missing side")?;
    let side = OrderSide::from_str(side).with_context(|| format!("invalid side `{side}`"))?;
    let quantity = *matches.get_one::<u64>("quantity").context("missing quantity")?;
    let price = *matches.get_one::<f64>("price").context("missing price")?;

    let api = connect(config, credentials)?;
    let order = OrderFields::limit(order_book_id.as_str(), side, quantity, price);
    let (order_ref, message) = api.place_order(&order);
    if order_ref == REJECTED_ORDER {
        bail!("order rejected: {message}");
    }

    println!(
        "{} {side} {quantity} {order_book_id} @ {price} as {}",
        style("placed").green().bold(),
        style(order_ref).cyan()
    );
    Ok(())
}

pub fn cancel(config: &ClientConfig, credentials: &Credentials, matches: &ArgMatches) -> Result<()> {
    let order_ref = matches
        .get_one::<String>("order_ref")
        .context("missing order reference")?;

    let api = connect(config, credentials)?;
    let (ok, message) = api.cancel_order(order_ref);
    if !ok {
        bail!("cancel of {order_ref} failed: {message}");
    }
    println!("{} {order_ref}", style("cancelled").green().bold());
    Ok(())
}

pub fn watch(config: &ClientConfig, credentials: &Credentials, matches: &ArgMatches) -> Result<()> {
    let methods: Vec<String> = matches
        .get_many::<String>("methods")
        .context("missing notification names")?
        .cloned()
        .collect();
    let seconds = *matches.get_one::<u64>("seconds").context("missing duration")?;

    let api = connect(config, credentials)?;
    let client = api.client().context("client missing after login")?;

    for method in methods {
        let label = method.clone();
        client.on(method, move |params| {
            println!(
                "{} {} {params}",
                style(chrono::Local::now().format("%H:%M:%S%.3f")).dim(),
                style(&label).yellow().bold()
            );
            Ok(())
        });
    }

    let mut status = client.watch_status();
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        if status.has_changed().unwrap_or(false) {
            println!("{} {}", style("status").magenta(), *status.borrow_and_update());
        }
        thread::sleep(Duration::from_millis(200));
    }

    let stats = client.stats();
    println!(
        "{} dispatched {}, unhandled {}, handler faults {}, stale warnings {}",
        style("done").green().bold(),
        stats.notifications_dispatched,
        stats.unhandled_notifications,
        stats.handler_faults,
        stats.stale_warnings
    );
    Ok(())
}
