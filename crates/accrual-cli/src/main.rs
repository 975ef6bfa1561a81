#![deny(warnings)]

//! Headless runner: plays a scripted session against a content set and
//! checks that two identical runs end in the same state.

use accrual_core::action::{purchase_cost, Action};
use accrual_core::event::{NotificationSink, Severity};
use accrual_core::game::Game;
use accrual_core::template::Rules;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    content: Option<PathBuf>,
    seconds: u64,
    study: f64,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        content: None,
        seconds: 600,
        study: 1.0,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--content" => args.content = it.next().map(PathBuf::from),
            "--seconds" => {
                args.seconds = it.next().and_then(|s| s.parse().ok()).unwrap_or(args.seconds)
            }
            "--study" => args.study = it.next().and_then(|s| s.parse().ok()).unwrap_or(args.study),
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Forwards notifications to the log.
struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&mut self, message: &str, severity: Severity) {
        match severity {
            Severity::Warning | Severity::Error => warn!(target: "accrual::notify", "{message}"),
            Severity::Info | Severity::Success => info!(target: "accrual::notify", "{message}"),
        }
    }
}

/// Manual study: the player gathers the knowledge input by hand.
fn study(game: &mut Game, amount: f64) {
    let resource = game.rules().config.knowledge.input.clone();
    if !game.dispatch(Action::Gather { resource, amount }) {
        warn!(amount, "study session rejected");
    }
}

/// One second of scripted play after the tick.
fn play(game: &mut Game) {
    let batch = game.rules().config.knowledge.batch_size;
    let input = game.rules().config.knowledge.input.clone();
    if game.state().value_of(input.as_str()) >= batch {
        game.dispatch(Action::ApplyAllKnowledge);
    }

    let upgrades: Vec<_> = game
        .state()
        .upgrades
        .values()
        .filter(|u| u.unlocked && !u.purchased && game.state().can_afford(&u.cost))
        .map(|u| u.id.clone())
        .collect();
    for id in upgrades {
        game.dispatch(Action::PurchaseUpgrade { id });
    }

    // Cheapest affordable building first, one unit per second.
    let rules = game.rules();
    let next = game
        .state()
        .buildings
        .values()
        .filter(|b| b.unlocked)
        .map(|b| (b.id.clone(), purchase_cost(rules, b, 1)))
        .filter(|(_, cost)| game.state().can_afford(cost))
        .min_by(|(_, a), (_, b)| a.values().sum::<f64>().total_cmp(&b.values().sum::<f64>()))
        .map(|(id, _)| id);
    if let Some(id) = next {
        game.dispatch(Action::PurchaseBuilding { id, count: 1 });
    }

    let mining = game.state().mining.clone();
    if game.state().features.get("mining").copied().unwrap_or(false)
        && game.state().value_of(mining.compute_resource.as_str()) >= mining.compute_cost
    {
        game.dispatch(Action::Mine);
    }
    if game.state().value_of(mining.mined_resource.as_str()) > 0.0 {
        game.dispatch(Action::ExchangeCurrency);
    }
}

fn run(rules: Arc<Rules>, seconds: u64, study_per_second: f64) -> Game {
    let mut game = Game::new(rules, Box::new(LogSink));
    game.start(0);
    for s in 1..=seconds {
        game.tick(s * 1_000);
        // Study sessions land in ten-second bursts.
        if s % 10 == 0 {
            study(&mut game, study_per_second * 10.0);
        }
        play(&mut game);
    }
    game
}

fn print_report(game: &Game) {
    println!("{:<16} {:>14} {:>12} {:>12}", "resource", "value", "max", "per sec");
    for r in game.state().resources.values().filter(|r| r.unlocked) {
        let max = if r.max.is_infinite() {
            "inf".to_string()
        } else {
            format!("{:.0}", r.max)
        };
        println!(
            "{:<16} {:>14.6} {:>12} {:>12.6}",
            r.id.as_str(),
            r.value,
            max,
            r.per_second
        );
    }
    println!();
    for b in game.state().buildings.values().filter(|b| b.count > 0) {
        println!("{:<16} x{}", b.id.as_str(), b.count);
    }
    let purchased: Vec<_> = game
        .state()
        .upgrades
        .values()
        .filter(|u| u.purchased)
        .map(|u| u.id.as_str())
        .collect();
    println!("upgrades: {}", purchased.join(", "));
    let log = &game.session().log;
    println!(
        "events: {} written, {} dropped | unlock cache: {} hits, {} misses",
        log.total_written(),
        log.dropped_count(),
        game.session().unlocks.cache_hits(),
        game.session().unlocks.cache_misses()
    );
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args()?;
    info!(content = ?args.content, seconds = args.seconds, "starting CLI");

    let rules = Arc::new(match &args.content {
        Some(dir) => accrual_data::load_rules(dir)?,
        None => accrual_data::standard_rules()?,
    });

    let first = run(Arc::clone(&rules), args.seconds, args.study);
    let second = run(rules, args.seconds, args.study);
    if first.state_hash() != second.state_hash() {
        bail!(
            "non-deterministic run: {:016x} != {:016x}",
            first.state_hash(),
            second.state_hash()
        );
    }

    print_report(&first);
    println!("state hash: {:016x} (deterministic)", first.state_hash());
    Ok(())
}
