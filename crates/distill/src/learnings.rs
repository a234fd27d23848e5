//! `distill learnings`: list stored learnings, newest first or shuffled.

use anyhow::Result;

use distill_core::models::Learning;
use distill_core::store::{LearningOrder, Store};

use crate::config::Config;
use crate::db;
use crate::search::{format_date, one_line};
use crate::sqlite_store::SqliteStore;

pub async fn run_learnings(config: &Config, random: bool, limit: usize, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let order = if random {
        LearningOrder::Random
    } else {
        LearningOrder::Recent
    };
    let learnings = store.list_learnings(order, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&learnings)?);
    } else {
        print_learnings(&learnings, store.count_learnings().await?);
    }

    pool.close().await;
    Ok(())
}

fn print_learnings(learnings: &[Learning], total: i64) {
    if learnings.is_empty() {
        println!("No learnings.");
        return;
    }

    for learning in learnings {
        println!("{}  ({})", learning.title, format_date(learning.created_at));
        println!("    problem: {}", one_line(&learning.problem, 200));
        println!("    insight: {}", one_line(&learning.insight, 200));
        for block in &learning.blocks {
            println!("    Q: {}", one_line(&block.question, 160));
            println!("    A: {}", one_line(&block.answer, 160));
        }
        if !learning.tags.is_empty() {
            println!("    tags: {}", learning.tags.join(", "));
        }
        println!("    source: {}", learning.source);
        println!();
    }
    println!("showing {} of {} learnings", learnings.len(), total);
}
