//! Moderator action commands

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use slipdesk_core::models::{SlipDetail, SlipStatus};
use slipdesk_core::moderation::ItemCorrections;
use slipdesk_core::{Corrections, ModeratorAction, Pipeline, REJECTION_REASONS};

/// Parse an `--expect` status
pub fn parse_expected(value: Option<&str>) -> Result<Option<SlipStatus>> {
    value
        .map(|s| s.parse::<SlipStatus>())
        .transpose()
        .map_err(|e| anyhow!(e))
}

/// Apply an action and print the resulting status
pub fn cmd_review(
    pipeline: &Pipeline,
    id: i64,
    action: ModeratorAction,
    moderator: &str,
    expected: Option<SlipStatus>,
) -> Result<SlipDetail> {
    let verb = action.verb();
    let detail = pipeline.moderate(id, action, moderator, expected)?;
    print_result(verb, &detail);
    Ok(detail)
}

/// Split `name=value` pairs into correction fields
fn parse_assignments(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", pair))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Missing field name in '{}'", pair);
            }
            // Numeric fields accept strings, so everything goes through as text
            Ok((name.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

/// Build corrections from `--set field=value` and `--item id.field=value`
pub fn parse_corrections(fields: &[String], items: &[String]) -> Result<Corrections> {
    let mut per_item: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for item in items {
        let (id, rest) = item
            .split_once('.')
            .ok_or_else(|| anyhow!("Expected ID.FIELD=VALUE, got '{}'", item))?;
        let id: i64 = id
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid line item id in '{}'", item))?;
        per_item.entry(id).or_default().push(rest.to_string());
    }

    let line_items = per_item
        .into_iter()
        .map(|(id, pairs)| {
            Ok(ItemCorrections {
                id,
                fields: parse_assignments(&pairs)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Corrections {
        fields: parse_assignments(fields)?,
        line_items,
    })
}

pub fn cmd_review_correct(
    pipeline: &Pipeline,
    id: i64,
    fields: &[String],
    items: &[String],
    moderator: &str,
    expected: Option<SlipStatus>,
) -> Result<SlipDetail> {
    let corrections = parse_corrections(fields, items)?;
    let detail = pipeline.correct(id, &corrections, moderator, expected)?;
    print_result("correct", &detail);
    Ok(detail)
}

pub fn cmd_review_reasons() -> Result<()> {
    println!();
    println!("Rejection reasons");
    for (i, reason) in REJECTION_REASONS.iter().enumerate() {
        println!("  {}. {}", i + 1, reason);
    }
    println!();
    Ok(())
}

fn print_result(verb: &str, detail: &SlipDetail) {
    let slip = &detail.slip;
    let icon = match slip.status {
        SlipStatus::Approved | SlipStatus::Corrected => "✅",
        SlipStatus::Rejected => "🚫",
        SlipStatus::ManualReview => "🔎",
        _ => "📝",
    };
    println!("{} Slip #{}: {} → {}", icon, slip.id, verb, slip.status);
    if let Some(notes) = &slip.review_notes {
        println!("   Notes: {}", notes);
    }
}
