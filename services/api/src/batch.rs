use crate::infra::{build_service, demo_rule_definitions};
use chrono::Utc;
use clap::Args;
use rewards_engine::engine::RuleId;
use rewards_engine::error::AppError;

#[derive(Args, Debug, Default)]
pub(crate) struct ApplyArgs {
    /// Actor recorded on every audit entry produced by the run
    #[arg(long, default_value = "cli")]
    pub(crate) actor: String,
    /// Apply a single catalog rule instead of the full batch
    #[arg(long)]
    pub(crate) rule_id: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct PreviewArgs {
    /// Preview only the rule with this identifier
    #[arg(long)]
    pub(crate) rule_id: Option<String>,
}

pub(crate) fn run_apply(args: ApplyArgs) -> Result<(), AppError> {
    let service = build_service();
    let now = Utc::now();

    let outcome = match args.rule_id {
        Some(rule_id) => service.apply_rule(&RuleId(rule_id), &args.actor, now)?,
        None => service.apply(&args.actor, now)?,
    };

    println!("Batch evaluation at {now} (actor: {})", args.actor);
    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{json}"),
        Err(err) => println!("Outcome unavailable: {err}"),
    }

    Ok(())
}

pub(crate) fn run_preview(args: PreviewArgs) -> Result<(), AppError> {
    let service = build_service();
    let definitions: Vec<_> = demo_rule_definitions()
        .into_iter()
        .filter(|definition| {
            args.rule_id
                .as_deref()
                .map(|wanted| definition.id == wanted)
                .unwrap_or(true)
        })
        .collect();

    if definitions.is_empty() {
        println!("No configured rules match the requested identifier");
        return Ok(());
    }

    for definition in definitions {
        let outcome = service.preview(&definition)?;
        println!(
            "Rule {} ({} {} over {}): {} eligible",
            definition.id, definition.metric, definition.operator, definition.time_window,
            outcome.count
        );
        for subject in &outcome.sample {
            println!("  - {}", subject.0);
        }
    }

    Ok(())
}
