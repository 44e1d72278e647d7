use std::fmt::Write;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Interaction, Recommendation};
use crate::pipeline::{ClassOutcome, CycleReport};

pub fn render_recommendations(
    user_id: Uuid,
    recommendation: Option<&Recommendation>,
    limit: usize,
) -> String {
    let mut output = String::new();

    let Some(recommendation) = recommendation else {
        let _ = writeln!(output, "No recommendations yet for {user_id}.");
        return output;
    };

    let _ = writeln!(output, "# Recommendations for {user_id}");
    let _ = writeln!(output, "Updated {}", recommendation.updated_at.to_rfc3339());

    for (heading, ids) in [
        ("Articles", &recommendation.ranked_article_ids),
        ("Jobs", &recommendation.ranked_job_ids),
    ] {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {heading}");
        if ids.is_empty() {
            let _ = writeln!(output, "Nothing to recommend.");
            continue;
        }
        for (position, id) in ids.iter().take(limit).enumerate() {
            let _ = writeln!(output, "{}. {}", position + 1, id);
        }
        if ids.len() > limit {
            let _ = writeln!(output, "... {} more", ids.len() - limit);
        }
    }

    output
}

pub fn render_cycle_report(report: &CycleReport) -> String {
    let mut output = String::new();
    let elapsed = report.finished_at - report.started_at;

    let _ = writeln!(
        output,
        "Refresh cycle finished in {} ms for {} users.",
        elapsed.num_milliseconds(),
        report.users
    );
    for (label, outcome) in [("articles", &report.articles), ("jobs", &report.jobs)] {
        match outcome {
            ClassOutcome::Ranked {
                items,
                stale_interactions,
            } => {
                let _ = writeln!(
                    output,
                    "- {label}: ranked {items} items ({stale_interactions} stale interactions ignored)"
                );
            }
            ClassOutcome::Skipped { reason } => {
                let _ = writeln!(output, "- {label}: skipped ({reason})");
            }
        }
    }
    let _ = writeln!(
        output,
        "Published {} records, {} failed.",
        report.published, report.publish_failures
    );

    output
}

pub fn render_interactions(interactions: &[Interaction]) -> String {
    let mut output = String::new();

    if interactions.is_empty() {
        let _ = writeln!(output, "No interactions recorded.");
        return output;
    }

    for interaction in interactions {
        let kinds: Vec<&str> = interaction.kinds.iter().map(|kind| kind.as_str()).collect();
        let _ = writeln!(
            output,
            "- {} score {} [{}] last recorded {}",
            interaction.target,
            interaction.score,
            kinds.join(", "),
            interaction.recorded_at.to_rfc3339()
        );
    }

    output
}

/// Pretty JSON for `--json` output. A missing recommendation renders as `null`.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut output = serde_json::to_string_pretty(value)?;
    output.push('\n');
    Ok(output)
}
